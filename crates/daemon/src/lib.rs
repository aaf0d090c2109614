//! Long-running process that owns the device link and the rotation.
//!
//! Everything is constructed once in [`services::Services`] and shared by
//! handle; nothing here is a global.

pub mod background;
pub mod config;
pub mod ingest;
pub mod services;
