//! Shared building blocks for driving a networked pixel display.
//!
//! Holds everything the device, rotation and daemon crates agree on:
//!
//! - [`error`]: the [`CoreError`] taxonomy and [`CoreResult`] alias.
//! - [`device`]: display geometry, frame ceiling and protocol constants.
//! - [`interval`]: the fixed set of rotation intervals.
//! - [`validation`]: input parsing for IPs, colours and text.
//! - [`persist`]: atomic JSON read/write for small state files.
//! - [`upload_store`] / [`file_tracker`]: TTL-bounded upload artifacts
//!   and reference-counted file protection.

pub mod device;
pub mod error;
pub mod file_tracker;
pub mod interval;
pub mod persist;
pub mod upload_store;
pub mod validation;

pub use error::{CoreError, CoreResult};
pub use interval::RotationInterval;
