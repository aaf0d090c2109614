//! Periodic background tasks spawned by the daemon.

pub mod cleanup;
