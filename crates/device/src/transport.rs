//! Transport capability used to talk to the device.
//!
//! [`DeviceConnection`](crate::DeviceConnection) and
//! [`DeviceDiscovery`](crate::DeviceDiscovery) only ever see these traits, so
//! tests can substitute a scripted device for the real HTTP client.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::protocol::{DeviceCommand, DeviceResponse};

/// Failure of a single request at the transport level.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    /// The device answered with a non-200 status.
    #[error("HTTP {0}")]
    Status(u16),

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Errors that mean the link itself is gone (as opposed to the device
    /// answering badly).
    pub fn is_connection(&self) -> bool {
        matches!(self, TransportError::Connect(_))
    }
}

/// Opens sessions. One session is held per established connection and
/// reused for every command until it is replaced or torn down.
pub trait DeviceTransport: Send + Sync {
    fn open_session(&self) -> Result<Arc<dyn DeviceSession>, TransportError>;
}

/// A reusable request context (connection pool, keep-alive state).
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// POST one command to the device at `ip` and parse the response
    /// envelope. Must return [`TransportError::Status`] for any non-200
    /// reply.
    async fn post(
        &self,
        ip: Ipv4Addr,
        command: &DeviceCommand,
        timeout: Duration,
    ) -> Result<DeviceResponse, TransportError>;

    /// Release the session's resources. Further calls to `post` are not
    /// expected after this.
    fn close(&self) {}
}
