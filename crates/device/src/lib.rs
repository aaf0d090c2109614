//! Client library for a networked 64×64 pixel display.
//!
//! Covers everything between "there is a device somewhere on the LAN" and
//! "these frames are on screen":
//!
//! - [`protocol`]: typed command envelope and response parsing.
//! - [`transport`]: the device transport capability plus the
//!   [`HttpTransport`](http::HttpTransport) production implementation.
//! - [`connection`]: the single shared [`DeviceConnection`] state machine
//!   with retry/backoff.
//! - [`discovery`]: last-known IP, mDNS, and subnet sweep strategies.
//! - [`frames`] / [`upload`]: frame decoding/encoding and the upload
//!   sequence.
//! - [`text`]: scrolling text overlays.
//! - [`reconnect`]: background supervisor that re-establishes a lost link.

pub mod connection;
pub mod discovery;
pub mod frames;
pub mod http;
pub mod last_ip;
pub mod mdns;
pub mod protocol;
pub mod reconnect;
pub mod text;
pub mod transport;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::{ConnectionConfig, ConnectionPhase, ConnectionStatus, DeviceConnection};
pub use discovery::{DeviceDiscovery, DiscoveryConfig};
pub use protocol::{DeviceCommand, DeviceResponse};
pub use transport::{DeviceSession, DeviceTransport, TransportError};
pub use upload::{FrameUploader, UploadSummary};
