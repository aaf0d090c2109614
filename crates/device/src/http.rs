//! Production transport: JSON over HTTP/1.1 with `reqwest`.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pixoo_core::device::{DEVICE_PATH, DEVICE_PORT};

use crate::protocol::{DeviceCommand, DeviceResponse};
use crate::transport::{DeviceSession, DeviceTransport, TransportError};

/// Opens `reqwest`-backed sessions against `http://{ip}:{port}/post`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    port: u16,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self { port: DEVICE_PORT }
    }

    /// Target a non-standard port (used against local fake devices).
    pub fn with_port(port: u16) -> Self {
        Self { port }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTransport for HttpTransport {
    fn open_session(&self) -> Result<Arc<dyn DeviceSession>, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Arc::new(HttpSession {
            client,
            port: self.port,
        }))
    }
}

struct HttpSession {
    client: reqwest::Client,
    port: u16,
}

#[async_trait]
impl DeviceSession for HttpSession {
    async fn post(
        &self,
        ip: Ipv4Addr,
        command: &DeviceCommand,
        timeout: Duration,
    ) -> Result<DeviceResponse, TransportError> {
        let url = format!("http://{ip}:{}{DEVICE_PATH}", self.port);

        let response = self
            .client
            .post(&url)
            .json(command)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(TransportError::Status(status.as_u16()));
        }

        // The device does not always send a JSON content type, so parse the
        // body text directly.
        let body = response.text().await.map_err(classify)?;
        serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}
