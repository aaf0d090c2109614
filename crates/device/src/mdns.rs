//! Production [`ServiceBrowser`] backed by the `mdns-sd` daemon.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent};

use crate::discovery::{BrowseError, ServiceBrowser};

/// Runs a short-lived mDNS daemon per browse on the blocking pool.
#[derive(Debug, Default, Clone)]
pub struct MdnsBrowser;

impl MdnsBrowser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ServiceBrowser for MdnsBrowser {
    async fn browse(
        &self,
        service_type: &str,
        window: Duration,
    ) -> Result<Vec<Ipv4Addr>, BrowseError> {
        let service_type = service_type.to_string();
        tokio::task::spawn_blocking(move || browse_blocking(&service_type, window))
            .await
            .map_err(|e| BrowseError::Task(e.to_string()))?
    }
}

fn browse_blocking(service_type: &str, window: Duration) -> Result<Vec<Ipv4Addr>, BrowseError> {
    let daemon = ServiceDaemon::new().map_err(|e| BrowseError::Daemon(e.to_string()))?;
    let receiver = daemon
        .browse(service_type)
        .map_err(|e| BrowseError::Daemon(e.to_string()))?;

    let deadline = Instant::now() + window;
    let mut found: Vec<Ipv4Addr> = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match receiver.recv_timeout(remaining) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                for addr in info.get_addresses() {
                    if let IpAddr::V4(v4) = addr {
                        if !found.contains(v4) {
                            tracing::debug!(ip = %v4, name = info.get_fullname(), "mDNS device resolved");
                            found.push(*v4);
                        }
                    }
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    if let Err(e) = daemon.shutdown() {
        tracing::debug!(error = %e, "mDNS daemon shutdown failed");
    }

    Ok(found)
}
