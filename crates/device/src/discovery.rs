//! Locating a device on the local network.
//!
//! Strategies run in order and short-circuit on the first one that finds
//! anything:
//!
//! 1. The persisted last-known address, probed with a short timeout.
//! 2. mDNS browsing for the device's advertised service type.
//! 3. A parallel sweep of every host address in the local /24.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use pixoo_core::device::MDNS_SERVICE_TYPE;

use crate::last_ip::LastIpStore;
use crate::protocol::DeviceCommand;
use crate::transport::{DeviceSession, DeviceTransport};

/// Address used to learn which local interface routes to the outside world.
/// Connecting a UDP socket sends no packets.
const ROUTE_PROBE_ADDR: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 80);

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Probe timeout for the last-known address.
    pub last_ip_timeout: Duration,
    /// Probe timeout for each sweep candidate.
    pub probe_timeout: Duration,
    /// Maximum number of sweep probes in flight.
    pub sweep_concurrency: usize,
    /// Upper bound on the whole sweep. Hits found before the deadline are
    /// still returned.
    pub sweep_deadline: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            last_ip_timeout: Duration::from_millis(500),
            probe_timeout: Duration::from_millis(300),
            sweep_concurrency: 50,
            sweep_deadline: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrowseError {
    #[error("mDNS daemon unavailable: {0}")]
    Daemon(String),

    #[error("browse task failed: {0}")]
    Task(String),
}

/// Local-network service discovery.
#[async_trait]
pub trait ServiceBrowser: Send + Sync {
    /// Collect IPv4 addresses advertising `service_type` for up to `window`.
    async fn browse(&self, service_type: &str, window: Duration)
        -> Result<Vec<Ipv4Addr>, BrowseError>;
}

pub struct DeviceDiscovery {
    transport: Arc<dyn DeviceTransport>,
    browser: Option<Arc<dyn ServiceBrowser>>,
    last_ip: Option<LastIpStore>,
    local_address: Option<Ipv4Addr>,
    config: DiscoveryConfig,
}

impl DeviceDiscovery {
    pub fn new(transport: Arc<dyn DeviceTransport>, config: DiscoveryConfig) -> Self {
        Self {
            transport,
            browser: None,
            last_ip: None,
            local_address: None,
            config,
        }
    }

    pub fn with_browser(mut self, browser: Arc<dyn ServiceBrowser>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn with_last_ip_store(mut self, store: LastIpStore) -> Self {
        self.last_ip = Some(store);
        self
    }

    /// Sweep the /24 around `addr` instead of detecting the local address.
    pub fn with_local_address(mut self, addr: Ipv4Addr) -> Self {
        self.local_address = Some(addr);
        self
    }

    /// Find devices, browsing mDNS for up to `window`. Returns an empty list
    /// when nothing answers; individual strategy failures are logged and
    /// the next strategy is tried.
    pub async fn discover(&self, window: Duration) -> Vec<Ipv4Addr> {
        let session = match self.transport.open_session() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot open session for discovery");
                return Vec::new();
            }
        };

        let found = self.run_strategies(&session, window).await;
        session.close();
        found
    }

    async fn run_strategies(
        &self,
        session: &Arc<dyn DeviceSession>,
        window: Duration,
    ) -> Vec<Ipv4Addr> {
        if let Some(ip) = self.last_ip.as_ref().and_then(LastIpStore::load) {
            if probe(session.as_ref(), ip, self.config.last_ip_timeout).await {
                tracing::info!(ip = %ip, "Last known device address still answers");
                return vec![ip];
            }
            tracing::debug!(ip = %ip, "Last known device address did not answer");
        }

        if let Some(browser) = &self.browser {
            match browser.browse(MDNS_SERVICE_TYPE, window).await {
                Ok(found) if !found.is_empty() => {
                    tracing::info!(count = found.len(), "Devices found via mDNS");
                    return found;
                }
                Ok(_) => tracing::debug!("No devices advertised via mDNS"),
                Err(e) => tracing::warn!(error = %e, "mDNS browse failed"),
            }
        }

        self.sweep(session).await
    }

    async fn sweep(&self, session: &Arc<dyn DeviceSession>) -> Vec<Ipv4Addr> {
        let local = match self.local_address {
            Some(addr) => addr,
            None => match local_ipv4().await {
                Some(addr) => addr,
                None => {
                    tracing::warn!("Could not determine local address, skipping subnet sweep");
                    return Vec::new();
                }
            },
        };

        let [a, b, c, _] = local.octets();
        tracing::info!(subnet = %format!("{a}.{b}.{c}.0/24"), "Sweeping local subnet");

        let timeout = self.config.probe_timeout;
        let mut probes = futures::stream::iter(1..=254u8)
            .map(|host| {
                let ip = Ipv4Addr::new(a, b, c, host);
                let session = Arc::clone(session);
                async move { probe(session.as_ref(), ip, timeout).await.then_some(ip) }
            })
            .buffer_unordered(self.config.sweep_concurrency.max(1));

        let mut found = Vec::new();
        let collect = async {
            while let Some(hit) = probes.next().await {
                if let Some(ip) = hit {
                    found.push(ip);
                }
            }
        };
        if tokio::time::timeout(self.config.sweep_deadline, collect).await.is_err() {
            tracing::warn!(found = found.len(), "Subnet sweep hit its deadline");
        }

        found.sort();
        tracing::info!(count = found.len(), "Subnet sweep finished");
        found
    }
}

/// Whether `ip` answers the handshake with an explicit success code.
async fn probe(session: &dyn DeviceSession, ip: Ipv4Addr, timeout: Duration) -> bool {
    matches!(
        session.post(ip, &DeviceCommand::GetIndex, timeout).await,
        Ok(response) if response.is_verified()
    )
}

async fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = tokio::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await.ok()?;
    socket.connect(ROUTE_PROBE_ADDR).await.ok()?;
    match socket.local_addr().ok()?.ip() {
        std::net::IpAddr::V4(v4) if !v4.is_unspecified() => Some(v4),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::protocol::DeviceResponse;
    use crate::test_support::ScriptedTransport;
    use crate::transport::TransportError;

    struct FixedBrowser {
        found: Vec<Ipv4Addr>,
        calls: AtomicUsize,
    }

    impl FixedBrowser {
        fn new(found: Vec<Ipv4Addr>) -> Arc<Self> {
            Arc::new(Self {
                found,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ServiceBrowser for FixedBrowser {
        async fn browse(
            &self,
            service_type: &str,
            _window: Duration,
        ) -> Result<Vec<Ipv4Addr>, BrowseError> {
            assert_eq!(service_type, "_pixoo._tcp.local.");
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.found.clone())
        }
    }

    fn discovery(transport: &ScriptedTransport) -> DeviceDiscovery {
        DeviceDiscovery::new(Arc::new(transport.clone()), DiscoveryConfig::default())
            .with_local_address(Ipv4Addr::new(10, 0, 0, 7))
    }

    #[tokio::test]
    async fn last_known_address_short_circuits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LastIpStore::in_dir(dir.path());
        store.save(Ipv4Addr::new(192, 168, 1, 50)).unwrap();

        let transport = ScriptedTransport::always_ok();
        let browser = FixedBrowser::new(vec![Ipv4Addr::new(192, 168, 1, 99)]);
        let found = discovery(&transport)
            .with_last_ip_store(store)
            .with_browser(browser.clone())
            .discover(Duration::from_secs(3))
            .await;

        assert_eq!(found, vec![Ipv4Addr::new(192, 168, 1, 50)]);
        assert_eq!(browser.calls.load(Ordering::SeqCst), 0);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn stale_last_address_falls_through_to_mdns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LastIpStore::in_dir(dir.path());
        store.save(Ipv4Addr::new(192, 168, 1, 50)).unwrap();

        let transport = ScriptedTransport::new(|_, _| Err(TransportError::Timeout));
        let browser = FixedBrowser::new(vec![Ipv4Addr::new(192, 168, 1, 99)]);
        let found = discovery(&transport)
            .with_last_ip_store(store)
            .with_browser(browser.clone())
            .discover(Duration::from_secs(3))
            .await;

        assert_eq!(found, vec![Ipv4Addr::new(192, 168, 1, 99)]);
        assert_eq!(browser.calls.load(Ordering::SeqCst), 1);
        // Only the last-known probe hit the network; no sweep.
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn sweep_collects_every_responder_sorted() {
        let transport = ScriptedTransport::new(|ip, _| {
            if matches!(ip.octets()[3], 42 | 9 | 200) {
                Ok(DeviceResponse::ok())
            } else {
                Err(TransportError::Connect("connection refused".into()))
            }
        });
        let found = discovery(&transport)
            .with_browser(FixedBrowser::new(Vec::new()))
            .discover(Duration::from_secs(3))
            .await;

        assert_eq!(
            found,
            vec![
                Ipv4Addr::new(10, 0, 0, 9),
                Ipv4Addr::new(10, 0, 0, 42),
                Ipv4Addr::new(10, 0, 0, 200),
            ]
        );
        assert_eq!(transport.call_count(), 254);
    }

    #[tokio::test]
    async fn sweep_ignores_hosts_without_success_code() {
        let transport = ScriptedTransport::new(|ip, _| {
            if ip.octets()[3] == 5 {
                Ok(DeviceResponse::with_code(1))
            } else {
                Err(TransportError::Timeout)
            }
        });
        let found = discovery(&transport).discover(Duration::from_secs(3)).await;
        assert!(found.is_empty());
    }
}
