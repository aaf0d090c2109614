//! Background supervisor that keeps the device link alive.
//!
//! While the connection is up the supervisor only polls its status. Once it
//! drops (an exhausted `send_command`, or nothing connected at startup) the
//! supervisor runs discovery and tries every address found, backing off
//! exponentially between rounds until a connection succeeds or the
//! [`CancellationToken`] is triggered.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::connection::DeviceConnection;
use crate::discovery::DeviceDiscovery;

/// Tunable parameters for the supervisor.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first failed reconnection round.
    pub initial_delay: Duration,
    /// Upper bound on the delay between rounds.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failed round.
    pub multiplier: f64,
    /// How often the connection status is checked while connected.
    pub poll_interval: Duration,
    /// mDNS browse window used by each discovery round.
    pub discovery_window: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            poll_interval: Duration::from_secs(5),
            discovery_window: Duration::from_secs(3),
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Run until `cancel` fires, reconnecting whenever the link is down.
pub async fn maintain_connection(
    connection: Arc<DeviceConnection>,
    discovery: Arc<DeviceDiscovery>,
    config: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut delay = config.initial_delay;
    let mut round = 0u32;

    loop {
        if connection.is_connected().await {
            delay = config.initial_delay;
            round = 0;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(config.poll_interval) => continue,
            }
        }

        round += 1;
        tracing::info!(round, "Device disconnected, searching");

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            connected = reconnect_once(&connection, &discovery, config.discovery_window) => connected,
        };
        if connected {
            continue;
        }

        tracing::warn!(
            round,
            delay_ms = delay.as_millis() as u64,
            "Reconnect round failed",
        );

        // Wait before the next round, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, &config);
    }

    tracing::info!("Connection supervisor stopped");
}

async fn reconnect_once(
    connection: &DeviceConnection,
    discovery: &DeviceDiscovery,
    window: Duration,
) -> bool {
    for ip in discovery.discover(window).await {
        match connection.connect(&ip.to_string()).await {
            Ok(()) => {
                tracing::info!(ip = %ip, "Reconnected to device");
                return true;
            }
            Err(e) => tracing::debug!(ip = %ip, error = %e, "Candidate refused connection"),
        }
    }
    false
}
