//! The single shared link to the device.
//!
//! [`DeviceConnection`] is constructed once at startup and handed to every
//! consumer behind an `Arc`. Its mutable state sits behind a
//! [`tokio::sync::RwLock`] that is only held to copy or swap fields; every
//! network round-trip happens with the lock released so a slow upload never
//! blocks status reads.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use pixoo_core::device::{COMMAND_MAX_RETRIES, COMMAND_TIMEOUT, CONNECT_TIMEOUT};
use pixoo_core::validation::parse_device_ip;
use pixoo_core::{CoreError, CoreResult};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::last_ip::LastIpStore;
use crate::protocol::{DeviceCommand, DeviceResponse};
use crate::transport::{DeviceSession, DeviceTransport, TransportError};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Lifecycle of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot returned by [`DeviceConnection::get_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub ip: Option<Ipv4Addr>,
}

/// Timing and retry policy.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout of the handshake performed by `connect`.
    pub connect_timeout: Duration,
    /// Per-attempt timeout of `send_command`.
    pub command_timeout: Duration,
    /// Attempts made by `send_command` before giving up.
    pub max_retries: u32,
    /// Backoff before retry `n` (zero-based) is `backoff_base * 2^n`.
    pub backoff_base: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            command_timeout: COMMAND_TIMEOUT,
            max_retries: COMMAND_MAX_RETRIES,
            backoff_base: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

struct ConnectionState {
    phase: ConnectionPhase,
    ip: Option<Ipv4Addr>,
    session: Option<Arc<dyn DeviceSession>>,
}

impl ConnectionState {
    fn disconnected() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            ip: None,
            session: None,
        }
    }
}

pub struct DeviceConnection {
    transport: Arc<dyn DeviceTransport>,
    last_ip: Option<LastIpStore>,
    config: ConnectionConfig,
    state: RwLock<ConnectionState>,
}

impl DeviceConnection {
    pub fn new(transport: Arc<dyn DeviceTransport>, config: ConnectionConfig) -> Self {
        Self {
            transport,
            last_ip: None,
            config,
            state: RwLock::new(ConnectionState::disconnected()),
        }
    }

    /// Persist every successfully connected address to `store`.
    pub fn with_last_ip_store(mut self, store: LastIpStore) -> Self {
        self.last_ip = Some(store);
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Handshake with the device at `raw_ip` and make it the active link.
    ///
    /// On failure the previous connection (if any) is left untouched.
    pub async fn connect(&self, raw_ip: &str) -> CoreResult<()> {
        let ip = parse_device_ip(raw_ip)?;

        let previous_phase = {
            let mut state = self.state.write().await;
            let previous = state.phase;
            if previous == ConnectionPhase::Disconnected {
                state.phase = ConnectionPhase::Connecting;
            }
            previous
        };

        match self.handshake(ip).await {
            Ok(session) => {
                let old = {
                    let mut state = self.state.write().await;
                    let old = state.session.replace(session);
                    state.ip = Some(ip);
                    state.phase = ConnectionPhase::Connected;
                    old
                };
                if let Some(old) = old {
                    old.close();
                }

                if let Some(store) = &self.last_ip {
                    if let Err(e) = store.save(ip) {
                        tracing::warn!(ip = %ip, error = %e, "Failed to persist last device IP");
                    }
                }

                tracing::info!(ip = %ip, "Connected to device");
                Ok(())
            }
            Err(e) => {
                let mut state = self.state.write().await;
                if state.phase == ConnectionPhase::Connecting {
                    state.phase = previous_phase;
                }
                tracing::warn!(ip = %ip, error = %e, "Device handshake failed");
                Err(e)
            }
        }
    }

    async fn handshake(&self, ip: Ipv4Addr) -> CoreResult<Arc<dyn DeviceSession>> {
        let session = self
            .transport
            .open_session()
            .map_err(|e| CoreError::Connection(format!("could not open session: {e}")))?;

        let result = session
            .post(ip, &DeviceCommand::GetIndex, self.config.connect_timeout)
            .await;

        let failure = match result {
            Ok(response) if response.is_verified() => return Ok(session),
            Ok(response) => format!(
                "device at {ip} rejected the handshake (error_code {:?})",
                response.error_code
            ),
            Err(TransportError::Timeout) => format!("timed out connecting to {ip}"),
            Err(TransportError::Connect(detail)) => {
                format!("connection to {ip} refused: {detail}")
            }
            Err(e) => format!("handshake with {ip} failed: {e}"),
        };

        session.close();
        Err(CoreError::Connection(failure))
    }

    /// Release the session and return to `Disconnected`.
    pub async fn disconnect(&self) {
        let old = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, ConnectionState::disconnected())
        };
        if let Some(session) = old.session {
            session.close();
        }
        if let Some(ip) = old.ip {
            tracing::info!(ip = %ip, "Disconnected from device");
        }
    }

    /// Send `command` with the configured retry budget and timeout.
    pub async fn send_command(&self, command: &DeviceCommand) -> CoreResult<DeviceResponse> {
        self.send_command_with(command, self.config.max_retries, self.config.command_timeout)
            .await
    }

    /// Send `command`, attempting it up to `max_retries` times.
    ///
    /// Timeouts and connection failures are retried with exponential
    /// backoff. When the final attempt failed because the device could not
    /// be reached, the link is torn down before the error is returned;
    /// timeouts never change the connection state. A response carrying a
    /// non-zero `error_code`, or a non-200 status, fails at once.
    pub async fn send_command_with(
        &self,
        command: &DeviceCommand,
        max_retries: u32,
        timeout: Duration,
    ) -> CoreResult<DeviceResponse> {
        let (ip, session) = {
            let state = self.state.read().await;
            match (state.phase, state.ip, &state.session) {
                (ConnectionPhase::Connected, Some(ip), Some(session)) => (ip, Arc::clone(session)),
                _ => return Err(CoreError::Connection("not connected".into())),
            }
        };

        let attempts = max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match session.post(ip, command, timeout).await {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => {
                    return Err(CoreError::Protocol {
                        command: command.name().to_string(),
                        detail: format!("error_code {}", response.error_code.unwrap_or_default()),
                    });
                }
                Err(TransportError::Status(code)) => {
                    return Err(CoreError::Protocol {
                        command: command.name().to_string(),
                        detail: format!("HTTP {code}"),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        ip = %ip,
                        command = command.name(),
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %e,
                        "Device command failed",
                    );
                    last_error = Some(e);
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        let error = last_error.unwrap_or(TransportError::Timeout);
        if error.is_connection() {
            self.drop_session(&session).await;
        }

        Err(CoreError::Connection(format!(
            "{} failed after {attempts} attempts: {error}",
            command.name()
        )))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.config
            .backoff_base
            .saturating_mul(1u32 << attempt.min(16))
    }

    /// Tear the link down, but only if `session` is still the active one; a
    /// concurrent reconnect may already have replaced it.
    async fn drop_session(&self, session: &Arc<dyn DeviceSession>) {
        let dropped = {
            let mut state = self.state.write().await;
            let current = state
                .session
                .as_ref()
                .is_some_and(|s| same_session(s, session));
            if current {
                let ip = state.ip;
                *state = ConnectionState::disconnected();
                Some(ip)
            } else {
                None
            }
        };

        if let Some(ip) = dropped {
            session.close();
            tracing::warn!(ip = ?ip, "Device unreachable, connection dropped");
        }
    }

    pub async fn get_status(&self) -> ConnectionStatus {
        let state = self.state.read().await;
        ConnectionStatus {
            connected: state.phase == ConnectionPhase::Connected,
            ip: state.ip,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.phase == ConnectionPhase::Connected
    }

    pub async fn current_ip(&self) -> Option<Ipv4Addr> {
        self.state.read().await.ip
    }

    pub async fn phase(&self) -> ConnectionPhase {
        self.state.read().await.phase
    }
}

fn same_session(a: &Arc<dyn DeviceSession>, b: &Arc<dyn DeviceSession>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::test_support::ScriptedTransport;

    fn connection(transport: &ScriptedTransport) -> DeviceConnection {
        DeviceConnection::new(Arc::new(transport.clone()), ConnectionConfig::default())
    }

    /// Handshake succeeds; every other command fails with `error`.
    fn failing_after_handshake(error: fn() -> TransportError) -> ScriptedTransport {
        ScriptedTransport::new(move |_, cmd| match cmd {
            DeviceCommand::GetIndex => Ok(DeviceResponse::ok()),
            _ => Err(error()),
        })
    }

    #[tokio::test]
    async fn connect_then_disconnect() {
        let transport = ScriptedTransport::always_ok();
        let conn = connection(&transport);

        conn.connect("10.0.0.5").await.unwrap();
        assert!(conn.is_connected().await);
        assert_eq!(conn.current_ip().await, Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(
            conn.get_status().await,
            ConnectionStatus {
                connected: true,
                ip: Some(Ipv4Addr::new(10, 0, 0, 5)),
            }
        );

        conn.disconnect().await;
        assert!(!conn.is_connected().await);
        assert_eq!(conn.current_ip().await, None);
        assert_eq!(transport.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn status_serializes_as_plain_object() {
        let conn = connection(&ScriptedTransport::always_ok());
        conn.connect("10.0.0.5").await.unwrap();
        let value = serde_json::to_value(conn.get_status().await).unwrap();
        assert_eq!(value, serde_json::json!({"connected": true, "ip": "10.0.0.5"}));
    }

    #[tokio::test]
    async fn connect_rejects_malformed_ip() {
        let transport = ScriptedTransport::always_ok();
        let conn = connection(&transport);
        assert_matches!(conn.connect("10.0.0").await, Err(CoreError::Validation(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn failed_connect_leaves_state_untouched() {
        let transport = ScriptedTransport::only(Ipv4Addr::new(10, 0, 0, 5));
        let conn = connection(&transport);
        conn.connect("10.0.0.5").await.unwrap();

        let err = conn.connect("10.0.0.6").await.unwrap_err();
        assert_matches!(&err, CoreError::Connection(msg) if msg.contains("refused"));
        assert!(conn.is_connected().await);
        assert_eq!(conn.current_ip().await, Some(Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[tokio::test]
    async fn connect_timeout_is_reported() {
        let transport = ScriptedTransport::new(|_, _| Err(TransportError::Timeout));
        let conn = connection(&transport);
        let err = conn.connect("10.0.0.5").await.unwrap_err();
        assert_matches!(&err, CoreError::Connection(msg) if msg.contains("timed out"));
        assert_eq!(conn.phase().await, ConnectionPhase::Disconnected);
        assert_eq!(transport.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn handshake_requires_explicit_success_code() {
        let transport = ScriptedTransport::new(|_, _| Ok(DeviceResponse::with_code(1)));
        let conn = connection(&transport);
        assert_matches!(conn.connect("10.0.0.5").await, Err(CoreError::Connection(_)));
        assert!(!conn.is_connected().await);
    }

    #[tokio::test]
    async fn reconnect_closes_previous_session() {
        let transport = ScriptedTransport::always_ok();
        let conn = connection(&transport);
        conn.connect("10.0.0.5").await.unwrap();
        conn.connect("10.0.0.6").await.unwrap();
        assert_eq!(transport.sessions_opened(), 2);
        assert_eq!(transport.sessions_closed(), 1);
        assert_eq!(conn.current_ip().await, Some(Ipv4Addr::new(10, 0, 0, 6)));
    }

    #[tokio::test]
    async fn connect_persists_last_ip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LastIpStore::in_dir(dir.path());
        let conn = connection(&ScriptedTransport::always_ok()).with_last_ip_store(store.clone());

        conn.connect("192.168.1.50").await.unwrap();
        assert_eq!(store.load(), Some(Ipv4Addr::new(192, 168, 1, 50)));
    }

    #[tokio::test]
    async fn send_command_requires_connection() {
        let transport = ScriptedTransport::always_ok();
        let conn = connection(&transport);
        let err = conn.send_command(&DeviceCommand::ClearText).await.unwrap_err();
        assert_matches!(err, CoreError::Connection(_));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_retried_without_state_change() {
        let transport = failing_after_handshake(|| TransportError::Timeout);
        let conn = connection(&transport);
        conn.connect("10.0.0.5").await.unwrap();
        transport.clear_calls();

        let started = tokio::time::Instant::now();
        let err = conn.send_command(&DeviceCommand::ClearText).await.unwrap_err();

        assert_matches!(err, CoreError::Connection(_));
        assert_eq!(transport.call_count(), 3);
        assert!(conn.is_connected().await);
        // Backoff of 1 s then 2 s between the three attempts.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_connection_failures_disconnect() {
        let transport =
            failing_after_handshake(|| TransportError::Connect("connection refused".into()));
        let conn = connection(&transport);
        conn.connect("10.0.0.5").await.unwrap();
        transport.clear_calls();

        let err = conn.send_command(&DeviceCommand::ClearText).await.unwrap_err();

        assert!(err.is_connection());
        assert_eq!(transport.call_count(), 3);
        assert!(!conn.is_connected().await);
        assert_eq!(conn.current_ip().await, None);
        assert_eq!(transport.sessions_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_refusal_then_success_keeps_connection() {
        let failures = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        let transport = ScriptedTransport::new(move |_, cmd| match cmd {
            DeviceCommand::GetIndex => Ok(DeviceResponse::ok()),
            _ if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 2 => {
                Err(TransportError::Connect("connection refused".into()))
            }
            _ => Ok(DeviceResponse::ok()),
        });
        let conn = connection(&transport);
        conn.connect("10.0.0.5").await.unwrap();

        conn.send_command(&DeviceCommand::ClearText).await.unwrap();
        assert!(conn.is_connected().await);
    }

    #[tokio::test]
    async fn error_code_is_a_protocol_error_without_retry() {
        let transport = ScriptedTransport::new(|_, cmd| match cmd {
            DeviceCommand::GetIndex => Ok(DeviceResponse::ok()),
            _ => Ok(DeviceResponse::with_code(7)),
        });
        let conn = connection(&transport);
        conn.connect("10.0.0.5").await.unwrap();
        transport.clear_calls();

        let err = conn.send_command(&DeviceCommand::ResetGif).await.unwrap_err();
        assert_matches!(
            err,
            CoreError::Protocol { command, .. } if command == "Draw/ResetHttpGifId"
        );
        assert_eq!(transport.call_count(), 1);
        assert!(conn.is_connected().await);
    }

    #[tokio::test]
    async fn http_status_is_a_protocol_error_without_retry() {
        let transport = failing_after_handshake(|| TransportError::Status(500));
        let conn = connection(&transport);
        conn.connect("10.0.0.5").await.unwrap();
        transport.clear_calls();

        let err = conn.send_command(&DeviceCommand::ClearText).await.unwrap_err();
        assert_matches!(err, CoreError::Protocol { detail, .. } if detail == "HTTP 500");
        assert_eq!(transport.call_count(), 1);
        assert!(conn.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_failure_does_not_drop_newer_session() {
        let transport =
            failing_after_handshake(|| TransportError::Connect("connection refused".into()));
        let conn = Arc::new(connection(&transport));
        conn.connect("10.0.0.5").await.unwrap();

        let sender = Arc::clone(&conn);
        let pending = tokio::spawn(async move {
            sender.send_command(&DeviceCommand::ClearText).await
        });

        // Let the first attempt fail, then reconnect while the sender backs off.
        tokio::time::sleep(Duration::from_millis(500)).await;
        conn.connect("10.0.0.6").await.unwrap();

        assert!(pending.await.unwrap().is_err());
        assert!(conn.is_connected().await);
        assert_eq!(conn.current_ip().await, Some(Ipv4Addr::new(10, 0, 0, 6)));
    }
}
