//! In-memory device used by unit tests across this crate.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::protocol::{DeviceCommand, DeviceResponse};
use crate::transport::{DeviceSession, DeviceTransport, TransportError};

type Behavior =
    dyn Fn(Ipv4Addr, &DeviceCommand) -> Result<DeviceResponse, TransportError> + Send + Sync;

/// Transport whose every request is answered by a closure. Records every
/// request and counts sessions opened and closed.
#[derive(Clone)]
pub struct ScriptedTransport {
    behavior: Arc<Behavior>,
    calls: Arc<Mutex<Vec<(Ipv4Addr, DeviceCommand)>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new<F>(behavior: F) -> Self
    where
        F: Fn(Ipv4Addr, &DeviceCommand) -> Result<DeviceResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            behavior: Arc::new(behavior),
            calls: Arc::default(),
            opened: Arc::default(),
            closed: Arc::default(),
        }
    }

    /// A device that answers success to everything.
    pub fn always_ok() -> Self {
        Self::new(|_, _| Ok(DeviceResponse::ok()))
    }

    /// Only `ip` answers; every other address refuses the connection.
    pub fn only(ip: Ipv4Addr) -> Self {
        Self::new(move |target, _| {
            if target == ip {
                Ok(DeviceResponse::ok())
            } else {
                Err(TransportError::Connect("connection refused".into()))
            }
        })
    }

    pub fn calls(&self) -> Vec<(Ipv4Addr, DeviceCommand)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.calls().into_iter().map(|(_, c)| c).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl DeviceTransport for ScriptedTransport {
    fn open_session(&self) -> Result<Arc<dyn DeviceSession>, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl DeviceSession for ScriptedTransport {
    async fn post(
        &self,
        ip: Ipv4Addr,
        command: &DeviceCommand,
        _timeout: Duration,
    ) -> Result<DeviceResponse, TransportError> {
        self.calls.lock().unwrap().push((ip, command.clone()));
        (self.behavior)(ip, command)
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
