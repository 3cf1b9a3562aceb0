//! Session reset
//!
//! A session ends when the peer acknowledges a snapshot with `RECEIVED_JSON`.
//! The coordinator then truncates every managed log and rebuilds the CAN,
//! UDP and FlexRay listeners on the endpoints they were bound to. The LIN
//! listener keeps running across resets.

use crate::bus::SignalBus;
use crate::signal_log::LogSet;
use crate::transports::{self, Endpoint, ListenerHandle};
use crate::types::{ReceiverError, Result, Transport};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identity of a running listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerInfo {
    pub id: u64,
    pub endpoint: Endpoint,
}

/// Owns the listener lifecycles for one receiver
#[derive(Debug)]
pub struct SessionResetCoordinator {
    logs: Arc<LogSet>,
    bus: Arc<SignalBus>,
    listeners: Mutex<BTreeMap<Transport, ListenerHandle>>,
}

impl SessionResetCoordinator {
    pub fn new(logs: Arc<LogSet>, bus: Arc<SignalBus>) -> Self {
        Self {
            logs,
            bus,
            listeners: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn logs(&self) -> &Arc<LogSet> {
        &self.logs
    }

    /// Bind and start one listener per endpoint
    ///
    /// If any endpoint fails, the listeners already started are stopped and
    /// the error is returned.
    ///
    /// # Errors
    /// * `ReceiverError::Bind` if an endpoint cannot be bound. Fatal.
    /// * `ReceiverError::Config` if no log is managed for an endpoint's transport.
    pub fn start(&self, endpoints: &[Endpoint]) -> Result<()> {
        let mut listeners = self.guard();
        for endpoint in endpoints {
            match self.launch(endpoint) {
                Ok(handle) => {
                    if let Some(previous) = listeners.insert(endpoint.transport(), handle) {
                        previous.stop();
                    }
                }
                Err(e) => {
                    for (_, handle) in std::mem::take(&mut *listeners) {
                        release(handle);
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Start a new session: clear the logs, then rebuild recycled listeners
    ///
    /// # Errors
    /// * `ReceiverError::Bind` if a listener cannot be rebound on its
    ///   endpoint. The remaining listeners are still rebuilt. Fatal.
    pub fn reset_session(&self) -> Result<()> {
        let mut listeners = self.guard();
        log::info!("Starting new session");

        self.logs.reset_all();

        let recycled: Vec<Transport> = listeners
            .keys()
            .copied()
            .filter(Transport::is_recycled_on_reset)
            .collect();

        let mut first_error = None;
        for transport in recycled {
            let Some(handle) = listeners.remove(&transport) else {
                continue;
            };
            let endpoint = handle.endpoint().clone();
            handle.stop();

            match self.launch(&endpoint) {
                Ok(handle) => {
                    listeners.insert(transport, handle);
                }
                Err(e) => {
                    log::error!("Failed to recreate {} listener on {}: {}", transport, endpoint, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                log::info!("Session reset, {} listeners running", listeners.len());
                Ok(())
            }
        }
    }

    /// The running listener for `transport`, if any
    pub fn listener(&self, transport: Transport) -> Option<ListenerInfo> {
        self.guard().get(&transport).map(|handle| ListenerInfo {
            id: handle.id(),
            endpoint: handle.endpoint().clone(),
        })
    }

    /// Transports with a running listener
    pub fn transports(&self) -> Vec<Transport> {
        self.guard().keys().copied().collect()
    }

    /// Stop every listener
    pub fn shutdown(&self) {
        let listeners = std::mem::take(&mut *self.guard());
        for (_, handle) in listeners {
            release(handle);
        }
    }

    fn launch(&self, endpoint: &Endpoint) -> Result<ListenerHandle> {
        let transport = endpoint.transport();
        let log = self.logs.get(transport).cloned().ok_or_else(|| {
            ReceiverError::Config(format!("no log configured for {} listener", transport))
        })?;
        let listener = transports::bind_endpoint(endpoint)?;
        transports::spawn(listener, log, Arc::clone(&self.bus))
    }

    fn guard(&self) -> MutexGuard<'_, BTreeMap<Transport, ListenerHandle>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// LIN reads block without a timeout, so its thread is left to exit on its own
fn release(handle: ListenerHandle) {
    if handle.transport().is_recycled_on_reset() {
        handle.stop();
    } else {
        handle.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transports::lin::{LinMessage, LinMessageKind};
    use crate::types::LogEntry;
    use std::io::Write;
    use std::net::{SocketAddr, UdpSocket};
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    /// Bind an ephemeral port and release it, so it can be used as a fixed endpoint
    fn free_udp_addr() -> SocketAddr {
        UdpSocket::bind(loopback()).unwrap().local_addr().unwrap()
    }

    fn coordinator(dir: &std::path::Path, transports: &[Transport]) -> SessionResetCoordinator {
        let logs = Arc::new(LogSet::new(dir, transports));
        SessionResetCoordinator::new(logs, Arc::new(SignalBus::new()))
    }

    #[test]
    fn test_reset_recycles_all_but_lin() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = tempfile::NamedTempFile::new().unwrap();
        device
            .write_all(&LinMessage::control(LinMessageKind::Wakeup).to_bytes())
            .unwrap();
        device.flush().unwrap();

        let coordinator = coordinator(dir.path(), &[Transport::Udp, Transport::FlexRay, Transport::Lin]);
        coordinator
            .start(&[
                Endpoint::Udp(free_udp_addr()),
                Endpoint::FlexRay(free_udp_addr()),
                Endpoint::LinDevice(device.path().to_path_buf()),
            ])
            .unwrap();

        let before: Vec<ListenerInfo> = [Transport::Udp, Transport::FlexRay, Transport::Lin]
            .iter()
            .map(|t| coordinator.listener(*t).unwrap())
            .collect();

        let udp_log = Arc::clone(coordinator.logs().get(Transport::Udp).unwrap());
        udp_log.append(&LogEntry { speed: 25.0, rpm: 5000 }).unwrap();

        coordinator.reset_session().unwrap();

        for log in coordinator.logs().iter() {
            assert_eq!(std::fs::read_to_string(log.path()).unwrap(), "[]");
        }

        let udp = coordinator.listener(Transport::Udp).unwrap();
        let flexray = coordinator.listener(Transport::FlexRay).unwrap();
        let lin = coordinator.listener(Transport::Lin).unwrap();

        assert_ne!(udp.id, before[0].id);
        assert_eq!(udp.endpoint, before[0].endpoint);
        assert_ne!(flexray.id, before[1].id);
        assert_eq!(flexray.endpoint, before[1].endpoint);
        assert_eq!(lin, before[2]);

        coordinator.shutdown();
        assert!(coordinator.transports().is_empty());
    }

    #[test]
    fn test_rebuilt_listener_receives_frames() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), &[Transport::Udp]);
        let bus_rx = coordinator.bus.subscribe_channel();
        coordinator.start(&[Endpoint::Udp(free_udp_addr())]).unwrap();
        coordinator.reset_session().unwrap();

        let addr = coordinator.listener(Transport::Udp).unwrap().endpoint.socket_addr().unwrap();
        let sender = UdpSocket::bind(loopback()).unwrap();
        sender.send_to(b"12.51500", addr).unwrap();

        let event = bus_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.transport, Transport::Udp);
        assert_eq!(event.sample.rpm, 1500);
        assert_eq!(coordinator.logs().get(Transport::Udp).unwrap().entries().unwrap().len(), 1);

        coordinator.shutdown();
    }

    #[test]
    fn test_start_failure_stops_started_listeners() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), &[Transport::Udp, Transport::Lin]);
        let err = coordinator
            .start(&[
                Endpoint::Udp(free_udp_addr()),
                Endpoint::LinDevice(dir.path().join("missing-plin")),
            ])
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(coordinator.transports().is_empty());
    }

    #[test]
    fn test_start_requires_managed_log() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), &[Transport::Udp]);
        let err = coordinator.start(&[Endpoint::FlexRay(free_udp_addr())]).unwrap_err();
        assert!(matches!(err, ReceiverError::Config(_)));
    }
}
