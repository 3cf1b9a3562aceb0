//! Receiver runtime
//!
//! Builds every component from a [`ReceiverConfig`]: the logs, one listener
//! per enabled transport, the snapshot exporter and the control channel that
//! routes `SEND_JSON` and `RECEIVED_JSON` to them. Fatal errors raised after
//! startup (a listener that cannot be rebound during a reset) are handed to
//! whoever waits on the runtime.

use crate::bus::SignalBus;
use crate::config::ReceiverConfig;
use crate::control::{CommandHandler, ControlChannel, ControlCommand, ControlHandle};
use crate::export::SnapshotExporter;
use crate::session::SessionResetCoordinator;
use crate::signal_log::LogSet;
use crate::transports::Endpoint;
use crate::types::{ReceiverError, Result, Transport};
use std::fs;
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Endpoints of the enabled transports, in export order
pub fn configured_endpoints(config: &ReceiverConfig) -> Vec<Endpoint> {
    config
        .enabled_transports()
        .into_iter()
        .map(|transport| match transport {
            Transport::Can => Endpoint::CanInterface(config.can.interface.clone()),
            Transport::Lin => Endpoint::LinDevice(config.lin.device.clone()),
            Transport::Udp => Endpoint::Udp(config.udp.bind),
            Transport::FlexRay => Endpoint::FlexRay(config.flexray.bind),
        })
        .collect()
}

/// Dispatches control commands to the exporter and the reset coordinator
struct SessionCommands {
    logs: Arc<LogSet>,
    exporter: SnapshotExporter,
    coordinator: Arc<SessionResetCoordinator>,
    fatal: Mutex<Sender<ReceiverError>>,
}

impl CommandHandler for SessionCommands {
    fn handle(&self, command: ControlCommand) {
        match command {
            ControlCommand::SendJson => {
                self.exporter.export_all(&self.logs);
            }
            ControlCommand::ReceivedJson => {
                if let Err(e) = self.coordinator.reset_session() {
                    if e.is_fatal() {
                        let _ = self
                            .fatal
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .send(e);
                    } else {
                        log::warn!("Session reset incomplete: {}", e);
                    }
                }
            }
        }
    }
}

/// A running receiver
pub struct Runtime {
    logs: Arc<LogSet>,
    coordinator: Arc<SessionResetCoordinator>,
    control: Option<ControlHandle>,
    fatal: Receiver<ReceiverError>,
}

impl Runtime {
    /// Start all listeners and the control channel
    ///
    /// # Arguments
    /// * `config` - receiver configuration
    /// * `bus` - bus that decoded samples are published on
    ///
    /// # Errors
    /// * `ReceiverError::Config` if the configuration is invalid
    /// * `ReceiverError::LogFile` if the log directory cannot be created
    /// * `ReceiverError::Bind` / `ReceiverError::ControlBind` if an endpoint
    ///   cannot be bound. Everything already started is stopped again.
    pub fn start(config: ReceiverConfig, bus: Arc<SignalBus>) -> Result<Self> {
        config.validate()?;

        fs::create_dir_all(&config.log_dir).map_err(|source| ReceiverError::LogFile {
            path: config.log_dir.clone(),
            source,
        })?;

        let logs = Arc::new(LogSet::new(&config.log_dir, &config.enabled_transports()));
        let coordinator = Arc::new(SessionResetCoordinator::new(Arc::clone(&logs), bus));
        coordinator.start(&configured_endpoints(&config))?;

        let (fatal_tx, fatal_rx) = mpsc::channel();
        let handler = Arc::new(SessionCommands {
            logs: Arc::clone(&logs),
            exporter: SnapshotExporter::new(config.export.clone()),
            coordinator: Arc::clone(&coordinator),
            fatal: Mutex::new(fatal_tx),
        });

        let control = match ControlChannel::bind(config.control.bind, handler)
            .and_then(|channel| channel.with_read_timeout(config.control.read_timeout()).spawn())
        {
            Ok(control) => control,
            Err(e) => {
                coordinator.shutdown();
                return Err(e);
            }
        };

        if config.clear_logs_on_start {
            logs.reset_all();
        }

        log::info!(
            "Receiver running: {} listeners, control on {}, exporting to {}",
            coordinator.transports().len(),
            control.local_addr(),
            config.export.peer
        );

        Ok(Self {
            logs,
            coordinator,
            control: Some(control),
            fatal: fatal_rx,
        })
    }

    /// Address the control channel is listening on
    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control.as_ref().map(ControlHandle::local_addr)
    }

    pub fn logs(&self) -> &Arc<LogSet> {
        &self.logs
    }

    pub fn coordinator(&self) -> &Arc<SessionResetCoordinator> {
        &self.coordinator
    }

    /// Block until a fatal error is raised
    ///
    /// Returns `None` if the control channel went away without one.
    pub fn wait(&self) -> Option<ReceiverError> {
        self.fatal.recv().ok()
    }

    /// Like [`Runtime::wait`], giving up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ReceiverError> {
        match self.fatal.recv_timeout(timeout) {
            Ok(e) => Some(e),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Stop the control channel, then every listener
    pub fn shutdown(mut self) {
        if let Some(control) = self.control.take() {
            control.stop();
        }
        self.coordinator.shutdown();
        log::info!("Receiver stopped");
    }
}
