//! Telemetry Receiver Library
//!
//! Ingests vehicle speed and RPM arriving over four independent transports
//! (SocketCAN, a PEAK PLIN character device, raw UDP and FlexRay slots
//! tunneled over UDP), normalizes each frame into a [`Sample`], persists it to
//! a per-transport JSON log and pushes it to subscribers.
//!
//! # Architecture
//!
//! - One listener thread per endpoint, blocking on reads
//! - Every accepted frame is decoded, appended to its log, then published
//! - A TCP control channel answers two commands: `SEND_JSON` streams all logs
//!   to the peer, `RECEIVED_JSON` starts a new session
//! - A session reset truncates the logs and rebuilds the CAN, UDP and FlexRay
//!   listeners on the same endpoints
//!
//! The library does NOT render anything. A dashboard subscribes to the
//! [`SignalBus`] and draws the samples it receives.
//!
//! # Example Usage
//!
//! ```no_run
//! use telemetry_receiver::{ReceiverConfig, Runtime, SignalBus};
//! use std::sync::Arc;
//!
//! let config = ReceiverConfig::new()
//!     .with_addresses("192.168.0.48".parse().unwrap(), "192.168.0.6".parse().unwrap(), 5000)
//!     .with_log_dir("/var/lib/telemetry");
//!
//! let bus = Arc::new(SignalBus::new());
//! bus.subscribe(|event| {
//!     println!("{}: {:.1} km/h, {} rpm", event.transport, event.sample.speed_kmh, event.sample.rpm);
//! });
//!
//! let runtime = Runtime::start(config, bus).unwrap();
//! if let Some(fatal) = runtime.wait() {
//!     eprintln!("Receiver failed: {}", fatal);
//! }
//! ```

// Public modules
pub mod bus;
pub mod config;
pub mod control;
pub mod decoder;
pub mod export;
pub mod runtime;
pub mod session;
pub mod signal_log;
pub mod transports;
pub mod types;

// Re-export main types for convenience
pub use bus::SignalBus;
pub use config::ReceiverConfig;
pub use control::{CommandHandler, ControlChannel, ControlCommand};
pub use decoder::FrameDecoder;
pub use export::{ExportReport, SnapshotExporter, TransferOutcome};
pub use runtime::Runtime;
pub use session::{ListenerInfo, SessionResetCoordinator};
pub use signal_log::{LogSet, SignalLog};
pub use transports::{Endpoint, Listener, ListenerHandle};
pub use types::{
    FrameError, LogEntry, ReceiverError, Result, Sample, SignalEvent, Timestamp, Transport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
