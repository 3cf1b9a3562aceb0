//! Transport listeners (CAN, LIN, UDP, FlexRay-over-UDP)
//!
//! Each listener owns one ingress endpoint and runs on its own thread. The
//! thread blocks on the endpoint, handles exactly one frame per wake-up,
//! filters it, decodes the payload and then appends to the transport's log
//! before publishing the sample.
//!
//! Listeners are created through fallible constructors. A bind/open failure
//! is a [`ReceiverError::Bind`], which callers treat as fatal for the session.

use crate::bus::SignalBus;
use crate::decoder::FrameDecoder;
use crate::signal_log::SignalLog;
use crate::types::{LogEntry, ReceiverError, Result, Transport, PAYLOAD_LEN};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub mod can;
pub mod flexray;
pub mod lin;
pub mod udp;

pub use can::CanListener;
pub use flexray::FlexRayListener;
pub use lin::LinListener;
pub use udp::UdpListener;

/// How often a blocked socket read wakes up to check for a stop request.
/// This is not a frame timeout: an idle endpoint simply keeps waiting.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(250);

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// The address or device a listener is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    CanInterface(String),
    LinDevice(PathBuf),
    Udp(SocketAddr),
    FlexRay(SocketAddr),
}

impl Endpoint {
    pub fn transport(&self) -> Transport {
        match self {
            Endpoint::CanInterface(_) => Transport::Can,
            Endpoint::LinDevice(_) => Transport::Lin,
            Endpoint::Udp(_) => Transport::Udp,
            Endpoint::FlexRay(_) => Transport::FlexRay,
        }
    }

    /// Socket address for UDP-based endpoints
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Endpoint::Udp(addr) | Endpoint::FlexRay(addr) => Some(*addr),
            _ => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::CanInterface(name) => write!(f, "{}", name),
            Endpoint::LinDevice(path) => write!(f, "{}", path.display()),
            Endpoint::Udp(addr) | Endpoint::FlexRay(addr) => write!(f, "{}", addr),
        }
    }
}

/// Result of waiting once on a listener's endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// An accepted frame; the payload still has to be decoded
    Payload([u8; PAYLOAD_LEN]),
    /// A frame arrived but was filtered out or malformed (already logged)
    Skipped,
    /// Woke up without a frame, e.g. at the shutdown poll interval
    Idle,
    /// The endpoint reached end of stream; the listener stops
    Closed,
}

/// Common contract of the four transport listeners
pub trait Listener: Send + 'static {
    fn transport(&self) -> Transport;

    /// The endpoint as actually bound, used to rebind after a reset
    fn endpoint(&self) -> Endpoint;

    /// Block until the endpoint is readable and process exactly one frame
    fn next_payload(&mut self) -> ReadOutcome;
}

/// Bind a fresh listener for `endpoint`
pub fn bind_endpoint(endpoint: &Endpoint) -> Result<Box<dyn Listener>> {
    Ok(match endpoint {
        Endpoint::CanInterface(name) => Box::new(CanListener::bind(name)?),
        Endpoint::LinDevice(path) => Box::new(LinListener::open(path)?),
        Endpoint::Udp(addr) => Box::new(UdpListener::bind(*addr)?),
        Endpoint::FlexRay(addr) => Box::new(FlexRayListener::bind(*addr)?),
    })
}

impl<L: Listener + ?Sized> Listener for Box<L> {
    fn transport(&self) -> Transport {
        (**self).transport()
    }

    fn endpoint(&self) -> Endpoint {
        (**self).endpoint()
    }

    fn next_payload(&mut self) -> ReadOutcome {
        (**self).next_payload()
    }
}

/// A running listener thread
#[derive(Debug)]
pub struct ListenerHandle {
    id: u64,
    transport: Transport,
    endpoint: Endpoint,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Unique per constructed listener; a rebuilt listener gets a new id
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Request a stop and wait for the thread to release its endpoint
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("{} listener thread panicked", self.transport);
            }
        }
        log::info!("{} listener on {} torn down", self.transport, self.endpoint);
    }

    /// Request a stop without waiting; used for endpoints whose reads
    /// cannot be interrupted
    pub fn detach(mut self) {
        self.stop.store(true, Ordering::Release);
        self.thread.take();
    }
}

/// Initialize the transport's log and start the listener on its own thread
pub fn spawn<L: Listener>(listener: L, log: Arc<SignalLog>, bus: Arc<SignalBus>) -> Result<ListenerHandle> {
    let transport = listener.transport();
    let endpoint = listener.endpoint();

    if let Err(e) = log.initialize() {
        log::warn!("Failed to initialize {:?}: {}", log.path(), e);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = Arc::clone(&stop);
    let thread = thread::Builder::new()
        .name(format!("{}-listener", transport.as_str()))
        .spawn(move || run(listener, &log, &bus, &worker_stop))
        .map_err(|source| ReceiverError::Bind {
            transport,
            endpoint: endpoint.to_string(),
            source,
        })?;

    log::info!("{} listener started on {}", transport, endpoint);

    Ok(ListenerHandle {
        id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
        transport,
        endpoint,
        stop,
        thread: Some(thread),
    })
}

/// Worker loop: one frame per iteration until stopped or closed
fn run<L: Listener>(mut listener: L, log: &SignalLog, bus: &SignalBus, stop: &AtomicBool) {
    let transport = listener.transport();
    while !stop.load(Ordering::Acquire) {
        match listener.next_payload() {
            ReadOutcome::Payload(payload) => handle_payload(transport, &payload, log, bus),
            ReadOutcome::Skipped | ReadOutcome::Idle => {}
            ReadOutcome::Closed => {
                log::info!("{} endpoint {} closed", transport, listener.endpoint());
                break;
            }
        }
    }
    log::debug!("{} listener thread exiting", transport);
}

/// Decode one payload, then persist before notifying
pub(crate) fn handle_payload(transport: Transport, payload: &[u8], log: &SignalLog, bus: &SignalBus) {
    let sample = match FrameDecoder::decode(payload) {
        Ok(sample) => sample,
        Err(e) => {
            log::warn!(
                "Failed to convert ASCII {} data {:?}: {}",
                transport,
                String::from_utf8_lossy(payload),
                e
            );
            return;
        }
    };

    log::debug!(
        "{} Speed raw: {:.2}, converted: {:.2} km/h; RPM: {}",
        transport,
        sample.speed_raw_ms,
        sample.speed_kmh,
        sample.rpm
    );

    if let Err(e) = log.append(&LogEntry::from(&sample)) {
        log::warn!("Failed to log {} sample: {}", transport, e);
    }
    bus.publish(transport, sample);
}

/// Whether a read error only means the poll interval elapsed
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Copy an exactly-sized payload out of a frame buffer
pub(crate) fn payload_from(bytes: &[u8]) -> Option<[u8; PAYLOAD_LEN]> {
    bytes.try_into().ok()
}
