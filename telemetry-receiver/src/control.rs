//! Remote control channel
//!
//! A plaintext TCP protocol with one command per connection. The server
//! reads each connection once, trims the text and compares it against the
//! two known commands:
//!
//! - `SEND_JSON` - export every existing log to the peer
//! - `RECEIVED_JSON` - the peer has the logs; start a new session
//!
//! Anything else is logged and ignored. The connection is closed after
//! processing and nothing is ever written back.
//!
//! Each accepted connection is read on its own short-lived thread so an idle
//! client never holds up the accept loop. Commands are still dispatched one
//! at a time.

use crate::types::{ReceiverError, Result};
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Largest command read from one connection
const READ_BUFFER_LEN: usize = 1024;

/// A recognized control command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// `SEND_JSON`
    SendJson,
    /// `RECEIVED_JSON`
    ReceivedJson,
}

impl ControlCommand {
    /// Parse the bytes received on one connection
    pub fn parse(data: &[u8]) -> Option<Self> {
        match String::from_utf8_lossy(data).trim() {
            "SEND_JSON" => Some(ControlCommand::SendJson),
            "RECEIVED_JSON" => Some(ControlCommand::ReceivedJson),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlCommand::SendJson => "SEND_JSON",
            ControlCommand::ReceivedJson => "RECEIVED_JSON",
        }
    }
}

/// Receives dispatched commands on the control thread
pub trait CommandHandler: Send + Sync + 'static {
    fn handle(&self, command: ControlCommand);
}

impl<F> CommandHandler for F
where
    F: Fn(ControlCommand) + Send + Sync + 'static,
{
    fn handle(&self, command: ControlCommand) {
        self(command)
    }
}

/// Bound control server, not yet accepting
pub struct ControlChannel {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<dyn CommandHandler>,
    read_timeout: Option<Duration>,
}

impl ControlChannel {
    /// Listen on `addr`
    ///
    /// # Errors
    /// * `ReceiverError::ControlBind` if the address cannot be bound. Fatal.
    pub fn bind(addr: SocketAddr, handler: Arc<dyn CommandHandler>) -> Result<Self> {
        let bind_error = |source: std::io::Error| ReceiverError::ControlBind { addr, source };
        let listener = TcpListener::bind(addr).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        log::info!("TCP server started on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
            handler,
            read_timeout: None,
        })
    }

    /// Builder method: bound the wait for a client's command
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start accepting on a dedicated thread
    pub fn spawn(self) -> Result<ControlHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let local_addr = self.local_addr;

        let thread = thread::Builder::new()
            .name("control-channel".to_string())
            .spawn(move || self.serve(&worker_stop))
            .map_err(|source| ReceiverError::ControlBind {
                addr: local_addr,
                source,
            })?;

        Ok(ControlHandle {
            local_addr,
            stop,
            thread: Some(thread),
        })
    }

    fn serve(self, stop: &AtomicBool) {
        let dispatch = Arc::new(Mutex::new(()));
        for stream in self.listener.incoming() {
            if stop.load(Ordering::Acquire) {
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("Failed to accept control connection: {}", e);
                    continue;
                }
            };

            let handler = Arc::clone(&self.handler);
            let dispatch = Arc::clone(&dispatch);
            let read_timeout = self.read_timeout;
            let spawned = thread::Builder::new()
                .name("control-client".to_string())
                .spawn(move || serve_connection(stream, &*handler, read_timeout, &dispatch));
            if let Err(e) = spawned {
                log::warn!("Failed to start control client thread: {}", e);
            }
        }
        log::debug!("Control channel on {} stopped", self.local_addr);
    }
}

/// Read once, dispatch under `dispatch`, close
fn serve_connection(
    mut stream: TcpStream,
    handler: &dyn CommandHandler,
    read_timeout: Option<Duration>,
    dispatch: &Mutex<()>,
) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "unknown peer".to_string());

    if let Err(e) = stream.set_read_timeout(read_timeout) {
        log::warn!("Failed to set read timeout for {}: {}", peer, e);
    }

    let mut buffer = [0u8; READ_BUFFER_LEN];
    match stream.read(&mut buffer) {
        Ok(len) => match ControlCommand::parse(&buffer[..len]) {
            Some(command) => {
                log::info!("Received {} from {}", command.as_str(), peer);
                let _guard = dispatch.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                handler.handle(command);
            }
            None => log::warn!(
                "Received invalid signal from {} : {:?}",
                peer,
                String::from_utf8_lossy(&buffer[..len]).trim()
            ),
        },
        Err(e) => log::warn!("Failed to read control command from {}: {}", peer, e),
    }

    let _ = stream.shutdown(Shutdown::Both);
}

/// A running control channel
#[derive(Debug)]
pub struct ControlHandle {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ControlHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait for the accept thread
    ///
    /// The accept loop is woken with a loopback connection. Client threads
    /// still reading or dispatching are not waited for.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Err(e) = TcpStream::connect_timeout(&wake_addr(self.local_addr), Duration::from_secs(1)) {
            log::warn!("Failed to wake control channel on {}: {}", self.local_addr, e);
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Control channel thread panicked");
            }
        }
    }
}

/// Address to connect to for reaching a listener bound on `addr`
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::mpsc;
    use std::sync::Mutex;

    fn start_channel() -> (ControlHandle, mpsc::Receiver<ControlCommand>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let handler = move |command: ControlCommand| {
            tx.lock().unwrap().send(command).unwrap();
        };
        let channel = ControlChannel::bind("127.0.0.1:0".parse().unwrap(), Arc::new(handler)).unwrap();
        (channel.spawn().unwrap(), rx)
    }

    /// Send one command and wait for the server to close the connection
    fn send_command(addr: SocketAddr, text: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(text).unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).unwrap();
        reply
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ControlCommand::parse(b"SEND_JSON"), Some(ControlCommand::SendJson));
        assert_eq!(ControlCommand::parse(b"  RECEIVED_JSON\r\n"), Some(ControlCommand::ReceivedJson));
        assert_eq!(ControlCommand::parse(b"send_json"), None);
        assert_eq!(ControlCommand::parse(b"SEND_JSON RECEIVED_JSON"), None);
        assert_eq!(ControlCommand::parse(b""), None);
    }

    #[test]
    fn test_dispatches_and_closes_without_reply() {
        let (handle, rx) = start_channel();

        let reply = send_command(handle.local_addr(), b"SEND_JSON\n");
        assert!(reply.is_empty());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), ControlCommand::SendJson);

        let reply = send_command(handle.local_addr(), b"RECEIVED_JSON");
        assert!(reply.is_empty());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), ControlCommand::ReceivedJson);

        handle.stop();
    }

    #[test]
    fn test_invalid_command_is_ignored() {
        let (handle, rx) = start_channel();

        let reply = send_command(handle.local_addr(), b"HELLO");
        assert!(reply.is_empty());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        handle.stop();
    }

    #[test]
    fn test_idle_client_does_not_block_commands() {
        let (handle, rx) = start_channel();

        // Connects but never sends; no read timeout is configured
        let idle = TcpStream::connect(handle.local_addr()).unwrap();

        let reply = send_command(handle.local_addr(), b"SEND_JSON");
        assert!(reply.is_empty());
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), ControlCommand::SendJson);

        handle.stop();
        drop(idle);
    }

    #[test]
    fn test_stop_returns_with_idle_client_connected() {
        let (handle, _rx) = start_channel();
        let idle = TcpStream::connect(handle.local_addr()).unwrap();
        thread::sleep(Duration::from_millis(50));

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            handle.stop();
            done_tx.send(()).unwrap();
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
        drop(idle);
    }

    #[test]
    fn test_read_timeout_closes_idle_client() {
        let noop = |_: ControlCommand| {};
        let channel = ControlChannel::bind("127.0.0.1:0".parse().unwrap(), Arc::new(noop))
            .unwrap()
            .with_read_timeout(Some(Duration::from_millis(100)));
        let handle = channel.spawn().unwrap();

        let mut idle = TcpStream::connect(handle.local_addr()).unwrap();
        idle.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut reply = Vec::new();
        assert_eq!(idle.read_to_end(&mut reply).unwrap(), 0);

        handle.stop();
    }

    #[test]
    fn test_bind_conflict_is_fatal() {
        let (handle, _rx) = start_channel();
        let noop = |_: ControlCommand| {};
        let err = ControlChannel::bind(handle.local_addr(), Arc::new(noop)).err().unwrap();
        assert!(err.is_fatal());
        handle.stop();
    }

    #[test]
    fn test_wake_addr() {
        let any: SocketAddr = "0.0.0.0:5001".parse().unwrap();
        assert_eq!(wake_addr(any), "127.0.0.1:5001".parse().unwrap());
        let bound: SocketAddr = "192.168.0.48:5001".parse().unwrap();
        assert_eq!(wake_addr(bound), bound);
    }
}
