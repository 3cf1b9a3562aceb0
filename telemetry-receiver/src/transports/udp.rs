//! Raw UDP telemetry listener
//!
//! One logical channel per socket: every datagram must be exactly the 8-byte
//! signal payload. There is no identifier to filter on.

use super::{is_timeout, payload_from, Endpoint, Listener, ReadOutcome, SHUTDOWN_POLL_INTERVAL};
use crate::types::{ReceiverError, Result, Transport, PAYLOAD_LEN};
use std::net::{SocketAddr, UdpSocket};

/// Large enough to detect oversized datagrams instead of truncating them
pub(crate) const RECV_BUFFER_LEN: usize = 1500;

pub struct UdpListener {
    socket: UdpSocket,
    local_addr: SocketAddr,
    buffer: Box<[u8; RECV_BUFFER_LEN]>,
}

impl UdpListener {
    /// Bind the telemetry socket
    ///
    /// # Errors
    /// * `ReceiverError::Bind` if the socket cannot be bound. Fatal.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let (socket, local_addr) = bind_socket(Transport::Udp, addr)?;
        log::info!("UdpReceiver initialized successfully for {}", local_addr);
        Ok(Self {
            socket,
            local_addr,
            buffer: Box::new([0u8; RECV_BUFFER_LEN]),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Listener for UdpListener {
    fn transport(&self) -> Transport {
        Transport::Udp
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint::Udp(self.local_addr)
    }

    fn next_payload(&mut self) -> ReadOutcome {
        let (len, peer) = match self.socket.recv_from(&mut self.buffer[..]) {
            Ok(received) => received,
            Err(e) if is_timeout(&e) => return ReadOutcome::Idle,
            Err(e) => {
                log::warn!("Error reading UDP packet: {}", e);
                return ReadOutcome::Skipped;
            }
        };

        match payload_from(&self.buffer[..len]) {
            Some(payload) => ReadOutcome::Payload(payload),
            None => {
                log::warn!(
                    "Received incomplete UDP packet from {}: {} bytes, expected {}",
                    peer,
                    len,
                    PAYLOAD_LEN
                );
                ReadOutcome::Skipped
            }
        }
    }
}

/// Bind a UDP socket with the shutdown poll interval as read timeout
pub(crate) fn bind_socket(transport: Transport, addr: SocketAddr) -> Result<(UdpSocket, SocketAddr)> {
    let bind_error = |source: std::io::Error| ReceiverError::Bind {
        transport,
        endpoint: addr.to_string(),
        source,
    };

    let socket = UdpSocket::bind(addr).map_err(bind_error)?;
    socket
        .set_read_timeout(Some(SHUTDOWN_POLL_INTERVAL))
        .map_err(bind_error)?;
    let local_addr = socket.local_addr().map_err(bind_error)?;
    Ok((socket, local_addr))
}
