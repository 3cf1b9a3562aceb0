//! FlexRay-over-UDP listener
//!
//! The FlexRay side is tunneled through UDP: each datagram carries a 4-byte
//! big-endian slot identifier followed by the 8-byte signal payload. The slot
//! id is not used for filtering.

use super::udp::{bind_socket, RECV_BUFFER_LEN};
use super::{is_timeout, payload_from, Endpoint, Listener, ReadOutcome};
use crate::types::{Result, Transport, PAYLOAD_LEN};
use byteorder::{BigEndian, ByteOrder};
use std::net::{SocketAddr, UdpSocket};

/// Slot identifier prefix length
pub const SLOT_ID_LEN: usize = 4;

/// Full tunneled datagram length
pub const DATAGRAM_LEN: usize = SLOT_ID_LEN + PAYLOAD_LEN;

pub struct FlexRayListener {
    socket: UdpSocket,
    local_addr: SocketAddr,
    buffer: Box<[u8; RECV_BUFFER_LEN]>,
}

impl FlexRayListener {
    /// Bind the tunnel socket
    ///
    /// # Errors
    /// * `ReceiverError::Bind` if the socket cannot be bound. Fatal.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let (socket, local_addr) = bind_socket(Transport::FlexRay, addr)?;
        log::info!("FlexRayReceiver initialized successfully for {}", local_addr);
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

/// Split a tunneled datagram into slot id and payload
pub fn split_datagram(datagram: &[u8]) -> Option<(u32, [u8; PAYLOAD_LEN])> {
    if datagram.len() != DATAGRAM_LEN {
        return None;
    }
    let slot_id = BigEndian::read_u32(&datagram[..SLOT_ID_LEN]);
    let payload = payload_from(&datagram[SLOT_ID_LEN..])?;
    Some((slot_id, payload))
}

/// Build a tunneled datagram, the way the FlexRay side frames it
pub fn frame_datagram(slot_id: u32, payload: &[u8; PAYLOAD_LEN]) -> [u8; DATAGRAM_LEN] {
    let mut datagram = [0u8; DATAGRAM_LEN];
    BigEndian::write_u32(&mut datagram[..SLOT_ID_LEN], slot_id);
    datagram[SLOT_ID_LEN..].copy_from_slice(payload);
    datagram
}

impl Listener for FlexRayListener {
    fn transport(&self) -> Transport {
        Transport::FlexRay
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint::FlexRay(self.local_addr)
    }

    fn next_payload(&mut self) -> ReadOutcome {
        let (len, peer) = match self.socket.recv_from(&mut self.buffer[..]) {
            Ok(received) => received,
            Err(e) if is_timeout(&e) => return ReadOutcome::Idle,
            Err(e) => {
                log::warn!("Error reading FlexRay packet: {}", e);
                return ReadOutcome::Skipped;
            }
        };

        match split_datagram(&self.buffer[..len]) {
            Some((slot_id, payload)) => {
                log::trace!("FlexRay slot {} from {}", slot_id, peer);
                ReadOutcome::Payload(payload)
            }
            None => {
                log::warn!(
                    "Received incomplete FlexRay packet from {}: {} bytes, expected {}",
                    peer,
                    len,
                    DATAGRAM_LEN
                );
                ReadOutcome::Skipped
            }
        }
    }
}
