//! SocketCAN listener
//!
//! Binds a raw CAN socket to a named interface (`can2` by default) and accepts
//! only standard-id data frames with id 0x64 whose data field holds the full
//! 8-byte payload. Everything else on the bus is ignored.
//!
//! SocketCAN is Linux-only; on other targets [`CanListener::bind`] always
//! fails with a fatal bind error.

use super::{payload_from, ReadOutcome};
use crate::types::PAYLOAD_LEN;

/// CAN identifier of the speed/RPM frame
pub const SIGNAL_FRAME_ID: u32 = 0x64;

/// Filter one received frame
///
/// # Arguments
/// * `id` - raw CAN identifier
/// * `is_extended` - true for 29-bit identifiers
/// * `is_data_frame` - false for remote and error frames
/// * `data` - frame data field
pub fn accept_frame(id: u32, is_extended: bool, is_data_frame: bool, data: &[u8]) -> ReadOutcome {
    if !is_data_frame || is_extended || id != SIGNAL_FRAME_ID {
        log::trace!("Ignoring CAN frame 0x{:X}", id);
        return ReadOutcome::Skipped;
    }

    match payload_from(data) {
        Some(payload) => ReadOutcome::Payload(payload),
        None => {
            log::warn!(
                "Short read, CAN frame 0x{:X} has {} data bytes, expected {}",
                id,
                data.len(),
                PAYLOAD_LEN
            );
            ReadOutcome::Skipped
        }
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use super::accept_frame;
    use crate::transports::{is_timeout, Endpoint, Listener, ReadOutcome, SHUTDOWN_POLL_INTERVAL};
    use crate::types::{ReceiverError, Result, Transport};
    use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Id, Socket};

    /// Listener on a SocketCAN interface
    pub struct CanListener {
        socket: CanSocket,
        interface: String,
    }

    impl CanListener {
        /// Open a raw CAN socket bound to `interface`
        ///
        /// # Errors
        /// * `ReceiverError::Bind` if the socket cannot be created or the
        ///   interface does not exist. Fatal.
        pub fn bind(interface: &str) -> Result<Self> {
            let bind_error = |source: std::io::Error| ReceiverError::Bind {
                transport: Transport::Can,
                endpoint: interface.to_string(),
                source,
            };

            let socket = CanSocket::open(interface).map_err(bind_error)?;
            socket
                .set_read_timeout(SHUTDOWN_POLL_INTERVAL)
                .map_err(bind_error)?;

            log::info!("CanReceiver initialized successfully for {}", interface);
            Ok(Self {
                socket,
                interface: interface.to_string(),
            })
        }
    }

    impl Listener for CanListener {
        fn transport(&self) -> Transport {
            Transport::Can
        }

        fn endpoint(&self) -> Endpoint {
            Endpoint::CanInterface(self.interface.clone())
        }

        fn next_payload(&mut self) -> ReadOutcome {
            let frame = match self.socket.read_frame() {
                Ok(frame) => frame,
                Err(e) if is_timeout(&e) => return ReadOutcome::Idle,
                Err(e) => {
                    log::warn!("Error reading CAN frame: {}", e);
                    return ReadOutcome::Skipped;
                }
            };

            let (id, is_extended) = match frame.id() {
                Id::Standard(id) => (u32::from(id.as_raw()), false),
                Id::Extended(id) => (id.as_raw(), true),
            };
            let is_data_frame = matches!(frame, CanFrame::Data(_));
            accept_frame(id, is_extended, is_data_frame, frame.data())
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use crate::transports::{Endpoint, Listener, ReadOutcome};
    use crate::types::{ReceiverError, Result, Transport};

    /// Placeholder on targets without SocketCAN
    pub struct CanListener {
        interface: String,
    }

    impl CanListener {
        pub fn bind(interface: &str) -> Result<Self> {
            Err(ReceiverError::Bind {
                transport: Transport::Can,
                endpoint: interface.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "SocketCAN is only available on Linux",
                ),
            })
        }
    }

    impl Listener for CanListener {
        fn transport(&self) -> Transport {
            Transport::Can
        }

        fn endpoint(&self) -> Endpoint {
            Endpoint::CanInterface(self.interface.clone())
        }

        fn next_payload(&mut self) -> ReadOutcome {
            ReadOutcome::Closed
        }
    }
}

pub use imp::CanListener;
