//! LIN character-device listener
//!
//! Reads `plin_msg` records from a PEAK PLIN device (`/dev/plin0` by default).
//!
//! ## Record layout
//! Packed, little-endian, 31 bytes:
//! ```text
//! offset  size  field
//!      0     2  type     (FRAME=0, WAKEUP=2, OVERRUN=5, ...)
//!      2     1  flags
//!      3     1  id       LIN frame identifier
//!      4     1  len      data length
//!      5     1  dir
//!      6     1  cs_type  checksum type
//!      7     8  ts_us    timestamp in microseconds
//!     15     8  data
//!     23     8  reserved
//! ```
//!
//! Only FRAME records with id 0x04 carry the speed/RPM payload. OVERRUN is a
//! warning, WAKEUP is informational, anything else is unsupported.

use super::{Endpoint, Listener, ReadOutcome};
use crate::types::{ReceiverError, Result, Transport, PAYLOAD_LEN};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Size of one `plin_msg` record
pub const RECORD_LEN: usize = 31;

/// LIN frame identifier carrying speed and RPM
pub const SIGNAL_FRAME_ID: u8 = 0x04;

const TYPE_FRAME: u16 = 0;
const TYPE_WAKEUP: u16 = 2;
const TYPE_OVERRUN: u16 = 5;

const OFFSET_TYPE: usize = 0;
const OFFSET_FLAGS: usize = 2;
const OFFSET_ID: usize = 3;
const OFFSET_LEN: usize = 4;
const OFFSET_DIR: usize = 5;
const OFFSET_CS_TYPE: usize = 6;
const OFFSET_TS: usize = 7;
const OFFSET_DATA: usize = 15;

/// Kind of a `plin_msg` record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinMessageKind {
    Frame,
    Wakeup,
    Overrun,
    Other(u16),
}

impl LinMessageKind {
    fn from_code(code: u16) -> Self {
        match code {
            TYPE_FRAME => LinMessageKind::Frame,
            TYPE_WAKEUP => LinMessageKind::Wakeup,
            TYPE_OVERRUN => LinMessageKind::Overrun,
            other => LinMessageKind::Other(other),
        }
    }

    fn code(&self) -> u16 {
        match self {
            LinMessageKind::Frame => TYPE_FRAME,
            LinMessageKind::Wakeup => TYPE_WAKEUP,
            LinMessageKind::Overrun => TYPE_OVERRUN,
            LinMessageKind::Other(code) => *code,
        }
    }
}

/// One decoded `plin_msg` record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinMessage {
    pub kind: LinMessageKind,
    pub flags: u8,
    pub id: u8,
    pub len: u8,
    pub dir: u8,
    pub cs_type: u8,
    pub timestamp_us: u64,
    pub data: [u8; PAYLOAD_LEN],
}

impl LinMessage {
    /// A FRAME record carrying `data` under `id`
    pub fn frame(id: u8, data: [u8; PAYLOAD_LEN]) -> Self {
        Self {
            kind: LinMessageKind::Frame,
            flags: 0,
            id,
            len: PAYLOAD_LEN as u8,
            dir: 0,
            cs_type: 0,
            timestamp_us: 0,
            data,
        }
    }

    /// A record of the given kind with no payload
    pub fn control(kind: LinMessageKind) -> Self {
        Self {
            kind,
            len: 0,
            ..Self::frame(0, [0u8; PAYLOAD_LEN])
        }
    }

    /// Parse a record; `None` if it is not exactly [`RECORD_LEN`] bytes
    pub fn parse(record: &[u8]) -> Option<Self> {
        if record.len() != RECORD_LEN {
            return None;
        }
        let mut data = [0u8; PAYLOAD_LEN];
        data.copy_from_slice(&record[OFFSET_DATA..OFFSET_DATA + PAYLOAD_LEN]);

        Some(Self {
            kind: LinMessageKind::from_code(LittleEndian::read_u16(&record[OFFSET_TYPE..])),
            flags: record[OFFSET_FLAGS],
            id: record[OFFSET_ID],
            len: record[OFFSET_LEN],
            dir: record[OFFSET_DIR],
            cs_type: record[OFFSET_CS_TYPE],
            timestamp_us: LittleEndian::read_u64(&record[OFFSET_TS..]),
            data,
        })
    }

    /// Serialize to the device record layout
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut record = [0u8; RECORD_LEN];
        LittleEndian::write_u16(&mut record[OFFSET_TYPE..], self.kind.code());
        record[OFFSET_FLAGS] = self.flags;
        record[OFFSET_ID] = self.id;
        record[OFFSET_LEN] = self.len;
        record[OFFSET_DIR] = self.dir;
        record[OFFSET_CS_TYPE] = self.cs_type;
        LittleEndian::write_u64(&mut record[OFFSET_TS..], self.timestamp_us);
        record[OFFSET_DATA..OFFSET_DATA + PAYLOAD_LEN].copy_from_slice(&self.data);
        record
    }
}

/// Decide what to do with one record
pub fn classify(message: &LinMessage) -> ReadOutcome {
    match message.kind {
        LinMessageKind::Frame => {
            log::debug!("Received LIN frame with ID: {:#04x}", message.id);
            if message.id == SIGNAL_FRAME_ID {
                ReadOutcome::Payload(message.data)
            } else {
                ReadOutcome::Skipped
            }
        }
        LinMessageKind::Overrun => {
            log::warn!("LIN message overrun detected!");
            ReadOutcome::Skipped
        }
        LinMessageKind::Wakeup => {
            log::debug!("LIN wakeup message received!");
            ReadOutcome::Skipped
        }
        LinMessageKind::Other(code) => {
            log::warn!("Unsupported LIN message type: {}", code);
            ReadOutcome::Skipped
        }
    }
}

/// Listener reading `plin_msg` records from a character device
pub struct LinListener {
    device: File,
    path: PathBuf,
}

impl LinListener {
    /// Open the device read-only
    ///
    /// # Errors
    /// * `ReceiverError::Bind` if the device cannot be opened. Fatal.
    pub fn open(path: &Path) -> Result<Self> {
        let device = File::open(path).map_err(|source| ReceiverError::Bind {
            transport: Transport::Lin,
            endpoint: path.display().to_string(),
            source,
        })?;
        log::info!("LinReceiver opened {}", path.display());
        Ok(Self {
            device,
            path: path.to_path_buf(),
        })
    }
}

impl Listener for LinListener {
    fn transport(&self) -> Transport {
        Transport::Lin
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint::LinDevice(self.path.clone())
    }

    fn next_payload(&mut self) -> ReadOutcome {
        let mut record = [0u8; RECORD_LEN];
        let len = match self.device.read(&mut record) {
            Ok(0) => return ReadOutcome::Closed,
            Ok(len) => len,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return ReadOutcome::Idle,
            Err(e) => {
                log::warn!("Error reading LIN frame: {}", e);
                return ReadOutcome::Skipped;
            }
        };

        match LinMessage::parse(&record[..len]) {
            Some(message) => classify(&message),
            None => {
                log::warn!(
                    "Received incomplete LIN packet: {} bytes, expected {}",
                    len,
                    RECORD_LEN
                );
                ReadOutcome::Skipped
            }
        }
    }
}
