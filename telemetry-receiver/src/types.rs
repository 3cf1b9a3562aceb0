//! Core types for the telemetry receiver
//!
//! This module defines the values that flow through the ingestion pipeline:
//! the normalized [`Sample`] produced by the frame decoder, the persisted
//! [`LogEntry`] form, the [`Transport`] a reading arrived on, and the error
//! taxonomy shared by every component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Timestamp type used throughout the receiver
pub type Timestamp = DateTime<Utc>;

/// Result type for receiver operations
pub type Result<T> = std::result::Result<T, ReceiverError>;

/// Length of the ASCII signal payload carried by every transport
pub const PAYLOAD_LEN: usize = 8;

/// Conversion factor from meters per second to kilometers per hour
pub const MS_TO_KMH: f64 = 3.6;

/// The ingress transport a reading arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// SocketCAN bus interface
    Can,
    /// LIN character device
    Lin,
    /// Raw UDP telemetry datagrams
    Udp,
    /// FlexRay slots tunneled over UDP
    FlexRay,
}

impl Transport {
    /// All transports, in the order their logs are exported
    pub const ALL: [Transport; 4] = [Transport::Can, Transport::Udp, Transport::FlexRay, Transport::Lin];

    /// Short lowercase name, also used as the log file prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Can => "can",
            Transport::Lin => "lin",
            Transport::Udp => "udp",
            Transport::FlexRay => "flexray",
        }
    }

    /// Name of the JSON log file for this transport
    pub fn log_file_name(&self) -> String {
        format!("{}_protocol_receiver.json", self.as_str())
    }

    /// Whether a session reset tears down and rebuilds this transport's listener
    pub fn is_recycled_on_reset(&self) -> bool {
        !matches!(self, Transport::Lin)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Can => write!(f, "CAN"),
            Transport::Lin => write!(f, "LIN"),
            Transport::Udp => write!(f, "UDP"),
            Transport::FlexRay => write!(f, "FlexRay"),
        }
    }
}

/// A normalized speed + RPM reading produced by the frame decoder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Speed as received, in meters per second
    pub speed_raw_ms: f64,
    /// Speed converted to kilometers per hour
    pub speed_kmh: f64,
    /// Engine revolutions per minute
    pub rpm: i32,
    /// When the frame carrying this reading was decoded
    pub received_at: Timestamp,
}

impl Sample {
    /// Build a sample from raw field values, deriving the km/h speed
    pub fn new(speed_raw_ms: f64, rpm: i32) -> Self {
        Self {
            speed_raw_ms,
            speed_kmh: speed_raw_ms * MS_TO_KMH,
            rpm,
            received_at: Utc::now(),
        }
    }
}

/// Persisted form of a sample: raw speed and RPM
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "Speed")]
    pub speed: f64,
    #[serde(rename = "RPM")]
    pub rpm: i32,
}

impl From<&Sample> for LogEntry {
    fn from(sample: &Sample) -> Self {
        Self {
            speed: sample.speed_raw_ms,
            rpm: sample.rpm,
        }
    }
}

/// A sample tagged with the transport it arrived on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalEvent {
    pub transport: Transport,
    pub sample: Sample,
}

/// Reasons a frame payload could not be decoded into a [`Sample`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("payload must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("speed field {0:?} is not a number")]
    InvalidSpeed(String),

    #[error("RPM field {0:?} is not an integer")]
    InvalidRpm(String),
}

/// Errors that can occur in the receiver
#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    /// An endpoint could not be created or bound. Fatal for the session.
    #[error("Failed to bind {transport} endpoint {endpoint}: {source}")]
    Bind {
        transport: Transport,
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The control channel could not listen on its address. Fatal.
    #[error("Failed to start control channel on {addr}: {source}")]
    ControlBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Log file error for {path:?}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ReceiverError {
    /// Whether this error invalidates the whole session
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReceiverError::Bind { .. } | ReceiverError::ControlBind { .. })
    }
}
