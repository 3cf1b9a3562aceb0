//! Receiver configuration types
//!
//! Defaults reproduce the stock dashboard deployment: CAN on `can2`, LIN on
//! `/dev/plin0`, UDP telemetry on port 5000, the control channel on 5001,
//! FlexRay-over-UDP on 5002, and snapshots sent back to the peer on 5000.

use crate::types::{ReceiverError, Result, Transport};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Port the control channel listens on, next to the UDP telemetry port
pub const DEFAULT_CONTROL_PORT: u16 = 5001;

/// Port the FlexRay tunnel listens on
pub const DEFAULT_FLEXRAY_PORT: u16 = 5002;

/// Port used for UDP telemetry and for sending snapshots to the peer
pub const DEFAULT_DATA_PORT: u16 = 5000;

/// Configuration for the whole receiver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Directory holding the `<transport>_protocol_receiver.json` logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Truncate all logs once the listeners are up
    #[serde(default = "default_true")]
    pub clear_logs_on_start: bool,

    #[serde(default)]
    pub can: CanConfig,

    #[serde(default)]
    pub lin: LinConfig,

    #[serde(default)]
    pub udp: UdpConfig,

    #[serde(default)]
    pub flexray: FlexRayConfig,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub export: ExportConfig,
}

fn default_true() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".")
}

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_can_interface")]
    pub interface: String,
}

fn default_can_interface() -> String {
    "can2".to_string()
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interface: default_can_interface(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_lin_device")]
    pub device: PathBuf,
}

fn default_lin_device() -> PathBuf {
    PathBuf::from("/dev/plin0")
}

impl Default for LinConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: default_lin_device(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_udp_bind")]
    pub bind: SocketAddr,
}

fn default_udp_bind() -> SocketAddr {
    localhost(DEFAULT_DATA_PORT)
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_udp_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlexRayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_flexray_bind")]
    pub bind: SocketAddr,
}

fn default_flexray_bind() -> SocketAddr {
    localhost(DEFAULT_FLEXRAY_PORT)
}

impl Default for FlexRayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_flexray_bind(),
        }
    }
}

/// Control channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_bind")]
    pub bind: SocketAddr,

    /// Timeout for reading the command from a client. 0 or None waits
    /// until the client sends or disconnects.
    #[serde(default = "default_control_read_timeout")]
    pub read_timeout_ms: Option<u64>,
}

fn default_control_bind() -> SocketAddr {
    localhost(DEFAULT_CONTROL_PORT)
}

fn default_control_read_timeout() -> Option<u64> {
    Some(2000)
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind: default_control_bind(),
            read_timeout_ms: default_control_read_timeout(),
        }
    }
}

impl ControlConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

/// Snapshot export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Peer that receives log snapshots (`host:port`)
    #[serde(default = "default_peer")]
    pub peer: String,

    /// Connect timeout per attempt in milliseconds (default: 2000ms)
    #[serde(default = "default_io_timeout")]
    pub connect_timeout_ms: u64,

    /// Write timeout per attempt in milliseconds (default: 2000ms)
    #[serde(default = "default_io_timeout")]
    pub write_timeout_ms: u64,

    /// Attempts per file before giving up (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds (default: 500ms)
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Pause before the first transfer of an export (default: 100ms)
    #[serde(default = "default_pre_send_delay")]
    pub pre_send_delay_ms: u64,
}

fn default_peer() -> String {
    localhost(DEFAULT_DATA_PORT).to_string()
}

fn default_io_timeout() -> u64 {
    2000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    500
}

fn default_pre_send_delay() -> u64 {
    100
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            peer: default_peer(),
            connect_timeout_ms: default_io_timeout(),
            write_timeout_ms: default_io_timeout(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            pre_send_delay_ms: default_pre_send_delay(),
        }
    }
}

impl ExportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn pre_send_delay(&self) -> Duration {
        Duration::from_millis(self.pre_send_delay_ms)
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            clear_logs_on_start: true,
            can: CanConfig::default(),
            lin: LinConfig::default(),
            udp: UdpConfig::default(),
            flexray: FlexRayConfig::default(),
            control: ControlConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl ReceiverConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: bind UDP, control and FlexRay on one host address and
    /// send snapshots to `peer_ip`, the way the dashboard is launched
    /// (`<own_ip> <peer_ip> <port>`)
    pub fn with_addresses(mut self, own_ip: IpAddr, peer_ip: IpAddr, port: u16) -> Self {
        self.udp.bind = SocketAddr::new(own_ip, port);
        self.control.bind = SocketAddr::new(own_ip, DEFAULT_CONTROL_PORT);
        self.flexray.bind = SocketAddr::new(own_ip, DEFAULT_FLEXRAY_PORT);
        self.export.peer = SocketAddr::new(peer_ip, port).to_string();
        self
    }

    /// Builder method: set the log directory
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Builder method: set the CAN interface name
    pub fn with_can_interface(mut self, interface: impl Into<String>) -> Self {
        self.can.interface = interface.into();
        self
    }

    /// Builder method: set the LIN device path
    pub fn with_lin_device(mut self, device: impl Into<PathBuf>) -> Self {
        self.lin.device = device.into();
        self
    }

    /// Builder method: enable or disable one transport
    pub fn with_transport(mut self, transport: Transport, enabled: bool) -> Self {
        match transport {
            Transport::Can => self.can.enabled = enabled,
            Transport::Lin => self.lin.enabled = enabled,
            Transport::Udp => self.udp.enabled = enabled,
            Transport::FlexRay => self.flexray.enabled = enabled,
        }
        self
    }

    /// Transports that are enabled, in export order
    pub fn enabled_transports(&self) -> Vec<Transport> {
        Transport::ALL
            .iter()
            .copied()
            .filter(|t| self.is_enabled(*t))
            .collect()
    }

    pub fn is_enabled(&self, transport: Transport) -> bool {
        match transport {
            Transport::Can => self.can.enabled,
            Transport::Lin => self.lin.enabled,
            Transport::Udp => self.udp.enabled,
            Transport::FlexRay => self.flexray.enabled,
        }
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.export.max_attempts == 0 {
            return Err(ReceiverError::Config(
                "export.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.can.enabled && self.can.interface.trim().is_empty() {
            return Err(ReceiverError::Config("can.interface is empty".to_string()));
        }
        if self.export.peer.trim().is_empty() {
            return Err(ReceiverError::Config("export.peer is empty".to_string()));
        }
        Ok(())
    }
}
