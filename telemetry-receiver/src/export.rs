//! Snapshot export of log files to the remote peer
//!
//! Each log file goes over its own TCP connection as one framed payload:
//!
//! ```text
//! [u32 big-endian filename length][UTF-8 filename][raw file bytes]
//! ```
//!
//! The sender half-closes after the payload; the peer reads to end of stream.
//! A failed connect or write is retried a bounded number of times, then the
//! file is abandoned with a warning and the next file is sent. Failures are
//! reported in the returned [`ExportReport`] and never as an error.

use crate::config::ExportConfig;
use crate::signal_log::{LogSet, SignalLog};
use byteorder::{BigEndian, WriteBytesExt};
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;

/// Build the framed payload for one file
pub fn frame_snapshot(file_name: &str, contents: &[u8]) -> io::Result<Vec<u8>> {
    let name = file_name.as_bytes();
    let name_len = u32::try_from(name.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file name too long"))?;

    let mut frame = Vec::with_capacity(4 + name.len() + contents.len());
    frame.write_u32::<BigEndian>(name_len)?;
    frame.extend_from_slice(name);
    frame.extend_from_slice(contents);
    Ok(frame)
}

/// Outcome of exporting one log file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Sent in full on the given attempt
    Sent { bytes: usize, attempts: u32 },
    /// The log file does not exist on disk
    Missing,
    /// The log file is empty
    Empty,
    /// The log file could not be read
    Unreadable(String),
    /// Every attempt failed
    Failed { attempts: u32, last_error: String },
}

impl TransferOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, TransferOutcome::Sent { .. })
    }
}

/// Per-file results of one export
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    pub files: Vec<(String, TransferOutcome)>,
}

impl ExportReport {
    pub fn sent_count(&self) -> usize {
        self.files.iter().filter(|(_, outcome)| outcome.is_sent()).count()
    }

    pub fn outcome(&self, file_name: &str) -> Option<&TransferOutcome> {
        self.files
            .iter()
            .find(|(name, _)| name == file_name)
            .map(|(_, outcome)| outcome)
    }
}

/// Sends log snapshots to the configured peer
#[derive(Debug, Clone)]
pub struct SnapshotExporter {
    config: ExportConfig,
}

impl SnapshotExporter {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    /// Send every existing log in `logs`, one connection per file
    pub fn export_all(&self, logs: &LogSet) -> ExportReport {
        log::info!("Sending JSON files to {}", self.config.peer);
        thread::sleep(self.config.pre_send_delay());

        let mut report = ExportReport::default();
        for log in logs.iter() {
            let outcome = self.export_log(log);
            report.files.push((log.file_name(), outcome));
        }

        log::info!(
            "JSON files sent ({} of {} delivered)",
            report.sent_count(),
            report.files.len()
        );
        report
    }

    /// Send one log file, retrying on connect or write failure
    pub fn export_log(&self, log: &SignalLog) -> TransferOutcome {
        let file_name = log.file_name();
        if !log.exists() {
            log::warn!("JSON file does not exist: {:?}", log.path());
            return TransferOutcome::Missing;
        }

        let contents = match log.snapshot() {
            Ok(contents) => contents,
            Err(e) => {
                log::warn!("Failed to open {:?}: {}", log.path(), e);
                return TransferOutcome::Unreadable(e.to_string());
            }
        };
        if contents.is_empty() {
            log::warn!("JSON file is empty: {:?}", log.path());
            return TransferOutcome::Empty;
        }

        let frame = match frame_snapshot(&file_name, &contents) {
            Ok(frame) => frame,
            Err(e) => return TransferOutcome::Unreadable(e.to_string()),
        };

        self.send_with_retry(&file_name, &frame)
    }

    fn send_with_retry(&self, file_name: &str, frame: &[u8]) -> TransferOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.send_once(frame) {
                Ok(()) => {
                    log::info!(
                        "Successfully sent {} to {} ({} bytes)",
                        file_name,
                        self.config.peer,
                        frame.len()
                    );
                    return TransferOutcome::Sent {
                        bytes: frame.len(),
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    log::warn!(
                        "Attempt {}: Failed to send {} to {}: {}",
                        attempt,
                        file_name,
                        self.config.peer,
                        e
                    );
                    if attempt >= max_attempts {
                        log::warn!("Failed to send {} after {} attempts", file_name, max_attempts);
                        return TransferOutcome::Failed {
                            attempts: attempt,
                            last_error: e.to_string(),
                        };
                    }
                }
            }
            attempt += 1;
            thread::sleep(self.config.retry_delay());
        }
    }

    fn send_once(&self, frame: &[u8]) -> io::Result<()> {
        let addr = self.resolve_peer()?;
        let mut stream = TcpStream::connect_timeout(&addr, self.config.connect_timeout())?;
        stream.set_write_timeout(Some(self.config.write_timeout()))?;
        stream.write_all(frame)?;
        stream.flush()?;
        stream.shutdown(Shutdown::Write)?;
        Ok(())
    }

    fn resolve_peer(&self) -> io::Result<SocketAddr> {
        self.config
            .peer
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no address for {}", self.config.peer),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LogEntry, Transport};
    use byteorder::{BigEndian, ByteOrder};
    use std::io::Read;
    use std::net::TcpListener;
    use std::time::Duration;

    fn fast_config(peer: String) -> ExportConfig {
        ExportConfig {
            peer,
            connect_timeout_ms: 500,
            write_timeout_ms: 500,
            max_attempts: 3,
            retry_delay_ms: 10,
            pre_send_delay_ms: 0,
        }
    }

    /// Accept `count` connections and return what each one sent
    fn collect_transfers(listener: TcpListener, count: usize) -> thread::JoinHandle<Vec<Vec<u8>>> {
        thread::spawn(move || {
            (0..count)
                .map(|_| {
                    let (mut stream, _) = listener.accept().unwrap();
                    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
                    let mut received = Vec::new();
                    stream.read_to_end(&mut received).unwrap();
                    received
                })
                .collect()
        })
    }

    #[test]
    fn test_frame_snapshot_layout() {
        let frame = frame_snapshot("udp_protocol_receiver.json", b"[]").unwrap();
        assert_eq!(BigEndian::read_u32(&frame[..4]), 26);
        assert_eq!(&frame[4..30], b"udp_protocol_receiver.json");
        assert_eq!(&frame[30..], b"[]");
    }

    #[test]
    fn test_export_sends_one_connection_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let logs = LogSet::new(dir.path(), &[Transport::Can, Transport::Udp]);
        for log in logs.iter() {
            log.initialize().unwrap();
        }
        logs.get(Transport::Udp)
            .unwrap()
            .append(&LogEntry { speed: 25.0, rpm: 5000 })
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = listener.local_addr().unwrap().to_string();
        let receiver = collect_transfers(listener, 2);

        let exporter = SnapshotExporter::new(fast_config(peer));
        let report = exporter.export_all(&logs);
        let transfers = receiver.join().unwrap();

        assert_eq!(report.sent_count(), 2);
        for (log, transfer) in logs.iter().zip(&transfers) {
            let contents = std::fs::read(log.path()).unwrap();
            let name = log.file_name();
            assert_eq!(transfer.len(), 4 + name.len() + contents.len());
            assert_eq!(BigEndian::read_u32(&transfer[..4]) as usize, name.len());
            assert_eq!(&transfer[4..4 + name.len()], name.as_bytes());
            assert_eq!(&transfer[4 + name.len()..], &contents[..]);
        }
    }

    #[test]
    fn test_missing_log_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let logs = LogSet::new(dir.path(), &[Transport::Lin, Transport::Udp]);
        logs.get(Transport::Udp).unwrap().initialize().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = listener.local_addr().unwrap().to_string();
        let receiver = collect_transfers(listener, 1);

        let report = SnapshotExporter::new(fast_config(peer)).export_all(&logs);
        let transfers = receiver.join().unwrap();

        assert_eq!(transfers.len(), 1);
        assert_eq!(
            report.outcome("lin_protocol_receiver.json"),
            Some(&TransferOutcome::Missing)
        );
        assert!(report.outcome("udp_protocol_receiver.json").unwrap().is_sent());
    }

    #[test]
    fn test_unreachable_peer_gives_up_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let logs = LogSet::new(dir.path(), &[Transport::Can, Transport::FlexRay]);
        for log in logs.iter() {
            log.initialize().unwrap();
        }

        // Reserve a port, then close it so connects are refused
        let closed = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let report = SnapshotExporter::new(fast_config(closed.to_string())).export_all(&logs);

        assert_eq!(report.files.len(), 2);
        for (_, outcome) in &report.files {
            assert!(matches!(outcome, TransferOutcome::Failed { attempts: 3, .. }));
        }
    }

    #[test]
    fn test_retry_succeeds_once_peer_comes_up() {
        let dir = tempfile::tempdir().unwrap();
        let log = SignalLog::new(dir.path(), Transport::Udp);
        log.initialize().unwrap();
        log.append(&LogEntry { speed: 12.5, rpm: 1500 }).unwrap();
        let contents = std::fs::read(log.path()).unwrap();

        // Nothing listens on the first attempt
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let config = ExportConfig {
            retry_delay_ms: 300,
            ..fast_config(addr.to_string())
        };

        let sender = thread::spawn(move || SnapshotExporter::new(config).export_log(&log));
        thread::sleep(Duration::from_millis(100));
        let receiver = collect_transfers(TcpListener::bind(addr).unwrap(), 1);

        let outcome = sender.join().unwrap();
        let transfer = receiver.join().unwrap().remove(0);

        let name = "udp_protocol_receiver.json";
        match outcome {
            TransferOutcome::Sent { bytes, attempts } => {
                assert!(attempts >= 2);
                assert_eq!(bytes, 4 + name.len() + contents.len());
            }
            other => panic!("expected Sent, got {:?}", other),
        }
        assert_eq!(BigEndian::read_u32(&transfer[..4]) as usize, name.len());
        assert_eq!(&transfer[4..4 + name.len()], name.as_bytes());
        assert_eq!(&transfer[4 + name.len()..], &contents[..]);
    }

    #[test]
    fn test_empty_file_is_not_sent() {
        let dir = tempfile::tempdir().unwrap();
        let log = SignalLog::new(dir.path(), Transport::Udp);
        std::fs::write(log.path(), "").unwrap();

        let exporter = SnapshotExporter::new(fast_config("127.0.0.1:9".to_string()));
        assert_eq!(exporter.export_log(&log), TransferOutcome::Empty);
    }
}
