//! Per-transport append-only JSON logs
//!
//! Each transport persists its readings to `<transport>_protocol_receiver.json`,
//! a flat JSON array of `{"Speed": .., "RPM": ..}` objects. Every append reads
//! the whole array, pushes one entry and rewrites the file, so the cost grows
//! with the number of entries in the current session. Receivers run at a few
//! samples per second, which keeps this cheap enough.

use crate::types::{LogEntry, ReceiverError, Result, Transport};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const EMPTY_ARRAY: &[u8] = b"[]";

/// One transport's JSON log file
///
/// All access to the file goes through a mutex scoped to this log, so
/// concurrent appends never lose entries.
#[derive(Debug)]
pub struct SignalLog {
    transport: Transport,
    path: PathBuf,
    lock: Mutex<()>,
}

impl SignalLog {
    /// Create a log handle for `transport` inside `dir`. The file is not touched.
    pub fn new(dir: &Path, transport: Transport) -> Self {
        Self {
            transport,
            path: dir.join(transport.log_file_name()),
            lock: Mutex::new(()),
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directory, as sent to snapshot peers
    pub fn file_name(&self) -> String {
        self.transport.log_file_name()
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Make sure the file holds a JSON array, rewriting it as `[]` otherwise
    ///
    /// Called when the owning listener is constructed. A missing, empty or
    /// unparseable file is replaced; a valid array is left untouched.
    pub fn initialize(&self) -> Result<()> {
        let _guard = self.guard();

        let needs_init = match fs::read(&self.path) {
            Ok(content) if content.is_empty() => true,
            Ok(content) => match serde_json::from_slice::<Value>(&content) {
                Ok(Value::Array(_)) => false,
                Ok(_) => {
                    log::warn!("Existing {:?} is not a JSON array", self.path);
                    true
                }
                Err(e) => {
                    log::warn!("Existing {:?} is invalid: {}", self.path, e);
                    log::warn!("File content: {}", String::from_utf8_lossy(&content));
                    true
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => return Err(self.file_error(e)),
        };

        if needs_init {
            self.write_raw(EMPTY_ARRAY)?;
            log::debug!("Initialized {:?} as empty array", self.path);
        }
        Ok(())
    }

    /// Append one entry, rewriting the whole array with 2-space indentation
    pub fn append(&self, entry: &LogEntry) -> Result<()> {
        let _guard = self.guard();

        let mut entries = self.read_array();
        entries.push(serde_json::to_value(entry)?);

        let content = serde_json::to_vec_pretty(&Value::Array(entries))?;
        self.write_raw(&content)?;
        log::trace!("Saved JSON file: {:?}", self.path);
        Ok(())
    }

    /// Truncate the log in place to `[]`, starting a new session
    pub fn reset(&self) -> Result<()> {
        let _guard = self.guard();
        self.write_raw(EMPTY_ARRAY)?;
        log::info!("Cleared JSON file: {:?}", self.path);
        Ok(())
    }

    /// Raw file bytes, read under the append lock so a snapshot never
    /// observes a half-written array
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let _guard = self.guard();
        fs::read(&self.path).map_err(|e| self.file_error(e))
    }

    /// Parse the current file into log entries
    pub fn entries(&self) -> Result<Vec<LogEntry>> {
        let content = self.snapshot()?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Read the current array; anything that is not an array counts as empty.
    /// Caller must hold the lock.
    fn read_array(&self) -> Vec<Value> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    log::warn!("Failed to open {:?} for reading: {}", self.path, e);
                }
                return Vec::new();
            }
        };
        if content.is_empty() {
            return Vec::new();
        }

        match serde_json::from_slice::<Value>(&content) {
            Ok(Value::Array(entries)) => entries,
            Ok(_) => {
                log::warn!("{:?} is not an array. Resetting to empty array.", self.path);
                Vec::new()
            }
            Err(e) => {
                log::warn!("Failed to parse {:?}: {}", self.path, e);
                Vec::new()
            }
        }
    }

    fn write_raw(&self, content: &[u8]) -> Result<()> {
        fs::write(&self.path, content).map_err(|e| self.file_error(e))
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // Guarded data is (), so a poisoned lock is still usable
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn file_error(&self, source: std::io::Error) -> ReceiverError {
        ReceiverError::LogFile {
            path: self.path.clone(),
            source,
        }
    }
}

/// The logs managed for one receiver process, one per enabled transport
#[derive(Debug, Default)]
pub struct LogSet {
    logs: Vec<Arc<SignalLog>>,
}

impl LogSet {
    /// Create log handles in `dir` for each transport, in export order
    pub fn new(dir: &Path, transports: &[Transport]) -> Self {
        let mut ordered: Vec<Transport> = Transport::ALL
            .iter()
            .copied()
            .filter(|t| transports.contains(t))
            .collect();
        ordered.dedup();

        Self {
            logs: ordered
                .into_iter()
                .map(|t| Arc::new(SignalLog::new(dir, t)))
                .collect(),
        }
    }

    pub fn get(&self, transport: Transport) -> Option<&Arc<SignalLog>> {
        self.logs.iter().find(|log| log.transport() == transport)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SignalLog>> {
        self.logs.iter()
    }

    /// Truncate every managed log to `[]`
    ///
    /// A failure on one file is logged and does not stop the others.
    pub fn reset_all(&self) {
        for log in &self.logs {
            if let Err(e) = log.reset() {
                log::warn!("Failed to clear {:?}: {}", log.path(), e);
            }
        }
    }
}
