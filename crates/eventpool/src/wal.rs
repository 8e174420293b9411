//! Write-ahead log of admitted entries.
//!
//! The log is an append-only file used only for crash recovery; nothing reads
//! it during normal operation. Each record is the raw payload followed by a
//! single newline:
//!
//! ```text
//! ┌─────────────────────────┬────┬─────────────────────────┬────┐
//! │ payload                 │ \n │ payload                 │ \n │ ...
//! └─────────────────────────┴────┴─────────────────────────┴────┘
//! ```
//!
//! There is no length prefix and no per-record checksum. A payload that itself
//! contains a newline byte is split in two by [`read_records`].
//!
//! Replay is the job of the process bootstrap: it reads the records back with
//! [`read_records`] and resubmits them through the normal admission path.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use bytes::Bytes;

/// Record delimiter
pub const RECORD_DELIMITER: u8 = b'\n';

/// Errors that can occur during WAL operations
#[derive(Debug, Error)]
pub enum WalError {
    /// I/O error during WAL operations
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log has not been opened or was already closed
    #[error("WAL is not initialized")]
    NotInitialized,
}

/// Result type for WAL operations
pub type WalResult<T> = Result<T, WalError>;

impl From<WalError> for io::Error {
    fn from(err: WalError) -> Self {
        match err {
            WalError::Io(e) => e,
            WalError::NotInitialized => io::Error::new(io::ErrorKind::NotConnected, err.to_string()),
        }
    }
}

/// Configuration for the eventpool WAL
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Path to the WAL directory
    pub dir: PathBuf,
    /// Name of the log file inside `dir`
    pub file_name: String,
    /// Whether to fsync after each write
    pub sync_on_write: bool,
}

impl WalConfig {
    /// Configuration for a log named `eventpool.wal` inside `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_name: "eventpool.wal".to_string(),
            sync_on_write: false,
        }
    }

    /// Full path of the log file
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

struct LogFile {
    file: File,
    /// Length of the file after the last complete record
    offset: u64,
}

/// Append-only durable log.
///
/// Writes are serialized by an internal mutex, so a record either lands whole
/// before the next one starts or not at all.
pub struct DurableLog {
    config: WalConfig,
    path: PathBuf,
    file: Mutex<Option<LogFile>>,
    records_written: Mutex<u64>,
}

impl DurableLog {
    /// Open the log for appending, creating its directory and file if absent
    pub fn open(config: WalConfig) -> WalResult<Self> {
        std::fs::create_dir_all(&config.dir)?;

        let path = config.path();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let offset = file.metadata()?.len();

        info!(path = ?path, existing_bytes = offset, "Opened eventpool WAL");

        Ok(Self {
            config,
            path,
            file: Mutex::new(Some(LogFile { file, offset })),
            records_written: Mutex::new(0),
        })
    }

    /// Append one record.
    ///
    /// On failure the file is truncated back to the end of the previous
    /// record so no partial record survives.
    pub fn write(&self, payload: &[u8]) -> WalResult<()> {
        let mut guard = self.file.lock();
        let log = guard.as_mut().ok_or(WalError::NotInitialized)?;

        let mut record = Vec::with_capacity(payload.len() + 1);
        record.extend_from_slice(payload);
        record.push(RECORD_DELIMITER);

        if let Err(e) = log.file.write_all(&record) {
            warn!(path = ?self.path, error = %e, "WAL write failed, truncating partial record");
            if let Err(truncate_err) = log.file.set_len(log.offset) {
                warn!(error = %truncate_err, "failed to truncate WAL after write error");
            }
            return Err(WalError::Io(e));
        }

        if self.config.sync_on_write {
            if let Err(e) = log.file.sync_data() {
                warn!(path = ?self.path, error = %e, "WAL sync failed, truncating unsynced record");
                if let Err(truncate_err) = log.file.set_len(log.offset) {
                    warn!(error = %truncate_err, "failed to truncate WAL after sync error");
                }
                return Err(WalError::Io(e));
            }
        }

        log.offset += record.len() as u64;
        *self.records_written.lock() += 1;
        trace!(bytes = record.len(), "WAL record written");
        Ok(())
    }

    /// Flush and sync, then stop accepting writes. Idempotent.
    pub fn close(&self) -> WalResult<()> {
        let mut guard = self.file.lock();
        if let Some(mut log) = guard.take() {
            log.file.flush()?;
            log.file.sync_all()?;
            info!(path = ?self.path, bytes = log.offset, "Closed eventpool WAL");
        }
        Ok(())
    }

    /// Detach the log without flushing or syncing, as an abrupt stop would
    pub fn discard(self) {
        let was_open = self.file.lock().take().is_some();
        debug!(path = ?self.path, was_open, "Discarded eventpool WAL");
    }

    /// Whether the log still accepts writes
    pub fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle
    pub fn records_written(&self) -> u64 {
        *self.records_written.lock()
    }

    /// Current log size in bytes
    pub fn file_size(&self) -> u64 {
        self.file.lock().as_ref().map(|log| log.offset).unwrap_or(0)
    }

    /// Get the configuration
    pub fn config(&self) -> &WalConfig {
        &self.config
    }
}

/// Read every complete record of a log file.
///
/// A trailing segment without a delimiter is a torn write and is dropped.
/// Empty segments are skipped.
pub fn read_records(path: &Path) -> WalResult<Vec<Bytes>> {
    let data = Bytes::from(std::fs::read(path)?);
    let mut records = Vec::new();
    let mut start = 0;

    for (i, byte) in data.iter().enumerate() {
        if *byte == RECORD_DELIMITER {
            if i > start {
                records.push(data.slice(start..i));
            }
            start = i + 1;
        }
    }

    if start < data.len() {
        warn!(
            path = ?path,
            bytes = data.len() - start,
            "Ignoring torn record at end of WAL"
        );
    }

    debug!(path = ?path, records = records.len(), "Read WAL records");
    Ok(records)
}

/// Atomically replace a log file with the given records.
///
/// Writes a temporary file next to `path`, syncs it and renames it over the
/// original.
pub fn rewrite_records<'a, I>(path: &Path, records: I) -> WalResult<usize>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let mut out = BufWriter::new(File::create(&temp_path)?);
    let mut count = 0;
    for record in records {
        out.write_all(record)?;
        out.write_all(&[RECORD_DELIMITER])?;
        count += 1;
    }
    out.flush()?;
    out.get_ref().sync_all()?;
    drop(out);

    std::fs::rename(&temp_path, path)?;
    info!(path = ?path, records = count, "Rewrote eventpool WAL");
    Ok(count)
}
