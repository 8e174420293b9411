//! Key/value backends for the state store
//!
//! [`StateDb`] is the only seam the store depends on. Two backends are
//! provided: [`MemDb`] for tests and [`RocksDb`] for nodes.

use parking_lot::RwLock;
use rocksdb::{Options, WriteOptions, DB};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

use crate::{Result, StateError};

/// Key/value storage used by [`crate::StateStore`]
pub trait StateDb: Send + Sync {
    /// Read a value
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write a value. May be lost on crash.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Write a value and make it durable before returning
    fn set_durable(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Check if a key exists
    fn has(&self, key: &[u8]) -> Result<bool> {
        self.get(key).map(|v| v.is_some())
    }
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemDb {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemDb {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl StateDb for MemDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn set_durable(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.set(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// RocksDB backend.
///
/// Plain writes go through the RocksDB WAL without an fsync. Durable writes
/// set `sync` so the record is on disk before the call returns.
pub struct RocksDb {
    inner: DB,
    path: PathBuf,
    /// Lock for coordinating writes
    write_lock: RwLock<()>,
}

impl RocksDb {
    /// Open or create a database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!("Opening state database at: {}", path.display());

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(STATE_DB_MAX_OPEN_FILES);

        let inner = DB::open(&opts, &path).map_err(db_error)?;
        Ok(Self {
            inner,
            path,
            write_lock: RwLock::new(()),
        })
    }

    /// Database directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn put(&self, key: &[u8], value: &[u8], sync: bool) -> Result<()> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(sync);

        let _guard = self.write_lock.write();
        self.inner
            .put_opt(key, value, &write_opts)
            .map_err(db_error)?;
        trace!(key = %String::from_utf8_lossy(key), bytes = value.len(), sync, "stored value");
        Ok(())
    }
}

const STATE_DB_MAX_OPEN_FILES: i32 = 256;

fn db_error(e: rocksdb::Error) -> StateError {
    StateError::Database(e.to_string())
}

impl StateDb for RocksDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).map_err(db_error)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put(key, value, false)
    }

    fn set_durable(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put(key, value, true)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let _guard = self.write_lock.write();
        self.inner.delete(key).map_err(db_error)?;
        debug!(key = %String::from_utf8_lossy(key), "deleted value");
        Ok(())
    }
}

impl std::fmt::Debug for RocksDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDb")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for RocksDb {
    fn drop(&mut self) {
        debug!("Closing state database at: {}", self.path.display());
    }
}
