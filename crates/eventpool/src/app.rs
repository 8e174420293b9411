//! Application boundary and reference applications.
//!
//! The pool validates entries through [`Application::check_entry`]. The
//! commit path (`deliver_entry`, `commit`) is driven by the consensus side on
//! its own connection and never by the pool; it lives on the same trait so a
//! single application value can serve both connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::trace;
use txflow_types::{
    CheckEntryRequest, CheckEntryResponse, CommitResponse, DeliverEntryResponse, Entry,
};

/// Result code for a payload the application cannot decode
pub const CODE_ENCODING_ERROR: u32 = 1;

/// Result code for an out-of-order counter value
pub const CODE_BAD_NONCE: u32 = 2;

/// Application state machine as seen by the eventpool
#[async_trait]
pub trait Application: Send + Sync + 'static {
    /// Validate an entry for admission or recheck
    async fn check_entry(&self, request: CheckEntryRequest) -> CheckEntryResponse;

    /// Execute a committed entry
    async fn deliver_entry(&self, _entry: &Entry) -> DeliverEntryResponse {
        DeliverEntryResponse::ok()
    }

    /// Finalize the block
    async fn commit(&self) -> CommitResponse {
        CommitResponse::default()
    }
}

/// Key/value store that accepts every non-empty entry.
///
/// Delivered entries of the form `key=value` are stored under `key`; any
/// other payload is stored under itself.
#[derive(Debug, Default)]
pub struct KvStoreApp {
    store: RwLock<HashMap<Bytes, Bytes>>,
    checks: AtomicU64,
}

impl KvStoreApp {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored under `key`
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.store.read().get(key).cloned()
    }

    /// Number of `check_entry` calls served
    pub fn check_count(&self) -> u64 {
        self.checks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Application for KvStoreApp {
    async fn check_entry(&self, request: CheckEntryRequest) -> CheckEntryResponse {
        self.checks.fetch_add(1, Ordering::Relaxed);
        if request.entry.is_empty() {
            return CheckEntryResponse::err(CODE_ENCODING_ERROR, "empty entry");
        }
        CheckEntryResponse::ok()
    }

    async fn deliver_entry(&self, entry: &Entry) -> DeliverEntryResponse {
        let payload = entry.clone().into_bytes();
        let (key, value) = match payload.iter().position(|b| *b == b'=') {
            Some(split) => (payload.slice(..split), payload.slice(split + 1..)),
            None => (payload.clone(), payload),
        };
        self.store.write().insert(key, value);
        DeliverEntryResponse::ok()
    }

    async fn commit(&self) -> CommitResponse {
        let size = self.store.read().len() as u64;
        CommitResponse {
            data: Bytes::copy_from_slice(&size.to_be_bytes()),
        }
    }
}

/// Counter application over 8-byte big-endian values.
///
/// In serial mode a checked value must be at least the number of entries
/// delivered so far, and a delivered value must equal it exactly. Shorter
/// payloads are left-padded with zeros.
#[derive(Debug)]
pub struct CounterApp {
    serial: bool,
    entry_count: AtomicU64,
    commit_count: AtomicU64,
}

impl CounterApp {
    /// Create a counter; `serial` enables nonce ordering checks
    pub fn new(serial: bool) -> Self {
        Self {
            serial,
            entry_count: AtomicU64::new(0),
            commit_count: AtomicU64::new(0),
        }
    }

    /// Encode a counter value as an entry
    pub fn entry_for(value: u64) -> Entry {
        Entry::from(value.to_be_bytes().to_vec())
    }

    /// Entries delivered so far
    pub fn entry_count(&self) -> u64 {
        self.entry_count.load(Ordering::SeqCst)
    }

    /// Blocks committed so far
    pub fn commit_count(&self) -> u64 {
        self.commit_count.load(Ordering::SeqCst)
    }

    fn decode(payload: &[u8]) -> Option<u64> {
        if payload.len() > 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf[8 - payload.len()..].copy_from_slice(payload);
        Some(u64::from_be_bytes(buf))
    }
}

#[async_trait]
impl Application for CounterApp {
    async fn check_entry(&self, request: CheckEntryRequest) -> CheckEntryResponse {
        if !self.serial {
            return CheckEntryResponse::ok();
        }
        let Some(value) = Self::decode(request.entry.as_bytes()) else {
            return CheckEntryResponse::err(
                CODE_ENCODING_ERROR,
                format!("max entry size is 8 bytes, got {}", request.entry.size()),
            );
        };
        let expected = self.entry_count();
        if value < expected {
            trace!(value, expected, kind = ?request.kind, "counter check rejected");
            return CheckEntryResponse::err(
                CODE_BAD_NONCE,
                format!("invalid nonce: expected >= {}, got {}", expected, value),
            );
        }
        CheckEntryResponse::ok()
    }

    async fn deliver_entry(&self, entry: &Entry) -> DeliverEntryResponse {
        if self.serial {
            let Some(value) = Self::decode(entry.as_bytes()) else {
                return DeliverEntryResponse::err(
                    CODE_ENCODING_ERROR,
                    format!("max entry size is 8 bytes, got {}", entry.size()),
                );
            };
            let expected = self.entry_count();
            if value != expected {
                return DeliverEntryResponse::err(
                    CODE_BAD_NONCE,
                    format!("invalid nonce: expected {}, got {}", expected, value),
                );
            }
        }
        self.entry_count.fetch_add(1, Ordering::SeqCst);
        DeliverEntryResponse::ok()
    }

    async fn commit(&self) -> CommitResponse {
        self.commit_count.fetch_add(1, Ordering::SeqCst);
        let count = self.entry_count();
        if count == 0 {
            return CommitResponse::default();
        }
        CommitResponse {
            data: Bytes::copy_from_slice(&count.to_be_bytes()),
        }
    }
}
