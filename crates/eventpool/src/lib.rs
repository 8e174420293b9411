//! # TxFlow Eventpool
//!
//! Pending-entry pool for the TxFlow consensus engine.
//!
//! The pool accepts opaque entries from peers and local clients and:
//! - Rejects empty, oversized and duplicate entries before touching the application
//! - Enforces a byte budget and an entry count bound
//! - Validates entries through a single ordered connection to the application
//! - Records admitted entries in an append-only write-ahead log
//! - Hands out a deterministic prefix of pending entries for block proposal
//! - Removes committed entries and revalidates the rest on every update
//!
//! ## Architecture
//!
//! ```text
//!   check_entry ──► precheck ──► ValidationGateway ──► callback ─┬─► DurableLog
//!                  (size, filter,    (FIFO queue,                 ├─► PendingStore
//!                   budget, cache)    ordering policy)            └─► events available
//!
//!   update ──► remove committed ──► recheck remaining ──► evict failures
//! ```
//!
//! All pool state sits behind one lock; the outbound validation call is made
//! without holding it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use txflow_config::EventpoolConfig;
//! use txflow_eventpool::{Eventpool, KvStoreApp};
//! use txflow_types::{Entry, EntryInfo};
//!
//! # async fn run() -> txflow_eventpool::Result<()> {
//! let pool = Eventpool::new(EventpoolConfig::default(), Arc::new(KvStoreApp::new()));
//!
//! pool.check_entry(Entry::from(&b"key=value"[..]), EntryInfo::local())
//!     .await?
//!     .await?;
//!
//! let batch = pool.reap(Some(1024), None);
//! assert_eq!(batch.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod app;
pub mod cache;
pub mod gateway;
pub mod metrics;
pub mod pool;
pub mod store;
pub mod wal;

// Re-export main types at crate root
pub use app::{Application, CounterApp, KvStoreApp};
pub use cache::{new_cache, EntryCache, MapEntryCache, NopEntryCache};
pub use gateway::{CallOrdering, GatewayError, ValidationGateway};
pub use metrics::{EventpoolMetrics, MetricsSnapshot};
pub use pool::{CheckHandle, EventsAvailable, Eventpool, PostCheckFn, PreCheckFn};
pub use store::{PendingStore, PoolEntry};
pub use wal::{read_records, rewrite_records, DurableLog, WalConfig, WalError, WalResult};

/// Result type alias for eventpool operations
pub type Result<T> = std::result::Result<T, EventpoolError>;

/// Errors that can occur in eventpool operations
#[derive(Debug, thiserror::Error)]
pub enum EventpoolError {
    /// Entry has an empty payload
    #[error("entry is empty")]
    EmptyEntry,

    /// Entry payload exceeds the maximum entry size
    #[error("entry too large: max {max} bytes, got {actual} bytes")]
    EntryTooLarge {
        /// Maximum entry size
        max: usize,
        /// Actual entry size
        actual: usize,
    },

    /// Admitting the entry would exceed the byte budget or the entry bound
    #[error(
        "eventpool is full: {current_entries}/{max_entries} entries, \
         {current_bytes}/{max_bytes} bytes, attempted {attempted} bytes"
    )]
    PoolFull {
        /// Configured byte budget
        max_bytes: u64,
        /// Bytes currently pending
        current_bytes: u64,
        /// Size of the rejected entry
        attempted: usize,
        /// Configured entry bound
        max_entries: usize,
        /// Entries currently pending
        current_entries: usize,
    },

    /// Fingerprint already present in the dedup cache
    #[error("entry already exists in cache")]
    AlreadyInCache,

    /// Entry failed the pre-check filter
    #[error("entry rejected by pre-check filter: {0}")]
    PreCheckFilter(String),

    /// The application declined the entry
    #[error("entry rejected by application: code {code}: {log}")]
    ValidationRejected {
        /// Application result code
        code: u32,
        /// Application log
        log: String,
    },

    /// A pending entry failed revalidation after a commit
    #[error("entry evicted by recheck: code {code}: {log}")]
    RecheckEvicted {
        /// Application result code
        code: u32,
        /// Application log
        log: String,
    },

    /// Appending to the write-ahead log failed; the entry was not admitted
    #[error("write-ahead log append failed: {0}")]
    LogWrite(#[source] std::io::Error),

    /// The validation gateway shut down before the entry resolved
    #[error("validation gateway closed")]
    GatewayClosed,

    /// The entry was committed by an update while it was being validated
    #[error("entry committed while awaiting validation")]
    CommittedWhileValidating,

    /// Write-ahead log lifecycle error
    #[error("write-ahead log error: {0}")]
    Wal(#[from] WalError),
}

impl EventpoolError {
    /// Size-class or empty-payload rejection
    pub fn is_precheck(&self) -> bool {
        matches!(self, Self::EmptyEntry | Self::EntryTooLarge { .. })
    }

    /// Any synchronous rejection that callers may treat as filtering rather
    /// than a protocol fault
    pub fn is_precheck_or_filter(&self) -> bool {
        self.is_precheck()
            || matches!(
                self,
                Self::PreCheckFilter(_) | Self::PoolFull { .. } | Self::AlreadyInCache
            )
    }
}
