//! Eventpool counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic admission and eviction counters, updated lock-free
#[derive(Debug, Default)]
pub struct EventpoolMetrics {
    admitted: AtomicU64,
    precheck_rejected: AtomicU64,
    duplicates: AtomicU64,
    pool_full: AtomicU64,
    validation_rejected: AtomicU64,
    recheck_evicted: AtomicU64,
    committed: AtomicU64,
    log_write_failures: AtomicU64,
}

impl EventpoolMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_precheck_rejected(&self) {
        self.precheck_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pool_full(&self) {
        self.pool_full.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_validation_rejected(&self) {
        self.validation_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recheck_evicted(&self, count: u64) {
        self.recheck_evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_committed(&self, count: u64) {
        self.committed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_log_write_failure(&self) {
        self.log_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Read every counter together with the current pool gauges
    pub fn snapshot(&self, size: usize, bytes: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            size,
            bytes,
            admitted: self.admitted.load(Ordering::Relaxed),
            precheck_rejected: self.precheck_rejected.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            pool_full: self.pool_full.load(Ordering::Relaxed),
            validation_rejected: self.validation_rejected.load(Ordering::Relaxed),
            recheck_evicted: self.recheck_evicted.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            log_write_failures: self.log_write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the eventpool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Pending entries
    pub size: usize,
    /// Pending bytes
    pub bytes: u64,
    /// Entries admitted into the pending store
    pub admitted: u64,
    /// Empty, oversized or filtered submissions
    pub precheck_rejected: u64,
    /// Submissions already in the dedup cache
    pub duplicates: u64,
    /// Submissions refused because the pool was full
    pub pool_full: u64,
    /// Submissions declined by the application
    pub validation_rejected: u64,
    /// Pending entries removed by a failed recheck
    pub recheck_evicted: u64,
    /// Pending entries removed by commit
    pub committed: u64,
    /// Admissions aborted by a log write failure
    pub log_write_failures: u64,
}
