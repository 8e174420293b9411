//! Dedup cache of recently seen entry fingerprints.
//!
//! The cache remembers fingerprints of entries that are pending, committed or
//! simply seen, so resubmissions are rejected before reaching the application.
//! It is bounded: once full, pushing a new fingerprint evicts the oldest
//! surviving one (FIFO). A re-push of a present fingerprint does not refresh
//! its position.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::trace;
use txflow_types::Fingerprint;

/// Concurrent set of fingerprints used for duplicate detection
pub trait EntryCache: Send + Sync {
    /// Whether the fingerprint is present
    fn has(&self, fingerprint: &Fingerprint) -> bool;

    /// Insert the fingerprint. Returns false if it was already present.
    fn push(&self, fingerprint: Fingerprint) -> bool;

    /// Remove the fingerprint if present
    fn remove(&self, fingerprint: &Fingerprint);

    /// Forget everything
    fn reset(&self);

    /// Number of fingerprints currently held
    fn len(&self) -> usize;

    /// Whether the cache holds nothing
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build the cache for a configured capacity; 0 disables dedup
pub fn new_cache(capacity: usize) -> Box<dyn EntryCache> {
    if capacity == 0 {
        Box::new(NopEntryCache)
    } else {
        Box::new(MapEntryCache::new(capacity))
    }
}

struct Inner {
    /// Live fingerprints and the sequence number of their insertion
    present: HashMap<Fingerprint, u64>,
    /// Insertion order; entries whose sequence no longer matches are stale
    order: VecDeque<(Fingerprint, u64)>,
    next_seq: u64,
}

impl Inner {
    fn is_live(&self, fingerprint: &Fingerprint, seq: u64) -> bool {
        self.present.get(fingerprint) == Some(&seq)
    }

    fn evict_oldest(&mut self) {
        while let Some((fingerprint, seq)) = self.order.pop_front() {
            if self.is_live(&fingerprint, seq) {
                self.present.remove(&fingerprint);
                trace!(fingerprint = %fingerprint.short(), "evicted from dedup cache");
                return;
            }
        }
    }

    fn compact(&mut self) {
        let present = &self.present;
        self.order
            .retain(|(fingerprint, seq)| present.get(fingerprint) == Some(seq));
    }
}

/// Hash map + insertion queue cache with FIFO eviction.
///
/// Removal is O(1): the queue slot is left behind and skipped at eviction
/// time. The queue is compacted once stale slots outnumber live ones.
pub struct MapEntryCache {
    capacity: Option<usize>,
    inner: Mutex<Inner>,
}

impl MapEntryCache {
    /// Create a cache holding at most `capacity` fingerprints
    pub fn new(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    /// Create a cache that never evicts
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        let initial = capacity.unwrap_or(0).min(1 << 16);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                present: HashMap::with_capacity(initial),
                order: VecDeque::with_capacity(initial),
                next_seq: 0,
            }),
        }
    }

    /// Configured capacity, `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl EntryCache for MapEntryCache {
    fn has(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.lock().present.contains_key(fingerprint)
    }

    fn push(&self, fingerprint: Fingerprint) -> bool {
        let mut inner = self.inner.lock();
        if inner.present.contains_key(&fingerprint) {
            return false;
        }

        if let Some(capacity) = self.capacity {
            if inner.present.len() >= capacity {
                inner.evict_oldest();
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.present.insert(fingerprint, seq);
        inner.order.push_back((fingerprint, seq));

        if inner.order.len() > 2 * inner.present.len().max(16) {
            inner.compact();
        }
        true
    }

    fn remove(&self, fingerprint: &Fingerprint) {
        self.inner.lock().present.remove(fingerprint);
    }

    fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.present.clear();
        inner.order.clear();
    }

    fn len(&self) -> usize {
        self.inner.lock().present.len()
    }
}

/// Cache that remembers nothing, used when dedup is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NopEntryCache;

impl EntryCache for NopEntryCache {
    fn has(&self, _fingerprint: &Fingerprint) -> bool {
        false
    }

    fn push(&self, _fingerprint: Fingerprint) -> bool {
        true
    }

    fn remove(&self, _fingerprint: &Fingerprint) {}

    fn reset(&self) {}

    fn len(&self) -> usize {
        0
    }
}
