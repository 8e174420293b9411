//! Ordered, byte-accounted store of validated pending entries.

use std::collections::{BTreeMap, HashMap, HashSet};

use txflow_types::{Entry, Fingerprint, PeerId};

/// A validated entry waiting for inclusion in a block
#[derive(Debug, Clone)]
pub struct PoolEntry {
    /// The entry
    pub entry: Entry,
    /// Cached fingerprint of the payload
    pub fingerprint: Fingerprint,
    /// Pool height at admission
    pub height: u64,
    /// Peers the entry was received from
    pub senders: HashSet<PeerId>,
}

impl PoolEntry {
    /// Wrap an entry admitted at `height`, received from `peer`
    pub fn new(entry: Entry, height: u64, peer: PeerId) -> Self {
        let fingerprint = entry.fingerprint();
        let mut senders = HashSet::new();
        if !peer.is_unknown() {
            senders.insert(peer);
        }
        Self {
            entry,
            fingerprint,
            height,
            senders,
        }
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.entry.size()
    }

    /// Record another peer that sent this entry. Returns true if new.
    pub fn add_sender(&mut self, peer: PeerId) -> bool {
        !peer.is_unknown() && self.senders.insert(peer)
    }
}

/// Insertion-ordered pending entries with an exact running byte total.
///
/// Not synchronized; the pool guards it with its own lock.
#[derive(Debug, Default)]
pub struct PendingStore {
    entries: BTreeMap<u64, PoolEntry>,
    index: HashMap<Fingerprint, u64>,
    next_seq: u64,
    total_bytes: u64,
}

impl PendingStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail. Returns false if the fingerprint is already stored.
    pub fn insert(&mut self, pool_entry: PoolEntry) -> bool {
        if self.index.contains_key(&pool_entry.fingerprint) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.total_bytes += pool_entry.size() as u64;
        self.index.insert(pool_entry.fingerprint, seq);
        self.entries.insert(seq, pool_entry);
        true
    }

    /// Remove one entry by fingerprint
    pub fn remove(&mut self, fingerprint: &Fingerprint) -> Option<PoolEntry> {
        let seq = self.index.remove(fingerprint)?;
        let removed = self.entries.remove(&seq)?;
        self.total_bytes -= removed.size() as u64;
        Some(removed)
    }

    /// Remove every entry whose fingerprint is in `fingerprints`, returning
    /// how many were removed
    pub fn remove_by_fingerprints<'a, I>(&mut self, fingerprints: I) -> usize
    where
        I: IntoIterator<Item = &'a Fingerprint>,
    {
        fingerprints
            .into_iter()
            .filter(|fp| self.remove(fp).is_some())
            .count()
    }

    /// Whether the fingerprint is stored
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.index.contains_key(fingerprint)
    }

    /// Stored entry for a fingerprint
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&PoolEntry> {
        self.index
            .get(fingerprint)
            .and_then(|seq| self.entries.get(seq))
    }

    /// Mutable access for metadata updates; the payload is immutable
    pub fn get_mut(&mut self, fingerprint: &Fingerprint) -> Option<&mut PoolEntry> {
        let seq = self.index.get(fingerprint)?;
        self.entries.get_mut(seq)
    }

    /// Entries in insertion order
    pub fn entries(&self) -> impl Iterator<Item = &PoolEntry> {
        self.entries.values()
    }

    /// Ordered prefix bounded by total bytes and count, whichever is hit
    /// first. `None` means unlimited. Stops at the first entry that would
    /// exceed a limit, so the result is always a prefix.
    pub fn snapshot(&self, max_bytes: Option<u64>, max_count: Option<usize>) -> Vec<Entry> {
        let mut out = Vec::new();
        let mut bytes = 0u64;
        for pool_entry in self.entries.values() {
            if max_count.is_some_and(|max| out.len() >= max) {
                break;
            }
            let next = bytes + pool_entry.size() as u64;
            if max_bytes.is_some_and(|max| next > max) {
                break;
            }
            bytes = next;
            out.push(pool_entry.entry.clone());
        }
        out
    }

    /// Drop every entry and reset the byte total
    pub fn flush(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.total_bytes = 0;
    }

    /// Exact sum of stored payload sizes
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
