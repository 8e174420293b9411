//! Eventpool orchestrator.
//!
//! [`Eventpool`] composes the dedup cache, the pending store, the write-ahead
//! log and the validation gateway behind one lock:
//!
//! - `check_entry` prechecks synchronously under the lock (empty, size,
//!   pre-check filter, budget, dedup), then queues the entry on the gateway
//!   without holding the lock. The gateway callback re-acquires the lock and
//!   performs the admission (log append, store insert, availability signal)
//!   as one step.
//! - `update` removes committed entries, flushes in-flight admissions,
//!   revalidates what is left and evicts failures.
//! - `reap` reads an ordered prefix under the shared lock.
//!
//! The dedup cache doubles as the reservation for an entry awaiting
//! validation: a fingerprint is pushed during precheck and removed again if
//! the entry ends up not admitted for any reason other than commit.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::RwLock;
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tracing::{debug, info, trace, warn};
use txflow_config::{EventpoolConfig, RecheckTrigger};
use txflow_types::{
    CheckEntryRequest, CheckEntryResponse, Entry, EntryCodec, EntryInfo, ExecutionResults,
    Fingerprint, PeerId, CODE_OK,
};

use crate::app::Application;
use crate::cache::{new_cache, EntryCache};
use crate::gateway::{CallOrdering, Completion, GatewayError, ValidationGateway};
use crate::metrics::{EventpoolMetrics, MetricsSnapshot};
use crate::store::{PendingStore, PoolEntry};
use crate::wal::{DurableLog, WalConfig};
use crate::{EventpoolError, Result};

/// Payload-level filter run during precheck; `Err` carries the reason
pub type PreCheckFn = Arc<dyn Fn(&Entry) -> std::result::Result<(), String> + Send + Sync>;

/// Response-level filter run on an accepting application response; `Err`
/// carries the reason
pub type PostCheckFn =
    Arc<dyn Fn(&Entry, &CheckEntryResponse) -> std::result::Result<(), String> + Send + Sync>;

/// Entries awaiting validation under one fingerprint.
///
/// `generation` identifies the reservation. An update that commits the
/// fingerprint drops the reservation, and a later submission of the same
/// payload starts a new generation, so completions of checks that began
/// before the commit cannot claim it.
#[derive(Debug, Default)]
struct InFlight {
    generation: u64,
    count: u32,
    senders: HashSet<PeerId>,
}

struct PoolState {
    store: PendingStore,
    cache: Box<dyn EntryCache>,
    wal: Option<DurableLog>,
    height: u64,
    /// Set once the availability signal fired for the current height
    notified: bool,
    events_available: Option<Arc<Notify>>,
    in_flight: HashMap<Fingerprint, InFlight>,
    /// Last reservation generation handed out
    generation: u64,
    pre_check: Option<PreCheckFn>,
    post_check: Option<PostCheckFn>,
}

impl PoolState {
    /// Join the live reservation for `fingerprint` or open a new one,
    /// returning its generation
    fn reserve(&mut self, fingerprint: Fingerprint, peer: PeerId) -> u64 {
        if !self.in_flight.contains_key(&fingerprint) {
            self.generation += 1;
        }
        let next = self.generation;
        let in_flight = self.in_flight.entry(fingerprint).or_insert_with(|| InFlight {
            generation: next,
            ..Default::default()
        });
        in_flight.count += 1;
        if !peer.is_unknown() {
            in_flight.senders.insert(peer);
        }
        in_flight.generation
    }

    /// Drop one validation reservation, returning the senders recorded for
    /// it, or `None` if an update already removed that generation
    fn release(&mut self, fingerprint: &Fingerprint, generation: u64) -> Option<HashSet<PeerId>> {
        let in_flight = self
            .in_flight
            .get_mut(fingerprint)
            .filter(|f| f.generation == generation)?;
        in_flight.count = in_flight.count.saturating_sub(1);
        if in_flight.count == 0 {
            return self.in_flight.remove(fingerprint).map(|f| f.senders);
        }
        Some(in_flight.senders.clone())
    }

    fn notify_if_available(&mut self) {
        if self.store.is_empty() || self.notified {
            return;
        }
        if let Some(notify) = &self.events_available {
            self.notified = true;
            notify.notify_one();
        }
    }

    fn verdict(
        &self,
        entry: &Entry,
        response: &CheckEntryResponse,
    ) -> std::result::Result<(), (u32, String)> {
        if !response.is_ok() {
            return Err((response.code, response.log.clone()));
        }
        match &self.post_check {
            Some(filter) => filter(entry, response)
                .map_err(|reason| (response.code, format!("post-check: {}", reason))),
            None => Ok(()),
        }
    }
}

struct Shared {
    config: EventpoolConfig,
    codec: EntryCodec,
    state: RwLock<PoolState>,
    /// Serializes updates
    update_lock: AsyncMutex<()>,
    gateway: ValidationGateway,
    metrics: EventpoolMetrics,
}

impl Shared {
    fn pool_full(&self, store: &PendingStore, attempted: usize) -> Option<EventpoolError> {
        let current_bytes = store.total_bytes();
        let current_entries = store.len();
        if current_entries >= self.config.max_entries
            || current_bytes + attempted as u64 > self.config.max_pool_bytes
        {
            return Some(EventpoolError::PoolFull {
                max_bytes: self.config.max_pool_bytes,
                current_bytes,
                attempted,
                max_entries: self.config.max_entries,
                current_entries,
            });
        }
        None
    }

    /// Gateway callback for an admission check
    fn complete_check(
        &self,
        entry: Entry,
        fingerprint: Fingerprint,
        generation: u64,
        peer: PeerId,
        result: std::result::Result<CheckEntryResponse, GatewayError>,
    ) -> Result<()> {
        let mut state = self.state.write();
        let reservation = state.release(&fingerprint, generation);

        let response = match result {
            Ok(response) => response,
            Err(GatewayError::Closed) => {
                if reservation.is_some() {
                    state.cache.remove(&fingerprint);
                }
                return Err(EventpoolError::GatewayClosed);
            }
        };

        let Some(senders) = reservation else {
            debug!(fingerprint = %fingerprint.short(), "entry committed while awaiting validation");
            return Err(EventpoolError::CommittedWhileValidating);
        };

        if let Err((code, log)) = state.verdict(&entry, &response) {
            state.cache.remove(&fingerprint);
            self.metrics.record_validation_rejected();
            debug!(fingerprint = %fingerprint.short(), code, log = %log, "entry rejected by application");
            return Err(EventpoolError::ValidationRejected { code, log });
        }

        // Only reachable with dedup disabled
        if state.store.contains(&fingerprint) {
            self.metrics.record_duplicate();
            return Err(EventpoolError::AlreadyInCache);
        }

        if let Some(err) = self.pool_full(&state.store, entry.size()) {
            state.cache.remove(&fingerprint);
            self.metrics.record_pool_full();
            debug!(fingerprint = %fingerprint.short(), "eventpool filled up during validation");
            return Err(err);
        }

        if let Some(wal) = &state.wal {
            if let Err(e) = wal.write(entry.as_bytes()) {
                state.cache.remove(&fingerprint);
                self.metrics.record_log_write_failure();
                warn!(fingerprint = %fingerprint.short(), error = %e, "WAL append failed, entry not admitted");
                return Err(EventpoolError::LogWrite(e.into()));
            }
        }

        let mut pool_entry = PoolEntry::new(entry, state.height, peer);
        for sender in senders {
            pool_entry.add_sender(sender);
        }
        let size = pool_entry.size();
        state.store.insert(pool_entry);
        self.metrics.record_admitted();

        debug!(
            fingerprint = %fingerprint.short(),
            peer = %peer,
            size,
            height = state.height,
            pool_size = state.store.len(),
            pool_bytes = state.store.total_bytes(),
            "admitted entry"
        );

        state.notify_if_available();
        Ok(())
    }
}

/// Resolves when the application has ruled on a submitted entry.
///
/// Yields `Ok(())` once the entry is pending, or the reason it was not
/// admitted. Dropping the handle does not cancel validation.
#[derive(Debug)]
pub struct CheckHandle {
    rx: oneshot::Receiver<Result<()>>,
}

impl Future for CheckHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(EventpoolError::GatewayClosed)))
    }
}

/// Edge-triggered "entries available" signal.
///
/// Holds at most one pending notification.
#[derive(Debug, Clone)]
pub struct EventsAvailable {
    notify: Arc<Notify>,
}

impl EventsAvailable {
    /// Wait for the next notification, consuming it
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Pending-entry pool.
///
/// Cheap to clone; clones share the same pool. Must be created inside a
/// tokio runtime.
#[derive(Clone)]
pub struct Eventpool {
    shared: Arc<Shared>,
}

impl Eventpool {
    /// Create a pool validating entries through `app`.
    ///
    /// The write-ahead log is not opened until [`Eventpool::init_wal`].
    pub fn new(config: EventpoolConfig, app: Arc<dyn Application>) -> Self {
        let codec = config.codec();
        let ordering = CallOrdering::for_app(config.sequential_app);
        let gateway = ValidationGateway::new(app, ordering, config.gateway_queue_depth);

        info!(
            max_pool_bytes = config.max_pool_bytes,
            max_entries = config.max_entries,
            cache_size = config.cache_size,
            max_entry_size = codec.max_entry_size(),
            ?ordering,
            recheck = config.recheck,
            "Created eventpool"
        );

        let state = PoolState {
            store: PendingStore::new(),
            cache: new_cache(config.cache_size),
            wal: None,
            height: 0,
            notified: false,
            events_available: None,
            in_flight: HashMap::new(),
            generation: 0,
            pre_check: None,
            post_check: None,
        };

        Self {
            shared: Arc::new(Shared {
                config,
                codec,
                state: RwLock::new(state),
                update_lock: AsyncMutex::new(()),
                gateway,
                metrics: EventpoolMetrics::new(),
            }),
        }
    }

    /// Submit an entry.
    ///
    /// Precheck failures (empty, too large, filtered, full, duplicate) are
    /// returned immediately. Otherwise the entry is queued for validation,
    /// waiting while the gateway queue is full, and the returned handle
    /// resolves with the application's ruling.
    pub async fn check_entry(&self, entry: Entry, info: EntryInfo) -> Result<CheckHandle> {
        let (fingerprint, generation) = self.precheck(&entry, info.peer_id)?;

        let (tx, rx) = oneshot::channel();
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let admitted = entry.clone();
        let peer = info.peer_id;
        let completion = Completion::new(move |result| {
            let outcome = match weak.upgrade() {
                Some(shared) => shared.complete_check(admitted, fingerprint, generation, peer, result),
                None => Err(EventpoolError::GatewayClosed),
            };
            let _ = tx.send(outcome);
        });

        self.shared
            .gateway
            .submit(CheckEntryRequest::new(entry), completion)
            .await;
        Ok(CheckHandle { rx })
    }

    fn precheck(&self, entry: &Entry, peer: PeerId) -> Result<(Fingerprint, u64)> {
        let shared = &self.shared;

        if entry.is_empty() {
            shared.metrics.record_precheck_rejected();
            return Err(EventpoolError::EmptyEntry);
        }

        let max = shared.codec.max_entry_size();
        if entry.size() > max {
            shared.metrics.record_precheck_rejected();
            return Err(EventpoolError::EntryTooLarge {
                max,
                actual: entry.size(),
            });
        }

        let fingerprint = entry.fingerprint();
        let mut state = shared.state.write();

        if let Some(filter) = &state.pre_check {
            if let Err(reason) = filter(entry) {
                shared.metrics.record_precheck_rejected();
                trace!(fingerprint = %fingerprint.short(), reason = %reason, "entry filtered");
                return Err(EventpoolError::PreCheckFilter(reason));
            }
        }

        if let Some(err) = shared.pool_full(&state.store, entry.size()) {
            shared.metrics.record_pool_full();
            return Err(err);
        }

        if !state.cache.push(fingerprint) {
            if let Some(pending) = state.store.get_mut(&fingerprint) {
                pending.add_sender(peer);
            } else if let Some(in_flight) = state.in_flight.get_mut(&fingerprint) {
                if !peer.is_unknown() {
                    in_flight.senders.insert(peer);
                }
            }
            shared.metrics.record_duplicate();
            trace!(fingerprint = %fingerprint.short(), peer = %peer, "duplicate entry");
            return Err(EventpoolError::AlreadyInCache);
        }

        let generation = state.reserve(fingerprint, peer);

        trace!(fingerprint = %fingerprint.short(), peer = %peer, generation, size = entry.size(), "entry passed precheck");
        Ok((fingerprint, generation))
    }

    /// Ordered prefix of pending entries bounded by total bytes and count;
    /// `None` means unlimited. Does not remove anything.
    pub fn reap(&self, max_bytes: Option<u64>, max_entries: Option<usize>) -> Vec<Entry> {
        self.shared.state.read().store.snapshot(max_bytes, max_entries)
    }

    /// Up to `max` pending entries in order
    pub fn reap_max_entries(&self, max: usize) -> Vec<Entry> {
        self.reap(None, Some(max))
    }

    /// Apply a committed block.
    ///
    /// Committed entries are removed from the pending store and remembered
    /// by the dedup cache; an entry whose execution result is not OK is
    /// forgotten by the cache instead, so it may be submitted again. When
    /// recheck applies, the remaining entries are revalidated and failures
    /// are evicted from both the store and the cache.
    pub async fn update(
        &self,
        height: u64,
        committed: &[Entry],
        results: Option<&ExecutionResults>,
    ) -> Result<()> {
        let shared = &self.shared;
        let _update = shared.update_lock.lock().await;

        let fingerprints: Vec<Fingerprint> = committed.iter().map(Entry::fingerprint).collect();

        let (removed, pending) = {
            let mut state = shared.state.write();
            state.height = height;

            let mut removed = 0u64;
            for (index, fingerprint) in fingerprints.iter().enumerate() {
                let failed = results
                    .and_then(|r| r.code_at(index))
                    .is_some_and(|code| code != CODE_OK);
                if failed {
                    state.cache.remove(fingerprint);
                } else {
                    state.cache.push(*fingerprint);
                }
                if state.store.remove(fingerprint).is_some() {
                    removed += 1;
                }
                state.in_flight.remove(fingerprint);
            }
            shared.metrics.record_committed(removed);
            (removed, state.store.len())
        };

        let recheck = shared.config.recheck
            && pending > 0
            && match shared.config.recheck_trigger {
                RecheckTrigger::Always => true,
                RecheckTrigger::OnCommit => !committed.is_empty(),
            };

        let mut evicted = 0u64;
        if recheck {
            evicted = self.recheck().await;
        }

        let mut state = shared.state.write();
        state.notified = false;
        state.notify_if_available();

        info!(
            height,
            committed = committed.len(),
            removed,
            rechecked = recheck,
            evicted,
            remaining = state.store.len(),
            remaining_bytes = state.store.total_bytes(),
            "Eventpool updated"
        );
        Ok(())
    }

    /// Revalidate every pending entry, evicting failures. Returns the number
    /// evicted.
    async fn recheck(&self) -> u64 {
        let shared = &self.shared;

        // Admissions validated before the commit must land before the snapshot
        if shared.gateway.flush().await.is_err() {
            warn!("gateway closed, skipping recheck");
            return 0;
        }

        let entries = shared.state.read().store.snapshot(None, None);
        let count = entries.len();
        let responses = match shared.gateway.recheck(entries.clone()).await {
            Ok(responses) => responses,
            Err(GatewayError::Closed) => {
                warn!(entries = count, "gateway closed during recheck");
                return 0;
            }
        };

        let mut state = shared.state.write();
        let mut evicted = 0u64;
        for (entry, response) in entries.iter().zip(responses.iter()) {
            let Err((code, log)) = state.verdict(entry, response) else {
                continue;
            };
            let fingerprint = entry.fingerprint();
            if state.store.remove(&fingerprint).is_some() {
                state.cache.remove(&fingerprint);
                evicted += 1;
                let reason = EventpoolError::RecheckEvicted { code, log };
                warn!(fingerprint = %fingerprint.short(), error = %reason, "evicted pending entry");
            }
        }
        shared.metrics.record_recheck_evicted(evicted);
        debug!(rechecked = count, evicted, "recheck complete");
        evicted
    }

    /// Drop every pending entry. The dedup cache is left untouched.
    pub fn flush(&self) {
        let mut state = self.shared.state.write();
        let dropped = state.store.len();
        state.store.flush();
        info!(dropped, "Flushed eventpool");
    }

    /// Wait until every queued validation call has resolved
    pub async fn flush_app_conn(&self) -> Result<()> {
        self.shared
            .gateway
            .flush()
            .await
            .map_err(|_| EventpoolError::GatewayClosed)
    }

    /// Number of pending entries
    pub fn size(&self) -> usize {
        self.shared.state.read().store.len()
    }

    /// Total bytes of pending entries
    pub fn entries_bytes(&self) -> u64 {
        self.shared.state.read().store.total_bytes()
    }

    /// Whether an entry with this fingerprint is pending
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.shared.state.read().store.contains(fingerprint)
    }

    /// Peers a pending entry was received from, in ascending order
    pub fn senders_of(&self, fingerprint: &Fingerprint) -> Option<Vec<PeerId>> {
        let state = self.shared.state.read();
        let pending = state.store.get(fingerprint)?;
        let mut senders: Vec<PeerId> = pending.senders.iter().copied().collect();
        senders.sort();
        Some(senders)
    }

    /// Height of the last update
    pub fn height(&self) -> u64 {
        self.shared.state.read().height
    }

    /// Largest admissible entry payload
    pub fn max_entry_size(&self) -> usize {
        self.shared.codec.max_entry_size()
    }

    /// Pool configuration
    pub fn config(&self) -> &EventpoolConfig {
        &self.shared.config
    }

    /// Arm the availability signal. Idempotent.
    pub fn enable_events_available(&self) {
        let mut state = self.shared.state.write();
        if state.events_available.is_none() {
            state.events_available = Some(Arc::new(Notify::new()));
        }
    }

    /// Availability signal, if enabled
    pub fn events_available(&self) -> Option<EventsAvailable> {
        self.shared
            .state
            .read()
            .events_available
            .as_ref()
            .map(|notify| EventsAvailable {
                notify: notify.clone(),
            })
    }

    /// Install or clear the payload filter run during precheck
    pub fn set_pre_check(&self, filter: Option<PreCheckFn>) {
        self.shared.state.write().pre_check = filter;
    }

    /// Install or clear the response filter run before admission and
    /// during recheck
    pub fn set_post_check(&self, filter: Option<PostCheckFn>) {
        self.shared.state.write().post_check = filter;
    }

    /// Open the write-ahead log at the configured path. A no-op when no WAL
    /// directory is configured or the log is already open.
    pub fn init_wal(&self) -> Result<()> {
        let config = &self.shared.config;
        let Some(dir) = config.wal_dir.clone() else {
            debug!("no WAL directory configured");
            return Ok(());
        };

        let mut state = self.shared.state.write();
        if state.wal.is_some() {
            return Ok(());
        }
        state.wal = Some(DurableLog::open(WalConfig {
            dir,
            file_name: config.wal_file_name.clone(),
            sync_on_write: config.wal_sync_on_write,
        })?);
        Ok(())
    }

    /// Detach the write-ahead log without flushing, as a crash would.
    /// Later admissions are not logged.
    pub fn close_wal(&self) {
        let wal = self.shared.state.write().wal.take();
        if let Some(wal) = wal {
            wal.discard();
        }
    }

    /// Path of the write-ahead log, if one is configured
    pub fn wal_path(&self) -> Option<PathBuf> {
        self.shared.config.wal_path()
    }

    /// Counter snapshot with current size and bytes
    pub fn metrics(&self) -> MetricsSnapshot {
        let (size, bytes) = {
            let state = self.shared.state.read();
            (state.store.len(), state.store.total_bytes())
        };
        self.shared.metrics.snapshot(size, bytes)
    }

    /// Stop validation and close the write-ahead log gracefully.
    ///
    /// Outstanding admissions resolve with [`EventpoolError::GatewayClosed`].
    pub async fn shutdown(&self) -> Result<()> {
        self.shared.gateway.close().await;
        let wal = self.shared.state.write().wal.take();
        if let Some(wal) = wal {
            wal.close()?;
        }
        info!(pending = self.size(), "Eventpool shut down");
        Ok(())
    }
}

impl std::fmt::Debug for Eventpool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("Eventpool")
            .field("size", &state.store.len())
            .field("bytes", &state.store.total_bytes())
            .field("height", &state.height)
            .field("wal", &state.wal.as_ref().map(|w| w.path().to_path_buf()))
            .finish()
    }
}
