//! Eventpool startup: write-ahead log replay, log compaction and inspection.
//!
//! On start every record of an existing log is resubmitted through the normal
//! admission path, so entries the application now rejects are dropped. The
//! log is then rewritten to hold exactly the pending entries and reopened for
//! append.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};
use txflow_config::EventpoolConfig;
use txflow_eventpool::{
    read_records, rewrite_records, Application, CounterApp, Eventpool, KvStoreApp,
};
use txflow_types::{Entry, EntryInfo};

/// Outcome of a log replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    /// Records read from the log
    pub records: usize,
    /// Records admitted to the pool
    pub admitted: usize,
    /// Records dropped by precheck, filter, capacity or dedup
    pub skipped: usize,
    /// Records the application rejected
    pub rejected: usize,
}

/// Resubmit every record of the log at `path` to `pool`.
///
/// A missing log replays nothing. Must run before the pool's own log is
/// opened, or replayed entries would be appended a second time.
pub async fn replay_wal(pool: &Eventpool, path: &Path) -> Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    if !path.exists() {
        debug!(path = %path.display(), "no WAL to replay");
        return Ok(stats);
    }

    let records = read_records(path)
        .with_context(|| format!("failed to read WAL {}", path.display()))?;
    stats.records = records.len();

    let mut handles = Vec::with_capacity(records.len());
    for record in records {
        match pool.check_entry(Entry::new(record), EntryInfo::local()).await {
            Ok(handle) => handles.push(handle),
            Err(e) if e.is_precheck_or_filter() => stats.skipped += 1,
            Err(e) => return Err(e).context("WAL replay aborted"),
        }
    }

    for handle in handles {
        match handle.await {
            Ok(()) => stats.admitted += 1,
            Err(e) if e.is_precheck_or_filter() => stats.skipped += 1,
            Err(e) => {
                debug!(error = %e, "replayed entry rejected");
                stats.rejected += 1;
            }
        }
    }

    info!(
        path = %path.display(),
        records = stats.records,
        admitted = stats.admitted,
        skipped = stats.skipped,
        rejected = stats.rejected,
        "Replayed WAL"
    );
    Ok(stats)
}

/// Create a pool, replay and compact its log, then open the log for append
pub async fn start_eventpool(
    config: EventpoolConfig,
    app: Arc<dyn Application>,
) -> Result<(Eventpool, ReplayStats)> {
    let pool = Eventpool::new(config, app);

    let mut stats = ReplayStats::default();
    if let Some(path) = pool.wal_path() {
        stats = replay_wal(&pool, &path).await?;
        if path.exists() {
            let pending = pool.reap(None, None);
            let kept = rewrite_records(&path, pending.iter().map(Entry::as_bytes))
                .with_context(|| format!("failed to compact WAL {}", path.display()))?;
            if kept < stats.records {
                warn!(kept, dropped = stats.records - kept, "WAL compacted on startup");
            }
        }
    }

    pool.init_wal().context("failed to open WAL")?;
    Ok((pool, stats))
}

/// Record count and sizes of a log file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WalSummary {
    /// Non-empty records
    pub records: usize,
    /// Payload bytes across records
    pub payload_bytes: u64,
    /// File size on disk
    pub file_size: u64,
}

/// Summarize the log at `path`
pub fn inspect_wal(path: &Path) -> Result<WalSummary> {
    let file_size = std::fs::metadata(path)
        .with_context(|| format!("cannot stat {}", path.display()))?
        .len();
    let records = read_records(path)?;
    Ok(WalSummary {
        records: records.len(),
        payload_bytes: records.iter().map(|r| r.len() as u64).sum(),
        file_size,
    })
}

/// Reference application served by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AppKind {
    /// Accepts every non-empty entry
    Kvstore,
    /// 8-byte counters in any order
    Counter,
    /// 8-byte counters that must not go backwards
    CounterSerial,
}

impl AppKind {
    /// Instantiate the application
    pub fn build(self) -> Arc<dyn Application> {
        match self {
            AppKind::Kvstore => Arc::new(KvStoreApp::new()),
            AppKind::Counter => Arc::new(CounterApp::new(false)),
            AppKind::CounterSerial => Arc::new(CounterApp::new(true)),
        }
    }
}
