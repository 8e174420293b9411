//! Tests for Eventpool admission, update and recovery behaviour

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use txflow_config::{EventpoolConfig, RecheckTrigger};
use txflow_eventpool::app::{CODE_BAD_NONCE, CODE_ENCODING_ERROR};
use txflow_eventpool::{Application, CounterApp, EventpoolError, Eventpool, KvStoreApp};
use txflow_types::{
    CheckEntryResponse, DeliverEntryResponse, Entry, EntryCodec, EntryInfo, ExecutionResults,
    Fingerprint, PeerId, DEFAULT_MAX_MSG_SIZE,
};

const TIMEOUT: Duration = Duration::from_millis(200);

fn create_test_pool(app: Arc<dyn Application>, config: EventpoolConfig) -> Eventpool {
    Eventpool::new(config, app)
}

fn create_kvstore_pool() -> Eventpool {
    create_test_pool(Arc::new(KvStoreApp::new()), EventpoolConfig::default())
}

fn random_entry(len: usize) -> Entry {
    let mut payload = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut payload);
    Entry::from(payload)
}

/// Submit `count` random 20 byte entries and wait for each to resolve,
/// skipping precheck failures
async fn check_entries(pool: &Eventpool, count: usize, peer: PeerId) -> Vec<Entry> {
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let entry = random_entry(20);
        match pool.check_entry(entry.clone(), EntryInfo::from_peer(peer)).await {
            Ok(handle) => handle.await.expect("entry should be admitted"),
            Err(e) if e.is_precheck() => continue,
            Err(e) => panic!("check_entry failed: {}", e),
        }
        entries.push(entry);
    }
    entries
}

async fn admit(pool: &Eventpool, entry: Entry) {
    pool.check_entry(entry, EntryInfo::local())
        .await
        .expect("precheck should pass")
        .await
        .expect("entry should be admitted");
}

async fn fired(pool: &Eventpool) -> bool {
    let signal = pool.events_available().expect("events available enabled");
    tokio::time::timeout(TIMEOUT, signal.notified()).await.is_ok()
}

fn checksum_file(path: &Path) -> Vec<u8> {
    let data = std::fs::read(path).unwrap();
    Sha256::digest(&data).to_vec()
}

#[tokio::test]
async fn test_update_adds_entries_to_cache() {
    let pool = create_kvstore_pool();
    pool.update(1, &[Entry::from(vec![0x01])], None).await.unwrap();

    let err = pool
        .check_entry(Entry::from(vec![0x01]), EntryInfo::local())
        .await
        .unwrap_err();
    assert!(matches!(err, EventpoolError::AlreadyInCache));
}

#[tokio::test]
async fn test_events_available() {
    let pool = create_kvstore_pool();
    pool.enable_events_available();

    // With no entries, it should not fire
    assert!(!fired(&pool).await);

    // A batch of entries fires exactly once
    let entries = check_entries(&pool, 100, PeerId::UNKNOWN).await;
    assert!(fired(&pool).await);
    assert!(!fired(&pool).await);

    // Update with half the entries fires once for the new height since
    // entries are left
    let (committed, remaining) = entries.split_at(50);
    pool.update(1, committed, None).await.unwrap();
    assert!(fired(&pool).await);
    assert!(!fired(&pool).await);

    // Already fired for this height
    let more = check_entries(&pool, 50, PeerId::UNKNOWN).await;
    assert!(!fired(&pool).await);

    // Update with everything leaves nothing, so nothing fires
    let mut all = remaining.to_vec();
    all.extend(more);
    pool.update(2, &all, None).await.unwrap();
    assert_eq!(pool.size(), 0);
    assert!(!fired(&pool).await);

    // New entries fire once
    check_entries(&pool, 100, PeerId::UNKNOWN).await;
    assert!(fired(&pool).await);
    assert!(!fired(&pool).await);
}

#[tokio::test]
async fn test_events_available_disabled() {
    let pool = create_kvstore_pool();
    assert!(pool.events_available().is_none());
    check_entries(&pool, 3, PeerId::UNKNOWN).await;

    // Enabling later does not fire until the next admission or update
    pool.enable_events_available();
    assert!(!fired(&pool).await);
}

#[tokio::test]
async fn test_serial_reap() {
    let app = Arc::new(CounterApp::new(true));
    let pool = create_test_pool(
        app.clone(),
        EventpoolConfig {
            sequential_app: true,
            ..Default::default()
        },
    );

    let mut seen = std::collections::HashSet::new();

    let deliver_range = |start: u64, end: u64, seen: &mut std::collections::HashSet<u64>| {
        let pool = pool.clone();
        let fresh: Vec<bool> = (start..end).map(|i| seen.insert(i)).collect();
        async move {
            for (i, fresh) in (start..end).zip(fresh) {
                let entry = CounterApp::entry_for(i);
                let result = pool.check_entry(entry.clone(), EntryInfo::local()).await;
                if fresh {
                    result
                        .expect("uncached entry passes precheck")
                        .await
                        .expect("uncached entry is admitted");
                } else {
                    assert!(result.is_err(), "expected error for cached entry {}", i);
                }

                // Duplicates are cached
                let duplicate = pool.check_entry(entry, EntryInfo::local()).await;
                assert!(matches!(duplicate, Err(EventpoolError::AlreadyInCache)));
            }
        }
    };

    let reap_check = |expected: usize| {
        let reaped = pool.reap(None, None);
        assert_eq!(reaped.len(), expected, "reaped {} expected {}", reaped.len(), expected);
    };

    let commit_range = |start: u64, end: u64| {
        let app = app.clone();
        async move {
            for i in start..end {
                let res = app.deliver_entry(&CounterApp::entry_for(i)).await;
                assert!(res.is_ok(), "error delivering {}: {}", i, res.log);
            }
            let res = app.commit().await;
            assert_eq!(res.data.len(), 8);
        }
    };

    let update_range = |start: u64, end: u64| {
        let pool = pool.clone();
        async move {
            let entries: Vec<Entry> = (start..end).map(CounterApp::entry_for).collect();
            pool.update(0, &entries, None).await.unwrap();
        }
    };

    deliver_range(0, 100, &mut seen).await;
    reap_check(100);
    // Reaping again yields the same amount
    reap_check(100);

    // 0 to 999: 900 new entries, 100 already counted
    deliver_range(0, 1000, &mut seen).await;
    reap_check(1000);
    reap_check(1000);

    commit_range(0, 500).await;
    update_range(0, 500).await;
    reap_check(500);

    // 100 cached and 100 new valid entries
    deliver_range(900, 1100, &mut seen).await;
    reap_check(600);

    // Reap keeps admission order
    let reaped = pool.reap_max_entries(3);
    assert_eq!(
        reaped,
        vec![
            CounterApp::entry_for(500),
            CounterApp::entry_for(501),
            CounterApp::entry_for(502)
        ]
    );
}

#[tokio::test]
async fn test_close_wal_discards() {
    let dir = tempfile::tempdir().unwrap();
    let count_files = || std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(count_files(), 0);

    let pool = create_test_pool(
        Arc::new(KvStoreApp::new()),
        EventpoolConfig {
            wal_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        },
    );
    pool.init_wal().unwrap();
    assert_eq!(count_files(), 1);

    admit(&pool, Entry::from(&b"foo"[..])).await;
    let wal_path = pool.wal_path().unwrap();
    let sum1 = checksum_file(&wal_path);
    assert_eq!(sum1, Sha256::digest(b"foo\n").to_vec());

    // After discard nothing else reaches the file
    pool.close_wal();
    admit(&pool, Entry::from(&b"bar"[..])).await;
    assert_eq!(checksum_file(&wal_path), sum1);
    assert_eq!(pool.size(), 2);

    assert_eq!(count_files(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_wal_gracefully() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create_test_pool(
        Arc::new(KvStoreApp::new()),
        EventpoolConfig {
            wal_dir: Some(dir.path().to_path_buf()),
            wal_sync_on_write: true,
            ..Default::default()
        },
    );
    pool.init_wal().unwrap();
    admit(&pool, Entry::from(&b"a"[..])).await;
    admit(&pool, Entry::from(&b"b"[..])).await;
    pool.shutdown().await.unwrap();

    let records = txflow_eventpool::read_records(&pool.wal_path().unwrap()).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(&records[0][..], b"a");
    assert_eq!(&records[1][..], b"b");
}

#[tokio::test]
async fn test_max_msg_size() {
    let pool = create_kvstore_pool();
    let codec = EntryCodec::default();
    let max_msg = DEFAULT_MAX_MSG_SIZE;
    let max_entry = max_msg - 8;
    assert_eq!(pool.max_entry_size(), max_entry);

    let cases = [
        // Small entries
        (10, false),
        (1000, false),
        (1_000_000, false),
        // Around the maximum entry size
        (max_entry - 2, false),
        (max_entry - 1, false),
        (max_entry, false),
        (max_entry + 1, true),
        (max_entry + 2, true),
        // Around the maximum message size, all too large
        (max_msg - 1, true),
        (max_msg, true),
        (max_msg + 1, true),
    ];

    for (i, (len, too_large)) in cases.into_iter().enumerate() {
        let entry = random_entry(len);
        let result = pool.check_entry(entry.clone(), EntryInfo::local()).await;
        let encoded_len = codec.encoded_len(len);
        if too_large {
            assert!(encoded_len > max_msg, "case {} len {}", i, len);
            match result {
                Err(EventpoolError::EntryTooLarge { max, actual }) => {
                    assert_eq!(max, max_entry);
                    assert_eq!(actual, len);
                }
                other => panic!("case {} len {}: expected EntryTooLarge, got {:?}", i, len, other),
            }
        } else {
            assert!(encoded_len <= max_msg, "case {} len {}", i, len);
            assert_eq!(codec.encode(&entry).unwrap().len(), encoded_len);
            result.unwrap().await.unwrap();
        }
    }
}

#[tokio::test]
async fn test_entries_bytes() {
    let pool = create_test_pool(
        Arc::new(KvStoreApp::new()),
        EventpoolConfig {
            max_pool_bytes: 10,
            ..Default::default()
        },
    );

    // Zero by default
    assert_eq!(pool.entries_bytes(), 0);

    // Entry size after admission
    admit(&pool, Entry::from(vec![0x01])).await;
    assert_eq!(pool.entries_bytes(), 1);

    // Zero again after update removes it
    pool.update(1, &[Entry::from(vec![0x01])], None).await.unwrap();
    assert_eq!(pool.entries_bytes(), 0);

    // Zero after flush
    admit(&pool, Entry::from(vec![0x02, 0x03])).await;
    assert_eq!(pool.entries_bytes(), 2);
    pool.flush();
    assert_eq!(pool.entries_bytes(), 0);

    // Full once the byte budget is reached
    admit(&pool, Entry::from(vec![0x04; 10])).await;
    assert_eq!(pool.entries_bytes(), 10);
    let err = pool
        .check_entry(Entry::from(vec![0x05]), EntryInfo::local())
        .await
        .unwrap_err();
    match err {
        EventpoolError::PoolFull {
            max_bytes,
            current_bytes,
            attempted,
            ..
        } => {
            assert_eq!(max_bytes, 10);
            assert_eq!(current_bytes, 10);
            assert_eq!(attempted, 1);
        }
        other => panic!("expected PoolFull, got {:?}", other),
    }

    // Flush frees the budget; the cache still remembers flushed entries
    pool.flush();
    admit(&pool, Entry::from(vec![0x05])).await;
    assert_eq!(pool.entries_bytes(), 1);
    let err = pool
        .check_entry(Entry::from(vec![0x02, 0x03]), EntryInfo::local())
        .await
        .unwrap_err();
    assert!(matches!(err, EventpoolError::AlreadyInCache));
}

#[tokio::test]
async fn test_recheck_evicts_and_forgets() {
    let app = Arc::new(CounterApp::new(true));
    let pool = create_test_pool(app.clone(), EventpoolConfig::default());

    let entry = CounterApp::entry_for(0);
    admit(&pool, entry.clone()).await;
    assert_eq!(pool.entries_bytes(), 8);

    assert!(app.deliver_entry(&entry).await.is_ok());
    assert!(!app.commit().await.data.is_empty());

    // Pretend nothing was committed so the entry is rechecked and removed
    pool.update(1, &[], None).await.unwrap();
    assert_eq!(pool.entries_bytes(), 0);
    assert_eq!(pool.metrics().recheck_evicted, 1);

    // Evicted fingerprints may be submitted again
    let result = pool
        .check_entry(entry, EntryInfo::local())
        .await
        .unwrap()
        .await;
    match result {
        Err(EventpoolError::ValidationRejected { code, .. }) => assert_eq!(code, CODE_BAD_NONCE),
        other => panic!("expected ValidationRejected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_recheck_on_commit_trigger() {
    let app = Arc::new(CounterApp::new(true));
    let pool = create_test_pool(
        app.clone(),
        EventpoolConfig {
            recheck_trigger: RecheckTrigger::OnCommit,
            ..Default::default()
        },
    );

    admit(&pool, CounterApp::entry_for(0)).await;
    admit(&pool, CounterApp::entry_for(1)).await;
    app.deliver_entry(&CounterApp::entry_for(0)).await;
    app.deliver_entry(&CounterApp::entry_for(1)).await;
    app.commit().await;

    // Empty commit does not trigger a recheck
    pool.update(1, &[], None).await.unwrap();
    assert_eq!(pool.size(), 2);

    // A commit does, and the stale remainder is evicted
    pool.update(2, &[CounterApp::entry_for(0)], None).await.unwrap();
    assert_eq!(pool.size(), 0);
    assert_eq!(pool.metrics().committed, 1);
    assert_eq!(pool.metrics().recheck_evicted, 1);
}

#[tokio::test]
async fn test_recheck_disabled() {
    let app = Arc::new(CounterApp::new(true));
    let pool = create_test_pool(
        app.clone(),
        EventpoolConfig {
            recheck: false,
            ..Default::default()
        },
    );
    admit(&pool, CounterApp::entry_for(0)).await;
    app.deliver_entry(&CounterApp::entry_for(0)).await;
    pool.update(1, &[], None).await.unwrap();
    assert_eq!(pool.size(), 1);
}

#[tokio::test]
async fn test_commit_keeps_fingerprint_failed_execution_forgets() {
    let pool = create_kvstore_pool();
    let ok = Entry::from(&b"ok"[..]);
    let failed = Entry::from(&b"failed"[..]);
    admit(&pool, ok.clone()).await;
    admit(&pool, failed.clone()).await;

    let results = ExecutionResults::new(vec![
        DeliverEntryResponse::ok(),
        DeliverEntryResponse::err(CODE_ENCODING_ERROR, "bad"),
    ]);
    pool.update(1, &[ok.clone(), failed.clone()], Some(&results))
        .await
        .unwrap();
    assert_eq!(pool.size(), 0);

    let err = pool.check_entry(ok, EntryInfo::local()).await.unwrap_err();
    assert!(matches!(err, EventpoolError::AlreadyInCache));

    admit(&pool, failed).await;
    assert_eq!(pool.size(), 1);
}

#[tokio::test]
async fn test_duplicate_rejection_is_idempotent() {
    let pool = create_kvstore_pool();
    let entry = random_entry(32);
    admit(&pool, entry.clone()).await;
    for _ in 0..10 {
        let err = pool
            .check_entry(entry.clone(), EntryInfo::local())
            .await
            .unwrap_err();
        assert!(matches!(err, EventpoolError::AlreadyInCache));
        assert!(err.is_precheck_or_filter());
    }
    assert_eq!(pool.metrics().duplicates, 10);
}

#[tokio::test]
async fn test_empty_entry() {
    let pool = create_kvstore_pool();
    let err = pool
        .check_entry(Entry::default(), EntryInfo::local())
        .await
        .unwrap_err();
    assert!(matches!(err, EventpoolError::EmptyEntry));
    assert!(err.is_precheck());
}

#[tokio::test]
async fn test_max_entries_bound() {
    let pool = create_test_pool(
        Arc::new(KvStoreApp::new()),
        EventpoolConfig {
            max_entries: 3,
            ..Default::default()
        },
    );
    check_entries(&pool, 3, PeerId::UNKNOWN).await;
    let err = pool
        .check_entry(random_entry(4), EntryInfo::local())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EventpoolError::PoolFull {
            max_entries: 3,
            current_entries: 3,
            ..
        }
    ));
    assert_eq!(pool.metrics().pool_full, 1);
}

#[tokio::test]
async fn test_cache_disabled_admits_once() {
    let pool = create_test_pool(
        Arc::new(KvStoreApp::new()),
        EventpoolConfig {
            cache_size: 0,
            ..Default::default()
        },
    );
    let entry = random_entry(16);
    admit(&pool, entry.clone()).await;

    // Without a cache the duplicate reaches the application but is not
    // stored twice
    let result = pool
        .check_entry(entry, EntryInfo::local())
        .await
        .unwrap()
        .await;
    assert!(matches!(result, Err(EventpoolError::AlreadyInCache)));
    assert_eq!(pool.size(), 1);
}

#[tokio::test]
async fn test_reap_limits() {
    let pool = create_kvstore_pool();
    for payload in [&b"aaaa"[..], &b"b"[..], &b"cc"[..], &b"d"[..]] {
        admit(&pool, Entry::from(payload)).await;
    }

    assert_eq!(pool.reap(None, None).len(), 4);
    assert_eq!(pool.reap(Some(5), None).len(), 2);
    assert_eq!(pool.reap(Some(7), Some(2)).len(), 2);
    assert_eq!(pool.reap(Some(3), None).len(), 0);
    assert_eq!(pool.reap_max_entries(3).len(), 3);

    // Reap never removes
    assert_eq!(pool.size(), 4);
    assert_eq!(pool.reap(Some(5), None), pool.reap(Some(5), None));
}

#[tokio::test]
async fn test_filters() {
    let pool = create_kvstore_pool();
    pool.set_pre_check(Some(Arc::new(|entry: &Entry| {
        if entry.size() > 16 {
            Err(format!("entry of {} bytes exceeds 16", entry.size()))
        } else {
            Ok(())
        }
    })));
    pool.set_post_check(Some(Arc::new(|entry: &Entry, _response: &CheckEntryResponse| {
        if entry.as_bytes().starts_with(b"x") {
            Err("starts with x".to_string())
        } else {
            Ok(())
        }
    })));

    let err = pool
        .check_entry(random_entry(17), EntryInfo::local())
        .await
        .unwrap_err();
    assert!(matches!(err, EventpoolError::PreCheckFilter(_)));
    assert!(err.is_precheck_or_filter());

    let result = pool
        .check_entry(Entry::from(&b"xyz"[..]), EntryInfo::local())
        .await
        .unwrap()
        .await;
    assert!(matches!(result, Err(EventpoolError::ValidationRejected { .. })));

    admit(&pool, Entry::from(&b"abc"[..])).await;
    assert_eq!(pool.size(), 1);

    // Clearing the filters admits what they rejected
    pool.set_pre_check(None);
    pool.set_post_check(None);
    admit(&pool, Entry::from(&b"xyz"[..])).await;
    assert_eq!(pool.size(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_peers() {
    let pool = create_kvstore_pool();

    let mut tasks = Vec::new();
    for peer in 1..=4u16 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let mut handles = Vec::new();
            for _ in 0..100 {
                let len = rand::thread_rng().gen_range(16..64);
                let handle = pool
                    .check_entry(random_entry(len), EntryInfo::from_peer(PeerId(peer)))
                    .await
                    .unwrap();
                handles.push(handle);
            }
            handles
        }));
    }

    let mut handles = Vec::new();
    for task in tasks {
        handles.extend(task.await.unwrap());
    }
    pool.flush_app_conn().await.unwrap();
    assert_eq!(pool.size(), 400);

    for handle in handles {
        handle.await.unwrap();
    }

    let total: u64 = pool
        .reap(None, None)
        .iter()
        .map(|e| e.size() as u64)
        .sum();
    assert_eq!(pool.entries_bytes(), total);
    assert_eq!(pool.metrics().admitted, 400);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_budget_never_exceeded() {
    let pool = create_test_pool(
        Arc::new(KvStoreApp::new()),
        EventpoolConfig {
            max_pool_bytes: 1000,
            ..Default::default()
        },
    );

    let mut tasks = Vec::new();
    for peer in 1..=8u16 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                if let Ok(handle) = pool
                    .check_entry(random_entry(10), EntryInfo::from_peer(PeerId(peer)))
                    .await
                {
                    let _ = handle.await;
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    pool.flush_app_conn().await.unwrap();

    assert!(pool.entries_bytes() <= 1000);
    assert_eq!(pool.entries_bytes(), pool.size() as u64 * 10);
    assert_eq!(pool.size(), 100);
}

#[tokio::test]
async fn test_senders_recorded() {
    let pool = create_kvstore_pool();
    let entry = random_entry(24);
    let fingerprint = entry.fingerprint();

    pool.check_entry(entry.clone(), EntryInfo::from_peer(PeerId(2)))
        .await
        .unwrap()
        .await
        .unwrap();
    for peer in [PeerId(3), PeerId(1), PeerId(3), PeerId::UNKNOWN] {
        let err = pool
            .check_entry(entry.clone(), EntryInfo::from_peer(peer))
            .await
            .unwrap_err();
        assert!(matches!(err, EventpoolError::AlreadyInCache));
    }

    assert_eq!(
        pool.senders_of(&fingerprint),
        Some(vec![PeerId(1), PeerId(2), PeerId(3)])
    );
    assert_eq!(pool.senders_of(&Fingerprint::of(b"unknown")), None);
}

#[tokio::test]
async fn test_update_sets_height() {
    let pool = create_kvstore_pool();
    assert_eq!(pool.height(), 0);
    pool.update(7, &[], None).await.unwrap();
    assert_eq!(pool.height(), 7);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_log_write_failure_rejects_entry() {
    if !Path::new("/dev/full").exists() {
        return;
    }
    let pool = create_test_pool(
        Arc::new(KvStoreApp::new()),
        EventpoolConfig {
            wal_dir: Some("/dev".into()),
            wal_file_name: "full".to_string(),
            ..Default::default()
        },
    );
    if pool.init_wal().is_err() {
        return;
    }

    let entry = random_entry(8);
    let result = pool
        .check_entry(entry.clone(), EntryInfo::local())
        .await
        .unwrap()
        .await;
    assert!(matches!(result, Err(EventpoolError::LogWrite(_))));
    assert_eq!(pool.size(), 0);
    assert_eq!(pool.metrics().log_write_failures, 1);

    // Not remembered by the cache
    let result = pool
        .check_entry(entry, EntryInfo::local())
        .await
        .unwrap()
        .await;
    assert!(matches!(result, Err(EventpoolError::LogWrite(_))));

    pool.close_wal();
}
