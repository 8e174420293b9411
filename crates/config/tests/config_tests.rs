//! Tests for Config module

use std::io::Write;
use std::path::PathBuf;
use txflow_config::{Config, ConfigError, EventpoolConfig, LoggingConfig, RecheckTrigger};

#[test]
fn test_default_config() {
    let config = Config::default();
    assert!(config.eventpool.wal_dir.is_none());
    assert_eq!(config.eventpool.wal_file_name, "eventpool.wal");
    assert_eq!(config.eventpool.max_pool_bytes, 1024 * 1024 * 1024);
    assert_eq!(config.eventpool.max_entries, 5000);
    assert_eq!(config.eventpool.cache_size, 10_000);
    assert_eq!(config.eventpool.max_msg_size, 1_048_576);
    assert!(!config.eventpool.sequential_app);
    assert!(config.eventpool.recheck);
    assert_eq!(config.eventpool.recheck_trigger, RecheckTrigger::Always);
    assert!(config.validate().is_ok());
}

#[test]
fn test_empty_document_is_default() {
    let config = Config::from_str("").unwrap();
    assert_eq!(config.eventpool.max_entries, 5000);
    assert_eq!(config.logging.format, "pretty");
}

#[test]
fn test_parse_full_document() {
    let toml = r#"
        [eventpool]
        wal_dir = "/data/wal"
        wal_file_name = "pool.wal"
        wal_sync_on_write = true
        max_pool_bytes = 10
        max_entries = 3
        cache_size = 0
        max_msg_size = 4096
        sequential_app = true
        recheck = false
        recheck_trigger = "on_commit"
        gateway_queue_depth = 8

        [logging]
        level = "debug"
        format = "json"
    "#;

    let config = Config::from_str(toml).unwrap();
    let pool = &config.eventpool;
    assert_eq!(pool.wal_path(), Some(PathBuf::from("/data/wal/pool.wal")));
    assert!(pool.wal_sync_on_write);
    assert_eq!(pool.max_pool_bytes, 10);
    assert_eq!(pool.max_entries, 3);
    assert_eq!(pool.cache_size, 0);
    assert_eq!(pool.max_entry_size(), 4096 - 7);
    assert!(pool.sequential_app);
    assert!(!pool.recheck);
    assert_eq!(pool.recheck_trigger, RecheckTrigger::OnCommit);
    assert_eq!(pool.gateway_queue_depth, 8);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, "json");
}

#[test]
fn test_invalid_max_pool_bytes() {
    let config = EventpoolConfig {
        max_pool_bytes: 0,
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidMaxPoolBytes)));
}

#[test]
fn test_invalid_max_entries() {
    let config = EventpoolConfig {
        max_entries: 0,
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidMaxEntries)));
}

#[test]
fn test_max_msg_size_too_small() {
    let config = EventpoolConfig {
        max_msg_size: 6,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::MaxMsgSizeTooSmall(6))
    ));

    let config = EventpoolConfig {
        max_msg_size: 7,
        ..Default::default()
    };
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_queue_depth() {
    let config = EventpoolConfig {
        gateway_queue_depth: 0,
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidQueueDepth)));
}

#[test]
fn test_invalid_wal_file_name() {
    let config = EventpoolConfig {
        wal_dir: Some(PathBuf::from("/tmp")),
        wal_file_name: "  ".to_string(),
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidWalFileName)));
}

#[test]
fn test_invalid_logging() {
    let config = LoggingConfig {
        level: "loud".to_string(),
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidLogLevel(_))));

    let config = LoggingConfig {
        format: "xml".to_string(),
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidLogFormat(_))));

    let config = LoggingConfig {
        level: "WARN".to_string(),
        format: "Compact".to_string(),
    };
    assert!(config.validate().is_ok());
}

#[test]
fn test_unknown_trigger_rejected() {
    let result = Config::from_str("[eventpool]\nrecheck_trigger = \"sometimes\"\n");
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[eventpool]\nmax_entries = 42").unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.eventpool.max_entries, 42);
}

#[test]
fn test_load_missing_file() {
    let result = Config::load(std::path::Path::new("/nonexistent/txflow.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead { .. })));
}

#[test]
fn test_to_toml_roundtrip() {
    let mut config = Config::default();
    config.eventpool.max_entries = 77;
    config.eventpool.recheck_trigger = RecheckTrigger::OnCommit;
    let parsed = Config::from_str(&config.to_toml()).unwrap();
    assert_eq!(parsed.eventpool.max_entries, 77);
    assert_eq!(parsed.eventpool.recheck_trigger, RecheckTrigger::OnCommit);
}
