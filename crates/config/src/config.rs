//! Main configuration module for TxFlow
//!
//! A node is configured by one `txflow.toml` file with an `[eventpool]` and a
//! `[logging]` section.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use txflow_types::{EntryCodec, DEFAULT_MAX_MSG_SIZE};

/// Main configuration struct containing all TxFlow settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Eventpool configuration
    pub eventpool: EventpoolConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        info!("Loading configuration from {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content)?;

        debug!("Configuration parsed successfully, validating...");
        config.validate()?;

        info!(
            max_pool_bytes = config.eventpool.max_pool_bytes,
            max_entries = config.eventpool.max_entries,
            cache_size = config.eventpool.cache_size,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> ConfigResult<()> {
        self.eventpool.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Serialize back to TOML
    pub fn to_toml(&self) -> String {
        // Every field is a plain scalar or string, so serialization cannot fail
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

// =============================================================================
// Eventpool Configuration
// =============================================================================

/// When the remaining pending entries are revalidated after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecheckTrigger {
    /// Recheck after every update
    #[default]
    Always,
    /// Recheck only when the update committed at least one entry
    OnCommit,
}

/// Eventpool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventpoolConfig {
    /// Directory holding the write-ahead log; no log is kept when unset
    pub wal_dir: Option<PathBuf>,

    /// File name of the write-ahead log inside `wal_dir`
    pub wal_file_name: String,

    /// Fsync after every record
    pub wal_sync_on_write: bool,

    /// Byte budget of the pending store
    pub max_pool_bytes: u64,

    /// Maximum number of pending entries
    pub max_entries: usize,

    /// Dedup cache capacity (0 disables dedup)
    pub cache_size: usize,

    /// Maximum wire message size; the entry size bound is derived from it
    pub max_msg_size: usize,

    /// The application requires strictly ordered validation calls
    pub sequential_app: bool,

    /// Revalidate pending entries after an update
    pub recheck: bool,

    /// Which updates trigger a recheck
    pub recheck_trigger: RecheckTrigger,

    /// Bound of the validation request queue
    pub gateway_queue_depth: usize,
}

impl EventpoolConfig {
    /// Validate the eventpool section
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_pool_bytes == 0 {
            return Err(ConfigError::InvalidMaxPoolBytes);
        }

        if self.max_entries == 0 {
            return Err(ConfigError::InvalidMaxEntries);
        }

        if self.codec().max_entry_size() == 0 {
            return Err(ConfigError::MaxMsgSizeTooSmall(self.max_msg_size));
        }

        if self.gateway_queue_depth == 0 {
            return Err(ConfigError::InvalidQueueDepth);
        }

        if self.wal_dir.is_some() && self.wal_file_name.trim().is_empty() {
            return Err(ConfigError::InvalidWalFileName);
        }

        Ok(())
    }

    /// Full path of the write-ahead log, if one is configured
    pub fn wal_path(&self) -> Option<PathBuf> {
        self.wal_dir.as_ref().map(|dir| dir.join(&self.wal_file_name))
    }

    /// Envelope codec bound to `max_msg_size`
    pub fn codec(&self) -> EntryCodec {
        EntryCodec::new(self.max_msg_size)
    }

    /// Largest admissible entry payload
    pub fn max_entry_size(&self) -> usize {
        self.codec().max_entry_size()
    }
}

impl Default for EventpoolConfig {
    fn default() -> Self {
        Self {
            wal_dir: None,
            wal_file_name: "eventpool.wal".to_string(),
            wal_sync_on_write: false,
            max_pool_bytes: 1024 * 1024 * 1024, // 1 GiB
            max_entries: 5000,
            cache_size: 10_000,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            sequential_app: false,
            recheck: true,
            recheck_trigger: RecheckTrigger::Always,
            gateway_queue_depth: 1024,
        }
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json, compact)
    pub format: String,
}

impl LoggingConfig {
    /// Validate the logging section
    pub fn validate(&self) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.level.clone()));
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogFormat(self.format.clone()));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
