//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file at {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Byte budget of zero
    #[error("Invalid max_pool_bytes: must be non-zero")]
    InvalidMaxPoolBytes,

    /// Entry count bound of zero
    #[error("Invalid max_entries: must be non-zero")]
    InvalidMaxEntries,

    /// Message size too small to carry a single payload byte
    #[error("Invalid max_msg_size: {0} bytes cannot carry a one-byte entry")]
    MaxMsgSizeTooSmall(usize),

    /// Gateway queue depth of zero
    #[error("Invalid gateway_queue_depth: must be non-zero")]
    InvalidQueueDepth,

    /// Empty WAL file name
    #[error("Invalid wal_file_name: must not be empty")]
    InvalidWalFileName,

    /// Invalid log level
    #[error("Invalid log level: {0}. Valid values: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// Invalid log format
    #[error("Invalid log format: {0}. Valid values: pretty, json, compact")]
    InvalidLogFormat(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
