//! # TxFlow Configuration
//!
//! All node settings live in one `txflow.toml` file. Every section has
//! defaults, so an empty file is a valid configuration.
//!
//! ## Usage
//!
//! ```rust
//! use txflow_config::{Config, RecheckTrigger};
//!
//! let config = Config::from_str(r#"
//!     [eventpool]
//!     max_pool_bytes = 1048576
//!     recheck_trigger = "on_commit"
//! "#).unwrap();
//!
//! assert_eq!(config.eventpool.max_pool_bytes, 1_048_576);
//! assert_eq!(config.eventpool.recheck_trigger, RecheckTrigger::OnCommit);
//! assert_eq!(config.logging.level, "info");
//! ```
//!
//! ## Configuration Sections
//!
//! - `[eventpool]` - Pool budgets, dedup cache, WAL location, gateway policy
//! - `[logging]` - Log level and output format

mod config;
mod error;

pub use config::*;
pub use error::*;
