//! TxFlow State Store
//!
//! Height-keyed persistence used alongside the eventpool:
//!
//! - **Database**: the [`StateDb`] key/value trait with an in-memory
//!   ([`MemDb`]) and a RocksDB ([`RocksDb`]) implementation
//! - **Store**: validator sets, consensus params and execution results keyed
//!   by height, with validator-set checkpointing
//! - **State**: the latest [`State`] snapshot and genesis bootstrap
//!
//! Decoding failures are reported as [`StateError::Corrupted`]. That error is
//! fatal: the stored data can no longer be trusted and the process must halt.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod db;
pub mod state;
pub mod store;

pub use db::{MemDb, RocksDb, StateDb};
pub use state::{
    BlockParams, ConsensusParams, EvidenceParams, GenesisDoc, GenesisValidator, State, Validator,
    ValidatorParams, ValidatorSet,
};
pub use store::{
    consensus_params_key, execution_results_key, validators_key, ConsensusParamsInfo, StateStore,
    ValidatorsInfo, STATE_KEY, VAL_SET_CHECKPOINT_INTERVAL,
};

use thiserror::Error;

/// State store error types
#[derive(Error, Debug)]
pub enum StateError {
    /// Stored data failed to decode. Fatal: callers must halt.
    #[error("state data corrupted at {key}: {reason}")]
    Corrupted {
        /// Key of the unreadable record
        key: String,
        /// Decoder message
        reason: String,
    },

    /// No validator set recorded for the height
    #[error("no validator set for height {0}")]
    NoValSetForHeight(u64),

    /// No consensus params recorded for the height
    #[error("no consensus params for height {0}")]
    NoConsensusParamsForHeight(u64),

    /// No execution results recorded for the height
    #[error("no execution results for height {0}")]
    NoExecutionResultsForHeight(u64),

    /// Height arguments are inconsistent
    #[error("invalid height: {0}")]
    InvalidHeight(String),

    /// Genesis document is unusable
    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),

    /// Backend database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StateError {
    /// Whether the error means stored data is unreadable and the process
    /// must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, StateError::Corrupted { .. })
    }
}

/// Result type for state store operations
pub type Result<T> = std::result::Result<T, StateError>;
