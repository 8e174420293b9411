//! Height-keyed records and state save/load.
//!
//! Validator sets are written in full only at the height they changed and at
//! every [`VAL_SET_CHECKPOINT_INTERVAL`] multiple. Other heights store just
//! the last change height, and a lookup follows it back to the nearest full
//! record. Consensus params are written in full only at the height they
//! changed. Execution results and the state itself are written durably.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use txflow_types::ExecutionResults;

use crate::db::StateDb;
use crate::state::{ConsensusParams, GenesisDoc, State, ValidatorSet};
use crate::{Result, StateError};

/// Validator sets are persisted in full at least this often
pub const VAL_SET_CHECKPOINT_INTERVAL: u64 = 100_000;

/// Key of the latest state
pub const STATE_KEY: &str = "stateKey";

/// Key of the validator record for a height
pub fn validators_key(height: u64) -> String {
    format!("validatorsKey:{height}")
}

/// Key of the consensus params record for a height
pub fn consensus_params_key(height: u64) -> String {
    format!("consensusParamsKey:{height}")
}

/// Key of the execution results for a height
pub fn execution_results_key(height: u64) -> String {
    format!("abciResponsesKey:{height}")
}

/// Validator record for one height
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorsInfo {
    /// Height at which the set last changed
    pub last_height_changed: u64,
    /// Full set, present only at change and checkpoint heights
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator_set: Option<ValidatorSet>,
}

/// Consensus params record for one height
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParamsInfo {
    /// Height at which the params last changed
    pub last_height_changed: u64,
    /// Full params, present only at the change height
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_params: Option<ConsensusParams>,
}

fn checkpoint_height(height: u64) -> u64 {
    height - height % VAL_SET_CHECKPOINT_INTERVAL
}

/// Height-keyed state persistence over a [`StateDb`]
#[derive(Clone)]
pub struct StateStore {
    db: Arc<dyn StateDb>,
}

impl StateStore {
    /// Wrap a backend
    pub fn new(db: Arc<dyn StateDb>) -> Self {
        Self { db }
    }

    /// Underlying backend
    pub fn db(&self) -> &Arc<dyn StateDb> {
        &self.db
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| StateError::Serialization(e.to_string()))
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(buf) = self.db.get(key.as_bytes())? else {
            return Ok(None);
        };
        if buf.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&buf).map(Some).map_err(|e| {
            warn!(key, error = %e, "stored record failed to decode");
            StateError::Corrupted {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Latest saved state, if any
    pub fn load_state(&self) -> Result<Option<State>> {
        self.read(STATE_KEY)
    }

    /// Persist `state` and the validator and params records it implies.
    ///
    /// The state record itself is written durably, after the height records.
    pub fn save_state(&self, state: &State) -> Result<()> {
        let next_height = state.last_block_height + 1;

        // Validators for the first block are recorded as changed at 1
        if next_height == 1 {
            self.save_validators_info(next_height, 1, &state.validators)?;
        }
        self.save_validators_info(
            next_height + 1,
            state.last_height_validators_changed,
            &state.next_validators,
        )?;
        self.save_consensus_params_info(
            next_height,
            state.last_height_consensus_params_changed,
            &state.consensus_params,
        )?;

        self.db.set_durable(STATE_KEY.as_bytes(), &state.to_bytes()?)?;
        debug!(height = state.last_block_height, "saved state");
        Ok(())
    }

    /// Load the saved state, or build it from `genesis` and save it
    pub fn load_state_or_genesis_doc(&self, genesis: &GenesisDoc) -> Result<State> {
        if let Some(state) = self.load_state()? {
            return Ok(state);
        }
        let state = State::from_genesis(genesis)?;
        self.save_state(&state)?;
        info!(chain_id = %state.chain_id, "Initialized state from genesis");
        Ok(state)
    }

    /// Load the saved state, or build it from the genesis file at `path`
    /// and save it. The file is read only when no state is saved.
    pub fn load_state_or_genesis_file(&self, path: impl AsRef<Path>) -> Result<State> {
        if let Some(state) = self.load_state()? {
            return Ok(state);
        }
        let genesis = GenesisDoc::from_file(path)?;
        self.load_state_or_genesis_doc(&genesis)
    }

    /// Record the validator set effective at `height`
    pub fn save_validators_info(
        &self,
        height: u64,
        last_height_changed: u64,
        validator_set: &ValidatorSet,
    ) -> Result<()> {
        if last_height_changed > height {
            return Err(StateError::InvalidHeight(format!(
                "validators last changed at {last_height_changed}, after height {height}"
            )));
        }
        let full = height == last_height_changed || height % VAL_SET_CHECKPOINT_INTERVAL == 0;
        let info = ValidatorsInfo {
            last_height_changed,
            validator_set: full.then(|| validator_set.clone()),
        };
        self.db
            .set(validators_key(height).as_bytes(), &Self::encode(&info)?)
    }

    /// Raw validator record at `height`
    pub fn load_validators_info(&self, height: u64) -> Result<Option<ValidatorsInfo>> {
        self.read(&validators_key(height))
    }

    /// Validator set effective at `height`
    pub fn load_validators(&self, height: u64) -> Result<ValidatorSet> {
        let info = self
            .load_validators_info(height)?
            .ok_or(StateError::NoValSetForHeight(height))?;
        if let Some(set) = info.validator_set {
            return Ok(set);
        }

        let stored_at = checkpoint_height(height).max(info.last_height_changed);
        let key = validators_key(stored_at);
        self.load_validators_info(stored_at)?
            .and_then(|info| info.validator_set)
            .ok_or_else(|| StateError::Corrupted {
                key,
                reason: format!("validator set for height {height} points at a record without one"),
            })
    }

    /// Record the consensus params effective at `height`
    pub fn save_consensus_params_info(
        &self,
        height: u64,
        last_height_changed: u64,
        params: &ConsensusParams,
    ) -> Result<()> {
        let info = ConsensusParamsInfo {
            last_height_changed,
            consensus_params: (height == last_height_changed).then(|| params.clone()),
        };
        self.db
            .set(consensus_params_key(height).as_bytes(), &Self::encode(&info)?)
    }

    /// Consensus params effective at `height`
    pub fn load_consensus_params(&self, height: u64) -> Result<ConsensusParams> {
        let info: ConsensusParamsInfo = self
            .read(&consensus_params_key(height))?
            .ok_or(StateError::NoConsensusParamsForHeight(height))?;
        if let Some(params) = info.consensus_params {
            return Ok(params);
        }

        let key = consensus_params_key(info.last_height_changed);
        let changed: Option<ConsensusParamsInfo> = self.read(&key)?;
        changed
            .and_then(|info| info.consensus_params)
            .ok_or_else(|| StateError::Corrupted {
                key,
                reason: format!("consensus params for height {height} point at a record without them"),
            })
    }

    /// Durably record the execution results of the block at `height`
    pub fn save_execution_results(&self, height: u64, results: &ExecutionResults) -> Result<()> {
        self.db
            .set_durable(execution_results_key(height).as_bytes(), &Self::encode(results)?)
    }

    /// Execution results of the block at `height`
    pub fn load_execution_results(&self, height: u64) -> Result<ExecutionResults> {
        self.read(&execution_results_key(height))?
            .ok_or(StateError::NoExecutionResultsForHeight(height))
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}
