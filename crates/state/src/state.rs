//! Latest-state snapshot, validator sets and genesis bootstrap

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::{Result, StateError};

/// A consensus participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// Validator address
    #[serde(with = "hex_bytes")]
    pub address: Vec<u8>,
    /// Public key bytes
    #[serde(with = "hex_bytes")]
    pub pub_key: Vec<u8>,
    /// Voting power
    pub voting_power: u64,
}

/// Ordered set of validators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    /// Validators sorted by address
    pub validators: Vec<Validator>,
}

impl ValidatorSet {
    /// Build a set, sorting by address
    pub fn new(mut validators: Vec<Validator>) -> Self {
        validators.sort_by(|a, b| a.address.cmp(&b.address));
        Self { validators }
    }

    /// Number of validators
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Check if the set has no validators
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Sum of voting power
    pub fn total_voting_power(&self) -> u64 {
        self.validators.iter().map(|v| v.voting_power).sum()
    }

    /// Look up a validator by address
    pub fn get(&self, address: &[u8]) -> Option<&Validator> {
        self.validators.iter().find(|v| v.address == address)
    }
}

/// Block size limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockParams {
    /// Maximum block size in bytes
    pub max_bytes: i64,
    /// Maximum gas per block, -1 for unlimited
    pub max_gas: i64,
}

impl Default for BlockParams {
    fn default() -> Self {
        Self {
            max_bytes: 22_020_096,
            max_gas: -1,
        }
    }
}

/// Evidence retention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceParams {
    /// Maximum age of evidence in blocks
    pub max_age: i64,
}

impl Default for EvidenceParams {
    fn default() -> Self {
        Self { max_age: 100_000 }
    }
}

/// Accepted validator key types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorParams {
    /// Key type names
    pub pub_key_types: Vec<String>,
}

impl Default for ValidatorParams {
    fn default() -> Self {
        Self {
            pub_key_types: vec!["ed25519".to_string()],
        }
    }
}

/// Parameters the chain agrees on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Block limits
    #[serde(default)]
    pub block: BlockParams,
    /// Evidence limits
    #[serde(default)]
    pub evidence: EvidenceParams,
    /// Validator key rules
    #[serde(default)]
    pub validator: ValidatorParams,
}

impl ConsensusParams {
    /// Reject parameters no chain could run with
    pub fn validate(&self) -> Result<()> {
        if self.block.max_bytes <= 0 {
            return Err(StateError::InvalidGenesis(format!(
                "block.max_bytes must be positive, got {}",
                self.block.max_bytes
            )));
        }
        if self.block.max_gas < -1 {
            return Err(StateError::InvalidGenesis(format!(
                "block.max_gas must be -1 or non-negative, got {}",
                self.block.max_gas
            )));
        }
        if self.evidence.max_age <= 0 {
            return Err(StateError::InvalidGenesis(format!(
                "evidence.max_age must be positive, got {}",
                self.evidence.max_age
            )));
        }
        if self.validator.pub_key_types.is_empty() {
            return Err(StateError::InvalidGenesis(
                "validator.pub_key_types must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Validator entry of a genesis document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    /// Validator address
    #[serde(with = "hex_bytes")]
    pub address: Vec<u8>,
    /// Public key bytes
    #[serde(with = "hex_bytes")]
    pub pub_key: Vec<u8>,
    /// Voting power
    pub power: u64,
    /// Human readable name
    #[serde(default)]
    pub name: String,
}

/// Initial chain description, read from JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisDoc {
    /// Chain identifier
    pub chain_id: String,
    /// Initial consensus params; defaults when absent
    #[serde(default)]
    pub consensus_params: Option<ConsensusParams>,
    /// Initial validators
    #[serde(default)]
    pub validators: Vec<GenesisValidator>,
    /// Initial application hash
    #[serde(default, with = "hex_bytes")]
    pub app_hash: Vec<u8>,
}

impl GenesisDoc {
    /// Parse a genesis document from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StateError::InvalidGenesis(e.to_string()))
    }

    /// Read and parse a genesis file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check the document is usable
    pub fn validate(&self) -> Result<()> {
        if self.chain_id.is_empty() {
            return Err(StateError::InvalidGenesis("chain_id must not be empty".into()));
        }
        if let Some(params) = &self.consensus_params {
            params.validate()?;
        }
        for validator in &self.validators {
            if validator.power == 0 {
                return Err(StateError::InvalidGenesis(format!(
                    "validator {} has zero power",
                    hex::encode(&validator.address)
                )));
            }
        }
        Ok(())
    }

    fn validator_set(&self) -> ValidatorSet {
        ValidatorSet::new(
            self.validators
                .iter()
                .map(|v| Validator {
                    address: v.address.clone(),
                    pub_key: v.pub_key.clone(),
                    voting_power: v.power,
                })
                .collect(),
        )
    }
}

/// Latest committed chain state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Chain identifier
    pub chain_id: String,
    /// Height of the last committed block, 0 before the first
    pub last_block_height: u64,
    /// Validators for the next block
    pub next_validators: ValidatorSet,
    /// Validators for the current block
    pub validators: ValidatorSet,
    /// Validators of the last committed block
    pub last_validators: ValidatorSet,
    /// Height at which the validator set last changed
    pub last_height_validators_changed: u64,
    /// Current consensus params
    pub consensus_params: ConsensusParams,
    /// Height at which the consensus params last changed
    pub last_height_consensus_params_changed: u64,
    /// Application hash after the last block
    #[serde(with = "hex_bytes")]
    pub app_hash: Vec<u8>,
}

impl State {
    /// State before the first block of a chain
    pub fn from_genesis(genesis: &GenesisDoc) -> Result<Self> {
        genesis.validate()?;
        let validators = genesis.validator_set();

        info!(
            chain_id = %genesis.chain_id,
            validators = validators.len(),
            "Built genesis state"
        );

        Ok(Self {
            chain_id: genesis.chain_id.clone(),
            last_block_height: 0,
            next_validators: validators.clone(),
            validators,
            last_validators: ValidatorSet::default(),
            last_height_validators_changed: 1,
            consensus_params: genesis.consensus_params.clone().unwrap_or_default(),
            last_height_consensus_params_changed: 1,
            app_hash: genesis.app_hash.clone(),
        })
    }

    /// Serialize for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StateError::Serialization(e.to_string()))
    }
}

pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
