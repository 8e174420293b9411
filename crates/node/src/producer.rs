//! Local block loop.
//!
//! Stands in for consensus on a single node: reaps pending entries, executes
//! them against the application, persists the results and state, then
//! applies the block to the eventpool.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};
use txflow_eventpool::{Application, Eventpool};
use txflow_state::{State, StateStore};
use txflow_types::ExecutionResults;

/// What one produced block contained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockSummary {
    /// Block height
    pub height: u64,
    /// Entries included
    pub entries: usize,
    /// Entries whose execution failed
    pub failed: usize,
    /// Entries still pending after the update
    pub pending: usize,
}

/// Produces blocks from an eventpool on top of persisted state
pub struct BlockProducer {
    pool: Eventpool,
    app: Arc<dyn Application>,
    store: StateStore,
    state: State,
    max_entries: Option<usize>,
}

impl BlockProducer {
    /// Continue from `state`, which must be the latest saved state
    pub fn new(pool: Eventpool, app: Arc<dyn Application>, store: StateStore, state: State) -> Self {
        Self {
            pool,
            app,
            store,
            state,
            max_entries: None,
        }
    }

    /// Cap the number of entries per block
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Latest state
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Produce the next block, or `None` when nothing is pending
    pub async fn produce_block(&mut self) -> Result<Option<BlockSummary>> {
        let max_bytes = u64::try_from(self.state.consensus_params.block.max_bytes).ok();
        let entries = self.pool.reap(max_bytes, self.max_entries);
        if entries.is_empty() {
            return Ok(None);
        }

        let height = self.state.last_block_height + 1;
        let mut responses = Vec::with_capacity(entries.len());
        for entry in &entries {
            responses.push(self.app.deliver_entry(entry).await);
        }
        let commit = self.app.commit().await;
        let results = ExecutionResults::new(responses);
        let failed = results.deliver_entries.iter().filter(|r| !r.is_ok()).count();

        // Results must be durable before the state that refers to them
        self.store
            .save_execution_results(height, &results)
            .context("failed to persist execution results")?;

        let mut next = self.state.clone();
        next.last_block_height = height;
        next.last_validators = next.validators.clone();
        next.validators = next.next_validators.clone();
        next.app_hash = commit.data.to_vec();
        self.store.save_state(&next).context("failed to persist state")?;
        self.state = next;

        self.pool
            .update(height, &entries, Some(&results))
            .await
            .context("eventpool update failed")?;

        let summary = BlockSummary {
            height,
            entries: entries.len(),
            failed,
            pending: self.pool.size(),
        };
        debug!(?summary, "produced block");
        info!(
            height,
            entries = summary.entries,
            failed,
            pending = summary.pending,
            app_hash = %hex_prefix(&self.state.app_hash),
            "Committed block"
        );
        Ok(Some(summary))
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(8)])
}

impl std::fmt::Debug for BlockProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockProducer")
            .field("height", &self.state.last_block_height)
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}
