use crate::decoder::{
    BlockRow, DecodedBlock, InputRow, OutputLookup, OutputRow, SpentOutput, TransactionRow,
};
use crate::repository::r#trait::{Checkpoint, CheckpointAdvance, Repository};
use crate::types::AppError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory image of the store. One lock over the whole state keeps
/// `insert_block` atomic the same way a database transaction does.
#[derive(Default)]
struct MemoryState {
    blocks: BTreeMap<u64, BlockRow>,
    transactions: HashMap<String, TransactionRow>,
    outputs: HashMap<(String, u32), OutputRow>,
    inputs: HashMap<(String, u32), InputRow>,
    checkpoints: Vec<Checkpoint>,
    missed_blocks: BTreeSet<u64>,
    snapshots: HashMap<String, Value>,
}

#[derive(Clone, Default)]
pub struct MemoryRepository {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn block_count(&self) -> usize {
        self.state.read().await.blocks.len()
    }

    pub async fn block_at_height(&self, height: u64) -> Option<BlockRow> {
        self.state.read().await.blocks.get(&height).cloned()
    }

    pub async fn transaction(&self, tx_id: &str) -> Option<TransactionRow> {
        self.state.read().await.transactions.get(tx_id).cloned()
    }

    pub async fn input(&self, tx_id: &str, input_index: u32) -> Option<InputRow> {
        self.state
            .read()
            .await
            .inputs
            .get(&(tx_id.to_string(), input_index))
            .cloned()
    }

    pub async fn node_snapshot(&self, kind: &str) -> Option<Value> {
        self.state.read().await.snapshots.get(kind).cloned()
    }
}

#[async_trait]
impl OutputLookup for MemoryRepository {
    async fn lookup_output(
        &self,
        tx_id: &str,
        output_index: u32,
    ) -> Result<Option<SpentOutput>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .outputs
            .get(&(tx_id.to_string(), output_index))
            .map(|o| SpentOutput {
                value: o.value,
                recipients: o.recipients.clone(),
            }))
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_synced_block_height(&self) -> Result<u64, AppError> {
        let state = self.state.read().await;
        Ok(state.blocks.keys().next_back().copied().unwrap_or(0))
    }

    async fn insert_block(
        &self,
        block: &DecodedBlock,
        advance: Option<CheckpointAdvance>,
    ) -> Result<(), AppError> {
        let mut state = self.state.write().await;

        let height = block.block.height;
        if !state.blocks.contains_key(&height) {
            state.blocks.insert(height, block.block.clone());
            for t in &block.transactions {
                state.transactions.entry(t.tx_id.clone()).or_insert_with(|| t.clone());
            }
            for o in &block.outputs {
                state
                    .outputs
                    .entry((o.tx_id.clone(), o.output_index))
                    .or_insert_with(|| o.clone());
            }
            for i in &block.inputs {
                state
                    .inputs
                    .entry((i.tx_id.clone(), i.input_index))
                    .or_insert_with(|| i.clone());
            }
        }

        if let Some(advance) = advance {
            if advance.finished {
                state
                    .checkpoints
                    .retain(|c| c.chunk_start != advance.chunk_start);
            } else if let Some(checkpoint) = state
                .checkpoints
                .iter_mut()
                .find(|c| c.chunk_start == advance.chunk_start)
            {
                checkpoint.last_committed = advance.last_committed as i64;
            }
        }

        Ok(())
    }

    async fn get_checkpoint(&self, chunk_start: u64) -> Result<Option<Checkpoint>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .checkpoints
            .iter()
            .find(|c| c.chunk_start == chunk_start)
            .cloned())
    }

    async fn create_checkpoint_if_absent(
        &self,
        chunk_start: u64,
        chunk_end: u64,
    ) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if !state.checkpoints.iter().any(|c| c.chunk_start == chunk_start) {
            state.checkpoints.push(Checkpoint {
                chunk_start,
                chunk_end,
                last_committed: chunk_start as i64 - 1,
            });
        }
        Ok(())
    }

    async fn get_unfinished_checkpoints(&self) -> Result<Vec<Checkpoint>, AppError> {
        let state = self.state.read().await;
        // Newest first, so the resume pass replays the latest interruption first.
        Ok(state.checkpoints.iter().rev().cloned().collect())
    }

    async fn add_missed_block(&self, height: u64) -> Result<(), AppError> {
        self.state.write().await.missed_blocks.insert(height);
        Ok(())
    }

    async fn get_missed_blocks(&self) -> Result<Vec<u64>, AppError> {
        let state = self.state.read().await;
        Ok(state.missed_blocks.iter().copied().collect())
    }

    async fn store_node_snapshot(&self, kind: &str, payload: &Value) -> Result<(), AppError> {
        self.state
            .write()
            .await
            .snapshots
            .insert(kind.to_string(), payload.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checkpoint_creation_is_idempotent() {
        let repo = MemoryRepository::new();
        repo.create_checkpoint_if_absent(100, 199).await.unwrap();
        repo.create_checkpoint_if_absent(100, 199).await.unwrap();

        let checkpoints = repo.get_unfinished_checkpoints().await.unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(
            checkpoints[0],
            Checkpoint {
                chunk_start: 100,
                chunk_end: 199,
                last_committed: 99,
            }
        );
    }

    #[tokio::test]
    async fn unfinished_checkpoints_come_back_newest_first() {
        let repo = MemoryRepository::new();
        repo.create_checkpoint_if_absent(0, 99).await.unwrap();
        repo.create_checkpoint_if_absent(100, 199).await.unwrap();
        repo.create_checkpoint_if_absent(200, 299).await.unwrap();

        let starts: Vec<u64> = repo
            .get_unfinished_checkpoints()
            .await
            .unwrap()
            .iter()
            .map(|c| c.chunk_start)
            .collect();
        assert_eq!(starts, vec![200, 100, 0]);
    }

    #[tokio::test]
    async fn fresh_checkpoint_next_height_is_chunk_start() {
        let repo = MemoryRepository::new();
        repo.create_checkpoint_if_absent(0, 99).await.unwrap();

        let checkpoint = repo.get_checkpoint(0).await.unwrap().unwrap();
        assert_eq!(checkpoint.last_committed, -1);
        assert_eq!(checkpoint.next_height(), 0);
        assert!(!checkpoint.is_finished());
    }
}
