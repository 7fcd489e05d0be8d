use crate::decoder::{DecodedBlock, OutputLookup};
use crate::types::AppError;
use async_trait::async_trait;
use serde_json::Value;

/// Durable record of one chunk's plan and progress. Rows exist only while a
/// chunk is open or in progress; finishing a chunk removes its row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub chunk_start: u64,
    pub chunk_end: u64,
    /// Highest height committed for this chunk, `chunk_start - 1` if none.
    pub last_committed: i64,
}

impl Checkpoint {
    /// First height that still needs to be persisted.
    pub fn next_height(&self) -> u64 {
        (self.last_committed + 1) as u64
    }

    pub fn is_finished(&self) -> bool {
        self.last_committed >= 0 && self.last_committed as u64 == self.chunk_end
    }
}

/// Checkpoint update applied in the same transaction as a block's rows.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointAdvance {
    pub chunk_start: u64,
    pub last_committed: u64,
    /// The chunk's final block: close the checkpoint instead of advancing it.
    pub finished: bool,
}

/// Storage surface of the sync engine. Implementations must keep
/// `insert_block` atomic: the block's rows and the checkpoint update land
/// together or not at all.
#[async_trait]
pub trait Repository: OutputLookup + Send + Sync {
    /// Highest indexed block height, 0 when the store is empty.
    async fn get_synced_block_height(&self) -> Result<u64, AppError>;

    /// Writes one decoded block. Already-present rows are left untouched, so
    /// replaying a height over a previous commit is harmless.
    async fn insert_block(
        &self,
        block: &DecodedBlock,
        advance: Option<CheckpointAdvance>,
    ) -> Result<(), AppError>;

    async fn get_checkpoint(&self, chunk_start: u64) -> Result<Option<Checkpoint>, AppError>;

    async fn create_checkpoint_if_absent(
        &self,
        chunk_start: u64,
        chunk_end: u64,
    ) -> Result<(), AppError>;

    /// Unfinished checkpoints, newest first, for the resume pass.
    async fn get_unfinished_checkpoints(&self) -> Result<Vec<Checkpoint>, AppError>;

    async fn add_missed_block(&self, height: u64) -> Result<(), AppError>;

    async fn get_missed_blocks(&self) -> Result<Vec<u64>, AppError>;

    /// Upserts the latest monitoring payload (`peers`, `chain_info`) by kind.
    async fn store_node_snapshot(&self, kind: &str, payload: &Value) -> Result<(), AppError>;
}
