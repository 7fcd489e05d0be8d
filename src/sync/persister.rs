use crate::decoder::decode_block;
use crate::repository::{CheckpointAdvance, Repository};
use crate::types::{AppError, BlockHeight};
use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;

/// Bookkeeping for one chunk handed to a persistence worker.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlan {
    /// Whether this chunk has a checkpoint row to advance as blocks commit.
    pub track_checkpoint: bool,
    /// Key of the chunk's checkpoint row.
    pub chunk_start: BlockHeight,
    pub chunk_end: BlockHeight,
    /// Heights below this were committed by an earlier run and are skipped.
    pub skip_until_height: BlockHeight,
}

/// Persistence worker body: decodes and commits a chunk's blocks in height
/// order. Every block lands atomically together with its checkpoint advance;
/// committing the chunk's final block closes the checkpoint. `None` slots are
/// downloads that already failed and were recorded as missed.
pub async fn persist_chunk(
    repository: Arc<dyn Repository>,
    plan: ChunkPlan,
    blocks: Vec<Option<Value>>,
) -> Result<(), AppError> {
    let mut committed = 0usize;

    for raw in blocks {
        let Some(raw) = raw else {
            continue;
        };

        if let Some(height) = raw.get("height").and_then(Value::as_u64) {
            if height < plan.skip_until_height {
                debug!("[Persister] Skipping already-committed block {}", height);
                continue;
            }
        }

        let decoded = decode_block(raw, &*repository).await?;
        let height = decoded.height();

        let advance = plan.track_checkpoint.then_some(CheckpointAdvance {
            chunk_start: plan.chunk_start,
            last_committed: height,
            finished: height == plan.chunk_end,
        });

        repository.insert_block(&decoded, advance).await?;
        committed += 1;
    }

    if committed == 0 {
        warn!(
            "[Persister] No blocks committed for chunk [{}, {}]",
            plan.chunk_start, plan.chunk_end
        );
    } else {
        debug!(
            "[Persister] Committed {} blocks for chunk [{}, {}]",
            committed, plan.chunk_start, plan.chunk_end
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;
    use serde_json::json;

    fn doc(height: u64) -> Value {
        json!({
            "hash": format!("hash{:03}", height),
            "height": height,
            "time": 1700000000u64 + height,
            "nonce": "00",
            "version": 4,
            "bits": "1f07ffff",
            "difficulty": 1.0,
            "merkleroot": "mr",
            "chainwork": "cw",
            "size": 500,
            "tx": [{
                "txid": format!("cb{:03}", height),
                "vin": [{"coinbase": "04ff"}],
                "vout": [{"value": 1.0, "n": 0, "scriptPubKey": {"addresses": []}}],
            }],
        })
    }

    #[tokio::test]
    async fn blocks_below_skip_until_height_are_not_reinserted() {
        let memory = Arc::new(MemoryRepository::new());
        memory.create_checkpoint_if_absent(10, 12).await.unwrap();

        // A replayed chunk can contain heights an earlier run already
        // committed; the plan's cursor keeps them out of the store.
        let plan = ChunkPlan {
            track_checkpoint: true,
            chunk_start: 10,
            chunk_end: 12,
            skip_until_height: 11,
        };
        let repository: Arc<dyn Repository> = memory.clone();
        persist_chunk(repository, plan, vec![Some(doc(10)), Some(doc(11)), Some(doc(12))])
            .await
            .unwrap();

        assert!(memory.block_at_height(10).await.is_none());
        assert!(memory.block_at_height(11).await.is_some());
        assert!(memory.block_at_height(12).await.is_some());
        // The chunk's final block closed the checkpoint.
        assert!(memory.get_checkpoint(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn none_slots_are_skipped_without_blocking_the_rest_of_the_chunk() {
        let memory = Arc::new(MemoryRepository::new());
        memory.create_checkpoint_if_absent(0, 2).await.unwrap();

        let plan = ChunkPlan {
            track_checkpoint: true,
            chunk_start: 0,
            chunk_end: 2,
            skip_until_height: 0,
        };
        let repository: Arc<dyn Repository> = memory.clone();
        persist_chunk(repository, plan, vec![Some(doc(0)), None, Some(doc(2))])
            .await
            .unwrap();

        assert!(memory.block_at_height(0).await.is_some());
        assert!(memory.block_at_height(1).await.is_none());
        assert!(memory.block_at_height(2).await.is_some());
        assert!(memory.get_checkpoint(0).await.unwrap().is_none());
    }
}
