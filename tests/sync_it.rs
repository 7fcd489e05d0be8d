use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

use zindexer::decoder::decode_block;
use zindexer::repository::{CheckpointAdvance, MemoryRepository, Repository};
use zindexer::rpc::{NodeRpc, RpcError, SharedRpc};
use zindexer::sync::{run_chain_info_refresh_loop, run_peer_refresh_loop, Syncer};

/// Scripted node: a fixed tip, canned verbose block documents, and a set of
/// heights whose download fails.
struct MockNode {
  tip: u64,
  blocks: HashMap<u64, Value>,
  fail_heights: HashSet<u64>,
}

#[async_trait]
impl NodeRpc for MockNode {
  async fn get_block_count(&self) -> Result<u64, RpcError> {
    Ok(self.tip)
  }

  async fn get_block(&self, height: u64, _verbosity: u8) -> Result<Option<Value>, RpcError> {
    if self.fail_heights.contains(&height) {
      return Err(RpcError::Node {
        code: -32603,
        message: format!("failed to read block {}", height),
      });
    }
    Ok(self.blocks.get(&height).cloned())
  }

  async fn get_peer_info(&self) -> Result<Value, RpcError> {
    Ok(json!([]))
  }

  async fn get_blockchain_info(&self) -> Result<Value, RpcError> {
    Ok(json!({}))
  }
}

fn coinbase_txid(height: u64) -> String {
  format!("cb{:06}", height)
}

fn spend_txid(height: u64) -> String {
  format!("sp{:06}", height)
}

/// Every block carries a coinbase transaction; heights ending in 5 also spend
/// the coinbase output mined three blocks earlier (always in the same chunk
/// for the chunk sizes used here).
fn block_doc(height: u64) -> Value {
  let mut txs = vec![json!({
    "txid": coinbase_txid(height),
    "version": 4,
    "overwintered": true,
    "hex": "0400",
    "vin": [{"coinbase": format!("04{:04x}", height)}],
    "vout": [{"value": 6.25, "n": 0, "scriptPubKey": {"addresses": [format!("t1miner{}", height)]}}],
  })];

  if height % 10 == 5 {
    txs.push(json!({
      "txid": spend_txid(height),
      "version": 4,
      "overwintered": true,
      "hex": "0400",
      "vin": [{"txid": coinbase_txid(height - 3), "vout": 0}],
      "vout": [{"value": 6.0, "n": 0, "scriptPubKey": {"addresses": [format!("t1change{}", height)]}}],
    }));
  }

  json!({
    "hash": format!("hash{:06}", height),
    "height": height,
    "time": 1700000000u64 + height,
    "nonce": format!("{:08x}", height),
    "version": 4,
    "bits": "1f07ffff",
    "difficulty": 1.5,
    "merkleroot": format!("mr{:06}", height),
    "chainwork": format!("cw{:06}", height),
    "size": 1000 + height,
    "previousblockhash": if height > 0 { json!(format!("hash{:06}", height - 1)) } else { Value::Null },
    "tx": txs,
  })
}

fn make_node(tip: u64, fail_heights: &[u64]) -> MockNode {
  MockNode {
    tip,
    blocks: (0..=tip).map(|h| (h, block_doc(h))).collect(),
    fail_heights: fail_heights.iter().copied().collect(),
  }
}

fn setup(node: MockNode, chunk_size: u64) -> (Arc<Syncer>, Arc<MemoryRepository>) {
  let memory = Arc::new(MemoryRepository::new());
  let rpc: SharedRpc = Arc::new(Mutex::new(Box::new(node)));
  let syncer = Arc::new(Syncer::new(rpc, memory.clone(), chunk_size).with_max_workers(2));
  (syncer, memory)
}

#[tokio::test]
async fn empty_store_at_zero_tip_writes_nothing() {
  let (syncer, memory) = setup(make_node(0, &[]), 10);

  syncer.sync().await.unwrap();

  assert_eq!(memory.block_count().await, 0);
  assert_eq!(memory.get_synced_block_height().await.unwrap(), 0);
  assert!(memory.get_unfinished_checkpoints().await.unwrap().is_empty());
  assert!(!syncer.is_syncing());
}

#[tokio::test]
async fn short_gap_syncs_by_height_list_without_checkpoints() {
  let (syncer, memory) = setup(make_node(5, &[]), 10);

  syncer.sync().await.unwrap();

  // The list path covers latest_synced + 1 ..= tip, so the genesis block
  // stays out.
  assert_eq!(memory.block_count().await, 5);
  assert!(memory.block_at_height(0).await.is_none());
  for height in 1..=5 {
    assert!(memory.block_at_height(height).await.is_some());
  }
  assert_eq!(memory.get_synced_block_height().await.unwrap(), 5);
  assert!(memory.get_unfinished_checkpoints().await.unwrap().is_empty());
  assert!(memory.get_missed_blocks().await.unwrap().is_empty());
}

#[tokio::test]
async fn large_gap_syncs_by_range_and_finishes_every_checkpoint() {
  let (syncer, memory) = setup(make_node(250, &[]), 100);

  syncer.sync().await.unwrap();

  assert_eq!(memory.block_count().await, 251);
  assert_eq!(memory.get_synced_block_height().await.unwrap(), 250);
  assert!(memory.get_unfinished_checkpoints().await.unwrap().is_empty());
  assert!(memory.get_missed_blocks().await.unwrap().is_empty());

  // Block-level invariants on a block with two transactions.
  let block = memory.block_at_height(5).await.unwrap();
  assert_eq!(block.num_transactions, 2);
  assert_eq!(
    block.transaction_ids,
    vec![coinbase_txid(5), spend_txid(5)]
  );
  assert_eq!(block.total_outputs, 2);
  assert_eq!(block.total_inputs, 2);

  // The spend at height 5 references the coinbase output of height 2, which
  // commits earlier in the same chunk, so the input resolves fully.
  let input = memory.input(&spend_txid(5), 0).await.unwrap();
  assert_eq!(input.value, Decimal::from_str("6.25").unwrap());
  assert_eq!(input.senders, vec!["t1miner2".to_string()]);
  assert_eq!(input.spent_tx_id, coinbase_txid(2));

  let tx = memory.transaction(&spend_txid(5)).await.unwrap();
  assert_eq!(tx.total_public_input, Decimal::from_str("6.25").unwrap());
  assert_eq!(tx.total_public_output, Decimal::from_str("6").unwrap());

  // Coinbase inputs carry the sentinel outpoint and no value.
  let coinbase = memory.input(&coinbase_txid(5), 0).await.unwrap();
  assert_eq!(coinbase.spent_tx_id, "-1");
  assert_eq!(coinbase.spent_output_index, 0);
  assert_eq!(coinbase.value, Decimal::ZERO);
  assert!(coinbase.senders.is_empty());
  assert!(!coinbase.coinbase.is_empty());
}

#[tokio::test]
async fn resume_finishes_an_interrupted_chunk_without_duplicates() {
  let (syncer, memory) = setup(make_node(199, &[]), 100);

  // State after a crash mid-chunk: checkpoint (100, 199, 137) with blocks
  // 100..=137 already committed.
  memory.create_checkpoint_if_absent(100, 199).await.unwrap();
  for height in 100..=137 {
    let decoded = decode_block(block_doc(height), &*memory).await.unwrap();
    memory
      .insert_block(
        &decoded,
        Some(CheckpointAdvance {
          chunk_start: 100,
          last_committed: height,
          finished: false,
        }),
      )
      .await
      .unwrap();
  }
  let checkpoint = memory.get_checkpoint(100).await.unwrap().unwrap();
  assert_eq!(checkpoint.last_committed, 137);

  syncer.sync().await.unwrap();

  // The resume pass completed 138..=199; nothing below 138 was touched and
  // the checkpoint is gone.
  assert_eq!(memory.block_count().await, 100);
  for height in 100..=199 {
    assert!(memory.block_at_height(height).await.is_some());
  }
  assert!(memory.get_checkpoint(100).await.unwrap().is_none());
  assert!(memory.get_unfinished_checkpoints().await.unwrap().is_empty());
  assert_eq!(memory.get_synced_block_height().await.unwrap(), 199);
}

#[tokio::test]
async fn should_sync_tracks_the_gap_between_store_and_tip() {
  let (syncer, _memory) = setup(make_node(5, &[]), 10);

  assert!(syncer.should_sync().await.unwrap());
  syncer.sync().await.unwrap();
  assert!(!syncer.should_sync().await.unwrap());
}

#[tokio::test]
async fn monitor_loops_snapshot_node_state() {
  let memory = Arc::new(MemoryRepository::new());
  let rpc: SharedRpc = Arc::new(Mutex::new(Box::new(make_node(0, &[]))));

  let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
  let peer_handle = tokio::spawn(run_peer_refresh_loop(
    rpc.clone(),
    memory.clone(),
    stop_rx.clone(),
  ));
  let chain_info_handle = tokio::spawn(run_chain_info_refresh_loop(
    rpc,
    memory.clone(),
    stop_rx,
  ));

  // Both loops take their first snapshot immediately, then wait out their
  // interval; flipping the stop flag wakes and ends them.
  tokio::time::sleep(std::time::Duration::from_millis(50)).await;
  stop_tx.send(true).unwrap();
  peer_handle.await.unwrap();
  chain_info_handle.await.unwrap();

  assert_eq!(memory.node_snapshot("peers").await, Some(json!([])));
  assert_eq!(memory.node_snapshot("chain_info").await, Some(json!({})));
}

#[tokio::test]
async fn failed_download_is_recorded_as_missed_and_does_not_stall_the_chunk() {
  let (syncer, memory) = setup(make_node(100, &[42]), 50);

  syncer.sync().await.unwrap();

  assert!(memory.block_at_height(41).await.is_some());
  assert!(memory.block_at_height(42).await.is_none());
  assert!(memory.block_at_height(43).await.is_some());
  assert_eq!(memory.block_count().await, 100);
  assert_eq!(memory.get_missed_blocks().await.unwrap(), vec![42]);

  // The chunk covering 42 still finished: later blocks advanced its
  // checkpoint past the gap.
  assert!(memory.get_unfinished_checkpoints().await.unwrap().is_empty());

  // Height 45 spends the coinbase of the missing block 42, so its input
  // cannot resolve and falls back to zero value with no senders.
  let input = memory.input(&spend_txid(45), 0).await.unwrap();
  assert_eq!(input.value, Decimal::ZERO);
  assert!(input.senders.is_empty());
  assert_eq!(input.spent_tx_id, coinbase_txid(42));
}
