use crate::repository::Repository;
use crate::rpc::SharedRpc;
use crate::sync::downloader::BlockDownloader;
use crate::sync::persister::{persist_chunk, ChunkPlan};
use crate::types::{AppError, BlockHeight};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::sleep;

/// Pause between sync attempts of the outer loop.
const SYNC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Pause between tip re-polls while the node is replaying its block index.
const TIP_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Drives the whole sync pipeline: decides how far the store lags behind the
/// chain tip, partitions the gap into chunks, and fans the chunks out to
/// persistence workers under a bounded concurrency cap.
pub struct Syncer {
    rpc: SharedRpc,
    repository: Arc<dyn Repository>,
    downloader: BlockDownloader,
    chunk_size: u64,
    max_workers: usize,
    sync_in_progress: AtomicBool,
    /// Held by the outer loop across one whole sync attempt.
    cs_sync: Mutex<()>,
}

impl Syncer {
    pub fn new(rpc: SharedRpc, repository: Arc<dyn Repository>, chunk_size: u64) -> Self {
        let max_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            downloader: BlockDownloader::new(rpc.clone(), repository.clone()),
            rpc,
            repository,
            chunk_size: chunk_size.max(1),
            max_workers,
            sync_in_progress: AtomicBool::new(false),
            cs_sync: Mutex::new(()),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn is_syncing(&self) -> bool {
        self.sync_in_progress.load(Ordering::SeqCst)
    }

    /// One full sync pass: resume unfinished checkpoints, then index whatever
    /// the store still lags behind the chain tip. Re-entrant calls return
    /// immediately.
    pub async fn sync(&self) -> Result<(), AppError> {
        if self.sync_in_progress.swap(true, Ordering::SeqCst) {
            info!("[Syncer] Sync already in progress, skipping.");
            return Ok(());
        }

        let result = self.sync_inner().await;
        self.sync_in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn sync_inner(&self) -> Result<(), AppError> {
        // TODO: replay heights from missed_blocks once the recovery pass lands.
        self.sync_unfinished_checkpoints().await?;

        let chain_tip = self.load_chain_height().await?;
        let latest_synced = self.repository.get_synced_block_height().await?;
        let num_new_blocks = chain_tip.saturating_sub(latest_synced);

        if num_new_blocks == 0 {
            info!("[Syncer] No new blocks mined, store is up to date at {}.", latest_synced);
            return Ok(());
        }

        if num_new_blocks >= self.chunk_size {
            // A fresh store starts from the genesis block itself.
            let start = if latest_synced == 0 { 0 } else { latest_synced + 1 };
            info!("[Syncer] Syncing path: by range [{}, {}]", start, chain_tip);
            self.sync_range(true, start, chain_tip).await?;
        } else {
            let heights: Vec<BlockHeight> = (latest_synced + 1..=chain_tip).collect();
            info!("[Syncer] Syncing path: by height list {}..={}", latest_synced + 1, chain_tip);
            self.sync_list(&heights).await?;
        }

        let latest_synced = self.repository.get_synced_block_height().await?;
        info!("[Syncer] Sync complete, latest synced height: {}", latest_synced);
        Ok(())
    }

    /// Replays every unfinished checkpoint, newest interruption first.
    async fn sync_unfinished_checkpoints(&self) -> Result<(), AppError> {
        let checkpoints = self.repository.get_unfinished_checkpoints().await?;
        if checkpoints.is_empty() {
            return Ok(());
        }

        info!("[Syncer] Checkpoints to complete: {}", checkpoints.len());
        for cp in checkpoints {
            info!("[Syncer] Resuming checkpoint ({}, {}, {})", cp.chunk_start, cp.chunk_end, cp.last_committed);
            self.sync_range(true, cp.chunk_start, cp.chunk_end).await?;
        }

        Ok(())
    }

    /// Chunked concurrent sync over `[start, end]`. An existing checkpoint for
    /// `start` turns the first chunk into a resume: its boundaries come from
    /// the checkpoint and downloading begins after the last committed height.
    async fn sync_range(
        &self,
        track_checkpoints: bool,
        start: BlockHeight,
        end: BlockHeight,
    ) -> Result<(), AppError> {
        let mut resumed = self.repository.get_checkpoint(start).await?;
        let mut workers: JoinSet<Result<(), AppError>> = JoinSet::new();
        let mut next_chunk_start = start;

        while next_chunk_start <= end {
            let (chunk_start, chunk_end, skip_until) = match resumed.take() {
                Some(checkpoint) => (
                    checkpoint.chunk_start,
                    checkpoint.chunk_end,
                    checkpoint.next_height(),
                ),
                None => {
                    let chunk_start = next_chunk_start;
                    let chunk_end = end.min(chunk_start + self.chunk_size - 1);
                    if track_checkpoints {
                        self.repository
                            .create_checkpoint_if_absent(chunk_start, chunk_end)
                            .await?;
                    }
                    (chunk_start, chunk_end, chunk_start)
                }
            };

            let blocks = self.downloader.download_range(skip_until, chunk_end).await?;

            // Admission control: wait for a completed worker before exceeding
            // the concurrency cap.
            while workers.len() >= self.max_workers {
                match workers.join_next().await {
                    Some(result) => Self::log_worker_result(result),
                    None => break,
                }
            }

            info!("[Syncer] Processing new chunk of blocks starting at height {}", skip_until);
            let plan = ChunkPlan {
                track_checkpoint: track_checkpoints,
                chunk_start,
                chunk_end,
                skip_until_height: skip_until,
            };
            let repository = self.repository.clone();
            workers.spawn(async move { persist_chunk(repository, plan, blocks).await });

            next_chunk_start = chunk_end + 1;
        }

        // All chunks dispatched; wait for the stragglers.
        while let Some(result) = workers.join_next().await {
            Self::log_worker_result(result);
        }

        if !workers.is_empty() {
            return Err(AppError::Invariant(
                "persistence workers still in flight after the join pass".to_string(),
            ));
        }

        Ok(())
    }

    /// Untracked single-worker sync over an explicit height list, used when
    /// the store trails the tip by less than one chunk.
    async fn sync_list(&self, heights: &[BlockHeight]) -> Result<(), AppError> {
        let Some((&first, &last)) = heights.first().zip(heights.last()) else {
            return Ok(());
        };

        if heights.len() as u64 > self.chunk_size {
            return Err(AppError::Invariant(format!(
                "refusing to download more than {} blocks at a time",
                self.chunk_size
            )));
        }

        let blocks = self.downloader.download(heights).await?;

        let plan = ChunkPlan {
            track_checkpoint: false,
            chunk_start: first,
            chunk_end: last,
            skip_until_height: first,
        };
        let repository = self.repository.clone();
        let mut workers: JoinSet<Result<(), AppError>> = JoinSet::new();
        workers.spawn(async move { persist_chunk(repository, plan, blocks).await });

        while let Some(result) = workers.join_next().await {
            Self::log_worker_result(result);
        }

        Ok(())
    }

    /// Reads the chain tip, re-polling while the node is still starting up.
    /// Any other failure here is unrecoverable for the engine.
    async fn load_chain_height(&self) -> Result<BlockHeight, AppError> {
        loop {
            let result = { self.rpc.lock().await.get_block_count().await };
            match result {
                Ok(count) => return Ok(count),
                Err(e) if e.is_node_warming_up() => {
                    warn!("[Syncer] Node is loading its block index, re-polling the tip...");
                    sleep(TIP_RETRY_DELAY).await;
                }
                Err(e) => return Err(AppError::FatalRpc(e.to_string())),
            }
        }
    }

    /// False while a sync is running; otherwise refreshes both cursors and
    /// reports whether the store trails the chain tip.
    pub async fn should_sync(&self) -> Result<bool, AppError> {
        if self.is_syncing() {
            info!("[Syncer] Already syncing.");
            return Ok(false);
        }

        let chain_tip = self.load_chain_height().await?;
        let latest_synced = self.repository.get_synced_block_height().await?;

        if latest_synced < chain_tip {
            info!("[Syncer] Sync required: store at {}, chain at {}.", latest_synced, chain_tip);
            return Ok(true);
        }

        info!("[Syncer] No sync required.");
        Ok(false)
    }

    /// Outer loop: sync when needed, then sleep. Exits at the next loop
    /// boundary after `stop` flips; a fatal error exits immediately.
    pub async fn run_sync_loop(
        self: Arc<Self>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), AppError> {
        info!("[Syncer] Starting sync loop (interval {:?}, chunk size {}, max workers {})",
            SYNC_INTERVAL, self.chunk_size, self.max_workers);

        while !*stop.borrow() {
            {
                let _sync_lock = self.cs_sync.lock().await;

                let should_sync = match self.should_sync().await {
                    Ok(should_sync) => should_sync,
                    Err(e @ AppError::FatalRpc(_)) => return Err(e),
                    Err(e) => {
                        error!("[Syncer] Could not evaluate sync cursors: {}", e);
                        false
                    }
                };

                if should_sync {
                    match self.sync().await {
                        Ok(()) => {}
                        Err(e @ (AppError::FatalRpc(_) | AppError::Invariant(_))) => return Err(e),
                        Err(e) => error!("[Syncer] Sync failed: {}", e),
                    }
                }
            }

            tokio::select! {
                _ = sleep(SYNC_INTERVAL) => {}
                _ = stop.changed() => {}
            }
        }

        info!("[Syncer] Sync loop stopped.");
        Ok(())
    }

    fn log_worker_result(result: Result<Result<(), AppError>, tokio::task::JoinError>) {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("[Syncer] Persistence worker failed: {}", e),
            Err(e) => error!("[Syncer] Persistence worker panicked: {}", e),
        }
    }
}
