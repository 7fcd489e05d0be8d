use crate::repository::Repository;
use crate::rpc::SharedRpc;
use crate::types::{AppError, BlockHeight};
use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;

/// Verbosity passed to `getblock`: full transaction objects with decoded
/// script addresses.
pub const BLOCK_DOWNLOAD_VERBOSE_LEVEL: u8 = 2;

/// Fetches verbose block documents for the persistence workers. A failed or
/// null download becomes a `None` slot plus a missed-height row; it never
/// aborts the batch. Results keep the order and length of the request.
pub struct BlockDownloader {
    rpc: SharedRpc,
    repository: Arc<dyn Repository>,
}

impl BlockDownloader {
    pub fn new(rpc: SharedRpc, repository: Arc<dyn Repository>) -> Self {
        Self { rpc, repository }
    }

    pub async fn download_range(
        &self,
        start: BlockHeight,
        end: BlockHeight,
    ) -> Result<Vec<Option<Value>>, AppError> {
        debug!("[Downloader] Downloading blocks {} through {}", start, end);

        // One lock for the whole batch keeps block downloads from interleaving
        // with the tip query and the monitoring calls.
        let rpc = self.rpc.lock().await;

        let mut blocks = Vec::with_capacity((end - start + 1) as usize);
        for height in start..=end {
            blocks.push(self.fetch_one(&**rpc, height).await?);
        }

        Ok(blocks)
    }

    pub async fn download(&self, heights: &[BlockHeight]) -> Result<Vec<Option<Value>>, AppError> {
        debug!("[Downloader] Downloading {} blocks by height list", heights.len());

        let rpc = self.rpc.lock().await;

        let mut blocks = Vec::with_capacity(heights.len());
        for &height in heights {
            blocks.push(self.fetch_one(&**rpc, height).await?);
        }

        Ok(blocks)
    }

    async fn fetch_one(
        &self,
        rpc: &dyn crate::rpc::NodeRpc,
        height: BlockHeight,
    ) -> Result<Option<Value>, AppError> {
        match rpc.get_block(height, BLOCK_DOWNLOAD_VERBOSE_LEVEL).await {
            Ok(Some(block)) => Ok(Some(block)),
            Ok(None) => {
                warn!("[Downloader] Node returned no block at height {}", height);
                self.repository.add_missed_block(height).await?;
                Ok(None)
            }
            Err(e) => {
                warn!("[Downloader] Failed to download block {}: {}", height, e);
                self.repository.add_missed_block(height).await?;
                Ok(None)
            }
        }
    }
}
