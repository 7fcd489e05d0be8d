use crate::repository::Repository;
use crate::rpc::SharedRpc;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

const PEER_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const CHAIN_INFO_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Periodically snapshots the node's peer list. Independent of sync state.
pub async fn run_peer_refresh_loop(
    rpc: SharedRpc,
    repository: Arc<dyn Repository>,
    mut stop: watch::Receiver<bool>,
) {
    info!("[PeerMonitor] Starting with refresh interval {:?}", PEER_REFRESH_INTERVAL);

    while !*stop.borrow() {
        let result = { rpc.lock().await.get_peer_info().await };
        match result {
            Ok(peers) => {
                if let Err(e) = repository.store_node_snapshot("peers", &peers).await {
                    error!("[PeerMonitor] Failed to store peer list: {}", e);
                }
            }
            Err(e) => warn!("[PeerMonitor] getpeerinfo failed: {}", e),
        }

        tokio::select! {
            _ = sleep(PEER_REFRESH_INTERVAL) => {}
            _ = stop.changed() => {}
        }
    }

    info!("[PeerMonitor] Loop stopped.");
}

/// Periodically snapshots `getblockchaininfo`. Independent of sync state.
pub async fn run_chain_info_refresh_loop(
    rpc: SharedRpc,
    repository: Arc<dyn Repository>,
    mut stop: watch::Receiver<bool>,
) {
    info!("[ChainInfoMonitor] Starting with refresh interval {:?}", CHAIN_INFO_REFRESH_INTERVAL);

    while !*stop.borrow() {
        let result = { rpc.lock().await.get_blockchain_info().await };
        match result {
            Ok(info) => {
                if let Err(e) = repository.store_node_snapshot("chain_info", &info).await {
                    error!("[ChainInfoMonitor] Failed to store chain info: {}", e);
                }
            }
            Err(e) => warn!("[ChainInfoMonitor] getblockchaininfo failed: {}", e),
        }

        tokio::select! {
            _ = sleep(CHAIN_INFO_REFRESH_INTERVAL) => {}
            _ = stop.changed() => {}
        }
    }

    info!("[ChainInfoMonitor] Loop stopped.");
}
