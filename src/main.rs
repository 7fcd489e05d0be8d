use log::{error, info};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use zindexer::config::Settings;
use zindexer::repository::repository_from_settings;
use zindexer::rpc::{SharedRpc, ZcashClient};
use zindexer::shutdown::shutdown_signal;
use zindexer::sync::{run_chain_info_refresh_loop, run_peer_refresh_loop, Syncer};
use zindexer::types::AppError;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("zindexer starting...");

    // 2. Load configuration
    let settings = Settings::new().map_err(|e| AppError::Config(e.to_string()))?;
    info!("Configuration loaded.");

    // 3. Initialize the repository (connects and creates the schema)
    let repository = repository_from_settings(&settings).await?;
    if settings.memory_db {
        info!("Using MemoryRepository (memory_db = true)");
    } else {
        info!("Using PostgresRepository (memory_db = false)");
    }

    // 4. One RPC client shared by the sync engine and the monitors
    let rpc: SharedRpc = Arc::new(Mutex::new(Box::new(ZcashClient::new(
        settings.rpc_url.clone(),
        settings.rpc_user.clone(),
        settings.rpc_password.clone(),
    ))));

    // 5. Build the sync engine
    let syncer = Arc::new(Syncer::new(
        rpc.clone(),
        repository.clone(),
        settings.block_chunk_processing_size,
    ));

    // 6. Start the background loops
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut sync_handle = tokio::spawn(syncer.clone().run_sync_loop(stop_rx.clone()));
    let peer_handle = tokio::spawn(run_peer_refresh_loop(
        rpc.clone(),
        repository.clone(),
        stop_rx.clone(),
    ));
    let chain_info_handle = tokio::spawn(run_chain_info_refresh_loop(
        rpc,
        repository,
        stop_rx,
    ));

    // 7. Run until a shutdown signal arrives or the sync engine dies
    tokio::select! {
        _ = shutdown_signal() => {
            info!("Stopping background loops...");
            let _ = stop_tx.send(true);
        }
        result = &mut sync_handle => {
            // The sync loop only returns early on a fatal failure.
            match result {
                Ok(Err(e)) => error!("Sync engine terminated: {}", e),
                Err(e) => error!("Sync engine panicked: {}", e),
                Ok(Ok(())) => error!("Sync engine exited unexpectedly"),
            }
            std::process::exit(1);
        }
    }

    // 8. Let the loops finish their current pass
    let _ = sync_handle.await;
    let _ = peer_handle.await;
    let _ = chain_info_handle.await;

    info!("zindexer exited cleanly.");
    Ok(())
}
