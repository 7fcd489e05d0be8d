mod downloader;
mod monitor;
mod persister;
mod syncer;

pub use downloader::{BlockDownloader, BLOCK_DOWNLOAD_VERBOSE_LEVEL};
pub use monitor::{run_chain_info_refresh_loop, run_peer_refresh_loop};
pub use persister::{persist_chunk, ChunkPlan};
pub use syncer::Syncer;
