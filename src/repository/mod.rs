mod memory;
mod postgresql;
mod r#trait;

pub use memory::MemoryRepository;
pub use postgresql::PostgresRepository;
pub use r#trait::{Checkpoint, CheckpointAdvance, Repository};

use crate::config::Settings;
use crate::types::AppError;
use std::sync::Arc;

/// Builds the backend selected by configuration. The Postgres path connects
/// the pool and idempotently creates the schema.
pub async fn repository_from_settings(
    settings: &Settings,
) -> Result<Arc<dyn Repository>, AppError> {
    if settings.memory_db {
        return Ok(Arc::new(MemoryRepository::new()));
    }
    Ok(Arc::new(
        PostgresRepository::connect(&settings.database_url()).await?,
    ))
}
