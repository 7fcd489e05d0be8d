use crate::decoder::DecodeError;
use crate::rpc::RpcError;

pub type BlockHeight = u64;

// ====== Unified Error Type ======
#[derive(Debug, thiserror::Error)]
pub enum AppError {
  #[error("Configuration error: {0}")]
  Config(String),

  #[error("RPC client error: {0}")]
  Rpc(#[from] RpcError),

  #[error("Fatal RPC failure: {0}")]
  FatalRpc(String),

  #[error("Block decode error: {0}")]
  Decode(#[from] DecodeError),

  #[error("Database error: {0}")]
  Database(String),

  #[error("Sync invariant violated: {0}")]
  Invariant(String),
}

impl From<sqlx::Error> for AppError {
  fn from(err: sqlx::Error) -> Self {
    AppError::Database(format!("SQLx error: {}", err))
  }
}
