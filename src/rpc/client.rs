use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

/// All RPC traffic funnels through one client instance behind this mutex.
pub type SharedRpc = Arc<Mutex<Box<dyn NodeRpc>>>;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("node error {code}: {message}")]
  Node { code: i64, message: String },
}

impl RpcError {
  /// The node answers the tip query with these while it replays its block
  /// index on startup; the caller should re-poll instead of giving up.
  pub fn is_node_warming_up(&self) -> bool {
    match self {
      RpcError::Node { message, .. } => {
        message.contains("Loading block index") || message.contains("Verifying blocks")
      }
      _ => false,
    }
  }
}

/// Node-side JSON-RPC surface consumed by the sync engine and the monitors.
#[async_trait]
pub trait NodeRpc: Send + Sync {
  async fn get_block_count(&self) -> Result<u64, RpcError>;

  /// A null result (unknown height) is `None`, not an error.
  async fn get_block(&self, height: u64, verbosity: u8) -> Result<Option<Value>, RpcError>;

  async fn get_peer_info(&self) -> Result<Value, RpcError>;

  async fn get_blockchain_info(&self) -> Result<Value, RpcError>;
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
  #[serde(default)]
  result: Option<Value>,
  #[serde(default)]
  error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
  code: i64,
  message: String,
}

#[derive(Clone)]
pub struct ZcashClient {
  client: Client,
  rpc_url: String,
  rpc_user: Option<String>,
  rpc_password: Option<String>,
}

impl ZcashClient {
  pub fn new(rpc_url: String, rpc_user: Option<String>, rpc_password: Option<String>) -> Self {
    Self {
      client: Client::new(),
      rpc_url,
      rpc_user,
      rpc_password,
    }
  }

  async fn call_method(&self, method: &str, params: Value) -> Result<Value, RpcError> {
    let payload = json!({
      "jsonrpc": "1.0",
      "id": "zindexer",
      "method": method,
      "params": params,
    });

    let mut request = self.client.post(&self.rpc_url).json(&payload);
    if let Some(user) = &self.rpc_user {
      request = request.basic_auth(user, self.rpc_password.as_deref());
    }

    let envelope = request.send().await?.json::<RpcEnvelope>().await?;

    if let Some(error) = envelope.error {
      return Err(RpcError::Node {
        code: error.code,
        message: error.message,
      });
    }

    Ok(envelope.result.unwrap_or(Value::Null))
  }
}

#[async_trait]
impl NodeRpc for ZcashClient {
  async fn get_block_count(&self) -> Result<u64, RpcError> {
    let result = self.call_method("getblockcount", json!([])).await?;
    result.as_u64().ok_or(RpcError::Node {
      code: 0,
      message: format!("getblockcount returned a non-integer result: {}", result),
    })
  }

  async fn get_block(&self, height: u64, verbosity: u8) -> Result<Option<Value>, RpcError> {
    // The node expects the height as a string parameter.
    let result = self
      .call_method("getblock", json!([height.to_string(), verbosity]))
      .await?;

    if result.is_null() {
      return Ok(None);
    }

    Ok(Some(result))
  }

  async fn get_peer_info(&self) -> Result<Value, RpcError> {
    self.call_method("getpeerinfo", json!([])).await
  }

  async fn get_blockchain_info(&self) -> Result<Value, RpcError> {
    self.call_method("getblockchaininfo", json!([])).await
  }
}
