mod client;

pub use client::{NodeRpc, RpcError, SharedRpc, ZcashClient};
