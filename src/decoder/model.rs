use rust_decimal::Decimal;
use serde::Deserialize;

/// Verbose block document as returned by `getblock <height> 2`.
#[derive(Debug, Deserialize)]
pub struct RawBlock {
    pub hash: String,
    pub height: u64,
    pub time: u64,
    pub nonce: String,
    pub version: i64,
    pub bits: String,
    pub difficulty: f64,
    #[serde(rename = "merkleroot")]
    pub merkle_root: String,
    pub chainwork: String,
    pub size: u64,
    #[serde(default, rename = "previousblockhash")]
    pub prev_block_hash: Option<String>,
    #[serde(default, rename = "nextblockhash")]
    pub next_block_hash: Option<String>,
    pub tx: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct RawTransaction {
    pub txid: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub overwintered: bool,
    #[serde(default)]
    pub hex: String,
    #[serde(default)]
    pub vin: Vec<RawInput>,
    #[serde(default)]
    pub vout: Vec<RawOutput>,
}

/// One `vin` entry. Exactly one of `coinbase` or `(txid, vout)` is present.
#[derive(Debug, Deserialize)]
pub struct RawInput {
    #[serde(default)]
    pub coinbase: Option<String>,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RawOutput {
    pub value: Decimal,
    pub n: u32,
    #[serde(default, rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScriptPubKey {
    #[serde(default)]
    pub addresses: Vec<String>,
}
