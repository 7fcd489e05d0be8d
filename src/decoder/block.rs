use crate::decoder::model::RawBlock;
use crate::types::AppError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

/// `spent_tx_id` sentinel for coinbase inputs, which reference no output.
pub const COINBASE_SPENT_TX_ID: &str = "-1";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed block document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Value and recipient set of an already-indexed transparent output.
#[derive(Debug, Clone, PartialEq)]
pub struct SpentOutput {
    pub value: Decimal,
    pub recipients: Vec<String>,
}

/// Read-through point query against persisted transparent outputs. Safe to
/// call from any number of persistence workers at once.
#[async_trait]
pub trait OutputLookup: Send + Sync {
    async fn lookup_output(
        &self,
        tx_id: &str,
        output_index: u32,
    ) -> Result<Option<SpentOutput>, AppError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockRow {
    pub hash: String,
    pub height: u64,
    pub timestamp: u64,
    pub nonce: String,
    pub version: i64,
    pub bits: String,
    pub difficulty: f64,
    pub merkle_root: String,
    pub chainwork: String,
    pub size: u64,
    pub num_transactions: u64,
    pub total_outputs: u64,
    pub total_inputs: u64,
    pub total_transparent_input: Decimal,
    pub total_transparent_output: Decimal,
    pub transaction_ids: Vec<String>,
    pub prev_block_hash: String,
    pub next_block_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRow {
    pub tx_id: String,
    pub block_hash: String,
    pub block_height: u64,
    pub block_timestamp: u64,
    pub version: i64,
    pub overwintered: bool,
    pub hex: String,
    pub num_inputs: u64,
    pub num_outputs: u64,
    pub total_public_input: Decimal,
    pub total_public_output: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub tx_id: String,
    pub output_index: u32,
    pub value: Decimal,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputRow {
    pub tx_id: String,
    pub input_index: u32,
    pub spent_tx_id: String,
    pub spent_output_index: u32,
    pub value: Decimal,
    pub senders: Vec<String>,
    pub coinbase: String,
}

/// Row sets produced from one verbose block document, ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBlock {
    pub block: BlockRow,
    pub transactions: Vec<TransactionRow>,
    pub outputs: Vec<OutputRow>,
    pub inputs: Vec<InputRow>,
}

impl DecodedBlock {
    pub fn height(&self) -> u64 {
        self.block.height
    }
}

/// Decodes one verbose block document into its row sets.
///
/// Outputs are taken straight from the document. Each non-coinbase input is
/// resolved through `lookup` to recover the value and sender set of the
/// output it spends; an output that is not indexed yet resolves to value 0
/// and an empty sender set. Decoding is all-or-nothing: a malformed document
/// rejects the whole block.
pub async fn decode_block<L>(raw: Value, lookup: &L) -> Result<DecodedBlock, AppError>
where
    L: OutputLookup + ?Sized,
{
    let raw: RawBlock = serde_json::from_value(raw).map_err(DecodeError::Malformed)?;

    let mut transactions = Vec::with_capacity(raw.tx.len());
    let mut outputs = Vec::new();
    let mut inputs = Vec::new();
    let mut transaction_ids = Vec::with_capacity(raw.tx.len());

    let mut total_outputs = 0u64;
    let mut total_inputs = 0u64;
    let mut total_transparent_input = Decimal::ZERO;
    let mut total_transparent_output = Decimal::ZERO;

    for tx in &raw.tx {
        let mut total_public_output = Decimal::ZERO;
        for out in &tx.vout {
            total_public_output += out.value;
            outputs.push(OutputRow {
                tx_id: tx.txid.clone(),
                output_index: out.n,
                value: out.value,
                recipients: out.script_pub_key.addresses.clone(),
            });
        }

        let mut total_public_input = Decimal::ZERO;
        for (input_index, vin) in tx.vin.iter().enumerate() {
            let input_index = input_index as u32;

            if let Some(coinbase) = &vin.coinbase {
                inputs.push(InputRow {
                    tx_id: tx.txid.clone(),
                    input_index,
                    spent_tx_id: COINBASE_SPENT_TX_ID.to_string(),
                    spent_output_index: 0,
                    value: Decimal::ZERO,
                    senders: Vec::new(),
                    coinbase: coinbase.clone(),
                });
                continue;
            }

            // An input missing its outpoint degrades the same way as one
            // whose referenced output is not indexed yet: zero value, no
            // senders, and the row is still emitted.
            let spent_tx_id = vin.txid.clone().unwrap_or_default();
            let spent_output_index = vin.vout.unwrap_or(0);
            let resolved = match (&vin.txid, vin.vout) {
                (Some(txid), Some(n)) => lookup.lookup_output(txid, n).await?,
                _ => None,
            };
            let (value, senders) = match resolved {
                Some(spent) => (spent.value, spent.recipients),
                None => (Decimal::ZERO, Vec::new()),
            };

            total_public_input += value;
            inputs.push(InputRow {
                tx_id: tx.txid.clone(),
                input_index,
                spent_tx_id,
                spent_output_index,
                value,
                senders,
                coinbase: String::new(),
            });
        }

        total_outputs += tx.vout.len() as u64;
        total_inputs += tx.vin.len() as u64;
        total_transparent_input += total_public_input;
        total_transparent_output += total_public_output;
        transaction_ids.push(tx.txid.clone());

        transactions.push(TransactionRow {
            tx_id: tx.txid.clone(),
            block_hash: raw.hash.clone(),
            block_height: raw.height,
            block_timestamp: raw.time,
            version: tx.version,
            overwintered: tx.overwintered,
            hex: tx.hex.clone(),
            num_inputs: tx.vin.len() as u64,
            num_outputs: tx.vout.len() as u64,
            total_public_input,
            total_public_output,
        });
    }

    let num_transactions = raw.tx.len() as u64;
    let block = BlockRow {
        hash: raw.hash,
        height: raw.height,
        timestamp: raw.time,
        nonce: raw.nonce,
        version: raw.version,
        bits: raw.bits,
        difficulty: raw.difficulty,
        merkle_root: raw.merkle_root,
        chainwork: raw.chainwork,
        size: raw.size,
        num_transactions,
        total_outputs,
        total_inputs,
        total_transparent_input,
        total_transparent_output,
        transaction_ids,
        prev_block_hash: raw.prev_block_hash.unwrap_or_default(),
        next_block_hash: raw.next_block_hash.unwrap_or_default(),
    };

    Ok(DecodedBlock {
        block,
        transactions,
        outputs,
        inputs,
    })
}
