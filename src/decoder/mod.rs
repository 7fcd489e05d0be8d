mod block;
mod model;

pub use block::{
    decode_block, BlockRow, DecodeError, DecodedBlock, InputRow, OutputLookup, OutputRow,
    SpentOutput, TransactionRow, COINBASE_SPENT_TX_ID,
};
pub use model::{RawBlock, RawInput, RawOutput, RawTransaction, ScriptPubKey};
