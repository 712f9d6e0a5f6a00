use core::fmt::{self, Display, Formatter};

use async_trait::async_trait;
use bitcoin::{BlockHash, OutPoint, Txid};
use serde::{Deserialize, Serialize};

/// Chain backend errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Transport or RPC level error
    Rpc(String),
    /// Response could not be decoded
    Decode(String),
    /// The requested object does not exist
    NotFound(String),
}

impl Display for ChainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Rpc(s) => write!(f, "rpc: {}", s),
            ChainError::Decode(s) => write!(f, "decode: {}", s),
            ChainError::NotFound(s) => write!(f, "not found: {}", s),
        }
    }
}

impl std::error::Error for ChainError {}

/// A block summary, as returned by `getblock` with verbosity 1
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlock {
    /// Block height
    pub height: u32,
    /// Block timestamp
    pub time: u64,
    /// Transaction ids, in block order
    pub tx: Vec<Txid>,
}

/// A decoded transaction output
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedOutput {
    /// Output value in satoshi, if the backend reported one
    pub value: Option<u64>,
}

/// A decoded transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedTransaction {
    /// Outputs in order
    pub vout: Vec<DecodedOutput>,
}

impl From<&bitcoin::Transaction> for DecodedTransaction {
    fn from(tx: &bitcoin::Transaction) -> Self {
        let vout = tx.output.iter().map(|o| DecodedOutput { value: Some(o.value.to_sat()) }).collect();
        DecodedTransaction { vout }
    }
}

/// Spend status of an outpoint
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpendStatus {
    /// Whether the outpoint is spent
    pub spent: bool,
    /// Whether the spending transaction is confirmed
    pub confirmed: bool,
    /// Block time of the spending transaction, if confirmed
    pub block_time: Option<u64>,
    /// The spending transaction, if known
    pub spending_txid: Option<Txid>,
}

/// Read access to a bitcoin chain backend
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Hash of the block at `height` in the best chain, None if beyond the tip
    async fn get_block_hash(&self, height: u32) -> Result<Option<BlockHash>, ChainError>;

    /// Block summary for a hash
    async fn get_block(&self, hash: &BlockHash) -> Result<ChainBlock, ChainError>;

    /// Serialized transaction
    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, ChainError>;

    /// Decode a serialized transaction
    async fn decode_raw_transaction(&self, raw: &[u8]) -> Result<DecodedTransaction, ChainError>;

    /// Spend status of each outpoint, in the same order
    async fn get_spend_status(&self, outpoints: &[OutPoint]) -> Result<Vec<SpendStatus>, ChainError>;

    /// Height of the best chain tip
    async fn get_chain_tip_height(&self) -> Result<u32, ChainError>;
}
