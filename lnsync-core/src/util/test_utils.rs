use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, OutPoint, Txid};

use crate::chain::{ChainBlock, ChainClient, ChainError, DecodedOutput, DecodedTransaction, SpendStatus};
use crate::model::{DirectionalAnnouncement, NetworkGraph, NodeAddress, NodeAnnouncement, Policy};
use crate::scid::ShortChannelId;
use crate::source::{GraphSource, SourceError};

pub fn scid(block_height: u32, tx_index: u32, output_index: u16) -> ShortChannelId {
    ShortChannelId::new(block_height, tx_index, output_index).unwrap()
}

pub fn txid(n: u8) -> Txid {
    Txid::from_byte_array([n; 32])
}

pub fn txid_n(n: u32) -> Txid {
    let mut bytes = [0xaa; 32];
    bytes[..4].copy_from_slice(&n.to_le_bytes());
    Txid::from_byte_array(bytes)
}

pub fn pubkey(n: u8) -> String {
    format!("02{}", hex::encode([n; 32]))
}

fn block_hash(height: u32) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&height.to_le_bytes());
    BlockHash::from_byte_array(bytes)
}

fn block_height(hash: &BlockHash) -> u32 {
    let bytes = hash.to_byte_array();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[derive(Default)]
struct MockChainState {
    blocks: BTreeMap<u32, ChainBlock>,
    outputs: HashMap<Txid, Vec<Option<u64>>>,
    spends: HashMap<OutPoint, SpendStatus>,
    tip: u32,
    fail: bool,
    calls: usize,
    block_fetches: usize,
    spend_queries: usize,
}

/// An in-memory chain backend
#[derive(Default)]
pub struct MockChainClient {
    state: Mutex<MockChainState>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `txid` at the position `scid` points to, paying `value` at its output index
    pub fn add_funding(&self, scid: &ShortChannelId, txid: Txid, value: u64, block_time: u64) {
        let mut state = self.state.lock().unwrap();
        let height = scid.block_height;
        let block = state
            .blocks
            .entry(height)
            .or_insert_with(|| ChainBlock { height, time: block_time, tx: Vec::new() });
        while block.tx.len() <= scid.tx_index as usize {
            let filler = txid_n(height ^ (block.tx.len() as u32) << 8 ^ 0x5a5a_0000);
            block.tx.push(filler);
        }
        block.tx[scid.tx_index as usize] = txid;
        let outputs = state.outputs.entry(txid).or_default();
        while outputs.len() <= scid.output_index as usize {
            outputs.push(Some(0));
        }
        outputs[scid.output_index as usize] = Some(value);
        if height > state.tip {
            state.tip = height;
        }
    }

    pub fn clear_output_value(&self, txid: &Txid, vout: usize) {
        let mut state = self.state.lock().unwrap();
        if let Some(output) = state.outputs.get_mut(txid).and_then(|outputs| outputs.get_mut(vout)) {
            *output = None;
        }
    }

    /// Report `outpoint` as spent by `spending_txid`, confirmed at `block_time`
    pub fn set_spent(&self, outpoint: OutPoint, spending_txid: Txid, block_time: u64) {
        let status = SpendStatus {
            spent: true,
            confirmed: true,
            block_time: Some(block_time),
            spending_txid: Some(spending_txid),
        };
        self.state.lock().unwrap().spends.insert(outpoint, status);
    }

    /// Report `outpoint` as spent by an unconfirmed transaction
    pub fn set_spent_unconfirmed(&self, outpoint: OutPoint, spending_txid: Txid) {
        let status = SpendStatus {
            spent: true,
            confirmed: false,
            block_time: None,
            spending_txid: Some(spending_txid),
        };
        self.state.lock().unwrap().spends.insert(outpoint, status);
    }

    pub fn set_tip(&self, tip: u32) {
        self.state.lock().unwrap().tip = tip;
    }

    /// Make every call fail until reset
    pub fn fail_all_calls(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }

    /// Total number of calls, including failed ones
    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub fn block_fetch_count(&self) -> usize {
        self.state.lock().unwrap().block_fetches
    }

    pub fn spend_query_count(&self) -> usize {
        self.state.lock().unwrap().spend_queries
    }

    fn enter(&self) -> Result<std::sync::MutexGuard<'_, MockChainState>, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if state.fail {
            return Err(ChainError::Rpc("connection refused".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn get_block_hash(&self, height: u32) -> Result<Option<BlockHash>, ChainError> {
        let state = self.enter()?;
        Ok(state.blocks.get(&height).map(|b| block_hash(b.height)))
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<ChainBlock, ChainError> {
        let mut state = self.enter()?;
        state.block_fetches += 1;
        let height = block_height(hash);
        state.blocks.get(&height).cloned().ok_or_else(|| ChainError::NotFound(hash.to_string()))
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, ChainError> {
        let state = self.enter()?;
        if !state.outputs.contains_key(txid) {
            return Err(ChainError::NotFound(txid.to_string()));
        }
        Ok(txid.to_byte_array().to_vec())
    }

    async fn decode_raw_transaction(&self, raw: &[u8]) -> Result<DecodedTransaction, ChainError> {
        let state = self.enter()?;
        let bytes: [u8; 32] =
            raw.try_into().map_err(|_| ChainError::Decode("bad raw tx".to_string()))?;
        let txid = Txid::from_byte_array(bytes);
        let outputs =
            state.outputs.get(&txid).ok_or_else(|| ChainError::NotFound(txid.to_string()))?;
        Ok(DecodedTransaction {
            vout: outputs.iter().map(|value| DecodedOutput { value: *value }).collect(),
        })
    }

    async fn get_spend_status(&self, outpoints: &[OutPoint]) -> Result<Vec<SpendStatus>, ChainError> {
        let mut state = self.enter()?;
        state.spend_queries += 1;
        Ok(outpoints.iter().map(|o| state.spends.get(o).cloned().unwrap_or_default()).collect())
    }

    async fn get_chain_tip_height(&self) -> Result<u32, ChainError> {
        let state = self.enter()?;
        Ok(state.tip)
    }
}

/// A graph source serving a settable snapshot
#[derive(Default)]
pub struct MockGraphSource {
    graph: Mutex<NetworkGraph>,
    fail: Mutex<bool>,
}

impl MockGraphSource {
    pub fn new(graph: NetworkGraph) -> Self {
        Self { graph: Mutex::new(graph), fail: Mutex::new(false) }
    }

    pub fn set_graph(&self, graph: NetworkGraph) {
        *self.graph.lock().unwrap() = graph;
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl GraphSource for MockGraphSource {
    async fn network_graph(&self) -> Result<NetworkGraph, SourceError> {
        if *self.fail.lock().unwrap() {
            return Err(SourceError::Http("connection refused".to_string()));
        }
        Ok(self.graph.lock().unwrap().clone())
    }
}

pub fn make_policy(last_update: u64) -> Policy {
    Policy {
        time_lock_delta: 40,
        min_htlc: 1000,
        max_htlc: 990_000_000,
        fee_base: 1000,
        fee_rate_proportional: 100,
        disabled: false,
        last_update,
    }
}

pub fn make_announcement(
    scid: &str,
    source: &str,
    destination: &str,
    amount_msat: u64,
    last_update: u64,
) -> DirectionalAnnouncement {
    DirectionalAnnouncement {
        short_channel_id: scid.to_string(),
        source: source.to_string(),
        destination: destination.to_string(),
        amount_msat,
        policy: make_policy(last_update),
    }
}

pub fn make_node(public_key: &str, last_update: u64) -> NodeAnnouncement {
    NodeAnnouncement {
        public_key: public_key.to_string(),
        alias: format!("alias-{}", &public_key[..8]),
        color: "#3399ff".to_string(),
        features: Vec::new(),
        addresses: vec![NodeAddress {
            network: "ipv4".to_string(),
            addr: "203.0.113.7:9735".to_string(),
        }],
        custom_records: BTreeMap::new(),
        last_update,
    }
}
