use std::io;
use std::str::FromStr;

use lnsync_core::bitcoin::{Amount, BlockHash, Txid};
use lnsync_core::chain::{ChainBlock, DecodedOutput, DecodedTransaction, SpendStatus};
use serde::Deserialize;

pub struct JsonResponse(pub serde_json::Value);

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

impl TryFrom<JsonResponse> for Option<BlockHash> {
    type Error = io::Error;

    fn try_from(item: JsonResponse) -> io::Result<Self> {
        match item.0.as_str() {
            None => Ok(None),
            Some(s) => Ok(Some(
                BlockHash::from_str(s).map_err(|e| invalid_data(format!("block hash: {}", e)))?,
            )),
        }
    }
}

/// Response data from `getblock` with verbosity 1
#[derive(Deserialize)]
struct GetBlockResponse {
    height: u32,
    time: u64,
    tx: Vec<String>,
}

impl TryFrom<JsonResponse> for ChainBlock {
    type Error = io::Error;

    fn try_from(item: JsonResponse) -> io::Result<Self> {
        let response: GetBlockResponse = serde_json::from_value(item.0)
            .map_err(|e| invalid_data(format!("invalid block response: {}", e)))?;
        let tx = response
            .tx
            .iter()
            .map(|s| Txid::from_str(s).map_err(|e| invalid_data(format!("txid {}: {}", s, e))))
            .collect::<io::Result<Vec<_>>>()?;
        Ok(ChainBlock { height: response.height, time: response.time, tx })
    }
}

#[derive(Deserialize)]
struct DecodedOutputResponse {
    value: Option<f64>,
}

/// Response data from `decoderawtransaction`, values in BTC
#[derive(Deserialize)]
struct DecodeRawTransactionResponse {
    vout: Vec<DecodedOutputResponse>,
}

impl TryFrom<JsonResponse> for DecodedTransaction {
    type Error = io::Error;

    fn try_from(item: JsonResponse) -> io::Result<Self> {
        let response: DecodeRawTransactionResponse = serde_json::from_value(item.0)
            .map_err(|e| invalid_data(format!("invalid transaction response: {}", e)))?;
        let vout = response
            .vout
            .iter()
            .map(|output| match output.value {
                Some(btc) => Amount::from_btc(btc)
                    .map(|amount| DecodedOutput { value: Some(amount.to_sat()) })
                    .map_err(|e| invalid_data(format!("output value {}: {}", btc, e))),
                None => Ok(DecodedOutput { value: None }),
            })
            .collect::<io::Result<Vec<_>>>()?;
        Ok(DecodedTransaction { vout })
    }
}

/// Spend status from a `gettxout` result queried without the mempool.
///
/// bitcoind only tracks unspent outputs, so a missing output was spent in a
/// block without revealing which one. `tip_time` is the time of the best
/// block, an upper bound on when the spend confirmed.
pub fn spend_status_from_txout(item: JsonResponse, tip_time: Option<u64>) -> SpendStatus {
    if item.0.is_null() {
        SpendStatus { spent: true, confirmed: true, block_time: tip_time, spending_txid: None }
    } else {
        SpendStatus::default()
    }
}

/// The `time` field of a `getblockheader` result
#[derive(Deserialize, Debug)]
pub struct BlockHeaderTime {
    pub time: u64,
}

#[derive(Deserialize, Debug)]
struct EsploraTxStatus {
    confirmed: bool,
    block_time: Option<u64>,
}

/// Response data from the Esplora `/tx/:txid/outspend/:vout` endpoint
#[derive(Deserialize, Debug)]
pub struct OutspendResponse {
    spent: bool,
    txid: Option<Txid>,
    status: Option<EsploraTxStatus>,
}

impl From<OutspendResponse> for SpendStatus {
    fn from(response: OutspendResponse) -> Self {
        let (confirmed, block_time) = match response.status {
            Some(status) if status.confirmed => (true, status.block_time),
            _ => (false, None),
        };
        SpendStatus { spent: response.spent, confirmed, block_time, spending_txid: response.txid }
    }
}

/// Response data from the Esplora `/block/:hash` endpoint
#[derive(Deserialize, Debug)]
pub struct EsploraBlockResponse {
    pub height: u32,
    pub timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TXID: &str = "c53dc7a2a0fa2d3a0a5ff3c62b4e7a2e3c0d5b5f4c51f1ab9a0d5e1b4f1c2d3e";

    #[test]
    fn block_hash_test() {
        let hash: Option<BlockHash> = JsonResponse(json!(
            "000000000000000000021fd8a6c2a1e9d8b4d5e6f7a8b9c0d1e2f3a4b5c6d7e8"
        ))
        .try_into()
        .unwrap();
        assert!(hash.is_some());
        let none: Option<BlockHash> = JsonResponse(json!(null)).try_into().unwrap();
        assert!(none.is_none());
        let bad: io::Result<Option<BlockHash>> = JsonResponse(json!("zz")).try_into();
        assert!(bad.is_err());
    }

    #[test]
    fn block_test() {
        let block: ChainBlock = JsonResponse(json!({
            "hash": "000000000000000000021fd8a6c2a1e9d8b4d5e6f7a8b9c0d1e2f3a4b5c6d7e8",
            "height": 700000,
            "time": 1631333672,
            "tx": [TXID],
        }))
        .try_into()
        .unwrap();
        assert_eq!(block.height, 700_000);
        assert_eq!(block.time, 1_631_333_672);
        assert_eq!(block.tx, vec![Txid::from_str(TXID).unwrap()]);

        let bad: io::Result<ChainBlock> = JsonResponse(json!({"height": 1})).try_into();
        assert!(bad.is_err());
    }

    #[test]
    fn decoded_transaction_test() {
        let tx: DecodedTransaction = JsonResponse(json!({
            "txid": TXID,
            "vout": [
                {"value": 0.005, "n": 0},
                {"value": 21.0, "n": 1},
                {"n": 2},
            ],
        }))
        .try_into()
        .unwrap();
        let values: Vec<_> = tx.vout.iter().map(|o| o.value).collect();
        assert_eq!(values, vec![Some(500_000), Some(2_100_000_000), None]);
    }

    #[test]
    fn txout_test() {
        let spent = spend_status_from_txout(JsonResponse(json!(null)), Some(1_700_000_000));
        assert!(spent.spent && spent.confirmed);
        assert_eq!(spent.block_time, Some(1_700_000_000));
        assert_eq!(spent.spending_txid, None);
        let unspent = spend_status_from_txout(JsonResponse(json!({"confirmations": 3})), Some(1_700_000_000));
        assert!(!unspent.spent && !unspent.confirmed);
        assert_eq!(unspent.block_time, None);
    }

    #[test]
    fn block_header_time_test() {
        let header: BlockHeaderTime = serde_json::from_value(json!({
            "hash": "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054",
            "height": 800000,
            "time": 1690168629,
            "mediantime": 1690165851
        }))
        .unwrap();
        assert_eq!(header.time, 1_690_168_629);
    }

    #[test]
    fn outspend_test() {
        let response: OutspendResponse = serde_json::from_value(json!({
            "spent": true,
            "txid": TXID,
            "vin": 0,
            "status": {"confirmed": true, "block_height": 800000, "block_time": 1690000000},
        }))
        .unwrap();
        let status = SpendStatus::from(response);
        assert!(status.spent && status.confirmed);
        assert_eq!(status.block_time, Some(1_690_000_000));
        assert_eq!(status.spending_txid, Some(Txid::from_str(TXID).unwrap()));

        let response: OutspendResponse = serde_json::from_value(json!({"spent": false})).unwrap();
        assert_eq!(SpendStatus::from(response), SpendStatus::default());

        let response: OutspendResponse = serde_json::from_value(json!({
            "spent": true,
            "txid": TXID,
            "status": {"confirmed": false},
        }))
        .unwrap();
        let status = SpendStatus::from(response);
        assert!(status.spent && !status.confirmed);
    }
}
