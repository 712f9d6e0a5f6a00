use std::sync::Arc;

use async_trait::async_trait;
use jsonrpc_async::error::Error::Rpc;
use jsonrpc_async::simple_http::SimpleHttpTransport;
use jsonrpc_async::Client;
use lnsync_core::bitcoin::{BlockHash, OutPoint, Txid};
use lnsync_core::chain::{ChainBlock, ChainClient, ChainError, DecodedTransaction, SpendStatus};
use log::{self, error};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use url::Url;

use crate::convert::{spend_status_from_txout, BlockHeaderTime, JsonResponse};
use crate::Error;

/// Async client for RPC to bitcoin core daemon
#[derive(Clone, Debug)]
pub struct BitcoindClient {
    rpc: Arc<Mutex<Client>>,
    host: String,
    port: u16,
}

/// BitcoindClient Error
pub type BitcoindClientResult<T> = Result<T, Error>;

impl BitcoindClient {
    /// Create a new BitcoindClient, taking credentials from the URL
    pub async fn new(url: Url) -> BitcoindClientResult<Self> {
        let host = url.host_str().unwrap_or("127.0.0.1").to_string();
        let port = url.port_or_known_default().unwrap_or(8332);
        let rpc_url = format!("http://{}:{}{}", host, port, url.path());
        let mut builder = SimpleHttpTransport::builder()
            .url(&rpc_url)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        if !url.username().is_empty() {
            builder = builder.auth(url.username(), url.password());
        }
        let rpc = Client::with_transport(builder.build());
        Ok(Self { rpc: Arc::new(Mutex::new(rpc)), host, port })
    }

    /// Make a getblockcount RPC call
    pub async fn get_block_count(&self) -> BitcoindClientResult<u64> {
        self.call("getblockcount", &[]).await
    }

    async fn call<T: for<'a> serde::de::Deserialize<'a>>(
        &self,
        cmd: &str,
        args: &[serde_json::Value],
    ) -> Result<T, Error> {
        let rpc = self.rpc.lock().await;
        let v_args: Vec<_> = args
            .iter()
            .map(serde_json::value::to_raw_value)
            .collect::<std::result::Result<_, serde_json::Error>>()?;
        let req = rpc.build_request(cmd, &v_args[..]);
        log::trace!("JSON-RPC request: {} {}", cmd, serde_json::Value::from(args));

        let res = rpc.send_request(req).await;
        let resp = res.map_err(Error::from);
        if let Err(ref err) = resp {
            error!("{}: {}:{}: {}", cmd, self.host, self.port, err);
        }
        Ok(resp?.result()?)
    }

    /// Block time of the current best block
    async fn get_tip_time(&self) -> Result<u64, Error> {
        let hash: String = self.call("getbestblockhash", &[]).await?;
        let header: BlockHeaderTime = self.call("getblockheader", &[json!(hash)]).await?;
        Ok(header.time)
    }

    async fn call_into<T>(&self, cmd: &str, args: &[serde_json::Value]) -> Result<T, Error>
    where
        JsonResponse: TryInto<T, Error = std::io::Error>,
    {
        let value: Value = self.call(cmd, args).await?;
        Ok(JsonResponse(value).try_into()?)
    }
}

#[async_trait]
impl ChainClient for BitcoindClient {
    async fn get_block_hash(&self, height: u32) -> Result<Option<BlockHash>, ChainError> {
        let result = self.call_into("getblockhash", &[json!(height)]).await;
        match result {
            Ok(r) => Ok(r),
            Err(e) => match e {
                // height out of range
                Error::JsonRpc(Rpc(ref rpce)) if rpce.code == -8 => Ok(None),
                _ => Err(e.into()),
            },
        }
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<ChainBlock, ChainError> {
        Ok(self.call_into("getblock", &[json!(hash.to_string()), json!(1)]).await?)
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, ChainError> {
        let raw: String = self.call("getrawtransaction", &[json!(txid.to_string())]).await?;
        hex::decode(&raw).map_err(|e| ChainError::Decode(format!("raw tx {}: {}", txid, e)))
    }

    async fn decode_raw_transaction(&self, raw: &[u8]) -> Result<DecodedTransaction, ChainError> {
        Ok(self.call_into("decoderawtransaction", &[json!(hex::encode(raw))]).await?)
    }

    async fn get_spend_status(&self, outpoints: &[OutPoint]) -> Result<Vec<SpendStatus>, ChainError> {
        let mut txouts = Vec::with_capacity(outpoints.len());
        for outpoint in outpoints {
            // mempool excluded, so a missing output was spent in a block
            let args = [json!(outpoint.txid.to_string()), json!(outpoint.vout), json!(false)];
            let txout: Value = self.call("gettxout", &args).await?;
            txouts.push(txout);
        }
        let tip_time = if txouts.iter().any(Value::is_null) { Some(self.get_tip_time().await?) } else { None };
        Ok(txouts.into_iter().map(|txout| spend_status_from_txout(JsonResponse(txout), tip_time)).collect())
    }

    async fn get_chain_tip_height(&self) -> Result<u32, ChainError> {
        let count = self.get_block_count().await?;
        u32::try_from(count).map_err(|e| ChainError::Decode(format!("block count {}: {}", count, e)))
    }
}
