use std::str::FromStr;

use async_trait::async_trait;
use lnsync_core::bitcoin::consensus::deserialize;
use lnsync_core::bitcoin::{BlockHash, OutPoint, Transaction, Txid};
use lnsync_core::chain::{ChainBlock, ChainClient, ChainError, DecodedTransaction, SpendStatus};
use log::trace;
use reqwest::{Client, Response, StatusCode};
use url::Url;

use crate::convert::{EsploraBlockResponse, OutspendResponse};
use crate::Error;

/// Async client for the Esplora block explorer REST API
#[derive(Clone, Debug)]
pub struct EsploraClient {
    rpc: Client,
    url: Url,
}

impl EsploraClient {
    /// Create a new EsploraClient
    pub fn new(url: Url) -> Result<Self, Error> {
        let rpc = Client::builder().build().map_err(|e| Error::Esplora(e.to_string()))?;
        Ok(Self { rpc, url })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url.as_str().trim_end_matches('/'), path)
    }

    async fn send(&self, path: &str) -> Result<Response, Error> {
        trace!("esplora GET {}", path);
        let res = self
            .rpc
            .get(&self.endpoint(path))
            .send()
            .await
            .map_err(|e| Error::Esplora(e.to_string()))?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(path.to_string()));
        }
        if res.status().is_server_error() || res.status().is_client_error() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(Error::Esplora(format!("server error: {} {}", status, body)));
        }
        Ok(res)
    }

    async fn get<T: for<'a> serde::de::Deserialize<'a>>(&self, path: &str) -> Result<T, Error> {
        let res = self.send(path).await?;
        res.json::<T>().await.map_err(|e| Error::Esplora(e.to_string()))
    }

    async fn get_text(&self, path: &str) -> Result<String, Error> {
        let res = self.send(path).await?;
        res.text().await.map_err(|e| Error::Esplora(e.to_string()))
    }

    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, Error> {
        let res = self.send(path).await?;
        Ok(res.bytes().await.map_err(|e| Error::Esplora(e.to_string()))?.to_vec())
    }
}

fn decode_error(what: &str, e: impl std::fmt::Display) -> ChainError {
    ChainError::Decode(format!("{}: {}", what, e))
}

#[async_trait]
impl ChainClient for EsploraClient {
    async fn get_block_hash(&self, height: u32) -> Result<Option<BlockHash>, ChainError> {
        match self.get_text(&format!("block-height/{}", height)).await {
            Ok(hash) => BlockHash::from_str(hash.trim())
                .map(Some)
                .map_err(|e| decode_error("block hash", e)),
            // beyond the tip
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<ChainBlock, ChainError> {
        let block: EsploraBlockResponse = self.get(&format!("block/{}", hash)).await?;
        let txids: Vec<Txid> = self.get(&format!("block/{}/txids", hash)).await?;
        Ok(ChainBlock { height: block.height, time: block.timestamp, tx: txids })
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, ChainError> {
        Ok(self.get_bytes(&format!("tx/{}/raw", txid)).await?)
    }

    async fn decode_raw_transaction(&self, raw: &[u8]) -> Result<DecodedTransaction, ChainError> {
        let tx: Transaction = deserialize(raw).map_err(|e| decode_error("raw tx", e))?;
        Ok(DecodedTransaction::from(&tx))
    }

    async fn get_spend_status(&self, outpoints: &[OutPoint]) -> Result<Vec<SpendStatus>, ChainError> {
        let mut statuses = Vec::with_capacity(outpoints.len());
        for outpoint in outpoints {
            let outspend: OutspendResponse =
                self.get(&format!("tx/{}/outspend/{}", outpoint.txid, outpoint.vout)).await?;
            statuses.push(outspend.into());
        }
        Ok(statuses)
    }

    async fn get_chain_tip_height(&self) -> Result<u32, ChainError> {
        let height = self.get_text("blocks/tip/height").await?;
        height.trim().parse().map_err(|e| decode_error("tip height", e))
    }
}
