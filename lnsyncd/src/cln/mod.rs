//! A [`GraphSource`] backed by a Core Lightning node's `clnrest` plugin

pub mod convert;

use async_trait::async_trait;
use lnsync_core::model::NetworkGraph;
use lnsync_core::source::{GraphSource, SourceError};
#[allow(unused_imports)]
use log::{debug, info};
use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

use convert::{convert_channel, convert_node, ListChannelsResponse, ListNodesResponse};

/// Fetches the gossip view of a Core Lightning node over `clnrest`
#[derive(Clone, Debug)]
pub struct ClnRestSource {
    rpc: Client,
    url: Url,
    rune: Option<String>,
}

impl ClnRestSource {
    /// Create a source for the `clnrest` endpoint at `url`.
    ///
    /// `clnrest` usually serves a self-signed certificate, hence
    /// `accept_invalid_certs`.
    pub fn new(url: Url, rune: Option<String>, accept_invalid_certs: bool) -> Result<Self, SourceError> {
        let rpc = Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| SourceError::Http(e.to_string()))?;
        Ok(Self { rpc, url, rune })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/v1/{}", self.url.as_str().trim_end_matches('/'), method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str) -> Result<T, SourceError> {
        debug!("clnrest POST {}", method);
        let mut req = self.rpc.post(self.endpoint(method)).json(&serde_json::json!({}));
        if let Some(rune) = &self.rune {
            req = req.header("Rune", rune);
        }
        let res = req.send().await.map_err(|e| SourceError::Http(e.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(SourceError::Http(format!("{} returned {} {}", method, status, body)));
        }
        res.json::<T>().await.map_err(|e| SourceError::Decode(format!("{}: {}", method, e)))
    }
}

#[async_trait]
impl GraphSource for ClnRestSource {
    async fn network_graph(&self) -> Result<NetworkGraph, SourceError> {
        let nodes: ListNodesResponse = self.call("listnodes").await?;
        let channels: ListChannelsResponse = self.call("listchannels").await?;
        info!(
            "clnrest returned {} nodes and {} directional channels",
            nodes.nodes.len(),
            channels.channels.len()
        );
        Ok(NetworkGraph {
            nodes: nodes.nodes.iter().map(convert_node).collect(),
            edges: channels.channels.iter().map(convert_channel).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_test() {
        let url = Url::parse("https://127.0.0.1:3010").unwrap();
        let source = ClnRestSource::new(url, None, true).unwrap();
        assert_eq!(source.endpoint("listnodes"), "https://127.0.0.1:3010/v1/listnodes");

        let url = Url::parse("https://node.example/cln/").unwrap();
        let source = ClnRestSource::new(url, Some("rune".to_string()), false).unwrap();
        assert_eq!(source.endpoint("listchannels"), "https://node.example/cln/v1/listchannels");
    }

    #[tokio::test]
    async fn unreachable_test() {
        // nothing listens on the discard port
        let url = Url::parse("http://127.0.0.1:9").unwrap();
        let source = ClnRestSource::new(url, None, false).unwrap();
        match source.network_graph().await {
            Err(SourceError::Http(_)) => {}
            other => panic!("unexpected {:?}", other.map(|g| g.nodes.len())),
        }
    }
}
