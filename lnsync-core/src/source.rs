use core::fmt::{self, Display, Formatter};

use async_trait::async_trait;

use crate::model::NetworkGraph;

/// Graph source errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The source could not be reached
    Http(String),
    /// The response could not be decoded
    Decode(String),
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Http(s) => write!(f, "http: {}", s),
            SourceError::Decode(s) => write!(f, "decode: {}", s),
        }
    }
}

impl std::error::Error for SourceError {}

/// Provides snapshots of the network graph, e.g. from a Lightning node
#[async_trait]
pub trait GraphSource: Send + Sync {
    /// Fetch the full graph
    async fn network_graph(&self) -> Result<NetworkGraph, SourceError>;
}
