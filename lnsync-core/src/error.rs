use thiserror::Error;

use crate::chain::ChainError;
use crate::persist::PersistError;
use crate::source::SourceError;
use crate::store::StoreError;

/// Sync engine errors.
///
/// None of these stop the service, every failure degrades to a retry on the
/// next scheduled cycle.
#[derive(Debug, Error)]
pub enum Error {
    /// The graph source returned an empty or unusable snapshot
    #[error("graph source unavailable: {0}")]
    TransientUpstream(String),
    /// The funding transaction of a channel cannot be resolved yet
    #[error("cannot find funding tx for channel {0}")]
    FundingLookupFailed(String),
    /// A store read or write failed
    #[error("store: {0}")]
    Persistence(#[from] StoreError),
    /// The persisted funding cache could not be loaded
    #[error("funding cache load: {0}")]
    CacheLoad(#[source] PersistError),
    /// A chain backend call failed
    #[error("chain: {0}")]
    Chain(#[from] ChainError),
    /// The graph source call failed
    #[error("graph source: {0}")]
    Source(#[from] SourceError),
}

/// Result alias
pub type Result<T> = core::result::Result<T, Error>;
