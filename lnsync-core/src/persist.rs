use core::fmt::{self, Display, Formatter};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::funding::FundingTx;

/// Funding cache contents, keyed by short channel id string
pub type FundingCacheMap = BTreeMap<String, FundingTx>;

/// Funding cache persistence errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    /// The backing storage could not be read or written
    Io(String),
    /// The stored cache does not decode
    Corrupt(String),
}

impl Display for PersistError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Io(s) => write!(f, "io: {}", s),
            PersistError::Corrupt(s) => write!(f, "corrupt: {}", s),
        }
    }
}

impl std::error::Error for PersistError {}

/// Durable storage for the funding transaction cache
pub trait FundingCachePersist: Send + Sync {
    /// Load the whole cache. A missing cache is an empty map.
    fn load(&self) -> Result<FundingCacheMap, PersistError>;

    /// Replace the stored cache with `cache`
    fn save(&self, cache: &FundingCacheMap) -> Result<(), PersistError>;
}

/// Keeps the saved cache in memory, for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryFundingCachePersist {
    saved: Mutex<FundingCacheMap>,
    saves: Mutex<usize>,
}

impl MemoryFundingCachePersist {
    /// Create an empty persister
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a persister pre-loaded with `cache`
    pub fn with_contents(cache: FundingCacheMap) -> Self {
        Self { saved: Mutex::new(cache), saves: Mutex::new(0) }
    }

    /// The last saved contents
    pub fn contents(&self) -> FundingCacheMap {
        self.saved.lock().unwrap().clone()
    }

    /// Number of completed saves
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

impl FundingCachePersist for MemoryFundingCachePersist {
    fn load(&self) -> Result<FundingCacheMap, PersistError> {
        Ok(self.saved.lock().unwrap().clone())
    }

    fn save(&self, cache: &FundingCacheMap) -> Result<(), PersistError> {
        *self.saved.lock().unwrap() = cache.clone();
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }
}
