use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bitcoin::Txid;
#[allow(unused_imports)]
use log::{debug, error, info, trace};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::chain::{ChainBlock, ChainClient};
use crate::error::{Error, Result};
use crate::persist::{FundingCacheMap, FundingCachePersist};
use crate::scid::ShortChannelId;
use crate::util::progress::ProgressLog;

/// Maximum number of blocks kept in the block cache
pub const BLOCKS_CACHE_MAX_SIZE: usize = 100;
/// Number of lowest heights evicted once the block cache overflows
pub const BLOCKS_CACHE_EVICTION: usize = 10;

const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// The funding transaction of a channel.
///
/// Chain data is immutable, so an entry never changes once resolved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingTx {
    /// Block time of the funding transaction
    pub timestamp: u64,
    /// Funding transaction id
    pub txid: Txid,
    /// Value of the funding output, in satoshi
    pub value: u64,
}

/// Recently fetched blocks, keyed by height
#[derive(Default)]
pub struct BlockCache {
    blocks: BTreeMap<u32, ChainBlock>,
}

impl BlockCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a block by height
    pub fn get(&self, height: u32) -> Option<&ChainBlock> {
        self.blocks.get(&height)
    }

    /// Whether a height is cached
    pub fn contains(&self, height: u32) -> bool {
        self.blocks.contains_key(&height)
    }

    /// Add a block, evicting the lowest heights in bulk if the cache overflows
    pub fn insert(&mut self, block: ChainBlock) {
        self.blocks.insert(block.height, block);
        if self.blocks.len() > BLOCKS_CACHE_MAX_SIZE {
            let lowest: Vec<u32> =
                self.blocks.keys().take(BLOCKS_CACHE_EVICTION).copied().collect();
            for height in lowest {
                self.blocks.remove(&height);
            }
        }
    }

    /// Number of cached blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Resolves short channel ids to their funding transaction.
///
/// Resolved entries are kept in memory and periodically written to a
/// [`FundingCachePersist`]. Writes run in the background and are never awaited
/// by the lookup loop; losing the latest increment on a crash only costs a
/// refetch.
pub struct FundingTxCache {
    chain: Arc<dyn ChainClient>,
    persister: Arc<dyn FundingCachePersist>,
    entries: FundingCacheMap,
    blocks: BlockCache,
    // lookups that failed since the last batch started
    failed: HashSet<String>,
    newly_resolved: usize,
    last_save: Instant,
    save_interval: Duration,
    log_interval: Duration,
    pending_save: Option<JoinHandle<()>>,
}

impl FundingTxCache {
    /// Create an empty cache. Call [`FundingTxCache::init`] to load persisted entries.
    pub fn new(chain: Arc<dyn ChainClient>, persister: Arc<dyn FundingCachePersist>) -> Self {
        Self {
            chain,
            persister,
            entries: FundingCacheMap::new(),
            blocks: BlockCache::new(),
            failed: HashSet::new(),
            newly_resolved: 0,
            last_save: Instant::now(),
            save_interval: DEFAULT_SAVE_INTERVAL,
            log_interval: DEFAULT_LOG_INTERVAL,
            pending_save: None,
        }
    }

    /// Override the persistence and progress log intervals
    pub fn with_intervals(mut self, save_interval: Duration, log_interval: Duration) -> Self {
        self.save_interval = save_interval;
        self.log_interval = log_interval;
        self
    }

    /// Load the persisted cache. An unreadable cache is logged and treated as empty.
    pub fn init(&mut self) {
        if let Err(e) = self.try_init() {
            error!("Unable to load the funding txs disk cache, starting from scratch: {}", e);
            self.entries = FundingCacheMap::new();
        }
    }

    /// Load the persisted cache, failing with [`Error::CacheLoad`] if it is unreadable
    pub fn try_init(&mut self) -> Result<()> {
        if !self.entries.is_empty() {
            return Ok(());
        }
        self.entries = self.persister.load().map_err(Error::CacheLoad)?;
        debug!("Imported {} funding txs from the disk cache", self.entries.len());
        Ok(())
    }

    /// Number of resolved entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry is resolved
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A resolved entry, without any chain lookup
    pub fn get(&self, scid: &ShortChannelId) -> Option<&FundingTx> {
        self.entries.get(&scid.to_string())
    }

    /// The block sub-cache
    pub fn block_cache(&self) -> &BlockCache {
        &self.blocks
    }

    /// Entries resolved from the chain since the current batch started
    pub fn newly_resolved(&self) -> usize {
        self.newly_resolved
    }

    /// Allow ids that failed earlier to be looked up again
    pub fn forget_failures(&mut self) {
        self.failed.clear();
    }

    /// Resolve a channel's funding transaction.
    ///
    /// `channel_id` may be in `HxTxO` or packed integer form. Returns None if
    /// the id does not parse or the transaction cannot be found right now; the
    /// caller should try again on a later cycle.
    pub async fn resolve(&mut self, channel_id: &str) -> Option<FundingTx> {
        let scid: ShortChannelId = match channel_id.parse() {
            Ok(scid) => scid,
            Err(e) => {
                debug!("{}", e);
                return None;
            }
        };
        let key = scid.to_string();
        if let Some(entry) = self.entries.get(&key) {
            return Some(entry.clone());
        }
        if self.failed.contains(&key) {
            return None;
        }
        match self.fetch(&scid).await {
            Ok(entry) => {
                self.entries.insert(key, entry.clone());
                self.newly_resolved += 1;
                Some(entry)
            }
            Err(e) => {
                error!(
                    "{}. Possible reasons are: chain backend timeout or the channel short id is not valid",
                    e
                );
                self.failed.insert(key);
                None
            }
        }
    }

    async fn fetch(&mut self, scid: &ShortChannelId) -> Result<FundingTx> {
        let height = scid.block_height;
        let (timestamp, txid) = match self.blocks.get(height) {
            Some(block) => locate_tx(scid, block)?,
            None => {
                let hash = self.chain.get_block_hash(height).await?.ok_or_else(|| {
                    Error::FundingLookupFailed(format!("{}: no block at height {}", scid, height))
                })?;
                let block = self.chain.get_block(&hash).await?;
                // the insert may evict this very block, so read it first
                let located = locate_tx(scid, &block);
                self.blocks.insert(block);
                located?
            }
        };
        let raw = self.chain.get_raw_transaction(&txid).await?;
        let tx = self.chain.decode_raw_transaction(&raw).await?;
        let value = tx
            .vout
            .get(scid.output_index as usize)
            .and_then(|output| output.value)
            .ok_or_else(|| {
                Error::FundingLookupFailed(format!(
                    "{}: tx {} has no value at output {}",
                    scid, txid, scid.output_index
                ))
            })?;
        trace!("resolved {} to {}:{} value {}", scid, txid, scid.output_index, value);
        Ok(FundingTx { timestamp, txid, value })
    }

    /// Resolve each id in turn, persisting the cache periodically and at the end.
    ///
    /// Results are aligned with `channel_ids`.
    pub async fn resolve_batch(&mut self, channel_ids: &[String]) -> Vec<Option<FundingTx>> {
        self.forget_failures();
        self.begin_batch();
        let started = Instant::now();
        let mut progress = ProgressLog::new(self.log_interval);
        let mut results = Vec::with_capacity(channel_ids.len());
        for (processed, channel_id) in channel_ids.iter().enumerate() {
            results.push(self.resolve(channel_id).await);
            progress.tick(|| {
                info!(
                    "Indexing channels funding tx {} of {} ({:.2}%) | elapsed: {} seconds",
                    processed + 1,
                    channel_ids.len(),
                    (processed + 1) as f64 * 100.0 / channel_ids.len() as f64,
                    started.elapsed().as_secs()
                )
            });
            self.maybe_persist();
        }
        self.finish_batch();
        results
    }

    /// Start counting newly resolved entries and restart the save timer
    pub fn begin_batch(&mut self) {
        self.newly_resolved = 0;
        self.last_save = Instant::now();
    }

    /// Persist if the save interval elapsed
    pub fn maybe_persist(&mut self) {
        if self.last_save.elapsed() > self.save_interval {
            self.persist();
            self.last_save = Instant::now();
        }
    }

    /// Persist if anything was resolved since the batch started
    pub fn finish_batch(&mut self) {
        if self.newly_resolved > 0 {
            info!("Indexed {} additional channels funding tx", self.newly_resolved);
            self.persist();
            self.newly_resolved = 0;
        }
    }

    /// Write a snapshot of the cache in the background.
    ///
    /// Writes are chained, so an older snapshot never overwrites a newer one.
    /// Outside a tokio runtime the write happens inline.
    pub fn persist(&mut self) {
        debug!("Saving {} funding txs cache into disk", self.entries.len());
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                if let Err(e) = self.persister.save(&self.entries) {
                    error!("Unable to save the funding txs disk cache: {}", e);
                }
                return;
            }
        };
        let snapshot = self.entries.clone();
        let persister = Arc::clone(&self.persister);
        let previous = self.pending_save.take();
        self.pending_save = Some(handle.spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            match tokio::task::spawn_blocking(move || persister.save(&snapshot)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Unable to save the funding txs disk cache: {}", e),
                Err(e) => error!("funding txs cache save task failed: {}", e),
            }
        }));
    }

    /// Wait for background writes to complete
    pub async fn flush(&mut self) {
        if let Some(pending) = self.pending_save.take() {
            let _ = pending.await;
        }
    }
}

fn locate_tx(scid: &ShortChannelId, block: &ChainBlock) -> Result<(u64, Txid)> {
    block.tx.get(scid.tx_index as usize).map(|txid| (block.time, *txid)).ok_or_else(|| {
        Error::FundingLookupFailed(format!(
            "{}: block {} has {} transactions",
            scid,
            block.height,
            block.tx.len()
        ))
    })
}
