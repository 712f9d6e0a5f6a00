//! The periodic graph synchronization loop.
//!
//! Each cycle pulls a snapshot from the [`GraphSource`], upserts nodes and
//! channels, deactivates whatever the snapshot no longer contains, backfills
//! creation and first-seen dates and finally scans the chain for closed
//! channels. Cycles run strictly one after the other.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bitcoin::OutPoint;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use tokio::time;
use triggered::Listener;

use crate::chain::{ChainClient, ChainError};
use crate::consolidate::ChannelConsolidator;
use crate::error::{Error, Result};
use crate::funding::FundingTxCache;
use crate::model::{ChannelStatus, DirectionalAnnouncement, NodeAnnouncement};
use crate::source::GraphSource;
use crate::store::GraphStore;
use crate::util::clock::Clock;
use crate::util::progress::ProgressLog;

/// Sync loop settings
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Time between the starts of two cycles
    pub graph_refresh_interval: Duration,
    /// Delay before retrying after an unusable snapshot
    pub retry_delay: Duration,
    /// Number of funding outpoints per spend status query
    pub closed_scan_batch_size: usize,
    /// Minimum time between two progress log lines
    pub log_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            graph_refresh_interval: Duration::from_secs(600),
            retry_delay: Duration::from_secs(10),
            closed_scan_batch_size: 500,
            log_interval: Duration::from_secs(30),
        }
    }
}

/// Delay until the next cycle, measured from the start of the previous one
pub fn next_cycle_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed).max(Duration::from_millis(1))
}

/// Mirrors the network graph into a [`GraphStore`]
pub struct GraphSync {
    source: Arc<dyn GraphSource>,
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn GraphStore>,
    funding: FundingTxCache,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    /// Chain tip at the last completed closed channel scan
    closed_channels_scan_block: Option<u32>,
}

impl GraphSync {
    /// Create a sync loop. `funding` should already be initialized.
    pub fn new(
        source: Arc<dyn GraphSource>,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn GraphStore>,
        funding: FundingTxCache,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        GraphSync {
            source,
            chain,
            store,
            funding,
            clock,
            config,
            closed_channels_scan_block: None,
        }
    }

    /// The funding transaction cache
    pub fn funding(&self) -> &FundingTxCache {
        &self.funding
    }

    /// Chain tip at the last completed closed channel scan
    pub fn closed_channels_scan_block(&self) -> Option<u32> {
        self.closed_channels_scan_block
    }

    /// Run cycles until `shutdown` fires, then flush the funding cache
    pub async fn run_forever(&mut self, shutdown: Listener) {
        info!("Starting lightning network sync service");
        loop {
            let started = Instant::now();
            let delay = match self.sync_once().await {
                Ok(()) => next_cycle_delay(self.config.graph_refresh_interval, started.elapsed()),
                Err(e @ Error::TransientUpstream(_)) | Err(e @ Error::Source(_)) => {
                    info!("{}, retrying in {} seconds", e, self.config.retry_delay.as_secs());
                    self.config.retry_delay
                }
                Err(e) => {
                    error!("sync cycle error: {}", e);
                    next_cycle_delay(self.config.graph_refresh_interval, started.elapsed())
                }
            };
            tokio::select! {
                _ = shutdown.clone() => break,
                _ = time::sleep(delay) => {}
            }
        }
        info!("lightning network sync service stopping");
        self.funding.persist();
        self.funding.flush().await;
    }

    /// Drive exactly one cycle.
    ///
    /// Fails without touching the store if the snapshot is unusable. Failures
    /// of the channel, backfill and closed scan steps are logged and do not
    /// fail the cycle.
    pub async fn sync_once(&mut self) -> Result<()> {
        debug!("Updating nodes and channels");
        let graph = self.source.network_graph().await?;
        if graph.nodes.is_empty() || graph.edges.is_empty() {
            return Err(Error::TransientUpstream("LN network graph is empty".to_string()));
        }
        self.funding.forget_failures();

        self.update_nodes(&graph.nodes)?;
        if let Err(e) = self.update_channels(&graph.edges).await {
            error!("Cannot update channel list. Reason: {}", e);
        }
        if let Err(e) = self.deactivate_channels_without_active_nodes() {
            error!("deactivate_channels_without_active_nodes error: {}", e);
        }
        if let Err(e) = self.look_up_creation_date_from_chain().await {
            error!("look_up_creation_date_from_chain error: {}", e);
        }
        if let Err(e) = self.update_node_first_seen() {
            error!("update_node_first_seen error: {}", e);
        }
        if let Err(e) = self.scan_for_closed_channels().await {
            error!("scan_for_closed_channels error: {}", e);
        }
        Ok(())
    }

    fn update_nodes(&self, nodes: &[NodeAnnouncement]) -> Result<()> {
        let latest_updates = self.store.latest_channel_update_by_node()?;
        let now = self.clock.now_secs();
        let mut progress = ProgressLog::new(self.config.log_interval);
        let mut seen = HashSet::with_capacity(nodes.len());
        let mut deleted_sockets = 0;
        let mut deleted_records = 0;

        for (processed, node) in nodes.iter().enumerate() {
            let latest = latest_updates.get(&node.public_key).copied().unwrap_or(0);
            self.store.upsert_node(node, node.last_update.max(latest), now)?;
            seen.insert(node.public_key.clone());

            let mut addresses = Vec::with_capacity(node.addresses.len());
            for address in node.addresses.iter() {
                self.store.save_socket(&node.public_key, address)?;
                addresses.push(address.addr.clone());
            }
            deleted_sockets += self.store.delete_unused_sockets(&node.public_key, &addresses)?;

            for (record_type, payload) in node.custom_records.iter() {
                self.store.save_record(&node.public_key, *record_type, payload)?;
            }
            let record_types: Vec<u64> = node.custom_records.keys().copied().collect();
            deleted_records += self.store.delete_unused_records(&node.public_key, &record_types)?;

            progress.tick(|| debug!("Updating node {}/{}", processed + 1, nodes.len()));
        }
        debug!(
            "{} nodes updated. {} sockets deleted. {} custom records deleted.",
            nodes.len(),
            deleted_sockets,
            deleted_records
        );
        let deactivated = self.store.set_nodes_inactive_except(&seen)?;
        if deactivated > 0 {
            debug!("Marked {} nodes as inactive", deactivated);
        }
        Ok(())
    }

    async fn update_channels(&mut self, edges: &[DirectionalAnnouncement]) -> Result<()> {
        let mut distinct = HashSet::new();
        let channel_ids: Vec<String> = edges
            .iter()
            .filter(|edge| distinct.insert(edge.short_channel_id.as_str()))
            .map(|edge| edge.short_channel_id.clone())
            .collect();
        self.funding.resolve_batch(&channel_ids).await;

        let channels = ChannelConsolidator::new(&mut self.funding)
            .with_log_interval(self.config.log_interval)
            .consolidate(edges)
            .await;

        let closed = self.store.closed_channel_ids()?;
        let mut progress = ProgressLog::new(self.config.log_interval);
        let mut seen = HashSet::with_capacity(channels.len());
        for (processed, channel) in channels.iter().enumerate() {
            if !closed.contains(&channel.id()) {
                self.store.upsert_channel(channel)?;
            }
            seen.insert(channel.id());
            progress.tick(|| debug!("Updating channel {}/{}", processed + 1, channels.len()));
        }
        debug!("{} channels updated", channels.len());

        let deactivated = self.store.set_channels_inactive_except(&seen)?;
        if deactivated > 0 {
            debug!("Marked {} channels as inactive", deactivated);
        }
        Ok(())
    }

    fn deactivate_channels_without_active_nodes(&self) -> Result<()> {
        debug!("Find channels which nodes are offline");
        let count = self.store.deactivate_channels_without_active_nodes()?;
        if count > 0 {
            debug!(
                "Marked {} channels as inactive because they are not linked to any active node",
                count
            );
        }
        Ok(())
    }

    async fn look_up_creation_date_from_chain(&mut self) -> Result<()> {
        debug!("Running channel creation date lookup");
        let channels = self.store.channels_missing_created_date()?;
        let mut progress = ProgressLog::new(self.config.log_interval);
        let mut updated = 0;
        self.funding.begin_batch();
        for channel in channels.iter() {
            let funding_tx = self.funding.resolve(&channel.short_id.to_string()).await;
            self.funding.maybe_persist();
            let Some(funding_tx) = funding_tx else {
                continue;
            };
            self.store.set_channel_created(channel.id(), funding_tx.timestamp)?;
            updated += 1;
            progress.tick(|| {
                debug!("Updating channel creation date {}/{}", updated, channels.len())
            });
        }
        self.funding.finish_batch();
        if updated > 0 {
            debug!("Updated {} channels' creation date", updated);
        }
        Ok(())
    }

    fn update_node_first_seen(&self) -> Result<()> {
        let nodes = self.store.node_first_seen_candidates()?;
        let mut progress = ProgressLog::new(self.config.log_interval);
        let mut updated = 0;
        for (processed, node) in nodes.iter().enumerate() {
            if let Some(created) = node.earliest_channel_created {
                if created < node.first_seen {
                    self.store.set_node_first_seen(&node.public_key, created)?;
                    updated += 1;
                }
            }
            progress.tick(|| {
                debug!("Updating node first seen date {}/{}", processed + 1, nodes.len())
            });
        }
        if updated > 0 {
            debug!("Updated {} node first seen dates", updated);
        }
        Ok(())
    }

    async fn scan_for_closed_channels(&mut self) -> Result<()> {
        let tip = self.chain.get_chain_tip_height().await?;
        match self.closed_channels_scan_block {
            Some(height) if height == tip => {
                debug!("We've already scanned closed channels for this block, skipping.");
                return Ok(());
            }
            Some(height) => {
                debug!("Starting closed channels scan. Last scan was at block {}", height)
            }
            None => debug!("Starting closed channels scan for the first time"),
        }

        let channels =
            self.store.channels_by_status(&[ChannelStatus::Inactive, ChannelStatus::Open])?;
        let mut progress = ProgressLog::new(self.config.log_interval);
        let mut processed = 0;
        let mut closed = 0;
        for batch in channels.chunks(self.config.closed_scan_batch_size.max(1)) {
            let outpoints: Vec<OutPoint> = batch.iter().map(|c| c.chan_point.outpoint()).collect();
            let statuses = self.chain.get_spend_status(&outpoints).await?;
            if statuses.len() != batch.len() {
                return Err(ChainError::Decode(format!(
                    "asked for {} spend statuses, got {}",
                    batch.len(),
                    statuses.len()
                ))
                .into());
            }
            for (channel, status) in batch.iter().zip(statuses) {
                if !(status.spent && status.confirmed) {
                    continue;
                }
                match status.block_time {
                    Some(block_time) => {
                        trace!("Marking channel {} as closed", channel.short_id);
                        self.store.mark_channel_closed(
                            channel.id(),
                            block_time,
                            status.spending_txid,
                        )?;
                        closed += 1;
                    }
                    None => warn!(
                        "funding output {} of channel {} spent without a block time",
                        channel.chan_point, channel.short_id
                    ),
                }
            }
            processed += batch.len();
            progress.tick(|| {
                debug!("Checking if channel has been closed {}/{}", processed, channels.len())
            });
        }
        self.closed_channels_scan_block = Some(tip);
        debug!("Closed channels scan completed at block {}, {} newly closed", tip, closed);
        Ok(())
    }
}
