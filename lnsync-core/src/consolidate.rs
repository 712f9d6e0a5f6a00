//! Turns the per-endpoint announcements of a graph snapshot into bidirectional
//! channels.
//!
//! The first announcement of a channel is held until a second one with the
//! same short channel id shows up, at which point both are merged into a full
//! channel. Announcements that never get a partner are flushed as incomplete
//! channels once the input is exhausted. Memory is bounded by the number of
//! distinct channels, and the input does not need to be sorted.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

#[allow(unused_imports)]
use log::{debug, info, trace, warn};

use crate::funding::FundingTxCache;
use crate::model::{ChanPoint, Channel, DirectionalAnnouncement};
use crate::scid::ShortChannelId;
use crate::util::progress::ProgressLog;

const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Merges directional announcements, attaching funding data from a [`FundingTxCache`]
pub struct ChannelConsolidator<'a> {
    funding: &'a mut FundingTxCache,
    log_interval: Duration,
}

impl<'a> ChannelConsolidator<'a> {
    /// Create a consolidator borrowing the funding cache for the duration of a cycle
    pub fn new(funding: &'a mut FundingTxCache) -> Self {
        Self { funding, log_interval: DEFAULT_LOG_INTERVAL }
    }

    /// Override the progress log interval
    pub fn with_log_interval(mut self, log_interval: Duration) -> Self {
        self.log_interval = log_interval;
        self
    }

    /// Produce at most one channel per distinct short channel id.
    ///
    /// A channel whose funding transaction cannot be resolved is left out
    /// entirely; it will be picked up from a later snapshot.
    pub async fn consolidate(&mut self, announcements: &[DirectionalAnnouncement]) -> Vec<Channel> {
        debug!("Consolidating {} channel announcements", announcements.len());
        let started = Instant::now();
        let mut progress = ProgressLog::new(self.log_interval);
        let mut channels = Vec::new();
        let mut pending: HashMap<ShortChannelId, &DirectionalAnnouncement> = HashMap::new();
        // arrival order of pending ids, for a deterministic flush
        let mut order: Vec<ShortChannelId> = Vec::new();
        let mut done: HashSet<ShortChannelId> = HashSet::new();

        self.funding.begin_batch();
        for (processed, announcement) in announcements.iter().enumerate() {
            let scid: ShortChannelId = match announcement.short_channel_id.parse() {
                Ok(scid) => scid,
                Err(e) => {
                    debug!("skipping announcement from {}: {}", announcement.source, e);
                    continue;
                }
            };
            if done.contains(&scid) {
                trace!("{} already consolidated", scid);
                continue;
            }
            match pending.remove(&scid) {
                None => {
                    pending.insert(scid, announcement);
                    order.push(scid);
                }
                Some(first) => {
                    done.insert(scid);
                    if let Some(channel) = self.build_full_channel(&scid, first, announcement).await
                    {
                        channels.push(channel);
                    }
                }
            }
            progress.tick(|| {
                info!(
                    "Building complete channels. Channels processed: {} of {}",
                    processed + 1,
                    announcements.len()
                )
            });
            self.funding.maybe_persist();
        }

        let stragglers: Vec<_> = order.into_iter().filter(|scid| pending.contains_key(scid)).collect();
        for (processed, scid) in stragglers.iter().enumerate() {
            let announcement = pending[scid];
            if let Some(channel) = self.build_incomplete_channel(scid, announcement).await {
                channels.push(channel);
            }
            progress.tick(|| {
                info!(
                    "Building partial channels. Channels processed: {} of {}",
                    processed + 1,
                    stragglers.len()
                )
            });
            self.funding.maybe_persist();
        }
        self.funding.finish_batch();
        debug!(
            "Consolidated {} channels ({} incomplete) in {} seconds",
            channels.len(),
            channels.iter().filter(|c| c.node2_policy.is_none()).count(),
            started.elapsed().as_secs()
        );
        channels
    }

    async fn build_full_channel(
        &mut self,
        scid: &ShortChannelId,
        first: &DirectionalAnnouncement,
        second: &DirectionalAnnouncement,
    ) -> Option<Channel> {
        let funding = self.funding.resolve(&scid.to_string()).await?;
        Some(Channel {
            short_id: *scid,
            capacity: first.amount_msat / 1000,
            last_update: first.policy.last_update.max(second.policy.last_update),
            node1_pub: first.source.clone(),
            node2_pub: second.source.clone(),
            node1_policy: Some(first.policy.clone()),
            node2_policy: Some(second.policy.clone()),
            chan_point: ChanPoint { txid: funding.txid, vout: scid.output_index as u32 },
        })
    }

    async fn build_incomplete_channel(
        &mut self,
        scid: &ShortChannelId,
        announcement: &DirectionalAnnouncement,
    ) -> Option<Channel> {
        let funding = self.funding.resolve(&scid.to_string()).await?;
        Some(Channel {
            short_id: *scid,
            capacity: announcement.amount_msat / 1000,
            last_update: announcement.policy.last_update,
            node1_pub: announcement.source.clone(),
            // the declared destination, there is no second policy side to take it from
            node2_pub: announcement.destination.clone(),
            node1_policy: Some(announcement.policy.clone()),
            node2_policy: None,
            chan_point: ChanPoint { txid: funding.txid, vout: scid.output_index as u32 },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryFundingCachePersist;
    use crate::util::test_utils::*;
    use std::sync::Arc;
    use test_log::test;

    fn make_funding(chain: &Arc<MockChainClient>) -> FundingTxCache {
        FundingTxCache::new(chain.clone(), Arc::new(MemoryFundingCachePersist::new()))
    }

    #[test(tokio::test)]
    async fn full_channel_test() {
        let chain = Arc::new(MockChainClient::new());
        chain.add_funding(&scid(700_000, 3, 1), txid(1), 500_000, 1_650_000_000);
        let mut funding = make_funding(&chain);

        let a = make_announcement("700000x3x1", &pubkey(1), &pubkey(2), 500_000_000, 1_700_000_100);
        let b = make_announcement("700000x3x1", &pubkey(2), &pubkey(1), 500_000_000, 1_700_000_050);
        let channels = ChannelConsolidator::new(&mut funding).consolidate(&[a.clone(), b.clone()]).await;

        assert_eq!(channels.len(), 1);
        let channel = &channels[0];
        assert_eq!(channel.node1_pub, pubkey(1));
        assert_eq!(channel.node2_pub, pubkey(2));
        assert_eq!(channel.node1_policy.as_ref(), Some(&a.policy));
        assert_eq!(channel.node2_policy.as_ref(), Some(&b.policy));
        assert_eq!(channel.last_update, 1_700_000_100);
        assert_eq!(channel.capacity, 500_000);
        assert_eq!(channel.chan_point.to_string(), format!("{}:1", txid(1)));
        assert_eq!(channel.id(), scid(700_000, 3, 1).to_u64());
    }

    #[test(tokio::test)]
    async fn incomplete_channel_test() {
        let chain = Arc::new(MockChainClient::new());
        chain.add_funding(&scid(700_000, 0, 0), txid(1), 200_000, 1_650_000_000);
        let mut funding = make_funding(&chain);

        let a = make_announcement("700000x0x0", &pubkey(3), &pubkey(4), 200_000_000, 1_700_000_000);
        let channels = ChannelConsolidator::new(&mut funding).consolidate(&[a]).await;

        assert_eq!(channels.len(), 1);
        let channel = &channels[0];
        assert_eq!(channel.node1_pub, pubkey(3));
        assert_eq!(channel.node2_pub, pubkey(4));
        assert!(channel.node1_policy.is_some());
        assert!(channel.node2_policy.is_none());
        assert_eq!(channel.last_update, 1_700_000_000);
    }

    #[test(tokio::test)]
    async fn unresolvable_funding_test() {
        let chain = Arc::new(MockChainClient::new());
        chain.add_funding(&scid(700_000, 0, 0), txid(1), 200_000, 1_650_000_000);
        let mut funding = make_funding(&chain);

        let announcements = vec![
            make_announcement("800000x1x0", &pubkey(1), &pubkey(2), 1_000_000, 1),
            make_announcement("800000x1x0", &pubkey(2), &pubkey(1), 1_000_000, 2),
            make_announcement("800001x1x0", &pubkey(5), &pubkey(6), 1_000_000, 3),
            make_announcement("700000x0x0", &pubkey(3), &pubkey(4), 200_000_000, 4),
        ];
        let channels = ChannelConsolidator::new(&mut funding).consolidate(&announcements).await;
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].short_id, scid(700_000, 0, 0));
    }

    #[test(tokio::test)]
    async fn ordering_test() {
        let chain = Arc::new(MockChainClient::new());
        for i in 0..4u32 {
            chain.add_funding(&scid(700_000 + i, 0, 0), txid_n(i), 100_000, 1_650_000_000);
        }
        let mut funding = make_funding(&chain);

        let announcements = vec![
            make_announcement("700000x0x0", &pubkey(1), &pubkey(2), 100_000_000, 10),
            make_announcement("700001x0x0", &pubkey(3), &pubkey(4), 100_000_000, 11),
            make_announcement("700002x0x0", &pubkey(5), &pubkey(6), 100_000_000, 12),
            make_announcement("700001x0x0", &pubkey(4), &pubkey(3), 100_000_000, 13),
            make_announcement("garbage", &pubkey(7), &pubkey(8), 100_000_000, 14),
            make_announcement("700003x0x0", &pubkey(7), &pubkey(8), 100_000_000, 15),
            // a third sighting of an already merged channel is ignored
            make_announcement("700001x0x0", &pubkey(9), &pubkey(3), 100_000_000, 16),
        ];
        let channels = ChannelConsolidator::new(&mut funding).consolidate(&announcements).await;
        let ids: Vec<String> = channels.iter().map(|c| c.short_id.to_string()).collect();
        // full channels first, then stragglers in arrival order
        assert_eq!(ids, vec!["700001x0x0", "700000x0x0", "700002x0x0", "700003x0x0"]);
        assert_eq!(channels[0].node1_pub, pubkey(3));
        assert_eq!(channels[0].node2_pub, pubkey(4));
        assert_eq!(channels[0].last_update, 13);
    }

    #[test(tokio::test)]
    async fn packed_id_test() {
        let chain = Arc::new(MockChainClient::new());
        let id = scid(700_000, 2, 0);
        chain.add_funding(&id, txid(1), 100_000, 1_650_000_000);
        let mut funding = make_funding(&chain);

        let packed = id.to_u64().to_string();
        let announcements = vec![
            make_announcement(&packed, &pubkey(1), &pubkey(2), 100_000_000, 1),
            make_announcement("700000x2x0", &pubkey(2), &pubkey(1), 100_000_000, 2),
        ];
        let channels = ChannelConsolidator::new(&mut funding).consolidate(&announcements).await;
        assert_eq!(channels.len(), 1);
        assert!(channels[0].node2_policy.is_some());
    }
}
