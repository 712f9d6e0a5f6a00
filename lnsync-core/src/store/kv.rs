use core::ops::Deref;
use std::collections::{BTreeMap, HashMap, HashSet};

use bitcoin::Txid;
#[allow(unused_imports)]
use log::{debug, trace};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{from_slice, to_vec};
use tracing::instrument;

use super::{GraphStore, StoreError};
use crate::model::{
    Channel, ChannelStatus, NodeAddress, NodeAnnouncement, NodeFirstSeen, NodeStatus,
    StoredChannel, StoredNode,
};

const NODE_PREFIX: &str = "node";
const SOCKET_PREFIX: &str = "socket";
const RECORD_PREFIX: &str = "record";
const CHANNEL_PREFIX: &str = "channel";
const SEPARATOR: &str = "/";

/// A key-value store with ordered prefix scans
pub trait KvStore: Send + Sync {
    /// Iterator over a prefix scan
    type Iter: Iterator<Item = (String, Vec<u8>)>;

    /// Put a key-value pair into the store
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    /// Get a value from the store.
    /// Returns Ok(None) if the key does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// Get all key-value pairs with the given prefix, in key order
    fn get_prefix(&self, prefix: &str) -> Result<Self::Iter, StoreError>;
    /// Delete a key-value pair from the store, if present
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Adapter for a KvStore to implement GraphStore
pub struct KvGraphStore<S: KvStore>(pub S);

impl<S: KvStore> Deref for KvGraphStore<S> {
    type Target = S;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

fn node_key(public_key: &str) -> String {
    format!("{}{}{}", NODE_PREFIX, SEPARATOR, public_key)
}

fn socket_prefix(public_key: &str) -> String {
    format!("{}{}{}{}", SOCKET_PREFIX, SEPARATOR, public_key, SEPARATOR)
}

fn record_prefix(public_key: &str) -> String {
    format!("{}{}{}{}", RECORD_PREFIX, SEPARATOR, public_key, SEPARATOR)
}

// zero padded so that key order is numeric order
fn record_key(public_key: &str, record_type: u64) -> String {
    format!("{}{:020}", record_prefix(public_key), record_type)
}

fn channel_key(id: u64) -> String {
    format!("{}{}{:020}", CHANNEL_PREFIX, SEPARATOR, id)
}

fn all_prefix(prefix: &str) -> String {
    format!("{}{}", prefix, SEPARATOR)
}

fn decode<T: DeserializeOwned>(key: &str, value: &[u8]) -> Result<T, StoreError> {
    from_slice(value).map_err(|e| StoreError::Internal(format!("decode {}: {}", key, e)))
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, StoreError> {
    to_vec(value).map_err(|e| StoreError::Internal(format!("encode {}: {}", key, e)))
}

impl<S: KvStore> KvGraphStore<S> {
    fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(value) => Ok(Some(decode(key, &value)?)),
            None => Ok(None),
        }
    }

    fn put_entry<T: Serialize>(&self, key: &str, entry: &T) -> Result<(), StoreError> {
        let value = encode(key, entry)?;
        self.put(key, &value)
    }

    #[instrument(skip(self))]
    fn nodes(&self) -> Result<Vec<StoredNode>, StoreError> {
        self.get_prefix(&all_prefix(NODE_PREFIX))?.map(|(key, value)| decode(&key, &value)).collect()
    }

    #[instrument(skip(self))]
    fn channels(&self) -> Result<Vec<StoredChannel>, StoreError> {
        self.get_prefix(&all_prefix(CHANNEL_PREFIX))?
            .map(|(key, value)| decode(&key, &value))
            .collect()
    }

    fn update_channel<F>(&self, id: u64, update: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut StoredChannel),
    {
        let key = channel_key(id);
        let mut channel: StoredChannel = self
            .get_entry(&key)?
            .ok_or_else(|| StoreError::NotFound(format!("channel {}", id)))?;
        update(&mut channel);
        self.put_entry(&key, &channel)
    }

    // deletes every entry under `prefix` whose key suffix is not in `keep`
    fn delete_unused(&self, prefix: &str, keep: &HashSet<String>) -> Result<usize, StoreError> {
        let unused: Vec<String> = self
            .get_prefix(prefix)?
            .map(|(key, _)| key)
            .filter(|key| !keep.contains(&key[prefix.len()..]))
            .collect();
        for key in unused.iter() {
            trace!("deleting {}", key);
            self.delete(key)?;
        }
        Ok(unused.len())
    }
}

impl<S: KvStore> GraphStore for KvGraphStore<S> {
    fn latest_channel_update_by_node(&self) -> Result<HashMap<String, u64>, StoreError> {
        let mut latest: HashMap<String, u64> = HashMap::new();
        for channel in self.channels()? {
            for public_key in [&channel.node1_public_key, &channel.node2_public_key] {
                let entry = latest.entry(public_key.clone()).or_insert(0);
                *entry = (*entry).max(channel.updated_at);
            }
        }
        Ok(latest)
    }

    #[instrument(skip(self, node), fields(public_key = %node.public_key))]
    fn upsert_node(
        &self,
        node: &NodeAnnouncement,
        updated_at: u64,
        first_seen: u64,
    ) -> Result<(), StoreError> {
        let key = node_key(&node.public_key);
        let existing: Option<StoredNode> = self.get_entry(&key)?;
        let entry = StoredNode {
            public_key: node.public_key.clone(),
            alias: node.alias.clone(),
            color: node.color.clone(),
            features: node.features.clone(),
            updated_at,
            first_seen: existing.map(|n| n.first_seen).unwrap_or(first_seen),
            status: NodeStatus::Active,
        };
        self.put_entry(&key, &entry)
    }

    fn save_socket(&self, public_key: &str, address: &NodeAddress) -> Result<(), StoreError> {
        let key = format!("{}{}", socket_prefix(public_key), address.addr);
        self.put_entry(&key, address)
    }

    fn delete_unused_sockets(&self, public_key: &str, keep: &[String]) -> Result<usize, StoreError> {
        let keep: HashSet<String> = keep.iter().cloned().collect();
        self.delete_unused(&socket_prefix(public_key), &keep)
    }

    fn save_record(
        &self,
        public_key: &str,
        record_type: u64,
        payload: &[u8],
    ) -> Result<(), StoreError> {
        self.put(&record_key(public_key, record_type), payload)
    }

    fn delete_unused_records(&self, public_key: &str, keep: &[u64]) -> Result<usize, StoreError> {
        let keep: HashSet<String> = keep.iter().map(|t| format!("{:020}", t)).collect();
        self.delete_unused(&record_prefix(public_key), &keep)
    }

    #[instrument(skip_all, fields(seen = seen.len()))]
    fn set_nodes_inactive_except(&self, seen: &HashSet<String>) -> Result<usize, StoreError> {
        let mut count = 0;
        for mut node in self.nodes()? {
            if node.status == NodeStatus::Active && !seen.contains(&node.public_key) {
                node.status = NodeStatus::Inactive;
                self.put_entry(&node_key(&node.public_key), &node)?;
                count += 1;
            }
        }
        Ok(count)
    }

    fn closed_channel_ids(&self) -> Result<HashSet<u64>, StoreError> {
        Ok(self
            .channels()?
            .iter()
            .filter(|c| c.status == ChannelStatus::Closed)
            .map(|c| c.id())
            .collect())
    }

    #[instrument(skip(self, channel), fields(short_id = %channel.short_id))]
    fn upsert_channel(&self, channel: &Channel) -> Result<(), StoreError> {
        let key = channel_key(channel.id());
        let existing: Option<StoredChannel> = self.get_entry(&key)?;
        let (created, closing_date, closing_transaction_id) = match existing {
            Some(c) => (c.created, c.closing_date, c.closing_transaction_id),
            None => (None, None, None),
        };
        let entry = StoredChannel {
            short_id: channel.short_id,
            capacity: channel.capacity,
            chan_point: channel.chan_point,
            node1_public_key: channel.node1_pub.clone(),
            node2_public_key: channel.node2_pub.clone(),
            node1_policy: channel.node1_policy.clone(),
            node2_policy: channel.node2_policy.clone(),
            updated_at: channel.last_update,
            created,
            status: ChannelStatus::Open,
            closing_date,
            closing_transaction_id,
        };
        self.put_entry(&key, &entry)
    }

    #[instrument(skip_all, fields(seen = seen.len()))]
    fn set_channels_inactive_except(&self, seen: &HashSet<u64>) -> Result<usize, StoreError> {
        let mut count = 0;
        for mut channel in self.channels()? {
            if channel.status == ChannelStatus::Open && !seen.contains(&channel.id()) {
                channel.status = ChannelStatus::Inactive;
                self.put_entry(&channel_key(channel.id()), &channel)?;
                count += 1;
            }
        }
        Ok(count)
    }

    fn deactivate_channels_without_active_nodes(&self) -> Result<usize, StoreError> {
        let active: HashSet<String> = self
            .nodes()?
            .into_iter()
            .filter(|n| n.status == NodeStatus::Active)
            .map(|n| n.public_key)
            .collect();
        let mut count = 0;
        for mut channel in self.channels()? {
            if channel.status == ChannelStatus::Open
                && !(active.contains(&channel.node1_public_key)
                    && active.contains(&channel.node2_public_key))
            {
                channel.status = ChannelStatus::Inactive;
                self.put_entry(&channel_key(channel.id()), &channel)?;
                count += 1;
            }
        }
        Ok(count)
    }

    fn channels_missing_created_date(&self) -> Result<Vec<StoredChannel>, StoreError> {
        Ok(self.channels()?.into_iter().filter(|c| c.created.is_none()).collect())
    }

    fn set_channel_created(&self, id: u64, created: u64) -> Result<(), StoreError> {
        self.update_channel(id, |channel| {
            channel.created = Some(match channel.closing_date {
                Some(closing_date) => created.min(closing_date),
                None => created,
            });
        })
    }

    fn node_first_seen_candidates(&self) -> Result<Vec<NodeFirstSeen>, StoreError> {
        let mut earliest: HashMap<String, u64> = HashMap::new();
        for channel in self.channels()? {
            if let Some(created) = channel.created {
                for public_key in [channel.node1_public_key, channel.node2_public_key] {
                    let entry = earliest.entry(public_key).or_insert(created);
                    *entry = (*entry).min(created);
                }
            }
        }
        Ok(self
            .nodes()?
            .into_iter()
            .map(|node| NodeFirstSeen {
                earliest_channel_created: earliest.get(&node.public_key).copied(),
                public_key: node.public_key,
                first_seen: node.first_seen,
            })
            .collect())
    }

    fn set_node_first_seen(&self, public_key: &str, first_seen: u64) -> Result<(), StoreError> {
        let key = node_key(public_key);
        let mut node: StoredNode = self
            .get_entry(&key)?
            .ok_or_else(|| StoreError::NotFound(format!("node {}", public_key)))?;
        node.first_seen = first_seen;
        self.put_entry(&key, &node)
    }

    fn channels_by_status(
        &self,
        statuses: &[ChannelStatus],
    ) -> Result<Vec<StoredChannel>, StoreError> {
        Ok(self.channels()?.into_iter().filter(|c| statuses.contains(&c.status)).collect())
    }

    fn mark_channel_closed(
        &self,
        id: u64,
        closing_date: u64,
        closing_transaction_id: Option<Txid>,
    ) -> Result<(), StoreError> {
        self.update_channel(id, |channel| {
            channel.status = ChannelStatus::Closed;
            channel.closing_date = Some(closing_date);
            if channel.closing_transaction_id.is_none() {
                channel.closing_transaction_id = closing_transaction_id;
            }
            if let Some(created) = channel.created {
                channel.created = Some(created.min(closing_date));
            }
        })
    }

    fn get_node(&self, public_key: &str) -> Result<Option<StoredNode>, StoreError> {
        self.get_entry(&node_key(public_key))
    }

    fn get_channel(&self, id: u64) -> Result<Option<StoredChannel>, StoreError> {
        self.get_entry(&channel_key(id))
    }

    fn node_sockets(&self, public_key: &str) -> Result<Vec<NodeAddress>, StoreError> {
        self.get_prefix(&socket_prefix(public_key))?
            .map(|(key, value)| decode(&key, &value))
            .collect()
    }

    fn node_records(&self, public_key: &str) -> Result<BTreeMap<u64, Vec<u8>>, StoreError> {
        let prefix = record_prefix(public_key);
        self.get_prefix(&prefix)?
            .map(|(key, value)| {
                let record_type = key[prefix.len()..]
                    .parse::<u64>()
                    .map_err(|e| StoreError::Internal(format!("bad record key {}: {}", key, e)))?;
                Ok((record_type, value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChanPoint;
    use crate::store::MemoryKvStore;
    use crate::util::test_utils::*;

    fn make_channel(id: &str, node1: &str, node2: &str, last_update: u64) -> Channel {
        let short_id = id.parse().unwrap();
        Channel {
            short_id,
            capacity: 100_000,
            last_update,
            node1_pub: node1.to_string(),
            node2_pub: node2.to_string(),
            node1_policy: Some(make_policy(last_update)),
            node2_policy: None,
            chan_point: ChanPoint { txid: txid(9), vout: 0 },
        }
    }

    #[test]
    fn node_upsert_test() {
        let store = MemoryKvStore::new();
        let node = make_node(&pubkey(1), 100);
        store.upsert_node(&node, 100, 1_000).unwrap();
        let stored = store.get_node(&pubkey(1)).unwrap().unwrap();
        assert_eq!(stored.first_seen, 1_000);
        assert_eq!(stored.status, NodeStatus::Active);

        let mut renamed = node.clone();
        renamed.alias = "renamed".to_string();
        store.upsert_node(&renamed, 200, 2_000).unwrap();
        let stored = store.get_node(&pubkey(1)).unwrap().unwrap();
        assert_eq!(stored.first_seen, 1_000);
        assert_eq!(stored.updated_at, 200);
        assert_eq!(stored.alias, "renamed");
        assert!(store.get_node(&pubkey(2)).unwrap().is_none());
    }

    #[test]
    fn sockets_and_records_test() {
        let store = MemoryKvStore::new();
        let pk = pubkey(1);
        for addr in ["203.0.113.7:9735", "[2001:db8::1]:9735"] {
            let address = NodeAddress { network: "ipv4".to_string(), addr: addr.to_string() };
            store.save_socket(&pk, &address).unwrap();
        }
        store.save_socket(&pubkey(2), &make_node(&pubkey(2), 0).addresses[0]).unwrap();
        assert_eq!(store.delete_unused_sockets(&pk, &["203.0.113.7:9735".to_string()]).unwrap(), 1);
        let sockets = store.node_sockets(&pk).unwrap();
        assert_eq!(sockets.len(), 1);
        assert_eq!(sockets[0].addr, "203.0.113.7:9735");
        assert_eq!(store.node_sockets(&pubkey(2)).unwrap().len(), 1);

        store.save_record(&pk, 1, &[1, 2, 3]).unwrap();
        store.save_record(&pk, 65537, &[4]).unwrap();
        assert_eq!(store.delete_unused_records(&pk, &[65537]).unwrap(), 1);
        let records = store.node_records(&pk).unwrap();
        assert_eq!(records.into_iter().collect::<Vec<_>>(), vec![(65537, vec![4])]);
    }

    #[test]
    fn channel_lifecycle_test() {
        let store = MemoryKvStore::new();
        let channel = make_channel("700000x1x0", &pubkey(1), &pubkey(2), 100);
        store.upsert_channel(&channel).unwrap();
        store.set_channel_created(channel.id(), 1_600_000_000).unwrap();
        store.upsert_channel(&channel).unwrap();
        let stored = store.get_channel(channel.id()).unwrap().unwrap();
        assert_eq!(stored.created, Some(1_600_000_000));
        assert_eq!(stored.status, ChannelStatus::Open);

        let txid1 = txid(1);
        store.mark_channel_closed(channel.id(), 1_650_000_000, Some(txid1)).unwrap();
        store.mark_channel_closed(channel.id(), 1_650_000_001, Some(txid(2))).unwrap();
        let stored = store.get_channel(channel.id()).unwrap().unwrap();
        assert_eq!(stored.status, ChannelStatus::Closed);
        assert_eq!(stored.closing_date, Some(1_650_000_001));
        assert_eq!(stored.closing_transaction_id, Some(txid1));
        assert_eq!(store.closed_channel_ids().unwrap(), HashSet::from([channel.id()]));

        // closed channels are not demoted
        assert_eq!(store.set_channels_inactive_except(&HashSet::new()).unwrap(), 0);
        assert!(store.mark_channel_closed(1, 1, None).is_err());
    }

    #[test]
    fn created_clamped_test() {
        let store = MemoryKvStore::new();
        let channel = make_channel("700000x1x0", &pubkey(1), &pubkey(2), 100);
        store.upsert_channel(&channel).unwrap();
        store.mark_channel_closed(channel.id(), 1_000, None).unwrap();
        store.set_channel_created(channel.id(), 2_000).unwrap();
        let stored = store.get_channel(channel.id()).unwrap().unwrap();
        assert_eq!(stored.created, Some(1_000));
    }

    #[test]
    fn deactivation_test() {
        let store = MemoryKvStore::new();
        for n in 1..=3 {
            store.upsert_node(&make_node(&pubkey(n), 0), 0, 0).unwrap();
        }
        let a = make_channel("700000x1x0", &pubkey(1), &pubkey(2), 100);
        let b = make_channel("700000x2x0", &pubkey(2), &pubkey(3), 300);
        store.upsert_channel(&a).unwrap();
        store.upsert_channel(&b).unwrap();

        let latest = store.latest_channel_update_by_node().unwrap();
        assert_eq!(latest[&pubkey(1)], 100);
        assert_eq!(latest[&pubkey(2)], 300);

        let seen = HashSet::from([pubkey(1), pubkey(2)]);
        assert_eq!(store.set_nodes_inactive_except(&seen).unwrap(), 1);
        assert_eq!(store.set_nodes_inactive_except(&seen).unwrap(), 0);
        assert_eq!(store.deactivate_channels_without_active_nodes().unwrap(), 1);
        assert_eq!(
            store.get_channel(b.id()).unwrap().unwrap().status,
            ChannelStatus::Inactive
        );
        assert_eq!(store.channels_by_status(&[ChannelStatus::Open]).unwrap().len(), 1);

        assert_eq!(store.set_channels_inactive_except(&HashSet::new()).unwrap(), 1);
        let both = store
            .channels_by_status(&[ChannelStatus::Open, ChannelStatus::Inactive])
            .unwrap();
        assert_eq!(both.iter().map(|c| c.id()).collect::<Vec<_>>(), vec![a.id(), b.id()]);
    }

    #[test]
    fn first_seen_candidates_test() {
        let store = MemoryKvStore::new();
        store.upsert_node(&make_node(&pubkey(1), 0), 0, 5_000).unwrap();
        store.upsert_node(&make_node(&pubkey(3), 0), 0, 5_000).unwrap();
        let a = make_channel("700000x1x0", &pubkey(1), &pubkey(2), 100);
        let b = make_channel("700000x2x0", &pubkey(1), &pubkey(2), 100);
        store.upsert_channel(&a).unwrap();
        store.upsert_channel(&b).unwrap();
        store.set_channel_created(a.id(), 3_000).unwrap();
        store.set_channel_created(b.id(), 2_000).unwrap();

        let candidates = store.node_first_seen_candidates().unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].public_key, pubkey(1));
        assert_eq!(candidates[0].earliest_channel_created, Some(2_000));
        assert_eq!(candidates[1].earliest_channel_created, None);

        store.set_node_first_seen(&pubkey(1), 2_000).unwrap();
        assert_eq!(store.get_node(&pubkey(1)).unwrap().unwrap().first_seen, 2_000);
        assert!(store.set_node_first_seen(&pubkey(2), 1).is_err());
    }
}
