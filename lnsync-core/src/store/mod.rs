use core::fmt::{self, Display, Formatter};
use std::collections::{BTreeMap, HashMap, HashSet};

use bitcoin::Txid;

use crate::model::{
    Channel, ChannelStatus, NodeAddress, NodeAnnouncement, NodeFirstSeen, StoredChannel,
    StoredNode,
};

/// Graph store over a key-value backend
pub mod kv;
/// In-memory key-value backend
pub mod memory;

pub use kv::{KvGraphStore, KvStore};
pub use memory::MemoryKvStore;

/// Store errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Underlying storage is unavailable
    Unavailable(String),
    /// The entry was not found
    NotFound(String),
    /// Internal error, e.g. an undecodable entry
    Internal(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(s) => write!(f, "unavailable: {}", s),
            StoreError::NotFound(s) => write!(f, "not found: {}", s),
            StoreError::Internal(s) => write!(f, "internal: {}", s),
        }
    }
}

impl std::error::Error for StoreError {}

/// Persistent view of the network graph.
///
/// All writes are idempotent: applying the same update twice leaves the store
/// as after the first application. Nodes and channels are never deleted.
pub trait GraphStore: Send + Sync {
    /// Latest policy update among each node's channels, keyed by public key
    fn latest_channel_update_by_node(&self) -> Result<HashMap<String, u64>, StoreError>;

    /// Insert or refresh a node and mark it active.
    ///
    /// `first_seen` is only used when the node is new.
    fn upsert_node(
        &self,
        node: &NodeAnnouncement,
        updated_at: u64,
        first_seen: u64,
    ) -> Result<(), StoreError>;

    /// Record a network address for a node
    fn save_socket(&self, public_key: &str, address: &NodeAddress) -> Result<(), StoreError>;

    /// Remove addresses of the node not listed in `keep`, returning how many were removed
    fn delete_unused_sockets(&self, public_key: &str, keep: &[String]) -> Result<usize, StoreError>;

    /// Record a custom TLV record for a node
    fn save_record(&self, public_key: &str, record_type: u64, payload: &[u8])
        -> Result<(), StoreError>;

    /// Remove records of the node whose type is not in `keep`, returning how many were removed
    fn delete_unused_records(&self, public_key: &str, keep: &[u64]) -> Result<usize, StoreError>;

    /// Mark active nodes not in `seen` as inactive, returning how many changed
    fn set_nodes_inactive_except(&self, seen: &HashSet<String>) -> Result<usize, StoreError>;

    /// Ids of all closed channels
    fn closed_channel_ids(&self) -> Result<HashSet<u64>, StoreError>;

    /// Insert or refresh a channel and mark it open.
    ///
    /// The creation date and closing data of an existing channel are kept.
    fn upsert_channel(&self, channel: &Channel) -> Result<(), StoreError>;

    /// Mark open channels not in `seen` as inactive, returning how many changed
    fn set_channels_inactive_except(&self, seen: &HashSet<u64>) -> Result<usize, StoreError>;

    /// Mark open channels with an endpoint that is not active as inactive,
    /// returning how many changed
    fn deactivate_channels_without_active_nodes(&self) -> Result<usize, StoreError>;

    /// Channels with no creation date
    fn channels_missing_created_date(&self) -> Result<Vec<StoredChannel>, StoreError>;

    /// Set a channel's creation date, never later than its closing date
    fn set_channel_created(&self, id: u64, created: u64) -> Result<(), StoreError>;

    /// Each node's first-seen date along with the earliest creation date of its channels
    fn node_first_seen_candidates(&self) -> Result<Vec<NodeFirstSeen>, StoreError>;

    /// Overwrite a node's first-seen date
    fn set_node_first_seen(&self, public_key: &str, first_seen: u64) -> Result<(), StoreError>;

    /// Channels in any of `statuses`, ordered by id
    fn channels_by_status(&self, statuses: &[ChannelStatus])
        -> Result<Vec<StoredChannel>, StoreError>;

    /// Mark a channel closed.
    ///
    /// The closing transaction is only recorded if none was recorded before.
    fn mark_channel_closed(
        &self,
        id: u64,
        closing_date: u64,
        closing_transaction_id: Option<Txid>,
    ) -> Result<(), StoreError>;

    /// Get a node by public key
    fn get_node(&self, public_key: &str) -> Result<Option<StoredNode>, StoreError>;

    /// Get a channel by id
    fn get_channel(&self, id: u64) -> Result<Option<StoredChannel>, StoreError>;

    /// Addresses recorded for a node
    fn node_sockets(&self, public_key: &str) -> Result<Vec<NodeAddress>, StoreError>;

    /// Custom records recorded for a node
    fn node_records(&self, public_key: &str) -> Result<BTreeMap<u64, Vec<u8>>, StoreError>;
}
