use core::fmt::{self, Display, Formatter};
use std::collections::BTreeMap;

use bitcoin::{OutPoint, Txid};
use serde::{Deserialize, Serialize};

use crate::features::Feature;
use crate::scid::ShortChannelId;

/// A network address a node announces
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Address family, e.g. "ipv4", "ipv6", "torv3", "dns"
    pub network: String,
    /// `host:port`, with IPv6 hosts in brackets
    pub addr: String,
}

/// A node as it appears in a graph snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAnnouncement {
    /// Hex encoded node public key
    pub public_key: String,
    /// Node alias
    pub alias: String,
    /// Display color, `#rrggbb`
    pub color: String,
    /// Advertised feature bits
    pub features: Vec<Feature>,
    /// Announced network addresses
    pub addresses: Vec<NodeAddress>,
    /// Custom TLV records by type
    pub custom_records: BTreeMap<u64, Vec<u8>>,
    /// Unix timestamp of the node announcement
    pub last_update: u64,
}

/// The routing policy one endpoint advertises for a channel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// CLTV delta
    pub time_lock_delta: u32,
    /// Smallest HTLC, in msat
    pub min_htlc: u64,
    /// Largest HTLC, in msat
    pub max_htlc: u64,
    /// Base fee, in msat
    pub fee_base: u32,
    /// Proportional fee, in millionths
    pub fee_rate_proportional: u32,
    /// Whether the endpoint disabled forwarding
    pub disabled: bool,
    /// Unix timestamp of the channel update
    pub last_update: u64,
}

/// One endpoint's announcement of a channel and its policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionalAnnouncement {
    /// Short channel id as reported by the source, not yet validated
    pub short_channel_id: String,
    /// Announcing node
    pub source: String,
    /// The other endpoint
    pub destination: String,
    /// Channel amount in msat
    pub amount_msat: u64,
    /// The announcing node's policy
    pub policy: Policy,
}

/// A full graph snapshot
#[derive(Clone, Debug, Default)]
pub struct NetworkGraph {
    /// Nodes
    pub nodes: Vec<NodeAnnouncement>,
    /// Directional channel announcements
    pub edges: Vec<DirectionalAnnouncement>,
}

/// The funding outpoint of a channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChanPoint {
    /// Funding transaction id
    pub txid: Txid,
    /// Funding output index
    pub vout: u32,
}

impl ChanPoint {
    /// As a bitcoin outpoint
    pub fn outpoint(&self) -> OutPoint {
        OutPoint { txid: self.txid, vout: self.vout }
    }
}

impl Display for ChanPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// A bidirectional channel produced by consolidation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Short channel id
    pub short_id: ShortChannelId,
    /// Capacity in satoshi
    pub capacity: u64,
    /// Latest policy update of either side
    pub last_update: u64,
    /// First endpoint
    pub node1_pub: String,
    /// Second endpoint
    pub node2_pub: String,
    /// Policy advertised by node1
    pub node1_policy: Option<Policy>,
    /// Policy advertised by node2
    pub node2_policy: Option<Policy>,
    /// Funding outpoint
    pub chan_point: ChanPoint,
}

impl Channel {
    /// Store primary key
    pub fn id(&self) -> u64 {
        self.short_id.to_u64()
    }
}

/// Stored node status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Absent from the latest snapshot
    Inactive = 0,
    /// Present in the latest snapshot
    Active = 1,
}

/// Stored channel status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelStatus {
    /// Absent from the latest snapshot, or an endpoint is inactive
    Inactive = 0,
    /// Present in the latest snapshot
    Open = 1,
    /// Funding output spent on chain, terminal
    Closed = 2,
}

impl Display for ChannelStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Inactive => write!(f, "inactive"),
            ChannelStatus::Open => write!(f, "open"),
            ChannelStatus::Closed => write!(f, "closed"),
        }
    }
}

/// A node as recorded in the store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredNode {
    /// Hex encoded node public key
    pub public_key: String,
    /// Node alias
    pub alias: String,
    /// Display color
    pub color: String,
    /// Feature bits
    pub features: Vec<Feature>,
    /// Max of the node announcement and its channels' policy updates
    pub updated_at: u64,
    /// Earliest evidence of the node's existence
    pub first_seen: u64,
    /// Status
    pub status: NodeStatus,
}

/// A channel as recorded in the store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChannel {
    /// Short channel id
    pub short_id: ShortChannelId,
    /// Capacity in satoshi
    pub capacity: u64,
    /// Funding outpoint
    pub chan_point: ChanPoint,
    /// First endpoint
    pub node1_public_key: String,
    /// Second endpoint
    pub node2_public_key: String,
    /// Policy advertised by node1
    pub node1_policy: Option<Policy>,
    /// Policy advertised by node2
    pub node2_policy: Option<Policy>,
    /// Latest policy update
    pub updated_at: u64,
    /// Block time of the funding transaction
    pub created: Option<u64>,
    /// Status
    pub status: ChannelStatus,
    /// Block time of the spending transaction
    pub closing_date: Option<u64>,
    /// Spending transaction
    pub closing_transaction_id: Option<Txid>,
}

impl StoredChannel {
    /// Store primary key
    pub fn id(&self) -> u64 {
        self.short_id.to_u64()
    }
}

/// Input to the first-seen backfill
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeFirstSeen {
    /// Node public key
    pub public_key: String,
    /// Currently stored first-seen time
    pub first_seen: u64,
    /// Earliest creation date among the node's channels
    pub earliest_channel_created: Option<u64>,
}
