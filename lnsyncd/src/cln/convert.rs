//! Conversion of Core Lightning `listnodes` and `listchannels` output into
//! graph snapshot entries.

use std::collections::BTreeMap;

use lnsync_core::features::decode_features;
use lnsync_core::model::{DirectionalAnnouncement, NodeAddress, NodeAnnouncement, Policy};
#[allow(unused_imports)]
use log::{debug, warn};
use serde::de::{self, Deserializer};
use serde::Deserialize;

/// Custom record type carrying the liquidity ad compact lease
pub const WILL_FUND_RECORD_TYPE: u64 = 1;

#[derive(Deserialize, Debug)]
pub struct ListNodesResponse {
    pub nodes: Vec<ClnNode>,
}

#[derive(Deserialize, Debug)]
pub struct ListChannelsResponse {
    pub channels: Vec<ClnChannel>,
}

#[derive(Deserialize, Debug)]
pub struct ClnAddress {
    #[serde(rename = "type")]
    pub address_type: String,
    pub address: Option<String>,
    pub port: u16,
}

#[derive(Deserialize, Debug)]
pub struct ClnWillFund {
    pub compact_lease: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ClnNode {
    pub nodeid: String,
    pub alias: Option<String>,
    pub color: Option<String>,
    pub last_timestamp: Option<u64>,
    pub features: Option<String>,
    #[serde(default)]
    pub addresses: Vec<ClnAddress>,
    pub option_will_fund: Option<ClnWillFund>,
}

#[derive(Deserialize, Debug)]
pub struct ClnChannel {
    pub source: String,
    pub destination: String,
    pub short_channel_id: String,
    #[serde(deserialize_with = "deserialize_msat")]
    pub amount_msat: u64,
    pub active: bool,
    pub last_update: Option<u64>,
    pub base_fee_millisatoshi: u32,
    pub fee_per_millionth: u32,
    pub delay: u32,
    #[serde(deserialize_with = "deserialize_msat")]
    pub htlc_minimum_msat: u64,
    #[serde(deserialize_with = "deserialize_msat")]
    pub htlc_maximum_msat: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Msat {
    Int(u64),
    Str(String),
}

// Older releases render amounts as "<n>msat" strings
fn deserialize_msat<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Msat::deserialize(deserializer)? {
        Msat::Int(v) => Ok(v),
        Msat::Str(s) => s
            .trim_end_matches("msat")
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid msat amount {}", s))),
    }
}

fn convert_address(addr: &ClnAddress) -> Option<NodeAddress> {
    let host = addr.address.as_ref()?;
    let host = if addr.address_type == "ipv6" { format!("[{}]", host) } else { host.clone() };
    Some(NodeAddress { network: addr.address_type.clone(), addr: format!("{}:{}", host, addr.port) })
}

/// Convert a `listnodes` entry
pub fn convert_node(node: &ClnNode) -> NodeAnnouncement {
    let mut custom_records = BTreeMap::new();
    if let Some(will_fund) = &node.option_will_fund {
        match hex::decode(will_fund.compact_lease.as_deref().unwrap_or("")) {
            Ok(lease) => {
                custom_records.insert(WILL_FUND_RECORD_TYPE, lease);
            }
            Err(e) => {
                warn!("Cannot decode option_will_fund compact_lease for {}: {}", node.nodeid, e);
            }
        }
    }
    NodeAnnouncement {
        public_key: node.nodeid.clone(),
        alias: node.alias.clone().unwrap_or_default(),
        color: format!("#{}", node.color.as_deref().unwrap_or("")),
        features: decode_features(node.features.as_deref().unwrap_or("")),
        addresses: node.addresses.iter().filter_map(convert_address).collect(),
        custom_records,
        last_update: node.last_timestamp.unwrap_or(0),
    }
}

/// Convert a `listchannels` entry, one direction of a channel
pub fn convert_channel(channel: &ClnChannel) -> DirectionalAnnouncement {
    let last_update = channel.last_update.unwrap_or(0);
    DirectionalAnnouncement {
        short_channel_id: channel.short_channel_id.clone(),
        source: channel.source.clone(),
        destination: channel.destination.clone(),
        amount_msat: channel.amount_msat,
        policy: Policy {
            time_lock_delta: channel.delay,
            min_htlc: channel.htlc_minimum_msat,
            max_htlc: channel.htlc_maximum_msat,
            fee_base: channel.base_fee_millisatoshi,
            fee_rate_proportional: channel.fee_per_millionth,
            disabled: !channel.active,
            last_update,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NODE_A: &str = "02aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const NODE_B: &str = "03bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn node_from(value: serde_json::Value) -> ClnNode {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn node_test() {
        let node = node_from(json!({
            "nodeid": NODE_A,
            "alias": "ACINQ",
            "color": "49daaa",
            "last_timestamp": 1700000000u64,
            "features": "8201",
            "addresses": [
                {"type": "ipv4", "address": "203.0.113.7", "port": 9735},
                {"type": "ipv6", "address": "2001:db8::1", "port": 9735},
                {"type": "torv3", "address": "abcdefg.onion", "port": 9735},
                {"type": "websocket", "port": 9736}
            ]
        }));
        let ann = convert_node(&node);
        assert_eq!(ann.public_key, NODE_A);
        assert_eq!(ann.alias, "ACINQ");
        assert_eq!(ann.color, "#49daaa");
        assert_eq!(ann.last_update, 1700000000);
        assert_eq!(ann.features.iter().map(|f| f.bit).collect::<Vec<_>>(), vec![0, 9, 15]);
        let addrs: Vec<_> = ann.addresses.iter().map(|a| a.addr.as_str()).collect();
        assert_eq!(addrs, vec!["203.0.113.7:9735", "[2001:db8::1]:9735", "abcdefg.onion:9735"]);
        assert_eq!(ann.addresses[1].network, "ipv6");
        assert!(ann.custom_records.is_empty());
    }

    #[test]
    fn sparse_node_test() {
        // nodes only known from channel announcements carry just their id
        let ann = convert_node(&node_from(json!({"nodeid": NODE_B})));
        assert_eq!(ann.alias, "");
        assert_eq!(ann.color, "#");
        assert_eq!(ann.last_update, 0);
        assert!(ann.features.is_empty());
        assert!(ann.addresses.is_empty());
    }

    #[test]
    fn will_fund_test() {
        let ann = convert_node(&node_from(json!({
            "nodeid": NODE_A,
            "option_will_fund": {"lease_fee_base_msat": 1000, "compact_lease": "0064000003e8"}
        })));
        assert_eq!(
            ann.custom_records.get(&WILL_FUND_RECORD_TYPE),
            Some(&vec![0x00, 0x64, 0x00, 0x00, 0x03, 0xe8])
        );

        let ann = convert_node(&node_from(json!({
            "nodeid": NODE_A,
            "option_will_fund": {"compact_lease": "zz"}
        })));
        assert!(ann.custom_records.is_empty());
    }

    #[test]
    fn channel_test() {
        let channels: ListChannelsResponse = serde_json::from_value(json!({"channels": [
            {
                "source": NODE_A,
                "destination": NODE_B,
                "short_channel_id": "700000x3x1",
                "direction": 0,
                "public": true,
                "amount_msat": 500000000u64,
                "message_flags": 1,
                "channel_flags": 0,
                "active": true,
                "last_update": 1700000100u64,
                "base_fee_millisatoshi": 1000,
                "fee_per_millionth": 100,
                "delay": 144,
                "htlc_minimum_msat": 1000,
                "htlc_maximum_msat": 495000000u64,
                "features": ""
            },
            {
                "source": NODE_B,
                "destination": NODE_A,
                "short_channel_id": "700000x3x1",
                "amount_msat": "500000000msat",
                "active": false,
                "base_fee_millisatoshi": 0,
                "fee_per_millionth": 1,
                "delay": 40,
                "htlc_minimum_msat": "1msat",
                "htlc_maximum_msat": "495000000msat"
            }
        ]}))
        .unwrap();

        let a = convert_channel(&channels.channels[0]);
        assert_eq!(a.short_channel_id, "700000x3x1");
        assert_eq!(a.source, NODE_A);
        assert_eq!(a.destination, NODE_B);
        assert_eq!(a.amount_msat, 500_000_000);
        assert_eq!(
            a.policy,
            Policy {
                time_lock_delta: 144,
                min_htlc: 1000,
                max_htlc: 495_000_000,
                fee_base: 1000,
                fee_rate_proportional: 100,
                disabled: false,
                last_update: 1700000100,
            }
        );

        let b = convert_channel(&channels.channels[1]);
        assert_eq!(b.amount_msat, 500_000_000);
        assert_eq!(b.policy.min_htlc, 1);
        assert!(b.policy.disabled);
        assert_eq!(b.policy.last_update, 0);
    }

    #[test]
    fn bad_msat_test() {
        let res: Result<ClnChannel, _> = serde_json::from_value(json!({
            "source": NODE_A,
            "destination": NODE_B,
            "short_channel_id": "700000x3x1",
            "amount_msat": "lots",
            "active": true,
            "base_fee_millisatoshi": 0,
            "fee_per_millionth": 1,
            "delay": 40,
            "htlc_minimum_msat": 1,
            "htlc_maximum_msat": 2
        }));
        assert!(res.is_err());
    }
}
