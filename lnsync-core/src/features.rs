use serde::{Deserialize, Serialize};

/// A single feature bit advertised by a node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    /// Bit index, 0 being the least significant bit of the bitfield
    pub bit: u32,
    /// Human readable name, or "unknown"
    pub name: String,
    /// Even bits are the required form of a capability
    pub is_required: bool,
    /// Whether the bit is in the known feature table
    pub is_known: bool,
}

// Both the required and optional bit of a pair map to the same name.
const KNOWN_FEATURES: &[(u32, &str)] = &[
    (0, "data-loss-protect"),
    (1, "data-loss-protect"),
    (3, "initial-routing-sync"),
    (4, "upfront-shutdown-script"),
    (5, "upfront-shutdown-script"),
    (6, "gossip-queries"),
    (7, "gossip-queries"),
    (8, "tlv-onion"),
    (9, "tlv-onion"),
    (12, "static-remote-key"),
    (13, "static-remote-key"),
    (14, "payment-addr"),
    (15, "payment-addr"),
    (16, "multi-path-payments"),
    (17, "multi-path-payments"),
    (18, "wumbo-channels"),
    (19, "wumbo-channels"),
    (20, "anchor-commitments"),
    (21, "anchor-commitments"),
    (22, "anchors-zero-fee-htlc-tx"),
    (23, "anchors-zero-fee-htlc-tx"),
    (26, "shutdown-any-segwit"),
    (27, "shutdown-any-segwit"),
    (30, "amp"),
    (31, "amp"),
    (44, "explicit-commitment-type"),
    (45, "explicit-commitment-type"),
    (46, "scid-alias"),
    (47, "scid-alias"),
    (48, "payment-metadata"),
    (49, "payment-metadata"),
    (50, "zero-conf"),
    (51, "zero-conf"),
    (54, "keysend"),
    (55, "keysend"),
    (80, "taproot-channels"),
    (81, "taproot-channels"),
    (180, "taproot-channels-staging"),
    (181, "taproot-channels-staging"),
    (2022, "script-enforced-lease"),
    (2023, "script-enforced-lease"),
];

/// Look up the name of a known feature bit
pub fn feature_name(bit: u32) -> Option<&'static str> {
    KNOWN_FEATURES.iter().find(|(b, _)| *b == bit).map(|(_, name)| *name)
}

/// Decode a hex encoded feature bitfield into its set bits, in increasing bit order.
///
/// The last byte of the bitfield holds bits 0-7. Malformed input decodes to an
/// empty set.
pub fn decode_features(bitfield_hex: &str) -> Vec<Feature> {
    let bytes = match hex::decode(bitfield_hex.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return Vec::new(),
    };
    let mut features = Vec::new();
    for (byte_idx, byte) in bytes.iter().rev().enumerate() {
        for shift in 0..8 {
            if byte & (1 << shift) == 0 {
                continue;
            }
            let Ok(bit) = u32::try_from(byte_idx * 8 + shift) else {
                return features;
            };
            // parity decides, even for bits we do not recognize
            let is_required = bit % 2 == 0;
            let feature = match feature_name(bit) {
                Some(name) => Feature { bit, name: name.to_string(), is_required, is_known: true },
                None => Feature { bit, name: "unknown".to_string(), is_required, is_known: false },
            };
            features.push(feature);
        }
    }
    features
}
