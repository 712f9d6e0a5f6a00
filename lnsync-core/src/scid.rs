use core::fmt::{self, Display, Formatter};
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const MAX_BLOCK_HEIGHT: u32 = 1 << 24;
const MAX_TX_INDEX: u32 = 1 << 24;

/// The on-chain address of a channel's funding output.
///
/// Renders as `HEIGHTxTXINDEXxOUTPUT` and packs into a `u64` as
/// `height << 40 | tx_index << 16 | output_index`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShortChannelId {
    /// Height of the block containing the funding transaction
    pub block_height: u32,
    /// Index of the funding transaction within the block
    pub tx_index: u32,
    /// Index of the funding output within the transaction
    pub output_index: u16,
}

/// Short channel id parse error
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError(pub String);

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "invalid short channel id: {}", self.0)
    }
}

impl std::error::Error for ParseError {}

impl ShortChannelId {
    /// Create a short channel id, checking the component ranges
    pub fn new(block_height: u32, tx_index: u32, output_index: u16) -> Result<Self, ParseError> {
        if block_height >= MAX_BLOCK_HEIGHT || tx_index >= MAX_TX_INDEX {
            return Err(ParseError(format!("{}x{}x{}", block_height, tx_index, output_index)));
        }
        Ok(Self { block_height, tx_index, output_index })
    }

    /// Pack into the integer form used as the store's primary key
    pub fn to_u64(&self) -> u64 {
        (self.block_height as u64) << 40 | (self.tx_index as u64) << 16 | self.output_index as u64
    }

    /// Unpack the integer form
    pub fn from_u64(id: u64) -> Self {
        Self {
            block_height: ((id >> 40) & 0xff_ffff) as u32,
            tx_index: ((id >> 16) & 0xff_ffff) as u32,
            output_index: (id & 0xffff) as u16,
        }
    }
}

impl Display for ShortChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.block_height, self.tx_index, self.output_index)
    }
}

/// Accepts both the `HxTxO` form and the packed decimal form.
impl FromStr for ShortChannelId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError(s.to_string());
        if !s.contains('x') {
            let id: u64 = s.parse().map_err(|_| err())?;
            return Ok(Self::from_u64(id));
        }
        let mut parts = s.split('x');
        let block_height = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let tx_index = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let output_index = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        if parts.next().is_some() {
            return Err(err());
        }
        Self::new(block_height, tx_index, output_index).map_err(|_| err())
    }
}

impl Serialize for ShortChannelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ShortChannelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_test() {
        for (h, t, o) in [(0, 0, 0), (1, 2, 3), (700_000, 1234, 1), (0xff_ffff, 0xff_ffff, 0xffff)] {
            let scid = ShortChannelId::new(h, t, o).unwrap();
            assert_eq!(ShortChannelId::from_u64(scid.to_u64()), scid);
            assert_eq!(scid.to_string().parse::<ShortChannelId>().unwrap(), scid);
        }
    }

    #[test]
    fn known_value_test() {
        let scid: ShortChannelId = "539268x845x1".parse().unwrap();
        assert_eq!(scid.to_u64(), 592931436542885889);
        let packed: ShortChannelId = "592931436542885889".parse().unwrap();
        assert_eq!(packed, scid);
    }

    #[test]
    fn reject_test() {
        assert!("".parse::<ShortChannelId>().is_err());
        assert!("1x2".parse::<ShortChannelId>().is_err());
        assert!("1x2x3x4".parse::<ShortChannelId>().is_err());
        assert!("axbxc".parse::<ShortChannelId>().is_err());
        assert!("16777216x0x0".parse::<ShortChannelId>().is_err());
        assert!("1x2x65536".parse::<ShortChannelId>().is_err());
        assert!(ShortChannelId::new(0, 1 << 24, 0).is_err());
    }

    #[test]
    fn serde_test() {
        let scid = ShortChannelId::new(800_000, 12, 0).unwrap();
        let json = serde_json::to_string(&scid).unwrap();
        assert_eq!(json, "\"800000x12x0\"");
        assert_eq!(serde_json::from_str::<ShortChannelId>(&json).unwrap(), scid);
    }
}
