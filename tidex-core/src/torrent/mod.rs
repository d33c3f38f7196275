//! Torrent identity and tracker swarm scraping

pub mod tracker;

use std::fmt;
use std::str::FromStr;

use data_encoding::BASE32;

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the info dictionary. Magnet links carry it either as
/// 40 hex characters or as 32 base32 characters; both forms parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase hex form, as used in cache keys and logs.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for InfoHash {
    type Err = InfoHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bytes = match s.len() {
            40 => hex::decode(s).map_err(|e| InfoHashError::InvalidHex {
                reason: e.to_string(),
            })?,
            32 => BASE32
                .decode(s.to_ascii_uppercase().as_bytes())
                .map_err(|e| InfoHashError::InvalidBase32 {
                    reason: e.to_string(),
                })?,
            length => return Err(InfoHashError::InvalidLength { length }),
        };

        let hash: [u8; 20] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| InfoHashError::InvalidLength { length: v.len() })?;
        Ok(Self(hash))
    }
}

/// Errors raised when a textual info hash cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InfoHashError {
    #[error("expected 40 hex or 32 base32 characters, got {length}")]
    InvalidLength { length: usize },

    #[error("invalid hex digest: {reason}")]
    InvalidHex { reason: String },

    #[error("invalid base32 digest: {reason}")]
    InvalidBase32 { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_info_hash_display() {
        let hash = [
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef, 0x01, 0x23, 0x45, 0x67,
        ];
        let info_hash = InfoHash::new(hash);
        assert_eq!(info_hash.to_string(), HEX);
        assert_eq!(info_hash.to_hex(), HEX);
    }

    #[test]
    fn test_parse_hex_accepts_uppercase() {
        let parsed: InfoHash = HEX.to_uppercase().parse().unwrap();
        assert_eq!(parsed.to_string(), HEX);
    }

    #[test]
    fn test_parse_base32_matches_hex() {
        let from_hex: InfoHash = HEX.parse().unwrap();
        let encoded = BASE32.encode(from_hex.as_bytes());
        assert_eq!(encoded.len(), 32);

        let from_base32: InfoHash = encoded.to_lowercase().parse().unwrap();
        assert_eq!(from_base32, from_hex);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            "abc".parse::<InfoHash>(),
            Err(InfoHashError::InvalidLength { length: 3 })
        );
        assert!(matches!(
            "zz23456789abcdef0123456789abcdef01234567".parse::<InfoHash>(),
            Err(InfoHashError::InvalidHex { .. })
        ));
        assert!(matches!(
            "11111111111111111111111111111111".parse::<InfoHash>(),
            Err(InfoHashError::InvalidBase32 { .. })
        ));
    }
}
