//! Content address for objects in the object store (§3 `Hash`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tools::hex::{digest_to_hex, hex_to_digest};

/// Typically 64 bytes (the spec leaves the exact width to the object
/// store's hash function; this crate standardizes on SHA-512-sized
/// digests). Equality is byte-equality; no total ordering is required by
/// the spec, but `Ord` is derived so hashes can be used as stable sort/map
/// keys without reaching for a second representation.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash(#[serde(with = "hash_bytes")] pub [u8; 64]);

impl Hash {
    pub const LEN: usize = 64;

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }
        let mut buf = [0u8; Self::LEN];
        buf.copy_from_slice(bytes);
        Some(Hash(buf))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        digest_to_hex(&self.0)
    }

    pub fn from_hex(hex: &str) -> anyhow::Result<Self> {
        let bytes = hex_to_digest(hex)?;
        Self::from_slice(&bytes)
            .ok_or_else(|| anyhow::anyhow!("hash has wrong length: {} bytes", bytes.len()))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

mod hash_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::digest_to_hex(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = super::hex_to_digest(&s).map_err(serde::de::Error::custom)?;
        if bytes.len() != 64 {
            return Err(serde::de::Error::custom("hash must be 64 bytes"));
        }
        let mut buf = [0u8; 64];
        buf.copy_from_slice(&bytes);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let mut bytes = [0u8; 64];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        let hash = Hash(bytes);
        let hex = hash.to_hex();
        assert_eq!(Hash::from_hex(&hex).unwrap(), hash);
    }

    #[test]
    fn serde_round_trip() {
        let hash = Hash([7u8; 64]);
        let json = serde_json::to_string(&hash).unwrap();
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
