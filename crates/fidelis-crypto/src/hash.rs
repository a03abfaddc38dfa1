//! BLAKE3 hashing primitives.
//!
//! Provides a 256-bit hash type used for entity identifiers, event digests,
//! proposal ids and gossip payload hashes.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::{CryptoError, Result};

/// A 256-bit (32-byte) hash value using BLAKE3.
#[derive(Clone, Copy, Default, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Hash size in bytes.
    pub const SIZE: usize = 32;

    /// Create a Hash256 from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidHashLength {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    /// Wrap an owned byte array.
    #[must_use]
    pub const fn from_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the hash as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to owned byte array.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Hash a single input.
    #[must_use]
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash multiple inputs (domain separation).
    ///
    /// Each input is length-prefixed to prevent ambiguity.
    #[must_use]
    pub fn hash_many(inputs: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for input in inputs {
            hasher.update(&(input.len() as u64).to_le_bytes());
            hasher.update(input);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Check if this hash is all zeros.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.ct_eq(&[0u8; 32]).into()
    }

    /// Format as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64-character hex string.
    ///
    /// # Errors
    ///
    /// Returns an error on wrong length or non-hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != Self::SIZE * 2 {
            return Err(CryptoError::InvalidHashLength {
                expected: Self::SIZE * 2,
                actual: s.len(),
            });
        }
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidHexFormat(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl ConstantTimeEq for Hash256 {
    fn ct_eq(&self, other: &Self) -> subtle::Choice {
        self.0.ct_eq(&other.0)
    }
}

impl PartialEq for Hash256 {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}

impl Eq for Hash256 {}

impl PartialOrd for Hash256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Hash256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl std::hash::Hash for Hash256 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Bucket selection only, not a security operation.
        self.0.hash(state);
    }
}

impl std::fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash256({})", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let h1 = Hash256::hash(b"hello world");
        let h2 = Hash256::hash(b"hello world");
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_hash_different_inputs() {
        assert_ne!(Hash256::hash(b"hello"), Hash256::hash(b"world"));
    }

    #[test]
    fn test_hash_many_length_prefixed() {
        let h1 = Hash256::hash_many(&[b"hello", b"world"]);
        let h2 = Hash256::hash_many(&[b"helloworld"]);
        assert_ne!(h1, h2);

        let h3 = Hash256::hash_many(&[b"hel", b"loworld"]);
        assert_ne!(h1, h3);
    }

    #[test]
    fn test_hex_roundtrip() {
        let h = Hash256::hash(b"roundtrip");
        let parsed = Hash256::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(matches!(
            Hash256::from_hex("abcd"),
            Err(CryptoError::InvalidHashLength { .. })
        ));
        let bad = "zz".repeat(32);
        assert!(matches!(
            Hash256::from_hex(&bad),
            Err(CryptoError::InvalidHexFormat(_))
        ));
    }

    #[test]
    fn test_from_bytes_wrong_length() {
        assert!(Hash256::from_bytes(&[0u8; 31]).is_err());
        assert!(Hash256::from_bytes(&[0u8; 33]).is_err());
        assert!(Hash256::from_bytes(&[7u8; 32]).is_ok());
    }

    #[test]
    fn test_is_zero() {
        assert!(Hash256::default().is_zero());
        assert!(!Hash256::hash(b"x").is_zero());
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let low = Hash256::from_array([0u8; 32]);
        let mut high_bytes = [0u8; 32];
        high_bytes[0] = 1;
        let high = Hash256::from_array(high_bytes);
        assert!(low < high);
    }

    #[test]
    fn test_debug_truncates() {
        let h = Hash256::hash(b"debug");
        let debug = format!("{:?}", h);
        assert!(debug.starts_with("Hash256("));
        assert_eq!(debug.len(), "Hash256()".len() + 16);
    }
}
