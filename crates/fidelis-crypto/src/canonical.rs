//! Canonical encoding.
//!
//! Signatures and payload hashes are always computed over the bincode
//! encoding produced here, so every node derives the same bytes for the
//! same value. Decoding enforces a byte limit before allocation.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{CryptoError, Hash256, Result};

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode a value canonically.
///
/// # Errors
///
/// Returns `CryptoError::Encoding` if the value cannot be serialized.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    options()
        .serialize(value)
        .map_err(|e| CryptoError::Encoding(e.to_string()))
}

/// Hash the canonical encoding of a value under a domain separator.
///
/// # Errors
///
/// Returns `CryptoError::Encoding` if the value cannot be serialized.
pub fn canonical_hash<T: Serialize + ?Sized>(domain: &[u8], value: &T) -> Result<Hash256> {
    let bytes = canonical_bytes(value)?;
    Ok(Hash256::hash_many(&[domain, &bytes]))
}

/// Decode a canonically encoded value, refusing inputs above `limit` bytes.
///
/// The size check happens before any deserialization work so an oversized
/// datagram cannot force a large allocation.
///
/// # Errors
///
/// Returns `CryptoError::InputTooLarge` or `CryptoError::Encoding`.
pub fn decode_bounded<T: DeserializeOwned>(bytes: &[u8], limit: usize) -> Result<T> {
    if bytes.len() > limit {
        return Err(CryptoError::InputTooLarge {
            size: bytes.len(),
            limit,
        });
    }
    options()
        .with_limit(limit as u64)
        .deserialize(bytes)
        .map_err(|e| CryptoError::Encoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        counter: u64,
        label: String,
    }

    #[test]
    fn test_canonical_bytes_deterministic() {
        let a = Sample { counter: 7, label: "x".into() };
        let b = Sample { counter: 7, label: "x".into() };
        assert_eq!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
    }

    #[test]
    fn test_canonical_hash_domain_separated() {
        let value = Sample { counter: 1, label: "y".into() };
        let h1 = canonical_hash(b"DOMAIN-A", &value).unwrap();
        let h2 = canonical_hash(b"DOMAIN-B", &value).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_decode_bounded_roundtrip() {
        let value = Sample { counter: 99, label: "payload".into() };
        let bytes = canonical_bytes(&value).unwrap();
        let decoded: Sample = decode_bounded(&bytes, 1024).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_decode_bounded_rejects_oversized() {
        let value = Sample { counter: 1, label: "a".repeat(100) };
        let bytes = canonical_bytes(&value).unwrap();
        let result: Result<Sample> = decode_bounded(&bytes, 16);
        assert!(matches!(result, Err(CryptoError::InputTooLarge { .. })));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let value = Sample { counter: 1, label: "a".into() };
        let mut bytes = canonical_bytes(&value).unwrap();
        bytes.push(0xFF);
        let result: Result<Sample> = decode_bounded(&bytes, 1024);
        assert!(matches!(result, Err(CryptoError::Encoding(_))));
    }

    #[test]
    fn test_decode_garbage_is_error_not_panic() {
        let result: Result<Sample> = decode_bounded(&[0xFF; 12], 1024);
        assert!(result.is_err());
    }
}
