//! Entity identifiers.
//!
//! An `EntityId` is derived from an entity's Ed25519 public key using
//! BLAKE3 with a domain prefix:
//!
//! ```text
//! BLAKE3(len || ENTITY_ID_DOMAIN || len || public_key_bytes)
//! ```
//!
//! Ids are totally ordered by their bytes. The consensus layer relies on
//! this ordering for round-robin proposer rotation, so it must be
//! identical on every node.

use serde::{Deserialize, Serialize};
use fidelis_crypto::{Hash256, PublicKey};

use crate::Result;

/// Domain separator for entity id derivation.
const ENTITY_ID_DOMAIN: &[u8] = b"FIDELIS-ENTITY-ID-v1";

/// A unique identifier for an entity, derived from its public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(Hash256);

impl EntityId {
    /// Size of the id in bytes.
    pub const SIZE: usize = 32;

    /// Derive the id for a public key.
    #[must_use]
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self(Hash256::hash_many(&[ENTITY_ID_DOMAIN, public_key.as_bytes()]))
    }

    /// Create an id from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Crypto` if the input is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self(Hash256::from_bytes(bytes)?))
    }

    /// Get the id as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Get the underlying hash.
    #[must_use]
    pub fn as_hash(&self) -> &Hash256 {
        &self.0
    }

    /// Format as a 64-character lowercase hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// Parse from a hex string.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Crypto` on malformed input.
    pub fn from_hex(s: &str) -> Result<Self> {
        Ok(Self(Hash256::from_hex(s)?))
    }

    /// First 8 bytes as hex, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        self.to_hex()[..16].to_string()
    }
}

impl std::fmt::Debug for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EntityId({})", self.short())
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short())
    }
}

impl AsRef<[u8]> for EntityId {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fidelis_crypto::SigningKeyPair;

    #[test]
    fn test_id_is_deterministic_for_key() {
        let keypair = SigningKeyPair::from_seed(&[1u8; 32]);
        let a = EntityId::from_public_key(keypair.public_key());
        let b = EntityId::from_public_key(keypair.public_key());
        assert_eq!(a, b);
    }

    #[test]
    fn test_id_is_domain_separated() {
        let keypair = SigningKeyPair::from_seed(&[2u8; 32]);
        let id = EntityId::from_public_key(keypair.public_key());
        let raw = Hash256::hash(keypair.public_key().as_bytes());
        assert_ne!(id.as_hash(), &raw);
    }

    #[test]
    fn test_hex_roundtrip() {
        let keypair = SigningKeyPair::generate();
        let id = EntityId::from_public_key(keypair.public_key());
        assert_eq!(EntityId::from_hex(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn test_short_display() {
        let keypair = SigningKeyPair::generate();
        let id = EntityId::from_public_key(keypair.public_key());
        assert_eq!(id.short().len(), 16);
        assert_eq!(format!("{}", id), id.short());
    }

    #[test]
    fn test_ordering_is_total_and_stable() {
        let mut ids: Vec<EntityId> = (0u8..8)
            .map(|i| EntityId::from_public_key(SigningKeyPair::from_seed(&[i; 32]).public_key()))
            .collect();
        ids.sort();
        for pair in ids.windows(2) {
            assert!(pair[0].as_bytes() < pair[1].as_bytes());
        }
    }

    #[test]
    fn test_from_bytes_wrong_length() {
        assert!(EntityId::from_bytes(&[0u8; 16]).is_err());
    }
}
