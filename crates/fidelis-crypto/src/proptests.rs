//! Property-based tests for cryptographic primitives.
//!
//! These focus on:
//!
//! - Consistency (same input produces same output)
//! - Uniqueness (different inputs or keys produce different outputs)
//! - Error handling (malformed inputs are rejected, never panic)

use proptest::prelude::*;

use crate::{decode_bounded, Hash256, PublicKey, Signature, SigningKeyPair};

// ==================== Hash Property Tests ====================

proptest! {
    /// Hashing is deterministic.
    #[test]
    fn hash_deterministic(data: Vec<u8>) {
        prop_assert_eq!(Hash256::hash(&data), Hash256::hash(&data));
    }

    /// Hex encoding roundtrips for any digest.
    #[test]
    fn hash_hex_roundtrip(data: Vec<u8>) {
        let h = Hash256::hash(&data);
        prop_assert_eq!(Hash256::from_hex(&h.to_hex()).unwrap(), h);
    }

    /// Splitting the same bytes differently changes the multi-part hash.
    #[test]
    fn hash_many_split_sensitive(data in prop::collection::vec(any::<u8>(), 2..64), split in 1usize..63) {
        let split = split.min(data.len() - 1);
        let whole = Hash256::hash_many(&[&data]);
        let parts = Hash256::hash_many(&[&data[..split], &data[split..]]);
        prop_assert_ne!(whole, parts);
    }

    /// Arbitrary strings never panic the hex parser.
    #[test]
    fn hash_from_hex_never_panics(s in ".{0,80}") {
        let _ = Hash256::from_hex(&s);
    }
}

// ==================== Signature Property Tests ====================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A signature verifies for its own message only.
    #[test]
    fn signature_binds_message(msg: Vec<u8>, other: Vec<u8>) {
        let keypair = SigningKeyPair::generate();
        let sig = keypair.sign(&msg);
        prop_assert!(keypair.public_key().verify(&msg, &sig).is_ok());
        if msg != other {
            prop_assert!(keypair.public_key().verify(&other, &sig).is_err());
        }
    }

    /// Seeded keypairs are reproducible.
    #[test]
    fn seeded_keypair_reproducible(seed: [u8; 32]) {
        let a = SigningKeyPair::from_seed(&seed);
        let b = SigningKeyPair::from_seed(&seed);
        prop_assert_eq!(a.public_key(), b.public_key());
    }

    /// Random bytes never panic signature or key parsing.
    #[test]
    fn parsing_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = Signature::from_bytes(&bytes);
        let _ = PublicKey::from_bytes(&bytes);
        let _: crate::Result<(u64, String)> = decode_bounded(&bytes, 256);
    }
}
