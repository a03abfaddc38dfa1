//! Ed25519 signatures.
//!
//! Every authenticated artifact in the federation (witnessed events,
//! attestations, consensus votes, gossip envelopes) is signed with an
//! Ed25519 key. Verification is strict: small-order and non-canonical
//! encodings are rejected.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CryptoError, Hash256, Result};

/// Size of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Size of an Ed25519 secret seed in bytes.
pub const SECRET_KEY_SIZE: usize = 32;

/// Ed25519 public key for signature verification.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Create from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not 32 bytes or is not a valid point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PUBLIC_KEY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            })?;
        VerifyingKey::from_bytes(&arr)
            .map(Self)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    /// Get the key as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }

    /// BLAKE3 fingerprint of the key.
    #[must_use]
    pub fn fingerprint(&self) -> Hash256 {
        Hash256::hash(self.as_bytes())
    }

    /// Verify a signature against a message.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::SignatureVerification` if the signature is invalid.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        self.0
            .verify_strict(message, &signature.0)
            .map_err(|_| CryptoError::SignatureVerification)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.as_bytes();
        write!(
            f,
            "PublicKey({:02x}{:02x}{:02x}{:02x}..)",
            bytes[0], bytes[1], bytes[2], bytes[3]
        )
    }
}

/// Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    /// Create from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 64 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SIGNATURE_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidSignatureLength {
                    expected: SIGNATURE_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self(ed25519_dalek::Signature::from_bytes(&arr)))
    }

    /// Get the signature bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SIGNATURE_SIZE] {
        self.0.to_bytes()
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.to_bytes();
        write!(
            f,
            "Signature({:02x}{:02x}{:02x}{:02x}..)",
            bytes[0], bytes[1], bytes[2], bytes[3]
        )
    }
}

/// Secret seed of a signing key.
#[derive(Zeroize, ZeroizeOnDrop)]
struct SecretSeed([u8; SECRET_KEY_SIZE]);

/// Ed25519 signing keypair.
///
/// Only the 32-byte seed is stored, zeroized when the keypair is dropped.
/// The expanded signing key lives for one signature.
pub struct SigningKeyPair {
    seed: SecretSeed,
    public: PublicKey,
}

impl SigningKeyPair {
    /// Generate a new random keypair from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Derive a keypair deterministically from a 32-byte seed.
    ///
    /// Intended for simulations and tests where reproducible identities
    /// are needed.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    fn from_signing_key(secret: SigningKey) -> Self {
        let public = PublicKey(secret.verifying_key());
        Self {
            seed: SecretSeed(secret.to_bytes()),
            public,
        }
    }

    /// Get the public key.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Sign a message.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        let secret = SigningKey::from_bytes(&self.seed.0);
        Signature(secret.sign(message))
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_seed_zeroizes() {
        let mut seed = SecretSeed([7u8; SECRET_KEY_SIZE]);
        seed.zeroize();
        assert_eq!(seed.0, [0u8; SECRET_KEY_SIZE]);
    }

    #[test]
    fn test_seeded_signature_matches_dalek() {
        let seed = [9u8; 32];
        let keypair = SigningKeyPair::from_seed(&seed);
        let expected = SigningKey::from_bytes(&seed).sign(b"vote");
        assert_eq!(keypair.sign(b"vote").to_bytes(), expected.to_bytes());
        assert_eq!(keypair.sign(b"vote"), keypair.sign(b"vote"));
    }

    #[test]
    fn test_sign_verify() {
        let keypair = SigningKeyPair::generate();
        let sig = keypair.sign(b"attest");
        assert!(keypair.public_key().verify(b"attest", &sig).is_ok());
    }

    #[test]
    fn test_verify_wrong_message_fails() {
        let keypair = SigningKeyPair::generate();
        let sig = keypair.sign(b"original");
        assert!(matches!(
            keypair.public_key().verify(b"tampered", &sig),
            Err(CryptoError::SignatureVerification)
        ));
    }

    #[test]
    fn test_verify_wrong_key_fails() {
        let a = SigningKeyPair::generate();
        let b = SigningKeyPair::generate();
        let sig = a.sign(b"message");
        assert!(b.public_key().verify(b"message", &sig).is_err());
    }

    #[test]
    fn test_from_seed_deterministic() {
        let seed = [42u8; 32];
        let a = SigningKeyPair::from_seed(&seed);
        let b = SigningKeyPair::from_seed(&seed);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.sign(b"m"), b.sign(b"m"));
    }

    #[test]
    fn test_public_key_bytes_roundtrip() {
        let keypair = SigningKeyPair::generate();
        let restored = PublicKey::from_bytes(keypair.public_key().as_bytes()).unwrap();
        assert_eq!(&restored, keypair.public_key());
    }

    #[test]
    fn test_public_key_wrong_length() {
        assert!(matches!(
            PublicKey::from_bytes(&[0u8; 31]),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn test_signature_bytes_roundtrip() {
        let keypair = SigningKeyPair::generate();
        let sig = keypair.sign(b"bytes");
        let restored = Signature::from_bytes(&sig.to_bytes()).unwrap();
        assert_eq!(sig, restored);
        assert!(Signature::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let keypair = SigningKeyPair::generate();
        let debug = format!("{:?}", keypair);
        assert!(debug.contains("REDACTED"));
    }
}
