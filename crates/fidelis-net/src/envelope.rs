//! Signed gossip envelopes.
//!
//! An envelope carries an opaque canonically encoded payload, the sender's
//! monotonically increasing counter and a signature over
//! `domain || counter || payload_hash`. Receivers drop anything whose
//! signature, hash or size does not check out before touching the payload.

use fidelis_crypto::{canonical_bytes, decode_bounded, Hash256, Signature};
use fidelis_identity::{EntityId, EntityKeyPair, KeyDirectory};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{NetError, Result};

/// Domain separator for envelope signatures.
const ENVELOPE_DOMAIN: &[u8] = b"FIDELIS-GOSSIP-ENVELOPE-v1";

/// Maximum size of an encoded envelope frame in bytes.
///
/// Checked before deserialization so a crafted frame cannot force a large
/// allocation.
pub const MAX_ENVELOPE_SIZE: usize = 64 * 1024;

/// Maximum size of an envelope payload in bytes.
pub const MAX_PAYLOAD_SIZE: usize = MAX_ENVELOPE_SIZE - 256;

/// A signed, self-authenticating gossip message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    /// Originating entity.
    pub sender: EntityId,
    /// Sender's message counter, strictly increasing.
    pub counter: u64,
    /// Hash of `payload`.
    pub payload_hash: Hash256,
    /// Canonically encoded payload.
    pub payload: Vec<u8>,
    /// Sender's signature.
    pub signature: Signature,
}

impl SignedEnvelope {
    /// Encode and sign `payload`.
    ///
    /// # Errors
    ///
    /// Returns `TooLarge` if the encoded payload exceeds
    /// [`MAX_PAYLOAD_SIZE`], or `Crypto` if encoding fails.
    pub fn seal<P: Serialize>(keys: &EntityKeyPair, counter: u64, payload: &P) -> Result<Self> {
        let payload = canonical_bytes(payload)?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(NetError::TooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let payload_hash = Hash256::hash(&payload);
        let signature = keys.sign(&Self::compute_signing_payload(counter, &payload_hash));
        Ok(Self {
            sender: keys.id(),
            counter,
            payload_hash,
            payload,
            signature,
        })
    }

    /// Bytes the sender signs.
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        Self::compute_signing_payload(self.counter, &self.payload_hash)
    }

    fn compute_signing_payload(counter: u64, payload_hash: &Hash256) -> Vec<u8> {
        let mut payload = Vec::with_capacity(ENVELOPE_DOMAIN.len() + 8 + 32);
        payload.extend_from_slice(ENVELOPE_DOMAIN);
        payload.extend_from_slice(&counter.to_le_bytes());
        payload.extend_from_slice(payload_hash.as_bytes());
        payload
    }

    /// Whether the payload matches its hash.
    #[must_use]
    pub fn hash_matches(&self) -> bool {
        Hash256::hash(&self.payload) == self.payload_hash
    }

    /// Verify the sender's signature against the directory.
    ///
    /// # Errors
    ///
    /// Returns `Identity` for an unknown or revoked sender or a bad
    /// signature.
    pub fn verify(&self, keys: &dyn KeyDirectory) -> Result<()> {
        keys.verify_active(&self.sender, &self.signing_payload(), &self.signature)?;
        Ok(())
    }

    /// Decode the payload.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if the payload is oversized or malformed.
    pub fn open<P: DeserializeOwned>(&self) -> Result<P> {
        Ok(decode_bounded(&self.payload, MAX_PAYLOAD_SIZE)?)
    }

    /// Encode the envelope as a frame.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(canonical_bytes(self)?)
    }

    /// Decode a frame, checking its size first.
    ///
    /// # Errors
    ///
    /// Returns `TooLarge` for frames above `max`, or `Crypto` for malformed
    /// frames.
    pub fn from_bytes(bytes: &[u8], max: usize) -> Result<Self> {
        if bytes.len() > max {
            return Err(NetError::TooLarge { size: bytes.len(), max });
        }
        Ok(decode_bounded(bytes, max)?)
    }
}
