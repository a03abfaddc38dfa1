//! Entity keypairs.

use fidelis_crypto::{PublicKey, Signature, SigningKeyPair};

use crate::EntityId;

/// A signing keypair together with the entity id it derives.
///
/// Used by nodes to sign gossip envelopes and consensus votes, and by
/// agents and witnesses to sign events and attestations.
#[derive(Debug)]
pub struct EntityKeyPair {
    signing: SigningKeyPair,
    id: EntityId,
}

impl EntityKeyPair {
    /// Generate a fresh keypair.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_signing(SigningKeyPair::generate())
    }

    /// Derive a keypair deterministically from a seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing(SigningKeyPair::from_seed(seed))
    }

    fn from_signing(signing: SigningKeyPair) -> Self {
        let id = EntityId::from_public_key(signing.public_key());
        Self { signing, id }
    }

    /// The entity id for this keypair.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// The public verification key.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        self.signing.public_key()
    }

    /// Sign a message.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }
}
