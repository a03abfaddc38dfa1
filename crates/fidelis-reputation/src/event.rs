//! Witnessed events and attestations.
//!
//! ## Signing
//!
//! An event body (subject, context, action, outcome, timestamp, sequence)
//! is hashed canonically under [`EVENT_DOMAIN`]. That hash is the event id
//! that attestations bind to. The subject and each listed witness sign the
//! hash under separate role prefixes, so a subject signature can never be
//! replayed as a witness mark.
//!
//! An [`Attestation`] is a standalone signed claim by a witness that the
//! event with a given hash occurred.

use chrono::{DateTime, Utc};
use fidelis_crypto::{canonical_hash, Hash256, Signature};
use fidelis_identity::{EntityId, EntityKeyPair, KeyDirectory};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::tensor::ContextId;
use crate::{ReputationError, Result};

/// Domain separator for event body hashing.
pub const EVENT_DOMAIN: &[u8] = b"FIDELIS-EVENT-v1";

/// Role prefix for the subject's signature.
const SUBJECT_ROLE: &[u8] = b"FIDELIS-EVENT-SUBJECT-v1";

/// Role prefix for witness marks.
const WITNESS_ROLE: &[u8] = b"FIDELIS-EVENT-WITNESS-v1";

/// Domain separator for attestations.
const ATTESTATION_DOMAIN: &[u8] = b"FIDELIS-ATTESTATION-v1";

/// Maximum witness marks on a single event.
pub const MAX_WITNESS_MARKS: usize = 64;

/// Maximum length of an action descriptor in bytes.
pub const MAX_ACTION_LEN: usize = 256;

/// Result of the action an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// The action succeeded.
    Success,
    /// The action failed.
    Failure,
    /// The result is contested.
    Disputed,
}

impl Outcome {
    /// Numeric score used for rolling consistency: 1, 0.5 or 0.
    #[must_use]
    pub fn score(self) -> f64 {
        match self {
            Self::Success => 1.0,
            Self::Disputed => 0.5,
            Self::Failure => 0.0,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Disputed => "disputed",
        };
        f.write_str(s)
    }
}

/// Describes what was done, e.g. `"analyze:dataset"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionDescriptor(String);

impl ActionDescriptor {
    /// Create a descriptor.
    ///
    /// # Errors
    ///
    /// Rejects empty descriptors and those over [`MAX_ACTION_LEN`] bytes.
    pub fn new(action: impl Into<String>) -> Result<Self> {
        let action = action.into();
        if action.is_empty() || action.len() > MAX_ACTION_LEN {
            return Err(ReputationError::MalformedEvent(format!(
                "action descriptor must be 1..={} bytes",
                MAX_ACTION_LEN
            )));
        }
        Ok(Self(action))
    }

    /// Descriptor text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A witness's signature over an event hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessMark {
    /// Witness entity.
    pub witness: EntityId,
    /// Signature over the witness role prefix and event hash.
    pub signature: Signature,
}

#[derive(Serialize)]
struct EventBody<'a> {
    subject: &'a EntityId,
    context: &'a ContextId,
    action: &'a ActionDescriptor,
    outcome: Outcome,
    timestamp: &'a DateTime<Utc>,
    sequence: u64,
}

/// An immutable record of an action and who saw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessedEvent {
    subject: EntityId,
    context: ContextId,
    action: ActionDescriptor,
    outcome: Outcome,
    timestamp: DateTime<Utc>,
    sequence: u64,
    witnesses: Vec<WitnessMark>,
    subject_signature: Signature,
}

impl WitnessedEvent {
    /// Create an event signed by its subject, with no witness marks yet.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if the body cannot be encoded.
    pub fn new(
        subject: &EntityKeyPair,
        context: ContextId,
        action: ActionDescriptor,
        outcome: Outcome,
        timestamp: DateTime<Utc>,
        sequence: u64,
    ) -> Result<Self> {
        let subject_id = subject.id();
        let hash = body_hash(&EventBody {
            subject: &subject_id,
            context: &context,
            action: &action,
            outcome,
            timestamp: &timestamp,
            sequence,
        })?;
        let subject_signature = subject.sign(&role_payload(SUBJECT_ROLE, &hash));
        Ok(Self {
            subject: subject_id,
            context,
            action,
            outcome,
            timestamp,
            sequence,
            witnesses: Vec::new(),
            subject_signature,
        })
    }

    /// Add a witness mark signed by `witness`.
    ///
    /// # Errors
    ///
    /// Rejects self-witnessing, duplicate witnesses, and more than
    /// [`MAX_WITNESS_MARKS`] marks.
    pub fn add_witness(&mut self, witness: &EntityKeyPair) -> Result<()> {
        if witness.id() == self.subject {
            return Err(ReputationError::MalformedEvent(
                "subject cannot witness its own event".into(),
            ));
        }
        if self.witnesses.iter().any(|m| m.witness == witness.id()) {
            return Err(ReputationError::MalformedEvent(format!(
                "duplicate witness mark from {}",
                witness.id()
            )));
        }
        if self.witnesses.len() >= MAX_WITNESS_MARKS {
            return Err(ReputationError::MalformedEvent(format!(
                "more than {} witness marks",
                MAX_WITNESS_MARKS
            )));
        }
        let hash = self.event_hash()?;
        self.witnesses.push(WitnessMark {
            witness: witness.id(),
            signature: witness.sign(&role_payload(WITNESS_ROLE, &hash)),
        });
        Ok(())
    }

    /// Subject entity.
    #[must_use]
    pub fn subject(&self) -> EntityId {
        self.subject
    }

    /// Observer context.
    #[must_use]
    pub fn context(&self) -> &ContextId {
        &self.context
    }

    /// Action descriptor.
    #[must_use]
    pub fn action(&self) -> &ActionDescriptor {
        &self.action
    }

    /// Outcome.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Event time.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Sequence number, strictly increasing per subject.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Witness marks.
    #[must_use]
    pub fn witnesses(&self) -> &[WitnessMark] {
        &self.witnesses
    }

    /// Whether `id` is listed as a witness.
    #[must_use]
    pub fn lists_witness(&self, id: &EntityId) -> bool {
        self.witnesses.iter().any(|m| &m.witness == id)
    }

    /// Canonical hash of the event body.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if the body cannot be encoded.
    pub fn event_hash(&self) -> Result<Hash256> {
        body_hash(&EventBody {
            subject: &self.subject,
            context: &self.context,
            action: &self.action,
            outcome: self.outcome,
            timestamp: &self.timestamp,
            sequence: self.sequence,
        })
    }

    /// Check structure and every signature on the event.
    ///
    /// # Errors
    ///
    /// - `MalformedEvent` for bad field bounds or duplicate/self marks
    /// - `InvalidSignature` for a failing subject or witness signature
    pub fn verify(&self, keys: &dyn KeyDirectory) -> Result<Hash256> {
        self.context.validate()?;
        ActionDescriptor::new(self.action.as_str())?;
        if self.witnesses.len() > MAX_WITNESS_MARKS {
            return Err(ReputationError::MalformedEvent(format!(
                "more than {} witness marks",
                MAX_WITNESS_MARKS
            )));
        }

        let hash = self.event_hash()?;
        keys.verify(
            &self.subject,
            &role_payload(SUBJECT_ROLE, &hash),
            &self.subject_signature,
        )
        .map_err(|e| ReputationError::InvalidSignature(format!("subject: {}", e)))?;

        let mut seen = HashSet::with_capacity(self.witnesses.len());
        for mark in &self.witnesses {
            if mark.witness == self.subject {
                return Err(ReputationError::MalformedEvent(
                    "subject listed as its own witness".into(),
                ));
            }
            if !seen.insert(mark.witness) {
                return Err(ReputationError::MalformedEvent(format!(
                    "duplicate witness mark from {}",
                    mark.witness
                )));
            }
            keys.verify(
                &mark.witness,
                &role_payload(WITNESS_ROLE, &hash),
                &mark.signature,
            )
            .map_err(|e| ReputationError::InvalidSignature(format!("witness {}: {}", mark.witness, e)))?;
        }
        Ok(hash)
    }
}

/// A witness's signed claim that an event occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    witness: EntityId,
    event_hash: Hash256,
    attested_at: DateTime<Utc>,
    signature: Signature,
}

impl Attestation {
    /// Sign an attestation for `event`.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if the event cannot be hashed.
    pub fn sign(witness: &EntityKeyPair, event: &WitnessedEvent, at: DateTime<Utc>) -> Result<Self> {
        let event_hash = event.event_hash()?;
        let witness_id = witness.id();
        let signature = witness.sign(&Self::compute_signing_payload(&witness_id, &event_hash, at));
        Ok(Self {
            witness: witness_id,
            event_hash,
            attested_at: at,
            signature,
        })
    }

    /// Witness entity.
    #[must_use]
    pub fn witness(&self) -> EntityId {
        self.witness
    }

    /// Hash of the attested event.
    #[must_use]
    pub fn event_hash(&self) -> &Hash256 {
        &self.event_hash
    }

    /// Attestation time.
    #[must_use]
    pub fn attested_at(&self) -> DateTime<Utc> {
        self.attested_at
    }

    /// Bytes the witness signs.
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        Self::compute_signing_payload(&self.witness, &self.event_hash, self.attested_at)
    }

    fn compute_signing_payload(witness: &EntityId, event_hash: &Hash256, at: DateTime<Utc>) -> Vec<u8> {
        let mut payload = Vec::with_capacity(ATTESTATION_DOMAIN.len() + 32 + 32 + 8);
        payload.extend_from_slice(ATTESTATION_DOMAIN);
        payload.extend_from_slice(witness.as_bytes());
        payload.extend_from_slice(event_hash.as_bytes());
        payload.extend_from_slice(&at.timestamp_millis().to_be_bytes());
        payload
    }

    /// Verify the signature and that it binds `expected_event`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` on a hash mismatch or bad signature.
    pub fn verify(&self, keys: &dyn KeyDirectory, expected_event: &Hash256) -> Result<()> {
        if &self.event_hash != expected_event {
            return Err(ReputationError::InvalidSignature(format!(
                "attestation by {} binds a different event",
                self.witness
            )));
        }
        keys.verify(&self.witness, &self.signing_payload(), &self.signature)
            .map_err(|e| ReputationError::InvalidSignature(format!("attestation {}: {}", self.witness, e)))
    }
}

fn body_hash(body: &EventBody<'_>) -> Result<Hash256> {
    Ok(canonical_hash(EVENT_DOMAIN, body)?)
}

fn role_payload(role: &[u8], hash: &Hash256) -> Vec<u8> {
    let mut payload = Vec::with_capacity(role.len() + Hash256::SIZE);
    payload.extend_from_slice(role);
    payload.extend_from_slice(hash.as_bytes());
    payload
}
