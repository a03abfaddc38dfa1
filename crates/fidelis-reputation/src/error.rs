//! Error types for reputation operations.

use chrono::{DateTime, Utc};
use fidelis_identity::EntityId;
use thiserror::Error;

use crate::audit::ReasonCode;
use crate::challenge::ChallengeId;
use crate::witness::DiversityViolation;

/// Errors that can occur during reputation operations.
#[derive(Error, Debug)]
pub enum ReputationError {
    /// A subject, witness or attestation signature failed to verify.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Event sequence not strictly greater than the last accepted one.
    #[error("Replayed sequence for {subject}: got {got}, last accepted {last}")]
    ReplayedSequence {
        /// Event subject.
        subject: EntityId,
        /// Last accepted sequence.
        last: u64,
        /// Sequence carried by the rejected event.
        got: u64,
    },

    /// Attestation set fails diversity requirements.
    #[error("Insufficient witness diversity: {0}")]
    InsufficientWitnessDiversity(DiversityViolation),

    /// A witness lacks the stake required for its tier.
    #[error("Insufficient stake for {entity}: required {required}, have {actual}")]
    InsufficientStake {
        /// The under-bonded entity.
        entity: EntityId,
        /// Minimum stake for the declared tier.
        required: u64,
        /// Current stake.
        actual: u64,
    },

    /// Subject is revoked.
    #[error("Entity revoked: {0}")]
    EntityRevoked(EntityId),

    /// Subject is permanently flagged after repeated challenge evasion.
    #[error("Entity permanently flagged: {0}")]
    EntityFlagged(EntityId),

    /// Subject is not registered.
    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),

    /// Event structure is invalid.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Invalid configuration or argument.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// Why it is invalid.
        reason: String,
    },

    /// No stake is held by the entity.
    #[error("No stake held by {0}")]
    StakeNotFound(EntityId),

    /// Stake is locked.
    #[error("Stake locked until {until}")]
    StakeLocked {
        /// End of the lock.
        until: DateTime<Utc>,
    },

    /// Withdrawal exceeds balance.
    #[error("Withdrawal of {requested} exceeds balance {available}")]
    WithdrawalExceedsBalance {
        /// Requested amount.
        requested: u64,
        /// Current balance.
        available: u64,
    },

    /// Challenge does not exist.
    #[error("Challenge not found: {0}")]
    ChallengeNotFound(ChallengeId),

    /// Challenge is no longer open.
    #[error("Challenge {0} is closed")]
    ChallengeClosed(ChallengeId),

    /// Response arrived after the deadline.
    #[error("Response window for challenge {id} closed at {deadline}")]
    ResponseWindowClosed {
        /// Challenge id.
        id: ChallengeId,
        /// Deadline that passed.
        deadline: DateTime<Utc>,
    },

    /// Challenge refused by policy.
    #[error("Challenge rejected: {0}")]
    ChallengeRejected(String),

    /// Canonical encoding failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] fidelis_crypto::CryptoError),
}

impl ReputationError {
    /// Audit reason code for this error.
    #[must_use]
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::InvalidSignature(_) => ReasonCode::InvalidSignature,
            Self::ReplayedSequence { .. } => ReasonCode::ReplayedSequence,
            Self::InsufficientWitnessDiversity(_) => ReasonCode::InsufficientWitnessDiversity,
            Self::InsufficientStake { .. } => ReasonCode::InsufficientStake,
            Self::EntityRevoked(_) => ReasonCode::EntityRevoked,
            Self::EntityFlagged(_) => ReasonCode::EntityFlagged,
            Self::UnknownEntity(_) => ReasonCode::UnknownEntity,
            Self::MalformedEvent(_) | Self::Crypto(_) => ReasonCode::MalformedEvent,
            _ => ReasonCode::Other,
        }
    }
}

/// Result type for reputation operations.
pub type Result<T> = std::result::Result<T, ReputationError>;
