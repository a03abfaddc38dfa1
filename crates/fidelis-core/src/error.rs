//! Error types for federation node operations.

use fidelis_consensus::{ConsensusError, ProposalId};
use fidelis_crypto::CryptoError;
use fidelis_economy::EconomyError;
use fidelis_identity::IdentityError;
use fidelis_net::NetError;
use fidelis_reputation::ReputationError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// How a failure should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Bad or missing signature, unknown or revoked signer. Never retried.
    Authentication,
    /// Stale or replayed sequence or counter.
    Ordering,
    /// Diversity, stake or quorum requirements not met. Remediate and resubmit.
    PolicyViolation,
    /// A consensus round aborted. A new round may be submitted.
    ConsensusTimeout,
    /// An economic signal. Not a rejection.
    EconomicAnomaly,
    /// Configuration or local failure.
    Internal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Authentication => "authentication",
            Self::Ordering => "ordering",
            Self::PolicyViolation => "policy_violation",
            Self::ConsensusTimeout => "consensus_timeout",
            Self::EconomicAnomaly => "economic_anomaly",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Errors that can occur during federation node operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A proposal aborted after exhausting its rounds.
    #[error("Consensus timed out for proposal {proposal} after {rounds} rounds")]
    ConsensusTimeout {
        /// The aborted proposal.
        proposal: ProposalId,
        /// Rounds attempted.
        rounds: u32,
    },

    /// Cryptographic error.
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    /// Identity error.
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Reputation error.
    #[error("Reputation error: {0}")]
    Reputation(#[from] ReputationError),

    /// Consensus error.
    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    /// Network error.
    #[error("Network error: {0}")]
    Net(#[from] NetError),

    /// Economy error.
    #[error("Economy error: {0}")]
    Economy(#[from] EconomyError),

    /// Internal invariant broken.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Classify the error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) | Self::Internal(_) => ErrorClass::Internal,
            Self::ConsensusTimeout { .. } => ErrorClass::ConsensusTimeout,
            Self::Crypto(e) => crypto_class(e),
            Self::Identity(e) => identity_class(e),
            Self::Reputation(e) => reputation_class(e),
            Self::Consensus(e) => consensus_class(e),
            Self::Net(e) => match e {
                NetError::Crypto(e) => crypto_class(e),
                NetError::Identity(e) => identity_class(e),
                NetError::TooLarge { .. } => ErrorClass::PolicyViolation,
                _ => ErrorClass::Internal,
            },
            Self::Economy(e) => match e {
                EconomyError::Overflow(_) => ErrorClass::EconomicAnomaly,
                EconomyError::InvalidValue { .. } => ErrorClass::Internal,
                _ => ErrorClass::PolicyViolation,
            },
        }
    }

    /// Whether the caller may retry after remediation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::PolicyViolation | ErrorClass::ConsensusTimeout)
    }
}

fn crypto_class(error: &CryptoError) -> ErrorClass {
    match error {
        CryptoError::SignatureVerification
        | CryptoError::InvalidPublicKey(_)
        | CryptoError::InvalidKeyLength { .. }
        | CryptoError::InvalidSignatureLength { .. } => ErrorClass::Authentication,
        _ => ErrorClass::PolicyViolation,
    }
}

fn identity_class(error: &IdentityError) -> ErrorClass {
    match error {
        IdentityError::Crypto(e) => crypto_class(e),
        IdentityError::NotFound(_) | IdentityError::Revoked(_) | IdentityError::KeyMismatch { .. } => {
            ErrorClass::Authentication
        }
        _ => ErrorClass::PolicyViolation,
    }
}

fn reputation_class(error: &ReputationError) -> ErrorClass {
    match error {
        ReputationError::InvalidSignature(_)
        | ReputationError::UnknownEntity(_)
        | ReputationError::EntityRevoked(_) => ErrorClass::Authentication,
        ReputationError::Crypto(e) => crypto_class(e),
        ReputationError::ReplayedSequence { .. } => ErrorClass::Ordering,
        ReputationError::InvalidValue { .. } => ErrorClass::Internal,
        _ => ErrorClass::PolicyViolation,
    }
}

fn consensus_class(error: &ConsensusError) -> ErrorClass {
    match error {
        ConsensusError::InvalidSignature(_) | ConsensusError::NotValidator(_) => ErrorClass::Authentication,
        ConsensusError::Crypto(e) => crypto_class(e),
        ConsensusError::DuplicateProposal(_) | ConsensusError::NotAborted(_) | ConsensusError::UnknownProposal(_) => {
            ErrorClass::Ordering
        }
        ConsensusError::InvalidProposal(_) | ConsensusError::TooManyProposals { .. } => ErrorClass::PolicyViolation,
        ConsensusError::EmptyValidatorSet | ConsensusError::InvalidValue { .. } => ErrorClass::Internal,
    }
}

/// Result type for federation node operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use fidelis_crypto::Hash256;
    use fidelis_identity::EntityKeyPair;

    #[test]
    fn test_classes() {
        let id = EntityKeyPair::from_seed(&[1; 32]).id();

        let e: CoreError = ReputationError::ReplayedSequence { subject: id, last: 5, got: 5 }.into();
        assert_eq!(e.class(), ErrorClass::Ordering);

        let e: CoreError = ReputationError::InsufficientStake { entity: id, required: 1000, actual: 10 }.into();
        assert_eq!(e.class(), ErrorClass::PolicyViolation);
        assert!(e.is_retryable());

        let e: CoreError = ReputationError::InvalidSignature("subject".into()).into();
        assert_eq!(e.class(), ErrorClass::Authentication);
        assert!(!e.is_retryable());

        let e: CoreError = IdentityError::Revoked(id).into();
        assert_eq!(e.class(), ErrorClass::Authentication);

        let e: CoreError = NetError::Identity(IdentityError::NotFound(id)).into();
        assert_eq!(e.class(), ErrorClass::Authentication);

        let e = CoreError::ConsensusTimeout { proposal: Hash256::hash(b"p"), rounds: 3 };
        assert_eq!(e.class(), ErrorClass::ConsensusTimeout);
        assert!(e.is_retryable());

        let e: CoreError = ConsensusError::DuplicateProposal(Hash256::hash(b"p")).into();
        assert_eq!(e.class(), ErrorClass::Ordering);

        let e: CoreError = EconomyError::InsufficientFunds { owner: id, needed: 2, available: 1 }.into();
        assert_eq!(e.class(), ErrorClass::PolicyViolation);

        let e: CoreError = EconomyError::Overflow(id).into();
        assert_eq!(e.class(), ErrorClass::EconomicAnomaly);

        let e: CoreError = CryptoError::SignatureVerification.into();
        assert_eq!(e.class(), ErrorClass::Authentication);
    }

    #[test]
    fn test_class_display() {
        assert_eq!(ErrorClass::PolicyViolation.to_string(), "policy_violation");
        assert_eq!(ErrorClass::ConsensusTimeout.to_string(), "consensus_timeout");
    }
}
