//! Error types for consensus operations.

use fidelis_identity::EntityId;
use thiserror::Error;

use crate::proposal::ProposalId;

/// Errors that can occur during consensus operations.
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// The validator set is empty.
    #[error("Validator set is empty")]
    EmptyValidatorSet,

    /// The entity is not in the validator set.
    #[error("Not a validator: {0}")]
    NotValidator(EntityId),

    /// A proposal or vote signature did not verify.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Proposal fields are inconsistent or the transition is invalid.
    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),

    /// The proposal is unknown.
    #[error("Unknown proposal: {0}")]
    UnknownProposal(ProposalId),

    /// The proposal already exists.
    #[error("Duplicate proposal: {0}")]
    DuplicateProposal(ProposalId),

    /// Only aborted proposals can be resubmitted.
    #[error("Proposal {0} was not aborted")]
    NotAborted(ProposalId),

    /// Too many proposals in flight.
    #[error("Too many active proposals (max {max})")]
    TooManyProposals {
        /// Configured maximum.
        max: usize,
    },

    /// Invalid configuration value.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// Why it is invalid.
        reason: String,
    },

    /// Canonical encoding failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] fidelis_crypto::CryptoError),
}

/// Result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;
