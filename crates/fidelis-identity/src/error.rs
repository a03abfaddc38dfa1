//! Error types for identity operations.

use thiserror::Error;

use crate::EntityId;

/// Errors that can occur during identity operations.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Cryptographic operation failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] fidelis_crypto::CryptoError),

    /// Entity not found.
    #[error("Entity not found: {0}")]
    NotFound(EntityId),

    /// Entity already registered.
    #[error("Entity already exists: {0}")]
    AlreadyExists(EntityId),

    /// Entity has been revoked.
    #[error("Entity has been revoked: {0}")]
    Revoked(EntityId),

    /// The entity id is not the one derived from its public key.
    #[error("Entity id {claimed} does not match its public key")]
    KeyMismatch {
        /// The id carried by the record.
        claimed: EntityId,
    },

    /// Society name is empty or too long.
    #[error("Invalid society name: {reason}")]
    InvalidSociety {
        /// Reason for invalidity.
        reason: String,
    },

    /// Registry is at capacity.
    #[error("Registry full: maximum of {max} entities")]
    RegistryFull {
        /// Maximum number of entities.
        max: usize,
    },
}

/// Result type for identity operations.
pub type Result<T> = std::result::Result<T, IdentityError>;
