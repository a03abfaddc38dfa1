//! Error types for networking operations.

use fidelis_identity::EntityId;
use thiserror::Error;

/// Errors that can occur during networking operations.
#[derive(Error, Debug)]
pub enum NetError {
    /// Peer not registered with the transport.
    #[error("Peer not found: {0}")]
    PeerNotFound(EntityId),

    /// Peer is registered but its inbox is closed.
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(EntityId),

    /// Frame or payload exceeds the size limit.
    #[error("Message too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Broadcast was called outside a tokio runtime.
    #[error("No async runtime available")]
    NoRuntime,

    /// Operation timed out.
    #[error("Operation timed out")]
    Timeout,

    /// Invalid configuration value.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// Why it is invalid.
        reason: String,
    },

    /// Encoding or signature failure.
    #[error("Crypto error: {0}")]
    Crypto(#[from] fidelis_crypto::CryptoError),

    /// Signer lookup failure.
    #[error("Identity error: {0}")]
    Identity(#[from] fidelis_identity::IdentityError),
}

/// Result type for networking operations.
pub type Result<T> = std::result::Result<T, NetError>;
