//! Error types for the resource economy.

use fidelis_identity::EntityId;
use thiserror::Error;

/// Errors that can occur during ledger and market operations.
#[derive(Error, Debug)]
pub enum EconomyError {
    /// No account for the entity.
    #[error("Unknown account: {0}")]
    UnknownAccount(EntityId),

    /// The entity already has an account.
    #[error("Account already exists: {0}")]
    AccountExists(EntityId),

    /// Not enough available balance.
    #[error("Insufficient funds for {owner}: need {needed}, have {available}")]
    InsufficientFunds {
        /// Account owner.
        owner: EntityId,
        /// Amount requested.
        needed: u64,
        /// Amount available.
        available: u64,
    },

    /// Not enough committed balance to release.
    #[error("Insufficient committed funds for {owner}: need {needed}, have {committed}")]
    InsufficientCommitted {
        /// Account owner.
        owner: EntityId,
        /// Amount requested.
        needed: u64,
        /// Amount committed.
        committed: u64,
    },

    /// Zero amounts are not transactions.
    #[error("Amount must be positive")]
    ZeroAmount,

    /// A balance would overflow.
    #[error("Balance overflow for {0}")]
    Overflow(EntityId),

    /// Sender and receiver are the same account.
    #[error("Cannot transfer to self: {0}")]
    SelfTransfer(EntityId),

    /// Ledger is at capacity.
    #[error("Too many accounts (max {max})")]
    TooManyAccounts {
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
}

/// Result type for economy operations.
pub type Result<T> = std::result::Result<T, EconomyError>;
