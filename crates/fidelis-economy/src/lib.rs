//! # fidelis-economy
//!
//! Resource accounting and market-health monitoring.
//!
//! Provides:
//! - [`ResourceLedger`]: accounts whose every transaction updates an
//!   economic coherence score
//! - [`market`]: correlation-based market independence γ
//! - [`PhaseDetector`]: γ bands and significant phase transitions
//! - [`ResourceEconomyMonitor`]: periodic analysis of ledger activity

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod ledger;
pub mod market;
pub mod monitor;
pub mod phase;

#[cfg(test)]
mod proptests;

pub use error::{EconomyError, Result};
pub use ledger::{LedgerAccount, LedgerConfig, LedgerTransaction, ResourceLedger, TransactionKind};
pub use market::{MarketConfig, MarketSnapshot};
pub use monitor::{EconomyConfig, MonitorReport, ResourceEconomyMonitor};
pub use phase::{Direction, MarketPhase, PhaseBands, PhaseDetector, PhaseTransition};
