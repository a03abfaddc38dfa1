//! Gossip payloads, node events and request types.

use fidelis_consensus::{ConsensusMessage, Decision, ProposalId, SlashingOffense};
use fidelis_economy::{MarketSnapshot, MonitorReport, PhaseTransition};
use fidelis_identity::EntityId;
use fidelis_reputation::{Attestation, EvasionPenalty, WitnessedEvent};
use serde::{Deserialize, Serialize};

use crate::error::ErrorClass;

/// An event together with the attestations it was accepted with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubmission {
    /// The witnessed event.
    pub event: WitnessedEvent,
    /// Its attestations.
    pub attestations: Vec<Attestation>,
}

/// Payload of every gossip envelope exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FederationMessage {
    /// A consensus proposal or vote.
    Consensus(ConsensusMessage),
    /// An event submission accepted by the sender, for local re-validation.
    Submission(EventSubmission),
}

/// Notifications published by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FederationEvent {
    /// The market changed phase significantly.
    PhaseTransition(PhaseTransition),
    /// A proposal reached a terminal state.
    ConsensusDecision(Decision),
    /// A challenge was evaded and penalized.
    EvasionPenalty(EvasionPenalty),
    /// Market crisis risk crossed the configured threshold.
    EconomicAnomaly(MarketSnapshot),
    /// A validator was slashed for equivocating.
    ValidatorSlashed {
        /// The validator.
        validator: EntityId,
        /// Evidence.
        offense: SlashingOffense,
        /// Stake removed.
        amount: u64,
    },
}

impl FederationEvent {
    /// Error class for events that report a failure or anomaly.
    #[must_use]
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::PhaseTransition(_) | Self::EconomicAnomaly(_) => Some(ErrorClass::EconomicAnomaly),
            Self::ConsensusDecision(d) if !d.is_committed() => Some(ErrorClass::ConsensusTimeout),
            Self::EvasionPenalty(_) | Self::ValidatorSlashed { .. } => Some(ErrorClass::PolicyViolation),
            Self::ConsensusDecision(_) => None,
        }
    }
}

/// A resource ledger operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerRequest {
    /// Credit an account.
    Earn {
        /// Account owner.
        owner: EntityId,
        /// Amount.
        amount: u64,
    },
    /// Consume from an account.
    Spend {
        /// Account owner.
        owner: EntityId,
        /// Amount.
        amount: u64,
    },
    /// Reserve part of an account.
    Commit {
        /// Account owner.
        owner: EntityId,
        /// Amount.
        amount: u64,
    },
    /// Return a reservation.
    Release {
        /// Account owner.
        owner: EntityId,
        /// Amount.
        amount: u64,
    },
    /// Move resources between accounts.
    Transfer {
        /// Sender.
        from: EntityId,
        /// Receiver.
        to: EntityId,
        /// Amount.
        amount: u64,
    },
}

impl LedgerRequest {
    /// The account whose coherence the request reports.
    #[must_use]
    pub fn owner(&self) -> EntityId {
        match self {
            Self::Earn { owner, .. } | Self::Spend { owner, .. } | Self::Commit { owner, .. } | Self::Release { owner, .. } => {
                *owner
            }
            Self::Transfer { from, .. } => *from,
        }
    }
}

/// What one node tick did.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Challenge evasions penalized.
    pub penalties: Vec<EvasionPenalty>,
    /// Proposals decided.
    pub decisions: Vec<Decision>,
    /// Revocations proposed for flagged entities.
    pub revocations: Vec<ProposalId>,
    /// Market analysis.
    pub market: MonitorReport,
}
