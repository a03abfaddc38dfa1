//! # fidelis-reputation
//!
//! Reputation scoring for the Fidelis federation.
//!
//! This crate provides:
//! - **TrustTensor**: six bounded trust dimensions per (context, entity)
//! - **ReputationEngine**: event submission, delta computation, lazy decay
//! - **WitnessValidator**: witness diversity and stake gating
//! - **StakeLedger**: economic bonds with capped slashing
//! - **ChallengeAuditor**: challenge-response with progressive evasion penalties
//! - **PatternDetector**: pluggable witness-graph collusion heuristics
//! - **SourceProfile**: who vouched for a subject, and how concentrated that is
//! - **AuditLog**: append-only record of accepted and rejected events
//!
//! ## Anti-Gaming Measures
//!
//! - At least 3 attestations from 3 distinct societies per event
//! - Witnesses must hold stake for their declared capability tier
//! - Diminishing returns on gains at high trust
//! - Mutual-witness cliques have their deltas halved and flagged
//! - Gains stop at a ceiling unless trust comes from diverse sources
//! - Challenge evasion slashes stake and trust, then flags permanently

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod challenge;
pub mod collusion;
pub mod decay;
pub mod diversity;
pub mod engine;
pub mod error;
pub mod event;
pub mod stake;
pub mod tensor;
pub mod witness;

#[cfg(test)]
pub(crate) mod fixtures;
#[cfg(test)]
mod proptests;

pub use audit::{AuditLog, AuditOutcome, AuditRecord, ReasonCode};
pub use challenge::{
    Challenge, ChallengeAuditor, ChallengeId, ChallengePolicy, ChallengeState, ChallengeStats,
    ChallengeTarget, EvasionPenalty, Rebuttal, Verdict,
};
pub use collusion::{ClusterDensityDetector, MutualWitnessDetector, PatternDetector, PatternVerdict};
pub use decay::DecayConfig;
pub use diversity::{SourceDiversity, SourceDiversityPolicy, SourceProfile};
pub use engine::{EngineConfig, GamingSignal, ImpactTable, ReputationEngine};
pub use error::{ReputationError, Result};
pub use event::{ActionDescriptor, Attestation, Outcome, WitnessMark, WitnessedEvent};
pub use stake::{CapabilityTier, SlashEvent, SlashReason, Stake, StakeLedger, StakePolicy};
pub use tensor::{ContextId, DeltaFactors, DimensionWeights, TrustDelta, TrustDimension, TrustTensor};
pub use witness::{DiversityViolation, WitnessPolicy, WitnessValidator};
