//! # fidelis-consensus
//!
//! Byzantine-fault-tolerant agreement on critical federation state
//! transitions: membership changes, slashing and revocation.
//!
//! ## Protocol
//!
//! A fixed, id-sorted validator set runs three phases per proposal:
//!
//! 1. **Propose**: the round's proposer signs and broadcasts the proposal
//! 2. **Pre-vote**: each validator signs a pre-vote; a quorum moves the
//!    proposal to `PreVoted`
//! 3. **Pre-commit**: each validator then signs a pre-commit; a quorum
//!    commits the proposal
//!
//! Quorum is `floor(2n/3) + 1`. If a round times out, the next validator
//! in id order proposes in round + 1 and the old round's votes are
//! discarded. After `max_rounds` the proposal is aborted.
//!
//! ## Security
//!
//! - Proposals and votes are Ed25519 signed and verified on receipt
//! - Conflicting votes by one validator in one phase are equivocation:
//!   the validator is slashed and excluded from that round's quorum
//! - Early votes are buffered up to a fixed bound

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod error;
pub mod proposal;
pub mod slashing;
pub mod validator;
pub mod vote;

#[cfg(test)]
mod fixtures;
#[cfg(test)]
mod proptests;

pub use coordinator::{ConsensusAction, ConsensusConfig, ConsensusCoordinator, ConsensusMessage, Decision};
pub use error::{ConsensusError, Result};
pub use proposal::{Proposal, ProposalId, ProposalState, SignedProposal, StateTransition};
pub use slashing::{SlashingConfig, SlashingManager, SlashingOffense};
pub use validator::{bft_quorum, ValidatorSet};
pub use vote::{Vote, VotePhase};
