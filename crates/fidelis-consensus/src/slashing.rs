//! Equivocation detection and slashing evidence.
//!
//! A validator that signs two conflicting votes for the same proposal,
//! round and phase has equivocated. The coordinator emits a slash action
//! carrying both signed votes as self-verifying evidence and excludes the
//! validator from that round's quorum count.
//!
//! The default penalty is the full stake, and equivocators stay excluded
//! for the rest of the round.

use std::collections::{HashMap, HashSet};

use fidelis_identity::{EntityId, KeyDirectory};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::proposal::ProposalId;
use crate::vote::{Vote, VotePhase};
use crate::{ConsensusError, Result};

/// Maximum recorded votes before the oldest proposals are forgotten.
const MAX_RECORDED_VOTES: usize = 100_000;

/// Slashing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlashingConfig {
    /// Penalty for equivocation, in basis points of stake.
    pub equivocation_bps: u64,
}

impl Default for SlashingConfig {
    fn default() -> Self {
        Self {
            equivocation_bps: 10_000,
        }
    }
}

impl SlashingConfig {
    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the penalty exceeds 10000 bps.
    pub fn validate(&self) -> Result<()> {
        if self.equivocation_bps > 10_000 {
            return Err(ConsensusError::InvalidValue {
                field: "slashing.equivocation_bps",
                reason: "cannot exceed 10000".into(),
            });
        }
        Ok(())
    }
}

/// Evidence of a slashable offense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlashingOffense {
    /// Two conflicting signed votes.
    Equivocation {
        /// First vote seen.
        first: Box<Vote>,
        /// Conflicting vote.
        second: Box<Vote>,
    },
}

impl SlashingOffense {
    /// The offending validator.
    #[must_use]
    pub fn offender(&self) -> EntityId {
        match self {
            Self::Equivocation { first, .. } => first.voter,
        }
    }

    /// Proposal and round of the offense.
    #[must_use]
    pub fn location(&self) -> (ProposalId, u32) {
        match self {
            Self::Equivocation { first, .. } => (first.proposal, first.round),
        }
    }

    /// Verify the evidence independently.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` if either vote fails verification or
    /// `InvalidProposal` if the votes do not conflict.
    pub fn verify(&self, keys: &dyn KeyDirectory) -> Result<()> {
        match self {
            Self::Equivocation { first, second } => {
                if !first.conflicts_with(second) {
                    return Err(ConsensusError::InvalidProposal("votes do not conflict".into()));
                }
                first.verify(keys)?;
                second.verify(keys)
            }
        }
    }
}

impl std::fmt::Display for SlashingOffense {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equivocation { first, .. } => write!(
                f,
                "equivocation by {} on {} round {} ({:?})",
                first.voter, first.proposal, first.round, first.phase
            ),
        }
    }
}

type VoteKey = (ProposalId, u32, VotePhase, EntityId);

/// Tracks votes per (proposal, round, phase, voter) to detect
/// equivocation.
#[derive(Debug, Default)]
pub struct SlashingManager {
    config: SlashingConfig,
    seen: HashMap<VoteKey, Vote>,
    excluded: HashSet<(ProposalId, u32, EntityId)>,
    history: Vec<SlashingOffense>,
}

impl SlashingManager {
    /// Create a manager.
    #[must_use]
    pub fn new(config: SlashingConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &SlashingConfig {
        &self.config
    }

    /// Record a verified vote.
    ///
    /// Returns the offense if it conflicts with an earlier vote. The
    /// offender is excluded from the round from then on; only the first
    /// conflict per round produces an offense.
    pub fn record_vote(&mut self, vote: &Vote) -> Option<SlashingOffense> {
        let key = (vote.proposal, vote.round, vote.phase, vote.voter);
        if let Some(existing) = self.seen.get(&key) {
            if !existing.conflicts_with(vote) {
                return None;
            }
            if !self.excluded.insert((vote.proposal, vote.round, vote.voter)) {
                return None;
            }
            let offense = SlashingOffense::Equivocation {
                first: Box::new(existing.clone()),
                second: Box::new(vote.clone()),
            };
            warn!(validator = %vote.voter, proposal = %vote.proposal, round = vote.round, "Equivocation detected");
            self.history.push(offense.clone());
            return Some(offense);
        }
        if self.seen.len() >= MAX_RECORDED_VOTES {
            self.seen.clear();
        }
        self.seen.insert(key, vote.clone());
        None
    }

    /// Whether `validator` is excluded from `round` of `proposal`.
    #[must_use]
    pub fn is_excluded(&self, proposal: &ProposalId, round: u32, validator: &EntityId) -> bool {
        self.excluded.contains(&(*proposal, round, *validator))
    }

    /// Penalty in basis points for `offense`.
    #[must_use]
    pub fn penalty_bps(&self, offense: &SlashingOffense) -> u64 {
        match offense {
            SlashingOffense::Equivocation { .. } => self.config.equivocation_bps,
        }
    }

    /// All offenses detected so far.
    #[must_use]
    pub fn history(&self) -> &[SlashingOffense] {
        &self.history
    }

    /// Forget recorded votes of a decided proposal.
    pub fn forget(&mut self, proposal: &ProposalId) {
        self.seen.retain(|(p, ..), _| p != proposal);
        self.excluded.retain(|(p, ..)| p != proposal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fidelis_crypto::Hash256;
    use fidelis_identity::{Entity, EntityKeyPair, EntityKind, EntityRegistry, SocietyId};

    fn vote(key: &EntityKeyPair, round: u32, approve: bool) -> Vote {
        Vote::sign(key, Hash256::hash(b"p"), Hash256::hash(b"t"), round, VotePhase::PreVote, approve)
    }

    #[test]
    fn test_double_vote_detected_once() {
        let key = EntityKeyPair::from_seed(&[5; 32]);
        let mut manager = SlashingManager::new(SlashingConfig::default());
        assert!(manager.record_vote(&vote(&key, 0, true)).is_none());
        assert!(manager.record_vote(&vote(&key, 0, true)).is_none());

        let offense = manager.record_vote(&vote(&key, 0, false)).unwrap();
        assert_eq!(offense.offender(), key.id());
        assert_eq!(manager.penalty_bps(&offense), 10_000);
        assert!(manager.is_excluded(&Hash256::hash(b"p"), 0, &key.id()));
        assert!(!manager.is_excluded(&Hash256::hash(b"p"), 1, &key.id()));

        assert!(manager.record_vote(&vote(&key, 0, false)).is_none());
        assert_eq!(manager.history().len(), 1);
    }

    #[test]
    fn test_different_rounds_are_not_equivocation() {
        let key = EntityKeyPair::from_seed(&[5; 32]);
        let mut manager = SlashingManager::new(SlashingConfig::default());
        assert!(manager.record_vote(&vote(&key, 0, true)).is_none());
        assert!(manager.record_vote(&vote(&key, 1, false)).is_none());
    }

    #[test]
    fn test_evidence_verifies_independently() {
        let key = EntityKeyPair::from_seed(&[5; 32]);
        let mut registry = EntityRegistry::new();
        registry
            .register(Entity::new(*key.public_key(), EntityKind::Organization, SocietyId::new("s").unwrap(), Utc::now()))
            .unwrap();
        let mut manager = SlashingManager::new(SlashingConfig::default());
        manager.record_vote(&vote(&key, 0, true));
        let offense = manager.record_vote(&vote(&key, 0, false)).unwrap();
        assert!(offense.verify(&registry).is_ok());

        let bogus = SlashingOffense::Equivocation {
            first: Box::new(vote(&key, 0, true)),
            second: Box::new(vote(&key, 0, true)),
        };
        assert!(bogus.verify(&registry).is_err());
    }

    #[test]
    fn test_forget_clears_proposal() {
        let key = EntityKeyPair::from_seed(&[5; 32]);
        let mut manager = SlashingManager::new(SlashingConfig::default());
        manager.record_vote(&vote(&key, 0, true));
        manager.forget(&Hash256::hash(b"p"));
        assert!(manager.record_vote(&vote(&key, 0, false)).is_none());
    }

    #[test]
    fn test_config_validation() {
        assert!(SlashingConfig::default().validate().is_ok());
        assert!(SlashingConfig { equivocation_bps: 10_001 }.validate().is_err());
    }
}
