//! Signed pre-votes and pre-commits.

use fidelis_crypto::{Hash256, Signature};
use fidelis_identity::{EntityId, EntityKeyPair, KeyDirectory};
use serde::{Deserialize, Serialize};

use crate::proposal::ProposalId;
use crate::{ConsensusError, Result};

/// Domain separator for vote signatures.
const VOTE_DOMAIN: &[u8] = b"FIDELIS-CONSENSUS-VOTE-v1";

/// Voting phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VotePhase {
    /// First phase.
    PreVote,
    /// Second phase.
    PreCommit,
}

impl VotePhase {
    fn tag(self) -> u8 {
        match self {
            Self::PreVote => 1,
            Self::PreCommit => 2,
        }
    }
}

/// A validator's signed vote on a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Proposal voted on.
    pub proposal: ProposalId,
    /// Payload hash the voter saw.
    pub payload_hash: Hash256,
    /// Round of the vote.
    pub round: u32,
    /// Phase of the vote.
    pub phase: VotePhase,
    /// Whether the voter supports the proposal.
    pub approve: bool,
    /// Voting validator.
    pub voter: EntityId,
    /// Voter's signature.
    pub signature: Signature,
}

impl Vote {
    /// Sign a vote.
    #[must_use]
    pub fn sign(
        voter: &EntityKeyPair,
        proposal: ProposalId,
        payload_hash: Hash256,
        round: u32,
        phase: VotePhase,
        approve: bool,
    ) -> Self {
        let voter_id = voter.id();
        let payload = Self::compute_signing_payload(&proposal, &payload_hash, round, phase, approve, &voter_id);
        Self {
            proposal,
            payload_hash,
            round,
            phase,
            approve,
            voter: voter_id,
            signature: voter.sign(&payload),
        }
    }

    /// Bytes the voter signs.
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        Self::compute_signing_payload(
            &self.proposal,
            &self.payload_hash,
            self.round,
            self.phase,
            self.approve,
            &self.voter,
        )
    }

    fn compute_signing_payload(
        proposal: &ProposalId,
        payload_hash: &Hash256,
        round: u32,
        phase: VotePhase,
        approve: bool,
        voter: &EntityId,
    ) -> Vec<u8> {
        let mut payload = Vec::with_capacity(VOTE_DOMAIN.len() + 32 + 32 + 4 + 2 + 32);
        payload.extend_from_slice(VOTE_DOMAIN);
        payload.extend_from_slice(proposal.as_bytes());
        payload.extend_from_slice(payload_hash.as_bytes());
        payload.extend_from_slice(&round.to_le_bytes());
        payload.push(phase.tag());
        payload.push(u8::from(approve));
        payload.extend_from_slice(voter.as_bytes());
        payload
    }

    /// Verify the voter's signature.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` for an unknown voter or bad signature.
    pub fn verify(&self, keys: &dyn KeyDirectory) -> Result<()> {
        keys.verify(&self.voter, &self.signing_payload(), &self.signature)
            .map_err(|e| ConsensusError::InvalidSignature(format!("vote by {}: {}", self.voter, e)))
    }

    /// Whether `other` is a conflicting vote by the same voter in the same
    /// proposal, round and phase.
    #[must_use]
    pub fn conflicts_with(&self, other: &Self) -> bool {
        self.voter == other.voter
            && self.proposal == other.proposal
            && self.round == other.round
            && self.phase == other.phase
            && (self.approve != other.approve || self.payload_hash != other.payload_hash)
    }
}
