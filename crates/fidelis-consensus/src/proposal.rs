//! Proposals and the state transitions they carry.

use chrono::{DateTime, Utc};
use fidelis_crypto::{canonical_hash, Hash256, PublicKey, Signature};
use fidelis_identity::{EntityId, EntityKeyPair, EntityKind, KeyDirectory, SocietyId};
use serde::{Deserialize, Serialize};

use crate::{ConsensusError, Result};

/// Domain separator for transition payload hashes.
const TRANSITION_DOMAIN: &[u8] = b"FIDELIS-TRANSITION-v1";

/// Domain separator for proposal ids.
const PROPOSAL_ID_DOMAIN: &[u8] = b"FIDELIS-PROPOSAL-ID-v1";

/// Domain separator for proposal signatures.
const PROPOSAL_SIG_DOMAIN: &[u8] = b"FIDELIS-CONSENSUS-PROPOSAL-v1";

/// Maximum basis points a slash transition may carry.
pub const MAX_SLASH_BPS: u64 = 10_000;

/// Identifier of a proposal: hash of proposer, payload hash and epoch.
pub type ProposalId = Hash256;

/// A critical federation state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateTransition {
    /// Admit a new entity.
    AddMember {
        /// Public key of the new entity.
        public_key: PublicKey,
        /// Entity kind.
        kind: EntityKind,
        /// Society the entity joins.
        society: SocietyId,
    },
    /// Remove an entity from the federation.
    RemoveMember {
        /// Entity to remove.
        entity: EntityId,
    },
    /// Slash an entity's stake.
    Slash {
        /// Entity to slash.
        entity: EntityId,
        /// Share of the stake, in basis points.
        bps: u64,
    },
    /// Revoke an entity's identity.
    Revoke {
        /// Entity to revoke.
        entity: EntityId,
    },
}

impl StateTransition {
    /// The entity the transition acts on.
    #[must_use]
    pub fn target(&self) -> EntityId {
        match self {
            Self::AddMember { public_key, .. } => EntityId::from_public_key(public_key),
            Self::RemoveMember { entity } | Self::Slash { entity, .. } | Self::Revoke { entity } => *entity,
        }
    }

    /// Short name for logs.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::AddMember { .. } => "add_member",
            Self::RemoveMember { .. } => "remove_member",
            Self::Slash { .. } => "slash",
            Self::Revoke { .. } => "revoke",
        }
    }

    /// Canonical payload hash.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if encoding fails.
    pub fn payload_hash(&self) -> Result<Hash256> {
        Ok(canonical_hash(TRANSITION_DOMAIN, self)?)
    }

    /// Structural validity.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProposal` for a slash outside `(0, 10000]` bps.
    pub fn validate(&self) -> Result<()> {
        if let Self::Slash { bps, .. } = self {
            if *bps == 0 || *bps > MAX_SLASH_BPS {
                return Err(ConsensusError::InvalidProposal(format!(
                    "slash of {} bps outside (0, {}]",
                    bps, MAX_SLASH_BPS
                )));
            }
        }
        Ok(())
    }
}

/// Lifecycle state of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalState {
    /// Received, collecting pre-votes.
    Proposed,
    /// Pre-vote quorum reached, collecting pre-commits.
    PreVoted,
    /// Pre-commit quorum reached.
    PreCommitted,
    /// Final and applied.
    Committed,
    /// Gave up after the round limit.
    Aborted,
}

impl ProposalState {
    /// Whether the state is final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl std::fmt::Display for ProposalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Proposed => "proposed",
            Self::PreVoted => "pre-voted",
            Self::PreCommitted => "pre-committed",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// A proposed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Proposal id.
    pub id: ProposalId,
    /// The change.
    pub transition: StateTransition,
    /// Validator that first raised it.
    pub proposer: EntityId,
    /// Hash of the transition.
    pub payload_hash: Hash256,
    /// Resubmission counter.
    pub epoch: u64,
    /// When it was raised.
    pub created_at: DateTime<Utc>,
}

impl Proposal {
    /// Build a proposal and derive its id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProposal` or `Crypto`.
    pub fn new(
        transition: StateTransition,
        proposer: EntityId,
        epoch: u64,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        transition.validate()?;
        let payload_hash = transition.payload_hash()?;
        Ok(Self {
            id: Self::compute_id(&proposer, &payload_hash, epoch),
            transition,
            proposer,
            payload_hash,
            epoch,
            created_at,
        })
    }

    /// Derive a proposal id.
    #[must_use]
    pub fn compute_id(proposer: &EntityId, payload_hash: &Hash256, epoch: u64) -> ProposalId {
        Hash256::hash_many(&[
            PROPOSAL_ID_DOMAIN,
            proposer.as_bytes(),
            payload_hash.as_bytes(),
            &epoch.to_le_bytes(),
        ])
    }

    /// Check that the id and payload hash match the transition.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProposal` on any mismatch.
    pub fn check_integrity(&self) -> Result<()> {
        self.transition.validate()?;
        if self.transition.payload_hash()? != self.payload_hash {
            return Err(ConsensusError::InvalidProposal("payload hash mismatch".into()));
        }
        if Self::compute_id(&self.proposer, &self.payload_hash, self.epoch) != self.id {
            return Err(ConsensusError::InvalidProposal("proposal id mismatch".into()));
        }
        Ok(())
    }
}

/// A proposal signed by the proposer of a specific round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProposal {
    /// The proposal.
    pub proposal: Proposal,
    /// Round it is proposed in.
    pub round: u32,
    /// Round proposer.
    pub leader: EntityId,
    /// Leader's signature.
    pub signature: Signature,
}

impl SignedProposal {
    /// Sign `proposal` for `round`.
    #[must_use]
    pub fn sign(proposal: Proposal, round: u32, leader: &EntityKeyPair) -> Self {
        let leader_id = leader.id();
        let signature = leader.sign(&Self::compute_signing_payload(&proposal.id, round, &leader_id));
        Self {
            proposal,
            round,
            leader: leader_id,
            signature,
        }
    }

    /// Bytes the leader signs.
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        Self::compute_signing_payload(&self.proposal.id, self.round, &self.leader)
    }

    fn compute_signing_payload(id: &ProposalId, round: u32, leader: &EntityId) -> Vec<u8> {
        let mut payload = Vec::with_capacity(PROPOSAL_SIG_DOMAIN.len() + 32 + 4 + 32);
        payload.extend_from_slice(PROPOSAL_SIG_DOMAIN);
        payload.extend_from_slice(id.as_bytes());
        payload.extend_from_slice(&round.to_le_bytes());
        payload.extend_from_slice(leader.as_bytes());
        payload
    }

    /// Check integrity and the leader's signature.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProposal` or `InvalidSignature`.
    pub fn verify(&self, keys: &dyn KeyDirectory) -> Result<()> {
        self.proposal.check_integrity()?;
        keys.verify(&self.leader, &self.signing_payload(), &self.signature)
            .map_err(|e| ConsensusError::InvalidSignature(format!("proposal by {}: {}", self.leader, e)))
    }
}
