//! The three-phase consensus coordinator.
//!
//! The coordinator is a synchronous state machine. Every entry point returns
//! the [`ConsensusAction`]s the caller must carry out: broadcasting signed
//! proposals and votes, applying decisions and slashing equivocators. Time
//! is passed in explicitly so timeouts are deterministic under test.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fidelis_identity::{EntityId, EntityKeyPair, KeyDirectory};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::proposal::{Proposal, ProposalId, ProposalState, SignedProposal, StateTransition};
use crate::slashing::{SlashingConfig, SlashingManager, SlashingOffense};
use crate::validator::ValidatorSet;
use crate::vote::{Vote, VotePhase};
use crate::{ConsensusError, Result};

/// Longest accepted round timeout.
const MAX_ROUND_TIMEOUT_SECS: u64 = 86_400;

// =============================================================================
// Configuration
// =============================================================================

/// Consensus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Seconds before a round without a decision times out.
    pub round_timeout_secs: u64,
    /// Rounds attempted before a proposal is aborted.
    pub max_rounds: u32,
    /// Votes held for proposals or rounds not yet seen.
    pub max_buffered_votes: usize,
    /// Proposals in flight at once.
    pub max_active_proposals: usize,
    /// Equivocation penalties.
    pub slashing: SlashingConfig,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            round_timeout_secs: 30,
            max_rounds: 3,
            max_buffered_votes: 1024,
            max_active_proposals: 256,
            slashing: SlashingConfig::default(),
        }
    }
}

impl ConsensusConfig {
    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.round_timeout_secs == 0 || self.round_timeout_secs > MAX_ROUND_TIMEOUT_SECS {
            return Err(ConsensusError::InvalidValue {
                field: "consensus.round_timeout_secs",
                reason: format!("must be in 1..={}", MAX_ROUND_TIMEOUT_SECS),
            });
        }
        if self.max_rounds == 0 {
            return Err(ConsensusError::InvalidValue {
                field: "consensus.max_rounds",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_buffered_votes == 0 {
            return Err(ConsensusError::InvalidValue {
                field: "consensus.max_buffered_votes",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_active_proposals == 0 {
            return Err(ConsensusError::InvalidValue {
                field: "consensus.max_active_proposals",
                reason: "must be at least 1".into(),
            });
        }
        self.slashing.validate()
    }

    /// Round timeout as a duration.
    #[must_use]
    pub fn round_timeout(&self) -> Duration {
        Duration::seconds(self.round_timeout_secs.min(MAX_ROUND_TIMEOUT_SECS) as i64)
    }
}

// =============================================================================
// Messages, Actions and Decisions
// =============================================================================

/// Messages exchanged between coordinators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    /// A signed proposal for a round.
    Proposal(SignedProposal),
    /// A signed vote.
    Vote(Vote),
    /// A decision reached by the sender.
    ///
    /// A commit carries its certificate and is adopted by any node that
    /// verifies it. An abort only asks peers holding a commit to answer.
    Decision(Decision),
}

impl ConsensusMessage {
    /// Domain-separated tag for this message type.
    #[must_use]
    pub fn message_type_tag(&self) -> &'static str {
        match self {
            Self::Proposal(_) => "FIDELIS-CONSENSUS-PROPOSAL-v1",
            Self::Vote(_) => "FIDELIS-CONSENSUS-VOTE-v1",
            Self::Decision(_) => "FIDELIS-CONSENSUS-DECISION-v1",
        }
    }
}

/// A final outcome for a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// The decided proposal.
    pub proposal: Proposal,
    /// `Committed` or `Aborted`.
    pub outcome: ProposalState,
    /// Round the decision was reached in.
    pub round: u32,
    /// When it was decided locally.
    pub decided_at: DateTime<Utc>,
    /// Approving pre-commits; empty for aborts.
    pub certificate: Vec<Vote>,
}

impl Decision {
    /// Id of the decided proposal.
    #[must_use]
    pub fn id(&self) -> ProposalId {
        self.proposal.id
    }

    /// Whether the proposal was committed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.outcome == ProposalState::Committed
    }

    /// Check that a commit carries a quorum of distinct, verified,
    /// approving pre-commits for this proposal.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProposal` for a short or mismatched certificate and
    /// `InvalidSignature` for a bad vote.
    pub fn verify_certificate(&self, validators: &ValidatorSet, keys: &dyn KeyDirectory) -> Result<()> {
        if !self.is_committed() {
            return Err(ConsensusError::InvalidProposal("not a commit".into()));
        }
        let mut voters = Vec::with_capacity(self.certificate.len());
        for vote in &self.certificate {
            if vote.proposal != self.proposal.id
                || vote.payload_hash != self.proposal.payload_hash
                || vote.round != self.round
                || vote.phase != VotePhase::PreCommit
                || !vote.approve
            {
                return Err(ConsensusError::InvalidProposal("certificate vote mismatch".into()));
            }
            if !validators.contains(&vote.voter) {
                return Err(ConsensusError::NotValidator(vote.voter));
            }
            vote.verify(keys)?;
            voters.push(vote.voter);
        }
        voters.sort();
        voters.dedup();
        if voters.len() < validators.quorum() {
            return Err(ConsensusError::InvalidProposal(format!(
                "certificate has {} of {} required pre-commits",
                voters.len(),
                validators.quorum()
            )));
        }
        Ok(())
    }
}

/// Actions the caller must carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusAction {
    /// Broadcast a signed proposal.
    BroadcastProposal(SignedProposal),
    /// Broadcast a signed vote.
    BroadcastVote(Vote),
    /// Broadcast a decision so lagging nodes converge on it.
    BroadcastDecision(Decision),
    /// A proposal moved to a new state.
    StateChanged {
        /// The proposal.
        proposal: ProposalId,
        /// Its new state.
        state: ProposalState,
    },
    /// A proposal reached a terminal state.
    Decided(Decision),
    /// Slash a validator for equivocation.
    SlashValidator {
        /// The equivocating validator.
        validator: EntityId,
        /// Self-verifying evidence.
        offense: SlashingOffense,
        /// Penalty in basis points.
        bps: u64,
    },
    /// A round timed out and the next one started.
    ViewChange {
        /// The proposal.
        proposal: ProposalId,
        /// New round number.
        new_round: u32,
        /// Proposer of the new round.
        proposer: EntityId,
    },
}

impl ConsensusAction {
    /// The message to broadcast, if this action is a broadcast.
    #[must_use]
    pub fn to_message(&self) -> Option<ConsensusMessage> {
        match self {
            Self::BroadcastProposal(p) => Some(ConsensusMessage::Proposal(p.clone())),
            Self::BroadcastVote(v) => Some(ConsensusMessage::Vote(v.clone())),
            Self::BroadcastDecision(d) => Some(ConsensusMessage::Decision(d.clone())),
            _ => None,
        }
    }
}

// =============================================================================
// Round State
// =============================================================================

#[derive(Debug)]
struct ActiveProposal {
    proposal: Proposal,
    round: u32,
    state: ProposalState,
    round_started: DateTime<Utc>,
    /// The round's signed proposal has been seen or issued.
    have_proposal: bool,
    prevoted: bool,
    precommitted: bool,
    prevotes: BTreeMap<EntityId, Vote>,
    precommits: BTreeMap<EntityId, Vote>,
}

impl ActiveProposal {
    fn new(proposal: Proposal, round: u32, now: DateTime<Utc>) -> Self {
        Self {
            proposal,
            round,
            state: ProposalState::Proposed,
            round_started: now,
            have_proposal: false,
            prevoted: false,
            precommitted: false,
            prevotes: BTreeMap::new(),
            precommits: BTreeMap::new(),
        }
    }

    /// Move to `round`, discarding the old round's votes.
    fn enter_round(&mut self, round: u32, now: DateTime<Utc>) {
        self.round = round;
        self.state = ProposalState::Proposed;
        self.round_started = now;
        self.have_proposal = false;
        self.prevoted = false;
        self.precommitted = false;
        self.prevotes.clear();
        self.precommits.clear();
    }

    fn approvals(&self, phase: VotePhase) -> usize {
        let votes = match phase {
            VotePhase::PreVote => &self.prevotes,
            VotePhase::PreCommit => &self.precommits,
        };
        votes.values().filter(|v| v.approve).count()
    }
}

enum FollowUp {
    Nothing,
    PreCommit,
    Commit(Decision),
}

// =============================================================================
// Coordinator
// =============================================================================

/// Drives proposals through pre-vote and pre-commit to a decision.
///
/// ## Memory Safety
///
/// - Active proposals: bounded by `max_active_proposals`
/// - Buffered votes: bounded by `max_buffered_votes`
/// - Votes per round: one per validator and phase
pub struct ConsensusCoordinator {
    keys: Arc<EntityKeyPair>,
    directory: Arc<dyn KeyDirectory>,
    validators: ValidatorSet,
    config: ConsensusConfig,
    active: HashMap<ProposalId, ActiveProposal>,
    decided: HashMap<ProposalId, usize>,
    decisions: Vec<Decision>,
    buffered: Vec<Vote>,
    slashing: SlashingManager,
}

impl std::fmt::Debug for ConsensusCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusCoordinator")
            .field("id", &self.keys.id())
            .field("validators", &self.validators.len())
            .field("active", &self.active.len())
            .field("decisions", &self.decisions.len())
            .field("buffered", &self.buffered.len())
            .finish_non_exhaustive()
    }
}

impl ConsensusCoordinator {
    /// Create a coordinator.
    ///
    /// A node outside the validator set still tracks proposals and decisions
    /// but never votes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` for a bad configuration.
    pub fn new(
        keys: Arc<EntityKeyPair>,
        directory: Arc<dyn KeyDirectory>,
        validators: ValidatorSet,
        config: ConsensusConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            keys,
            directory,
            validators,
            slashing: SlashingManager::new(config.slashing.clone()),
            config,
            active: HashMap::new(),
            decided: HashMap::new(),
            decisions: Vec::new(),
            buffered: Vec::new(),
        })
    }

    /// This node's id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.keys.id()
    }

    /// Whether this node votes.
    #[must_use]
    pub fn is_validator(&self) -> bool {
        self.validators.contains(&self.keys.id())
    }

    /// The validator set.
    #[must_use]
    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// All decisions, in the order they were reached.
    #[must_use]
    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    /// The decision for `id`, if any.
    #[must_use]
    pub fn decision(&self, id: &ProposalId) -> Option<&Decision> {
        self.decided.get(id).and_then(|&i| self.decisions.get(i))
    }

    /// Current state of a proposal.
    #[must_use]
    pub fn state_of(&self, id: &ProposalId) -> Option<ProposalState> {
        self.active
            .get(id)
            .map(|e| e.state)
            .or_else(|| self.decision(id).map(|d| d.outcome))
    }

    /// Current round of an active proposal.
    #[must_use]
    pub fn round_of(&self, id: &ProposalId) -> Option<u32> {
        self.active.get(id).map(|e| e.round)
    }

    /// Number of proposals in flight.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of buffered early votes.
    #[must_use]
    pub fn buffered_count(&self) -> usize {
        self.buffered.len()
    }

    /// Equivocation tracking.
    #[must_use]
    pub fn slashing(&self) -> &SlashingManager {
        &self.slashing
    }

    // =========================================================================
    // Entry Points
    // =========================================================================

    /// Raise a new proposal as its round-0 proposer.
    ///
    /// The epoch is the smallest one whose id has not been seen, so the same
    /// transition can be proposed again after an earlier decision.
    ///
    /// # Errors
    ///
    /// Returns `NotValidator`, `DuplicateProposal` if the same transition is
    /// already in flight from this node, `TooManyProposals`, or
    /// `InvalidProposal` for a malformed transition.
    pub fn propose(&mut self, transition: StateTransition, now: DateTime<Utc>) -> Result<Vec<ConsensusAction>> {
        let me = self.keys.id();
        if !self.validators.contains(&me) {
            return Err(ConsensusError::NotValidator(me));
        }
        let payload_hash = transition.payload_hash()?;
        if let Some(existing) = self
            .active
            .values()
            .find(|e| e.proposal.proposer == me && e.proposal.payload_hash == payload_hash)
        {
            return Err(ConsensusError::DuplicateProposal(existing.proposal.id));
        }
        let mut epoch = 0;
        while self.is_known(&Proposal::compute_id(&me, &payload_hash, epoch)) {
            epoch += 1;
        }
        let proposal = Proposal::new(transition, me, epoch, now)?;
        self.start(proposal, now)
    }

    /// Resubmit an aborted proposal with epoch + 1, proposed by this node.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProposal`, `NotAborted` for a proposal that is still
    /// active or was committed, `DuplicateProposal` if it was already
    /// resubmitted, or `NotValidator`.
    pub fn resubmit(&mut self, id: &ProposalId, now: DateTime<Utc>) -> Result<Vec<ConsensusAction>> {
        let me = self.keys.id();
        if !self.validators.contains(&me) {
            return Err(ConsensusError::NotValidator(me));
        }
        if self.active.contains_key(id) {
            return Err(ConsensusError::NotAborted(*id));
        }
        let decision = self.decision(id).ok_or(ConsensusError::UnknownProposal(*id))?;
        if decision.outcome != ProposalState::Aborted {
            return Err(ConsensusError::NotAborted(*id));
        }
        let transition = decision.proposal.transition.clone();
        let epoch = decision.proposal.epoch + 1;
        let proposal = Proposal::new(transition, me, epoch, now)?;
        if self.is_known(&proposal.id) {
            return Err(ConsensusError::DuplicateProposal(proposal.id));
        }
        info!(previous = %id, proposal = %proposal.id, epoch, "Resubmitting aborted proposal");
        self.start(proposal, now)
    }

    /// Dispatch a received message.
    pub fn handle_message(&mut self, message: ConsensusMessage, now: DateTime<Utc>) -> Vec<ConsensusAction> {
        match message {
            ConsensusMessage::Proposal(signed) => self.handle_proposal(signed, now),
            ConsensusMessage::Vote(vote) => self.handle_vote(vote, now),
            ConsensusMessage::Decision(decision) => self.handle_decision(decision, now),
        }
    }

    /// Handle a signed proposal.
    ///
    /// Proposals from anyone but the expected round proposer or with a bad
    /// signature are ignored. A proposal for a later round moves the local
    /// state to that round. A proposal for a committed id from a round past
    /// the commit is answered with the commit certificate.
    pub fn handle_proposal(&mut self, signed: SignedProposal, now: DateTime<Utc>) -> Vec<ConsensusAction> {
        let id = signed.proposal.id;
        if signed.round >= self.config.max_rounds {
            debug!(proposal = %id, round = signed.round, "Ignoring proposal beyond round limit");
            return Vec::new();
        }
        let expected = self.validators.proposer_for(&signed.proposal.proposer, signed.round);
        if expected != Some(signed.leader) {
            debug!(proposal = %id, leader = %signed.leader, round = signed.round, "Ignoring proposal from unexpected leader");
            return Vec::new();
        }
        if let Err(e) = signed.verify(self.directory.as_ref()) {
            debug!(proposal = %id, error = %e, "Dropping unverifiable proposal");
            return Vec::new();
        }
        if self.decided.contains_key(&id) {
            return self.answer_lagging(&id, signed.round);
        }

        let mut actions = Vec::new();
        match self.active.get_mut(&id) {
            Some(entry) => {
                if signed.round < entry.round || (signed.round == entry.round && entry.have_proposal) {
                    return actions;
                }
                if signed.round > entry.round {
                    entry.enter_round(signed.round, now);
                    actions.push(ConsensusAction::ViewChange {
                        proposal: id,
                        new_round: signed.round,
                        proposer: signed.leader,
                    });
                }
                entry.have_proposal = true;
            }
            None => {
                if self.active.len() >= self.config.max_active_proposals {
                    warn!(proposal = %id, max = self.config.max_active_proposals, "Dropping proposal, too many active");
                    return actions;
                }
                let mut entry = ActiveProposal::new(signed.proposal.clone(), signed.round, now);
                entry.have_proposal = true;
                self.active.insert(id, entry);
                debug!(proposal = %id, kind = signed.proposal.transition.kind_name(), round = signed.round, "Proposal received");
                actions.push(ConsensusAction::StateChanged {
                    proposal: id,
                    state: ProposalState::Proposed,
                });
            }
        }

        let approve = self.judge(&signed.proposal.transition);
        actions.extend(self.cast_vote(&id, VotePhase::PreVote, approve, now));
        actions.extend(self.drain_buffered(&id, now));
        actions
    }

    /// Handle a signed vote.
    ///
    /// Votes for unknown proposals or later rounds are buffered; votes for
    /// earlier rounds are stale and dropped. A vote for a committed id from a
    /// round past the commit is answered with the commit certificate.
    pub fn handle_vote(&mut self, vote: Vote, now: DateTime<Utc>) -> Vec<ConsensusAction> {
        if !self.validators.contains(&vote.voter) {
            debug!(voter = %vote.voter, "Ignoring vote from non-validator");
            return Vec::new();
        }
        if let Err(e) = vote.verify(self.directory.as_ref()) {
            debug!(voter = %vote.voter, error = %e, "Dropping unverifiable vote");
            return Vec::new();
        }
        if self.decided.contains_key(&vote.proposal) {
            return self.answer_lagging(&vote.proposal, vote.round);
        }
        match self.active.get(&vote.proposal).map(|e| e.round) {
            Some(round) if vote.round == round => self.accept_vote(vote, now),
            Some(round) if vote.round < round => {
                debug!(voter = %vote.voter, round = vote.round, current = round, "Dropping stale vote");
                Vec::new()
            }
            _ => {
                self.buffer(vote);
                Vec::new()
            }
        }
    }

    /// Handle a decision announced by a peer.
    ///
    /// A commit whose certificate verifies against the validator set is
    /// adopted, replacing an active round or a local abort. Commits are
    /// final, so a second commit for the same id is ignored. An abort is
    /// answered with the local commit, if there is one.
    pub fn handle_decision(&mut self, decision: Decision, now: DateTime<Utc>) -> Vec<ConsensusAction> {
        let id = decision.id();
        let local = self.decision(&id);
        if !decision.is_committed() {
            return match local {
                Some(held) if held.is_committed() => {
                    debug!(proposal = %id, "Peer aborted a committed proposal, answering with certificate");
                    vec![ConsensusAction::BroadcastDecision(held.clone())]
                }
                _ => Vec::new(),
            };
        }
        if local.is_some_and(Decision::is_committed) {
            return Vec::new();
        }
        let verified = decision
            .proposal
            .check_integrity()
            .and_then(|()| decision.verify_certificate(&self.validators, self.directory.as_ref()));
        if let Err(e) = verified {
            debug!(proposal = %id, error = %e, "Dropping decision with invalid certificate");
            return Vec::new();
        }

        let previous = self.state_of(&id);
        info!(
            proposal = %id,
            kind = decision.proposal.transition.kind_name(),
            round = decision.round,
            ?previous,
            "Adopting committed decision"
        );
        let decision = Decision {
            decided_at: now,
            ..decision
        };
        vec![
            ConsensusAction::StateChanged {
                proposal: id,
                state: ProposalState::Committed,
            },
            self.record_decision(decision),
        ]
    }

    /// Run timeouts: a round without a decision moves to the next proposer,
    /// and a proposal out of rounds is aborted.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<ConsensusAction> {
        let timeout = self.config.round_timeout();
        let mut expired: Vec<ProposalId> = self
            .active
            .iter()
            .filter(|(_, e)| now - e.round_started >= timeout)
            .map(|(id, _)| *id)
            .collect();
        expired.sort();

        let mut actions = Vec::new();
        for id in expired {
            actions.extend(self.advance_round(&id, now));
        }
        actions
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Answer traffic for a committed proposal from a round past the commit.
    fn answer_lagging(&self, id: &ProposalId, round: u32) -> Vec<ConsensusAction> {
        match self.decision(id) {
            Some(decision) if decision.is_committed() && round > decision.round => {
                debug!(proposal = %id, round, committed_in = decision.round, "Answering lagging round with certificate");
                vec![ConsensusAction::BroadcastDecision(decision.clone())]
            }
            _ => Vec::new(),
        }
    }

    fn is_known(&self, id: &ProposalId) -> bool {
        self.active.contains_key(id) || self.decided.contains_key(id)
    }

    /// Local validity of a transition against the key directory.
    fn judge(&self, transition: &StateTransition) -> bool {
        let target = transition.target();
        match transition {
            StateTransition::AddMember { .. } => !self.directory.contains(&target),
            StateTransition::RemoveMember { .. } | StateTransition::Slash { .. } | StateTransition::Revoke { .. } => {
                self.directory.contains(&target) && !self.directory.is_revoked(&target)
            }
        }
    }

    fn start(&mut self, proposal: Proposal, now: DateTime<Utc>) -> Result<Vec<ConsensusAction>> {
        if self.active.len() >= self.config.max_active_proposals {
            return Err(ConsensusError::TooManyProposals {
                max: self.config.max_active_proposals,
            });
        }
        let id = proposal.id;
        let approve = self.judge(&proposal.transition);
        info!(proposal = %id, kind = proposal.transition.kind_name(), target = %proposal.transition.target(), epoch = proposal.epoch, "Proposal raised");

        let signed = SignedProposal::sign(proposal.clone(), 0, &self.keys);
        let mut entry = ActiveProposal::new(proposal, 0, now);
        entry.have_proposal = true;
        self.active.insert(id, entry);

        let mut actions = vec![
            ConsensusAction::StateChanged {
                proposal: id,
                state: ProposalState::Proposed,
            },
            ConsensusAction::BroadcastProposal(signed),
        ];
        actions.extend(self.cast_vote(&id, VotePhase::PreVote, approve, now));
        actions.extend(self.drain_buffered(&id, now));
        Ok(actions)
    }

    /// Sign, broadcast and count this node's vote, once per round and phase.
    fn cast_vote(
        &mut self,
        id: &ProposalId,
        phase: VotePhase,
        approve: bool,
        now: DateTime<Utc>,
    ) -> Vec<ConsensusAction> {
        let me = self.keys.id();
        if !self.validators.contains(&me) {
            return Vec::new();
        }
        let Some(entry) = self.active.get_mut(id) else {
            return Vec::new();
        };
        let done = match phase {
            VotePhase::PreVote => &mut entry.prevoted,
            VotePhase::PreCommit => &mut entry.precommitted,
        };
        if *done {
            return Vec::new();
        }
        *done = true;
        let vote = Vote::sign(&self.keys, *id, entry.proposal.payload_hash, entry.round, phase, approve);
        let mut actions = vec![ConsensusAction::BroadcastVote(vote.clone())];
        actions.extend(self.accept_vote(vote, now));
        actions
    }

    /// Count a verified vote for the current round.
    fn accept_vote(&mut self, vote: Vote, now: DateTime<Utc>) -> Vec<ConsensusAction> {
        let mut actions = Vec::new();
        if !self.active.contains_key(&vote.proposal) {
            return actions;
        }

        if let Some(offense) = self.slashing.record_vote(&vote) {
            if let Some(entry) = self.active.get_mut(&vote.proposal) {
                entry.prevotes.remove(&vote.voter);
                entry.precommits.remove(&vote.voter);
            }
            let bps = self.slashing.penalty_bps(&offense);
            actions.push(ConsensusAction::SlashValidator {
                validator: vote.voter,
                offense,
                bps,
            });
            return actions;
        }
        if self.slashing.is_excluded(&vote.proposal, vote.round, &vote.voter) {
            return actions;
        }

        let quorum = self.validators.quorum();
        let Some(entry) = self.active.get_mut(&vote.proposal) else {
            return actions;
        };
        if vote.round != entry.round || vote.payload_hash != entry.proposal.payload_hash {
            debug!(voter = %vote.voter, proposal = %vote.proposal, "Ignoring vote for another round or payload");
            return actions;
        }

        let id = vote.proposal;
        let phase = vote.phase;
        match phase {
            VotePhase::PreVote => entry.prevotes.entry(vote.voter).or_insert(vote),
            VotePhase::PreCommit => entry.precommits.entry(vote.voter).or_insert(vote),
        };

        let follow_up = match phase {
            VotePhase::PreVote
                if entry.state == ProposalState::Proposed && entry.approvals(VotePhase::PreVote) >= quorum =>
            {
                entry.state = ProposalState::PreVoted;
                debug!(proposal = %id, round = entry.round, "Pre-vote quorum reached");
                actions.push(ConsensusAction::StateChanged {
                    proposal: id,
                    state: ProposalState::PreVoted,
                });
                FollowUp::PreCommit
            }
            VotePhase::PreCommit
                if matches!(entry.state, ProposalState::Proposed | ProposalState::PreVoted)
                    && entry.approvals(VotePhase::PreCommit) >= quorum =>
            {
                entry.state = ProposalState::Committed;
                actions.push(ConsensusAction::StateChanged {
                    proposal: id,
                    state: ProposalState::PreCommitted,
                });
                actions.push(ConsensusAction::StateChanged {
                    proposal: id,
                    state: ProposalState::Committed,
                });
                FollowUp::Commit(Decision {
                    proposal: entry.proposal.clone(),
                    outcome: ProposalState::Committed,
                    round: entry.round,
                    decided_at: now,
                    certificate: entry.precommits.values().filter(|v| v.approve).cloned().collect(),
                })
            }
            _ => FollowUp::Nothing,
        };

        match follow_up {
            FollowUp::Nothing => {}
            FollowUp::PreCommit => actions.extend(self.cast_vote(&id, VotePhase::PreCommit, true, now)),
            FollowUp::Commit(decision) => {
                info!(
                    proposal = %id,
                    kind = decision.proposal.transition.kind_name(),
                    round = decision.round,
                    certificate = decision.certificate.len(),
                    "Proposal committed"
                );
                actions.push(self.record_decision(decision.clone()));
                actions.push(ConsensusAction::BroadcastDecision(decision));
            }
        }
        actions
    }

    fn buffer(&mut self, vote: Vote) {
        if vote.round >= self.config.max_rounds {
            debug!(voter = %vote.voter, round = vote.round, "Dropping vote beyond round limit");
            return;
        }
        if self.buffered.iter().any(|v| v == &vote) {
            return;
        }
        if self.buffered.len() >= self.config.max_buffered_votes {
            warn!(voter = %vote.voter, max = self.config.max_buffered_votes, "Vote buffer full, dropping vote");
            return;
        }
        self.buffered.push(vote);
    }

    /// Replay buffered votes that now match the proposal's current round.
    fn drain_buffered(&mut self, id: &ProposalId, now: DateTime<Utc>) -> Vec<ConsensusAction> {
        let Some(round) = self.active.get(id).map(|e| e.round) else {
            return Vec::new();
        };
        let (ready, rest): (Vec<Vote>, Vec<Vote>) = std::mem::take(&mut self.buffered)
            .into_iter()
            .partition(|v| v.proposal == *id && v.round <= round);
        self.buffered = rest;

        let mut actions = Vec::new();
        for vote in ready.into_iter().filter(|v| v.round == round) {
            actions.extend(self.accept_vote(vote, now));
        }
        actions
    }

    fn advance_round(&mut self, id: &ProposalId, now: DateTime<Utc>) -> Vec<ConsensusAction> {
        let me = self.keys.id();
        let Some(entry) = self.active.get_mut(id) else {
            return Vec::new();
        };
        let next = entry.round + 1;
        if next >= self.config.max_rounds {
            warn!(proposal = %id, rounds = next, "Proposal aborted after round limit");
            let decision = Decision {
                proposal: entry.proposal.clone(),
                outcome: ProposalState::Aborted,
                round: entry.round,
                decided_at: now,
                certificate: Vec::new(),
            };
            return vec![
                ConsensusAction::StateChanged {
                    proposal: *id,
                    state: ProposalState::Aborted,
                },
                self.record_decision(decision.clone()),
                ConsensusAction::BroadcastDecision(decision),
            ];
        }

        entry.enter_round(next, now);
        let origin = entry.proposal.proposer;
        let Some(leader) = self.validators.proposer_for(&origin, next) else {
            return Vec::new();
        };
        info!(proposal = %id, round = next, proposer = %leader, "Round timed out, changing view");
        let mut actions = vec![ConsensusAction::ViewChange {
            proposal: *id,
            new_round: next,
            proposer: leader,
        }];

        if leader == me {
            entry.have_proposal = true;
            let signed = SignedProposal::sign(entry.proposal.clone(), next, &self.keys);
            let approve = self.judge(&signed.proposal.transition);
            actions.push(ConsensusAction::BroadcastProposal(signed));
            actions.extend(self.cast_vote(id, VotePhase::PreVote, approve, now));
        }
        actions.extend(self.drain_buffered(id, now));
        actions
    }

    /// Record a terminal state. The log is append-only: an adopted commit
    /// after a local abort is appended and becomes the decision for the id.
    fn record_decision(&mut self, decision: Decision) -> ConsensusAction {
        let id = decision.id();
        self.active.remove(&id);
        self.slashing.forget(&id);
        self.buffered.retain(|v| v.proposal != id);
        self.decided.insert(id, self.decisions.len());
        self.decisions.push(decision.clone());
        ConsensusAction::Decided(decision)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{deliver, Cluster};
    use fidelis_crypto::Hash256;

    #[test]
    fn test_config_validation() {
        assert!(ConsensusConfig::default().validate().is_ok());
        let bad = ConsensusConfig {
            max_rounds: 0,
            ..ConsensusConfig::default()
        };
        assert!(matches!(bad.validate(), Err(ConsensusError::InvalidValue { field: "consensus.max_rounds", .. })));
        let bad = ConsensusConfig {
            round_timeout_secs: 0,
            ..ConsensusConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_four_validators_commit() {
        let mut cluster = Cluster::new(4);
        let target = cluster.outsider.id();
        let actions = cluster.nodes[0]
            .propose(StateTransition::Revoke { entity: target }, cluster.now)
            .unwrap();
        let id = match &actions[1] {
            ConsensusAction::BroadcastProposal(p) => p.proposal.id,
            other => panic!("unexpected action {other:?}"),
        };
        let log = deliver(&mut cluster.nodes, vec![(0, actions)], cluster.now, &[]);

        for node in &cluster.nodes {
            assert_eq!(node.state_of(&id), Some(ProposalState::Committed));
            let decision = node.decision(&id).unwrap();
            assert_eq!(decision.round, 0);
            assert!(decision.verify_certificate(node.validators(), cluster.directory.as_ref()).is_ok());
        }
        let decided = log
            .iter()
            .filter(|(_, a)| matches!(a, ConsensusAction::Decided(_)))
            .count();
        assert_eq!(decided, 4);
    }

    #[test]
    fn test_single_validator_commits_immediately() {
        let mut cluster = Cluster::new(1);
        let target = cluster.outsider.id();
        let actions = cluster.nodes[0]
            .propose(StateTransition::Slash { entity: target, bps: 500 }, cluster.now)
            .unwrap();
        assert!(actions.iter().any(|a| matches!(a, ConsensusAction::Decided(d) if d.is_committed())));
        assert_eq!(cluster.nodes[0].active_count(), 0);
    }

    #[test]
    fn test_non_validator_cannot_propose() {
        let mut cluster = Cluster::new(4);
        let mut observer = cluster.observer();
        let target = cluster.outsider.id();
        assert!(matches!(
            observer.propose(StateTransition::Revoke { entity: target }, cluster.now),
            Err(ConsensusError::NotValidator(_))
        ));
        assert!(cluster.nodes[0].propose(StateTransition::Revoke { entity: target }, cluster.now).is_ok());
        assert!(matches!(
            cluster.nodes[0].propose(StateTransition::Revoke { entity: target }, cluster.now),
            Err(ConsensusError::DuplicateProposal(_))
        ));
    }

    #[test]
    fn test_proposal_from_wrong_leader_ignored() {
        let mut cluster = Cluster::new(4);
        let proposal = Proposal::new(
            StateTransition::Revoke { entity: cluster.outsider.id() },
            cluster.keys[0].id(),
            0,
            cluster.now,
        )
        .unwrap();
        let forged = SignedProposal::sign(proposal, 0, &cluster.keys[1]);
        assert!(cluster.nodes[2].handle_proposal(forged, cluster.now).is_empty());
        assert_eq!(cluster.nodes[2].active_count(), 0);
    }

    #[test]
    fn test_invalid_transition_aborts_after_round_limit() {
        let mut cluster = Cluster::new(4);
        let existing = *cluster.keys[3].public_key();
        let transition = StateTransition::AddMember {
            public_key: existing,
            kind: fidelis_identity::EntityKind::SoftwareAgent,
            society: fidelis_identity::SocietyId::new("s0").unwrap(),
        };
        let actions = cluster.nodes[0].propose(transition, cluster.now).unwrap();
        deliver(&mut cluster.nodes, vec![(0, actions)], cluster.now, &[]);
        assert!(cluster.nodes[0].decisions().is_empty());

        let mut now = cluster.now;
        let mut aborted = None;
        for _ in 0..3 {
            now += Duration::seconds(31);
            let seeds: Vec<_> = (0..cluster.nodes.len())
                .map(|i| (i, cluster.nodes[i].tick(now)))
                .collect();
            let log = deliver(&mut cluster.nodes, seeds, now, &[]);
            for (_, action) in log {
                if let ConsensusAction::Decided(d) = action {
                    aborted = Some(d);
                }
            }
        }
        let decision = aborted.unwrap();
        assert_eq!(decision.outcome, ProposalState::Aborted);
        assert_eq!(decision.round, 2);
        for node in &cluster.nodes {
            assert_eq!(node.state_of(&decision.id()), Some(ProposalState::Aborted));
        }

        let again = cluster.nodes[1].resubmit(&decision.id(), now).unwrap();
        let new_id = match &again[1] {
            ConsensusAction::BroadcastProposal(p) => {
                assert_eq!(p.proposal.epoch, decision.proposal.epoch + 1);
                p.proposal.id
            }
            other => panic!("unexpected action {other:?}"),
        };
        assert_ne!(new_id, decision.id());
        assert!(matches!(
            cluster.nodes[1].resubmit(&new_id, now),
            Err(ConsensusError::NotAborted(_))
        ));
        assert!(matches!(
            cluster.nodes[1].resubmit(&Hash256::hash(b"nothing"), now),
            Err(ConsensusError::UnknownProposal(_))
        ));
    }

    #[test]
    fn test_view_change_recovers_from_silent_validators() {
        let mut cluster = Cluster::new(4);
        let proposer = 0;
        let origin = cluster.keys[proposer].id();
        let leader = cluster.nodes[0].validators().proposer_for(&origin, 1).unwrap();
        let leader_idx = cluster.index_of(&leader);
        let silent: Vec<usize> = (0..4).filter(|i| *i != proposer && *i != leader_idx).collect();

        let actions = cluster.nodes[proposer]
            .propose(StateTransition::Revoke { entity: cluster.outsider.id() }, cluster.now)
            .unwrap();
        deliver(&mut cluster.nodes, vec![(proposer, actions)], cluster.now, &silent);
        assert!(cluster.nodes[proposer].decisions().is_empty());

        let now = cluster.now + Duration::seconds(31);
        let seeds = vec![
            (proposer, cluster.nodes[proposer].tick(now)),
            (leader_idx, cluster.nodes[leader_idx].tick(now)),
        ];
        assert!(seeds[1]
            .1
            .iter()
            .any(|a| matches!(a, ConsensusAction::BroadcastProposal(p) if p.round == 1)));
        deliver(&mut cluster.nodes, seeds, now, &[]);

        for node in &cluster.nodes {
            let decision = node.decisions().first().unwrap();
            assert!(decision.is_committed());
            assert_eq!(decision.round, 1);
        }
    }

    #[test]
    fn test_lagging_validator_adopts_commit() {
        let mut cluster = Cluster::new(4);
        let actions = cluster.nodes[0]
            .propose(StateTransition::Revoke { entity: cluster.outsider.id() }, cluster.now)
            .unwrap();
        let signed = match &actions[1] {
            ConsensusAction::BroadcastProposal(p) => p.clone(),
            other => panic!("unexpected action {other:?}"),
        };
        let id = signed.proposal.id;

        // Node 3 sees the round-0 proposal, then misses every vote.
        cluster.nodes[3].handle_proposal(signed, cluster.now);
        deliver(&mut cluster.nodes, vec![(0, actions)], cluster.now, &[3]);
        assert_eq!(cluster.nodes[0].state_of(&id), Some(ProposalState::Committed));
        assert_eq!(cluster.nodes[3].state_of(&id), Some(ProposalState::Proposed));

        let mut now = cluster.now;
        for _ in 0..4 {
            now += Duration::seconds(31);
            let seeds: Vec<_> = (0..cluster.nodes.len())
                .map(|i| (i, cluster.nodes[i].tick(now)))
                .collect();
            deliver(&mut cluster.nodes, seeds, now, &[]);
        }

        for node in &cluster.nodes {
            let decision = node.decision(&id).unwrap();
            assert!(decision.is_committed());
            assert_eq!(decision.round, 0);
            assert!(decision.verify_certificate(node.validators(), cluster.directory.as_ref()).is_ok());
            assert_eq!(node.active_count(), 0);
        }
    }

    #[test]
    fn test_commit_after_local_abort_is_adopted() {
        let mut cluster = Cluster::new(4);
        let actions = cluster.nodes[0]
            .propose(StateTransition::Revoke { entity: cluster.outsider.id() }, cluster.now)
            .unwrap();
        let signed = match &actions[1] {
            ConsensusAction::BroadcastProposal(p) => p.clone(),
            other => panic!("unexpected action {other:?}"),
        };
        let id = signed.proposal.id;
        cluster.nodes[3].handle_proposal(signed, cluster.now);
        deliver(&mut cluster.nodes, vec![(0, actions)], cluster.now, &[3]);
        let commit = cluster.nodes[0].decision(&id).unwrap().clone();

        // Node 3 runs out of rounds alone.
        let mut now = cluster.now;
        for _ in 0..3 {
            now += Duration::seconds(31);
            cluster.nodes[3].tick(now);
        }
        assert_eq!(cluster.nodes[3].state_of(&id), Some(ProposalState::Aborted));

        let actions = cluster.nodes[3].handle_decision(commit.clone(), now);
        assert!(actions.iter().any(|a| matches!(a, ConsensusAction::Decided(d) if d.is_committed())));
        assert_eq!(cluster.nodes[3].state_of(&id), Some(ProposalState::Committed));
        assert!(matches!(
            cluster.nodes[3].resubmit(&id, now),
            Err(ConsensusError::NotAborted(_))
        ));
        // Commits are final.
        assert!(cluster.nodes[3].handle_decision(commit, now).is_empty());
    }

    #[test]
    fn test_short_certificate_rejected() {
        let mut cluster = Cluster::new(4);
        let actions = cluster.nodes[0]
            .propose(StateTransition::Revoke { entity: cluster.outsider.id() }, cluster.now)
            .unwrap();
        let log = deliver(&mut cluster.nodes, vec![(0, actions)], cluster.now, &[]);
        let commit = log
            .into_iter()
            .find_map(|(_, a)| match a {
                ConsensusAction::Decided(d) => Some(d),
                _ => None,
            })
            .unwrap();

        let mut observer = cluster.observer();
        let mut short = commit.clone();
        short.certificate.truncate(2);
        assert!(observer.handle_decision(short, cluster.now).is_empty());
        assert_eq!(observer.state_of(&commit.id()), None);

        let mut aborted = commit.clone();
        aborted.outcome = ProposalState::Aborted;
        aborted.certificate.clear();
        assert!(observer.handle_decision(aborted.clone(), cluster.now).is_empty());
        assert!(matches!(
            cluster.nodes[1].handle_decision(aborted, cluster.now).as_slice(),
            [ConsensusAction::BroadcastDecision(d)] if d.is_committed()
        ));

        let actions = observer.handle_decision(commit.clone(), cluster.now);
        assert!(actions.iter().any(|a| matches!(a, ConsensusAction::Decided(d) if d.is_committed())));
        assert_eq!(observer.state_of(&commit.id()), Some(ProposalState::Committed));
    }

    #[test]
    fn test_early_votes_are_buffered() {
        let mut cluster = Cluster::new(4);
        let actions = cluster.nodes[0]
            .propose(StateTransition::Revoke { entity: cluster.outsider.id() }, cluster.now)
            .unwrap();
        let log = deliver(&mut cluster.nodes, vec![(0, actions)], cluster.now, &[3]);

        let mut proposal = None;
        let mut votes = Vec::new();
        for (_, action) in log {
            match action {
                ConsensusAction::BroadcastProposal(p) => proposal = Some(p),
                ConsensusAction::BroadcastVote(v) => votes.push(v),
                _ => {}
            }
        }
        let late = &mut cluster.nodes[3];
        for vote in votes {
            assert!(late.handle_vote(vote, cluster.now).is_empty());
        }
        assert!(late.buffered_count() > 0);
        let actions = late.handle_proposal(proposal.unwrap(), cluster.now);
        assert!(actions.iter().any(|a| matches!(a, ConsensusAction::Decided(d) if d.is_committed())));
        assert_eq!(late.buffered_count(), 0);
    }

    #[test]
    fn test_equivocation_slashes_and_excludes() {
        let mut cluster = Cluster::new(4);
        let actions = cluster.nodes[0]
            .propose(StateTransition::Revoke { entity: cluster.outsider.id() }, cluster.now)
            .unwrap();
        let signed = match &actions[1] {
            ConsensusAction::BroadcastProposal(p) => p.clone(),
            other => panic!("unexpected action {other:?}"),
        };
        let id = signed.proposal.id;
        let payload = signed.proposal.payload_hash;

        let honest = Vote::sign(&cluster.keys[2], id, payload, 0, VotePhase::PreVote, true);
        let conflicting = Vote::sign(&cluster.keys[2], id, payload, 0, VotePhase::PreVote, false);
        assert!(cluster.nodes[0].handle_vote(honest, cluster.now).is_empty());
        let actions = cluster.nodes[0].handle_vote(conflicting, cluster.now);
        match actions.as_slice() {
            [ConsensusAction::SlashValidator { validator, offense, bps }] => {
                assert_eq!(*validator, cluster.keys[2].id());
                assert_eq!(*bps, 10_000);
                assert!(offense.verify(cluster.directory.as_ref()).is_ok());
            }
            other => panic!("unexpected actions {other:?}"),
        }
        assert!(cluster.nodes[0].slashing().is_excluded(&id, 0, &cluster.keys[2].id()));

        // Proposer plus one honest validator: the equivocator no longer counts.
        let third = Vote::sign(&cluster.keys[1], id, payload, 0, VotePhase::PreVote, true);
        cluster.nodes[0].handle_vote(third, cluster.now);
        assert_eq!(cluster.nodes[0].state_of(&id), Some(ProposalState::Proposed));
    }

    #[test]
    fn test_forged_vote_dropped() {
        let mut cluster = Cluster::new(4);
        let actions = cluster.nodes[0]
            .propose(StateTransition::Revoke { entity: cluster.outsider.id() }, cluster.now)
            .unwrap();
        let signed = match &actions[1] {
            ConsensusAction::BroadcastProposal(p) => p.clone(),
            other => panic!("unexpected action {other:?}"),
        };
        let mut vote = Vote::sign(&cluster.keys[1], signed.proposal.id, signed.proposal.payload_hash, 0, VotePhase::PreVote, true);
        vote.voter = cluster.keys[2].id();
        assert!(cluster.nodes[0].handle_vote(vote, cluster.now).is_empty());
        assert_eq!(cluster.nodes[0].buffered_count(), 0);
    }

    #[test]
    fn test_vote_buffer_is_bounded() {
        let mut cluster = Cluster::with_config(
            4,
            ConsensusConfig {
                max_buffered_votes: 2,
                ..ConsensusConfig::default()
            },
        );
        for i in 0..5u8 {
            let vote = Vote::sign(&cluster.keys[1], Hash256::hash(&[i]), Hash256::hash(b"t"), 0, VotePhase::PreVote, true);
            cluster.nodes[0].handle_vote(vote, cluster.now);
        }
        assert_eq!(cluster.nodes[0].buffered_count(), 2);
    }
}
