//! A federation node.
//!
//! [`FederationNode`] owns one member's view of the federation: the entity
//! registry, stakes, challenges, the reputation engine, a consensus
//! coordinator, the gossip layer and the resource economy monitor. Every
//! operation takes `now` explicitly; [`FederationNode::run`] drives the node
//! from a transport inbox and a wall-clock interval.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fidelis_consensus::{
    ConsensusAction, ConsensusCoordinator, Decision, ProposalId, ProposalState, SlashingOffense, StateTransition,
    ValidatorSet,
};
use fidelis_crypto::{Hash256, PublicKey};
use fidelis_economy::{Direction, EconomyError, MonitorReport, ResourceEconomyMonitor};
use fidelis_identity::{Entity, EntityId, EntityKeyPair, EntityKind, IdentityError, KeyDirectory, SharedRegistry, SocietyId};
use fidelis_net::{Delivery, Disseminator, SignedEnvelope, Transport};
use fidelis_reputation::{
    Attestation, AuditLog, CapabilityTier, Challenge, ChallengeAuditor, ChallengeId, ChallengeState, ChallengeTarget,
    ContextId, Rebuttal, ReputationEngine, ReputationError, SlashReason, StakeLedger, TrustDelta, TrustTensor, Verdict,
    WitnessedEvent,
};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::FederationConfig;
use crate::events::{EventSubmission, FederationEvent, FederationMessage, LedgerRequest, TickReport};
use crate::{CoreError, Result};

// =============================================================================
// Node
// =============================================================================

/// One member of a trust federation.
pub struct FederationNode {
    config: FederationConfig,
    keys: Arc<EntityKeyPair>,
    registry: SharedRegistry,
    directory: Arc<dyn KeyDirectory>,
    stakes: Arc<StakeLedger>,
    auditor: Arc<ChallengeAuditor>,
    engine: Arc<ReputationEngine>,
    consensus: Mutex<ConsensusCoordinator>,
    gossip: Disseminator<FederationMessage>,
    economy: ResourceEconomyMonitor,
    events: broadcast::Sender<FederationEvent>,
    pending_revocations: SyncMutex<HashSet<EntityId>>,
    anomaly_active: AtomicBool,
}

impl std::fmt::Debug for FederationNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationNode")
            .field("id", &self.keys.id())
            .field("entities", &self.registry.read().len())
            .field("peers", &self.gossip.peers().len())
            .finish_non_exhaustive()
    }
}

impl FederationNode {
    /// Create a node.
    ///
    /// `registry` is this node's replica of the membership; it should already
    /// contain the validators. A node whose key is not in `validators`
    /// follows consensus without voting.
    ///
    /// # Errors
    ///
    /// Returns `Config` if any section of `config` is invalid.
    pub fn new(
        config: FederationConfig,
        keys: Arc<EntityKeyPair>,
        registry: SharedRegistry,
        validators: ValidatorSet,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        let directory: Arc<dyn KeyDirectory> = registry.clone();
        let stakes = Arc::new(StakeLedger::new(config.stake.clone()));
        let auditor = Arc::new(ChallengeAuditor::new(config.challenge.clone()));
        let engine = Arc::new(ReputationEngine::new(
            config.engine.clone(),
            config.witness.clone(),
            directory.clone(),
            stakes.clone(),
            auditor.clone(),
            Arc::new(AuditLog::new()),
        ));
        let consensus =
            ConsensusCoordinator::new(keys.clone(), directory.clone(), validators, config.consensus.clone())?;
        let gossip = Disseminator::new(keys.clone(), directory.clone(), transport, config.gossip.clone())?;
        let economy = ResourceEconomyMonitor::new(config.economy.clone())?;
        let (events, _) = broadcast::channel(config.node.event_channel_capacity);

        info!(
            node = %keys.id(),
            validator = consensus.is_validator(),
            validators = consensus.validators().len(),
            "Federation node created"
        );

        Ok(Self {
            config,
            keys,
            registry,
            directory,
            stakes,
            auditor,
            engine,
            consensus: Mutex::new(consensus),
            gossip,
            economy,
            events,
            pending_revocations: SyncMutex::new(HashSet::new()),
            anomaly_active: AtomicBool::new(false),
        })
    }

    // ===== Accessors =====

    /// This node's entity id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.keys.id()
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    /// The membership replica.
    #[must_use]
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// The stake ledger.
    #[must_use]
    pub fn stakes(&self) -> &Arc<StakeLedger> {
        &self.stakes
    }

    /// The challenge auditor.
    #[must_use]
    pub fn auditor(&self) -> &Arc<ChallengeAuditor> {
        &self.auditor
    }

    /// The reputation engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<ReputationEngine> {
        &self.engine
    }

    /// The resource economy monitor.
    #[must_use]
    pub fn economy(&self) -> &ResourceEconomyMonitor {
        &self.economy
    }

    /// The gossip layer.
    #[must_use]
    pub fn gossip(&self) -> &Disseminator<FederationMessage> {
        &self.gossip
    }

    /// Log of every reputation submission, accepted or not.
    #[must_use]
    pub fn audit_log(&self) -> &Arc<AuditLog> {
        self.engine.audit_log()
    }

    /// Subscribe to node events.
    pub fn subscribe(&self) -> broadcast::Receiver<FederationEvent> {
        self.events.subscribe()
    }

    /// Add a gossip peer.
    pub fn add_peer(&self, peer: EntityId) -> bool {
        self.gossip.add_peer(peer)
    }

    // ===== Membership =====

    /// Register an entity directly in this node's replica and open its
    /// resource account.
    ///
    /// Used for bootstrap membership; entities joining a running federation
    /// go through [`Self::register_sponsored_entity`].
    ///
    /// # Errors
    ///
    /// Returns `Identity` if the entity exists or the registry is full.
    pub fn register_entity(
        &self,
        public_key: PublicKey,
        kind: EntityKind,
        society: SocietyId,
        now: DateTime<Utc>,
    ) -> Result<EntityId> {
        let id = self.registry.write().register(Entity::new(public_key, kind, society, now))?;
        self.open_account(id, now);
        info!(node = %self.id(), entity = %id, %kind, "Entity registered");
        Ok(id)
    }

    /// Propose admitting a new entity on behalf of a staked sponsor.
    ///
    /// # Errors
    ///
    /// - `Identity` if the sponsor is unknown or revoked, or the key is
    ///   already registered
    /// - `Reputation(InsufficientStake)` if the sponsor's stake is below the
    ///   identity creation minimum
    /// - `Consensus` if this node cannot propose
    pub async fn register_sponsored_entity(
        &self,
        sponsor: &EntityId,
        public_key: PublicKey,
        kind: EntityKind,
        society: SocietyId,
        now: DateTime<Utc>,
    ) -> Result<ProposalId> {
        self.require_active(sponsor)?;
        if !self.stakes.can_sponsor_identity(sponsor) {
            return Err(ReputationError::InsufficientStake {
                entity: *sponsor,
                required: self.stakes.policy().identity_creation_minimum,
                actual: self.stakes.balance(sponsor),
            }
            .into());
        }
        let candidate = EntityId::from_public_key(&public_key);
        if self.directory.contains(&candidate) {
            return Err(IdentityError::AlreadyExists(candidate).into());
        }
        let (id, _) = self
            .propose(StateTransition::AddMember { public_key, kind, society }, now)
            .await?;
        info!(node = %self.id(), sponsor = %sponsor, candidate = %candidate, proposal = %id, "Sponsored admission proposed");
        Ok(id)
    }

    // ===== Stake =====

    /// Bond stake for an active entity. Returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns `Identity` for unknown or revoked owners and `Reputation` for a
    /// zero amount or overflow.
    pub fn deposit_stake(&self, owner: EntityId, tier: CapabilityTier, amount: u64, now: DateTime<Utc>) -> Result<u64> {
        self.require_active(&owner)?;
        Ok(self.stakes.deposit(owner, tier, amount, now)?)
    }

    /// Withdraw unlocked stake. Returns the remaining balance.
    ///
    /// # Errors
    ///
    /// Returns `StakeNotFound`, `StakeLocked` or `WithdrawalExceedsBalance`.
    pub fn withdraw_stake(&self, owner: &EntityId, amount: u64, now: DateTime<Utc>) -> Result<u64> {
        Ok(self.stakes.withdraw(owner, amount, now)?)
    }

    // ===== Reputation =====

    /// Validate and apply a witnessed event, then gossip it to peers.
    ///
    /// Peers re-validate the submission against their own replicas.
    ///
    /// # Errors
    ///
    /// Returns the engine's rejection; nothing is gossiped in that case.
    pub fn submit_event(
        &self,
        event: WitnessedEvent,
        attestations: Vec<Attestation>,
        now: DateTime<Utc>,
    ) -> Result<TrustDelta> {
        let delta = self.engine.submit_event(&event, &attestations, now)?;
        let message = FederationMessage::Submission(EventSubmission { event, attestations });
        if let Err(e) = self.gossip.broadcast(&message) {
            warn!(node = %self.id(), subject = %delta.subject, error = %e, "Failed to gossip accepted event");
        }
        Ok(delta)
    }

    /// Current decayed tensor for an entity in a context.
    #[must_use]
    pub fn query_trust(&self, entity: &EntityId, context: &ContextId, now: DateTime<Utc>) -> Option<TrustTensor> {
        self.engine.query_tensor(entity, context, now)
    }

    /// Weighted aggregate trust.
    #[must_use]
    pub fn aggregate_trust(&self, entity: &EntityId, context: &ContextId, now: DateTime<Utc>) -> Option<f64> {
        self.engine.aggregate_trust(entity, context, now)
    }

    // ===== Challenges =====

    /// Raise a challenge and notify the challenged entity.
    ///
    /// # Errors
    ///
    /// Returns `Identity` if either party is unknown or revoked, and
    /// `Reputation(ChallengeRejected)` for self-challenges, flagged targets
    /// or challenges inside the cooldown.
    pub fn raise_challenge(
        &self,
        challenger: EntityId,
        target: ChallengeTarget,
        now: DateTime<Utc>,
    ) -> Result<Challenge> {
        self.require_active(&challenger)?;
        self.require_active(&target.challenged())?;
        let challenge = self.auditor.raise(challenger, target, now)?;
        self.auditor.mark_notified(&challenge.id)?;
        Ok(challenge)
    }

    /// Answer a challenge with a signed rebuttal.
    ///
    /// # Errors
    ///
    /// Returns `ChallengeNotFound`, `ChallengeClosed`,
    /// `ResponseWindowClosed` or `InvalidSignature`.
    pub fn respond_challenge(
        &self,
        id: &ChallengeId,
        responder: &EntityKeyPair,
        evidence_hash: Hash256,
        verdict: Verdict,
        now: DateTime<Utc>,
    ) -> Result<ChallengeState> {
        let rebuttal = Rebuttal::sign(responder, id, evidence_hash);
        Ok(self.auditor.respond(id, rebuttal, verdict, self.directory.as_ref(), now)?)
    }

    // ===== Consensus =====

    /// Propose a membership or stake change.
    ///
    /// # Errors
    ///
    /// Returns `Consensus(NotValidator)` on a non-validator node,
    /// `DuplicateProposal` or `TooManyProposals`.
    pub async fn propose_transition(&self, transition: StateTransition, now: DateTime<Utc>) -> Result<ProposalId> {
        Ok(self.propose(transition, now).await?.0)
    }

    /// Resubmit an aborted proposal as a new epoch.
    ///
    /// # Errors
    ///
    /// Returns `Consensus(UnknownProposal | NotAborted | DuplicateProposal)`.
    pub async fn resubmit(&self, id: &ProposalId, now: DateTime<Utc>) -> Result<ProposalId> {
        let actions = self.consensus.lock().await.resubmit(id, now)?;
        let new_id = raised_proposal(&actions)?;
        self.dispatch(actions, now);
        Ok(new_id)
    }

    /// Terminal outcome of a proposal, if it has one.
    ///
    /// # Errors
    ///
    /// Returns `ConsensusTimeout` if the proposal aborted.
    pub async fn decision_outcome(&self, id: &ProposalId) -> Result<Option<Decision>> {
        let consensus = self.consensus.lock().await;
        match consensus.decision(id) {
            Some(d) if d.outcome == ProposalState::Aborted => Err(CoreError::ConsensusTimeout {
                proposal: *id,
                rounds: d.round + 1,
            }),
            other => Ok(other.cloned()),
        }
    }

    /// All decisions in the order they were reached.
    pub async fn decisions(&self) -> Vec<Decision> {
        self.consensus.lock().await.decisions().to_vec()
    }

    /// Local state of a proposal.
    pub async fn proposal_state(&self, id: &ProposalId) -> Option<ProposalState> {
        self.consensus.lock().await.state_of(id)
    }

    async fn propose(&self, transition: StateTransition, now: DateTime<Utc>) -> Result<(ProposalId, Vec<Decision>)> {
        let actions = self.consensus.lock().await.propose(transition, now)?;
        let id = raised_proposal(&actions)?;
        let decided = self.dispatch(actions, now);
        Ok((id, decided))
    }

    /// Carry out coordinator actions. Returns the decisions among them.
    fn dispatch(&self, actions: Vec<ConsensusAction>, now: DateTime<Utc>) -> Vec<Decision> {
        let mut decided = Vec::new();
        for action in actions {
            if let Some(message) = action.to_message() {
                if let Err(e) = self.gossip.broadcast(&FederationMessage::Consensus(message)) {
                    warn!(node = %self.id(), error = %e, "Failed to broadcast consensus message");
                }
                continue;
            }
            match action {
                ConsensusAction::Decided(decision) => {
                    self.apply_decision(&decision, now);
                    decided.push(decision);
                }
                ConsensusAction::SlashValidator { validator, offense, bps } => {
                    self.slash_validator(validator, offense, bps, now);
                }
                ConsensusAction::ViewChange {
                    proposal,
                    new_round,
                    proposer,
                } => {
                    info!(node = %self.id(), proposal = %proposal, round = new_round, proposer = %proposer, "View change");
                }
                ConsensusAction::StateChanged { proposal, state } => {
                    debug!(node = %self.id(), proposal = %proposal, ?state, "Proposal state changed");
                }
                ConsensusAction::BroadcastProposal(_)
                | ConsensusAction::BroadcastVote(_)
                | ConsensusAction::BroadcastDecision(_) => {}
            }
        }
        decided
    }

    fn apply_decision(&self, decision: &Decision, now: DateTime<Utc>) {
        let id = decision.id();
        let transition = &decision.proposal.transition;
        if !decision.is_committed() {
            warn!(node = %self.id(), proposal = %id, kind = transition.kind_name(), rounds = decision.round + 1, "Proposal aborted");
            if let StateTransition::Revoke { entity } = transition {
                self.pending_revocations.lock().remove(entity);
            }
            self.emit(FederationEvent::ConsensusDecision(decision.clone()));
            return;
        }

        match transition {
            StateTransition::AddMember {
                public_key,
                kind,
                society,
            } => {
                let registered = self
                    .registry
                    .write()
                    .register(Entity::new(*public_key, *kind, society.clone(), now));
                match registered {
                    Ok(entity) => {
                        self.open_account(entity, now);
                        info!(node = %self.id(), proposal = %id, entity = %entity, "Member admitted");
                    }
                    Err(e) => warn!(node = %self.id(), proposal = %id, error = %e, "Committed admission not applied"),
                }
            }
            StateTransition::RemoveMember { entity } | StateTransition::Revoke { entity } => {
                let revoked = self.registry.write().revoke(entity, now);
                self.pending_revocations.lock().remove(entity);
                match revoked {
                    Ok(changed) => info!(node = %self.id(), proposal = %id, entity = %entity, changed, "Entity revoked"),
                    Err(e) => warn!(node = %self.id(), proposal = %id, error = %e, "Committed revocation not applied"),
                }
            }
            StateTransition::Slash { entity, bps } => {
                match self
                    .stakes
                    .slash_bps(entity, *bps, SlashReason::ConsensusDecision { proposal: id }, now)
                {
                    Ok(event) => info!(node = %self.id(), proposal = %id, entity = %entity, amount = event.amount, "Stake slashed"),
                    Err(e) => warn!(node = %self.id(), proposal = %id, error = %e, "Committed slash not applied"),
                }
            }
        }
        self.emit(FederationEvent::ConsensusDecision(decision.clone()));
    }

    fn slash_validator(&self, validator: EntityId, offense: SlashingOffense, bps: u64, now: DateTime<Utc>) {
        let (proposal, round) = offense.location();
        let amount = match self
            .stakes
            .slash_bps(&validator, bps, SlashReason::Equivocation { proposal, round }, now)
        {
            Ok(event) => event.amount,
            Err(e) => {
                debug!(validator = %validator, error = %e, "Equivocating validator has no stake to slash");
                0
            }
        };
        warn!(node = %self.id(), validator = %validator, proposal = %proposal, round, amount, "Validator slashed for equivocation");
        self.emit(FederationEvent::ValidatorSlashed {
            validator,
            offense,
            amount,
        });
    }

    // ===== Gossip =====

    /// Handle a decoded envelope: relay it if fresh, then process it.
    pub async fn handle_envelope(&self, envelope: &SignedEnvelope, now: DateTime<Utc>) -> Delivery<FederationMessage> {
        let delivery = self.gossip.on_receive(envelope);
        if let Delivery::Accepted(message) = &delivery {
            self.relay(envelope);
            self.process(message.clone(), envelope.sender, now).await;
        }
        delivery
    }

    /// Handle a raw frame from the transport.
    pub async fn handle_frame(&self, frame: &[u8], now: DateTime<Utc>) -> Delivery<FederationMessage> {
        let (delivery, envelope) = self.gossip.on_frame(frame);
        if let (Delivery::Accepted(message), Some(envelope)) = (&delivery, &envelope) {
            self.relay(envelope);
            self.process(message.clone(), envelope.sender, now).await;
        }
        delivery
    }

    fn relay(&self, envelope: &SignedEnvelope) {
        if let Err(e) = self.gossip.relay(envelope) {
            debug!(node = %self.id(), error = %e, "Relay skipped");
        }
    }

    async fn process(&self, message: FederationMessage, sender: EntityId, now: DateTime<Utc>) {
        match message {
            FederationMessage::Consensus(message) => {
                let actions = self.consensus.lock().await.handle_message(message, now);
                self.dispatch(actions, now);
            }
            FederationMessage::Submission(submission) => {
                match self.engine.submit_event(&submission.event, &submission.attestations, now) {
                    Ok(delta) => debug!(
                        node = %self.id(),
                        from = %sender,
                        subject = %delta.subject,
                        sequence = delta.sequence,
                        "Applied gossiped event"
                    ),
                    Err(e) => debug!(
                        node = %self.id(),
                        from = %sender,
                        reason = ?e.reason_code(),
                        error = %e,
                        "Gossiped event rejected"
                    ),
                }
            }
        }
    }

    // ===== Economy =====

    /// Apply a resource ledger operation. Returns the owner's coherence.
    ///
    /// Accounts are opened on first use for entities registered without one.
    ///
    /// # Errors
    ///
    /// Returns `Identity` for unknown or revoked parties and `Economy` for
    /// ledger rejections.
    pub fn record_transaction(&self, request: LedgerRequest, now: DateTime<Utc>) -> Result<f64> {
        let ledger = self.economy.ledger();
        let owner = request.owner();
        self.require_active(&owner)?;
        self.open_account(owner, now);
        let coherence = match request {
            LedgerRequest::Earn { owner, amount } => ledger.earn(&owner, amount, now)?,
            LedgerRequest::Spend { owner, amount } => ledger.spend(&owner, amount, now)?,
            LedgerRequest::Commit { owner, amount } => ledger.commit(&owner, amount, now)?,
            LedgerRequest::Release { owner, amount } => ledger.release(&owner, amount, now)?,
            LedgerRequest::Transfer { from, to, amount } => {
                self.require_active(&to)?;
                self.open_account(to, now);
                ledger.transfer(&from, &to, amount, now)?;
                ledger.coherence_of(&from).unwrap_or_default()
            }
        };
        Ok(coherence)
    }

    fn open_account(&self, owner: EntityId, now: DateTime<Utc>) {
        match self
            .economy
            .ledger()
            .open_account(owner, self.config.node.initial_allocation, now)
        {
            Ok(()) | Err(EconomyError::AccountExists(_)) => {}
            Err(e) => warn!(node = %self.id(), entity = %owner, error = %e, "Failed to open resource account"),
        }
    }

    fn react_to_market(&self, report: &MonitorReport, now: DateTime<Utc>) {
        if let Some(transition) = &report.transition {
            if transition.direction == Direction::Degrading {
                let until = now + Duration::seconds(self.config.node.tightening_secs);
                self.engine.tighten_anti_gaming(until, transition.severity);
                warn!(
                    node = %self.id(),
                    from = %transition.from,
                    to = %transition.to,
                    severity = transition.severity,
                    until = %until,
                    "Anti-gaming tightened after market degradation"
                );
            }
            self.emit(FederationEvent::PhaseTransition(transition.clone()));
        }

        let snapshot = &report.snapshot;
        let anomalous = snapshot.agents >= self.config.economy.min_active_agents
            && snapshot.crisis_risk >= self.config.node.anomaly_risk_threshold;
        let was = self.anomaly_active.swap(anomalous, Ordering::Relaxed);
        if anomalous && !was {
            warn!(node = %self.id(), crisis_risk = snapshot.crisis_risk, gamma = snapshot.gamma, "Economic anomaly");
            self.emit(FederationEvent::EconomicAnomaly(snapshot.clone()));
        }
    }

    // ===== Maintenance =====

    /// Periodic maintenance.
    ///
    /// Expires overdue challenges and penalizes the evaders, proposes
    /// revocation of newly flagged entities, times out consensus rounds and
    /// analyses the resource market.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let penalties = self.auditor.expire(&self.stakes, now);
        let mut flagged = Vec::new();
        for penalty in &penalties {
            if let Err(e) = self.engine.apply_penalty(&penalty.entity, penalty.trust_fraction(), now) {
                warn!(node = %self.id(), entity = %penalty.entity, error = %e, "Failed to apply evasion penalty");
            }
            if penalty.permanently_flagged {
                flagged.push(penalty.entity);
            }
            self.emit(FederationEvent::EvasionPenalty(penalty.clone()));
        }

        let actions = self.consensus.lock().await.tick(now);
        let mut decisions = self.dispatch(actions, now);

        let mut revocations = Vec::new();
        if self.config.node.auto_revoke_flagged {
            for entity in flagged {
                match self.propose_revocation(entity, now).await {
                    Ok(Some((id, decided))) => {
                        revocations.push(id);
                        decisions.extend(decided);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(node = %self.id(), entity = %entity, error = %e, "Failed to propose revocation"),
                }
            }
        }

        let market = self.economy.tick(now);
        self.react_to_market(&market, now);

        TickReport {
            penalties,
            decisions,
            revocations,
            market,
        }
    }

    async fn propose_revocation(
        &self,
        entity: EntityId,
        now: DateTime<Utc>,
    ) -> Result<Option<(ProposalId, Vec<Decision>)>> {
        if !self.directory.contains(&entity) || self.directory.is_revoked(&entity) {
            return Ok(None);
        }
        if !self.consensus.lock().await.is_validator() {
            debug!(node = %self.id(), entity = %entity, "Flagged entity left to validators");
            return Ok(None);
        }
        if !self.pending_revocations.lock().insert(entity) {
            return Ok(None);
        }
        match self.propose(StateTransition::Revoke { entity }, now).await {
            Ok(proposed) => {
                info!(node = %self.id(), entity = %entity, proposal = %proposed.0, "Revocation of flagged entity proposed");
                Ok(Some(proposed))
            }
            Err(e) => {
                self.pending_revocations.lock().remove(&entity);
                Err(e)
            }
        }
    }

    /// Drive the node until `shutdown` turns true or the inbox closes.
    pub async fn run(&self, mut inbox: mpsc::Receiver<Vec<u8>>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(self.config.node.tick_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(node = %self.id(), "Federation node running");

        loop {
            tokio::select! {
                frame = inbox.recv() => match frame {
                    Some(frame) => {
                        self.handle_frame(&frame, Utc::now()).await;
                    }
                    None => {
                        info!(node = %self.id(), "Inbox closed");
                        break;
                    }
                },
                _ = interval.tick() => {
                    self.tick(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(node = %self.id(), "Federation node stopped");
    }

    // ===== Helpers =====

    fn require_active(&self, entity: &EntityId) -> Result<()> {
        if !self.directory.contains(entity) {
            return Err(IdentityError::NotFound(*entity).into());
        }
        if self.directory.is_revoked(entity) {
            return Err(IdentityError::Revoked(*entity).into());
        }
        Ok(())
    }

    fn emit(&self, event: FederationEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Id of the proposal a `propose` or `resubmit` call raised.
fn raised_proposal(actions: &[ConsensusAction]) -> Result<ProposalId> {
    actions
        .iter()
        .find_map(|a| match a {
            ConsensusAction::StateChanged { proposal, .. } => Some(*proposal),
            _ => None,
        })
        .ok_or_else(|| CoreError::Internal("proposal raised without a state change".into()))
}
