//! Challenge-response auditing.
//!
//! ## State machine
//!
//! ```text
//! Raised ──notify──► AwaitingResponse ──rebuttal──► Resolved{Upheld|Overturned}
//!    │                      │
//!    └──────── deadline ────┴──────────────────────► Evaded
//! ```
//!
//! Resolved and Evaded are terminal. Each evasion records a strike and
//! slashes the challenged entity's stake by the percentage for that strike
//! number. Reaching `max_strikes` flags the entity permanently; the
//! reputation engine rejects every later event for a flagged subject.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use fidelis_crypto::{Hash256, Signature};
use fidelis_identity::{EntityId, EntityKeyPair, KeyDirectory};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::stake::{SlashReason, StakeLedger, BPS_DENOMINATOR};
use crate::{ReputationError, Result};

/// Domain separator for challenge ids.
const CHALLENGE_ID_DOMAIN: &[u8] = b"FIDELIS-CHALLENGE-ID-v1";

/// Domain separator for rebuttal signatures.
const REBUTTAL_DOMAIN: &[u8] = b"FIDELIS-REBUTTAL-v1";

/// Default response window (24 hours).
pub const DEFAULT_RESPONSE_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Default cooldown before the same entity can be challenged again (7 days).
pub const DEFAULT_RECHALLENGE_COOLDOWN_SECS: i64 = 7 * 24 * 60 * 60;

/// Maximum simultaneously open challenges.
pub const MAX_OPEN_CHALLENGES: usize = 10_000;

/// Default number of closed challenges kept for lookup.
pub const DEFAULT_CLOSED_HISTORY: usize = 1_024;

/// Identifier of a challenge.
pub type ChallengeId = Hash256;

/// Challenge policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengePolicy {
    /// Time the challenged entity has to respond, in seconds.
    pub response_window_secs: i64,
    /// Minimum time between challenges against one entity, in seconds.
    pub rechallenge_cooldown_secs: i64,
    /// Penalty per strike in basis points; the last entry repeats.
    pub strike_penalties_bps: Vec<u64>,
    /// Strikes that flag an entity permanently.
    pub max_strikes: u32,
    /// Closed challenges kept for lookup; the oldest are dropped first.
    pub closed_history: usize,
}

impl Default for ChallengePolicy {
    fn default() -> Self {
        Self {
            response_window_secs: DEFAULT_RESPONSE_WINDOW_SECS,
            rechallenge_cooldown_secs: DEFAULT_RECHALLENGE_COOLDOWN_SECS,
            strike_penalties_bps: vec![500, 1_500, 3_000, 5_000],
            max_strikes: 4,
            closed_history: DEFAULT_CLOSED_HISTORY,
        }
    }
}

impl ChallengePolicy {
    /// Penalty for the `strike`-th evasion (1-based), in basis points.
    #[must_use]
    pub fn penalty_bps(&self, strike: u32) -> u64 {
        if self.strike_penalties_bps.is_empty() || strike == 0 {
            return 0;
        }
        let idx = (strike as usize - 1).min(self.strike_penalties_bps.len() - 1);
        self.strike_penalties_bps[idx]
    }

    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` for a non-positive window, negative cooldown,
    /// penalties above 100% or a zero strike limit.
    pub fn validate(&self) -> Result<()> {
        if self.response_window_secs <= 0 {
            return Err(ReputationError::InvalidValue {
                field: "challenge.response_window_secs",
                reason: "must be positive".into(),
            });
        }
        if self.rechallenge_cooldown_secs < 0 {
            return Err(ReputationError::InvalidValue {
                field: "challenge.rechallenge_cooldown_secs",
                reason: "must not be negative".into(),
            });
        }
        if self.strike_penalties_bps.iter().any(|b| *b > BPS_DENOMINATOR) {
            return Err(ReputationError::InvalidValue {
                field: "challenge.strike_penalties_bps",
                reason: "penalties cannot exceed 10000 bps".into(),
            });
        }
        if self.max_strikes == 0 {
            return Err(ReputationError::InvalidValue {
                field: "challenge.max_strikes",
                reason: "must be at least 1".into(),
            });
        }
        if self.closed_history == 0 {
            return Err(ReputationError::InvalidValue {
                field: "challenge.closed_history",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// What is being challenged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeTarget {
    /// A witnessed event, answered by its subject.
    Event {
        /// Event subject.
        subject: EntityId,
        /// Event sequence.
        sequence: u64,
        /// Event hash.
        event_hash: Hash256,
    },
    /// An attestation, answered by its witness.
    Attestation {
        /// Attesting witness.
        witness: EntityId,
        /// Attested event hash.
        event_hash: Hash256,
    },
}

impl ChallengeTarget {
    /// The entity that must respond.
    #[must_use]
    pub fn challenged(&self) -> EntityId {
        match self {
            Self::Event { subject, .. } => *subject,
            Self::Attestation { witness, .. } => *witness,
        }
    }

    /// Hash of the disputed event.
    #[must_use]
    pub fn event_hash(&self) -> &Hash256 {
        match self {
            Self::Event { event_hash, .. } | Self::Attestation { event_hash, .. } => event_hash,
        }
    }
}

/// Adjudication of a rebuttal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// The challenged claim stands.
    Upheld,
    /// The challenged claim is struck down.
    Overturned,
}

/// Challenge lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeState {
    /// Recorded, notification not yet sent.
    Raised,
    /// Notification sent; awaiting rebuttal.
    AwaitingResponse,
    /// Answered with a verified rebuttal.
    Resolved(Verdict),
    /// Not answered in time.
    Evaded,
}

impl ChallengeState {
    /// Whether the challenge still accepts a rebuttal.
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Raised | Self::AwaitingResponse)
    }
}

/// A signed answer to a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rebuttal {
    /// Hash of the evidence offered.
    pub evidence_hash: Hash256,
    /// Signature by the challenged entity.
    pub signature: Signature,
}

impl Rebuttal {
    /// Sign a rebuttal for `challenge`.
    #[must_use]
    pub fn sign(responder: &EntityKeyPair, challenge: &ChallengeId, evidence_hash: Hash256) -> Self {
        Self {
            evidence_hash,
            signature: responder.sign(&Self::signing_payload(challenge, &evidence_hash)),
        }
    }

    /// Bytes the responder signs.
    #[must_use]
    pub fn signing_payload(challenge: &ChallengeId, evidence_hash: &Hash256) -> Vec<u8> {
        let mut payload = Vec::with_capacity(REBUTTAL_DOMAIN.len() + 64);
        payload.extend_from_slice(REBUTTAL_DOMAIN);
        payload.extend_from_slice(challenge.as_bytes());
        payload.extend_from_slice(evidence_hash.as_bytes());
        payload
    }
}

/// One challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Challenge id.
    pub id: ChallengeId,
    /// Who raised it.
    pub challenger: EntityId,
    /// Disputed claim.
    pub target: ChallengeTarget,
    /// When it was raised.
    pub raised_at: DateTime<Utc>,
    /// Response deadline.
    pub deadline: DateTime<Utc>,
    /// Current state.
    pub state: ChallengeState,
    /// Accepted rebuttal, if any.
    pub rebuttal: Option<Rebuttal>,
}

impl Challenge {
    /// The entity that must respond.
    #[must_use]
    pub fn challenged(&self) -> EntityId {
        self.target.challenged()
    }
}

/// Penalty applied for one evasion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvasionPenalty {
    /// Evaded challenge.
    pub challenge: ChallengeId,
    /// Penalized entity.
    pub entity: EntityId,
    /// Strike number after this evasion.
    pub strike: u32,
    /// Penalty in basis points, for both stake and trust.
    pub penalty_bps: u64,
    /// Stake actually removed.
    pub stake_slashed: u64,
    /// Whether this evasion flagged the entity permanently.
    pub permanently_flagged: bool,
}

impl EvasionPenalty {
    /// Trust penalty as a fraction in `[0, 1]`.
    #[must_use]
    pub fn trust_fraction(&self) -> f64 {
        self.penalty_bps as f64 / BPS_DENOMINATOR as f64
    }
}

/// Aggregate auditor statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChallengeStats {
    /// Challenges ever raised.
    pub raised: u64,
    /// Challenges answered.
    pub resolved: u64,
    /// Challenges evaded.
    pub evaded: u64,
    /// Currently open.
    pub open: u64,
    /// Permanently flagged entities.
    pub flagged: u64,
}

impl ChallengeStats {
    /// Share of closed challenges that were answered.
    #[must_use]
    pub fn response_rate(&self) -> f64 {
        let closed = self.resolved + self.evaded;
        if closed == 0 {
            0.0
        } else {
            self.resolved as f64 / closed as f64
        }
    }

    /// Share of closed challenges that were evaded.
    #[must_use]
    pub fn evasion_rate(&self) -> f64 {
        let closed = self.resolved + self.evaded;
        if closed == 0 {
            0.0
        } else {
            self.evaded as f64 / closed as f64
        }
    }
}

#[derive(Debug, Default)]
struct AuditorState {
    open: HashMap<ChallengeId, Challenge>,
    closed: HashMap<ChallengeId, Challenge>,
    closed_order: VecDeque<ChallengeId>,
    strikes: HashMap<EntityId, u32>,
    flagged: HashSet<EntityId>,
    last_challenged: HashMap<EntityId, DateTime<Utc>>,
    stats: ChallengeStats,
}

impl AuditorState {
    /// Move a challenge out of the open set, dropping the oldest closed
    /// ones beyond `limit`.
    fn close(&mut self, id: &ChallengeId, limit: usize) -> Option<&mut Challenge> {
        let challenge = self.open.remove(id)?;
        self.closed.insert(*id, challenge);
        self.closed_order.push_back(*id);
        while self.closed_order.len() > limit {
            if let Some(oldest) = self.closed_order.pop_front() {
                self.closed.remove(&oldest);
            }
        }
        self.closed.get_mut(id)
    }

    fn lookup(&self, id: &ChallengeId) -> Option<&Challenge> {
        self.open.get(id).or_else(|| self.closed.get(id))
    }
}

/// Tracks challenges, strikes and permanent flags.
#[derive(Debug)]
pub struct ChallengeAuditor {
    policy: ChallengePolicy,
    state: Mutex<AuditorState>,
}

impl ChallengeAuditor {
    /// Create an auditor.
    #[must_use]
    pub fn new(policy: ChallengePolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(AuditorState::default()),
        }
    }

    /// The challenge policy.
    #[must_use]
    pub fn policy(&self) -> &ChallengePolicy {
        &self.policy
    }

    /// Raise a challenge.
    ///
    /// # Errors
    ///
    /// Returns `ChallengeRejected` for self-challenges, challenges against
    /// flagged entities, challenges inside the cooldown, or when too many
    /// challenges are open.
    pub fn raise(&self, challenger: EntityId, target: ChallengeTarget, now: DateTime<Utc>) -> Result<Challenge> {
        let challenged = target.challenged();
        if challenger == challenged {
            return Err(ReputationError::ChallengeRejected("cannot challenge oneself".into()));
        }

        let mut state = self.state.lock();
        if state.flagged.contains(&challenged) {
            return Err(ReputationError::ChallengeRejected(format!(
                "{} is already permanently flagged",
                challenged
            )));
        }
        if let Some(last) = state.last_challenged.get(&challenged) {
            let ready_at = *last + Duration::seconds(self.policy.rechallenge_cooldown_secs);
            if now < ready_at {
                return Err(ReputationError::ChallengeRejected(format!(
                    "{} cannot be challenged again before {}",
                    challenged, ready_at
                )));
            }
        }
        if state.open.len() >= MAX_OPEN_CHALLENGES {
            return Err(ReputationError::ChallengeRejected("too many open challenges".into()));
        }

        let id = Hash256::hash_many(&[
            CHALLENGE_ID_DOMAIN,
            challenger.as_bytes(),
            challenged.as_bytes(),
            target.event_hash().as_bytes(),
            &now.timestamp_millis().to_be_bytes(),
        ]);
        let challenge = Challenge {
            id,
            challenger,
            target,
            raised_at: now,
            deadline: now + Duration::seconds(self.policy.response_window_secs),
            state: ChallengeState::Raised,
            rebuttal: None,
        };
        state.open.insert(id, challenge.clone());
        state.last_challenged.insert(challenged, now);
        state.stats.raised += 1;
        state.stats.open += 1;
        info!(challenge = %id, challenger = %challenger, challenged = %challenged, deadline = %challenge.deadline, "Challenge raised");
        Ok(challenge)
    }

    /// Record that the challenged entity was notified.
    ///
    /// # Errors
    ///
    /// Returns `ChallengeNotFound` or `ChallengeClosed`.
    pub fn mark_notified(&self, id: &ChallengeId) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed.contains_key(id) {
            return Err(ReputationError::ChallengeClosed(*id));
        }
        let challenge = state
            .open
            .get_mut(id)
            .ok_or(ReputationError::ChallengeNotFound(*id))?;
        match challenge.state {
            ChallengeState::Raised => {
                challenge.state = ChallengeState::AwaitingResponse;
                Ok(())
            }
            ChallengeState::AwaitingResponse => Ok(()),
            _ => Err(ReputationError::ChallengeClosed(*id)),
        }
    }

    /// Accept a rebuttal and close the challenge with `verdict`.
    ///
    /// # Errors
    ///
    /// - `ChallengeNotFound` / `ChallengeClosed`
    /// - `ResponseWindowClosed` at or after the deadline
    /// - `InvalidSignature` if the challenged entity did not sign it
    pub fn respond(
        &self,
        id: &ChallengeId,
        rebuttal: Rebuttal,
        verdict: Verdict,
        keys: &dyn KeyDirectory,
        now: DateTime<Utc>,
    ) -> Result<ChallengeState> {
        let mut state = self.state.lock();
        if state.closed.contains_key(id) {
            return Err(ReputationError::ChallengeClosed(*id));
        }
        let challenge = state.open.get(id).ok_or(ReputationError::ChallengeNotFound(*id))?;
        if now >= challenge.deadline {
            return Err(ReputationError::ResponseWindowClosed {
                id: *id,
                deadline: challenge.deadline,
            });
        }
        keys.verify(
            &challenge.challenged(),
            &Rebuttal::signing_payload(id, &rebuttal.evidence_hash),
            &rebuttal.signature,
        )
        .map_err(|e| ReputationError::InvalidSignature(format!("rebuttal: {}", e)))?;

        let resolved = ChallengeState::Resolved(verdict);
        if let Some(challenge) = state.close(id, self.policy.closed_history) {
            challenge.state = resolved;
            challenge.rebuttal = Some(rebuttal);
        }
        state.stats.resolved += 1;
        state.stats.open = state.stats.open.saturating_sub(1);
        debug!(challenge = %id, ?verdict, "Challenge resolved");
        Ok(resolved)
    }

    /// Close every open challenge past its deadline as `Evaded`, recording
    /// strikes and slashing stakes.
    pub fn expire(&self, stakes: &StakeLedger, now: DateTime<Utc>) -> Vec<EvasionPenalty> {
        let mut state = self.state.lock();
        let cooldown = Duration::seconds(self.policy.rechallenge_cooldown_secs);
        state.last_challenged.retain(|_, last| now < *last + cooldown);

        let mut expired: Vec<(ChallengeId, EntityId, DateTime<Utc>)> = state
            .open
            .values()
            .filter(|c| now >= c.deadline)
            .map(|c| (c.id, c.challenged(), c.deadline))
            .collect();
        expired.sort_by_key(|(id, _, deadline)| (*deadline, *id));

        let mut penalties = Vec::with_capacity(expired.len());
        for (id, entity, _) in expired {
            if let Some(c) = state.close(&id, self.policy.closed_history) {
                c.state = ChallengeState::Evaded;
            }
            state.stats.evaded += 1;
            state.stats.open = state.stats.open.saturating_sub(1);

            let strike = {
                let s = state.strikes.entry(entity).or_insert(0);
                *s = s.saturating_add(1);
                *s
            };
            let penalty_bps = self.policy.penalty_bps(strike);
            let stake_slashed = match stakes.slash_bps(&entity, penalty_bps, SlashReason::ChallengeEvasion { strike }, now) {
                Ok(event) => event.amount,
                Err(e) => {
                    debug!(entity = %entity, error = %e, "No stake to slash for evasion");
                    0
                }
            };
            let permanently_flagged = strike >= self.policy.max_strikes && state.flagged.insert(entity);
            if permanently_flagged {
                state.stats.flagged += 1;
                warn!(entity = %entity, strikes = strike, "Entity permanently flagged");
            } else {
                info!(entity = %entity, strike, penalty_bps, stake_slashed, "Challenge evaded");
            }
            penalties.push(EvasionPenalty {
                challenge: id,
                entity,
                strike,
                penalty_bps,
                stake_slashed,
                permanently_flagged,
            });
        }
        penalties
    }

    /// Snapshot of an open or recently closed challenge.
    #[must_use]
    pub fn get(&self, id: &ChallengeId) -> Option<Challenge> {
        self.state.lock().lookup(id).cloned()
    }

    /// Number of open challenges.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state.lock().open.len()
    }

    /// Number of closed challenges still retained.
    #[must_use]
    pub fn closed_count(&self) -> usize {
        self.state.lock().closed.len()
    }

    /// Strikes recorded against an entity.
    #[must_use]
    pub fn strikes(&self, entity: &EntityId) -> u32 {
        self.state.lock().strikes.get(entity).copied().unwrap_or(0)
    }

    /// Whether an entity is permanently flagged.
    #[must_use]
    pub fn is_flagged(&self, entity: &EntityId) -> bool {
        self.state.lock().flagged.contains(entity)
    }

    /// Whether an entity may be challenged at `now`.
    #[must_use]
    pub fn can_challenge(&self, entity: &EntityId, now: DateTime<Utc>) -> bool {
        let state = self.state.lock();
        if state.flagged.contains(entity) {
            return false;
        }
        state
            .last_challenged
            .get(entity)
            .map_or(true, |last| now >= *last + Duration::seconds(self.policy.rechallenge_cooldown_secs))
    }

    /// Aggregate statistics.
    #[must_use]
    pub fn stats(&self) -> ChallengeStats {
        self.state.lock().stats
    }
}
