//! The reputation engine.
//!
//! Owns every [`TrustTensor`] and is the only component that mutates them.
//! Submissions are fully validated before any state changes; a rejected
//! event leaves tensors, sequences and detector state untouched.
//!
//! ## Delta computation
//!
//! ```text
//! delta[d] = impact[outcome][d]
//!          × witness_boost                    (any independent attestation)
//!          × consistency_bonus   (gains only, low outcome variance)
//!          × novelty             (success only, unseen action in lookback)
//!          × 1 / (1 + agg × k)   (gains only)
//!          × suspect_multiplier  (pattern detector flagged the subject)
//! ```
//!
//! Gains are then scaled down so the aggregate stays below the subject's
//! source-diversity ceiling (see [`crate::diversity`]). A subject already
//! above its ceiling keeps what it has but cannot climb further.
//!
//! Tensors decay lazily toward the floor on every read and before every
//! update; decay is a pure function of `last_updated` and `now`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use fidelis_identity::{EntityId, KeyDirectory};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{AuditLog, AuditOutcome};
use crate::challenge::ChallengeAuditor;
use crate::collusion::{MutualWitnessDetector, PatternDetector, PatternVerdict};
use crate::decay::{decayed, DecayConfig};
use crate::diversity::{cap_gains, SourceDiversity, SourceDiversityPolicy, SourceProfile};
use crate::event::{Attestation, Outcome, WitnessedEvent};
use crate::stake::StakeLedger;
use crate::tensor::{limits::DIMENSIONS, ContextId, DeltaFactors, DimensionWeights, TrustDelta, TrustTensor};
use crate::witness::{WitnessPolicy, WitnessValidator};
use crate::{ReputationError, Result};

/// Per-subject history entries retained for gaming reports.
pub const MAX_HISTORY: usize = 512;

/// Distinct action descriptors remembered per subject for novelty.
pub const MAX_TRACKED_ACTIONS: usize = 1_024;

/// Consecutive unwitnessed successes that count as a streak.
pub const GAMING_STREAK_LENGTH: usize = 5;

/// Aggregate growth within a day that counts as rapid.
pub const GAMING_RAPID_GROWTH: f64 = 0.1;

/// Share of self-reported events that counts as excessive.
pub const GAMING_SELF_REPORTED_RATIO: f64 = 0.5;

/// Samples needed before the self-reported ratio is judged.
pub const GAMING_MIN_SAMPLES: usize = 10;

/// Base per-dimension impact of each outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactTable {
    /// Impact of a success.
    pub success: [f64; DIMENSIONS],
    /// Impact of a failure.
    pub failure: [f64; DIMENSIONS],
    /// Impact of a disputed outcome.
    pub disputed: [f64; DIMENSIONS],
}

impl Default for ImpactTable {
    fn default() -> Self {
        Self {
            success: [0.01, 0.005, 0.005, 0.01, 0.005, 0.005],
            failure: [-0.02, -0.005, 0.0, -0.02, 0.0, -0.01],
            disputed: [0.0, -0.01, -0.005, -0.01, -0.01, -0.01],
        }
    }
}

impl ImpactTable {
    /// Impact vector for `outcome`.
    #[must_use]
    pub fn for_outcome(&self, outcome: Outcome) -> &[f64; DIMENSIONS] {
        match outcome {
            Outcome::Success => &self.success,
            Outcome::Failure => &self.failure,
            Outcome::Disputed => &self.disputed,
        }
    }

    fn validate(&self) -> Result<()> {
        let all = self.success.iter().chain(&self.failure).chain(&self.disputed);
        for v in all {
            if !v.is_finite() || v.abs() > 1.0 {
                return Err(ReputationError::InvalidValue {
                    field: "engine.impacts",
                    reason: "impacts must be finite and within [-1, 1]".into(),
                });
            }
        }
        Ok(())
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base impacts per outcome.
    pub impacts: ImpactTable,
    /// Aggregation weights.
    pub weights: DimensionWeights,
    /// Lazy decay.
    pub decay: DecayConfig,
    /// Starting value of every dimension.
    pub initial_trust: f64,
    /// Multiplier when an independent witness attested.
    pub witness_boost: f64,
    /// Multiplier for consistent performers.
    pub consistency_bonus: f64,
    /// Outcomes considered for consistency.
    pub consistency_window: usize,
    /// Variance below which outcomes are consistent.
    pub consistency_variance_threshold: f64,
    /// Outcomes needed before the bonus can apply.
    pub consistency_min_samples: usize,
    /// Multiplier for a success with a new action.
    pub novelty_multiplier: f64,
    /// How far back an action counts as seen, in seconds.
    pub novelty_lookback_secs: i64,
    /// Diminishing-returns steepness.
    pub diminishing_k: f64,
    /// Multiplier for suspect deltas.
    pub suspect_multiplier: f64,
    /// Suspect multiplier at full anti-gaming tightening.
    pub tightened_suspect_multiplier: f64,
    /// Pattern detection window, in seconds.
    pub pattern_window_secs: i64,
    /// Window scale at full anti-gaming tightening.
    pub tightened_window_scale: f64,
    /// Tolerated future skew of event timestamps, in seconds.
    pub max_clock_skew_secs: i64,
    /// Contexts tracked per entity.
    pub max_contexts_per_entity: usize,
    /// Source-diversity ceiling on gains.
    pub diversity: SourceDiversityPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            impacts: ImpactTable::default(),
            weights: DimensionWeights::default(),
            decay: DecayConfig::default(),
            initial_trust: 0.5,
            witness_boost: 1.2,
            consistency_bonus: 1.1,
            consistency_window: 10,
            consistency_variance_threshold: 0.05,
            consistency_min_samples: 5,
            novelty_multiplier: 1.5,
            novelty_lookback_secs: 30 * 24 * 60 * 60,
            diminishing_k: 1.0,
            suspect_multiplier: 0.5,
            tightened_suspect_multiplier: 0.25,
            pattern_window_secs: 7 * 24 * 60 * 60,
            tightened_window_scale: 2.0,
            max_clock_skew_secs: 300,
            max_contexts_per_entity: 64,
            diversity: SourceDiversityPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.impacts.validate()?;
        self.decay.validate()?;
        self.diversity.validate()?;
        let unit = |field: &'static str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ReputationError::InvalidValue { field, reason: "must be within [0, 1]".into() })
            }
        };
        let at_least_one = |field: &'static str, v: f64| {
            if v.is_finite() && v >= 1.0 {
                Ok(())
            } else {
                Err(ReputationError::InvalidValue { field, reason: "must be at least 1".into() })
            }
        };
        unit("engine.initial_trust", self.initial_trust)?;
        unit("engine.suspect_multiplier", self.suspect_multiplier)?;
        unit("engine.tightened_suspect_multiplier", self.tightened_suspect_multiplier)?;
        unit("engine.consistency_variance_threshold", self.consistency_variance_threshold)?;
        at_least_one("engine.witness_boost", self.witness_boost)?;
        at_least_one("engine.consistency_bonus", self.consistency_bonus)?;
        at_least_one("engine.novelty_multiplier", self.novelty_multiplier)?;
        at_least_one("engine.tightened_window_scale", self.tightened_window_scale)?;
        if !self.diminishing_k.is_finite() || self.diminishing_k < 0.0 {
            return Err(ReputationError::InvalidValue {
                field: "engine.diminishing_k",
                reason: "must be finite and non-negative".into(),
            });
        }
        if self.consistency_window == 0 || self.consistency_min_samples > self.consistency_window {
            return Err(ReputationError::InvalidValue {
                field: "engine.consistency_window",
                reason: "must be positive and hold consistency_min_samples".into(),
            });
        }
        if self.pattern_window_secs <= 0 || self.novelty_lookback_secs < 0 || self.max_clock_skew_secs < 0 {
            return Err(ReputationError::InvalidValue {
                field: "engine.windows",
                reason: "pattern window must be positive, lookback and skew non-negative".into(),
            });
        }
        if self.max_contexts_per_entity == 0 {
            return Err(ReputationError::InvalidValue {
                field: "engine.max_contexts_per_entity",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// A non-blocking report of gaming heuristics for one (entity, context).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamingSignal {
    /// Entity examined.
    pub subject: EntityId,
    /// Context examined.
    pub context: ContextId,
    /// Combined score in `[0, 1]`.
    pub score: f64,
    /// Heuristics that fired.
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    context: ContextId,
    at: DateTime<Utc>,
    outcome: Outcome,
    witnessed: bool,
    aggregate_before: f64,
    aggregate_after: f64,
}

#[derive(Debug, Default)]
struct SubjectState {
    last_sequence: Option<u64>,
    tensors: HashMap<ContextId, TrustTensor>,
    outcomes: VecDeque<f64>,
    actions: HashMap<String, DateTime<Utc>>,
    history: VecDeque<HistoryEntry>,
    sources: SourceProfile,
}

#[derive(Debug, Clone, Copy)]
struct Tightening {
    until: DateTime<Utc>,
    severity: f64,
}

/// Applies witnessed events to trust tensors.
pub struct ReputationEngine {
    config: EngineConfig,
    witness_policy: WitnessPolicy,
    keys: Arc<dyn KeyDirectory>,
    stakes: Arc<StakeLedger>,
    auditor: Arc<ChallengeAuditor>,
    audit: Arc<AuditLog>,
    detector: Mutex<Box<dyn PatternDetector>>,
    subjects: DashMap<EntityId, Arc<Mutex<SubjectState>>>,
    tightening: RwLock<Option<Tightening>>,
}

impl ReputationEngine {
    /// Create an engine with the default [`MutualWitnessDetector`].
    #[must_use]
    pub fn new(
        config: EngineConfig,
        witness_policy: WitnessPolicy,
        keys: Arc<dyn KeyDirectory>,
        stakes: Arc<StakeLedger>,
        auditor: Arc<ChallengeAuditor>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            config,
            witness_policy,
            keys,
            stakes,
            auditor,
            audit,
            detector: Mutex::new(Box::new(MutualWitnessDetector::new())),
            subjects: DashMap::new(),
            tightening: RwLock::new(None),
        }
    }

    /// Replace the pattern detector.
    #[must_use]
    pub fn with_detector(mut self, detector: Box<dyn PatternDetector>) -> Self {
        self.detector = Mutex::new(detector);
        self
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The witness policy.
    #[must_use]
    pub fn witness_policy(&self) -> &WitnessPolicy {
        &self.witness_policy
    }

    /// The audit log.
    #[must_use]
    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Validate and apply a witnessed event.
    ///
    /// Every call is recorded in the audit log.
    ///
    /// # Errors
    ///
    /// `UnknownEntity`, `EntityRevoked`, `EntityFlagged`, `MalformedEvent`,
    /// `InvalidSignature`, `ReplayedSequence`,
    /// `InsufficientWitnessDiversity` or `InsufficientStake`. No state
    /// changes on error.
    pub fn submit_event(
        &self,
        event: &WitnessedEvent,
        attestations: &[Attestation],
        now: DateTime<Utc>,
    ) -> Result<TrustDelta> {
        match self.try_submit(event, attestations, now) {
            Ok(delta) => {
                self.audit.record(
                    delta.subject,
                    delta.context.clone(),
                    delta.sequence,
                    AuditOutcome::Accepted {
                        aggregate_before: delta.aggregate_before,
                        aggregate_after: delta.aggregate_after,
                        suspect: delta.suspect,
                    },
                    now,
                );
                if delta.suspect {
                    warn!(
                        subject = %delta.subject,
                        sequence = delta.sequence,
                        reason = delta.suspect_reason.as_deref().unwrap_or(""),
                        "Suspect delta applied"
                    );
                } else {
                    debug!(
                        subject = %delta.subject,
                        context = %delta.context,
                        sequence = delta.sequence,
                        net = delta.net_change(),
                        "Event accepted"
                    );
                }
                Ok(delta)
            }
            Err(e) => {
                self.audit.record(
                    event.subject(),
                    event.context().clone(),
                    event.sequence(),
                    AuditOutcome::Rejected {
                        reason: e.reason_code(),
                        detail: e.to_string(),
                    },
                    now,
                );
                debug!(subject = %event.subject(), sequence = event.sequence(), error = %e, "Event rejected");
                Err(e)
            }
        }
    }

    fn try_submit(
        &self,
        event: &WitnessedEvent,
        attestations: &[Attestation],
        now: DateTime<Utc>,
    ) -> Result<TrustDelta> {
        let subject = event.subject();
        if !self.keys.contains(&subject) {
            return Err(ReputationError::UnknownEntity(subject));
        }
        if self.keys.is_revoked(&subject) {
            return Err(ReputationError::EntityRevoked(subject));
        }
        if self.auditor.is_flagged(&subject) {
            return Err(ReputationError::EntityFlagged(subject));
        }
        if event.timestamp() > now + Duration::seconds(self.config.max_clock_skew_secs) {
            return Err(ReputationError::MalformedEvent(format!(
                "timestamp {} is in the future",
                event.timestamp()
            )));
        }

        let event_hash = event.verify(self.keys.as_ref())?;
        for attestation in attestations {
            attestation.verify(self.keys.as_ref(), &event_hash)?;
        }

        let slot = self.subject_slot(subject);
        let mut state = slot.lock();

        if let Some(last) = state.last_sequence {
            if event.sequence() <= last {
                return Err(ReputationError::ReplayedSequence {
                    subject,
                    last,
                    got: event.sequence(),
                });
            }
        }

        WitnessValidator::new(&self.witness_policy, self.keys.as_ref(), &self.stakes)
            .validate_attestations(event, attestations)?;

        let context = event.context();
        if !state.tensors.contains_key(context) && state.tensors.len() >= self.config.max_contexts_per_entity {
            return Err(ReputationError::MalformedEvent(format!(
                "subject already tracked in {} contexts",
                self.config.max_contexts_per_entity
            )));
        }

        // Validation complete; mutation starts here.

        let mut witnesses: Vec<EntityId> = attestations.iter().map(Attestation::witness).collect();
        witnesses.sort();
        witnesses.dedup();

        let (suspect_multiplier, window) = self.anti_gaming_params(now);
        let verdict = {
            let since = now - window;
            let mut detector = self.detector.lock();
            detector.prune(since);
            detector.observe(&subject, &witnesses, now);
            detector.assess(&subject, &witnesses, since)
        };

        let mut tensor = state
            .tensors
            .get(context)
            .map(|t| decayed(t, &self.config.decay, now))
            .unwrap_or_else(|| TrustTensor::new(self.config.initial_trust, now));
        let aggregate_before = tensor.aggregate(&self.config.weights);

        let outcome = event.outcome();
        state.outcomes.push_back(outcome.score());
        while state.outcomes.len() > self.config.consistency_window {
            state.outcomes.pop_front();
        }

        let action = event.action().as_str();
        let novel = match state.actions.get(action) {
            Some(seen) => *seen < now - Duration::seconds(self.config.novelty_lookback_secs),
            None => true,
        };

        let mut factors = DeltaFactors {
            witness: if witnesses.iter().any(|w| *w != subject) {
                self.config.witness_boost
            } else {
                1.0
            },
            consistency: if self.is_consistent(&state.outcomes) {
                self.config.consistency_bonus
            } else {
                1.0
            },
            novelty: if novel && outcome == Outcome::Success {
                self.config.novelty_multiplier
            } else {
                1.0
            },
            diminishing: 1.0 / (1.0 + aggregate_before * self.config.diminishing_k),
            suspect: if verdict.suspect { suspect_multiplier } else { 1.0 },
            diversity_cap: 1.0,
        };

        let diversity = self.credit_sources(&mut state.sources, &subject, &witnesses, now);
        let mut raw = compute_delta(self.config.impacts.for_outcome(outcome), &factors);
        factors.diversity_cap = cap_gains(&mut raw, self.config.weights.as_array(), aggregate_before, diversity.ceiling);
        if factors.diversity_cap < 1.0 {
            debug!(
                subject = %subject,
                ceiling = diversity.ceiling,
                sources = diversity.source_count,
                dominant_share = diversity.dominant_share,
                "Gain capped by source diversity"
            );
        }
        let applied = tensor.apply(&raw, now);
        let aggregate_after = tensor.aggregate(&self.config.weights);

        state.last_sequence = Some(event.sequence());
        state.tensors.insert(context.clone(), tensor);
        record_action(&mut state.actions, action, now, self.config.novelty_lookback_secs);
        state.history.push_back(HistoryEntry {
            context: context.clone(),
            at: now,
            outcome,
            witnessed: !witnesses.is_empty(),
            aggregate_before,
            aggregate_after,
        });
        while state.history.len() > MAX_HISTORY {
            state.history.pop_front();
        }

        let PatternVerdict { suspect, reason, .. } = verdict;
        Ok(TrustDelta {
            subject,
            context: context.clone(),
            sequence: event.sequence(),
            applied,
            factors,
            suspect,
            suspect_reason: reason,
            aggregate_before,
            aggregate_after,
            accepted_at: now,
        })
    }

    fn subject_slot(&self, subject: EntityId) -> Arc<Mutex<SubjectState>> {
        self.subjects
            .entry(subject)
            .or_insert_with(|| Arc::new(Mutex::new(SubjectState::default())))
            .clone()
    }

    /// Credit this event's sources and return the resulting profile.
    ///
    /// Independent witnesses share one unit of weight; an event with none
    /// credits the subject.
    fn credit_sources(
        &self,
        profile: &mut SourceProfile,
        subject: &EntityId,
        witnesses: &[EntityId],
        now: DateTime<Utc>,
    ) -> SourceDiversity {
        let policy = &self.config.diversity;
        profile.prune(now - policy.window());
        let independent: Vec<&EntityId> = witnesses.iter().filter(|w| *w != subject).collect();
        if independent.is_empty() {
            profile.record(*subject, self.keys.society_of(subject), 1.0, now, policy);
        } else {
            let weight = 1.0 / independent.len() as f64;
            for witness in independent {
                profile.record(*witness, self.keys.society_of(witness), weight, now, policy);
            }
        }
        profile.snapshot(policy)
    }

    fn is_consistent(&self, outcomes: &VecDeque<f64>) -> bool {
        if outcomes.len() < self.config.consistency_min_samples {
            return false;
        }
        let n = outcomes.len() as f64;
        let mean = outcomes.iter().sum::<f64>() / n;
        let variance = outcomes.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        variance < self.config.consistency_variance_threshold
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Decayed tensor for (entity, context) as of `now`.
    #[must_use]
    pub fn query_tensor(&self, entity: &EntityId, context: &ContextId, now: DateTime<Utc>) -> Option<TrustTensor> {
        let slot = self.subjects.get(entity)?.clone();
        let state = slot.lock();
        state.tensors.get(context).map(|t| decayed(t, &self.config.decay, now))
    }

    /// Decayed aggregate for (entity, context) as of `now`.
    #[must_use]
    pub fn aggregate_trust(&self, entity: &EntityId, context: &ContextId, now: DateTime<Utc>) -> Option<f64> {
        self.query_tensor(entity, context, now)
            .map(|t| t.aggregate(&self.config.weights))
    }

    /// Contexts with a tensor for `entity`, sorted.
    #[must_use]
    pub fn contexts_of(&self, entity: &EntityId) -> Vec<ContextId> {
        let Some(slot) = self.subjects.get(entity).map(|s| s.clone()) else {
            return Vec::new();
        };
        let mut contexts: Vec<ContextId> = slot.lock().tensors.keys().cloned().collect();
        contexts.sort();
        contexts
    }

    /// Source diversity of `entity` as of `now`, across all contexts.
    #[must_use]
    pub fn source_diversity(&self, entity: &EntityId, now: DateTime<Utc>) -> Option<SourceDiversity> {
        let slot = self.subjects.get(entity)?.clone();
        let mut profile = slot.lock().sources.clone();
        profile.prune(now - self.config.diversity.window());
        Some(profile.snapshot(&self.config.diversity))
    }

    /// Last accepted sequence for `entity`.
    #[must_use]
    pub fn last_sequence(&self, entity: &EntityId) -> Option<u64> {
        let slot = self.subjects.get(entity)?.clone();
        let last = slot.lock().last_sequence;
        last
    }

    /// Number of subjects with state.
    #[must_use]
    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }

    // ========================================================================
    // Penalties and anti-gaming
    // ========================================================================

    /// Scale every dimension of every context of `entity` by
    /// `1 - fraction`, after decaying to `now`. Returns the number of
    /// contexts touched.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if `fraction` is outside `[0, 1]`.
    pub fn apply_penalty(&self, entity: &EntityId, fraction: f64, now: DateTime<Utc>) -> Result<usize> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ReputationError::InvalidValue {
                field: "penalty.fraction",
                reason: "must be within [0, 1]".into(),
            });
        }
        let Some(slot) = self.subjects.get(entity).map(|s| s.clone()) else {
            return Ok(0);
        };
        let mut state = slot.lock();
        for tensor in state.tensors.values_mut() {
            let current = decayed(tensor, &self.config.decay, now);
            tensor.replace_values(*current.values(), now);
            tensor.scale(1.0 - fraction, now);
        }
        let touched = state.tensors.len();
        info!(entity = %entity, fraction, contexts = touched, "Trust penalty applied");
        Ok(touched)
    }

    /// Tighten pattern detection network-wide until `until`.
    ///
    /// `severity` in `[0, 1]` interpolates the suspect multiplier toward
    /// its tightened value and widens the detection window. Overlapping
    /// tightenings keep the later end and the higher severity.
    pub fn tighten_anti_gaming(&self, until: DateTime<Utc>, severity: f64) {
        let severity = if severity.is_nan() { 0.0 } else { severity.clamp(0.0, 1.0) };
        let mut current = self.tightening.write();
        let merged = match *current {
            Some(t) => Tightening {
                until: t.until.max(until),
                severity: t.severity.max(severity),
            },
            None => Tightening { until, severity },
        };
        *current = Some(merged);
        info!(until = %merged.until, severity = merged.severity, "Anti-gaming tightened");
    }

    /// Whether a tightening is in force at `now`.
    #[must_use]
    pub fn is_tightened(&self, now: DateTime<Utc>) -> bool {
        self.tightening.read().map_or(false, |t| now < t.until)
    }

    fn anti_gaming_params(&self, now: DateTime<Utc>) -> (f64, Duration) {
        let base = Duration::seconds(self.config.pattern_window_secs);
        match *self.tightening.read() {
            Some(t) if now < t.until => {
                let multiplier = self.config.suspect_multiplier
                    + (self.config.tightened_suspect_multiplier - self.config.suspect_multiplier) * t.severity;
                let scale = 1.0 + (self.config.tightened_window_scale - 1.0) * t.severity;
                let window = Duration::milliseconds((base.num_milliseconds() as f64 * scale) as i64);
                (multiplier, window)
            }
            _ => (self.config.suspect_multiplier, base),
        }
    }

    /// Gaming heuristics for (entity, context), or `None` if none fire.
    ///
    /// Looks for unwitnessed success streaks, aggregate growth above
    /// [`GAMING_RAPID_GROWTH`] within a day, and a high share of
    /// self-reported events. Never blocks submissions.
    #[must_use]
    pub fn gaming_report(&self, entity: &EntityId, context: &ContextId, now: DateTime<Utc>) -> Option<GamingSignal> {
        let slot = self.subjects.get(entity)?.clone();
        let state = slot.lock();
        let entries: Vec<&HistoryEntry> = state.history.iter().filter(|h| &h.context == context).collect();
        if entries.is_empty() {
            return None;
        }

        let mut score = 0.0;
        let mut reasons = Vec::new();

        let streak = entries
            .iter()
            .rev()
            .take_while(|h| h.outcome == Outcome::Success && !h.witnessed)
            .count();
        if streak >= GAMING_STREAK_LENGTH {
            score += 0.4;
            reasons.push(format!("{} consecutive unwitnessed successes", streak));
        }

        let day_ago = now - Duration::days(1);
        let recent: Vec<&&HistoryEntry> = entries.iter().filter(|h| h.at >= day_ago).collect();
        if let (Some(first), Some(last)) = (recent.first(), recent.last()) {
            let growth = last.aggregate_after - first.aggregate_before;
            if growth > GAMING_RAPID_GROWTH {
                score += 0.3;
                reasons.push(format!("aggregate grew {:.3} within a day", growth));
            }
        }

        if entries.len() >= GAMING_MIN_SAMPLES {
            let unwitnessed = entries.iter().filter(|h| !h.witnessed).count();
            let ratio = unwitnessed as f64 / entries.len() as f64;
            if ratio > GAMING_SELF_REPORTED_RATIO {
                score += 0.3;
                reasons.push(format!("{:.0}% of events self-reported", ratio * 100.0));
            }
        }

        if reasons.is_empty() {
            return None;
        }
        Some(GamingSignal {
            subject: *entity,
            context: context.clone(),
            score: f64::min(score, 1.0),
            reasons,
        })
    }
}

impl std::fmt::Debug for ReputationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReputationEngine")
            .field("subjects", &self.subjects.len())
            .field("witness_policy", &self.witness_policy)
            .finish_non_exhaustive()
    }
}

fn compute_delta(base: &[f64; DIMENSIONS], factors: &DeltaFactors) -> [f64; DIMENSIONS] {
    let mut out = [0.0; DIMENSIONS];
    for (o, b) in out.iter_mut().zip(base) {
        let mut d = b * factors.witness * factors.novelty * factors.suspect;
        if d > 0.0 {
            d *= factors.consistency * factors.diminishing;
        }
        *o = d;
    }
    out
}

fn record_action(actions: &mut HashMap<String, DateTime<Utc>>, action: &str, now: DateTime<Utc>, lookback_secs: i64) {
    actions.insert(action.to_string(), now);
    if actions.len() > MAX_TRACKED_ACTIONS {
        let cutoff = now - Duration::seconds(lookback_secs);
        actions.retain(|_, seen| *seen >= cutoff);
        while actions.len() > MAX_TRACKED_ACTIONS {
            let oldest = actions.iter().min_by_key(|(_, seen)| **seen).map(|(a, _)| a.clone());
            match oldest {
                Some(a) => {
                    actions.remove(&a);
                }
                None => break,
            }
        }
    }
}
