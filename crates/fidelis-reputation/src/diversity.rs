//! Source diversity of a subject's reputation.
//!
//! Every accepted event credits its sources: each independent witness
//! shares one unit of weight, and an event nobody else attested credits
//! the subject itself. High trust has to be earned from many sources
//! spread over several societies; a profile dominated by one source is
//! held below a configurable ceiling.
//!
//! ```text
//! share(s)   = weight(s) / total
//! dominant   = max share(s)
//! diversity  = -Σ share(s) log2 share(s) / log2 N     (0 when N <= 1)
//! balanced   = dominant <= max_dominant_share && diversity >= min_diversity
//! ceiling    = 1.0             balanced, >= min_sources, >= min_societies
//!            | excellent_cap   balanced
//!            | good_cap        otherwise
//! ```

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use fidelis_identity::{EntityId, SocietyId};
use serde::{Deserialize, Serialize};

use crate::{ReputationError, Result};

/// Default window over which sources are remembered (30 days).
pub const DEFAULT_SOURCE_WINDOW_SECS: i64 = 30 * 24 * 60 * 60;

/// Default number of sources tracked per subject.
pub const DEFAULT_MAX_SOURCES: usize = 256;

/// Limits on how concentrated a subject's sources may be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceDiversityPolicy {
    /// Disable to never cap gains.
    pub enabled: bool,
    /// How long a source counts after its last contribution, in seconds.
    pub window_secs: i64,
    /// Distinct sources needed for an uncapped aggregate.
    pub min_sources: usize,
    /// Distinct source societies needed for an uncapped aggregate.
    pub min_societies: usize,
    /// Largest share a single source may hold in a balanced profile.
    pub max_dominant_share: f64,
    /// Normalized entropy a balanced profile must reach.
    pub min_diversity: f64,
    /// Ceiling for a balanced profile with too few sources or societies.
    pub excellent_cap: f64,
    /// Ceiling for an unbalanced profile.
    pub good_cap: f64,
    /// Sources tracked per subject; the stalest is evicted beyond this.
    pub max_sources: usize,
}

impl Default for SourceDiversityPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: DEFAULT_SOURCE_WINDOW_SECS,
            min_sources: 5,
            min_societies: 3,
            max_dominant_share: 0.5,
            min_diversity: 0.6,
            excellent_cap: 0.85,
            good_cap: 0.7,
            max_sources: DEFAULT_MAX_SOURCES,
        }
    }
}

impl SourceDiversityPolicy {
    /// A policy that never caps.
    #[must_use]
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }

    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let unit = |field: &'static str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ReputationError::InvalidValue { field, reason: "must be within [0, 1]".into() })
            }
        };
        unit("diversity.max_dominant_share", self.max_dominant_share)?;
        unit("diversity.min_diversity", self.min_diversity)?;
        unit("diversity.excellent_cap", self.excellent_cap)?;
        unit("diversity.good_cap", self.good_cap)?;
        if self.good_cap > self.excellent_cap {
            return Err(ReputationError::InvalidValue {
                field: "diversity.good_cap",
                reason: "must not exceed excellent_cap".into(),
            });
        }
        if self.window_secs <= 0 {
            return Err(ReputationError::InvalidValue {
                field: "diversity.window_secs",
                reason: "must be positive".into(),
            });
        }
        if self.max_sources == 0 || self.min_sources > self.max_sources {
            return Err(ReputationError::InvalidValue {
                field: "diversity.max_sources",
                reason: "must be positive and hold min_sources".into(),
            });
        }
        Ok(())
    }

    /// Window as a duration.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_secs)
    }
}

/// What one source has contributed to a subject.
#[derive(Debug, Clone, PartialEq)]
struct Contribution {
    weight: f64,
    events: u32,
    society: Option<SocietyId>,
    last_seen: DateTime<Utc>,
}

/// Per-subject record of who vouched for it.
#[derive(Debug, Clone, Default)]
pub struct SourceProfile {
    sources: HashMap<EntityId, Contribution>,
}

impl SourceProfile {
    /// Create an empty profile.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit a source with `weight`.
    pub fn record(
        &mut self,
        source: EntityId,
        society: Option<SocietyId>,
        weight: f64,
        at: DateTime<Utc>,
        policy: &SourceDiversityPolicy,
    ) {
        let entry = self.sources.entry(source).or_insert_with(|| Contribution {
            weight: 0.0,
            events: 0,
            society: None,
            last_seen: at,
        });
        entry.weight += weight;
        entry.events = entry.events.saturating_add(1);
        entry.society = society.or_else(|| entry.society.take());
        entry.last_seen = entry.last_seen.max(at);

        while self.sources.len() > policy.max_sources {
            let stalest = self
                .sources
                .iter()
                .min_by_key(|(_, c)| c.last_seen)
                .map(|(id, _)| *id);
            match stalest {
                Some(id) => {
                    self.sources.remove(&id);
                }
                None => break,
            }
        }
    }

    /// Forget sources not seen since `cutoff`.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) {
        self.sources.retain(|_, c| c.last_seen >= cutoff);
    }

    /// Number of distinct sources.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Contributions recorded for one source.
    #[must_use]
    pub fn events_from(&self, source: &EntityId) -> u32 {
        self.sources.get(source).map_or(0, |c| c.events)
    }

    /// Summary of the profile under `policy`.
    #[must_use]
    pub fn snapshot(&self, policy: &SourceDiversityPolicy) -> SourceDiversity {
        let total: f64 = self.sources.values().map(|c| c.weight).sum();
        let societies: HashSet<&SocietyId> = self.sources.values().filter_map(|c| c.society.as_ref()).collect();

        let (dominant_share, diversity_score) = if total > 0.0 {
            let shares: Vec<f64> = self.sources.values().map(|c| c.weight / total).collect();
            let dominant = shares.iter().copied().fold(0.0, f64::max);
            let entropy: f64 = shares.iter().filter(|p| **p > 0.0).map(|p| -p * p.log2()).sum();
            let n = shares.len();
            let score = if n > 1 { entropy / (n as f64).log2() } else { 0.0 };
            (dominant, score.clamp(0.0, 1.0))
        } else {
            (0.0, 0.0)
        };

        let mut snapshot = SourceDiversity {
            source_count: self.sources.len(),
            society_count: societies.len(),
            dominant_share,
            diversity_score,
            ceiling: 1.0,
        };
        snapshot.ceiling = snapshot.ceiling_under(policy);
        snapshot
    }
}

/// Diversity figures for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDiversity {
    /// Distinct sources within the window.
    pub source_count: usize,
    /// Distinct societies among those sources.
    pub society_count: usize,
    /// Largest single-source share of the total weight.
    pub dominant_share: f64,
    /// Shannon entropy of the shares normalized to `[0, 1]`.
    pub diversity_score: f64,
    /// Highest aggregate gains may reach.
    pub ceiling: f64,
}

impl SourceDiversity {
    /// Whether no single source dominates and the spread is wide enough.
    #[must_use]
    pub fn is_balanced(&self, policy: &SourceDiversityPolicy) -> bool {
        self.source_count > 0
            && self.dominant_share <= policy.max_dominant_share
            && self.diversity_score >= policy.min_diversity
    }

    fn ceiling_under(&self, policy: &SourceDiversityPolicy) -> f64 {
        if !policy.enabled {
            return 1.0;
        }
        if !self.is_balanced(policy) {
            return policy.good_cap;
        }
        if self.source_count >= policy.min_sources && self.society_count >= policy.min_societies {
            1.0
        } else {
            policy.excellent_cap
        }
    }
}

/// Scale the gains in `delta` so the weighted aggregate does not rise
/// above `max(ceiling, before)`. Returns the scale applied to gains.
pub(crate) fn cap_gains(delta: &mut [f64], weights: &[f64], before: f64, ceiling: f64) -> f64 {
    let (gain, loss) = delta.iter().zip(weights).fold((0.0, 0.0), |(g, l), (d, w)| {
        if *d > 0.0 {
            (g + d * w, l)
        } else {
            (g, l - d * w)
        }
    });
    if gain <= 0.0 || before + gain - loss <= ceiling {
        return 1.0;
    }
    let room = (ceiling - before).max(0.0) + loss;
    let scale = (room / gain).clamp(0.0, 1.0);
    for d in delta.iter_mut().filter(|d| **d > 0.0) {
        *d *= scale;
    }
    scale
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn id(b: u8) -> EntityId {
        EntityId::from_bytes(&[b; 32]).unwrap()
    }

    fn society(name: &str) -> Option<SocietyId> {
        Some(SocietyId::new(name).unwrap())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_policy_validation() {
        assert!(SourceDiversityPolicy::default().validate().is_ok());
        let bad = SourceDiversityPolicy { good_cap: 0.9, ..SourceDiversityPolicy::default() };
        assert!(bad.validate().is_err());
        let bad = SourceDiversityPolicy { window_secs: 0, ..SourceDiversityPolicy::default() };
        assert!(bad.validate().is_err());
        let bad = SourceDiversityPolicy { max_sources: 3, ..SourceDiversityPolicy::default() };
        assert!(bad.validate().is_err());
        let bad = SourceDiversityPolicy { max_dominant_share: 1.5, ..SourceDiversityPolicy::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_empty_and_single_source() {
        let policy = SourceDiversityPolicy::default();
        let empty = SourceProfile::new().snapshot(&policy);
        assert_eq!(empty.source_count, 0);
        assert_eq!(empty.ceiling, 0.7);

        let mut profile = SourceProfile::new();
        profile.record(id(1), society("s1"), 1.0, now(), &policy);
        profile.record(id(1), society("s1"), 1.0, now(), &policy);
        let snap = profile.snapshot(&policy);
        assert_eq!(snap.source_count, 1);
        assert_eq!(snap.dominant_share, 1.0);
        assert_eq!(snap.diversity_score, 0.0);
        assert_eq!(snap.ceiling, 0.7);
        assert_eq!(profile.events_from(&id(1)), 2);
    }

    #[test]
    fn test_even_spread_is_fully_diverse() {
        let policy = SourceDiversityPolicy::default();
        let mut profile = SourceProfile::new();
        for (i, s) in ["s1", "s2", "s3", "s1", "s2"].iter().enumerate() {
            profile.record(id(i as u8 + 1), society(s), 1.0, now(), &policy);
        }
        let snap = profile.snapshot(&policy);
        assert_eq!(snap.source_count, 5);
        assert_eq!(snap.society_count, 3);
        assert!((snap.dominant_share - 0.2).abs() < 1e-12);
        assert!((snap.diversity_score - 1.0).abs() < 1e-12);
        assert_eq!(snap.ceiling, 1.0);
    }

    #[test]
    fn test_balanced_but_narrow_gets_excellent_cap() {
        let policy = SourceDiversityPolicy::default();
        let mut profile = SourceProfile::new();
        for i in 1..=3 {
            profile.record(id(i), society("s1"), 1.0, now(), &policy);
        }
        let snap = profile.snapshot(&policy);
        assert!(snap.is_balanced(&policy));
        assert_eq!(snap.society_count, 1);
        assert_eq!(snap.ceiling, 0.85);
    }

    #[test]
    fn test_dominant_source_caps_at_good() {
        let policy = SourceDiversityPolicy::default();
        let mut profile = SourceProfile::new();
        for i in 1..=5 {
            profile.record(id(i), society(&format!("s{i}")), 1.0, now(), &policy);
        }
        profile.record(id(1), society("s1"), 6.0, now(), &policy);
        let snap = profile.snapshot(&policy);
        // 7 of 11
        assert!((snap.dominant_share - 7.0 / 11.0).abs() < 1e-12);
        assert!(!snap.is_balanced(&policy));
        assert_eq!(snap.ceiling, 0.7);
    }

    #[test]
    fn test_prune_and_eviction() {
        let policy = SourceDiversityPolicy { max_sources: 5, ..SourceDiversityPolicy::default() };
        let mut profile = SourceProfile::new();
        for i in 0..7u8 {
            profile.record(id(i), None, 1.0, now() + Duration::seconds(i64::from(i)), &policy);
        }
        assert_eq!(profile.source_count(), 5);
        assert_eq!(profile.events_from(&id(0)), 0);
        assert_eq!(profile.events_from(&id(6)), 1);

        profile.prune(now() + Duration::seconds(5));
        assert_eq!(profile.source_count(), 2);
    }

    #[test]
    fn test_disabled_never_caps() {
        let policy = SourceDiversityPolicy::disabled();
        let mut profile = SourceProfile::new();
        profile.record(id(1), None, 1.0, now(), &policy);
        assert_eq!(profile.snapshot(&policy).ceiling, 1.0);
    }

    #[test]
    fn test_cap_gains_scales_positive_components() {
        let weights = [0.5, 0.5];
        let mut delta = [0.2, -0.1];
        // before 0.6, gain 0.1, loss 0.05, ceiling 0.62: room 0.02 + 0.05
        let scale = cap_gains(&mut delta, &weights, 0.6, 0.62);
        assert!((scale - 0.7).abs() < 1e-12);
        assert!((delta[0] - 0.14).abs() < 1e-12);
        assert_eq!(delta[1], -0.1);

        let mut below = [0.01, 0.01];
        assert_eq!(cap_gains(&mut below, &weights, 0.5, 0.7), 1.0);
        assert_eq!(below, [0.01, 0.01]);

        let mut above = [0.01, 0.01];
        assert_eq!(cap_gains(&mut above, &weights, 0.8, 0.7), 0.0);
        assert_eq!(above, [0.0, 0.0]);
    }
}
