//! Trust tensors.
//!
//! A tensor holds six independent trust dimensions for one entity within
//! one observer context. Every dimension stays within `[0, 1]`, and the
//! aggregate is a pure weighted sum of the dimensions.

use chrono::{DateTime, Utc};
use fidelis_identity::EntityId;
use serde::{Deserialize, Serialize};

use crate::{ReputationError, Result};

/// Trust limits.
pub mod limits {
    /// Lowest dimension value.
    pub const TRUST_MIN: f64 = 0.0;

    /// Highest dimension value.
    pub const TRUST_MAX: f64 = 1.0;

    /// Starting value of every dimension for a new tensor.
    pub const TRUST_START: f64 = 0.5;

    /// Number of trust dimensions.
    pub const DIMENSIONS: usize = 6;

    /// Maximum length of an observer context name in bytes.
    pub const MAX_CONTEXT_LEN: usize = 128;
}

pub use limits::*;

/// One axis of trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrustDimension {
    /// Ability to complete the work.
    Competence,
    /// Honesty of claims and reports.
    Integrity,
    /// Acting in the interest of others.
    Benevolence,
    /// Consistency of behavior over time.
    Predictability,
    /// Openness about actions and state.
    Transparency,
    /// Taking responsibility for outcomes.
    Accountability,
}

impl TrustDimension {
    /// All dimensions in storage order.
    pub const ALL: [Self; DIMENSIONS] = [
        Self::Competence,
        Self::Integrity,
        Self::Benevolence,
        Self::Predictability,
        Self::Transparency,
        Self::Accountability,
    ];

    /// Storage index of this dimension.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Competence => "competence",
            Self::Integrity => "integrity",
            Self::Benevolence => "benevolence",
            Self::Predictability => "predictability",
            Self::Transparency => "transparency",
            Self::Accountability => "accountability",
        }
    }
}

impl std::fmt::Display for TrustDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalized aggregation weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionWeights([f64; DIMENSIONS]);

impl DimensionWeights {
    /// Build weights, normalizing them to sum to one.
    ///
    /// # Errors
    ///
    /// Rejects negative, non-finite or all-zero weights.
    pub fn new(weights: [f64; DIMENSIONS]) -> Result<Self> {
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ReputationError::InvalidValue {
                field: "weights",
                reason: "weights must be finite and non-negative".into(),
            });
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(ReputationError::InvalidValue {
                field: "weights",
                reason: "weights must not all be zero".into(),
            });
        }
        Ok(Self(weights.map(|w| w / total)))
    }

    /// Weight for one dimension.
    #[must_use]
    pub fn get(&self, dimension: TrustDimension) -> f64 {
        self.0[dimension.index()]
    }

    /// All weights.
    #[must_use]
    pub fn as_array(&self) -> &[f64; DIMENSIONS] {
        &self.0
    }
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self([1.0 / DIMENSIONS as f64; DIMENSIONS])
    }
}

/// An observer context, such as a role or a task domain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextId(String);

impl ContextId {
    /// Create a context id.
    ///
    /// # Errors
    ///
    /// Rejects empty names and names over [`MAX_CONTEXT_LEN`] bytes.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_CONTEXT_LEN {
            return Err(ReputationError::MalformedEvent(format!(
                "context must be 1..={} bytes",
                MAX_CONTEXT_LEN
            )));
        }
        Ok(Self(name))
    }

    /// Context name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the length bound on a value that came off the wire.
    pub(crate) fn validate(&self) -> Result<()> {
        Self::new(self.0.as_str()).map(|_| ())
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Six-dimensional trust for one (context, entity) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustTensor {
    values: [f64; DIMENSIONS],
    last_updated: DateTime<Utc>,
}

impl TrustTensor {
    /// Create a tensor with every dimension at `initial` (clamped).
    #[must_use]
    pub fn new(initial: f64, at: DateTime<Utc>) -> Self {
        Self {
            values: [clamp_unit(initial); DIMENSIONS],
            last_updated: at,
        }
    }

    /// Create a tensor from explicit values (each clamped).
    #[must_use]
    pub fn from_values(values: [f64; DIMENSIONS], at: DateTime<Utc>) -> Self {
        Self {
            values: values.map(clamp_unit),
            last_updated: at,
        }
    }

    /// Value of one dimension.
    #[must_use]
    pub fn get(&self, dimension: TrustDimension) -> f64 {
        self.values[dimension.index()]
    }

    /// All dimension values.
    #[must_use]
    pub fn values(&self) -> &[f64; DIMENSIONS] {
        &self.values
    }

    /// When the tensor was last written.
    #[must_use]
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Weighted aggregate in `[0, 1]`.
    #[must_use]
    pub fn aggregate(&self, weights: &DimensionWeights) -> f64 {
        let sum: f64 = self
            .values
            .iter()
            .zip(weights.as_array())
            .map(|(v, w)| v * w)
            .sum();
        clamp_unit(sum)
    }

    /// Add a delta to each dimension, clamping, and return the change
    /// actually applied.
    pub(crate) fn apply(&mut self, delta: &[f64; DIMENSIONS], at: DateTime<Utc>) -> [f64; DIMENSIONS] {
        let mut applied = [0.0; DIMENSIONS];
        for (i, d) in delta.iter().enumerate() {
            let before = self.values[i];
            self.values[i] = clamp_unit(before + d);
            applied[i] = self.values[i] - before;
        }
        self.last_updated = at;
        applied
    }

    /// Multiply every dimension by `factor` (clamped to `[0, 1]`).
    pub(crate) fn scale(&mut self, factor: f64, at: DateTime<Utc>) {
        let factor = clamp_unit(factor);
        for v in &mut self.values {
            *v = clamp_unit(*v * factor);
        }
        self.last_updated = at;
    }

    pub(crate) fn replace_values(&mut self, values: [f64; DIMENSIONS], at: DateTime<Utc>) {
        self.values = values.map(clamp_unit);
        self.last_updated = at;
    }
}

/// Clamp to `[0, 1]`, mapping NaN to zero.
#[must_use]
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return TRUST_MIN;
    }
    value.clamp(TRUST_MIN, TRUST_MAX)
}

/// The multipliers that shaped a delta.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeltaFactors {
    /// Independent-witness boost (1.0 when self-reported).
    pub witness: f64,
    /// Consistency bonus (1.0 when not earned).
    pub consistency: f64,
    /// Novelty multiplier (1.0 for repeated actions).
    pub novelty: f64,
    /// Diminishing-returns factor on gains.
    pub diminishing: f64,
    /// Suspect multiplier (1.0 when not suspect).
    pub suspect: f64,
    /// Scale the source-diversity ceiling put on gains (1.0 when uncapped).
    pub diversity_cap: f64,
}

impl Default for DeltaFactors {
    fn default() -> Self {
        Self {
            witness: 1.0,
            consistency: 1.0,
            novelty: 1.0,
            diminishing: 1.0,
            suspect: 1.0,
            diversity_cap: 1.0,
        }
    }
}

/// The result of an accepted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustDelta {
    /// Entity whose trust changed.
    pub subject: EntityId,
    /// Observer context of the change.
    pub context: ContextId,
    /// Sequence of the event that produced it.
    pub sequence: u64,
    /// Per-dimension change actually applied, after clamping.
    pub applied: [f64; DIMENSIONS],
    /// Multipliers used.
    pub factors: DeltaFactors,
    /// Whether the pattern detector flagged this delta.
    pub suspect: bool,
    /// Detector explanation when suspect.
    pub suspect_reason: Option<String>,
    /// Aggregate before the event (after decay).
    pub aggregate_before: f64,
    /// Aggregate after the event.
    pub aggregate_after: f64,
    /// Acceptance time.
    pub accepted_at: DateTime<Utc>,
}

impl TrustDelta {
    /// Net change of the aggregate.
    #[must_use]
    pub fn net_change(&self) -> f64 {
        self.aggregate_after - self.aggregate_before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tensor_clamps_initial() {
        let now = Utc::now();
        assert_eq!(TrustTensor::new(1.7, now).values(), &[1.0; DIMENSIONS]);
        assert_eq!(TrustTensor::new(-0.3, now).values(), &[0.0; DIMENSIONS]);
    }

    #[test]
    fn test_apply_clamps_and_reports_actual_change() {
        let now = Utc::now();
        let mut tensor = TrustTensor::new(0.95, now);
        let applied = tensor.apply(&[0.1, -0.2, 0.0, 0.0, 0.0, -1.5], now);

        assert!((tensor.get(TrustDimension::Competence) - 1.0).abs() < 1e-12);
        assert!((applied[0] - 0.05).abs() < 1e-12);
        assert!((applied[1] + 0.2).abs() < 1e-12);
        assert_eq!(tensor.get(TrustDimension::Accountability), 0.0);
        assert!((applied[5] + 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_aggregate_is_weighted_mean() {
        let now = Utc::now();
        let tensor = TrustTensor::from_values([1.0, 0.0, 1.0, 0.0, 1.0, 0.0], now);
        assert!((tensor.aggregate(&DimensionWeights::default()) - 0.5).abs() < 1e-12);

        let weights = DimensionWeights::new([1.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        assert!((tensor.aggregate(&weights) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_aggregate_is_pure_function_of_values() {
        let t1 = TrustTensor::from_values([0.2, 0.4, 0.6, 0.8, 0.1, 0.3], Utc::now());
        let t2 = TrustTensor::from_values(
            [0.2, 0.4, 0.6, 0.8, 0.1, 0.3],
            Utc::now() - chrono::Duration::days(30),
        );
        let w = DimensionWeights::default();
        assert_eq!(t1.aggregate(&w), t2.aggregate(&w));
    }

    #[test]
    fn test_weights_normalize_and_validate() {
        let w = DimensionWeights::new([2.0, 2.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        assert!((w.get(TrustDimension::Competence) - 0.5).abs() < 1e-12);
        assert!(DimensionWeights::new([0.0; DIMENSIONS]).is_err());
        assert!(DimensionWeights::new([1.0, -1.0, 0.0, 0.0, 0.0, 0.0]).is_err());
        assert!(DimensionWeights::new([f64::NAN, 1.0, 0.0, 0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_scale_penalty() {
        let now = Utc::now();
        let mut tensor = TrustTensor::new(0.8, now);
        tensor.scale(0.95, now);
        assert!((tensor.get(TrustDimension::Integrity) - 0.76).abs() < 1e-12);
    }

    #[test]
    fn test_clamp_unit_nan() {
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(f64::INFINITY), 1.0);
    }

    #[test]
    fn test_context_validation() {
        assert!(ContextId::new("role:analyst").is_ok());
        assert!(ContextId::new("").is_err());
        assert!(ContextId::new("x".repeat(MAX_CONTEXT_LEN + 1)).is_err());
    }

    #[test]
    fn test_dimension_indices_match_all() {
        for (i, d) in TrustDimension::ALL.iter().enumerate() {
            assert_eq!(d.index(), i);
        }
        assert_eq!(TrustDimension::Transparency.to_string(), "transparency");
    }
}
