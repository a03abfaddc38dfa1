//! Market independence metrics.
//!
//! γ measures how independently agents act: each agent's bucketed activity
//! series is compared against every other, agents that move in lockstep
//! with at least one other agent are counted as correlated, and
//! `γ = 2 / sqrt(N_corr)`. A market with no correlated agents sits at the
//! upper bound of 2.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fidelis_identity::EntityId;
use serde::{Deserialize, Serialize};

use crate::phase::{MarketPhase, PhaseBands};
use crate::{EconomyError, Result};

/// Upper bound on γ.
pub const MAX_GAMMA: f64 = 2.0;

/// Configuration for market analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// |Pearson r| above which two agents count as correlated.
    pub correlation_threshold: f64,
    /// γ band edges.
    pub bands: PhaseBands,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            correlation_threshold: 0.6,
            bands: PhaseBands::default(),
        }
    }
}

impl MarketConfig {
    /// Set the correlation threshold.
    #[must_use]
    pub fn with_correlation_threshold(mut self, threshold: f64) -> Self {
        self.correlation_threshold = threshold;
        self
    }

    /// Set the band edges.
    #[must_use]
    pub fn with_bands(mut self, bands: PhaseBands) -> Self {
        self.bands = bands;
        self
    }

    /// Validate thresholds and bands.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` for a threshold outside (0, 1) or bad bands.
    pub fn validate(&self) -> Result<()> {
        if !(self.correlation_threshold > 0.0 && self.correlation_threshold < 1.0) {
            return Err(EconomyError::InvalidValue {
                field: "market.correlation_threshold",
                reason: "must lie in (0, 1)".into(),
            });
        }
        self.bands.validate()
    }
}

/// Pearson correlation of the aligned tails of `a` and `b`.
///
/// Returns 0 when fewer than two samples overlap or either series is flat.
#[must_use]
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let len = a.len().min(b.len());
    if len < 2 {
        return 0.0;
    }
    let a = &a[a.len() - len..];
    let b = &b[b.len() - len..];
    let n = len as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
        return 0.0;
    }
    (cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0)
}

/// Number of series whose |r| exceeds `threshold` against at least one other.
#[must_use]
pub fn correlated_count(series: &[&[f64]], threshold: f64) -> usize {
    let mut correlated = vec![false; series.len()];
    for i in 0..series.len() {
        for j in (i + 1)..series.len() {
            if correlated[i] && correlated[j] {
                continue;
            }
            if pearson(series[i], series[j]).abs() > threshold {
                correlated[i] = true;
                correlated[j] = true;
            }
        }
    }
    correlated.into_iter().filter(|c| *c).count()
}

/// `γ = 2 / sqrt(max(n_corr, 1))`.
#[must_use]
pub fn market_gamma(n_corr: usize) -> f64 {
    let n = n_corr.max(1) as f64;
    (2.0 / n.sqrt()).clamp(0.0, MAX_GAMMA)
}

/// `tanh(2(γ - 0.5))`, in (-1, 1).
#[must_use]
pub fn market_efficiency(gamma: f64) -> f64 {
    (2.0 * (gamma - 0.5)).tanh()
}

/// Geometric mean of inverse efficiency, inverse coherence and γ stress.
#[must_use]
pub fn crisis_risk(gamma: f64, efficiency: f64, mean_coherence: f64) -> f64 {
    let inverse_efficiency = ((1.0 - efficiency) / 2.0).clamp(0.0, 1.0);
    let inverse_coherence = (1.0 - mean_coherence).clamp(0.0, 1.0);
    let gamma_stress = (1.0 - gamma).clamp(0.0, 1.0);
    (inverse_efficiency * inverse_coherence * gamma_stress).cbrt().min(1.0)
}

/// Point-in-time view of market health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// When it was taken.
    pub at: DateTime<Utc>,
    /// Agents analysed.
    pub agents: usize,
    /// Agents correlated with at least one other.
    pub n_corr: usize,
    /// Market independence.
    pub gamma: f64,
    /// Band for `gamma`.
    pub phase: MarketPhase,
    /// `tanh(2(γ - 0.5))`.
    pub efficiency: f64,
    /// Mean account coherence.
    pub mean_coherence: f64,
    /// Combined risk in [0, 1].
    pub crisis_risk: f64,
}

/// Analyse per-agent activity series.
#[must_use]
pub fn analyze_series(
    series: &BTreeMap<EntityId, Vec<f64>>,
    mean_coherence: f64,
    config: &MarketConfig,
    now: DateTime<Utc>,
) -> MarketSnapshot {
    let views: Vec<&[f64]> = series.values().map(Vec::as_slice).collect();
    let n_corr = correlated_count(&views, config.correlation_threshold);
    let gamma = market_gamma(n_corr);
    let efficiency = market_efficiency(gamma);
    MarketSnapshot {
        at: now,
        agents: views.len(),
        n_corr,
        gamma,
        phase: config.bands.classify(gamma),
        efficiency,
        mean_coherence,
        crisis_risk: crisis_risk(gamma, efficiency, mean_coherence),
    }
}
