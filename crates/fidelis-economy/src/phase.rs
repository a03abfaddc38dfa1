//! Market phase bands and transition detection.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{EconomyError, Result};

/// γ change that counts as a maximally severe transition.
const FULL_SEVERITY_DELTA: f64 = 0.5;

/// Transitions kept in the detector's history.
const MAX_TRANSITION_HISTORY: usize = 256;

/// Discrete market phase by γ band, from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MarketPhase {
    /// Coordinated panic.
    Crisis,
    /// Dangerous herding.
    Herding,
    /// Unstable middle ground.
    Transitional,
    /// Healthy independence.
    Efficient,
    /// Ideal independence.
    Optimal,
}

impl MarketPhase {
    /// Band index, 0 for crisis through 4 for optimal.
    #[must_use]
    pub fn index(self) -> u8 {
        match self {
            Self::Crisis => 0,
            Self::Herding => 1,
            Self::Transitional => 2,
            Self::Efficient => 3,
            Self::Optimal => 4,
        }
    }
}

impl std::fmt::Display for MarketPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Crisis => "crisis",
            Self::Herding => "herding",
            Self::Transitional => "transitional",
            Self::Efficient => "efficient",
            Self::Optimal => "optimal",
        };
        f.write_str(s)
    }
}

/// Lower γ edges of the herding, transitional, efficient and optimal bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseBands {
    /// γ below this is crisis.
    pub crisis: f64,
    /// γ below this is herding.
    pub herding: f64,
    /// γ below this is transitional.
    pub transitional: f64,
    /// γ below this is efficient; at or above is optimal.
    pub efficient: f64,
}

impl Default for PhaseBands {
    fn default() -> Self {
        Self {
            crisis: 0.2,
            herding: 0.4,
            transitional: 0.6,
            efficient: 0.8,
        }
    }
}

impl PhaseBands {
    /// Check that edges are finite, strictly increasing and inside (0, 2).
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` otherwise.
    pub fn validate(&self) -> Result<()> {
        let edges = [self.crisis, self.herding, self.transitional, self.efficient];
        if edges.iter().any(|e| !e.is_finite() || *e <= 0.0 || *e >= 2.0) {
            return Err(EconomyError::InvalidValue {
                field: "market.bands",
                reason: "edges must lie in (0, 2)".into(),
            });
        }
        if edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EconomyError::InvalidValue {
                field: "market.bands",
                reason: "edges must be strictly increasing".into(),
            });
        }
        Ok(())
    }

    /// Phase for `gamma`.
    #[must_use]
    pub fn classify(&self, gamma: f64) -> MarketPhase {
        if gamma < self.crisis {
            MarketPhase::Crisis
        } else if gamma < self.herding {
            MarketPhase::Herding
        } else if gamma < self.transitional {
            MarketPhase::Transitional
        } else if gamma < self.efficient {
            MarketPhase::Efficient
        } else {
            MarketPhase::Optimal
        }
    }
}

/// Direction of a phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Moving toward crisis.
    Degrading,
    /// Moving toward optimal.
    Improving,
}

/// A qualitative shift in market independence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    /// When it was observed.
    pub at: DateTime<Utc>,
    /// Previous phase.
    pub from: MarketPhase,
    /// New phase.
    pub to: MarketPhase,
    /// Previous γ.
    pub gamma_before: f64,
    /// New γ.
    pub gamma_after: f64,
    /// `min(1, |Δγ| / 0.5)`.
    pub severity: f64,
    /// Toward crisis or away from it.
    pub direction: Direction,
    /// Degrading into herding or crisis.
    pub crisis_bound: bool,
}

/// Watches successive γ observations for significant band changes.
///
/// A transition fires when the band index moves by more than one step, or
/// when the market enters or leaves crisis. The first observation only
/// establishes the baseline.
#[derive(Debug, Clone)]
pub struct PhaseDetector {
    bands: PhaseBands,
    last: Option<(MarketPhase, f64)>,
    history: VecDeque<PhaseTransition>,
}

impl PhaseDetector {
    /// Create a detector with no baseline.
    #[must_use]
    pub fn new(bands: PhaseBands) -> Self {
        Self {
            bands,
            last: None,
            history: VecDeque::new(),
        }
    }

    /// The band edges.
    #[must_use]
    pub fn bands(&self) -> &PhaseBands {
        &self.bands
    }

    /// Last observed phase.
    #[must_use]
    pub fn current(&self) -> Option<MarketPhase> {
        self.last.map(|(phase, _)| phase)
    }

    /// Past transitions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &PhaseTransition> {
        self.history.iter()
    }

    /// Record an observation.
    pub fn observe(&mut self, gamma: f64, now: DateTime<Utc>) -> Option<PhaseTransition> {
        let phase = self.bands.classify(gamma);
        let previous = self.last.replace((phase, gamma));
        let (from, gamma_before) = previous?;
        if from == phase {
            return None;
        }

        let step = (i16::from(phase.index()) - i16::from(from.index())).abs();
        let crisis_crossed = (from == MarketPhase::Crisis) != (phase == MarketPhase::Crisis);
        if step <= 1 && !crisis_crossed {
            return None;
        }

        let direction = if phase < from {
            Direction::Degrading
        } else {
            Direction::Improving
        };
        let transition = PhaseTransition {
            at: now,
            from,
            to: phase,
            gamma_before,
            gamma_after: gamma,
            severity: ((gamma - gamma_before).abs() / FULL_SEVERITY_DELTA).min(1.0),
            direction,
            crisis_bound: direction == Direction::Degrading && phase <= MarketPhase::Herding,
        };

        if transition.crisis_bound {
            warn!(from = %from, to = %phase, gamma, severity = transition.severity, "Market degrading toward crisis");
        } else {
            info!(from = %from, to = %phase, gamma, severity = transition.severity, "Market phase transition");
        }

        if self.history.len() >= MAX_TRANSITION_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(transition.clone());
        Some(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> PhaseDetector {
        PhaseDetector::new(PhaseBands::default())
    }

    #[test]
    fn test_classification_edges() {
        let bands = PhaseBands::default();
        assert_eq!(bands.classify(0.1), MarketPhase::Crisis);
        assert_eq!(bands.classify(0.2), MarketPhase::Herding);
        assert_eq!(bands.classify(0.5), MarketPhase::Transitional);
        assert_eq!(bands.classify(0.632), MarketPhase::Efficient);
        assert_eq!(bands.classify(0.8), MarketPhase::Optimal);
        assert_eq!(bands.classify(2.0), MarketPhase::Optimal);
    }

    #[test]
    fn test_first_observation_never_fires() {
        let mut d = detector();
        assert!(d.observe(0.1, Utc::now()).is_none());
        assert_eq!(d.current(), Some(MarketPhase::Crisis));
    }

    #[test]
    fn test_drop_from_efficient_to_herding_is_crisis_bound() {
        let mut d = detector();
        let now = Utc::now();
        assert!(d.observe(0.7, now).is_none());
        let t = d.observe(0.3, now).unwrap();
        assert_eq!(t.from, MarketPhase::Efficient);
        assert_eq!(t.to, MarketPhase::Herding);
        assert_eq!(t.direction, Direction::Degrading);
        assert!(t.crisis_bound);
        assert!((t.severity - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_single_step_is_quiet() {
        let mut d = detector();
        let now = Utc::now();
        d.observe(0.7, now);
        assert!(d.observe(0.5, now).is_none());
        assert!(d.observe(0.65, now).is_none());
        assert_eq!(d.history().count(), 0);
    }

    #[test]
    fn test_crisis_entry_and_exit_fire() {
        let mut d = detector();
        let now = Utc::now();
        d.observe(0.3, now);
        let entry = d.observe(0.1, now).unwrap();
        assert!(entry.crisis_bound);
        let exit = d.observe(0.3, now).unwrap();
        assert_eq!(exit.direction, Direction::Improving);
        assert!(!exit.crisis_bound);
        assert_eq!(d.history().count(), 2);
    }

    #[test]
    fn test_large_recovery_is_not_crisis_bound() {
        let mut d = detector();
        let now = Utc::now();
        d.observe(0.3, now);
        let t = d.observe(1.2, now).unwrap();
        assert_eq!(t.to, MarketPhase::Optimal);
        assert!((t.severity - 1.0).abs() < 1e-9);
        assert!(!t.crisis_bound);
    }

    #[test]
    fn test_band_validation() {
        assert!(PhaseBands::default().validate().is_ok());
        let bad = PhaseBands {
            herding: 0.1,
            ..PhaseBands::default()
        };
        assert!(bad.validate().is_err());
        let bad = PhaseBands {
            efficient: 2.5,
            ..PhaseBands::default()
        };
        assert!(bad.validate().is_err());
    }
}
