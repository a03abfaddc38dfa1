//! Lazy trust decay toward a floor.
//!
//! Decay is never scheduled. Each read computes
//! `floor + (value - floor) * exp(-lambda * elapsed)` from the tensor's
//! last-updated time, so the stored tensor only changes on writes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::tensor::{clamp_unit, TrustTensor, DIMENSIONS};
use crate::{ReputationError, Result};

/// Default half-life of the distance to the floor (30 days).
pub const DEFAULT_HALF_LIFE_SECS: i64 = 30 * 24 * 60 * 60;

/// Default floor that trust decays toward.
pub const DEFAULT_DECAY_FLOOR: f64 = 0.3;

/// Configuration for lazy decay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Decay rate per second.
    pub lambda_per_sec: f64,
    /// Value every dimension converges to.
    pub floor: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            lambda_per_sec: std::f64::consts::LN_2 / DEFAULT_HALF_LIFE_SECS as f64,
            floor: DEFAULT_DECAY_FLOOR,
        }
    }
}

impl DecayConfig {
    /// Build from a half-life.
    ///
    /// # Errors
    ///
    /// Rejects non-positive half-lives and floors outside `[0, 1]`.
    pub fn with_half_life(half_life: Duration, floor: f64) -> Result<Self> {
        let secs = half_life.num_seconds();
        if secs <= 0 {
            return Err(ReputationError::InvalidValue {
                field: "decay.half_life",
                reason: "must be positive".into(),
            });
        }
        let config = Self {
            lambda_per_sec: std::f64::consts::LN_2 / secs as f64,
            floor,
        };
        config.validate()?;
        Ok(config)
    }

    /// A configuration under which nothing decays.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            lambda_per_sec: 0.0,
            floor: DEFAULT_DECAY_FLOOR,
        }
    }

    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` for a negative or non-finite rate or a floor
    /// outside `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if !self.lambda_per_sec.is_finite() || self.lambda_per_sec < 0.0 {
            return Err(ReputationError::InvalidValue {
                field: "decay.lambda_per_sec",
                reason: "must be finite and non-negative".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.floor) {
            return Err(ReputationError::InvalidValue {
                field: "decay.floor",
                reason: "must be within [0, 1]".into(),
            });
        }
        Ok(())
    }
}

/// Decay a single value.
///
/// Negative elapsed time (clock skew) is treated as zero.
#[must_use]
pub fn decay_value(value: f64, floor: f64, lambda_per_sec: f64, elapsed_secs: f64) -> f64 {
    let elapsed = elapsed_secs.max(0.0);
    clamp_unit(floor + (value - floor) * (-lambda_per_sec * elapsed).exp())
}

/// Decayed copy of a tensor as of `now`.
///
/// The returned tensor keeps the original `last_updated`, so decaying the
/// result again for the same `now` yields the same values.
#[must_use]
pub fn decayed(tensor: &TrustTensor, config: &DecayConfig, now: DateTime<Utc>) -> TrustTensor {
    let elapsed = (now - tensor.last_updated()).num_milliseconds() as f64 / 1000.0;
    let mut values = [0.0; DIMENSIONS];
    for (out, v) in values.iter_mut().zip(tensor.values()) {
        *out = decay_value(*v, config.floor, config.lambda_per_sec, elapsed);
    }
    TrustTensor::from_values(values, tensor.last_updated())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TrustDimension;

    #[test]
    fn test_no_elapsed_time_no_change() {
        assert_eq!(decay_value(0.9, 0.3, 0.01, 0.0), 0.9);
    }

    #[test]
    fn test_half_life_halves_distance() {
        let config = DecayConfig::with_half_life(Duration::days(10), 0.2).unwrap();
        let v = decay_value(1.0, config.floor, config.lambda_per_sec, 10.0 * 86400.0);
        assert!((v - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_values_below_floor_rise() {
        let v = decay_value(0.1, 0.3, 0.001, 1000.0);
        assert!(v > 0.1 && v < 0.3);
    }

    #[test]
    fn test_converges_to_floor() {
        let v = decay_value(1.0, 0.3, 0.01, 1e6);
        assert!((v - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_negative_elapsed_is_ignored() {
        assert_eq!(decay_value(0.8, 0.3, 0.01, -50.0), 0.8);
    }

    #[test]
    fn test_decayed_tensor_is_pure() {
        let start = Utc::now();
        let tensor = TrustTensor::new(0.9, start);
        let config = DecayConfig::default();
        let later = start + Duration::days(30);

        let once = decayed(&tensor, &config, later);
        let twice = decayed(&tensor, &config, later);
        assert_eq!(once, twice);
        assert!((once.get(TrustDimension::Competence) - 0.6).abs() < 1e-6);
        assert_eq!(tensor.get(TrustDimension::Competence), 0.9);
    }

    #[test]
    fn test_disabled_decay() {
        let start = Utc::now();
        let tensor = TrustTensor::new(0.9, start);
        let out = decayed(&tensor, &DecayConfig::disabled(), start + Duration::days(365));
        assert_eq!(out.values(), tensor.values());
    }

    #[test]
    fn test_invalid_configs() {
        assert!(DecayConfig::with_half_life(Duration::zero(), 0.3).is_err());
        assert!(DecayConfig::with_half_life(Duration::days(1), 1.5).is_err());
        let bad = DecayConfig { lambda_per_sec: -1.0, floor: 0.3 };
        assert!(bad.validate().is_err());
    }
}
