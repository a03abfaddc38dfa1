//! Periodic market monitoring over the resource ledger.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fidelis_identity::EntityId;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ledger::{LedgerConfig, ResourceLedger};
use crate::market::{analyze_series, MarketConfig, MarketSnapshot};
use crate::phase::{MarketPhase, PhaseDetector, PhaseTransition};
use crate::{EconomyError, Result};

/// Upper bound on activity buckets per series.
const MAX_BUCKETS: usize = 1024;

/// Resource economy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    /// Ledger settings.
    pub ledger: LedgerConfig,
    /// Market analysis settings.
    pub market: MarketConfig,
    /// Width of one activity bucket, in seconds.
    pub bucket_secs: i64,
    /// Buckets per activity series.
    pub buckets: usize,
    /// Agents with activity needed before γ is fed to the phase detector.
    pub min_active_agents: usize,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerConfig::default(),
            market: MarketConfig::default(),
            bucket_secs: 60,
            buckets: 16,
            min_active_agents: 2,
        }
    }
}

impl EconomyConfig {
    /// Set the activity bucketing.
    #[must_use]
    pub fn with_buckets(mut self, bucket_secs: i64, buckets: usize) -> Self {
        self.bucket_secs = bucket_secs;
        self.buckets = buckets;
        self
    }

    /// Set the market settings.
    #[must_use]
    pub fn with_market(mut self, market: MarketConfig) -> Self {
        self.market = market;
        self
    }

    /// Validate all sections.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        self.ledger.validate()?;
        self.market.validate()?;
        if self.bucket_secs <= 0 {
            return Err(EconomyError::InvalidValue {
                field: "economy.bucket_secs",
                reason: "must be positive".into(),
            });
        }
        if self.buckets < 2 || self.buckets > MAX_BUCKETS {
            return Err(EconomyError::InvalidValue {
                field: "economy.buckets",
                reason: format!("must be between 2 and {MAX_BUCKETS}"),
            });
        }
        Ok(())
    }
}

/// Result of one monitoring pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorReport {
    /// Market state.
    pub snapshot: MarketSnapshot,
    /// Phase transition raised by this pass, if any.
    pub transition: Option<PhaseTransition>,
}

/// Watches ledger activity for herding and phase shifts.
#[derive(Debug)]
pub struct ResourceEconomyMonitor {
    config: EconomyConfig,
    ledger: Arc<ResourceLedger>,
    detector: Mutex<PhaseDetector>,
    last: RwLock<Option<MarketSnapshot>>,
}

impl ResourceEconomyMonitor {
    /// Create a monitor with its own ledger.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the configuration is invalid.
    pub fn new(config: EconomyConfig) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(ResourceLedger::new(config.ledger.clone())?);
        Ok(Self::with_ledger(config, ledger))
    }

    /// Create a monitor over an existing ledger.
    #[must_use]
    pub fn with_ledger(config: EconomyConfig, ledger: Arc<ResourceLedger>) -> Self {
        let detector = PhaseDetector::new(config.market.bands);
        Self {
            config,
            ledger,
            detector: Mutex::new(detector),
            last: RwLock::new(None),
        }
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &EconomyConfig {
        &self.config
    }

    /// The monitored ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }

    /// Most recent snapshot.
    #[must_use]
    pub fn last_snapshot(&self) -> Option<MarketSnapshot> {
        self.last.read().clone()
    }

    /// Current phase, once the detector has a baseline.
    #[must_use]
    pub fn phase(&self) -> Option<MarketPhase> {
        self.detector.lock().current()
    }

    /// Transitions raised so far, oldest first.
    #[must_use]
    pub fn transitions(&self) -> Vec<PhaseTransition> {
        self.detector.lock().history().cloned().collect()
    }

    /// Analyse the ledger's recent activity.
    pub fn tick(&self, now: DateTime<Utc>) -> MonitorReport {
        let series = self
            .ledger
            .activity_series(Duration::seconds(self.config.bucket_secs), self.config.buckets, now);
        self.analyze(&series, now)
    }

    /// Analyse externally supplied activity series.
    pub fn analyze(&self, series: &BTreeMap<EntityId, Vec<f64>>, now: DateTime<Utc>) -> MonitorReport {
        let snapshot = analyze_series(series, self.ledger.mean_coherence(), &self.config.market, now);
        let active = series.values().filter(|s| s.iter().any(|v| *v != 0.0)).count();

        let transition = if active >= self.config.min_active_agents {
            self.detector.lock().observe(snapshot.gamma, now)
        } else {
            debug!(active, "Too few active agents for phase detection");
            None
        };

        debug!(
            gamma = snapshot.gamma,
            phase = %snapshot.phase,
            n_corr = snapshot.n_corr,
            crisis_risk = snapshot.crisis_risk,
            "Market snapshot"
        );
        if let Some(t) = &transition {
            info!(from = %t.from, to = %t.to, crisis_bound = t.crisis_bound, "Economy phase transition raised");
        }

        *self.last.write() = Some(snapshot.clone());
        MonitorReport { snapshot, transition }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::tests::{hadamard_row, ten_of_twenty};
    use fidelis_identity::EntityKeyPair;

    fn monitor() -> ResourceEconomyMonitor {
        ResourceEconomyMonitor::new(EconomyConfig::default()).unwrap()
    }

    fn herd(size: u8) -> BTreeMap<EntityId, Vec<f64>> {
        (0..size)
            .map(|i| (EntityKeyPair::from_seed(&[i + 1; 32]).id(), hadamard_row(1, 1.0 + f64::from(i))))
            .collect()
    }

    #[test]
    fn test_synthetic_market_first_observation() {
        let monitor = monitor();
        let report = monitor.analyze(&ten_of_twenty(), Utc::now());
        assert_eq!(report.snapshot.n_corr, 10);
        assert!((report.snapshot.gamma - 0.632).abs() < 1e-3);
        assert_eq!(report.snapshot.phase, MarketPhase::Efficient);
        assert!(report.transition.is_none());
        assert_eq!(monitor.phase(), Some(MarketPhase::Efficient));
    }

    #[test]
    fn test_same_band_stays_quiet() {
        let monitor = monitor();
        let now = Utc::now();
        monitor.analyze(&ten_of_twenty(), now);
        assert!(monitor.analyze(&ten_of_twenty(), now).transition.is_none());
    }

    #[test]
    fn test_herding_collapse_raises_transition() {
        let monitor = monitor();
        let now = Utc::now();
        monitor.analyze(&ten_of_twenty(), now);
        // 36 agents in lockstep: γ = 2/6 ≈ 0.333, herding.
        let report = monitor.analyze(&herd(36), now);
        assert_eq!(report.snapshot.phase, MarketPhase::Herding);
        let transition = report.transition.unwrap();
        assert!(transition.crisis_bound);
        assert_eq!(monitor.transitions().len(), 1);
    }

    #[test]
    fn test_idle_market_does_not_set_baseline() {
        let monitor = monitor();
        let report = monitor.tick(Utc::now());
        assert_eq!(report.snapshot.agents, 0);
        assert!(report.transition.is_none());
        assert!(monitor.phase().is_none());
        assert!(monitor.last_snapshot().is_some());
    }

    #[test]
    fn test_tick_reads_ledger_activity() {
        let monitor = monitor();
        let now = Utc::now();
        let ledger = monitor.ledger();
        let a = EntityKeyPair::from_seed(&[1; 32]).id();
        let b = EntityKeyPair::from_seed(&[2; 32]).id();
        ledger.open_account(a, 0, now - Duration::minutes(10)).unwrap();
        ledger.open_account(b, 0, now - Duration::minutes(10)).unwrap();
        for minute in [9, 7, 3] {
            let at = now - Duration::minutes(minute);
            ledger.earn(&a, 10, at).unwrap();
            ledger.earn(&b, 20, at).unwrap();
        }
        let report = monitor.tick(now);
        assert_eq!(report.snapshot.agents, 2);
        assert_eq!(report.snapshot.n_corr, 2);
        assert!(report.snapshot.mean_coherence > 0.0);
        assert_eq!(monitor.phase(), Some(MarketPhase::Optimal));
    }

    #[test]
    fn test_config_validation() {
        assert!(EconomyConfig::default().validate().is_ok());
        assert!(EconomyConfig::default().with_buckets(0, 16).validate().is_err());
        assert!(EconomyConfig::default().with_buckets(60, 1).validate().is_err());
        assert!(ResourceEconomyMonitor::new(EconomyConfig::default().with_buckets(60, 5000)).is_err());
    }
}
