//! Configuration for a federation node.
//!
//! [`FederationConfig`] gathers the settings of every component. Each
//! section has sensible defaults, so a JSON file only needs the values it
//! overrides.
//!
//! # Example
//!
//! ```
//! use fidelis_core::config::FederationConfigBuilder;
//!
//! let config = FederationConfigBuilder::new()
//!     .with_witness_requirements(2, 2)
//!     .with_round_timeout_secs(10)
//!     .with_fanout(4)
//!     .build_validated()
//!     .unwrap();
//! assert_eq!(config.witness.min_attestations, 2);
//! ```

use std::path::Path;

use fidelis_consensus::ConsensusConfig;
use fidelis_economy::EconomyConfig;
use fidelis_net::GossipConfig;
use fidelis_reputation::{ChallengePolicy, EngineConfig, StakePolicy, WitnessPolicy};
use serde::{Deserialize, Serialize};

/// Default interval between node ticks in milliseconds.
const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

/// Default capacity of the event stream.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default duration of anti-gaming tightening after a phase transition.
const DEFAULT_TIGHTENING_SECS: i64 = 3600;

/// Node-level settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Interval between ticks of [`crate::FederationNode::run`].
    pub tick_interval_ms: u64,
    /// Buffered events per subscriber before the slowest one lags.
    pub event_channel_capacity: usize,
    /// How long a degrading phase transition tightens anti-gaming.
    pub tightening_secs: i64,
    /// Market crisis risk at which an economic anomaly is raised.
    pub anomaly_risk_threshold: f64,
    /// Propose revocation of permanently flagged entities.
    pub auto_revoke_flagged: bool,
    /// Resources credited to each newly registered entity.
    pub initial_allocation: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            tightening_secs: DEFAULT_TIGHTENING_SECS,
            anomaly_risk_threshold: 0.7,
            auto_revoke_flagged: true,
            initial_allocation: 0,
        }
    }
}

/// Complete node configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Node-level settings.
    pub node: NodeConfig,
    /// Reputation engine.
    pub engine: EngineConfig,
    /// Witness diversity requirements.
    pub witness: WitnessPolicy,
    /// Stake requirements.
    pub stake: StakePolicy,
    /// Challenge-response auditing.
    pub challenge: ChallengePolicy,
    /// Consensus rounds and slashing.
    pub consensus: ConsensusConfig,
    /// Gossip dissemination.
    pub gossip: GossipConfig,
    /// Resource ledger and market monitoring.
    pub economy: EconomyConfig,
}

impl FederationConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> FederationConfigBuilder {
        FederationConfigBuilder::new()
    }

    /// Parse a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `Parse` for malformed JSON or `InvalidValue` if validation
    /// fails.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, otherwise as
    /// [`FederationConfig::from_json`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Serialize as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `Parse` if serialization fails.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate the configuration.
    ///
    /// Returns the first invalid field found.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` naming the field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.tick_interval_ms == 0 {
            return Err(ConfigError::invalid("node.tick_interval_ms", "must be greater than zero"));
        }
        if self.node.event_channel_capacity == 0 {
            return Err(ConfigError::invalid("node.event_channel_capacity", "must be greater than zero"));
        }
        if self.node.tightening_secs <= 0 {
            return Err(ConfigError::invalid("node.tightening_secs", "must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.node.anomaly_risk_threshold) {
            return Err(ConfigError::invalid("node.anomaly_risk_threshold", "must be within [0, 1]"));
        }

        self.engine.validate().map_err(|e| section_error("engine", e))?;
        self.witness.validate().map_err(|e| section_error("witness", e))?;
        self.stake.validate().map_err(|e| section_error("stake", e))?;
        self.challenge.validate().map_err(|e| section_error("challenge", e))?;
        self.consensus.validate().map_err(|e| section_error("consensus", e))?;
        self.gossip.validate().map_err(|e| section_error("gossip", e))?;
        self.economy.validate().map_err(|e| section_error("economy", e))?;
        Ok(())
    }
}

fn section_error(section: &str, error: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        field: section.to_string(),
        reason: error.to_string(),
    }
}

/// Builder for [`FederationConfig`].
#[derive(Clone, Debug, Default)]
pub struct FederationConfigBuilder {
    config: FederationConfig,
}

impl FederationConfigBuilder {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> FederationConfig {
        self.config
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn build_validated(self) -> Result<FederationConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }

    // ===== Node =====

    /// Set the tick interval.
    #[must_use]
    pub fn with_tick_interval_ms(mut self, ms: u64) -> Self {
        self.config.node.tick_interval_ms = ms;
        self
    }

    /// Set how long phase transitions tighten anti-gaming.
    #[must_use]
    pub fn with_tightening_secs(mut self, secs: i64) -> Self {
        self.config.node.tightening_secs = secs;
        self
    }

    /// Enable or disable automatic revocation proposals for flagged entities.
    #[must_use]
    pub fn with_auto_revoke_flagged(mut self, enabled: bool) -> Self {
        self.config.node.auto_revoke_flagged = enabled;
        self
    }

    /// Set the resources credited to new entities.
    #[must_use]
    pub fn with_initial_allocation(mut self, amount: u64) -> Self {
        self.config.node.initial_allocation = amount;
        self
    }

    // ===== Reputation =====

    /// Replace the engine configuration.
    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.config.engine = engine;
        self
    }

    /// Replace the witness policy.
    #[must_use]
    pub fn with_witness_policy(mut self, policy: WitnessPolicy) -> Self {
        self.config.witness = policy;
        self
    }

    /// Set the attestation count and society diversity requirements.
    #[must_use]
    pub fn with_witness_requirements(mut self, min_attestations: usize, min_distinct_societies: usize) -> Self {
        self.config.witness.min_attestations = min_attestations;
        self.config.witness.min_distinct_societies = min_distinct_societies;
        self
    }

    /// Replace the stake policy.
    #[must_use]
    pub fn with_stake_policy(mut self, policy: StakePolicy) -> Self {
        self.config.stake = policy;
        self
    }

    /// Replace the challenge policy.
    #[must_use]
    pub fn with_challenge_policy(mut self, policy: ChallengePolicy) -> Self {
        self.config.challenge = policy;
        self
    }

    // ===== Consensus =====

    /// Replace the consensus configuration.
    #[must_use]
    pub fn with_consensus(mut self, consensus: ConsensusConfig) -> Self {
        self.config.consensus = consensus;
        self
    }

    /// Set the round timeout.
    #[must_use]
    pub fn with_round_timeout_secs(mut self, secs: u64) -> Self {
        self.config.consensus.round_timeout_secs = secs;
        self
    }

    /// Set the number of rounds before a proposal aborts.
    #[must_use]
    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.config.consensus.max_rounds = rounds;
        self
    }

    // ===== Gossip =====

    /// Replace the gossip configuration.
    #[must_use]
    pub fn with_gossip(mut self, gossip: GossipConfig) -> Self {
        self.config.gossip = gossip;
        self
    }

    /// Set the gossip fanout.
    #[must_use]
    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.config.gossip.fanout = fanout;
        self
    }

    /// Enable or disable epidemic relaying.
    #[must_use]
    pub fn with_relay(mut self, relay: bool) -> Self {
        self.config.gossip.relay = relay;
        self
    }

    // ===== Economy =====

    /// Replace the economy configuration.
    #[must_use]
    pub fn with_economy(mut self, economy: EconomyConfig) -> Self {
        self.config.economy = economy;
        self
    }
}

/// Configuration error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// The field name.
        field: String,
        /// The reason it's invalid.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(String),

    /// The configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

impl ConfigError {
    fn invalid(field: &str, reason: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}
