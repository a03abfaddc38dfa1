//! Economic bonds for witnesses and identity sponsors.
//!
//! A stake is held per entity with a declared capability tier. The tier
//! sets the minimum bond a witness must hold for its attestations to
//! count. Slashing is computed in basis points with integer arithmetic and
//! is always capped at the current balance, so a balance never goes
//! negative.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use fidelis_crypto::Hash256;
use fidelis_identity::EntityId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{ReputationError, Result};

/// Basis points in 100%.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Default base minimum stake for the Normal tier.
pub const DEFAULT_BASE_MINIMUM: u64 = 1_000;

/// Default lock period after a deposit (7 days).
pub const DEFAULT_LOCK_PERIOD_SECS: i64 = 7 * 24 * 60 * 60;

/// Maximum slash events kept per stake.
pub const MAX_SLASH_HISTORY: usize = 1_024;

/// Declared privilege level of a staker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityTier {
    /// Routine witnessing.
    Normal,
    /// Elevated operations.
    High,
    /// Critical infrastructure operations.
    Critical,
    /// Emergency powers.
    Emergency,
}

impl CapabilityTier {
    /// Multiplier over the base minimum.
    #[must_use]
    pub const fn multiplier(self) -> u64 {
        match self {
            Self::Normal => 1,
            Self::High => 2,
            Self::Critical => 5,
            Self::Emergency => 10,
        }
    }
}

impl std::fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        };
        f.write_str(s)
    }
}

/// Stake requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StakePolicy {
    /// Minimum bond for the Normal tier.
    pub base_minimum: u64,
    /// How long a deposit locks the stake, in seconds.
    pub lock_period_secs: i64,
    /// Minimum bond to sponsor a new identity.
    pub identity_creation_minimum: u64,
}

impl Default for StakePolicy {
    fn default() -> Self {
        Self {
            base_minimum: DEFAULT_BASE_MINIMUM,
            lock_period_secs: DEFAULT_LOCK_PERIOD_SECS,
            identity_creation_minimum: DEFAULT_BASE_MINIMUM,
        }
    }
}

impl StakePolicy {
    /// Minimum stake for a tier.
    #[must_use]
    pub fn required_for(&self, tier: CapabilityTier) -> u64 {
        self.base_minimum.saturating_mul(tier.multiplier())
    }

    /// Lock period as a duration.
    #[must_use]
    pub fn lock_period(&self) -> Duration {
        Duration::seconds(self.lock_period_secs)
    }

    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` for a negative lock period.
    pub fn validate(&self) -> Result<()> {
        if self.lock_period_secs < 0 {
            return Err(ReputationError::InvalidValue {
                field: "stake.lock_period_secs",
                reason: "must not be negative".into(),
            });
        }
        Ok(())
    }
}

/// Why a stake was slashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlashReason {
    /// Conflicting consensus votes in one round.
    Equivocation {
        /// Proposal the conflicting votes were for.
        proposal: Hash256,
        /// Round of the conflict.
        round: u32,
    },
    /// Failure to answer a challenge in time.
    ChallengeEvasion {
        /// Strike number this evasion produced.
        strike: u32,
    },
    /// Slash finalized by federation consensus.
    ConsensusDecision {
        /// Proposal that decided the slash.
        proposal: Hash256,
    },
}

impl std::fmt::Display for SlashReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equivocation { round, .. } => write!(f, "equivocation in round {}", round),
            Self::ChallengeEvasion { strike } => write!(f, "challenge evasion (strike {})", strike),
            Self::ConsensusDecision { proposal } => {
                write!(f, "consensus decision {}", &proposal.to_hex()[..16])
            }
        }
    }
}

/// One entry of a stake's slash history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashEvent {
    /// Why it was slashed.
    pub reason: SlashReason,
    /// Amount removed.
    pub amount: u64,
    /// When.
    pub at: DateTime<Utc>,
}

/// A bond held by one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stake {
    owner: EntityId,
    tier: CapabilityTier,
    amount: u64,
    locked_until: DateTime<Utc>,
    history: Vec<SlashEvent>,
}

impl Stake {
    /// Owner of the stake.
    #[must_use]
    pub fn owner(&self) -> EntityId {
        self.owner
    }

    /// Declared capability tier.
    #[must_use]
    pub fn tier(&self) -> CapabilityTier {
        self.tier
    }

    /// Current balance.
    #[must_use]
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// End of the lock.
    #[must_use]
    pub fn locked_until(&self) -> DateTime<Utc> {
        self.locked_until
    }

    /// Slash history, oldest first.
    #[must_use]
    pub fn history(&self) -> &[SlashEvent] {
        &self.history
    }

    /// Sum of every slash.
    #[must_use]
    pub fn total_slashed(&self) -> u64 {
        self.history.iter().map(|e| e.amount).fold(0u64, u64::saturating_add)
    }
}

/// The stakes table of a node.
#[derive(Debug, Default)]
pub struct StakeLedger {
    policy: StakePolicy,
    stakes: RwLock<HashMap<EntityId, Stake>>,
}

impl StakeLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new(policy: StakePolicy) -> Self {
        Self {
            policy,
            stakes: RwLock::new(HashMap::new()),
        }
    }

    /// The stake policy.
    #[must_use]
    pub fn policy(&self) -> &StakePolicy {
        &self.policy
    }

    /// Deposit into an entity's stake, declaring its tier and extending
    /// the lock. Returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` for a zero amount or on overflow.
    pub fn deposit(
        &self,
        owner: EntityId,
        tier: CapabilityTier,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        if amount == 0 {
            return Err(ReputationError::InvalidValue {
                field: "amount",
                reason: "deposit must be positive".into(),
            });
        }
        let locked_until = now + self.policy.lock_period();
        let mut stakes = self.stakes.write();
        let stake = stakes.entry(owner).or_insert_with(|| Stake {
            owner,
            tier,
            amount: 0,
            locked_until,
            history: Vec::new(),
        });
        stake.amount = stake
            .amount
            .checked_add(amount)
            .ok_or_else(|| ReputationError::InvalidValue {
                field: "amount",
                reason: "stake overflow".into(),
            })?;
        stake.tier = tier;
        stake.locked_until = stake.locked_until.max(locked_until);
        debug!(owner = %owner, tier = %tier, amount, balance = stake.amount, "Stake deposited");
        Ok(stake.amount)
    }

    /// Withdraw from an unlocked stake. Returns the remaining balance.
    ///
    /// # Errors
    ///
    /// - `StakeNotFound` if the entity holds no stake
    /// - `StakeLocked` before the lock ends
    /// - `WithdrawalExceedsBalance` for more than the balance
    pub fn withdraw(&self, owner: &EntityId, amount: u64, now: DateTime<Utc>) -> Result<u64> {
        let mut stakes = self.stakes.write();
        let stake = stakes
            .get_mut(owner)
            .ok_or(ReputationError::StakeNotFound(*owner))?;
        if now < stake.locked_until {
            return Err(ReputationError::StakeLocked {
                until: stake.locked_until,
            });
        }
        if amount > stake.amount {
            return Err(ReputationError::WithdrawalExceedsBalance {
                requested: amount,
                available: stake.amount,
            });
        }
        stake.amount -= amount;
        debug!(owner = %owner, amount, balance = stake.amount, "Stake withdrawn");
        Ok(stake.amount)
    }

    /// Slash a percentage of a stake, in basis points.
    ///
    /// The amount is `floor(balance * bps / 10000)`, capped at the balance.
    ///
    /// # Errors
    ///
    /// Returns `StakeNotFound` or `InvalidValue` for `bps > 10000`.
    pub fn slash_bps(
        &self,
        owner: &EntityId,
        bps: u64,
        reason: SlashReason,
        now: DateTime<Utc>,
    ) -> Result<SlashEvent> {
        if bps > BPS_DENOMINATOR {
            return Err(ReputationError::InvalidValue {
                field: "bps",
                reason: format!("{} exceeds {}", bps, BPS_DENOMINATOR),
            });
        }
        let mut stakes = self.stakes.write();
        let stake = stakes
            .get_mut(owner)
            .ok_or(ReputationError::StakeNotFound(*owner))?;
        let amount = (u128::from(stake.amount) * u128::from(bps) / u128::from(BPS_DENOMINATOR)) as u64;
        Ok(Self::record_slash(stake, amount, reason, now))
    }

    /// Slash a fixed amount, capped at the balance.
    ///
    /// # Errors
    ///
    /// Returns `StakeNotFound` if the entity holds no stake.
    pub fn slash_amount(
        &self,
        owner: &EntityId,
        amount: u64,
        reason: SlashReason,
        now: DateTime<Utc>,
    ) -> Result<SlashEvent> {
        let mut stakes = self.stakes.write();
        let stake = stakes
            .get_mut(owner)
            .ok_or(ReputationError::StakeNotFound(*owner))?;
        Ok(Self::record_slash(stake, amount, reason, now))
    }

    fn record_slash(stake: &mut Stake, amount: u64, reason: SlashReason, now: DateTime<Utc>) -> SlashEvent {
        let amount = amount.min(stake.amount);
        stake.amount -= amount;
        let event = SlashEvent { reason, amount, at: now };
        if stake.history.len() >= MAX_SLASH_HISTORY {
            stake.history.remove(0);
        }
        stake.history.push(event.clone());
        info!(owner = %stake.owner, amount, reason = %event.reason, balance = stake.amount, "Stake slashed");
        event
    }

    /// Current balance (zero without a stake).
    #[must_use]
    pub fn balance(&self, owner: &EntityId) -> u64 {
        self.stakes.read().get(owner).map_or(0, Stake::amount)
    }

    /// Snapshot of a stake.
    #[must_use]
    pub fn stake(&self, owner: &EntityId) -> Option<Stake> {
        self.stakes.read().get(owner).cloned()
    }

    /// Whether the entity meets the minimum for its declared tier.
    #[must_use]
    pub fn meets_minimum(&self, owner: &EntityId) -> bool {
        self.check_witness(owner).is_ok()
    }

    /// Check a witness's bond against its tier minimum.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientStake` when under-bonded or unbonded.
    pub fn check_witness(&self, owner: &EntityId) -> Result<()> {
        let stakes = self.stakes.read();
        let (required, actual) = match stakes.get(owner) {
            Some(stake) => (self.policy.required_for(stake.tier), stake.amount),
            None => (self.policy.required_for(CapabilityTier::Normal), 0),
        };
        if actual < required {
            return Err(ReputationError::InsufficientStake {
                entity: *owner,
                required,
                actual,
            });
        }
        Ok(())
    }

    /// Whether the entity may sponsor a new identity.
    #[must_use]
    pub fn can_sponsor_identity(&self, owner: &EntityId) -> bool {
        self.balance(owner) >= self.policy.identity_creation_minimum
    }

    /// Total of all balances.
    #[must_use]
    pub fn total_staked(&self) -> u64 {
        self.stakes
            .read()
            .values()
            .map(Stake::amount)
            .fold(0u64, u64::saturating_add)
    }
}
