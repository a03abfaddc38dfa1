//! Witness diversity and stake validation.
//!
//! Decides whether an attestation set is strong enough for an event to
//! count. The validator only reads entity and stake records; it never
//! mutates state. Signature checks happen before validation, in the
//! engine.

use std::collections::{HashMap, HashSet};

use fidelis_identity::{EntityId, KeyDirectory};
use serde::{Deserialize, Serialize};

use crate::event::{Attestation, WitnessedEvent};
use crate::stake::StakeLedger;
use crate::{ReputationError, Result};

/// Attestation requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WitnessPolicy {
    /// Minimum number of distinct witnesses.
    pub min_attestations: usize,
    /// Minimum number of distinct witness societies.
    pub min_distinct_societies: usize,
    /// Maximum attestations one witness may supply per event.
    pub max_attestations_per_witness: usize,
    /// Accept events with no attestations at all.
    pub allow_self_reported: bool,
}

impl Default for WitnessPolicy {
    fn default() -> Self {
        Self {
            min_attestations: 3,
            min_distinct_societies: 3,
            max_attestations_per_witness: 1,
            allow_self_reported: false,
        }
    }
}

impl WitnessPolicy {
    /// A policy for bootstrap federations with fewer societies.
    #[must_use]
    pub fn relaxed(min_attestations: usize, min_distinct_societies: usize) -> Self {
        Self {
            min_attestations,
            min_distinct_societies,
            ..Self::default()
        }
    }

    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if more societies than witnesses are
    /// required or a witness may supply no attestations.
    pub fn validate(&self) -> Result<()> {
        if self.min_distinct_societies > self.min_attestations {
            return Err(ReputationError::InvalidValue {
                field: "witness.min_distinct_societies",
                reason: "cannot exceed min_attestations".into(),
            });
        }
        if self.max_attestations_per_witness == 0 {
            return Err(ReputationError::InvalidValue {
                field: "witness.max_attestations_per_witness",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Why an attestation set was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiversityViolation {
    /// No attestations and self-reporting is not allowed.
    SelfReported,
    /// Too few distinct witnesses.
    TooFewAttestations {
        /// Distinct witnesses supplied.
        got: usize,
        /// Required.
        required: usize,
    },
    /// Witnesses span too few societies.
    TooFewSocieties {
        /// Distinct societies supplied.
        got: usize,
        /// Required.
        required: usize,
    },
    /// One witness supplied too many attestations.
    DuplicateWitness(EntityId),
    /// The subject attested its own event.
    SelfAttestation(EntityId),
    /// Witness is not registered.
    UnknownWitness(EntityId),
    /// Witness is revoked.
    RevokedWitness(EntityId),
    /// Witness is not listed on the event.
    UnlistedWitness(EntityId),
}

impl std::fmt::Display for DiversityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SelfReported => write!(f, "self-reported event without attestations"),
            Self::TooFewAttestations { got, required } => {
                write!(f, "{} distinct witnesses, {} required", got, required)
            }
            Self::TooFewSocieties { got, required } => {
                write!(f, "{} distinct societies, {} required", got, required)
            }
            Self::DuplicateWitness(id) => write!(f, "witness {} attested more than allowed", id),
            Self::SelfAttestation(id) => write!(f, "subject {} attested its own event", id),
            Self::UnknownWitness(id) => write!(f, "witness {} is not registered", id),
            Self::RevokedWitness(id) => write!(f, "witness {} is revoked", id),
            Self::UnlistedWitness(id) => write!(f, "witness {} is not listed on the event", id),
        }
    }
}

impl From<DiversityViolation> for ReputationError {
    fn from(v: DiversityViolation) -> Self {
        Self::InsufficientWitnessDiversity(v)
    }
}

/// Validates attestation sets against a [`WitnessPolicy`].
pub struct WitnessValidator<'a> {
    policy: &'a WitnessPolicy,
    keys: &'a dyn KeyDirectory,
    stakes: &'a StakeLedger,
}

impl<'a> WitnessValidator<'a> {
    /// Create a validator over the given records.
    #[must_use]
    pub fn new(policy: &'a WitnessPolicy, keys: &'a dyn KeyDirectory, stakes: &'a StakeLedger) -> Self {
        Self { policy, keys, stakes }
    }

    /// Check an attestation set for `event`.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientWitnessDiversity` or `InsufficientStake`.
    pub fn validate_attestations(&self, event: &WitnessedEvent, attestations: &[Attestation]) -> Result<()> {
        if attestations.is_empty() {
            if self.policy.allow_self_reported {
                return Ok(());
            }
            return Err(DiversityViolation::SelfReported.into());
        }

        let subject = event.subject();
        let mut per_witness: HashMap<EntityId, usize> = HashMap::new();
        let mut societies = HashSet::new();

        for attestation in attestations {
            let witness = attestation.witness();
            if witness == subject {
                return Err(DiversityViolation::SelfAttestation(witness).into());
            }
            let society = self
                .keys
                .society_of(&witness)
                .ok_or(DiversityViolation::UnknownWitness(witness))?;
            if self.keys.is_revoked(&witness) {
                return Err(DiversityViolation::RevokedWitness(witness).into());
            }
            if !event.lists_witness(&witness) {
                return Err(DiversityViolation::UnlistedWitness(witness).into());
            }
            let count = per_witness.entry(witness).or_insert(0);
            *count += 1;
            if *count > self.policy.max_attestations_per_witness {
                return Err(DiversityViolation::DuplicateWitness(witness).into());
            }
            societies.insert(society);
        }

        if per_witness.len() < self.policy.min_attestations {
            return Err(DiversityViolation::TooFewAttestations {
                got: per_witness.len(),
                required: self.policy.min_attestations,
            }
            .into());
        }
        if societies.len() < self.policy.min_distinct_societies {
            return Err(DiversityViolation::TooFewSocieties {
                got: societies.len(),
                required: self.policy.min_distinct_societies,
            }
            .into());
        }

        let mut witnesses: Vec<&EntityId> = per_witness.keys().collect();
        witnesses.sort();
        for witness in witnesses {
            self.stakes.check_witness(witness)?;
        }
        Ok(())
    }
}
