//! Test fixtures: a small registered, staked federation.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use fidelis_identity::{Entity, EntityId, EntityKeyPair, EntityKind, EntityRegistry, SharedRegistry, SocietyId};

use crate::event::{ActionDescriptor, Attestation, Outcome, WitnessedEvent};
use crate::stake::{CapabilityTier, StakeLedger, StakePolicy};
use crate::tensor::ContextId;

pub(crate) struct Federation {
    pub registry: SharedRegistry,
    pub stakes: Arc<StakeLedger>,
    pub keys: Vec<EntityKeyPair>,
    pub now: DateTime<Utc>,
    pub context: ContextId,
}

impl Federation {
    /// One entity per entry, in the named society, each staked at the
    /// Normal tier minimum.
    pub fn with_societies(societies: &[&str]) -> Self {
        let registry = EntityRegistry::shared();
        let stakes = Arc::new(StakeLedger::new(StakePolicy::default()));
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut keys = Vec::new();
        for (i, society) in societies.iter().enumerate() {
            let mut seed = [0u8; 32];
            seed[..8].copy_from_slice(&(i as u64 + 1).to_le_bytes());
            let key = EntityKeyPair::from_seed(&seed);
            let entity = Entity::new(
                *key.public_key(),
                EntityKind::SoftwareAgent,
                SocietyId::new(*society).unwrap(),
                now,
            );
            registry.write().register(entity).unwrap();
            stakes.deposit(key.id(), CapabilityTier::Normal, 1_000, now).unwrap();
            keys.push(key);
        }
        Self {
            registry,
            stakes,
            keys,
            now,
            context: ContextId::new("role:analyst").unwrap(),
        }
    }

    pub fn key(&self, i: usize) -> &EntityKeyPair {
        &self.keys[i]
    }

    pub fn id(&self, i: usize) -> EntityId {
        self.keys[i].id()
    }

    pub fn event(&self, subject: usize, outcome: Outcome, sequence: u64) -> WitnessedEvent {
        self.event_with_action(subject, "task", outcome, sequence)
    }

    pub fn event_with_action(&self, subject: usize, action: &str, outcome: Outcome, sequence: u64) -> WitnessedEvent {
        WitnessedEvent::new(
            self.key(subject),
            self.context.clone(),
            ActionDescriptor::new(action).unwrap(),
            outcome,
            self.now,
            sequence,
        )
        .unwrap()
    }

    /// An event by `subject` marked and attested by each of `witnesses`.
    pub fn witnessed(
        &self,
        subject: usize,
        witnesses: &[usize],
        outcome: Outcome,
        sequence: u64,
    ) -> (WitnessedEvent, Vec<Attestation>) {
        self.witnessed_action(subject, witnesses, "task", outcome, sequence)
    }

    pub fn witnessed_action(
        &self,
        subject: usize,
        witnesses: &[usize],
        action: &str,
        outcome: Outcome,
        sequence: u64,
    ) -> (WitnessedEvent, Vec<Attestation>) {
        let mut event = self.event_with_action(subject, action, outcome, sequence);
        for w in witnesses {
            event.add_witness(self.key(*w)).unwrap();
        }
        let atts = witnesses
            .iter()
            .map(|w| Attestation::sign(self.key(*w), &event, self.now).unwrap())
            .collect();
        (event, atts)
    }
}
