//! Shared test fixtures: an in-memory validator cluster.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use fidelis_identity::{Entity, EntityId, EntityKeyPair, EntityKind, EntityRegistry, KeyDirectory, SocietyId};

use crate::{ConsensusAction, ConsensusConfig, ConsensusCoordinator, ConsensusMessage, ValidatorSet};

pub(crate) struct Cluster {
    pub keys: Vec<Arc<EntityKeyPair>>,
    /// Registered entity outside the validator set.
    pub outsider: Arc<EntityKeyPair>,
    pub directory: Arc<dyn KeyDirectory>,
    pub nodes: Vec<ConsensusCoordinator>,
    pub now: DateTime<Utc>,
    config: ConsensusConfig,
}

impl Cluster {
    pub fn new(n: u8) -> Self {
        Self::with_config(n, ConsensusConfig::default())
    }

    pub fn with_config(n: u8, config: ConsensusConfig) -> Self {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let keys: Vec<Arc<EntityKeyPair>> = (1..=n)
            .map(|i| Arc::new(EntityKeyPair::from_seed(&[i; 32])))
            .collect();
        let outsider = Arc::new(EntityKeyPair::from_seed(&[200; 32]));

        let mut registry = EntityRegistry::new();
        for (i, key) in keys.iter().chain(std::iter::once(&outsider)).enumerate() {
            registry
                .register(Entity::new(
                    *key.public_key(),
                    EntityKind::Organization,
                    SocietyId::new(format!("s{i}")).unwrap(),
                    now,
                ))
                .unwrap();
        }
        let directory: Arc<dyn KeyDirectory> = Arc::new(registry);
        let validators = ValidatorSet::new(keys.iter().map(|k| k.id())).unwrap();
        let nodes = keys
            .iter()
            .map(|k| ConsensusCoordinator::new(k.clone(), directory.clone(), validators.clone(), config.clone()).unwrap())
            .collect();

        Self {
            keys,
            outsider,
            directory,
            nodes,
            now,
            config,
        }
    }

    /// A coordinator for the outsider, which follows but never votes.
    pub fn observer(&self) -> ConsensusCoordinator {
        ConsensusCoordinator::new(
            self.outsider.clone(),
            self.directory.clone(),
            self.nodes[0].validators().clone(),
            self.config.clone(),
        )
        .unwrap()
    }

    pub fn index_of(&self, id: &EntityId) -> usize {
        self.keys.iter().position(|k| k.id() == *id).unwrap()
    }
}

/// Route broadcast actions to every other node until quiet.
///
/// Nodes listed in `offline` receive nothing. Returns every action emitted,
/// tagged with the emitting node.
pub(crate) fn deliver(
    nodes: &mut [ConsensusCoordinator],
    seeds: Vec<(usize, Vec<ConsensusAction>)>,
    now: DateTime<Utc>,
    offline: &[usize],
) -> Vec<(usize, ConsensusAction)> {
    let mut queue: VecDeque<(usize, ConsensusMessage)> = VecDeque::new();
    let mut log = Vec::new();
    let mut push = |from: usize, actions: Vec<ConsensusAction>, queue: &mut VecDeque<_>| {
        for action in actions {
            if let Some(message) = action.to_message() {
                queue.push_back((from, message));
            }
            log.push((from, action));
        }
    };
    for (from, actions) in seeds {
        push(from, actions, &mut queue);
    }
    while let Some((from, message)) = queue.pop_front() {
        for (i, node) in nodes.iter_mut().enumerate() {
            if i == from || offline.contains(&i) {
                continue;
            }
            let out = node.handle_message(message.clone(), now);
            push(i, out, &mut queue);
        }
    }
    log
}
