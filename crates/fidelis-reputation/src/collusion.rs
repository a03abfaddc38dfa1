//! Collusion detection via witness graph analysis.
//!
//! Detectors see every accepted witness relationship (`witness -> subject`)
//! and judge whether a new delta for a subject looks like mutual
//! back-scratching. The engine depends only on the [`PatternDetector`]
//! trait, so strategies can be swapped without touching the update path.
//!
//! Flagging is advisory: a suspect delta is reduced and logged, never
//! rejected.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use fidelis_identity::EntityId;
use serde::{Deserialize, Serialize};

/// Suspicion threshold for neighborhood density analysis (70%).
pub const CLUSTER_SUSPICION_THRESHOLD: f64 = 0.7;

/// Minimum neighborhood size for density analysis.
pub const MIN_CLUSTER_SIZE: usize = 3;

/// Maximum edges a witness graph keeps before dropping the stalest.
pub const MAX_TRACKED_EDGES: usize = 200_000;

/// Largest mutual-witness component explored for one assessment.
pub const MAX_COMPONENT_SIZE: usize = 4_096;

/// A detector's judgment on a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternVerdict {
    /// Whether the subject's latest delta should be flagged.
    pub suspect: bool,
    /// Suspicion in `[0, 1]`.
    pub score: f64,
    /// Human-readable explanation when suspect.
    pub reason: Option<String>,
}

impl PatternVerdict {
    /// A verdict that flags nothing.
    #[must_use]
    pub fn clear() -> Self {
        Self {
            suspect: false,
            score: 0.0,
            reason: None,
        }
    }
}

/// A pluggable collusion heuristic.
pub trait PatternDetector: Send + Sync + std::fmt::Debug {
    /// Short strategy name for logs.
    fn name(&self) -> &'static str;

    /// Record that each of `witnesses` attested an event of `subject`.
    fn observe(&mut self, subject: &EntityId, witnesses: &[EntityId], at: DateTime<Utc>);

    /// Judge an event of `subject` attested by `witnesses`, using
    /// relationships seen at or after `since`.
    fn assess(&self, subject: &EntityId, witnesses: &[EntityId], since: DateTime<Utc>) -> PatternVerdict;

    /// Forget relationships last seen before `before`.
    fn prune(&mut self, before: DateTime<Utc>);
}

/// Records how often one identity witnessed another.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WitnessRecord {
    /// Number of attestations.
    pub count: u32,
    /// First attestation.
    pub first_seen: DateTime<Utc>,
    /// Most recent attestation.
    pub last_seen: DateTime<Utc>,
}

/// Directed witness graph: `subject -> (witness -> record)`.
#[derive(Clone, Debug, Default)]
pub struct WitnessGraph {
    incoming: HashMap<EntityId, HashMap<EntityId, WitnessRecord>>,
    edges: usize,
}

impl WitnessGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `witness -> subject`.
    pub fn record(&mut self, subject: &EntityId, witness: &EntityId, at: DateTime<Utc>) {
        if subject == witness {
            return;
        }
        let by_witness = self.incoming.entry(*subject).or_default();
        match by_witness.get_mut(witness) {
            Some(record) => {
                record.count = record.count.saturating_add(1);
                record.last_seen = record.last_seen.max(at);
            }
            None => {
                by_witness.insert(
                    *witness,
                    WitnessRecord {
                        count: 1,
                        first_seen: at,
                        last_seen: at,
                    },
                );
                self.edges += 1;
            }
        }
        if self.edges > MAX_TRACKED_EDGES {
            self.drop_stalest();
        }
    }

    /// Witnesses of `subject` seen at or after `since`.
    #[must_use]
    pub fn witnesses_of(&self, subject: &EntityId, since: DateTime<Utc>) -> HashSet<EntityId> {
        self.incoming
            .get(subject)
            .map(|m| {
                m.iter()
                    .filter(|(_, r)| r.last_seen >= since)
                    .map(|(w, _)| *w)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Attestation count of `witness -> subject` within the window.
    #[must_use]
    pub fn count(&self, witness: &EntityId, subject: &EntityId, since: DateTime<Utc>) -> u32 {
        self.incoming
            .get(subject)
            .and_then(|m| m.get(witness))
            .filter(|r| r.last_seen >= since)
            .map_or(0, |r| r.count)
    }

    /// Whether `a` and `b` witnessed each other within the window.
    #[must_use]
    pub fn is_mutual(&self, a: &EntityId, b: &EntityId, since: DateTime<Utc>) -> bool {
        self.count(a, b, since) > 0 && self.count(b, a, since) > 0
    }

    /// Undirected neighbors of `id` within the window.
    #[must_use]
    pub fn neighbors(&self, id: &EntityId, since: DateTime<Utc>) -> HashSet<EntityId> {
        let mut out = self.witnesses_of(id, since);
        for (subject, by_witness) in &self.incoming {
            if let Some(record) = by_witness.get(id) {
                if record.last_seen >= since {
                    out.insert(*subject);
                }
            }
        }
        out
    }

    /// Identities reachable from `id` over mutual witness edges within the
    /// window, `id` included.
    #[must_use]
    pub fn mutual_component(&self, id: &EntityId, since: DateTime<Utc>) -> HashSet<EntityId> {
        let mut component = HashSet::from([*id]);
        let mut frontier = vec![*id];
        while let Some(member) = frontier.pop() {
            for other in self.witnesses_of(&member, since) {
                if component.len() >= MAX_COMPONENT_SIZE {
                    return component;
                }
                if !component.contains(&other) && self.count(&member, &other, since) > 0 {
                    component.insert(other);
                    frontier.push(other);
                }
            }
        }
        component
    }

    /// Remove edges last seen before `before`.
    pub fn prune(&mut self, before: DateTime<Utc>) {
        let mut removed = 0;
        self.incoming.retain(|_, by_witness| {
            let len = by_witness.len();
            by_witness.retain(|_, r| r.last_seen >= before);
            removed += len - by_witness.len();
            !by_witness.is_empty()
        });
        self.edges -= removed;
    }

    /// Number of directed edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges
    }

    fn drop_stalest(&mut self) {
        let stalest = self
            .incoming
            .iter()
            .flat_map(|(s, m)| m.iter().map(move |(w, r)| (*s, *w, r.last_seen)))
            .min_by_key(|(_, _, at)| *at);
        if let Some((subject, witness, _)) = stalest {
            if let Some(by_witness) = self.incoming.get_mut(&subject) {
                if by_witness.remove(&witness).is_some() {
                    self.edges -= 1;
                }
                if by_witness.is_empty() {
                    self.incoming.remove(&subject);
                }
            }
        }
    }
}

/// Flags an event attested only from inside the subject's mutual-witness
/// group.
///
/// The group is the subject's connected component over mutual witness
/// edges in the window. A witness is inside the group if it is a member,
/// or if every relationship it has besides the subject is with a member.
/// A witness with no other relationships counts as outside. The event is
/// suspect iff the group has more than one member and none of the event's
/// witnesses is outside it.
#[derive(Debug, Default)]
pub struct MutualWitnessDetector {
    graph: WitnessGraph,
}

impl MutualWitnessDetector {
    /// Create a detector with an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying graph.
    #[must_use]
    pub fn graph(&self) -> &WitnessGraph {
        &self.graph
    }
}

impl PatternDetector for MutualWitnessDetector {
    fn name(&self) -> &'static str {
        "mutual-witness"
    }

    fn observe(&mut self, subject: &EntityId, witnesses: &[EntityId], at: DateTime<Utc>) {
        for witness in witnesses {
            self.graph.record(subject, witness, at);
        }
    }

    fn assess(&self, subject: &EntityId, witnesses: &[EntityId], since: DateTime<Utc>) -> PatternVerdict {
        let witnesses: HashSet<EntityId> = witnesses.iter().filter(|w| *w != subject).copied().collect();
        if witnesses.is_empty() {
            return PatternVerdict::clear();
        }
        let group = self.graph.mutual_component(subject, since);
        let inside = witnesses
            .iter()
            .filter(|w| {
                if group.contains(w) {
                    return true;
                }
                let mut others = self.graph.neighbors(w, since);
                others.remove(subject);
                !others.is_empty() && others.is_subset(&group)
            })
            .count();
        let score = inside as f64 / witnesses.len() as f64;
        if group.len() > 1 && inside == witnesses.len() {
            PatternVerdict {
                suspect: true,
                score,
                reason: Some(format!(
                    "closed mutual-witness group of {} with no external witnesses",
                    group.len()
                )),
            }
        } else {
            PatternVerdict {
                suspect: false,
                score,
                reason: None,
            }
        }
    }

    fn prune(&mut self, before: DateTime<Utc>) {
        self.graph.prune(before);
    }
}

/// Scores the subject's closed neighborhood by internal density,
/// symmetry and external connectivity.
///
/// High internal density, symmetric attestation counts and few external
/// edges push the score up; the delta is suspect once the score reaches
/// the configured threshold.
#[derive(Debug)]
pub struct ClusterDensityDetector {
    graph: WitnessGraph,
    threshold: f64,
}

impl Default for ClusterDensityDetector {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl ClusterDensityDetector {
    /// Create a detector that flags at `threshold`.
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self {
            graph: WitnessGraph::new(),
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Symmetry of attestation counts between two identities.
    /// 1.0 = perfectly symmetric.
    fn symmetry(&self, a: &EntityId, b: &EntityId, since: DateTime<Utc>) -> f64 {
        let ab = f64::from(self.graph.count(a, b, since));
        let ba = f64::from(self.graph.count(b, a, since));
        let max = ab.max(ba);
        if max == 0.0 {
            0.0
        } else {
            ab.min(ba) / max
        }
    }

    fn suspicion(&self, subject: &EntityId, since: DateTime<Utc>) -> f64 {
        let mut members = self.graph.neighbors(subject, since);
        members.insert(*subject);
        if members.len() < MIN_CLUSTER_SIZE {
            return 0.0;
        }

        let mut internal = 0u64;
        let mut external = 0u64;
        let mut symmetry_total = 0.0;
        let mut symmetry_pairs = 0u32;

        for member in &members {
            for neighbor in self.graph.neighbors(member, since) {
                let weight = u64::from(self.graph.count(member, &neighbor, since))
                    + u64::from(self.graph.count(&neighbor, member, since));
                if members.contains(&neighbor) {
                    internal += weight;
                    symmetry_total += self.symmetry(member, &neighbor, since);
                    symmetry_pairs += 1;
                } else {
                    external += weight;
                }
            }
        }

        // Internal edges were visited from both ends.
        let internal = internal / 2;
        let total = internal + external;
        if total == 0 {
            return 0.0;
        }

        let density = internal as f64 / total as f64;
        let symmetry = if symmetry_pairs > 0 {
            symmetry_total / f64::from(symmetry_pairs)
        } else {
            0.0
        };
        let external_ratio = external as f64 / total as f64;

        let density_factor = if density > CLUSTER_SUSPICION_THRESHOLD {
            (density - CLUSTER_SUSPICION_THRESHOLD) / (1.0 - CLUSTER_SUSPICION_THRESHOLD)
        } else {
            0.0
        };
        let symmetry_factor = if symmetry > 0.8 { (symmetry - 0.8) / 0.2 } else { 0.0 };
        let external_factor = if external_ratio < 0.3 {
            (0.3 - external_ratio) / 0.3
        } else {
            0.0
        };

        (density_factor * 0.4 + symmetry_factor * 0.3 + external_factor * 0.3).clamp(0.0, 1.0)
    }
}

impl PatternDetector for ClusterDensityDetector {
    fn name(&self) -> &'static str {
        "cluster-density"
    }

    fn observe(&mut self, subject: &EntityId, witnesses: &[EntityId], at: DateTime<Utc>) {
        for witness in witnesses {
            self.graph.record(subject, witness, at);
        }
    }

    fn assess(&self, subject: &EntityId, _witnesses: &[EntityId], since: DateTime<Utc>) -> PatternVerdict {
        let score = self.suspicion(subject, since);
        if score >= self.threshold {
            PatternVerdict {
                suspect: true,
                score,
                reason: Some(format!("dense symmetric neighborhood (score {:.2})", score)),
            }
        } else {
            PatternVerdict {
                suspect: false,
                score,
                reason: None,
            }
        }
    }

    fn prune(&mut self, before: DateTime<Utc>) {
        self.graph.prune(before);
    }
}
