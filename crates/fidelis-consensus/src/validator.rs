//! The fixed validator set and quorum arithmetic.

use fidelis_identity::EntityId;
use serde::{Deserialize, Serialize};

use crate::{ConsensusError, Result};

/// BFT quorum for `n` validators: `floor(2n/3) + 1`.
///
/// Equals `2f + 1` when `n = 3f + 1`. Any two quorums intersect in more
/// than `n/3` validators.
#[must_use]
pub fn bft_quorum(n: usize) -> usize {
    n * 2 / 3 + 1
}

/// Validators sorted by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    members: Vec<EntityId>,
}

impl ValidatorSet {
    /// Build a set, sorting and deduplicating.
    ///
    /// # Errors
    ///
    /// Returns `EmptyValidatorSet` if no validators are given.
    pub fn new(members: impl IntoIterator<Item = EntityId>) -> Result<Self> {
        let mut members: Vec<EntityId> = members.into_iter().collect();
        members.sort();
        members.dedup();
        if members.is_empty() {
            return Err(ConsensusError::EmptyValidatorSet);
        }
        Ok(Self { members })
    }

    /// Number of validators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false; construction rejects empty sets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Quorum size for this set.
    #[must_use]
    pub fn quorum(&self) -> usize {
        bft_quorum(self.members.len())
    }

    /// Maximum tolerated faulty validators.
    #[must_use]
    pub fn max_faulty(&self) -> usize {
        (self.members.len() - 1) / 3
    }

    /// Whether `id` is a validator.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.members.binary_search(id).is_ok()
    }

    /// Position of `id` in id order.
    #[must_use]
    pub fn index_of(&self, id: &EntityId) -> Option<usize> {
        self.members.binary_search(id).ok()
    }

    /// Proposer for `round` of a proposal first raised by `origin`.
    ///
    /// Round 0 belongs to the origin; each later round moves to the next
    /// validator in id order, wrapping around.
    #[must_use]
    pub fn proposer_for(&self, origin: &EntityId, round: u32) -> Option<EntityId> {
        let start = self.index_of(origin)?;
        let idx = (start + round as usize) % self.members.len();
        Some(self.members[idx])
    }

    /// Validators in id order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityId> {
        self.members.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fidelis_identity::EntityKeyPair;

    fn ids(n: u8) -> Vec<EntityId> {
        (1..=n).map(|i| EntityKeyPair::from_seed(&[i; 32]).id()).collect()
    }

    #[test]
    fn test_bft_quorum_sizes() {
        assert_eq!(bft_quorum(1), 1);
        assert_eq!(bft_quorum(3), 3);
        assert_eq!(bft_quorum(4), 3);
        assert_eq!(bft_quorum(7), 5);
        assert_eq!(bft_quorum(10), 7);
        assert_eq!(bft_quorum(21), 15);
    }

    #[test]
    fn test_bft_quorum_intersection() {
        for n in 1..=100 {
            let q = bft_quorum(n);
            assert!(2 * q > n, "two quorums must intersect for n={n}");
            assert!(q <= n);
        }
    }

    #[test]
    fn test_set_is_sorted_and_deduplicated() {
        let mut input = ids(4);
        input.push(input[0]);
        input.reverse();
        let set = ValidatorSet::new(input).unwrap();
        assert_eq!(set.len(), 4);
        let members: Vec<_> = set.iter().copied().collect();
        let mut sorted = members.clone();
        sorted.sort();
        assert_eq!(members, sorted);
        assert_eq!(set.max_faulty(), 1);
    }

    #[test]
    fn test_empty_set_rejected() {
        assert!(matches!(ValidatorSet::new(Vec::new()), Err(ConsensusError::EmptyValidatorSet)));
    }

    #[test]
    fn test_proposer_rotation_wraps() {
        let set = ValidatorSet::new(ids(4)).unwrap();
        let ordered: Vec<_> = set.iter().copied().collect();
        assert_eq!(set.proposer_for(&ordered[2], 0), Some(ordered[2]));
        assert_eq!(set.proposer_for(&ordered[2], 1), Some(ordered[3]));
        assert_eq!(set.proposer_for(&ordered[2], 2), Some(ordered[0]));
        let outsider = EntityKeyPair::from_seed(&[99; 32]).id();
        assert_eq!(set.proposer_for(&outsider, 0), None);
    }
}
