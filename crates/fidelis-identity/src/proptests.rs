//! Property-based tests for identity types.

use chrono::Utc;
use proptest::prelude::*;

use crate::{Entity, EntityId, EntityKeyPair, EntityKind, EntityRegistry, KeyDirectory, SocietyId};

fn arb_kind() -> impl Strategy<Value = EntityKind> {
    prop_oneof![
        Just(EntityKind::Human),
        Just(EntityKind::SoftwareAgent),
        Just(EntityKind::HardwareAgent),
        Just(EntityKind::Organization),
        Just(EntityKind::Role),
        Just(EntityKind::Resource),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Distinct seeds yield distinct ids.
    #[test]
    fn distinct_seeds_distinct_ids(a: [u8; 32], b: [u8; 32]) {
        prop_assume!(a != b);
        let ida = EntityKeyPair::from_seed(&a).id();
        let idb = EntityKeyPair::from_seed(&b).id();
        prop_assert_ne!(ida, idb);
    }

    /// Hex parsing never panics.
    #[test]
    fn from_hex_never_panics(s in "[0-9a-fA-FxyZ]{0,70}") {
        let _ = EntityId::from_hex(&s);
    }

    /// Once revoked, an entity stays revoked whatever is revoked after it.
    #[test]
    fn revocation_never_reverses(seeds in prop::collection::vec(any::<[u8; 32]>(), 1..8), kind in arb_kind()) {
        let mut registry = EntityRegistry::new();
        let mut ids = Vec::new();
        for seed in &seeds {
            let keypair = EntityKeyPair::from_seed(seed);
            let entity = Entity::new(*keypair.public_key(), kind, SocietyId::new("s").unwrap(), Utc::now());
            if let Ok(id) = registry.register(entity) {
                ids.push(id);
            }
        }
        let first = ids[0];
        registry.revoke(&first, Utc::now()).unwrap();
        for id in &ids {
            let _ = registry.revoke(id, Utc::now());
            prop_assert!(registry.is_revoked(&first));
        }
    }
}
