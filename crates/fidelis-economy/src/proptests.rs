//! Property-based tests for ledger conservation and metric bounds.

use chrono::{Duration, TimeZone, Utc};
use fidelis_identity::{EntityId, EntityKeyPair};
use proptest::prelude::*;

use crate::market::{crisis_risk, market_efficiency, market_gamma, pearson};
use crate::{LedgerConfig, PhaseBands, PhaseDetector, ResourceLedger};

#[derive(Debug, Clone)]
enum Op {
    Earn(usize, u64),
    Spend(usize, u64),
    Commit(usize, u64),
    Release(usize, u64),
    Transfer(usize, usize, u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..3, 1u64..50).prop_map(|(a, n)| Op::Earn(a, n)),
        (0usize..3, 1u64..50).prop_map(|(a, n)| Op::Spend(a, n)),
        (0usize..3, 1u64..50).prop_map(|(a, n)| Op::Commit(a, n)),
        (0usize..3, 1u64..50).prop_map(|(a, n)| Op::Release(a, n)),
        (0usize..3, 0usize..3, 1u64..50).prop_map(|(a, b, n)| Op::Transfer(a, b, n)),
    ]
}

proptest! {
    /// Holdings always equal lifetime inflow minus outflow, and coherence
    /// stays in [0, 1], whatever mix of operations succeeds or fails.
    #[test]
    fn ledger_conserves_and_bounds_coherence(ops in prop::collection::vec(op(), 1..60)) {
        let ids: Vec<EntityId> = (1..=3u8).map(|s| EntityKeyPair::from_seed(&[s; 32]).id()).collect();
        let ledger = ResourceLedger::new(LedgerConfig::default()).unwrap();
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for id in &ids {
            ledger.open_account(*id, 100, start).unwrap();
        }
        for (i, op) in ops.into_iter().enumerate() {
            let now = start + Duration::seconds(i as i64 * 30);
            let _ = match op {
                Op::Earn(a, n) => ledger.earn(&ids[a], n, now).map(|_| ()),
                Op::Spend(a, n) => ledger.spend(&ids[a], n, now).map(|_| ()),
                Op::Commit(a, n) => ledger.commit(&ids[a], n, now).map(|_| ()),
                Op::Release(a, n) => ledger.release(&ids[a], n, now).map(|_| ()),
                Op::Transfer(a, b, n) => ledger.transfer(&ids[a], &ids[b], n, now),
            };
        }
        for id in &ids {
            let account = ledger.account(id).unwrap();
            prop_assert_eq!(account.holdings(), account.earned - account.spent);
            prop_assert!((0.0..=1.0).contains(&account.coherence));
        }
    }

    #[test]
    fn pearson_is_bounded_and_symmetric(
        a in prop::collection::vec(-100.0f64..100.0, 0..32),
        b in prop::collection::vec(-100.0f64..100.0, 0..32),
    ) {
        let r = pearson(&a, &b);
        prop_assert!((-1.0..=1.0).contains(&r));
        prop_assert!((r - pearson(&b, &a)).abs() < 1e-9);
    }

    #[test]
    fn gamma_and_risk_are_bounded(n in 0usize..10_000, coherence in 0.0f64..=1.0) {
        let gamma = market_gamma(n);
        prop_assert!(gamma > 0.0 && gamma <= 2.0);
        let efficiency = market_efficiency(gamma);
        prop_assert!(efficiency > -1.0 && efficiency < 1.0);
        prop_assert!((0.0..=1.0).contains(&crisis_risk(gamma, efficiency, coherence)));
    }

    /// Adjacent-band moves away from crisis never raise a transition.
    #[test]
    fn single_steps_outside_crisis_are_quiet(gammas in prop::collection::vec(0.2f64..2.0, 1..40)) {
        let bands = PhaseBands::default();
        let mut detector = PhaseDetector::new(bands);
        let mut previous: Option<u8> = None;
        for gamma in gammas {
            let index = bands.classify(gamma).index();
            let fired = detector.observe(gamma, Utc::now()).is_some();
            match previous {
                None => prop_assert!(!fired),
                Some(p) => prop_assert_eq!(fired, p.abs_diff(index) > 1),
            }
            previous = Some(index);
        }
    }
}
