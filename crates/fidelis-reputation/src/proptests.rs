//! Property-based tests for trust bounds, replay handling and stake math.

use std::sync::Arc;

use chrono::Duration;
use proptest::prelude::*;

use crate::fixtures::Federation;
use crate::{
    AuditLog, ChallengeAuditor, ChallengePolicy, DecayConfig, EngineConfig, Outcome, ReputationEngine,
    SlashReason, StakeLedger, StakePolicy, WitnessPolicy,
};

fn arb_outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![Just(Outcome::Success), Just(Outcome::Failure), Just(Outcome::Disputed)]
}

fn open_engine(fed: &Federation, config: EngineConfig) -> ReputationEngine {
    ReputationEngine::new(
        config,
        WitnessPolicy { allow_self_reported: true, ..WitnessPolicy::relaxed(0, 0) },
        fed.registry.clone(),
        fed.stakes.clone(),
        Arc::new(ChallengeAuditor::new(ChallengePolicy::default())),
        Arc::new(AuditLog::new()),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every dimension and the aggregate stay in [0, 1] for any event stream,
    /// including large impacts and long gaps between events.
    #[test]
    fn trust_stays_bounded(
        steps in prop::collection::vec((arb_outcome(), 0i64..200_000, 0usize..4), 1..60),
        scale in 1.0f64..40.0,
    ) {
        let fed = Federation::with_societies(&["s0"]);
        let mut config = EngineConfig::default();
        for table in [&mut config.impacts.success, &mut config.impacts.failure, &mut config.impacts.disputed] {
            for v in table.iter_mut() {
                *v = (*v * scale).clamp(-1.0, 1.0);
            }
        }
        let engine = open_engine(&fed, config);
        let actions = ["task", "review", "deploy", "audit"];
        let mut now = fed.now;
        for (seq, (outcome, gap, action)) in steps.into_iter().enumerate() {
            now += Duration::seconds(gap);
            let event = crate::WitnessedEvent::new(
                fed.key(0),
                fed.context.clone(),
                crate::ActionDescriptor::new(actions[action]).unwrap(),
                outcome,
                now,
                seq as u64 + 1,
            ).unwrap();
            let delta = engine.submit_event(&event, &[], now).unwrap();
            prop_assert!((0.0..=1.0).contains(&delta.aggregate_after));
            let tensor = engine.query_tensor(&fed.id(0), &fed.context, now).unwrap();
            for v in tensor.values() {
                prop_assert!((0.0..=1.0).contains(v));
            }
        }
    }

    /// Resubmitting any already-accepted event is rejected and leaves the
    /// tensor unchanged.
    #[test]
    fn replay_is_idempotent(outcomes in prop::collection::vec(arb_outcome(), 1..20), pick in any::<prop::sample::Index>()) {
        let fed = Federation::with_societies(&["s0"]);
        let engine = open_engine(&fed, EngineConfig { decay: DecayConfig::disabled(), ..EngineConfig::default() });
        let mut events = Vec::new();
        for (i, outcome) in outcomes.iter().enumerate() {
            let event = fed.event(0, *outcome, i as u64 + 1);
            engine.submit_event(&event, &[], fed.now).unwrap();
            events.push(event);
        }
        let before = engine.query_tensor(&fed.id(0), &fed.context, fed.now).unwrap();
        let replayed = pick.get(&events);
        prop_assert!(engine.submit_event(replayed, &[], fed.now).is_err());
        prop_assert_eq!(engine.query_tensor(&fed.id(0), &fed.context, fed.now).unwrap(), before);
        prop_assert_eq!(engine.last_sequence(&fed.id(0)), Some(outcomes.len() as u64));
    }

    /// Slashing never drives a stake negative and removes exactly
    /// floor(amount * bps / 10000); more than 100% is refused.
    #[test]
    fn slashing_is_exact(amount in 1u64..u64::MAX / 2, bps in 0u64..=10_000, excess in 10_001u64..50_000) {
        let fed = Federation::with_societies(&["s0"]);
        let ledger = StakeLedger::new(StakePolicy::default());
        ledger.deposit(fed.id(0), crate::CapabilityTier::Normal, amount, fed.now).unwrap();
        let reason = SlashReason::ChallengeEvasion { strike: 1 };
        let refused = ledger.slash_bps(&fed.id(0), excess, reason.clone(), fed.now);
        prop_assert!(refused.is_err());
        let event = ledger.slash_bps(&fed.id(0), bps, reason, fed.now).unwrap();
        let expected = ((u128::from(amount) * u128::from(bps)) / 10_000) as u64;
        prop_assert_eq!(event.amount, expected);
        prop_assert_eq!(ledger.balance(&fed.id(0)), amount - expected);
    }
}
