//! Property-based tests for quorum arithmetic and commit safety.

use proptest::prelude::*;

use crate::fixtures::Cluster;
use crate::{bft_quorum, ConsensusAction, ProposalState, StateTransition, Vote, VotePhase};

proptest! {
    /// With n = 3f + 1 the quorum is 2f + 1, and any two quorums overlap in
    /// at least f + 1 validators, so at least one honest one.
    #[test]
    fn quorum_tolerates_f_faults(f in 0usize..200) {
        let n = 3 * f + 1;
        let q = bft_quorum(n);
        prop_assert_eq!(q, 2 * f + 1);
        prop_assert!(2 * q - n >= f + 1);
    }

    /// For any n, quorums intersect and never exceed n.
    #[test]
    fn quorums_intersect(n in 1usize..1000) {
        let q = bft_quorum(n);
        prop_assert!(q <= n);
        prop_assert!(2 * q > n);
        prop_assert!(3 * (q - 1) >= 2 * n - 2);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// An observer commits exactly when it holds a quorum of approving
    /// pre-commits; fewer leave the proposal open.
    #[test]
    fn commits_iff_quorum_of_precommits(n in 2u8..8, approvals in 0usize..8) {
        let mut cluster = Cluster::new(n);
        let approvals = approvals.min(n as usize - 1);
        let actions = cluster.nodes[0]
            .propose(StateTransition::Revoke { entity: cluster.outsider.id() }, cluster.now)
            .unwrap();
        let signed = actions
            .iter()
            .find_map(|a| match a {
                ConsensusAction::BroadcastProposal(p) => Some(p.clone()),
                _ => None,
            })
            .unwrap();
        let id = signed.proposal.id;

        // Pre-commits from validators other than the proposer, without any
        // pre-votes reaching the proposer.
        for key in cluster.keys.iter().skip(1).take(approvals) {
            let vote = Vote::sign(key, id, signed.proposal.payload_hash, 0, VotePhase::PreCommit, true);
            cluster.nodes[0].handle_vote(vote, cluster.now);
        }

        let committed = cluster.nodes[0].state_of(&id) == Some(ProposalState::Committed);
        prop_assert_eq!(committed, approvals >= bft_quorum(n as usize));
        if committed {
            let decision = cluster.nodes[0].decision(&id).unwrap();
            prop_assert!(decision
                .verify_certificate(cluster.nodes[0].validators(), cluster.directory.as_ref())
                .is_ok());
        }
    }

    /// Rejecting pre-votes never move a proposal past `Proposed`.
    #[test]
    fn rejections_never_prevote(n in 1u8..8) {
        let mut cluster = Cluster::new(n);
        let actions = cluster.nodes[0]
            .propose(StateTransition::Revoke { entity: cluster.outsider.id() }, cluster.now)
            .unwrap();
        let signed = actions
            .iter()
            .find_map(|a| match a {
                ConsensusAction::BroadcastProposal(p) => Some(p.clone()),
                _ => None,
            })
            .unwrap();
        let id = signed.proposal.id;
        if n == 1 {
            prop_assert_eq!(cluster.nodes[0].state_of(&id), Some(ProposalState::Committed));
            return Ok(());
        }
        for key in cluster.keys.iter().skip(1) {
            let vote = Vote::sign(key, id, signed.proposal.payload_hash, 0, VotePhase::PreVote, false);
            cluster.nodes[0].handle_vote(vote, cluster.now);
        }
        prop_assert_eq!(cluster.nodes[0].state_of(&id), Some(ProposalState::Proposed));
    }
}
