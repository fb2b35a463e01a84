//! Drives four simulated replicas' `Consensus` instances in lock-step,
//! without any real network, through the happy path at N=4/f=1 and the
//! exact 2f/2f+1 threshold behavior.

use pbft_engine::bft::consensus::{Consensus, ConsensusStage};
use pbft_engine::bft::message::{NodeId, RequestMessage, VoteKind, VoteMsg, INITIAL_VIEW_ID};

const F: usize = 1;

fn node_ids() -> Vec<NodeId> {
    (0..4).map(|i| NodeId::new(format!("node{}", i))).collect()
}

fn sample_request() -> RequestMessage {
    RequestMessage {
        client_id: "client-1".into(),
        timestamp: 42,
        operation: serde_json::json!({"op": "transfer", "amount": 10}),
        sequence_id: 0,
        height: 1,
        payload: vec![],
    }
}

/// Runs every replica's pre-prepare through commit, returning the
/// fully-committed (reply, request) pair for each.
fn run_happy_path() -> Vec<Consensus> {
    let ids = node_ids();
    let mut replicas: Vec<Consensus> = ids.iter().map(|_| Consensus::new(INITIAL_VIEW_ID.0)).collect();

    // node0 is primary
    let ppm = replicas[0].start_consensus(sample_request()).unwrap();
    assert_eq!(replicas[0].stage(), ConsensusStage::PrePrepared);

    // backups (1, 2, 3) accept the pre-prepare
    for i in 1..4 {
        let template = replicas[i].pre_prepare(ppm.clone()).unwrap().unwrap();
        assert_eq!(template.msg_type, VoteKind::Prepare);
    }

    // each backup's implicit prepare is broadcast to every *other* node
    // (including the primary, who never emits one of its own)
    let prepare_votes: Vec<VoteMsg> = (1..4)
        .map(|i| VoteMsg {
            msg_type: VoteKind::Prepare,
            view_id: ppm.view_id,
            sequence_id: ppm.sequence_id,
            digest: ppm.digest,
            node_id: ids[i].clone(),
            pass: None,
        })
        .collect();

    let mut commit_votes = Vec::new();
    for (target, replica) in replicas.iter_mut().enumerate() {
        for vote in &prepare_votes {
            if vote.node_id == ids[target] {
                continue; // never deliver a node's own vote to itself
            }
            if let Some(template) = replica.prepare(vote.clone(), F).unwrap() {
                assert_eq!(replica.stage(), ConsensusStage::Prepared);
                commit_votes.push((
                    target,
                    VoteMsg {
                        msg_type: VoteKind::Commit,
                        view_id: template.view_id,
                        sequence_id: template.sequence_id,
                        digest: template.digest,
                        node_id: ids[target].clone(),
                        pass: Some(vec![0u8; 4]),
                    },
                ));
            }
        }
    }
    // every one of the 4 replicas should have reached Prepared and emitted a commit
    assert_eq!(commit_votes.len(), 4);

    for (target, replica) in replicas.iter_mut().enumerate() {
        for (source, vote) in &commit_votes {
            if *source == target {
                continue;
            }
            replica.commit(vote.clone(), F).unwrap();
        }
    }

    replicas
}

#[test]
fn happy_path_all_replicas_commit() {
    let replicas = run_happy_path();
    for (i, replica) in replicas.iter().enumerate() {
        assert_eq!(replica.stage(), ConsensusStage::Committed);
        assert_eq!(replica.commit_count(), 3);
        // the primary (node0) never emits its own prepare, so it hears
        // from all 3 backups; every backup hears from the other 2
        let expected_prepares = if i == 0 { 3 } else { 2 };
        assert_eq!(replica.prepare_count(), expected_prepares);
    }
}

#[test]
fn exact_threshold_boundary_n4_f1() {
    let ids = node_ids();
    let mut replica = Consensus::new(INITIAL_VIEW_ID.0);
    let ppm = replica.start_consensus(sample_request()).unwrap();

    let vote = |node: &NodeId, msg_type: VoteKind| VoteMsg {
        msg_type,
        view_id: ppm.view_id,
        sequence_id: ppm.sequence_id,
        digest: ppm.digest,
        node_id: node.clone(),
        pass: None,
    };

    // one prepare short of 2f: no transition yet
    replica.prepare(vote(&ids[1], VoteKind::Prepare), F).unwrap();
    assert_eq!(replica.stage(), ConsensusStage::PrePrepared);

    // the second distinct remote prepare crosses 2f exactly
    let commit_template = replica
        .prepare(vote(&ids[2], VoteKind::Prepare), F)
        .unwrap()
        .expect("2f prepares must trigger the commit template");
    assert_eq!(replica.stage(), ConsensusStage::Prepared);
    assert_eq!(commit_template.msg_type, VoteKind::Commit);

    // two commits short of 2f+1: no decision yet
    replica.commit(vote(&ids[1], VoteKind::Commit), F).unwrap();
    replica.commit(vote(&ids[2], VoteKind::Commit), F).unwrap();
    assert_eq!(replica.stage(), ConsensusStage::Prepared);

    // the third distinct remote commit crosses 2f+1 exactly
    let (_, committed_req) = replica
        .commit(vote(&ids[3], VoteKind::Commit), F)
        .unwrap()
        .expect("2f+1 commits must trigger the decision");
    assert_eq!(replica.stage(), ConsensusStage::Committed);
    assert_eq!(committed_req.client_id, "client-1");
}

#[test]
fn second_request_while_busy_fails_with_instance_in_progress() {
    let mut replica = Consensus::new(INITIAL_VIEW_ID.0);
    replica.start_consensus(sample_request()).unwrap();
    let err = replica.start_consensus(sample_request()).unwrap_err();
    assert_eq!(
        err,
        pbft_engine::bft::consensus::ConsensusError::InstanceInProgress
    );
}

#[test]
fn reset_after_commit_allows_next_instance_with_incremented_sequence() {
    let mut replicas = run_happy_path();

    for replica in replicas.iter_mut() {
        replica.reset();
        assert_eq!(replica.stage(), ConsensusStage::Idle);
    }

    let next_ppm = replicas[0].start_consensus(sample_request()).unwrap();
    assert_eq!(next_ppm.sequence_id, 2);
}
