//! Replicated cluster scenarios under the deterministic harness.

use basaltdb::replication::{KvOp, Request, Role, SimCluster, VrConfig};
use basaltdb::simulation::NetworkConfig;

fn put(client: u64, n: u64, key: &[u8], value: &[u8]) -> Request {
    Request {
        client_id: client,
        request_number: n,
        op: KvOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        },
    }
}

fn five_nodes(seed: u64) -> SimCluster {
    SimCluster::new(5, seed, NetworkConfig::default(), VrConfig::default())
}

#[test]
fn test_view_change_preserves_committed_op_and_heals_old_primary() {
    let mut c = five_nodes(21);
    assert_eq!(c.current_primary(), Some(1));

    // Commit op A in view 1.
    c.client_request(1, put(7, 1, b"a", b"A"));
    c.run_for(300);
    assert_eq!(c.ok_replies(7), vec![1]);

    // Stop node 1; a new primary is elected within the timeout window.
    c.crash(1);
    c.run_for(2_000);
    let new_primary = c.current_primary().expect("exactly one new primary");
    assert_ne!(new_primary, 1);
    assert!(c.node(new_primary).unwrap().view_number() >= 2);

    // Op A is still in every live node's log.
    for id in 2..=5 {
        let node = c.node(id).unwrap();
        assert!(
            node.log().iter().any(|e| e.request_number == 1),
            "node {id} lost the committed op"
        );
        assert_eq!(node.state_get(b"a"), Some(&b"A".to_vec()));
    }

    // Op B commits in the new view.
    c.client_request(new_primary, put(7, 2, b"b", b"B"));
    c.run_for(500);
    assert_eq!(c.ok_replies(7), vec![1, 2]);

    // Node 1 restarts, recovers via state transfer, and converges on
    // the new primary's log.
    c.restart(1);
    c.run_for(2_000);
    let restarted = c.node(1).unwrap();
    assert_eq!(restarted.role(), Role::Backup);
    assert_eq!(restarted.log(), c.node(new_primary).unwrap().log());
    assert_eq!(restarted.state_get(b"b"), Some(&b"B".to_vec()));
}

#[test]
fn test_minority_partition_blocks_then_heals() {
    let mut c = five_nodes(22);
    c.run_for(100);

    // {1} | {2,3,4,5}
    c.partition(&[1], &[2, 3, 4, 5]);

    // The isolated primary cannot reach quorum for new ops.
    c.client_request(1, put(7, 1, b"minority", b"x"));
    c.run_for(2_000);
    assert!(c.ok_replies(7).is_empty());
    assert_eq!(c.node(1).unwrap().commit_number(), 0);

    // The majority elects its own primary and commits.
    let majority_primary = (2u64..=5)
        .find(|&id| c.node(id).map(|n| n.is_primary()).unwrap_or(false))
        .expect("majority elected a primary");
    c.client_request(majority_primary, put(7, 2, b"majority", b"y"));
    c.run_for(500);
    assert_eq!(c.ok_replies(7), vec![2]);

    // After healing, the old primary catches up with the full log.
    c.heal();
    c.run_for(3_000);
    let healed = c.node(1).unwrap();
    assert_eq!(healed.role(), Role::Backup);
    assert_eq!(healed.state_get(b"majority"), Some(&b"y".to_vec()));
    assert_eq!(healed.state_get(b"minority"), None);
    assert_eq!(
        healed.log(),
        c.node(majority_primary).unwrap().log(),
        "healed node holds the majority log"
    );
}

#[test]
fn test_log_prefix_agreement_across_replicas() {
    let mut c = five_nodes(23);
    for n in 1..=10u64 {
        c.client_request(1, put(7, n, format!("k{n}").as_bytes(), b"v"));
        c.run_for(100);
    }
    c.run_for(1_000);

    // Every pair of replicas agrees on the committed prefix.
    let commit = (1u64..=5)
        .map(|id| c.node(id).unwrap().commit_number())
        .min()
        .unwrap();
    assert!(commit >= 1);
    let reference: Vec<_> = c.node(1).unwrap().log()[..commit as usize].to_vec();
    for id in 2..=5 {
        assert_eq!(
            &c.node(id).unwrap().log()[..commit as usize],
            reference.as_slice(),
            "node {id} diverges within the committed prefix"
        );
    }
}

#[test]
fn test_deterministic_replay_from_seed() {
    let run = |seed| {
        let mut c = SimCluster::new(
            5,
            seed,
            NetworkConfig {
                drop_probability: 0.02,
                duplicate_probability: 0.02,
                min_latency: 1,
                max_latency: 15,
            },
            VrConfig::default(),
        );
        c.client_request(1, put(7, 1, b"k", b"v"));
        c.crash(4);
        c.run_for(2_500);
        c.restart(4);
        c.run_for(2_500);
        (c.replies.clone(), c.current_primary())
    };
    assert_eq!(run(99), run(99));
}
