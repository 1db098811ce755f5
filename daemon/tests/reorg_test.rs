mod common;

use arbor_common::crypto::{Hashable, KeyPair};
use arbor_daemon::core::blockchain::ChainEvent;

// The canonical length-1 vs length-2 reorganization: a node sitting
// on G <- X1 learns about G <- Y1 <- Y2 carrying more work.
#[test]
fn longer_side_chain_triggers_reorg() {
    let alice = KeyPair::new();
    let carol = KeyPair::new();
    let leader_a = KeyPair::new();
    let leader_b = KeyPair::new();

    let node = common::funded_node(&[(&alice, u64::MAX)]);
    let peer = common::funded_node(&[(&alice, u64::MAX)]);
    assert_eq!(node.chain.best_hash().unwrap(), peer.chain.best_hash().unwrap());

    let mut events = node.chain.subscribe();

    // X1 confirms a transfer only the local node knows about
    let lonely_tx = common::transfer(&alice, carol.get_address(), 77, 0);
    node.mempool.add(lonely_tx.clone(), true).unwrap();
    let x1 = common::mine(&node, &leader_a);
    assert_eq!(node.chain.best_height().unwrap(), 1);
    assert!(!node.mempool.contains(&lonely_tx.hash()).unwrap());

    // The peer extends genesis twice on its own
    let y1 = common::mine(&peer, &leader_b);
    let y2 = common::mine(&peer, &leader_b);

    // Y1 parks as a side chain, work is tied
    let outcome = node.chain.process_block(y1.clone()).unwrap();
    assert!(outcome.accepted);
    assert!(!outcome.main_chain);
    assert_eq!(node.chain.best_hash().unwrap(), x1.hash());

    // Y2 tips the balance and the node reorganizes
    let outcome = node.chain.process_block(y2.clone()).unwrap();
    assert!(outcome.accepted);
    assert!(outcome.main_chain);
    assert_eq!(node.chain.best_hash().unwrap(), y2.hash());
    assert_eq!(node.chain.best_height().unwrap(), 2);

    // The canonical view follows the new branch
    assert_eq!(node.chain.hash_at_height(1).unwrap(), Some(y1.hash()));
    assert_eq!(node.store.committed_root(), peer.store.committed_root());

    // X1 was detached and its transaction went back to the pool
    let mut saw_detach = false;
    while let Ok(event) = events.try_recv() {
        if let ChainEvent::DetachBlock { hash } = event {
            assert_eq!(hash, x1.hash());
            saw_detach = true;
        }
    }
    assert!(saw_detach);
    assert!(node.mempool.contains(&lonely_tx.hash()).unwrap());
}

// A shorter or equal side chain must never displace the tip
#[test]
fn equal_work_side_chain_is_stored_only() {
    let leader_a = KeyPair::new();
    let leader_b = KeyPair::new();

    let node = common::default_node();
    let peer = common::default_node();

    let x1 = common::mine(&node, &leader_a);
    let y1 = common::mine(&peer, &leader_b);

    let outcome = node.chain.process_block(y1.clone()).unwrap();
    assert!(outcome.accepted);
    assert!(!outcome.main_chain);
    assert_eq!(node.chain.best_hash().unwrap(), x1.hash());
    assert!(node.chain.block_exists(&y1.hash()).unwrap());
}

// Reorg atomicity: when the attach branch fails to execute, the
// original chain and state stay exactly in place
#[test]
fn failed_attach_keeps_original_chain() {
    use arbor_common::block::{Block, Proof};
    use std::sync::Arc;

    let leader_a = KeyPair::new();
    let leader_b = KeyPair::new();

    let node = common::default_node();
    let peer = common::default_node();

    let x1 = common::mine(&node, &leader_a);
    let root_before = node.store.committed_root();

    // Build a two-block branch whose second block lies about its
    // state root
    let y1 = common::mine(&peer, &leader_b);
    let y2 = peer.chain.propose_block(&leader_b).unwrap();
    let mut forged_header = (*y2.get_header()).clone();
    forged_header.state_root = arbor_common::crypto::hash(b"forged root");
    let signature = leader_b.sign(&forged_header.hash());
    let forged = Block::new(
        Arc::new(forged_header),
        y2.get_transactions().clone(),
        Proof {
            kind: Proof::SOLO,
            evidence: signature.as_bytes().to_vec(),
        },
    );

    node.chain.process_block(y1).unwrap();
    let result = node.chain.process_block(forged);
    assert!(result.is_err());

    // Nothing moved
    assert_eq!(node.chain.best_hash().unwrap(), x1.hash());
    assert_eq!(node.store.committed_root(), root_before);
}
