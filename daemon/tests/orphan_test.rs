mod common;

use arbor_common::crypto::{Hashable, KeyPair};
use tokio::sync::mpsc;

// Deliver G <- P <- C with P withheld: C parks as an orphan and is
// connected automatically once P arrives.
#[test]
fn orphan_connects_when_parent_arrives() {
    let leader = KeyPair::new();

    let node = common::default_node();
    let peer = common::default_node();

    let p = common::mine(&peer, &leader);
    let c = common::mine(&peer, &leader);

    // The child alone is accepted but not part of the chain
    let outcome = node.chain.process_block(c.clone()).unwrap();
    assert!(outcome.accepted);
    assert!(!outcome.main_chain);
    assert!(!node.chain.block_exists(&c.hash()).unwrap());
    assert_eq!(node.chain.best_height().unwrap(), 0);

    // The parent unblocks the orphan in the same call
    let outcome = node.chain.process_block(p.clone()).unwrap();
    assert!(outcome.main_chain);
    assert_eq!(node.chain.best_height().unwrap(), 2);
    assert_eq!(node.chain.best_hash().unwrap(), c.hash());
    assert!(node.chain.block_exists(&c.hash()).unwrap());
}

#[test]
fn orphan_requests_its_missing_parent() {
    let leader = KeyPair::new();

    let node = common::default_node();
    let peer = common::default_node();

    let (tx, mut rx) = mpsc::unbounded_channel();
    node.chain.set_back_request_channel(tx);

    let p = common::mine(&peer, &leader);
    let c = common::mine(&peer, &leader);

    node.chain.process_block(c).unwrap();

    // The chain manager asked the sync layer for the missing parent
    let requested = rx.try_recv().unwrap();
    assert_eq!(requested, p.hash());
}

#[test]
fn duplicate_orphan_is_rejected() {
    let leader = KeyPair::new();

    let node = common::default_node();
    let peer = common::default_node();

    let _p = common::mine(&peer, &leader);
    let c = common::mine(&peer, &leader);

    node.chain.process_block(c.clone()).unwrap();
    assert!(node.chain.process_block(c).is_err());
}

// A whole chain delivered in reverse connects once the lowest block
// arrives
#[test]
fn orphan_chain_connects_recursively() {
    let leader = KeyPair::new();

    let node = common::default_node();
    let peer = common::default_node();

    let blocks: Vec<_> = (0..4).map(|_| common::mine(&peer, &leader)).collect();

    for block in blocks.iter().skip(1).rev() {
        let outcome = node.chain.process_block(block.clone()).unwrap();
        assert!(outcome.accepted);
        assert!(!outcome.main_chain);
    }
    assert_eq!(node.chain.best_height().unwrap(), 0);

    node.chain.process_block(blocks[0].clone()).unwrap();
    assert_eq!(node.chain.best_height().unwrap(), 4);
    assert_eq!(
        node.chain.best_hash().unwrap(),
        blocks.last().unwrap().hash()
    );
}
