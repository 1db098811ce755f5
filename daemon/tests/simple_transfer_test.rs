mod common;

use arbor_common::{config::GWEI, crypto::{Hashable, KeyPair}};
use primitive_types::U256;

#[test]
fn transfer_through_a_produced_block() {
    let alice = KeyPair::new();
    let bob = KeyPair::new();
    let leader = KeyPair::new();

    let opening = U256::from(10u64).pow(U256::from(21u64));
    let node = common::funded_node_large(&[(&alice, opening)]);

    let tx = common::transfer(&alice, bob.get_address(), 100, 0);
    node.mempool.add(tx.clone(), true).unwrap();

    let block = common::mine(&node, &leader);
    assert_eq!(block.get_txs_count(), 1);
    assert_eq!(block.get_gas_used(), 21_000);
    assert_eq!(node.chain.best_height().unwrap(), 1);

    // Post-state arithmetic of the canonical example
    let fee = U256::from(21_000u64) * U256::from(GWEI);
    assert_eq!(
        node.store.get_balance_committed(&alice.get_address()).unwrap(),
        opening - U256::from(100u64) - fee
    );
    assert_eq!(
        node.store.get_balance_committed(&bob.get_address()).unwrap(),
        U256::from(100u64)
    );
    assert_eq!(
        node.store.get_balance_committed(&leader.get_address()).unwrap(),
        fee
    );
    assert_eq!(
        node.store.get_nonce_committed(&alice.get_address()).unwrap(),
        1
    );

    // Exactly one receipt, retrievable by block and by tx hash
    let receipts = node.store.get_receipts(&block.hash()).unwrap().unwrap();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].gas_used, 21_000);
    assert!(receipts[0].status);

    let receipt = node.store.get_receipt(&tx.hash()).unwrap().unwrap();
    assert_eq!(receipt.tx_hash, tx.hash());

    // The pool dropped the confirmed transaction
    assert!(!node.mempool.contains(&tx.hash()).unwrap());
}

#[test]
fn nonce_ordering_across_blocks() {
    let alice = KeyPair::new();
    let bob = KeyPair::new();
    let leader = KeyPair::new();

    let node = common::funded_node(&[(&alice, u64::MAX)]);

    for nonce in 0..3 {
        node.mempool
            .add(common::transfer(&alice, bob.get_address(), 10, nonce), true)
            .unwrap();
    }

    let block = common::mine(&node, &leader);
    assert_eq!(block.get_txs_count(), 3);

    // Nonce grows by exactly one per confirmed transaction
    assert_eq!(
        node.store.get_nonce_committed(&alice.get_address()).unwrap(),
        3
    );
    assert_eq!(
        node.store.get_balance_committed(&bob.get_address()).unwrap(),
        U256::from(30u64)
    );
}

#[test]
fn produced_blocks_replay_identically_on_a_second_node() {
    let alice = KeyPair::new();
    let bob = KeyPair::new();
    let leader = KeyPair::new();

    let node_a = common::funded_node(&[(&alice, u64::MAX)]);
    let node_b = common::funded_node(&[(&alice, u64::MAX)]);

    for nonce in 0..2 {
        node_a
            .mempool
            .add(common::transfer(&alice, bob.get_address(), 50, nonce), true)
            .unwrap();
    }
    let block = common::mine(&node_a, &leader);

    // Same block, same pre-state, byte-identical outcome
    let outcome = node_b.chain.process_block(block.clone()).unwrap();
    assert!(outcome.main_chain);
    assert_eq!(node_a.store.committed_root(), node_b.store.committed_root());
    assert_eq!(
        node_a.store.get_receipts(&block.hash()).unwrap(),
        node_b.store.get_receipts(&block.hash()).unwrap()
    );
}
