mod common;

use arbor_common::{
    config::{GWEI, ORACLE_DEFAULT_PRICE},
    crypto::{Address, KeyPair},
    transaction::{ChainId, TransactionBuilder, TxKind},
};
use arbor_daemon::core::oracle::GasOracle;
use primitive_types::U256;
use std::sync::Arc;

#[test]
fn empty_chain_suggests_the_default() {
    let node = common::default_node();
    let oracle = GasOracle::new(Arc::clone(&node.chain));
    assert_eq!(oracle.suggest().unwrap(), U256::from(ORACLE_DEFAULT_PRICE));
}

#[test]
fn oracle_tracks_recent_prices() {
    let alice = KeyPair::new();
    let leader = KeyPair::new();
    let node = common::funded_node(&[(&alice, u64::MAX)]);

    // A handful of blocks carrying increasing gas prices
    for (nonce, price) in (0u64..5).map(|n| (n, (n + 1) * GWEI)) {
        let tx = Arc::new(
            TransactionBuilder::new(ChainId::zero(), alice.get_address())
                .kind(TxKind::Transfer)
                .to(Address::zero())
                .amount(U256::from(1u64))
                .gas_price(U256::from(price))
                .gas_limit(21_000)
                .nonce(nonce)
                .build(&alice),
        );
        node.mempool.add(tx, true).unwrap();
        common::mine(&node, &leader);
    }

    let oracle = GasOracle::new(Arc::clone(&node.chain));
    let suggested = oracle.suggest().unwrap();

    // 60th percentile over [1..5] gwei lands on 3 gwei
    assert_eq!(suggested, U256::from(3 * GWEI));

    // A second call with an unchanged tip hits the cache
    assert_eq!(oracle.suggest().unwrap(), suggested);
}

#[test]
fn oracle_clamps_to_the_floor() {
    let alice = KeyPair::new();
    let leader = KeyPair::new();
    let node = common::funded_node(&[(&alice, u64::MAX)]);

    // One absurdly cheap transaction
    let tx = Arc::new(
        TransactionBuilder::new(ChainId::zero(), alice.get_address())
            .kind(TxKind::Transfer)
            .to(Address::zero())
            .amount(U256::from(1u64))
            .gas_price(U256::from(1u64))
            .gas_limit(21_000)
            .nonce(0)
            .build(&alice),
    );
    node.mempool.add(tx, true).unwrap();
    common::mine(&node, &leader);

    let oracle = GasOracle::new(Arc::clone(&node.chain));
    assert_eq!(oracle.suggest().unwrap(), U256::from(ORACLE_DEFAULT_PRICE));
}
