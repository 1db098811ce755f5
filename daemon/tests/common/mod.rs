#![allow(dead_code)]

use arbor_common::{
    account::Nonce,
    config::GWEI,
    crypto::{Address, KeyPair},
    transaction::{ChainId, Transaction, TransactionBuilder, TxKind},
};
use arbor_daemon::core::{
    blockchain::Blockchain,
    genesis::GenesisConfig,
    mempool::Mempool,
    storage::{ChainStore, MemoryStore},
    validator::{BlockValidator, SoloProofValidator},
};
use primitive_types::U256;
use std::sync::Arc;

pub struct TestNode {
    pub chain: Arc<Blockchain>,
    pub mempool: Arc<Mempool>,
    pub store: Arc<ChainStore>,
}

pub fn default_node() -> TestNode {
    node_with_genesis(GenesisConfig::default())
}

// A node whose genesis premines the given accounts, so the tests can
// spend from keys they actually hold
pub fn funded_node(premine: &[(&KeyPair, u64)]) -> TestNode {
    node_with_genesis(GenesisConfig {
        premine: premine
            .iter()
            .map(|(keypair, balance)| (keypair.get_address(), U256::from(*balance)))
            .collect(),
    })
}

pub fn funded_node_large(premine: &[(&KeyPair, U256)]) -> TestNode {
    node_with_genesis(GenesisConfig {
        premine: premine
            .iter()
            .map(|(keypair, balance)| (keypair.get_address(), *balance))
            .collect(),
    })
}

pub fn node_with_genesis(genesis: GenesisConfig) -> TestNode {
    let store = Arc::new(ChainStore::new(Arc::new(MemoryStore::new())));
    let mempool = Arc::new(Mempool::new(Arc::clone(&store)));
    let validator = BlockValidator::new(ChainId::zero(), Arc::new(SoloProofValidator));

    let chain = Blockchain::with_genesis(
        ChainId::zero(),
        Arc::clone(&store),
        validator,
        Arc::clone(&mempool),
        genesis,
    )
    .expect("chain bootstrap");

    TestNode {
        chain: Arc::new(chain),
        mempool,
        store,
    }
}

pub fn transfer(sender: &KeyPair, to: Address, amount: u64, nonce: Nonce) -> Arc<Transaction> {
    Arc::new(
        TransactionBuilder::new(ChainId::zero(), sender.get_address())
            .kind(TxKind::Transfer)
            .to(to)
            .amount(U256::from(amount))
            .gas_price(U256::from(GWEI))
            .gas_limit(21_000)
            .nonce(nonce)
            .build(sender),
    )
}

// Produce one block on the node's tip and apply it
pub fn mine(node: &TestNode, leader: &KeyPair) -> arbor_common::block::Block {
    let block = node.chain.propose_block(leader).expect("propose");
    let outcome = node.chain.apply_block(block.clone()).expect("apply");
    assert!(outcome.accepted && outcome.main_chain);
    block
}
