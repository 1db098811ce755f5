use crate::core::{error::BlockchainError, storage::ChainStore};
use arbor_common::{
    block::{transactions_merkle_root, Block, BlockHeader, Proof},
    config::{CHAIN_VERSION, GENESIS_GAS_LIMIT, GENESIS_TIMESTAMP},
    crypto::{Address, Hash, PublicKey},
    transaction::ChainId,
};
use log::debug;
use primitive_types::U256;
use std::str::FromStr;
use std::sync::Arc;

// Premined account and its opening balance
pub const PREMINER_ADDRESS: &str = "0x8a8e541ddd1272d53729164c70197221a3c27486";

pub fn preminer_balance() -> U256 {
    // 10^21
    U256::from(10u64).pow(U256::from(21u64))
}

/// Opening allocation of the chain. The default carries the single
/// premined account; test networks hand in their own map.
#[derive(Clone, Debug)]
pub struct GenesisConfig {
    pub premine: Vec<(Address, U256)>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        let preminer = Address::from_str(PREMINER_ADDRESS)
            .unwrap_or_else(|_| Address::zero());
        Self {
            premine: vec![(preminer, preminer_balance())],
        }
    }
}

/// Build, commit and return the genesis block. The state root is
/// fully determined by the premine map so every node configured the
/// same way derives the same block hash.
pub fn build_genesis(
    store: &ChainStore,
    chain_id: &ChainId,
    config: &GenesisConfig,
) -> Result<Block, BlockchainError> {
    let mut journal = store.begin_transaction();
    for (address, balance) in &config.premine {
        store.add_balance(&mut journal, address, *balance)?;
    }
    let state_root = store.commit(journal)?;
    debug!("genesis state root {}", state_root);

    let mut header = BlockHeader::new(
        chain_id.clone(),
        CHAIN_VERSION,
        Hash::zero(),
        0,
        GENESIS_TIMESTAMP,
        GENESIS_GAS_LIMIT,
        PublicKey::zero(),
    );
    header.state_root = state_root;
    header.tx_root = transactions_merkle_root(&[]);

    Ok(Block::new(Arc::new(header), Vec::new(), Proof::empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::MemoryStore;
    use arbor_common::crypto::Hashable;

    #[test]
    fn test_genesis_deterministic() {
        let store_a = ChainStore::new(Arc::new(MemoryStore::new()));
        let store_b = ChainStore::new(Arc::new(MemoryStore::new()));
        let config = GenesisConfig::default();

        let block_a = build_genesis(&store_a, &ChainId::zero(), &config).unwrap();
        let block_b = build_genesis(&store_b, &ChainId::zero(), &config).unwrap();

        assert_eq!(block_a.hash(), block_b.hash());
        assert_eq!(block_a.get_height(), 0);
        assert_eq!(block_a.get_timestamp(), GENESIS_TIMESTAMP);
        assert_eq!(*block_a.get_tx_root(), Hash::zero());
    }

    #[test]
    fn test_genesis_funds_preminer() {
        let store = ChainStore::new(Arc::new(MemoryStore::new()));
        build_genesis(&store, &ChainId::zero(), &GenesisConfig::default()).unwrap();

        let preminer = Address::from_str(PREMINER_ADDRESS).unwrap();
        assert_eq!(
            store.get_balance_committed(&preminer).unwrap(),
            preminer_balance()
        );
    }

    #[test]
    fn test_custom_premine_changes_root() {
        let store_a = ChainStore::new(Arc::new(MemoryStore::new()));
        let store_b = ChainStore::new(Arc::new(MemoryStore::new()));

        let custom = GenesisConfig {
            premine: vec![(Address::new([9; 20]), U256::from(1u64))],
        };

        let block_a = build_genesis(&store_a, &ChainId::zero(), &GenesisConfig::default()).unwrap();
        let block_b = build_genesis(&store_b, &ChainId::zero(), &custom).unwrap();
        assert_ne!(block_a.hash(), block_b.hash());
    }
}
