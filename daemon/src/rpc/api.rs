use crate::core::{blockchain::Blockchain, error::BlockchainError, oracle::GasOracle};
use arbor_common::{
    block::Block,
    crypto::{Address, Hash, Hashable},
    receipt::{Log, Receipt},
    transaction::Transaction,
};
use primitive_types::U256;
use std::sync::Arc;

/// Read-only chain surface consumed by the external JSON-RPC
/// transport. Every call observes committed state only.
pub struct ChainApi {
    chain: Arc<Blockchain>,
    oracle: GasOracle,
}

impl ChainApi {
    pub fn new(chain: Arc<Blockchain>) -> Self {
        let oracle = GasOracle::new(Arc::clone(&chain));
        Self { chain, oracle }
    }

    pub fn get_block(&self, height: u64) -> Result<Block, BlockchainError> {
        self.chain.get_block_by_height(height)
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Block, BlockchainError> {
        self.chain.get_block_by_hash(hash)
    }

    pub fn get_max_height(&self) -> Result<u64, BlockchainError> {
        self.chain.best_height()
    }

    pub fn get_balance(&self, address: &Address) -> Result<U256, BlockchainError> {
        self.chain.get_store().get_balance_committed(address)
    }

    pub fn get_nonce(&self, address: &Address) -> Result<u64, BlockchainError> {
        self.chain.get_store().get_nonce_committed(address)
    }

    pub fn get_byte_code(&self, address: &Address) -> Result<Vec<u8>, BlockchainError> {
        Ok(self
            .chain
            .get_store()
            .get_account_committed(address)?
            .get_byte_code()
            .to_vec())
    }

    pub fn get_code_hash(&self, address: &Address) -> Result<Hash, BlockchainError> {
        Ok(self
            .chain
            .get_store()
            .get_account_committed(address)?
            .get_code_hash()
            .clone())
    }

    pub fn get_receipt(&self, tx_hash: &Hash) -> Result<Option<Receipt>, BlockchainError> {
        self.chain.get_store().get_receipt(tx_hash)
    }

    pub fn get_logs(&self, tx_hash: &Hash) -> Result<Vec<Log>, BlockchainError> {
        Ok(self
            .get_receipt(tx_hash)?
            .map(|receipt| receipt.logs)
            .unwrap_or_default())
    }

    /// Logs emitted by one contract over a height range. The header
    /// bloom rules a block out without touching its receipts.
    pub fn filter_logs(
        &self,
        address: &Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, BlockchainError> {
        let to = to.min(self.chain.best_height()?);
        let mut logs = Vec::new();

        for height in from..=to {
            let block = self.chain.get_block_by_height(height)?;
            if !block.get_bloom().contains(address.as_bytes()) {
                continue;
            }

            let receipts = self
                .chain
                .get_store()
                .get_receipts(&block.hash())?
                .unwrap_or_default();
            for receipt in receipts {
                logs.extend(
                    receipt
                        .logs
                        .into_iter()
                        .filter(|log| log.address == *address),
                );
            }
        }

        Ok(logs)
    }

    pub fn get_alias_by_address(&self, address: &Address) -> Result<Option<String>, BlockchainError> {
        let store = self.chain.get_store();
        let journal = store.begin_transaction();
        store.get_alias_by_address(&journal, address)
    }

    pub fn get_address_by_alias(&self, alias: &str) -> Result<Option<Address>, BlockchainError> {
        self.chain.get_store().get_address_by_alias_committed(alias)
    }

    pub fn get_transaction_by_block_height_and_index(
        &self,
        height: u64,
        index: usize,
    ) -> Result<Arc<Transaction>, BlockchainError> {
        let block = self.get_block(height)?;
        block
            .get_transactions()
            .get(index)
            .cloned()
            .ok_or(BlockchainError::TxIndexOutOfRange)
    }

    pub fn suggest_gas_price(&self) -> Result<U256, BlockchainError> {
        self.oracle.suggest()
    }
}
