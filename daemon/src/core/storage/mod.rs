mod journal;
mod kv;
mod trie;

pub use journal::{Journal, Savepoint};
pub use kv::{KeyValueStore, MemoryStore, SledStore};
pub use trie::Trie;

use crate::core::{error::BlockchainError, index::BlockNode};
use arbor_common::{
    account::Account,
    block::Block,
    crypto::{Address, Hash, Hashable},
    receipt::Receipt,
    serializer::{Reader, ReaderError, Serializer, Writer},
    transaction::MAX_ALIAS_LENGTH,
};
use log::trace;
use lru::LruCache;
use primitive_types::U256;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock};

// Decoded blocks kept hot for the oracle, the reorg driver and the
// RPC surface
const BLOCK_CACHE_SIZE: usize = 1024;

// Persisted pointer to the canonical tip
#[derive(Clone, Debug)]
pub struct ChainState {
    pub best_hash: Hash,
    pub best_height: u64,
    pub median_time: u64,
}

impl Serializer for ChainState {
    fn write(&self, writer: &mut Writer) {
        writer.write_hash(&self.best_hash);
        writer.write_u64(&self.best_height);
        writer.write_u64(&self.median_time);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            best_hash: reader.read_hash()?,
            best_height: reader.read_u64()?,
            median_time: reader.read_u64()?,
        })
    }

    fn size(&self) -> usize {
        32 + 8 + 8
    }
}

// Logical state keys inside the trie
fn account_key(address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + 20);
    key.extend_from_slice(b"a:");
    key.extend_from_slice(address.as_bytes());
    key
}

fn storage_key(address: &Address, slot: &U256) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + 20 + 32);
    key.extend_from_slice(b"s:");
    key.extend_from_slice(address.as_bytes());
    key.extend_from_slice(&slot.to_big_endian());
    key
}

fn alias_key(alias: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + alias.len());
    key.extend_from_slice(b"n:");
    key.extend_from_slice(alias.as_bytes());
    key
}

// Chain data keyspaces on the raw backend
fn block_key(hash: &Hash) -> Vec<u8> {
    [b"block/".as_slice(), hash.as_bytes()].concat()
}

fn block_node_key(hash: &Hash) -> Vec<u8> {
    [b"blockNode/".as_slice(), hash.as_bytes()].concat()
}

fn receipts_key(block_hash: &Hash) -> Vec<u8> {
    [b"receipts/".as_slice(), block_hash.as_bytes()].concat()
}

fn receipt_key(tx_hash: &Hash) -> Vec<u8> {
    [b"receipt/".as_slice(), tx_hash.as_bytes()].concat()
}

const CHAIN_STATE_KEY: &[u8] = b"chainState";

/// Authenticated, transactional state plus the chain data store.
///
/// All account mutations go through a [`Journal`]; readers outside the
/// block pipeline see the committed root only. Chain data (blocks,
/// index entries, receipts) bypasses the trie and lands directly in
/// the backend.
pub struct ChainStore {
    kv: Arc<dyn KeyValueStore>,
    // Committed state root, swapped under the add-block lock
    root: RwLock<Hash>,
    block_cache: Mutex<LruCache<Hash, Block>>,
}

impl ChainStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        let capacity = NonZeroUsize::new(BLOCK_CACHE_SIZE)
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            kv,
            root: RwLock::new(Hash::zero()),
            block_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn trie(&self) -> Trie<'_> {
        Trie::new(self.kv.as_ref())
    }

    // Committed state root including every applied write
    pub fn committed_root(&self) -> Hash {
        self.root
            .read()
            .map(|root| root.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn set_committed_root(&self, root: Hash) {
        match self.root.write() {
            Ok(mut guard) => *guard = root,
            Err(poisoned) => *poisoned.into_inner() = root,
        }
    }

    // ----- journal lifecycle -----

    /// Open a journal over the committed state
    pub fn begin_transaction(&self) -> Journal {
        Journal::new(self.committed_root())
    }

    /// Open a journal over an arbitrary historical root (used while
    /// attaching side chain blocks)
    pub fn begin_transaction_at(&self, root: Hash) -> Journal {
        Journal::new(root)
    }

    /// Root hash reflecting committed state plus the buffered writes
    /// of the journal. Trie nodes are content addressed so
    /// materializing a speculative root is safe.
    pub fn state_root(&self, journal: &Journal) -> Result<Hash, BlockchainError> {
        let trie = self.trie();
        let mut root = journal.base_root().clone();
        for (key, value) in journal.sorted_writes() {
            root = match value {
                Some(value) => trie.insert(&root, key, value)?,
                None => trie.remove(&root, key)?,
            };
        }
        Ok(root)
    }

    /// Flush the journal and advance the committed root
    pub fn commit(&self, journal: Journal) -> Result<Hash, BlockchainError> {
        let root = self.state_root(&journal)?;
        trace!("journal committed, {} writes, new root {}", journal.len(), root);
        self.set_committed_root(root.clone());
        Ok(root)
    }

    /// Drop the journal without applying anything
    pub fn discard(&self, journal: Journal) {
        trace!("journal discarded, {} writes dropped", journal.len());
        drop(journal);
    }

    // ----- journal-aware state reads and writes -----

    fn read_state(&self, journal: &Journal, key: &[u8]) -> Result<Option<Vec<u8>>, BlockchainError> {
        if let Some(entry) = journal.get(key) {
            return Ok(entry.clone());
        }
        self.trie().get(journal.base_root(), key)
    }

    /// Reading a missing address yields an empty record, not an error
    pub fn get_account(&self, journal: &Journal, address: &Address) -> Result<Account, BlockchainError> {
        match self.read_state(journal, &account_key(address))? {
            Some(bytes) => Account::from_bytes(&bytes)
                .map_err(|e| BlockchainError::Corruption(format!("undecodable account {}: {}", address, e))),
            None => Ok(Account::new()),
        }
    }

    pub fn put_account(&self, journal: &mut Journal, address: &Address, account: &Account) {
        journal.put(account_key(address), account.to_bytes());
    }

    pub fn delete_account(&self, journal: &mut Journal, address: &Address) {
        journal.delete(account_key(address));
    }

    pub fn account_exists(&self, journal: &Journal, address: &Address) -> Result<bool, BlockchainError> {
        Ok(self.read_state(journal, &account_key(address))?.is_some())
    }

    pub fn get_balance(&self, journal: &Journal, address: &Address) -> Result<U256, BlockchainError> {
        Ok(self.get_account(journal, address)?.get_balance())
    }

    pub fn put_balance(
        &self,
        journal: &mut Journal,
        address: &Address,
        balance: U256,
    ) -> Result<(), BlockchainError> {
        let mut account = self.get_account(journal, address)?;
        account.set_balance(balance);
        self.put_account(journal, address, &account);
        Ok(())
    }

    pub fn add_balance(
        &self,
        journal: &mut Journal,
        address: &Address,
        amount: U256,
    ) -> Result<(), BlockchainError> {
        let mut account = self.get_account(journal, address)?;
        account.set_balance(account.get_balance().saturating_add(amount));
        self.put_account(journal, address, &account);
        Ok(())
    }

    pub fn sub_balance(
        &self,
        journal: &mut Journal,
        address: &Address,
        amount: U256,
    ) -> Result<(), BlockchainError> {
        let mut account = self.get_account(journal, address)?;
        let balance = account.get_balance();
        if balance < amount {
            return Err(BlockchainError::InsufficientBalance(*address));
        }
        account.set_balance(balance - amount);
        self.put_account(journal, address, &account);
        Ok(())
    }

    pub fn get_nonce(&self, journal: &Journal, address: &Address) -> Result<u64, BlockchainError> {
        Ok(self.get_account(journal, address)?.get_nonce())
    }

    // Monotonicity is the caller's responsibility
    pub fn put_nonce(
        &self,
        journal: &mut Journal,
        address: &Address,
        nonce: u64,
    ) -> Result<(), BlockchainError> {
        let mut account = self.get_account(journal, address)?;
        account.set_nonce(nonce);
        self.put_account(journal, address, &account);
        Ok(())
    }

    pub fn get_byte_code(&self, journal: &Journal, address: &Address) -> Result<Vec<u8>, BlockchainError> {
        Ok(self.get_account(journal, address)?.get_byte_code().to_vec())
    }

    pub fn get_code_hash(&self, journal: &Journal, address: &Address) -> Result<Hash, BlockchainError> {
        Ok(self.get_account(journal, address)?.get_code_hash().clone())
    }

    pub fn put_byte_code(
        &self,
        journal: &mut Journal,
        address: &Address,
        byte_code: Vec<u8>,
    ) -> Result<(), BlockchainError> {
        let mut account = self.get_account(journal, address)?;
        account.set_byte_code(byte_code);
        self.put_account(journal, address, &account);
        Ok(())
    }

    // Per-contract 256-bit word storage
    pub fn load_storage(
        &self,
        journal: &Journal,
        address: &Address,
        slot: &U256,
    ) -> Result<U256, BlockchainError> {
        match self.read_state(journal, &storage_key(address, slot))? {
            Some(bytes) => U256::from_bytes(&bytes)
                .map_err(|e| BlockchainError::Corruption(format!("undecodable storage word: {}", e))),
            None => Ok(U256::zero()),
        }
    }

    pub fn store_storage(&self, journal: &mut Journal, address: &Address, slot: &U256, value: U256) {
        let key = storage_key(address, slot);
        if value.is_zero() {
            journal.delete(key);
        } else {
            journal.put(key, value.to_bytes());
        }
    }

    // ----- alias registry -----

    pub fn get_address_by_alias(
        &self,
        journal: &Journal,
        alias: &str,
    ) -> Result<Option<Address>, BlockchainError> {
        match self.read_state(journal, &alias_key(alias))? {
            Some(bytes) => Address::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| BlockchainError::Corruption(format!("undecodable alias owner: {}", e))),
            None => Ok(None),
        }
    }

    pub fn get_alias_by_address(
        &self,
        journal: &Journal,
        address: &Address,
    ) -> Result<Option<String>, BlockchainError> {
        Ok(self
            .get_account(journal, address)?
            .get_alias()
            .map(|alias| alias.to_string()))
    }

    // An alias must be non empty, bounded and unclaimed
    pub fn set_alias(
        &self,
        journal: &mut Journal,
        address: &Address,
        alias: &str,
    ) -> Result<(), BlockchainError> {
        if alias.is_empty() || alias.len() > MAX_ALIAS_LENGTH {
            return Err(BlockchainError::InvalidAlias);
        }
        if self.get_address_by_alias(journal, alias)?.is_some() {
            return Err(BlockchainError::AliasTaken(alias.to_string()));
        }

        journal.put(alias_key(alias), Serializer::to_bytes(address));

        let mut account = self.get_account(journal, address)?;
        account.set_alias(alias.to_string());
        self.put_account(journal, address, &account);
        Ok(())
    }

    // ----- committed-state readers (RPC surface) -----

    pub fn get_account_committed(&self, address: &Address) -> Result<Account, BlockchainError> {
        let journal = self.begin_transaction();
        self.get_account(&journal, address)
    }

    pub fn get_balance_committed(&self, address: &Address) -> Result<U256, BlockchainError> {
        Ok(self.get_account_committed(address)?.get_balance())
    }

    pub fn get_nonce_committed(&self, address: &Address) -> Result<u64, BlockchainError> {
        Ok(self.get_account_committed(address)?.get_nonce())
    }

    pub fn get_address_by_alias_committed(&self, alias: &str) -> Result<Option<Address>, BlockchainError> {
        let journal = self.begin_transaction();
        self.get_address_by_alias(&journal, alias)
    }

    // ----- chain data -----

    pub fn has_block(&self, hash: &Hash) -> Result<bool, BlockchainError> {
        self.kv.contains(&block_key(hash))
    }

    pub fn put_block(&self, block: &Block) -> Result<(), BlockchainError> {
        self.kv.put(&block_key(&block.hash()), &block.to_bytes())?;
        if let Ok(mut cache) = self.block_cache.lock() {
            cache.put(block.hash(), block.clone());
        }
        Ok(())
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Block, BlockchainError> {
        if let Ok(mut cache) = self.block_cache.lock() {
            if let Some(block) = cache.get(hash) {
                return Ok(block.clone());
            }
        }

        let bytes = self
            .kv
            .get(&block_key(hash))?
            .ok_or_else(|| BlockchainError::BlockNotFound(hash.clone()))?;
        let block = Block::from_bytes(&bytes)
            .map_err(|e| BlockchainError::Corruption(format!("undecodable block {}: {}", hash, e)))?;

        if let Ok(mut cache) = self.block_cache.lock() {
            cache.put(hash.clone(), block.clone());
        }
        Ok(block)
    }

    pub fn put_block_node(&self, node: &BlockNode) -> Result<(), BlockchainError> {
        self.kv.put(&block_node_key(&node.hash), &node.to_bytes())
    }

    pub fn get_block_node(&self, hash: &Hash) -> Result<Option<BlockNode>, BlockchainError> {
        match self.kv.get(&block_node_key(hash))? {
            Some(bytes) => BlockNode::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| BlockchainError::Corruption(format!("undecodable block node {}: {}", hash, e))),
            None => Ok(None),
        }
    }

    pub fn put_chain_state(&self, state: &ChainState) -> Result<(), BlockchainError> {
        self.kv.put(CHAIN_STATE_KEY, &state.to_bytes())
    }

    pub fn get_chain_state(&self) -> Result<Option<ChainState>, BlockchainError> {
        match self.kv.get(CHAIN_STATE_KEY)? {
            Some(bytes) => ChainState::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| BlockchainError::Corruption(format!("undecodable chain state: {}", e))),
            None => Ok(None),
        }
    }

    pub fn put_receipts(&self, block_hash: &Hash, receipts: &[Receipt]) -> Result<(), BlockchainError> {
        self.kv
            .put(&receipts_key(block_hash), &receipts.to_vec().to_bytes())?;
        for receipt in receipts {
            self.kv.put(&receipt_key(&receipt.tx_hash), &receipt.to_bytes())?;
        }
        Ok(())
    }

    pub fn get_receipts(&self, block_hash: &Hash) -> Result<Option<Vec<Receipt>>, BlockchainError> {
        match self.kv.get(&receipts_key(block_hash))? {
            Some(bytes) => Vec::<Receipt>::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| BlockchainError::Corruption(format!("undecodable receipts: {}", e))),
            None => Ok(None),
        }
    }

    pub fn get_receipt(&self, tx_hash: &Hash) -> Result<Option<Receipt>, BlockchainError> {
        match self.kv.get(&receipt_key(tx_hash))? {
            Some(bytes) => Receipt::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| BlockchainError::Corruption(format!("undecodable receipt: {}", e))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ChainStore {
        ChainStore::new(Arc::new(MemoryStore::new()))
    }

    fn addr(tag: u8) -> Address {
        Address::new([tag; 20])
    }

    #[test]
    fn test_missing_account_reads_empty() {
        let store = store();
        let journal = store.begin_transaction();
        let account = store.get_account(&journal, &addr(1)).unwrap();
        assert!(account.is_empty());
    }

    #[test]
    fn test_balance_lifecycle() {
        let store = store();
        let mut journal = store.begin_transaction();
        let alice = addr(1);

        store.add_balance(&mut journal, &alice, U256::from(100u64)).unwrap();
        assert_eq!(store.get_balance(&journal, &alice).unwrap(), U256::from(100u64));

        store.sub_balance(&mut journal, &alice, U256::from(40u64)).unwrap();
        assert_eq!(store.get_balance(&journal, &alice).unwrap(), U256::from(60u64));

        let err = store.sub_balance(&mut journal, &alice, U256::from(1000u64));
        assert!(matches!(err, Err(BlockchainError::InsufficientBalance(_))));
    }

    #[test]
    fn test_commit_then_read_committed() {
        let store = store();
        let alice = addr(1);

        let mut journal = store.begin_transaction();
        store.add_balance(&mut journal, &alice, U256::from(7u64)).unwrap();
        let root = store.commit(journal).unwrap();

        assert_eq!(store.committed_root(), root);
        assert_eq!(store.get_balance_committed(&alice).unwrap(), U256::from(7u64));
    }

    #[test]
    fn test_discard_drops_writes() {
        let store = store();
        let alice = addr(1);

        let mut journal = store.begin_transaction();
        store.add_balance(&mut journal, &alice, U256::from(7u64)).unwrap();
        store.discard(journal);

        assert_eq!(store.get_balance_committed(&alice).unwrap(), U256::zero());
    }

    #[test]
    fn test_state_root_reflects_buffered_writes() {
        let store = store();
        let mut journal = store.begin_transaction();

        let before = store.state_root(&journal).unwrap();
        store.add_balance(&mut journal, &addr(1), U256::from(1u64)).unwrap();
        let after = store.state_root(&journal).unwrap();
        assert_ne!(before, after);

        // The committed root is untouched until commit
        assert_eq!(store.committed_root(), Hash::zero());
    }

    #[test]
    fn test_storage_words() {
        let store = store();
        let mut journal = store.begin_transaction();
        let contract = addr(9);
        let slot = U256::from(3u64);

        assert_eq!(store.load_storage(&journal, &contract, &slot).unwrap(), U256::zero());

        store.store_storage(&mut journal, &contract, &slot, U256::from(42u64));
        assert_eq!(
            store.load_storage(&journal, &contract, &slot).unwrap(),
            U256::from(42u64)
        );

        // Writing zero clears the slot
        store.store_storage(&mut journal, &contract, &slot, U256::zero());
        assert_eq!(store.load_storage(&journal, &contract, &slot).unwrap(), U256::zero());
    }

    #[test]
    fn test_alias_rules() {
        let store = store();
        let mut journal = store.begin_transaction();
        let alice = addr(1);
        let bob = addr(2);

        store.set_alias(&mut journal, &alice, "alice").unwrap();
        assert_eq!(
            store.get_address_by_alias(&journal, "alice").unwrap(),
            Some(alice)
        );
        assert_eq!(
            store.get_alias_by_address(&journal, &alice).unwrap(),
            Some("alice".to_string())
        );

        // Claimed and empty aliases are rejected
        assert!(matches!(
            store.set_alias(&mut journal, &bob, "alice"),
            Err(BlockchainError::AliasTaken(_))
        ));
        assert!(matches!(
            store.set_alias(&mut journal, &bob, ""),
            Err(BlockchainError::InvalidAlias)
        ));
    }

    #[test]
    fn test_deterministic_roots_across_stores() {
        let store_a = store();
        let store_b = store();

        for store in [&store_a, &store_b] {
            let mut journal = store.begin_transaction();
            store.add_balance(&mut journal, &addr(1), U256::from(10u64)).unwrap();
            store.add_balance(&mut journal, &addr(2), U256::from(20u64)).unwrap();
            store.set_alias(&mut journal, &addr(1), "one").unwrap();
            store.commit(journal).unwrap();
        }

        assert_eq!(store_a.committed_root(), store_b.committed_root());
    }
}
