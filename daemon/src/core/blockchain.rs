use crate::core::{
    error::BlockchainError,
    executor::{execute_block, execute_transaction, GasPool},
    genesis,
    index::{BlockIndex, BlockNode, BlockStatus, ChainView},
    mempool::Mempool,
    storage::{ChainState, ChainStore},
    validator::{calc_gas_limit, BlockValidator},
};
use arbor_common::{
    block::{receipts_merkle_root, transactions_merkle_root, Block, BlockHeader, Proof},
    config::{CHAIN_VERSION, MAX_ORPHAN_BLOCKS, ORPHAN_EXPIRATION},
    crypto::{Address, Hash, Hashable, KeyPair},
    receipt::Bloom,
    time::get_current_time_in_seconds,
    transaction::{ChainId, Transaction},
};
use log::{debug, info, trace, warn};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, RwLock},
    time::{Duration, Instant},
};
use tokio::sync::{broadcast, mpsc};

/// Outcome of a ProcessBlock call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub accepted: bool,
    pub main_chain: bool,
}

/// Chain notifications, delivered after the state commit is durable
#[derive(Clone, Debug)]
pub enum ChainEvent {
    NewBlock { hash: Hash, height: u64 },
    DetachBlock { hash: Hash },
}

struct OrphanBlock {
    block: Block,
    expires_at: Instant,
}

// Blocks whose parent has not arrived yet, keyed by the missing
// parent hash. Bounded, entries expire after a fixed wall-clock
// window.
struct OrphanPool {
    by_prev: std::collections::HashMap<Hash, Vec<OrphanBlock>>,
    count: usize,
}

impl OrphanPool {
    fn new() -> Self {
        Self {
            by_prev: std::collections::HashMap::new(),
            count: 0,
        }
    }

    fn contains(&self, hash: &Hash) -> bool {
        self.by_prev
            .values()
            .any(|orphans| orphans.iter().any(|o| o.block.hash() == *hash))
    }

    fn add(&mut self, block: Block) {
        self.expire();
        while self.count >= MAX_ORPHAN_BLOCKS && !self.by_prev.is_empty() {
            self.evict_oldest();
        }

        let previous = block.get_previous_hash().clone();
        self.by_prev.entry(previous).or_default().push(OrphanBlock {
            block,
            expires_at: Instant::now() + Duration::from_secs(ORPHAN_EXPIRATION),
        });
        self.count += 1;
    }

    fn take_children(&mut self, parent: &Hash) -> Vec<Block> {
        match self.by_prev.remove(parent) {
            Some(orphans) => {
                self.count -= orphans.len();
                orphans.into_iter().map(|o| o.block).collect()
            }
            None => Vec::new(),
        }
    }

    fn expire(&mut self) {
        let now = Instant::now();
        let mut removed = 0;
        self.by_prev.retain(|_, orphans| {
            let before = orphans.len();
            orphans.retain(|o| o.expires_at > now);
            removed += before - orphans.len();
            !orphans.is_empty()
        });
        self.count -= removed;
    }

    // Drop the entry closest to expiry
    fn evict_oldest(&mut self) {
        let oldest = self
            .by_prev
            .iter()
            .filter_map(|(prev, orphans)| {
                orphans
                    .iter()
                    .map(|o| o.expires_at)
                    .min()
                    .map(|at| (prev.clone(), at))
            })
            .min_by_key(|(_, at)| *at)
            .map(|(prev, _)| prev);

        if let Some(prev) = oldest {
            if let Some(orphans) = self.by_prev.remove(&prev) {
                self.count -= orphans.len();
            }
        }
    }
}

struct ChainInner {
    index: BlockIndex,
    view: ChainView,
}

/// Owner of the block index, the best chain view and the orphan
/// pool. ProcessBlock calls are strictly serialized by the add-block
/// lock; readers go through the inner read-write lock.
pub struct Blockchain {
    chain_id: ChainId,
    store: Arc<ChainStore>,
    validator: BlockValidator,
    mempool: Arc<Mempool>,
    inner: RwLock<ChainInner>,
    // Acquired after the inner lock when both are needed, never
    // before
    orphans: RwLock<OrphanPool>,
    add_block_lock: Mutex<()>,
    events: broadcast::Sender<ChainEvent>,
    // Parent hashes the sync layer should go fetch
    back_requests: Mutex<Option<mpsc::UnboundedSender<Hash>>>,
    // Senders whose nonces advanced, drained by the pool
    // reconciliation loop; the pool is called directly when unset
    pool_notify: Mutex<Option<mpsc::Sender<Vec<Address>>>>,
}

impl Blockchain {
    /// Open the chain with the default genesis allocation, creating
    /// and committing the genesis block on first start.
    pub fn new(
        chain_id: ChainId,
        store: Arc<ChainStore>,
        validator: BlockValidator,
        mempool: Arc<Mempool>,
    ) -> Result<Self, BlockchainError> {
        Self::with_genesis(
            chain_id,
            store,
            validator,
            mempool,
            genesis::GenesisConfig::default(),
        )
    }

    /// Open the chain with an explicit genesis allocation
    pub fn with_genesis(
        chain_id: ChainId,
        store: Arc<ChainStore>,
        validator: BlockValidator,
        mempool: Arc<Mempool>,
        genesis_config: genesis::GenesisConfig,
    ) -> Result<Self, BlockchainError> {
        let (events, _) = broadcast::channel(256);
        let chain = Self {
            chain_id,
            store,
            validator,
            mempool,
            inner: RwLock::new(ChainInner {
                index: BlockIndex::new(),
                view: ChainView::new(),
            }),
            orphans: RwLock::new(OrphanPool::new()),
            add_block_lock: Mutex::new(()),
            events,
            back_requests: Mutex::new(None),
            pool_notify: Mutex::new(None),
        };

        match chain.store.get_chain_state()? {
            Some(state) => chain.load_chain(state)?,
            None => chain.create_chain_state(&genesis_config)?,
        }
        Ok(chain)
    }

    fn create_chain_state(&self, config: &genesis::GenesisConfig) -> Result<(), BlockchainError> {
        let block = genesis::build_genesis(&self.store, &self.chain_id, config)?;
        let hash = block.hash();
        info!("created genesis block {}", hash);

        let mut node = BlockNode::new(block.header_arc(), 0);
        node.status
            .add(BlockStatus::DATA_STORED | BlockStatus::VALID);

        self.store.put_block(&block)?;
        self.store.put_block_node(&node)?;
        self.store.put_chain_state(&ChainState {
            best_hash: hash.clone(),
            best_height: 0,
            median_time: block.get_timestamp(),
        })?;

        let mut inner = self.write_inner()?;
        inner.index.add_node(node);
        inner.view.push(hash);
        Ok(())
    }

    // Rebuild the index and view of the canonical chain from disk
    fn load_chain(&self, state: ChainState) -> Result<(), BlockchainError> {
        let mut nodes = Vec::new();
        let mut cursor = Some(state.best_hash.clone());
        while let Some(hash) = cursor {
            let node = self
                .store
                .get_block_node(&hash)?
                .ok_or_else(|| BlockchainError::Corruption(format!("missing block node {}", hash)))?;
            cursor = node.parent.clone();
            nodes.push(node);
        }

        let best = self
            .store
            .get_block_node(&state.best_hash)?
            .ok_or_else(|| BlockchainError::Corruption("missing best block node".into()))?;
        self.store
            .set_committed_root(best.header.get_state_root().clone());

        let mut inner = self.write_inner()?;
        for node in nodes.into_iter().rev() {
            inner.index.add_node(node);
        }
        let ChainInner { index, view } = &mut *inner;
        view.set_tip(index, &state.best_hash)?;
        info!(
            "loaded chain at height {} tip {}",
            state.best_height, state.best_hash
        );
        Ok(())
    }

    fn read_inner(&self) -> Result<std::sync::RwLockReadGuard<'_, ChainInner>, BlockchainError> {
        self.inner
            .read()
            .map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))
    }

    fn write_inner(&self) -> Result<std::sync::RwLockWriteGuard<'_, ChainInner>, BlockchainError> {
        self.inner
            .write()
            .map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))
    }

    fn lock_add_block(&self) -> Result<MutexGuard<'_, ()>, BlockchainError> {
        self.add_block_lock
            .lock()
            .map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    pub fn set_back_request_channel(&self, sender: mpsc::UnboundedSender<Hash>) {
        if let Ok(mut chan) = self.back_requests.lock() {
            *chan = Some(sender);
        }
    }

    pub fn set_pool_notify_channel(&self, sender: mpsc::Sender<Vec<Address>>) {
        if let Ok(mut chan) = self.pool_notify.lock() {
            *chan = Some(sender);
        }
    }

    // ----- read surface -----

    pub fn block_exists(&self, hash: &Hash) -> Result<bool, BlockchainError> {
        Ok(self.read_inner()?.index.have_block(hash))
    }

    pub fn best_hash(&self) -> Result<Hash, BlockchainError> {
        self.read_inner()?
            .view
            .tip()
            .cloned()
            .ok_or_else(|| BlockchainError::Corruption("empty best chain".into()))
    }

    pub fn best_height(&self) -> Result<u64, BlockchainError> {
        Ok(self.read_inner()?.view.height())
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Block, BlockchainError> {
        self.store.get_block(hash)
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Block, BlockchainError> {
        let hash = self
            .read_inner()?
            .view
            .hash_at_height(height)
            .cloned()
            .ok_or_else(|| BlockchainError::BlockNotFound(Hash::zero()))?;
        self.store.get_block(&hash)
    }

    pub fn get_header_by_hash(&self, hash: &Hash) -> Result<Arc<BlockHeader>, BlockchainError> {
        self.read_inner()?
            .index
            .get(hash)
            .map(|node| Arc::clone(&node.header))
            .ok_or_else(|| BlockchainError::BlockNotFound(hash.clone()))
    }

    pub fn get_blocks_from(&self, start: u64, size: u64) -> Result<Vec<Block>, BlockchainError> {
        let hashes: Vec<Hash> = {
            let inner = self.read_inner()?;
            (start..start.saturating_add(size))
                .filter_map(|height| inner.view.hash_at_height(height).cloned())
                .collect()
        };

        let mut blocks = Vec::with_capacity(hashes.len());
        for hash in hashes {
            blocks.push(self.store.get_block(&hash)?);
        }
        Ok(blocks)
    }

    pub fn hash_at_height(&self, height: u64) -> Result<Option<Hash>, BlockchainError> {
        Ok(self.read_inner()?.view.hash_at_height(height).cloned())
    }

    pub fn get_store(&self) -> &Arc<ChainStore> {
        &self.store
    }

    // ----- write path -----

    /// Ingest a candidate block, locally produced or received from a
    /// peer. Serialized by the add-block lock; accepted orphans are
    /// retried as soon as their parent lands.
    pub fn process_block(&self, block: Block) -> Result<ProcessOutcome, BlockchainError> {
        let _guard = self.lock_add_block()?;

        let hash = block.hash();
        let (outcome, orphaned) = self.process_block_locked(block)?;

        // Walk the orphan pool for children unblocked by this block
        if outcome.accepted && !orphaned {
            let mut parents = vec![hash];
            while let Some(parent) = parents.pop() {
                let children = match self.orphans.write() {
                    Ok(mut orphans) => orphans.take_children(&parent),
                    Err(_) => Vec::new(),
                };
                for child in children {
                    let child_hash = child.hash();
                    match self.process_block_locked(child) {
                        Ok((child_outcome, child_orphaned)) => {
                            if child_outcome.accepted && !child_orphaned {
                                debug!("orphan {} connected", child_hash);
                                parents.push(child_hash);
                            }
                        }
                        Err(e) => warn!("orphan {} rejected: {}", child_hash, e),
                    }
                }
            }
        }

        Ok(outcome)
    }

    fn process_block_locked(
        &self,
        block: Block,
    ) -> Result<(ProcessOutcome, bool), BlockchainError> {
        let hash = block.hash();
        let header = block.get_header();

        {
            let inner = self.read_inner()?;
            if inner.index.have_block(&hash) {
                return Err(BlockchainError::BlockExists(hash));
            }
        }
        {
            let orphans = self
                .orphans
                .read()
                .map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))?;
            if orphans.contains(&hash) {
                return Err(BlockchainError::BlockExists(hash));
            }
        }

        // Self-contained integrity first
        self.validator.verify_sanity(header)?;
        self.validator.verify_body(&block)?;

        if header.get_height() == 0 {
            // A competing genesis can never join this chain
            return Err(BlockchainError::BadHeight { have: 0, parent: 0 });
        }

        let parent = {
            let inner = self.read_inner()?;
            inner.index.get(header.get_previous_hash()).cloned()
        };

        let parent = match parent {
            Some(parent) => parent,
            None => {
                // Parent unknown: park the block and ask the sync
                // layer to fetch the gap
                let missing = header.get_previous_hash().clone();
                trace!("block {} is an orphan, missing {}", hash, missing);
                {
                    let mut orphans = self
                        .orphans
                        .write()
                        .map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))?;
                    orphans.add(block);
                }
                if let Ok(chan) = self.back_requests.lock() {
                    if let Some(chan) = chan.as_ref() {
                        let _ = chan.send(missing);
                    }
                }
                return Ok((
                    ProcessOutcome {
                        accepted: true,
                        main_chain: false,
                    },
                    true,
                ));
            }
        };

        if parent.status.is_invalid() {
            let mut inner = self.write_inner()?;
            let mut node = BlockNode::new(block.header_arc(), parent.work);
            node.status
                .add(BlockStatus::DATA_STORED | BlockStatus::ANCESTOR_INVALID);
            inner.index.add_node(node);
            return Err(BlockchainError::AncestorInvalid(hash));
        }

        self.validator.verify_header(header, &parent.header)?;
        self.validator.verify_proof(&block)?;

        let mut node = BlockNode::new(block.header_arc(), parent.work);
        node.status.add(BlockStatus::DATA_STORED);
        self.store.put_block(&block)?;
        self.store.put_block_node(&node)?;

        let best_tip = self.best_hash()?;

        if parent.hash == best_tip {
            // Fast forward on top of the current tip
            let outcome = self.connect_tip(block, node)?;
            return Ok((outcome, false));
        }

        // Side chain: reorganize when it carries strictly more work
        let best_work = {
            let inner = self.read_inner()?;
            inner
                .index
                .get(&best_tip)
                .map(|n| n.work)
                .ok_or_else(|| BlockchainError::Corruption("best tip not indexed".into()))?
        };

        if node.work > best_work {
            info!(
                "side chain {} (work {}) beats tip {} (work {}), reorganizing",
                hash, node.work, best_tip, best_work
            );
            let outcome = self.reorganize(node, best_tip)?;
            return Ok((outcome, false));
        }

        debug!("block {} stored on a side chain", hash);
        let mut inner = self.write_inner()?;
        inner.index.add_node(node);
        Ok((
            ProcessOutcome {
                accepted: true,
                main_chain: false,
            },
            false,
        ))
    }

    // Execute and commit a block extending the current tip
    fn connect_tip(&self, block: Block, mut node: BlockNode) -> Result<ProcessOutcome, BlockchainError> {
        let hash = node.hash.clone();
        let parent_root = {
            let inner = self.read_inner()?;
            inner
                .index
                .get(block.get_previous_hash())
                .map(|p| p.header.get_state_root().clone())
                .ok_or_else(|| BlockchainError::Corruption("parent vanished".into()))?
        };
        let mut journal = self.store.begin_transaction_at(parent_root);

        match execute_block(&self.store, &mut journal, &block) {
            Ok(outcome) => {
                self.store.commit(journal)?;
                self.store.put_receipts(&hash, &outcome.receipts)?;

                node.status.add(BlockStatus::VALID);
                self.store.put_block_node(&node)?;
                self.store.put_chain_state(&ChainState {
                    best_hash: hash.clone(),
                    best_height: node.height,
                    median_time: node.header.get_timestamp(),
                })?;

                {
                    let mut inner = self.write_inner()?;
                    inner.index.add_node(node.clone());
                    inner.view.push(hash.clone());
                }

                info!(
                    "new tip {} at height {} ({} txs, gas {})",
                    hash,
                    node.height,
                    block.get_txs_count(),
                    outcome.gas_used
                );
                let _ = self.events.send(ChainEvent::NewBlock {
                    hash: hash.clone(),
                    height: node.height,
                });
                self.notify_pool(block.get_transactions().iter().map(|tx| *tx.get_from()).collect());

                Ok(ProcessOutcome {
                    accepted: true,
                    main_chain: true,
                })
            }
            Err(e) => {
                self.store.discard(journal);
                warn!("block {} failed execution: {}", hash, e);

                node.status.add(BlockStatus::INVALID);
                self.store.put_block_node(&node)?;
                let mut inner = self.write_inner()?;
                inner.index.add_node(node);
                inner.index.mark_invalid(&hash);
                Err(e)
            }
        }
    }

    // Switch the canonical chain over to the branch ending in
    // `candidate`. State recovery is cheap because old trie roots
    // stay readable: the journal is simply re-rooted at the common
    // ancestor.
    fn reorganize(
        &self,
        candidate: BlockNode,
        best_tip: Hash,
    ) -> Result<ProcessOutcome, BlockchainError> {
        let candidate_hash = candidate.hash.clone();

        // The candidate has to be indexed for ancestor walks
        {
            let mut inner = self.write_inner()?;
            inner.index.add_node(candidate.clone());
        }

        let (ancestor, detach_list, attach_list) = {
            let inner = self.read_inner()?;
            let ancestor = inner
                .index
                .lowest_common_ancestor(&best_tip, &candidate_hash)?;

            let mut detach_list = Vec::new();
            let mut cursor = best_tip.clone();
            while cursor != ancestor {
                let node = inner
                    .index
                    .get(&cursor)
                    .ok_or_else(|| BlockchainError::BlockNotFound(cursor.clone()))?;
                detach_list.push(cursor.clone());
                cursor = node
                    .parent
                    .clone()
                    .ok_or_else(|| BlockchainError::Corruption("detach walk hit genesis".into()))?;
            }

            let mut attach_list = Vec::new();
            let mut cursor = candidate_hash.clone();
            while cursor != ancestor {
                let node = inner
                    .index
                    .get(&cursor)
                    .ok_or_else(|| BlockchainError::BlockNotFound(cursor.clone()))?;
                attach_list.push(cursor.clone());
                cursor = node
                    .parent
                    .clone()
                    .ok_or_else(|| BlockchainError::Corruption("attach walk hit genesis".into()))?;
            }
            attach_list.reverse();

            (ancestor, detach_list, attach_list)
        };

        let ancestor_root = {
            let inner = self.read_inner()?;
            inner
                .index
                .get(&ancestor)
                .map(|n| n.header.get_state_root().clone())
                .ok_or_else(|| BlockchainError::BlockNotFound(ancestor.clone()))?
        };

        // Replay the attach branch over the ancestor state. Nothing
        // is committed until every block went through.
        let mut current_root = ancestor_root;
        let mut attach_receipts = Vec::new();
        for attach_hash in &attach_list {
            let block = self.store.get_block(attach_hash)?;
            let mut journal = self.store.begin_transaction_at(current_root.clone());

            match execute_block(&self.store, &mut journal, &block) {
                Ok(outcome) => {
                    current_root = outcome.state_root.clone();
                    attach_receipts.push((attach_hash.clone(), outcome.receipts));
                }
                Err(e) => {
                    warn!(
                        "reorganization aborted, block {} failed: {}",
                        attach_hash, e
                    );
                    let mut inner = self.write_inner()?;
                    if let Some(node) = inner.index.get_mut(attach_hash) {
                        node.status.add(BlockStatus::INVALID);
                    }
                    inner.index.mark_invalid(attach_hash);
                    // The original best chain stays in place, the
                    // committed root was never touched
                    return Err(BlockchainError::ReorgAborted(attach_hash.clone()));
                }
            }
        }

        // Point of no return: swap the canonical pointers atomically
        self.store.set_committed_root(current_root);
        for (attach_hash, receipts) in &attach_receipts {
            self.store.put_receipts(attach_hash, receipts)?;
        }

        let candidate_height = candidate.height;
        {
            let mut inner = self.write_inner()?;
            for attach_hash in &attach_list {
                if let Some(node) = inner.index.get_mut(attach_hash) {
                    node.status.add(BlockStatus::VALID);
                }
            }
            let ChainInner { index, view } = &mut *inner;
            view.set_tip(index, &candidate_hash)?;
        }
        for attach_hash in &attach_list {
            let inner = self.read_inner()?;
            if let Some(node) = inner.index.get(attach_hash) {
                self.store.put_block_node(node)?;
            }
        }
        self.store.put_chain_state(&ChainState {
            best_hash: candidate_hash.clone(),
            best_height: candidate_height,
            median_time: candidate.header.get_timestamp(),
        })?;

        // Detached transactions go back to the pool unless the new
        // branch already confirmed them
        let mut attached_txs = HashSet::new();
        let mut affected: HashSet<Address> = HashSet::new();
        for attach_hash in &attach_list {
            let block = self.store.get_block(attach_hash)?;
            for tx in block.get_transactions() {
                attached_txs.insert(tx.hash());
                affected.insert(*tx.get_from());
            }
        }

        for detach_hash in &detach_list {
            let _ = self.events.send(ChainEvent::DetachBlock {
                hash: detach_hash.clone(),
            });
            let block = self.store.get_block(detach_hash)?;
            for tx in block.get_transactions() {
                affected.insert(*tx.get_from());
                if !attached_txs.contains(&tx.hash()) {
                    if let Err(e) = self.mempool.add(Arc::clone(tx), false) {
                        trace!("detached tx not re-admitted: {}", e);
                    }
                }
            }
        }

        let _ = self.events.send(ChainEvent::NewBlock {
            hash: candidate_hash.clone(),
            height: candidate_height,
        });
        self.notify_pool(affected.into_iter().collect());

        info!(
            "reorganized to {} at height {} ({} detached, {} attached)",
            candidate_hash,
            candidate_height,
            detach_list.len(),
            attach_list.len()
        );

        Ok(ProcessOutcome {
            accepted: true,
            main_chain: true,
        })
    }

    fn notify_pool(&self, senders: Vec<Address>) {
        if senders.is_empty() {
            return;
        }
        // Hand the batch to the reconciliation loop when one is
        // wired up, reconcile inline otherwise
        let senders = match self.pool_notify.lock() {
            Ok(chan) => match chan.as_ref() {
                Some(chan) => match chan.try_send(senders) {
                    Ok(()) => return,
                    Err(e) => e.into_inner(),
                },
                None => senders,
            },
            Err(_) => return,
        };

        if let Err(e) = self.mempool.on_block_applied(&senders) {
            warn!("pool notification failed: {}", e);
        }
    }

    // ----- block production -----

    /// Assemble, trial-execute and sign a block on top of the
    /// current tip. Transactions that fail execution are skipped, not
    /// fatal.
    pub fn propose_block(&self, leader: &KeyPair) -> Result<Block, BlockchainError> {
        let _guard = self.lock_add_block()?;

        let (parent_hash, parent_header) = {
            let inner = self.read_inner()?;
            let tip = inner
                .view
                .tip()
                .cloned()
                .ok_or_else(|| BlockchainError::Corruption("empty best chain".into()))?;
            let node = inner
                .index
                .get(&tip)
                .ok_or_else(|| BlockchainError::BlockNotFound(tip.clone()))?;
            (tip, Arc::clone(&node.header))
        };

        let gas_limit = calc_gas_limit(&parent_header);
        let timestamp = get_current_time_in_seconds().max(parent_header.get_timestamp() + 1);

        let mut header = BlockHeader::new(
            self.chain_id.clone(),
            CHAIN_VERSION,
            parent_hash,
            parent_header.get_height() + 1,
            timestamp,
            gas_limit,
            leader.get_public_key(),
        );

        let candidates = self.mempool.collect(gas_limit)?;
        let mut journal = self
            .store
            .begin_transaction_at(parent_header.get_state_root().clone());
        let mut gas_pool = GasPool::new(gas_limit);

        let mut included: Vec<Arc<Transaction>> = Vec::new();
        let mut receipts = Vec::new();
        let mut cumulative_gas = 0;
        let mut bloom = Bloom::zero();

        for tx in candidates {
            let savepoint = journal.savepoint();
            let pool_before = gas_pool.available();

            match execute_transaction(
                &self.store,
                &mut journal,
                &header,
                &mut gas_pool,
                &tx,
                cumulative_gas,
            ) {
                Ok(receipt) => {
                    cumulative_gas = receipt.cumulative_gas_used;
                    for log in &receipt.logs {
                        bloom.accrue_log(log);
                    }
                    receipts.push(receipt);
                    included.push(tx);
                }
                Err(e) => {
                    trace!("skipping tx during production: {}", e);
                    journal.rollback_to(savepoint);
                    gas_pool = GasPool::new(pool_before);
                }
            }
        }

        header.gas_used = cumulative_gas;
        header.tx_root = transactions_merkle_root(&included);
        header.receipt_root = receipts_merkle_root(&receipts);
        header.bloom = bloom;
        header.state_root = self.store.state_root(&journal)?;
        self.store.discard(journal);

        let signature = leader.sign(&header.hash());
        let proof = Proof {
            kind: Proof::SOLO,
            evidence: signature.as_bytes().to_vec(),
        };

        debug!(
            "proposed block at height {} with {} txs",
            header.get_height(),
            included.len()
        );
        Ok(Block::new(Arc::new(header), included, proof))
    }

    /// Production entry point of the consensus engine
    pub fn apply_block(&self, block: Block) -> Result<ProcessOutcome, BlockchainError> {
        self.process_block(block)
    }
}
