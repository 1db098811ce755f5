use crate::core::{error::BlockchainError, storage::ChainStore};
use arbor_common::{
    account::Nonce,
    config::POOL_MAX_SIZE,
    crypto::{Address, Hash, Hashable},
    transaction::Transaction,
};
use log::{debug, trace, warn};
use primitive_types::U256;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
};
use tokio::sync::{mpsc, watch};

// Pooled transactions are split per sender in two tiers:
//  - queued: accepted but not contiguous in nonce with the chain
//  - pending: contiguous and ready for inclusion
// Block commits drive eviction through the reconciliation loop.

struct SenderList {
    // nonce sorted by construction
    txs: BTreeMap<Nonce, Arc<Transaction>>,
}

impl SenderList {
    fn new() -> Self {
        Self {
            txs: BTreeMap::new(),
        }
    }
}

struct PoolInner {
    queued: HashMap<Address, SenderList>,
    pending: HashMap<Address, SenderList>,
    // Next nonce accepted into pending per sender
    pending_nonce: HashMap<Address, Nonce>,
    // Every pooled hash, for dedup
    all: HashSet<Hash>,
}

impl PoolInner {
    fn new() -> Self {
        Self {
            queued: HashMap::new(),
            pending: HashMap::new(),
            pending_nonce: HashMap::new(),
            all: HashSet::new(),
        }
    }

    fn size(&self) -> usize {
        self.all.len()
    }

    // Move every freshly contiguous queued tx into pending
    fn promote(&mut self, sender: &Address, chain_nonce: Nonce) {
        let mut next = *self
            .pending_nonce
            .get(sender)
            .unwrap_or(&chain_nonce)
            .max(&chain_nonce);

        if let Some(list) = self.queued.get_mut(sender) {
            let pending = self
                .pending
                .entry(*sender)
                .or_insert_with(SenderList::new);
            while let Some(tx) = list.txs.remove(&next) {
                pending.txs.insert(next, tx);
                next += 1;
            }
            if list.txs.is_empty() {
                self.queued.remove(sender);
            }
        }

        self.pending_nonce.insert(*sender, next);
    }

    // Cheapest queued tx from any sender except `keep`, used to make
    // room for a local submission
    fn evict_cheapest_queued(&mut self, keep: &Address) -> Option<Hash> {
        let mut victim: Option<(Address, Nonce, U256, Hash)> = None;
        for (sender, list) in &self.queued {
            if sender == keep {
                continue;
            }
            // Only the tail of a sender queue may leave, nonce gaps
            // above it are already tolerated
            if let Some((nonce, tx)) = list.txs.iter().next_back() {
                let price = tx.get_gas_price();
                let hash = tx.hash();
                let better = match &victim {
                    None => true,
                    Some((_, _, best_price, best_hash)) => {
                        price < *best_price || (price == *best_price && hash < *best_hash)
                    }
                };
                if better {
                    victim = Some((*sender, *nonce, price, hash));
                }
            }
        }

        let (sender, nonce, _, hash) = victim?;
        if let Some(list) = self.queued.get_mut(&sender) {
            list.txs.remove(&nonce);
            if list.txs.is_empty() {
                self.queued.remove(&sender);
            }
        }
        self.all.remove(&hash);
        Some(hash)
    }
}

// One per-sender slice of the pending view, ordered for the priority
// merge in collect()
struct CollectGroup {
    txs: VecDeque<Arc<Transaction>>,
}

impl CollectGroup {
    fn head_key(&self) -> Option<(U256, Hash)> {
        self.txs.front().map(|tx| (tx.get_gas_price(), tx.hash()))
    }
}

impl PartialEq for CollectGroup {
    fn eq(&self, other: &Self) -> bool {
        self.head_key() == other.head_key()
    }
}

impl Eq for CollectGroup {}

impl PartialOrd for CollectGroup {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CollectGroup {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.head_key(), other.head_key()) {
            // Highest gas price wins, hash breaks ties so the order
            // is identical on every node
            (Some((price_a, hash_a)), Some((price_b, hash_b))) => price_a
                .cmp(&price_b)
                .then_with(|| hash_b.cmp(&hash_a)),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        }
    }
}

/// Nonce-ordered, price-prioritized transaction pool
pub struct Mempool {
    store: Arc<ChainStore>,
    inner: Mutex<PoolInner>,
    max_size: usize,
    // Broadcast hint for the p2p collaborator
    announce: Mutex<Option<mpsc::UnboundedSender<Hash>>>,
}

impl Mempool {
    pub fn new(store: Arc<ChainStore>) -> Self {
        Self::with_max_size(store, POOL_MAX_SIZE)
    }

    pub fn with_max_size(store: Arc<ChainStore>, max_size: usize) -> Self {
        Self {
            store,
            inner: Mutex::new(PoolInner::new()),
            max_size,
            announce: Mutex::new(None),
        }
    }

    // The p2p layer registers here to learn about accepted txs
    pub fn set_announce_channel(&self, sender: mpsc::UnboundedSender<Hash>) {
        if let Ok(mut announce) = self.announce.lock() {
            *announce = Some(sender);
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PoolInner>, BlockchainError> {
        self.inner
            .lock()
            .map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))
    }

    // Gas limit of the block currently at the tip
    fn current_block_gas_limit(&self) -> u64 {
        self.store
            .get_chain_state()
            .ok()
            .flatten()
            .and_then(|state| self.store.get_block_node(&state.best_hash).ok().flatten())
            .map(|node| node.header.get_gas_limit())
            .unwrap_or(arbor_common::config::GENESIS_GAS_LIMIT)
    }

    /// Admit a transaction. Local submissions may evict a cheaper
    /// queued transaction when the pool is full; relayed ones are
    /// simply rejected.
    pub fn add(&self, tx: Arc<Transaction>, is_local: bool) -> Result<(), BlockchainError> {
        // 1. the signature must recover to the declared sender
        tx.verify_signature()
            .map_err(|_| BlockchainError::BadSignature)?;

        let sender = *tx.get_from();
        let tx_hash = tx.hash();

        // 2. stale nonces are rejected outright
        let chain_nonce = self.store.get_nonce_committed(&sender)?;
        if tx.get_nonce() < chain_nonce {
            return Err(BlockchainError::NonceTooLow {
                have: tx.get_nonce(),
                chain: chain_nonce,
            });
        }

        // 3. the committed balance must cover the worst case cost
        let cost = tx.cost();
        let balance = self.store.get_balance_committed(&sender)?;
        if balance < cost {
            debug!(
                "rejecting {}: balance {} below cost {}",
                tx_hash, balance, cost
            );
            return Err(BlockchainError::InsufficientFunds {
                need: cost.to_string(),
                have: balance.to_string(),
            });
        }

        // No single transaction may outgrow the block it would ride in
        let block_gas_limit = self.current_block_gas_limit();
        if tx.get_gas_limit() > block_gas_limit {
            return Err(BlockchainError::ExceedsBlockGasLimit(tx.get_gas_limit()));
        }

        let mut guard = self.lock()?;
        let inner = &mut *guard;

        // 4. dedup on the body hash
        if inner.all.contains(&tx_hash) {
            return Err(BlockchainError::AlreadyKnown(tx_hash));
        }

        // 5. admission control at capacity
        if inner.size() >= self.max_size {
            if !is_local {
                warn!("pool full, dropping relayed tx {}", tx_hash);
                return Err(BlockchainError::PoolFull);
            }
            if inner.evict_cheapest_queued(&sender).is_none() {
                return Err(BlockchainError::PoolFull);
            }
        }

        // 6. a resubmission for a nonce that was already promoted
        // replaces the pending entry in place, anything else goes to
        // the queue first and contiguous nonces move over to pending.
        // Either way one (sender, nonce) slot holds one transaction.
        let promoted = inner
            .pending
            .get_mut(&sender)
            .and_then(|list| list.txs.get_mut(&tx.get_nonce()));
        match promoted {
            Some(slot) => {
                let replaced = slot.hash();
                *slot = tx;
                inner.all.remove(&replaced);
                inner.all.insert(tx_hash.clone());
                trace!("pending tx {} replaced by {}", replaced, tx_hash);
            }
            None => {
                inner.all.insert(tx_hash.clone());
                if let Some(replaced) = inner
                    .queued
                    .entry(sender)
                    .or_insert_with(SenderList::new)
                    .txs
                    .insert(tx.get_nonce(), tx)
                {
                    inner.all.remove(&replaced.hash());
                }
                inner.promote(&sender, chain_nonce);
            }
        }

        drop(guard);
        trace!("accepted tx {} from {}", tx_hash, sender);

        // 7. hand the hash to the broadcast collaborator
        if let Ok(announce) = self.announce.lock() {
            if let Some(channel) = announce.as_ref() {
                let _ = channel.send(tx_hash);
            }
        }
        Ok(())
    }

    pub fn contains(&self, hash: &Hash) -> Result<bool, BlockchainError> {
        Ok(self.lock()?.all.contains(hash))
    }

    pub fn size(&self) -> Result<usize, BlockchainError> {
        Ok(self.lock()?.size())
    }

    /// Next nonce that would be accepted into pending for the sender
    pub fn pending_nonce(&self, sender: &Address) -> Result<Nonce, BlockchainError> {
        let inner = self.lock()?;
        match inner.pending_nonce.get(sender) {
            Some(nonce) => Ok(*nonce),
            None => self.store.get_nonce_committed(sender),
        }
    }

    /// Every pooled transaction of one sender, pending first
    pub fn transactions_for(&self, sender: &Address) -> Result<Vec<Arc<Transaction>>, BlockchainError> {
        let inner = self.lock()?;
        let mut txs = Vec::new();
        if let Some(list) = inner.pending.get(sender) {
            txs.extend(list.txs.values().cloned());
        }
        if let Some(list) = inner.queued.get(sender) {
            txs.extend(list.txs.values().cloned());
        }
        Ok(txs)
    }

    /// Pull a block-sized batch out of the pending tier: gas price
    /// descending across senders, nonce ascending within one, hash
    /// breaking ties so every producer sees the same order.
    pub fn collect(&self, gas_limit: u64) -> Result<Vec<Arc<Transaction>>, BlockchainError> {
        // Snapshot under the lock, merge outside of it
        let groups: Vec<VecDeque<Arc<Transaction>>> = {
            let inner = self.lock()?;
            inner
                .pending
                .values()
                .filter(|list| !list.txs.is_empty())
                .map(|list| list.txs.values().cloned().collect())
                .collect()
        };

        let mut heap: BinaryHeap<CollectGroup> = groups
            .into_iter()
            .map(|txs| CollectGroup { txs })
            .collect();

        let mut selected = Vec::new();
        let mut gas_total: u64 = 0;

        while let Some(mut group) = heap.pop() {
            let tx = match group.txs.pop_front() {
                Some(tx) => tx,
                None => continue,
            };

            // Stop at the first tx that would blow the budget, like
            // the producer would mid-block
            if gas_total + tx.get_gas_limit() > gas_limit {
                break;
            }
            gas_total += tx.get_gas_limit();
            selected.push(tx);

            if !group.txs.is_empty() {
                heap.push(group);
            }
        }

        Ok(selected)
    }

    /// Reconcile with the chain after a block landed: drop every tx
    /// whose nonce is now behind, drop what became unaffordable and
    /// re-promote what became contiguous.
    pub fn on_block_applied(&self, senders: &[Address]) -> Result<(), BlockchainError> {
        for sender in senders {
            let chain_nonce = self.store.get_nonce_committed(sender)?;
            let balance = self.store.get_balance_committed(sender)?;

            let mut guard = self.lock()?;
            let inner = &mut *guard;

            // Confirmed or outdated nonces leave both tiers
            for tier in [&mut inner.queued, &mut inner.pending] {
                if let Some(list) = tier.get_mut(sender) {
                    let stale: Vec<Nonce> = list
                        .txs
                        .range(..chain_nonce)
                        .map(|(nonce, _)| *nonce)
                        .collect();
                    for nonce in stale {
                        if let Some(tx) = list.txs.remove(&nonce) {
                            inner.all.remove(&tx.hash());
                        }
                    }
                }
            }
            // Pending txs the sender can no longer afford are dropped
            // together with everything after them
            if let Some(list) = inner.pending.get_mut(sender) {
                let mut spendable = balance;
                let mut cut: Option<Nonce> = None;
                for (nonce, tx) in list.txs.iter() {
                    let cost = tx.cost();
                    if spendable < cost {
                        cut = Some(*nonce);
                        break;
                    }
                    spendable -= cost;
                }
                if let Some(cut) = cut {
                    let dropped: Vec<(Nonce, Arc<Transaction>)> = list
                        .txs
                        .split_off(&cut)
                        .into_iter()
                        .collect();
                    for (_, tx) in &dropped {
                        inner.all.remove(&tx.hash());
                    }
                    debug!(
                        "dropped {} unaffordable pending txs of {}",
                        dropped.len(),
                        sender
                    );
                }
                if list.txs.is_empty() {
                    inner.pending.remove(sender);
                }
            }

            // Re-seed the pending cursor behind whatever survived,
            // then re-scan: queued entries may have become contiguous
            let base = inner
                .pending
                .get(sender)
                .and_then(|list| list.txs.keys().next_back().copied())
                .map(|last| last + 1)
                .unwrap_or(chain_nonce);
            inner.pending_nonce.insert(*sender, base);
            inner.promote(sender, chain_nonce);

            // Clear empty bookkeeping so the maps stay bounded
            if inner
                .pending
                .get(sender)
                .map(|l| l.txs.is_empty())
                .unwrap_or(false)
            {
                inner.pending.remove(sender);
            }
        }
        Ok(())
    }

    /// Long-lived reconciliation loop fed by the chain manager.
    /// Returns when the quit channel flips or every sender handle is
    /// gone.
    pub async fn run_reconciler(
        self: Arc<Self>,
        mut senders_rx: mpsc::Receiver<Vec<Address>>,
        mut quit: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = senders_rx.recv() => {
                    match changed {
                        Some(senders) => {
                            if let Err(e) = self.on_block_applied(&senders) {
                                warn!("pool reconciliation failed: {}", e);
                            }
                        }
                        None => return,
                    }
                }
                _ = quit.changed() => {
                    if *quit.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
