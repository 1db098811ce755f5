use crate::{
    core::{blockchain::Blockchain, error::BlockchainError},
    p2p::{HeaderHashEntry, PeerState},
};
use arbor_common::{
    block::Block,
    config::{
        FIND_ANCESTOR_TIMEOUT, GET_BLOCK_TIMEOUT, GET_HEADER_TIMEOUT, SYNC_BLOCK_BATCH,
        SYNC_HEADER_BATCH,
    },
    crypto::{Hash, Hashable},
};
use async_trait::async_trait;
use log::{debug, info, trace, warn};
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

// Remote peer as the sync coordinator sees it. The transport behind
// these calls is the delegated network collaborator.
#[async_trait]
pub trait SyncPeer: Send + Sync {
    fn id(&self) -> String;

    async fn peer_state(&self) -> Result<PeerState, BlockchainError>;

    async fn get_header_hashes(
        &self,
        from: u64,
        count: u64,
    ) -> Result<Vec<HeaderHashEntry>, BlockchainError>;

    async fn get_blocks(&self, hashes: Vec<Hash>) -> Result<Vec<Block>, BlockchainError>;
}

async fn with_deadline<T>(
    duration: u64,
    what: &'static str,
    fut: impl std::future::Future<Output = Result<T, BlockchainError>>,
) -> Result<T, BlockchainError> {
    match timeout(Duration::from_secs(duration), fut).await {
        Ok(result) => result,
        Err(_) => Err(BlockchainError::Timeout(what)),
    }
}

/// Pulls missing blocks from one peer at a time into the chain
/// manager: find the fork point, stream header hashes, fetch bodies
/// in parallel batches and feed them to ProcessBlock in order.
pub struct Synchronizer {
    chain: Arc<Blockchain>,
    quit: watch::Receiver<bool>,
}

impl Synchronizer {
    pub fn new(chain: Arc<Blockchain>, quit: watch::Receiver<bool>) -> Self {
        Self { chain, quit }
    }

    /// Catch up with a better peer. Returns the number of blocks
    /// accepted into the chain.
    pub async fn sync_with(&self, peer: Arc<dyn SyncPeer>) -> Result<u64, BlockchainError> {
        let state = with_deadline(GET_HEADER_TIMEOUT, "requesting peer state", peer.peer_state()).await?;
        let our_height = self.chain.best_height()?;

        if state.height <= our_height && self.chain.block_exists(&state.best_hash)? {
            trace!("peer {} has nothing new", peer.id());
            return Ok(0);
        }

        let ancestor = with_deadline(
            FIND_ANCESTOR_TIMEOUT,
            "finding common ancestor",
            self.find_ancestor(&peer, our_height.min(state.height)),
        )
        .await?;
        debug!(
            "syncing with {} from ancestor height {} to {}",
            peer.id(),
            ancestor,
            state.height
        );

        // Long-lived pipeline: header hashes flow into the fetcher,
        // block batches flow back into the chain manager
        let (header_hash_tx, mut header_hash_rx) = mpsc::channel::<Vec<HeaderHashEntry>>(4);
        let (blocks_tx, mut blocks_rx) = mpsc::channel::<Vec<Block>>(4);

        // Header hash stream
        let header_peer = Arc::clone(&peer);
        let target = state.height;
        let mut header_quit = self.quit.clone();
        let headers_task = tokio::spawn(async move {
            let mut from = ancestor + 1;
            while from <= target {
                if *header_quit.borrow_and_update() {
                    return Ok(());
                }
                let count = SYNC_HEADER_BATCH.min(target - from + 1);
                let hashes = with_deadline(
                    GET_HEADER_TIMEOUT,
                    "fetching header hashes",
                    header_peer.get_header_hashes(from, count),
                )
                .await?;
                if hashes.is_empty() {
                    return Err(BlockchainError::PeerMisbehaved(
                        "empty header hash batch".into(),
                    ));
                }
                from += hashes.len() as u64;
                if header_hash_tx.send(hashes).await.is_err() {
                    return Ok(());
                }
            }
            Ok::<(), BlockchainError>(())
        });

        // Body fetcher
        let body_peer = Arc::clone(&peer);
        let bodies_task = tokio::spawn(async move {
            while let Some(batch) = header_hash_rx.recv().await {
                for chunk in batch.chunks(SYNC_BLOCK_BATCH) {
                    let wanted: Vec<Hash> = chunk.iter().map(|e| e.hash.clone()).collect();
                    let blocks = with_deadline(
                        GET_BLOCK_TIMEOUT,
                        "fetching blocks",
                        body_peer.get_blocks(wanted.clone()),
                    )
                    .await?;
                    if blocks.len() != wanted.len() {
                        return Err(BlockchainError::PeerMisbehaved(format!(
                            "asked for {} blocks, got {}",
                            wanted.len(),
                            blocks.len()
                        )));
                    }
                    if blocks_tx.send(blocks).await.is_err() {
                        return Ok(());
                    }
                }
            }
            Ok::<(), BlockchainError>(())
        });

        // Importer: strictly ordered, one block at a time
        let mut accepted = 0u64;
        let mut quit = self.quit.clone();
        loop {
            tokio::select! {
                batch = blocks_rx.recv() => {
                    let batch = match batch {
                        Some(batch) => batch,
                        None => break,
                    };
                    for block in batch {
                        let hash = block.hash();
                        match self.chain.process_block(block) {
                            Ok(outcome) => {
                                if outcome.accepted {
                                    accepted += 1;
                                }
                            }
                            Err(BlockchainError::BlockExists(_)) => {}
                            Err(e) => {
                                warn!("sync block {} rejected: {}", hash, e);
                                if e.is_fatal() {
                                    return Err(e);
                                }
                            }
                        }
                    }
                }
                _ = quit.changed() => {
                    if *quit.borrow() {
                        debug!("sync with {} cancelled", peer.id());
                        break;
                    }
                }
            }
        }

        match headers_task.await {
            Ok(result) => result?,
            Err(e) => return Err(BlockchainError::StoreUnavailable(e.to_string())),
        }
        match bodies_task.await {
            Ok(result) => result?,
            Err(e) => return Err(BlockchainError::StoreUnavailable(e.to_string())),
        }

        info!("synced {} blocks from {}", accepted, peer.id());
        Ok(accepted)
    }

    /// Keep a peer tracked forever: re-sync on an interval, back off
    /// exponentially on recoverable failures, stop on corruption or
    /// when the quit channel flips.
    pub async fn run(&self, peer: Arc<dyn SyncPeer>) -> Result<(), BlockchainError> {
        let mut backoff = Duration::from_secs(1);
        let mut quit = self.quit.clone();

        loop {
            let wait = match self.sync_with(Arc::clone(&peer)).await {
                Ok(_) => {
                    backoff = Duration::from_secs(1);
                    Duration::from_secs(arbor_common::config::BLOCK_INTERVAL)
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("sync with {} failed: {}, backing off {:?}", peer.id(), e, backoff);
                    let wait = backoff;
                    backoff = (backoff * 2).min(Duration::from_secs(60));
                    wait
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = quit.changed() => {
                    if *quit.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    // Binary search for the highest height where the peer chain and
    // ours agree
    async fn find_ancestor(
        &self,
        peer: &Arc<dyn SyncPeer>,
        upper: u64,
    ) -> Result<u64, BlockchainError> {
        let mut low = 0u64;
        let mut high = upper;

        while low < high {
            let mid = (low + high + 1) / 2;
            let entries = peer.get_header_hashes(mid, 1).await?;
            let peer_hash = entries
                .first()
                .map(|e| e.hash.clone())
                .ok_or_else(|| BlockchainError::PeerMisbehaved("missing ancestor hash".into()))?;

            if self.chain.hash_at_height(mid)? == Some(peer_hash) {
                low = mid;
            } else {
                high = mid - 1;
            }
        }

        Ok(low)
    }

    /// Serve orphan back-requests: whenever the chain manager parks
    /// an orphan it asks here for the missing parent.
    pub async fn serve_back_requests(
        &self,
        peer: Arc<dyn SyncPeer>,
        mut requests: mpsc::UnboundedReceiver<Hash>,
    ) {
        let mut quit = self.quit.clone();
        loop {
            tokio::select! {
                request = requests.recv() => {
                    let hash = match request {
                        Some(hash) => hash,
                        None => return,
                    };
                    if self.chain.block_exists(&hash).unwrap_or(false) {
                        continue;
                    }
                    match with_deadline(
                        GET_BLOCK_TIMEOUT,
                        "fetching orphan parent",
                        peer.get_blocks(vec![hash.clone()]),
                    )
                    .await
                    {
                        Ok(blocks) => {
                            for block in blocks {
                                if let Err(e) = self.chain.process_block(block) {
                                    trace!("orphan parent {} rejected: {}", hash, e);
                                }
                            }
                        }
                        Err(e) => warn!("back-request for {} failed: {}", hash, e),
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
