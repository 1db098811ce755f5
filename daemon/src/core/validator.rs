use crate::core::error::BlockchainError;
use arbor_common::{
    block::{transactions_merkle_root, Block, BlockHeader, MAX_MINOR_SIGNERS},
    config::{
        ALLOWED_FUTURE_BLOCK_TIME, CHAIN_VERSION, GAS_LIMIT_BOUND_DIVISOR, GAS_LIMIT_CAP,
        GENESIS_GAS_LIMIT, MAX_GAS_LIMIT, MIN_GAS_LIMIT,
    },
    crypto::{Hashable, Signature},
    time::get_current_time_in_seconds,
    transaction::ChainId,
};
use std::sync::Arc;

// Consensus plugin seam: leader and minor signatures are checked by
// whatever engine the node was started with, the core treats the
// proof as opaque.
pub trait ProofValidator: Send + Sync {
    fn verify_proof(&self, block: &Block) -> Result<(), BlockchainError>;
}

// Engine selected at startup
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EngineKind {
    Solo,
    Bft,
}

/// Solo engine: the proof is the leader's signature over the header
/// hash, nothing else.
pub struct SoloProofValidator;

impl ProofValidator for SoloProofValidator {
    fn verify_proof(&self, block: &Block) -> Result<(), BlockchainError> {
        let proof = block.get_proof();
        let header = block.get_header();

        let signature = Signature::from_bytes(&proof.evidence)
            .map_err(|_| BlockchainError::BadProof("malformed leader signature".into()))?;
        let signer = signature.recover(&header.hash())?;

        if signer.serialize_compressed() != *header.get_leader().as_bytes() {
            return Err(BlockchainError::BadProof(
                "leader signature does not match the header leader".into(),
            ));
        }
        Ok(())
    }
}

/// Stateless, deterministic checks on headers and bodies
pub struct BlockValidator {
    chain_id: ChainId,
    proof: Arc<dyn ProofValidator>,
}

impl BlockValidator {
    pub fn new(chain_id: ChainId, proof: Arc<dyn ProofValidator>) -> Self {
        Self { chain_id, proof }
    }

    // Context-free shape checks, run before the parent is known
    pub fn verify_sanity(&self, header: &BlockHeader) -> Result<(), BlockchainError> {
        if *header.get_chain_id() != self.chain_id {
            return Err(BlockchainError::ChainIdMismatch);
        }
        if header.get_version() != CHAIN_VERSION {
            return Err(BlockchainError::VersionMismatch(header.get_version()));
        }
        if header.get_gas_limit() > GAS_LIMIT_CAP {
            return Err(BlockchainError::BadGasLimit(header.get_gas_limit()));
        }
        if header.get_gas_used() > header.get_gas_limit() {
            return Err(BlockchainError::BadGasUsed {
                have: header.get_gas_used(),
                want: header.get_gas_limit(),
            });
        }
        if header.get_minor_signers().len() > MAX_MINOR_SIGNERS {
            return Err(BlockchainError::BadProof("too many minor signers".into()));
        }
        Ok(())
    }

    pub fn verify_header(
        &self,
        header: &BlockHeader,
        parent: &BlockHeader,
    ) -> Result<(), BlockchainError> {
        self.verify_sanity(header)?;

        let parent_hash = parent.hash();
        if *header.get_previous_hash() != parent_hash {
            return Err(BlockchainError::PrevHashMismatch {
                have: header.get_previous_hash().clone(),
                want: parent_hash,
            });
        }
        if header.get_height() != parent.get_height() + 1 {
            return Err(BlockchainError::BadHeight {
                have: header.get_height(),
                parent: parent.get_height(),
            });
        }
        if header.get_timestamp() <= parent.get_timestamp() {
            return Err(BlockchainError::BadTimestamp(header.get_timestamp()));
        }
        // Admission control only; consensus never reads the clock
        if header.get_timestamp() > get_current_time_in_seconds() + ALLOWED_FUTURE_BLOCK_TIME {
            return Err(BlockchainError::BadTimestamp(header.get_timestamp()));
        }

        // Adaptive envelope around the parent gas limit
        let parent_limit = parent.get_gas_limit();
        let limit = header.get_gas_limit();
        let bound = parent_limit / GAS_LIMIT_BOUND_DIVISOR;
        if limit.abs_diff(parent_limit) > bound {
            return Err(BlockchainError::BadGasLimit(limit));
        }
        if !(MIN_GAS_LIMIT..=MAX_GAS_LIMIT).contains(&limit) {
            return Err(BlockchainError::BadGasLimit(limit));
        }

        Ok(())
    }

    pub fn verify_body(&self, block: &Block) -> Result<(), BlockchainError> {
        let header = block.get_header();

        let tx_root = transactions_merkle_root(block.get_transactions());
        if tx_root != *header.get_tx_root() {
            return Err(BlockchainError::TxRootMismatch {
                have: tx_root,
                want: header.get_tx_root().clone(),
            });
        }

        for tx in block.get_transactions() {
            if tx.get_chain_id() != &self.chain_id {
                return Err(BlockchainError::ChainIdMismatch);
            }
            tx.verify_signature()
                .map_err(|_| BlockchainError::BadSignature)?;
        }

        Ok(())
    }

    pub fn verify_proof(&self, block: &Block) -> Result<(), BlockchainError> {
        self.proof.verify_proof(block)
    }
}

/// Next gas limit a producer targets: drift towards the genesis
/// limit, never leaving the adaptive envelope
pub fn calc_gas_limit(parent: &BlockHeader) -> u64 {
    let parent_limit = parent.get_gas_limit();
    let bound = (parent_limit / GAS_LIMIT_BOUND_DIVISOR).saturating_sub(1);
    let target = GENESIS_GAS_LIMIT;

    let limit = if parent_limit < target {
        (parent_limit + bound).min(target)
    } else if parent_limit > target {
        (parent_limit - bound).max(target)
    } else {
        parent_limit
    };

    limit.clamp(MIN_GAS_LIMIT, MAX_GAS_LIMIT)
}
