use arbor_common::{
    account::Nonce,
    crypto::{Address, CryptoError, Hash},
    serializer::ReaderError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlockchainError {
    // Header and body validation
    #[error("chain id mismatch")]
    ChainIdMismatch,

    #[error("unsupported block version {0}")]
    VersionMismatch(u32),

    #[error("previous hash mismatch: have {have}, want {want}")]
    PrevHashMismatch { have: Hash, want: Hash },

    #[error("invalid block height {have}, parent is {parent}")]
    BadHeight { have: u64, parent: u64 },

    #[error("invalid timestamp {0}")]
    BadTimestamp(u64),

    #[error("invalid gas limit {0}")]
    BadGasLimit(u64),

    #[error("invalid gas used: have {have}, want {want}")]
    BadGasUsed { have: u64, want: u64 },

    #[error("transaction root mismatch: have {have}, want {want}")]
    TxRootMismatch { have: Hash, want: Hash },

    #[error("receipt root mismatch: have {have}, want {want}")]
    ReceiptRootMismatch { have: Hash, want: Hash },

    #[error("state root mismatch: have {have}, want {want}")]
    StateRootMismatch { have: Hash, want: Hash },

    #[error("invalid signature")]
    BadSignature,

    #[error("invalid consensus proof: {0}")]
    BadProof(String),

    // Transaction execution
    #[error("intrinsic gas too low: limit {limit}, need {need}")]
    IntrinsicGas { limit: u64, need: u64 },

    #[error("out of gas")]
    OutOfGas,

    #[error("nonce too low: have {have}, chain is at {chain}")]
    NonceTooLow { have: Nonce, chain: Nonce },

    #[error("nonce too high: have {have}, chain is at {chain}")]
    NonceTooHigh { have: Nonce, chain: Nonce },

    #[error("insufficient balance for {0}")]
    InsufficientBalance(Address),

    #[error("block gas limit reached")]
    GasLimitReached,

    #[error("unsupported transaction type")]
    UnsupportedTxType,

    #[error("negative amount in transaction")]
    NegativeAmount,

    #[error("invalid opcode {0:#04x}")]
    InvalidOpcode(u8),

    #[error("stack underflow")]
    StackUnderflow,

    #[error("stack overflow")]
    StackOverflow,

    #[error("invalid jump destination")]
    InvalidJump,

    #[error("alias already registered: {0}")]
    AliasTaken(String),

    #[error("invalid alias")]
    InvalidAlias,

    // Chain management
    #[error("already have block {0}")]
    BlockExists(Hash),

    #[error("block {0} is an orphan")]
    OrphanBlock(Hash),

    #[error("block {0} descends from an invalid block")]
    AncestorInvalid(Hash),

    #[error("reorganization aborted at block {0}")]
    ReorgAborted(Hash),

    #[error("block not found: {0}")]
    BlockNotFound(Hash),

    #[error("transaction index out of range")]
    TxIndexOutOfRange,

    // Transaction pool
    #[error("transaction pool is full")]
    PoolFull,

    #[error("transaction {0} already known")]
    AlreadyKnown(Hash),

    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds { need: String, have: String },

    #[error("transaction gas limit {0} exceeds block gas limit")]
    ExceedsBlockGasLimit(u64),

    // Infrastructure
    #[error("storage unavailable: {0}")]
    StoreUnavailable(String),

    #[error("data corruption: {0}")]
    Corruption(String),

    #[error("timeout while {0}")]
    Timeout(&'static str),

    #[error("sync peer misbehaved: {0}")]
    PeerMisbehaved(String),

    #[error(transparent)]
    Decode(#[from] ReaderError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl BlockchainError {
    // Corruption terminates the node, everything else is recoverable
    pub fn is_fatal(&self) -> bool {
        matches!(self, BlockchainError::Corruption(_))
    }
}
