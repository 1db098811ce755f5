mod block;
mod header;
mod merkle;

pub use block::{Block, Proof};
pub use header::{BlockHeader, MAX_MINOR_SIGNERS};
pub use merkle::{calculate_merkle_root, receipts_merkle_root, transactions_merkle_root};
