// Chain wide constants shared by every node. Changing any consensus
// value here is a hard fork.

// Protocol version carried in block headers and transactions
pub const CHAIN_VERSION: u32 = 1;

// 1 gwei, the unit gas prices are quoted in
pub const GWEI: u64 = 1_000_000_000;

// Genesis parameters
pub const GENESIS_TIMESTAMP: u64 = 1545282765;
pub const GENESIS_GAS_LIMIT: u64 = 180_000_000;

// Adaptive gas limit envelope
pub const MIN_GAS_LIMIT: u64 = 5_000;
pub const MAX_GAS_LIMIT: u64 = 180_000_000;
// A header may move its gas limit by at most parent_limit / 1024
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;

// Hard cap a header gas limit can never exceed
pub const GAS_LIMIT_CAP: u64 = 0x7fffffffffffffff;

// Target spacing between blocks in seconds
pub const BLOCK_INTERVAL: u64 = 5;
// Headers from the future are rejected beyond this drift
pub const ALLOWED_FUTURE_BLOCK_TIME: u64 = 15;

// Gas schedule for the transaction envelope
pub const TX_GAS: u64 = 21_000;
pub const TX_GAS_CONTRACT_CREATION: u64 = 53_000;
pub const TX_DATA_ZERO_GAS: u64 = 4;
pub const TX_DATA_NON_ZERO_GAS: u64 = 68;

// Transaction pool
pub const POOL_MAX_SIZE: usize = 100_000;

// Orphan blocks
pub const MAX_ORPHAN_BLOCKS: usize = 100;
pub const ORPHAN_EXPIRATION: u64 = 60 * 60; // seconds

// Gas price oracle
pub const ORACLE_BLOCKS: usize = 20;
pub const ORACLE_PERCENTILE: usize = 60;
pub const ORACLE_DEFAULT_PRICE: u64 = GWEI;
pub const ORACLE_MAX_PRICE: u64 = 500 * GWEI;

// Peering
pub const MAX_PEERS: usize = 20;
// Relayed objects are forwarded to 1 out of BROADCAST_RATIO peers
pub const BROADCAST_RATIO: usize = 3;

// Sync deadlines in seconds
pub const FIND_ANCESTOR_TIMEOUT: u64 = 30;
pub const GET_HEADER_TIMEOUT: u64 = 30;
pub const GET_BLOCK_TIMEOUT: u64 = 60;
// Header hashes requested per batch during sync
pub const SYNC_HEADER_BATCH: u64 = 192;
// Blocks requested per batch during sync
pub const SYNC_BLOCK_BATCH: usize = 64;

// Virtual machine limits
pub const VM_STACK_LIMIT: usize = 1024;
pub const VM_CALL_DEPTH: usize = 1024;
