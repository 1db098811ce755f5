pub mod vm;

use crate::core::{
    error::BlockchainError,
    storage::{ChainStore, Journal},
};
use arbor_common::{
    block::{receipts_merkle_root, Block, BlockHeader},
    config::{TX_DATA_NON_ZERO_GAS, TX_DATA_ZERO_GAS, TX_GAS, TX_GAS_CONTRACT_CREATION},
    crypto::{hash, Address, Hash, Hashable},
    receipt::{Bloom, Log, Receipt},
    transaction::{Transaction, TxKind},
};
use log::{debug, trace};
use primitive_types::U256;

// Gas left for the block being executed. Every transaction takes its
// whole gas limit out up front and hands the unused part back.
pub struct GasPool {
    gas: u64,
}

impl GasPool {
    pub fn new(gas: u64) -> Self {
        Self { gas }
    }

    pub fn available(&self) -> u64 {
        self.gas
    }

    pub fn sub_gas(&mut self, amount: u64) -> Result<(), BlockchainError> {
        if self.gas < amount {
            return Err(BlockchainError::GasLimitReached);
        }
        self.gas -= amount;
        Ok(())
    }

    pub fn add_gas(&mut self, amount: u64) {
        self.gas = self.gas.saturating_add(amount);
    }
}

/// Everything one transaction execution needs, passed explicitly so
/// the machine carries no global state.
pub struct ExecContext<'a> {
    pub store: &'a ChainStore,
    pub journal: &'a mut Journal,
    pub header: &'a BlockHeader,
    pub gas_pool: &'a mut GasPool,
    pub origin: Address,
    pub leader: Address,
    pub gas_price: U256,
    pub tx_hash: Hash,
    // Accumulated refund counter, credited at the end of the tx
    pub refund: u64,
    pub logs: Vec<Log>,
}

/// Gas charged before the machine starts, covering signature recovery
/// and payload bytes
pub fn intrinsic_gas(data: &[u8], contract_creation: bool) -> Result<u64, BlockchainError> {
    let mut gas = if contract_creation {
        TX_GAS_CONTRACT_CREATION
    } else {
        TX_GAS
    };

    if !data.is_empty() {
        let non_zero = data.iter().filter(|byte| **byte != 0).count() as u64;
        let zero = data.len() as u64 - non_zero;

        gas = non_zero
            .checked_mul(TX_DATA_NON_ZERO_GAS)
            .and_then(|g| g.checked_add(gas))
            .ok_or(BlockchainError::OutOfGas)?;
        gas = zero
            .checked_mul(TX_DATA_ZERO_GAS)
            .and_then(|g| g.checked_add(gas))
            .ok_or(BlockchainError::OutOfGas)?;
    }

    Ok(gas)
}

fn rlp_encode_bytes(out: &mut Vec<u8>, payload: &[u8]) {
    if payload.len() == 1 && payload[0] < 0x80 {
        out.push(payload[0]);
    } else {
        // All callers stay far below the 55-byte long-form boundary
        out.push(0x80 + payload.len() as u8);
        out.extend_from_slice(payload);
    }
}

/// Address of a contract created by `sender` at `nonce`:
/// keccak256(rlp(sender, nonce))[12..]
pub fn create_address(sender: &Address, nonce: u64) -> Address {
    let mut items = Vec::new();
    rlp_encode_bytes(&mut items, sender.as_bytes());

    let nonce_bytes = nonce.to_be_bytes();
    let minimal = &nonce_bytes[nonce_bytes.iter().position(|b| *b != 0).unwrap_or(8)..];
    rlp_encode_bytes(&mut items, minimal);

    let mut encoded = Vec::with_capacity(1 + items.len());
    encoded.push(0xc0 + items.len() as u8);
    encoded.extend_from_slice(&items);

    Address::from_hash(&hash(&encoded))
}

/// CREATE2-style address: keccak256(0xff ++ sender ++ salt ++
/// keccak(init_code))[12..]
pub fn create2_address(sender: &Address, salt: &U256, init_hash: &Hash) -> Address {
    let mut data = Vec::with_capacity(1 + 20 + 32 + 32);
    data.push(0xff);
    data.extend_from_slice(sender.as_bytes());
    data.extend_from_slice(&salt.to_big_endian());
    data.extend_from_slice(init_hash.as_bytes());

    Address::from_hash(&hash(&data))
}

/// Apply a single transaction to the journal.
///
/// The nonce bump and the gas actually burned survive a machine
/// failure; every other effect, the value transfer included, is
/// unwound to the savepoint taken before the transfer phase.
pub fn execute_transaction(
    store: &ChainStore,
    journal: &mut Journal,
    header: &BlockHeader,
    gas_pool: &mut GasPool,
    tx: &Transaction,
    cumulative_gas: u64,
) -> Result<Receipt, BlockchainError> {
    let tx_hash = tx.hash();
    let from = *tx.get_from();
    let gas_price = tx.get_gas_price();
    let gas_limit = tx.get_gas_limit();

    // 1. intrinsic gas
    let intrinsic = intrinsic_gas(tx.get_data(), tx.is_contract_creation())?;
    if gas_limit < intrinsic {
        return Err(BlockchainError::IntrinsicGas {
            limit: gas_limit,
            need: intrinsic,
        });
    }

    // 2. nonce must equal the on-chain one
    let chain_nonce = store.get_nonce(journal, &from)?;
    if tx.get_nonce() < chain_nonce {
        return Err(BlockchainError::NonceTooLow {
            have: tx.get_nonce(),
            chain: chain_nonce,
        });
    }
    if tx.get_nonce() > chain_nonce {
        return Err(BlockchainError::NonceTooHigh {
            have: tx.get_nonce(),
            chain: chain_nonce,
        });
    }

    let leader = header.get_leader().address()?;
    let mut ctx = ExecContext {
        store,
        journal: &mut *journal,
        header,
        gas_pool,
        origin: from,
        leader,
        gas_price,
        tx_hash: tx_hash.clone(),
        refund: 0,
        logs: Vec::new(),
    };

    // 3. pre-pay the whole gas allowance and bump the nonce
    ctx.gas_pool.sub_gas(gas_limit)?;
    store.sub_balance(ctx.journal, &from, gas_price.saturating_mul(U256::from(gas_limit)))?;
    store.put_nonce(ctx.journal, &from, chain_nonce + 1)?;

    // Savepoint guarding the transfer and machine phases
    let savepoint = ctx.journal.savepoint();
    let vm_gas = gas_limit - intrinsic;
    let amount = tx.get_amount();

    let mut status = true;
    let mut gas_left = vm_gas;
    let mut contract_address = None;

    match tx.get_kind() {
        // 4. pure value movement
        TxKind::Transfer => {
            let to = *tx.get_to().ok_or(BlockchainError::UnsupportedTxType)?;
            store.sub_balance(ctx.journal, &from, amount)?;
            store.add_balance(ctx.journal, &to, amount)?;
        }
        TxKind::SetAlias => {
            let alias = tx.alias().ok_or(BlockchainError::InvalidAlias)?;
            store.set_alias(ctx.journal, &from, &alias)?;
        }
        // 5. machine phases
        TxKind::CreateContract => {
            let address = create_address(&from, tx.get_nonce());
            store.sub_balance(ctx.journal, &from, amount)?;
            store.add_balance(ctx.journal, &address, amount)?;
            store.put_nonce(ctx.journal, &address, 1)?;

            let outcome = vm::execute(
                &mut ctx,
                vm::Frame {
                    contract: address,
                    code: tx.get_data().to_vec(),
                    caller: from,
                    value: amount,
                    input: Vec::new(),
                    gas: vm_gas,
                    is_static: false,
                    depth: 0,
                },
            )?;

            status = outcome.success;
            gas_left = outcome.gas_left;
            if outcome.success {
                store.put_byte_code(ctx.journal, &address, outcome.output)?;
                contract_address = Some(address);
            }
        }
        TxKind::CallContract => {
            let to = *tx.get_to().ok_or(BlockchainError::UnsupportedTxType)?;
            store.sub_balance(ctx.journal, &from, amount)?;
            store.add_balance(ctx.journal, &to, amount)?;

            let code = store.get_byte_code(ctx.journal, &to)?;
            let outcome = vm::execute(
                &mut ctx,
                vm::Frame {
                    contract: to,
                    code,
                    caller: from,
                    value: amount,
                    input: tx.get_data().to_vec(),
                    gas: vm_gas,
                    is_static: false,
                    depth: 0,
                },
            )?;

            status = outcome.success;
            gas_left = outcome.gas_left;
        }
    }

    // 8. a machine failure keeps the nonce bump and the burned gas
    // but unwinds everything after the savepoint
    if !status {
        ctx.journal.rollback_to(savepoint);
        trace!("transaction {} reverted", tx_hash);
    }

    // 6. refund: at most half the gas actually used
    let gas_used_raw = gas_limit - gas_left;
    let refund = if status {
        ctx.refund.min(gas_used_raw / 2)
    } else {
        0
    };
    let gas_used = gas_used_raw - refund;

    let logs = std::mem::take(&mut ctx.logs);

    store.add_balance(
        ctx.journal,
        &from,
        gas_price.saturating_mul(U256::from(gas_left + refund)),
    )?;

    // 7. the leader collects exactly what was burned
    store.add_balance(ctx.journal, &leader, gas_price.saturating_mul(U256::from(gas_used)))?;
    ctx.gas_pool.add_gas(gas_left + refund);

    // Accounts drained to nothing disappear from the trie
    for address in [&from, tx.get_to().unwrap_or(&from)] {
        if store.account_exists(ctx.journal, address)?
            && store.get_account(ctx.journal, address)?.is_empty()
        {
            store.delete_account(ctx.journal, address);
        }
    }

    debug!(
        "executed {} kind {:?} gas {} status {}",
        tx_hash,
        tx.get_kind(),
        gas_used,
        status
    );

    // 9. receipt
    Ok(Receipt::new(
        status,
        gas_used,
        cumulative_gas + gas_used,
        logs,
        contract_address,
        tx_hash,
    ))
}

/// Result of executing a full block body
pub struct BlockOutcome {
    pub receipts: Vec<Receipt>,
    pub gas_used: u64,
    pub gas_fee: U256,
    pub bloom: Bloom,
    pub state_root: Hash,
}

/// Execute every transaction of the block in order and require the
/// header commitments to match what actually happened.
pub fn execute_block(
    store: &ChainStore,
    journal: &mut Journal,
    block: &Block,
) -> Result<BlockOutcome, BlockchainError> {
    let header = block.get_header();
    let mut gas_pool = GasPool::new(header.get_gas_limit());

    // An empty transaction list is a valid block with zero
    // cumulative gas
    let mut receipts = Vec::with_capacity(block.get_txs_count());
    let mut cumulative_gas = 0;
    let mut gas_fee = U256::zero();
    let mut bloom = Bloom::zero();

    for tx in block.get_transactions() {
        let receipt = execute_transaction(store, journal, header, &mut gas_pool, tx, cumulative_gas)?;
        cumulative_gas = receipt.cumulative_gas_used;
        gas_fee = gas_fee.saturating_add(
            tx.get_gas_price().saturating_mul(U256::from(receipt.gas_used)),
        );
        for log in &receipt.logs {
            bloom.accrue_log(log);
        }
        receipts.push(receipt);
    }

    let receipt_root = receipts_merkle_root(&receipts);
    if receipt_root != *header.get_receipt_root() {
        return Err(BlockchainError::ReceiptRootMismatch {
            have: receipt_root,
            want: header.get_receipt_root().clone(),
        });
    }

    if cumulative_gas != header.get_gas_used() {
        return Err(BlockchainError::BadGasUsed {
            have: cumulative_gas,
            want: header.get_gas_used(),
        });
    }

    let state_root = store.state_root(journal)?;
    if state_root != *header.get_state_root() {
        return Err(BlockchainError::StateRootMismatch {
            have: state_root,
            want: header.get_state_root().clone(),
        });
    }

    Ok(BlockOutcome {
        receipts,
        gas_used: cumulative_gas,
        gas_fee,
        bloom,
        state_root,
    })
}
