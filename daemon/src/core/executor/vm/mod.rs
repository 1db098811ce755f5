mod gas;
mod memory;
mod opcode;
mod stack;

pub use gas::{max_call_gas, memory_expansion_gas, memory_gas};
pub use memory::Memory;
pub use opcode::OpCode;
pub use stack::Stack;

use super::{create2_address, create_address, ExecContext};
use crate::core::error::BlockchainError;
use arbor_common::{
    config::VM_CALL_DEPTH,
    crypto::{hash, Address, Hash},
    receipt::{Log, MAX_LOG_TOPICS},
};
use log::trace;
use primitive_types::{U256, U512};
use std::collections::HashSet;

// Machine level failures. Any of these halts the frame and consumes
// all of its remaining gas.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VmError {
    OutOfGas,
    StackUnderflow,
    StackOverflow,
    InvalidJump,
    InvalidOpcode(u8),
    WriteInStaticContext,
}

// Frame exits that are not failures
enum VmExit {
    Stop,
    Return(Vec<u8>),
    Revert(Vec<u8>),
}

// Error channel of the interpreter loop: machine faults unwind the
// frame, store faults abort the whole block pipeline.
enum Interrupt {
    Vm(VmError),
    Store(BlockchainError),
}

impl From<VmError> for Interrupt {
    fn from(e: VmError) -> Self {
        Interrupt::Vm(e)
    }
}

impl From<BlockchainError> for Interrupt {
    fn from(e: BlockchainError) -> Self {
        Interrupt::Store(e)
    }
}

/// One message frame about to run
pub struct Frame {
    // Context account: storage and SELFDESTRUCT target
    pub contract: Address,
    // Code actually executed (differs from `contract` under
    // DELEGATECALL)
    pub code: Vec<u8>,
    pub caller: Address,
    pub value: U256,
    pub input: Vec<u8>,
    pub gas: u64,
    pub is_static: bool,
    pub depth: usize,
}

/// Result of a frame, reverts included
pub struct CallOutcome {
    pub success: bool,
    pub gas_left: u64,
    pub output: Vec<u8>,
}

impl CallOutcome {
    fn failed(gas_left: u64) -> Self {
        Self {
            success: false,
            gas_left,
            output: Vec::new(),
        }
    }
}

// Valid JUMP targets: every JUMPDEST byte outside push immediates
fn analyze_jumpdests(code: &[u8]) -> HashSet<usize> {
    let mut dests = HashSet::new();
    let mut pc = 0;
    while pc < code.len() {
        let byte = code[pc];
        if byte == OpCode::JumpDest as u8 {
            dests.insert(pc);
        }
        pc += 1 + OpCode::push_size(byte).unwrap_or(0);
    }
    dests
}

/// Run a frame against the journal. State changes of a reverted or
/// failed frame are unwound to the savepoint taken on entry; logs and
/// refunds follow the same discipline.
pub fn execute(ctx: &mut ExecContext, frame: Frame) -> Result<CallOutcome, BlockchainError> {
    let savepoint = ctx.journal.savepoint();
    let logs_mark = ctx.logs.len();
    let refund_mark = ctx.refund;

    match run(ctx, &frame) {
        Ok((VmExit::Stop, gas_left)) => Ok(CallOutcome {
            success: true,
            gas_left,
            output: Vec::new(),
        }),
        Ok((VmExit::Return(output), gas_left)) => Ok(CallOutcome {
            success: true,
            gas_left,
            output,
        }),
        Ok((VmExit::Revert(output), gas_left)) => {
            ctx.journal.rollback_to(savepoint);
            ctx.logs.truncate(logs_mark);
            ctx.refund = refund_mark;
            Ok(CallOutcome {
                success: false,
                gas_left,
                output,
            })
        }
        Err(Interrupt::Vm(error)) => {
            trace!("frame of {} halted: {:?}", frame.contract, error);
            ctx.journal.rollback_to(savepoint);
            ctx.logs.truncate(logs_mark);
            ctx.refund = refund_mark;
            Ok(CallOutcome::failed(0))
        }
        Err(Interrupt::Store(error)) => Err(error),
    }
}

fn use_gas(gas: &mut u64, amount: u64) -> Result<(), VmError> {
    if *gas < amount {
        return Err(VmError::OutOfGas);
    }
    *gas -= amount;
    Ok(())
}

// Offsets and sizes feeding memory must stay in a sane range, the
// expansion cost of anything larger cannot be paid anyway
fn to_usize(value: U256) -> Result<usize, VmError> {
    if value > U256::from(u32::MAX) {
        return Err(VmError::OutOfGas);
    }
    Ok(value.as_usize())
}

// Charge expansion and grow memory to cover the range
fn expand(
    gas: &mut u64,
    memory: &mut Memory,
    offset: U256,
    size: U256,
) -> Result<(usize, usize), VmError> {
    let size = to_usize(size)?;
    if size == 0 {
        return Ok((0, 0));
    }
    let offset = to_usize(offset)?;
    let target = ((offset + size) as u64).div_ceil(32);
    use_gas(gas, memory_expansion_gas(memory.words(), target)?)?;
    memory.resize(offset, size);
    Ok((offset, size))
}

fn is_negative(value: &U256) -> bool {
    value.bit(255)
}

fn twos_complement(value: U256) -> U256 {
    (!value).overflowing_add(U256::one()).0
}

fn abs(value: U256) -> U256 {
    if is_negative(&value) {
        twos_complement(value)
    } else {
        value
    }
}

fn bool_to_word(value: bool) -> U256 {
    if value {
        U256::one()
    } else {
        U256::zero()
    }
}

#[allow(clippy::too_many_lines)]
fn run(ctx: &mut ExecContext, frame: &Frame) -> Result<(VmExit, u64), Interrupt> {
    let code = &frame.code;
    let jumpdests = analyze_jumpdests(code);

    let mut stack = Stack::new();
    let mut memory = Memory::new();
    let mut return_data: Vec<u8> = Vec::new();
    let mut gas = frame.gas;
    let mut pc: usize = 0;

    loop {
        let byte = match code.get(pc) {
            Some(byte) => *byte,
            // Running off the end of the code is a normal stop
            None => return Ok((VmExit::Stop, gas)),
        };

        // Range dispatched families first
        if let Some(n) = OpCode::push_size(byte) {
            use_gas(&mut gas, gas::G_VERYLOW)?;
            let end = (pc + 1 + n).min(code.len());
            let mut bytes = [0u8; 32];
            let slice = &code[(pc + 1).min(code.len())..end];
            bytes[32 - n..32 - n + slice.len()].copy_from_slice(slice);
            stack.push(U256::from_big_endian(&bytes[32 - n..]))?;
            pc += 1 + n;
            continue;
        }
        if let Some(n) = OpCode::dup_index(byte) {
            use_gas(&mut gas, gas::G_VERYLOW)?;
            stack.dup(n)?;
            pc += 1;
            continue;
        }
        if let Some(n) = OpCode::swap_index(byte) {
            use_gas(&mut gas, gas::G_VERYLOW)?;
            stack.swap(n)?;
            pc += 1;
            continue;
        }
        if let Some(topics_count) = OpCode::log_topics(byte) {
            if frame.is_static {
                return Err(VmError::WriteInStaticContext.into());
            }
            let offset = stack.pop()?;
            let size = stack.pop()?;
            let mut topics = Vec::with_capacity(topics_count.min(MAX_LOG_TOPICS));
            for _ in 0..topics_count {
                topics.push(Hash::new(stack.pop()?.to_big_endian()));
            }

            let (offset, size) = expand(&mut gas, &mut memory, offset, size)?;
            use_gas(
                &mut gas,
                gas::G_LOG
                    + gas::G_LOG_TOPIC * topics_count as u64
                    + gas::G_LOG_DATA * size as u64,
            )?;

            ctx.logs.push(Log {
                address: frame.contract,
                topics,
                data: memory.get(offset, size),
                height: ctx.header.get_height(),
                tx_hash: ctx.tx_hash.clone(),
            });
            pc += 1;
            continue;
        }

        let op = match OpCode::from_u8(byte) {
            Some(op) => op,
            None => return Err(VmError::InvalidOpcode(byte).into()),
        };

        match op {
            OpCode::Stop => return Ok((VmExit::Stop, gas)),

            // ----- arithmetic -----
            OpCode::Add => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(a.overflowing_add(b).0)?;
            }
            OpCode::Mul => {
                use_gas(&mut gas, gas::G_LOW)?;
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(a.overflowing_mul(b).0)?;
            }
            OpCode::Sub => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(a.overflowing_sub(b).0)?;
            }
            OpCode::Div => {
                use_gas(&mut gas, gas::G_LOW)?;
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(if b.is_zero() { U256::zero() } else { a / b })?;
            }
            OpCode::SDiv => {
                use_gas(&mut gas, gas::G_LOW)?;
                let (a, b) = (stack.pop()?, stack.pop()?);
                let result = if b.is_zero() {
                    U256::zero()
                } else {
                    let negative = is_negative(&a) != is_negative(&b);
                    let quotient = abs(a) / abs(b);
                    if negative {
                        twos_complement(quotient)
                    } else {
                        quotient
                    }
                };
                stack.push(result)?;
            }
            OpCode::Mod => {
                use_gas(&mut gas, gas::G_LOW)?;
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(if b.is_zero() { U256::zero() } else { a % b })?;
            }
            OpCode::SMod => {
                use_gas(&mut gas, gas::G_LOW)?;
                let (a, b) = (stack.pop()?, stack.pop()?);
                let result = if b.is_zero() {
                    U256::zero()
                } else {
                    let remainder = abs(a) % abs(b);
                    if is_negative(&a) {
                        twos_complement(remainder)
                    } else {
                        remainder
                    }
                };
                stack.push(result)?;
            }
            OpCode::AddMod => {
                use_gas(&mut gas, gas::G_MID)?;
                let (a, b, n) = (stack.pop()?, stack.pop()?, stack.pop()?);
                let result = if n.is_zero() {
                    U256::zero()
                } else {
                    let sum = U512::from(a) + U512::from(b);
                    U256::try_from(sum % U512::from(n)).unwrap_or_default()
                };
                stack.push(result)?;
            }
            OpCode::MulMod => {
                use_gas(&mut gas, gas::G_MID)?;
                let (a, b, n) = (stack.pop()?, stack.pop()?, stack.pop()?);
                let result = if n.is_zero() {
                    U256::zero()
                } else {
                    let product = U512::from(a) * U512::from(b);
                    U256::try_from(product % U512::from(n)).unwrap_or_default()
                };
                stack.push(result)?;
            }
            OpCode::Exp => {
                let (base, exponent) = (stack.pop()?, stack.pop()?);
                let exp_bytes = (exponent.bits() as u64).div_ceil(8);
                use_gas(&mut gas, gas::G_EXP + gas::G_EXP_BYTE * exp_bytes)?;
                stack.push(base.overflowing_pow(exponent).0)?;
            }
            OpCode::SignExtend => {
                use_gas(&mut gas, gas::G_LOW)?;
                let (k, x) = (stack.pop()?, stack.pop()?);
                let result = if k >= U256::from(31u64) {
                    x
                } else {
                    let bit = k.as_usize() * 8 + 7;
                    let mask = (U256::one() << (bit + 1)) - U256::one();
                    if x.bit(bit) {
                        x | !mask
                    } else {
                        x & mask
                    }
                };
                stack.push(result)?;
            }

            // ----- comparison and bitwise -----
            OpCode::Lt => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(bool_to_word(a < b))?;
            }
            OpCode::Gt => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(bool_to_word(a > b))?;
            }
            OpCode::SLt => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let (a, b) = (stack.pop()?, stack.pop()?);
                let result = match (is_negative(&a), is_negative(&b)) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => a < b,
                };
                stack.push(bool_to_word(result))?;
            }
            OpCode::SGt => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let (a, b) = (stack.pop()?, stack.pop()?);
                let result = match (is_negative(&a), is_negative(&b)) {
                    (true, false) => false,
                    (false, true) => true,
                    _ => a > b,
                };
                stack.push(bool_to_word(result))?;
            }
            OpCode::Eq => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(bool_to_word(a == b))?;
            }
            OpCode::IsZero => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let a = stack.pop()?;
                stack.push(bool_to_word(a.is_zero()))?;
            }
            OpCode::And => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(a & b)?;
            }
            OpCode::Or => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(a | b)?;
            }
            OpCode::Xor => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(a ^ b)?;
            }
            OpCode::Not => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let a = stack.pop()?;
                stack.push(!a)?;
            }
            OpCode::Byte => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let (i, x) = (stack.pop()?, stack.pop()?);
                let result = if i >= U256::from(32u64) {
                    U256::zero()
                } else {
                    (x >> (8 * (31 - i.as_usize()))) & U256::from(0xffu64)
                };
                stack.push(result)?;
            }
            OpCode::Shl => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let (shift, value) = (stack.pop()?, stack.pop()?);
                let result = if shift >= U256::from(256u64) {
                    U256::zero()
                } else {
                    value << shift.as_usize()
                };
                stack.push(result)?;
            }
            OpCode::Shr => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let (shift, value) = (stack.pop()?, stack.pop()?);
                let result = if shift >= U256::from(256u64) {
                    U256::zero()
                } else {
                    value >> shift.as_usize()
                };
                stack.push(result)?;
            }
            OpCode::Sar => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let (shift, value) = (stack.pop()?, stack.pop()?);
                let negative = is_negative(&value);
                let result = if shift >= U256::from(256u64) {
                    if negative {
                        U256::max_value()
                    } else {
                        U256::zero()
                    }
                } else {
                    let shifted = value >> shift.as_usize();
                    if negative {
                        // backfill the sign bits
                        let mask = U256::max_value() << (256 - shift.as_usize());
                        shifted | mask
                    } else {
                        shifted
                    }
                };
                stack.push(result)?;
            }

            OpCode::Keccak256 => {
                let (offset, size) = (stack.pop()?, stack.pop()?);
                let (offset, size) = expand(&mut gas, &mut memory, offset, size)?;
                use_gas(
                    &mut gas,
                    gas::G_KECCAK256 + gas::G_KECCAK256_WORD * (size as u64).div_ceil(32),
                )?;
                let digest = hash(&memory.get(offset, size));
                stack.push(U256::from_big_endian(digest.as_bytes()))?;
            }

            // ----- environment -----
            OpCode::Address => {
                use_gas(&mut gas, gas::G_BASE)?;
                stack.push(address_to_word(&frame.contract))?;
            }
            OpCode::Balance => {
                use_gas(&mut gas, gas::G_BALANCE)?;
                let address = word_to_address(stack.pop()?);
                let balance = ctx.store.get_balance(ctx.journal, &address)?;
                stack.push(balance)?;
            }
            OpCode::Origin => {
                use_gas(&mut gas, gas::G_BASE)?;
                stack.push(address_to_word(&ctx.origin))?;
            }
            OpCode::Caller => {
                use_gas(&mut gas, gas::G_BASE)?;
                stack.push(address_to_word(&frame.caller))?;
            }
            OpCode::CallValue => {
                use_gas(&mut gas, gas::G_BASE)?;
                stack.push(frame.value)?;
            }
            OpCode::CallDataLoad => {
                use_gas(&mut gas, gas::G_VERYLOW)?;
                let offset = stack.pop()?;
                let mut bytes = [0u8; 32];
                if offset <= U256::from(u32::MAX) {
                    let offset = offset.as_usize();
                    for (i, byte) in bytes.iter_mut().enumerate() {
                        *byte = frame.input.get(offset + i).copied().unwrap_or(0);
                    }
                }
                stack.push(U256::from_big_endian(&bytes))?;
            }
            OpCode::CallDataSize => {
                use_gas(&mut gas, gas::G_BASE)?;
                stack.push(U256::from(frame.input.len()))?;
            }
            OpCode::CallDataCopy => {
                let (dest, src, size) = (stack.pop()?, stack.pop()?, stack.pop()?);
                let (dest, size) = expand(&mut gas, &mut memory, dest, size)?;
                use_gas(&mut gas, gas::G_VERYLOW + gas::copy_gas(size as u64)?)?;
                let src = to_usize(src.min(U256::from(u32::MAX)))?;
                memory.set_padded(dest, &frame.input, src, size);
            }
            OpCode::CodeSize => {
                use_gas(&mut gas, gas::G_BASE)?;
                stack.push(U256::from(code.len()))?;
            }
            OpCode::CodeCopy => {
                let (dest, src, size) = (stack.pop()?, stack.pop()?, stack.pop()?);
                let (dest, size) = expand(&mut gas, &mut memory, dest, size)?;
                use_gas(&mut gas, gas::G_VERYLOW + gas::copy_gas(size as u64)?)?;
                let src = to_usize(src.min(U256::from(u32::MAX)))?;
                memory.set_padded(dest, code, src, size);
            }
            OpCode::GasPrice => {
                use_gas(&mut gas, gas::G_BASE)?;
                stack.push(ctx.gas_price)?;
            }
            OpCode::ExtCodeSize => {
                use_gas(&mut gas, gas::G_EXTCODE)?;
                let address = word_to_address(stack.pop()?);
                let size = ctx.store.get_byte_code(ctx.journal, &address)?.len();
                stack.push(U256::from(size))?;
            }
            OpCode::ExtCodeCopy => {
                let address = word_to_address(stack.pop()?);
                let (dest, src, size) = (stack.pop()?, stack.pop()?, stack.pop()?);
                let (dest, size) = expand(&mut gas, &mut memory, dest, size)?;
                use_gas(&mut gas, gas::G_EXTCODE + gas::copy_gas(size as u64)?)?;
                let src = to_usize(src.min(U256::from(u32::MAX)))?;
                let ext_code = ctx.store.get_byte_code(ctx.journal, &address)?;
                memory.set_padded(dest, &ext_code, src, size);
            }
            OpCode::ReturnDataSize => {
                use_gas(&mut gas, gas::G_BASE)?;
                stack.push(U256::from(return_data.len()))?;
            }
            OpCode::ReturnDataCopy => {
                let (dest, src, size) = (stack.pop()?, stack.pop()?, stack.pop()?);
                let (dest, size) = expand(&mut gas, &mut memory, dest, size)?;
                use_gas(&mut gas, gas::G_VERYLOW + gas::copy_gas(size as u64)?)?;
                let src = to_usize(src.min(U256::from(u32::MAX)))?;
                memory.set_padded(dest, &return_data, src, size);
            }

            // ----- block context -----
            OpCode::Coinbase => {
                use_gas(&mut gas, gas::G_BASE)?;
                stack.push(address_to_word(&ctx.leader))?;
            }
            OpCode::Timestamp => {
                use_gas(&mut gas, gas::G_BASE)?;
                stack.push(U256::from(ctx.header.get_timestamp()))?;
            }
            OpCode::Number => {
                use_gas(&mut gas, gas::G_BASE)?;
                stack.push(U256::from(ctx.header.get_height()))?;
            }
            OpCode::GasLimit => {
                use_gas(&mut gas, gas::G_BASE)?;
                stack.push(U256::from(ctx.header.get_gas_limit()))?;
            }

            // ----- stack, memory, storage -----
            OpCode::Pop => {
                use_gas(&mut gas, gas::G_BASE)?;
                stack.pop()?;
            }
            OpCode::MLoad => {
                let offset = stack.pop()?;
                let (offset, _) = expand(&mut gas, &mut memory, offset, U256::from(32u64))?;
                use_gas(&mut gas, gas::G_VERYLOW)?;
                stack.push(memory.load_word(offset))?;
            }
            OpCode::MStore => {
                let offset = stack.pop()?;
                let value = stack.pop()?;
                let (offset, _) = expand(&mut gas, &mut memory, offset, U256::from(32u64))?;
                use_gas(&mut gas, gas::G_VERYLOW)?;
                memory.set_word(offset, &value);
            }
            OpCode::MStore8 => {
                let offset = stack.pop()?;
                let value = stack.pop()?;
                let (offset, _) = expand(&mut gas, &mut memory, offset, U256::one())?;
                use_gas(&mut gas, gas::G_VERYLOW)?;
                memory.set_byte(offset, value.byte(0));
            }
            OpCode::SLoad => {
                use_gas(&mut gas, gas::G_SLOAD)?;
                let slot = stack.pop()?;
                let value = ctx.store.load_storage(ctx.journal, &frame.contract, &slot)?;
                stack.push(value)?;
            }
            OpCode::SStore => {
                if frame.is_static {
                    return Err(VmError::WriteInStaticContext.into());
                }
                let slot = stack.pop()?;
                let value = stack.pop()?;
                let current = ctx.store.load_storage(ctx.journal, &frame.contract, &slot)?;

                let cost = if current.is_zero() && !value.is_zero() {
                    gas::G_SSTORE_SET
                } else {
                    gas::G_SSTORE_RESET
                };
                use_gas(&mut gas, cost)?;
                if !current.is_zero() && value.is_zero() {
                    ctx.refund += gas::R_SSTORE_CLEAR;
                }

                ctx.store
                    .store_storage(ctx.journal, &frame.contract, &slot, value);
            }

            // ----- control flow -----
            OpCode::Jump => {
                use_gas(&mut gas, gas::G_MID)?;
                let dest = to_usize(stack.pop()?).map_err(|_| VmError::InvalidJump)?;
                if !jumpdests.contains(&dest) {
                    return Err(VmError::InvalidJump.into());
                }
                pc = dest;
                continue;
            }
            OpCode::JumpI => {
                use_gas(&mut gas, gas::G_HIGH)?;
                let dest = stack.pop()?;
                let condition = stack.pop()?;
                if !condition.is_zero() {
                    let dest = to_usize(dest).map_err(|_| VmError::InvalidJump)?;
                    if !jumpdests.contains(&dest) {
                        return Err(VmError::InvalidJump.into());
                    }
                    pc = dest;
                    continue;
                }
            }
            OpCode::Pc => {
                use_gas(&mut gas, gas::G_BASE)?;
                stack.push(U256::from(pc))?;
            }
            OpCode::MSize => {
                use_gas(&mut gas, gas::G_BASE)?;
                stack.push(U256::from(memory.len()))?;
            }
            OpCode::Gas => {
                use_gas(&mut gas, gas::G_BASE)?;
                stack.push(U256::from(gas))?;
            }
            OpCode::JumpDest => {
                use_gas(&mut gas, gas::G_JUMPDEST)?;
            }

            // ----- system -----
            OpCode::Create | OpCode::Create2 => {
                if frame.is_static {
                    return Err(VmError::WriteInStaticContext.into());
                }
                let value = stack.pop()?;
                let offset = stack.pop()?;
                let size = stack.pop()?;
                let salt = if op == OpCode::Create2 {
                    Some(stack.pop()?)
                } else {
                    None
                };

                let (offset, size) = expand(&mut gas, &mut memory, offset, size)?;
                use_gas(&mut gas, gas::G_CREATE)?;
                if op == OpCode::Create2 {
                    use_gas(&mut gas, gas::G_KECCAK256_WORD * (size as u64).div_ceil(32))?;
                }

                let init_code = memory.get(offset, size);
                let forwarded = max_call_gas(gas);
                use_gas(&mut gas, forwarded)?;

                let (result, leftover) =
                    do_create(ctx, frame, value, init_code, salt, forwarded)?;
                gas += leftover;
                return_data.clear();
                match result {
                    Some(address) => stack.push(address_to_word(&address))?,
                    None => stack.push(U256::zero())?,
                }
            }
            OpCode::Call | OpCode::DelegateCall | OpCode::StaticCall => {
                let gas_requested = stack.pop()?;
                let target = word_to_address(stack.pop()?);
                let value = if op == OpCode::Call {
                    stack.pop()?
                } else {
                    U256::zero()
                };
                let in_offset = stack.pop()?;
                let in_size = stack.pop()?;
                let out_offset = stack.pop()?;
                let out_size = stack.pop()?;

                if op == OpCode::Call && frame.is_static && !value.is_zero() {
                    return Err(VmError::WriteInStaticContext.into());
                }

                let (in_offset, in_size) = expand(&mut gas, &mut memory, in_offset, in_size)?;
                let (out_offset, out_size) = expand(&mut gas, &mut memory, out_offset, out_size)?;

                let mut base = gas::G_CALL;
                if !value.is_zero() {
                    base += gas::G_CALL_VALUE;
                    if !ctx.store.account_exists(ctx.journal, &target)? {
                        base += gas::G_NEW_ACCOUNT;
                    }
                }
                use_gas(&mut gas, base)?;

                let cap = max_call_gas(gas);
                let forwarded = if gas_requested > U256::from(cap) {
                    cap
                } else {
                    gas_requested.as_u64()
                };
                use_gas(&mut gas, forwarded)?;

                let input = memory.get(in_offset, in_size);
                let outcome = do_call(ctx, frame, op, target, value, input, forwarded)?;

                gas += outcome.gas_left;
                return_data = outcome.output.clone();
                let copy = outcome.output.len().min(out_size);
                if copy > 0 {
                    memory.set(out_offset, &outcome.output[..copy]);
                }
                stack.push(bool_to_word(outcome.success))?;
            }
            OpCode::Return => {
                let (offset, size) = (stack.pop()?, stack.pop()?);
                let (offset, size) = expand(&mut gas, &mut memory, offset, size)?;
                return Ok((VmExit::Return(memory.get(offset, size)), gas));
            }
            OpCode::Revert => {
                let (offset, size) = (stack.pop()?, stack.pop()?);
                let (offset, size) = expand(&mut gas, &mut memory, offset, size)?;
                return Ok((VmExit::Revert(memory.get(offset, size)), gas));
            }
            OpCode::SelfDestruct => {
                if frame.is_static {
                    return Err(VmError::WriteInStaticContext.into());
                }
                use_gas(&mut gas, gas::G_SELFDESTRUCT)?;
                let beneficiary = word_to_address(stack.pop()?);

                let balance = ctx.store.get_balance(ctx.journal, &frame.contract)?;
                if !balance.is_zero() {
                    ctx.store.add_balance(ctx.journal, &beneficiary, balance)?;
                }
                ctx.store.delete_account(ctx.journal, &frame.contract);
                ctx.refund += gas::R_SELFDESTRUCT;
                return Ok((VmExit::Stop, gas));
            }
        }

        pc += 1;
    }
}

// Nested CREATE/CREATE2, returns the new address on success and the
// gas handed back to the parent frame
fn do_create(
    ctx: &mut ExecContext,
    frame: &Frame,
    value: U256,
    init_code: Vec<u8>,
    salt: Option<U256>,
    gas: u64,
) -> Result<(Option<Address>, u64), BlockchainError> {
    if frame.depth + 1 > VM_CALL_DEPTH {
        return Ok((None, gas));
    }
    if ctx.store.get_balance(ctx.journal, &frame.contract)? < value {
        return Ok((None, gas));
    }

    let creator_nonce = ctx.store.get_nonce(ctx.journal, &frame.contract)?;
    let address = match salt {
        None => create_address(&frame.contract, creator_nonce),
        Some(salt) => create2_address(&frame.contract, &salt, &hash(&init_code)),
    };
    ctx.store
        .put_nonce(ctx.journal, &frame.contract, creator_nonce + 1)?;

    // Address collision with live code or nonce aborts the creation
    let existing = ctx.store.get_account(ctx.journal, &address)?;
    if existing.has_code() || existing.get_nonce() > 0 {
        return Ok((None, gas));
    }

    let savepoint = ctx.journal.savepoint();
    if !value.is_zero() {
        ctx.store.sub_balance(ctx.journal, &frame.contract, value)?;
        ctx.store.add_balance(ctx.journal, &address, value)?;
    }
    // Fresh contracts start at nonce one so an empty deployment does
    // not evaporate
    ctx.store.put_nonce(ctx.journal, &address, 1)?;

    let outcome = execute(
        ctx,
        Frame {
            contract: address,
            code: init_code,
            caller: frame.contract,
            value,
            input: Vec::new(),
            gas,
            is_static: false,
            depth: frame.depth + 1,
        },
    )?;

    if !outcome.success {
        ctx.journal.rollback_to(savepoint);
        return Ok((None, outcome.gas_left));
    }

    ctx.store.put_byte_code(ctx.journal, &address, outcome.output)?;
    Ok((Some(address), outcome.gas_left))
}

// Nested CALL/DELEGATECALL/STATICCALL
fn do_call(
    ctx: &mut ExecContext,
    frame: &Frame,
    op: OpCode,
    target: Address,
    value: U256,
    input: Vec<u8>,
    gas: u64,
) -> Result<CallOutcome, BlockchainError> {
    if frame.depth + 1 > VM_CALL_DEPTH {
        return Ok(CallOutcome::failed(gas));
    }

    let mut gas = gas;
    if !value.is_zero() {
        if ctx.store.get_balance(ctx.journal, &frame.contract)? < value {
            return Ok(CallOutcome::failed(gas));
        }
        // The stipend lets a plain transfer target log something
        gas += gas::G_CALL_STIPEND;
    }

    let savepoint = ctx.journal.savepoint();
    if !value.is_zero() {
        ctx.store.sub_balance(ctx.journal, &frame.contract, value)?;
        ctx.store.add_balance(ctx.journal, &target, value)?;
    }

    // DELEGATECALL runs foreign code against our own storage with
    // the original caller and value kept in place
    let (context_address, caller, frame_value, is_static) = match op {
        OpCode::DelegateCall => (frame.contract, frame.caller, frame.value, frame.is_static),
        OpCode::StaticCall => (target, frame.contract, U256::zero(), true),
        _ => (target, frame.contract, value, frame.is_static),
    };

    let code = ctx.store.get_byte_code(ctx.journal, &target)?;
    let outcome = execute(
        ctx,
        Frame {
            contract: context_address,
            code,
            caller,
            value: frame_value,
            input,
            gas,
            is_static,
            depth: frame.depth + 1,
        },
    )?;

    if !outcome.success {
        // Value moves back together with the callee state
        ctx.journal.rollback_to(savepoint);
    }
    Ok(outcome)
}

fn address_to_word(address: &Address) -> U256 {
    U256::from_big_endian(address.as_bytes())
}

fn word_to_address(word: U256) -> Address {
    let bytes = word.to_big_endian();
    let mut address = [0u8; 20];
    address.copy_from_slice(&bytes[12..]);
    Address::new(address)
}

#[cfg(test)]
mod tests;
