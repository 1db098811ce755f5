use super::*;
use crate::core::{
    executor::{ExecContext, GasPool},
    storage::{ChainStore, Journal, MemoryStore},
};
use arbor_common::{
    block::BlockHeader,
    config::{CHAIN_VERSION, GENESIS_GAS_LIMIT},
    crypto::{hash, Address, KeyPair},
    transaction::ChainId,
};
use std::sync::Arc;

fn addr(tag: u8) -> Address {
    Address::new([tag; 20])
}

fn test_header(leader: &KeyPair) -> BlockHeader {
    BlockHeader::new(
        ChainId::zero(),
        CHAIN_VERSION,
        Hash::zero(),
        7,
        1_700_000_000,
        GENESIS_GAS_LIMIT,
        leader.get_public_key(),
    )
}

struct Harness {
    store: ChainStore,
    header: BlockHeader,
    leader: Address,
}

impl Harness {
    fn new() -> Self {
        let keypair = KeyPair::new();
        Self {
            store: ChainStore::new(Arc::new(MemoryStore::new())),
            header: test_header(&keypair),
            leader: keypair.get_address(),
        }
    }

    fn execute(&self, journal: &mut Journal, frame: Frame) -> (CallOutcome, Vec<arbor_common::receipt::Log>, u64) {
        let mut gas_pool = GasPool::new(self.header.get_gas_limit());
        let mut ctx = ExecContext {
            store: &self.store,
            journal,
            header: &self.header,
            gas_pool: &mut gas_pool,
            origin: addr(1),
            leader: self.leader,
            gas_price: U256::one(),
            tx_hash: hash(b"tx"),
            refund: 0,
            logs: Vec::new(),
        };
        let outcome = execute(&mut ctx, frame).unwrap();
        let logs = std::mem::take(&mut ctx.logs);
        let refund = ctx.refund;
        (outcome, logs, refund)
    }

    fn run_code(&self, code: Vec<u8>, input: Vec<u8>, gas: u64) -> CallOutcome {
        let mut journal = self.store.begin_transaction();
        let (outcome, _, _) = self.execute(
            &mut journal,
            Frame {
                contract: addr(7),
                code,
                caller: addr(1),
                value: U256::zero(),
                input,
                gas,
                is_static: false,
                depth: 0,
            },
        );
        outcome
    }
}

// PUSH1 a PUSH1 b <op> then return the word at memory 0
fn return_top(code_prefix: &[u8]) -> Vec<u8> {
    let mut code = code_prefix.to_vec();
    // MSTORE(0, top) ; RETURN(0, 32)
    code.extend_from_slice(&[0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3]);
    code
}

fn as_word(output: &[u8]) -> U256 {
    U256::from_big_endian(output)
}

#[test]
fn test_add_and_return() {
    let harness = Harness::new();
    // 2 + 3
    let outcome = harness.run_code(return_top(&[0x60, 0x02, 0x60, 0x03, 0x01]), vec![], 100_000);
    assert!(outcome.success);
    assert_eq!(as_word(&outcome.output), U256::from(5u64));
}

#[test]
fn test_division_by_zero_yields_zero() {
    let harness = Harness::new();
    // 7 / 0
    let outcome = harness.run_code(return_top(&[0x60, 0x00, 0x60, 0x07, 0x04]), vec![], 100_000);
    assert!(outcome.success);
    assert_eq!(as_word(&outcome.output), U256::zero());
}

#[test]
fn test_sdiv_negative() {
    let harness = Harness::new();
    // -8 / 2 = -4: NOT(7) = -8 in two's complement
    let code = return_top(&[
        0x60, 0x02, // 2
        0x60, 0x07, 0x19, // NOT 7 => -8
        0x05, // SDIV
    ]);
    let outcome = harness.run_code(code, vec![], 100_000);
    assert!(outcome.success);
    assert_eq!(as_word(&outcome.output), twos_complement(U256::from(4u64)));
}

#[test]
fn test_signed_comparison() {
    let harness = Harness::new();
    // SLT(-1, 0) == 1
    let code = return_top(&[
        0x60, 0x00, // 0
        0x60, 0x00, 0x19, // NOT 0 => -1
        0x12, // SLT
    ]);
    let outcome = harness.run_code(code, vec![], 100_000);
    assert!(outcome.success);
    assert_eq!(as_word(&outcome.output), U256::one());
}

#[test]
fn test_keccak_of_empty() {
    let harness = Harness::new();
    // KECCAK256(0, 0)
    let outcome = harness.run_code(return_top(&[0x60, 0x00, 0x60, 0x00, 0x20]), vec![], 100_000);
    assert!(outcome.success);
    assert_eq!(
        outcome.output,
        hash(&[]).as_bytes().to_vec()
    );
}

#[test]
fn test_calldataload() {
    let harness = Harness::new();
    let mut input = vec![0u8; 32];
    input[31] = 0x2a;
    // CALLDATALOAD(0)
    let outcome = harness.run_code(return_top(&[0x60, 0x00, 0x35]), input, 100_000);
    assert!(outcome.success);
    assert_eq!(as_word(&outcome.output), U256::from(0x2au64));
}

#[test]
fn test_jump_to_jumpdest() {
    let harness = Harness::new();
    // JUMP over an invalid opcode to a JUMPDEST and stop
    let code = vec![0x60, 0x04, 0x56, 0xfe, 0x5b, 0x00];
    let outcome = harness.run_code(code, vec![], 100_000);
    assert!(outcome.success);
}

#[test]
fn test_jump_into_push_data_fails() {
    let harness = Harness::new();
    // 0x5b at offset 4 is push immediate data, not a JUMPDEST
    let code = vec![0x60, 0x04, 0x56, 0x60, 0x5b, 0x00];
    let outcome = harness.run_code(code, vec![], 100_000);
    assert!(!outcome.success);
    assert_eq!(outcome.gas_left, 0);
}

#[test]
fn test_out_of_gas_consumes_everything() {
    let harness = Harness::new();
    let outcome = harness.run_code(return_top(&[0x60, 0x02, 0x60, 0x03, 0x01]), vec![], 4);
    assert!(!outcome.success);
    assert_eq!(outcome.gas_left, 0);
}

#[test]
fn test_stack_underflow_fails() {
    let harness = Harness::new();
    let outcome = harness.run_code(vec![0x01], vec![], 100_000);
    assert!(!outcome.success);
}

#[test]
fn test_invalid_opcode_fails() {
    let harness = Harness::new();
    let outcome = harness.run_code(vec![0xfe], vec![], 100_000);
    assert!(!outcome.success);
}

#[test]
fn test_revert_returns_data_and_gas() {
    let harness = Harness::new();
    // MSTORE(0, 9) ; REVERT(0, 32)
    let code = vec![0x60, 0x09, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xfd];
    let outcome = harness.run_code(code, vec![], 100_000);
    assert!(!outcome.success);
    assert!(outcome.gas_left > 0);
    assert_eq!(as_word(&outcome.output), U256::from(9u64));
}

#[test]
fn test_sstore_sload_roundtrip() {
    let harness = Harness::new();
    let mut journal = harness.store.begin_transaction();

    // SSTORE(slot 1, 0x2a) then stop
    let (outcome, _, _) = harness.execute(
        &mut journal,
        Frame {
            contract: addr(7),
            code: vec![0x60, 0x2a, 0x60, 0x01, 0x55, 0x00],
            caller: addr(1),
            value: U256::zero(),
            input: vec![],
            gas: 100_000,
            is_static: false,
            depth: 0,
        },
    );
    assert!(outcome.success);
    assert_eq!(
        harness
            .store
            .load_storage(&journal, &addr(7), &U256::one())
            .unwrap(),
        U256::from(0x2au64)
    );

    // SLOAD(slot 1) observed from the same contract
    let (outcome, _, _) = harness.execute(
        &mut journal,
        Frame {
            contract: addr(7),
            code: return_top(&[0x60, 0x01, 0x54]),
            caller: addr(1),
            value: U256::zero(),
            input: vec![],
            gas: 100_000,
            is_static: false,
            depth: 0,
        },
    );
    assert!(outcome.success);
    assert_eq!(as_word(&outcome.output), U256::from(0x2au64));
}

#[test]
fn test_sstore_clear_accrues_refund() {
    let harness = Harness::new();
    let mut journal = harness.store.begin_transaction();

    // Set then clear the same slot
    let (outcome, _, refund) = harness.execute(
        &mut journal,
        Frame {
            contract: addr(7),
            code: vec![
                0x60, 0x2a, 0x60, 0x01, 0x55, // SSTORE(1, 42)
                0x60, 0x00, 0x60, 0x01, 0x55, // SSTORE(1, 0)
                0x00,
            ],
            caller: addr(1),
            value: U256::zero(),
            input: vec![],
            gas: 100_000,
            is_static: false,
            depth: 0,
        },
    );
    assert!(outcome.success);
    assert_eq!(refund, gas::R_SSTORE_CLEAR);
}

#[test]
fn test_sstore_rejected_in_static_context() {
    let harness = Harness::new();
    let mut journal = harness.store.begin_transaction();

    let (outcome, _, _) = harness.execute(
        &mut journal,
        Frame {
            contract: addr(7),
            code: vec![0x60, 0x2a, 0x60, 0x01, 0x55, 0x00],
            caller: addr(1),
            value: U256::zero(),
            input: vec![],
            gas: 100_000,
            is_static: true,
            depth: 0,
        },
    );
    assert!(!outcome.success);
}

#[test]
fn test_log_emission() {
    let harness = Harness::new();
    let mut journal = harness.store.begin_transaction();

    // LOG1 with topic 0x2a over memory [0, 32)
    let (outcome, logs, _) = harness.execute(
        &mut journal,
        Frame {
            contract: addr(7),
            code: vec![
                0x60, 0x63, 0x60, 0x00, 0x52, // MSTORE(0, 0x63)
                0x60, 0x2a, // topic
                0x60, 0x20, 0x60, 0x00, // size, offset
                0xa1,
                0x00,
            ],
            caller: addr(1),
            value: U256::zero(),
            input: vec![],
            gas: 100_000,
            is_static: false,
            depth: 0,
        },
    );
    assert!(outcome.success);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].address, addr(7));
    assert_eq!(logs[0].topics.len(), 1);
    assert_eq!(logs[0].height, 7);
    assert_eq!(as_word(&logs[0].data), U256::from(0x63u64));
}

#[test]
fn test_failed_frame_unwinds_state_and_logs() {
    let harness = Harness::new();
    let mut journal = harness.store.begin_transaction();

    // SSTORE then LOG0 then deliberately run out of stack
    let (outcome, logs, _) = harness.execute(
        &mut journal,
        Frame {
            contract: addr(7),
            code: vec![
                0x60, 0x2a, 0x60, 0x01, 0x55, // SSTORE(1, 42)
                0x60, 0x00, 0x60, 0x00, 0xa0, // LOG0 empty
                0x01, // ADD on empty stack
            ],
            caller: addr(1),
            value: U256::zero(),
            input: vec![],
            gas: 100_000,
            is_static: false,
            depth: 0,
        },
    );
    assert!(!outcome.success);
    assert!(logs.is_empty());
    assert_eq!(
        harness
            .store
            .load_storage(&journal, &addr(7), &U256::one())
            .unwrap(),
        U256::zero()
    );
}

#[test]
fn test_call_between_contracts() {
    let harness = Harness::new();
    let mut journal = harness.store.begin_transaction();

    // Callee returns 42
    let callee = addr(0xbb);
    harness
        .store
        .put_byte_code(
            &mut journal,
            &callee,
            vec![0x60, 0x2a, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3],
        )
        .unwrap();

    // Caller forwards the call and returns the callee's output
    let mut caller_code = vec![
        0x60, 0x20, // ret size
        0x60, 0x00, // ret offset
        0x60, 0x00, // arg size
        0x60, 0x00, // arg offset
        0x60, 0x00, // value
        0x73, // PUSH20 callee
    ];
    caller_code.extend_from_slice(callee.as_bytes());
    caller_code.extend_from_slice(&[
        0x61, 0xff, 0xff, // gas
        0xf1, // CALL
        0x50, // POP success flag
        0x60, 0x20, 0x60, 0x00, 0xf3, // RETURN(0, 32)
    ]);

    let (outcome, _, _) = harness.execute(
        &mut journal,
        Frame {
            contract: addr(0xaa),
            code: caller_code,
            caller: addr(1),
            value: U256::zero(),
            input: vec![],
            gas: 200_000,
            is_static: false,
            depth: 0,
        },
    );
    assert!(outcome.success);
    assert_eq!(as_word(&outcome.output), U256::from(42u64));
}

#[test]
fn test_create_deploys_runtime_code() {
    let harness = Harness::new();
    let mut journal = harness.store.begin_transaction();

    // init code: CODECOPY the 10 runtime bytes at offset 12 and
    // return them
    let mut init = vec![
        0x60, 0x0a, 0x60, 0x0c, 0x60, 0x00, 0x39, // CODECOPY(0, 12, 10)
        0x60, 0x0a, 0x60, 0x00, 0xf3, // RETURN(0, 10)
    ];
    let runtime = vec![0x60, 0x2a, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];
    init.extend_from_slice(&runtime);

    // The creator copies its own trailing bytes (the init blob) into
    // memory and hands them to CREATE
    let init_len = init.len() as u8;
    let prelude_len: u8 = 16;
    let mut creator_code = vec![
        0x60, init_len, // size
        0x60, prelude_len, // code offset of the init blob
        0x60, 0x00, // memory destination
        0x39, // CODECOPY
        0x60, init_len, // size
        0x60, 0x00, // offset
        0x60, 0x00, // value
        0xf0, // CREATE
        0x50, // POP the address
        0x00, // STOP
    ];
    assert_eq!(creator_code.len(), prelude_len as usize);
    creator_code.extend_from_slice(&init);

    let creator = addr(0xcc);
    let expected = crate::core::executor::create_address(&creator, 0);

    let (outcome, _, _) = harness.execute(
        &mut journal,
        Frame {
            contract: creator,
            code: creator_code,
            caller: addr(1),
            value: U256::zero(),
            input: vec![],
            gas: 500_000,
            is_static: false,
            depth: 0,
        },
    );
    assert!(outcome.success);
    assert_eq!(
        harness.store.get_byte_code(&journal, &expected).unwrap(),
        runtime
    );
}

#[test]
fn test_selfdestruct_moves_balance() {
    let harness = Harness::new();
    let mut journal = harness.store.begin_transaction();

    let contract = addr(7);
    let heir = addr(8);
    harness
        .store
        .add_balance(&mut journal, &contract, U256::from(1000u64))
        .unwrap();

    // SELFDESTRUCT(heir)
    let mut code = vec![0x73];
    code.extend_from_slice(heir.as_bytes());
    code.push(0xff);

    let (outcome, _, refund) = harness.execute(
        &mut journal,
        Frame {
            contract,
            code,
            caller: addr(1),
            value: U256::zero(),
            input: vec![],
            gas: 100_000,
            is_static: false,
            depth: 0,
        },
    );
    assert!(outcome.success);
    assert_eq!(refund, gas::R_SELFDESTRUCT);
    assert_eq!(
        harness.store.get_balance(&journal, &heir).unwrap(),
        U256::from(1000u64)
    );
    assert!(!harness.store.account_exists(&journal, &contract).unwrap());
}

#[test]
fn test_analyze_jumpdests_skips_push_data() {
    let code = vec![0x60, 0x5b, 0x5b, 0x7f];
    let dests = analyze_jumpdests(&code);
    assert!(dests.contains(&2));
    assert!(!dests.contains(&1));
}

#[test]
fn test_twos_complement_helpers() {
    assert!(is_negative(&twos_complement(U256::one())));
    assert_eq!(abs(twos_complement(U256::from(5u64))), U256::from(5u64));
    assert_eq!(
        twos_complement(twos_complement(U256::from(9u64))),
        U256::from(9u64)
    );
}
