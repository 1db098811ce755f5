// Opcode table of the contract machine

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum OpCode {
    // Halts and arithmetic
    Stop = 0x00,
    Add = 0x01,
    Mul = 0x02,
    Sub = 0x03,
    Div = 0x04,
    SDiv = 0x05,
    Mod = 0x06,
    SMod = 0x07,
    AddMod = 0x08,
    MulMod = 0x09,
    Exp = 0x0a,
    SignExtend = 0x0b,

    // Comparison and bitwise
    Lt = 0x10,
    Gt = 0x11,
    SLt = 0x12,
    SGt = 0x13,
    Eq = 0x14,
    IsZero = 0x15,
    And = 0x16,
    Or = 0x17,
    Xor = 0x18,
    Not = 0x19,
    Byte = 0x1a,
    Shl = 0x1b,
    Shr = 0x1c,
    Sar = 0x1d,

    Keccak256 = 0x20,

    // Environment
    Address = 0x30,
    Balance = 0x31,
    Origin = 0x32,
    Caller = 0x33,
    CallValue = 0x34,
    CallDataLoad = 0x35,
    CallDataSize = 0x36,
    CallDataCopy = 0x37,
    CodeSize = 0x38,
    CodeCopy = 0x39,
    GasPrice = 0x3a,
    ExtCodeSize = 0x3b,
    ExtCodeCopy = 0x3c,
    ReturnDataSize = 0x3d,
    ReturnDataCopy = 0x3e,

    // Block context
    Coinbase = 0x41,
    Timestamp = 0x42,
    Number = 0x43,
    GasLimit = 0x45,

    // Stack, memory, storage and flow
    Pop = 0x50,
    MLoad = 0x51,
    MStore = 0x52,
    MStore8 = 0x53,
    SLoad = 0x54,
    SStore = 0x55,
    Jump = 0x56,
    JumpI = 0x57,
    Pc = 0x58,
    MSize = 0x59,
    Gas = 0x5a,
    JumpDest = 0x5b,

    // PUSH1..32 (0x60..=0x7f), DUP1..16 (0x80..=0x8f), SWAP1..16
    // (0x90..=0x9f) and LOG0..4 (0xa0..=0xa4) are dispatched by byte
    // range before this table is consulted

    // System
    Create = 0xf0,
    Call = 0xf1,
    Return = 0xf3,
    DelegateCall = 0xf4,
    Create2 = 0xf5,
    StaticCall = 0xfa,
    Revert = 0xfd,
    SelfDestruct = 0xff,
}

impl OpCode {
    // Number of immediate bytes following a PUSH opcode
    pub fn push_size(byte: u8) -> Option<usize> {
        if (0x60..=0x7f).contains(&byte) {
            Some((byte - 0x5f) as usize)
        } else {
            None
        }
    }

    pub fn dup_index(byte: u8) -> Option<usize> {
        if (0x80..=0x8f).contains(&byte) {
            Some((byte - 0x7f) as usize)
        } else {
            None
        }
    }

    pub fn swap_index(byte: u8) -> Option<usize> {
        if (0x90..=0x9f).contains(&byte) {
            Some((byte - 0x8f) as usize)
        } else {
            None
        }
    }

    pub fn log_topics(byte: u8) -> Option<usize> {
        if (0xa0..=0xa4).contains(&byte) {
            Some((byte - 0xa0) as usize)
        } else {
            None
        }
    }

    pub fn from_u8(byte: u8) -> Option<OpCode> {
        let op = match byte {
            0x00 => OpCode::Stop,
            0x01 => OpCode::Add,
            0x02 => OpCode::Mul,
            0x03 => OpCode::Sub,
            0x04 => OpCode::Div,
            0x05 => OpCode::SDiv,
            0x06 => OpCode::Mod,
            0x07 => OpCode::SMod,
            0x08 => OpCode::AddMod,
            0x09 => OpCode::MulMod,
            0x0a => OpCode::Exp,
            0x0b => OpCode::SignExtend,
            0x10 => OpCode::Lt,
            0x11 => OpCode::Gt,
            0x12 => OpCode::SLt,
            0x13 => OpCode::SGt,
            0x14 => OpCode::Eq,
            0x15 => OpCode::IsZero,
            0x16 => OpCode::And,
            0x17 => OpCode::Or,
            0x18 => OpCode::Xor,
            0x19 => OpCode::Not,
            0x1a => OpCode::Byte,
            0x1b => OpCode::Shl,
            0x1c => OpCode::Shr,
            0x1d => OpCode::Sar,
            0x20 => OpCode::Keccak256,
            0x30 => OpCode::Address,
            0x31 => OpCode::Balance,
            0x32 => OpCode::Origin,
            0x33 => OpCode::Caller,
            0x34 => OpCode::CallValue,
            0x35 => OpCode::CallDataLoad,
            0x36 => OpCode::CallDataSize,
            0x37 => OpCode::CallDataCopy,
            0x38 => OpCode::CodeSize,
            0x39 => OpCode::CodeCopy,
            0x3a => OpCode::GasPrice,
            0x3b => OpCode::ExtCodeSize,
            0x3c => OpCode::ExtCodeCopy,
            0x3d => OpCode::ReturnDataSize,
            0x3e => OpCode::ReturnDataCopy,
            0x41 => OpCode::Coinbase,
            0x42 => OpCode::Timestamp,
            0x43 => OpCode::Number,
            0x45 => OpCode::GasLimit,
            0x50 => OpCode::Pop,
            0x51 => OpCode::MLoad,
            0x52 => OpCode::MStore,
            0x53 => OpCode::MStore8,
            0x54 => OpCode::SLoad,
            0x55 => OpCode::SStore,
            0x56 => OpCode::Jump,
            0x57 => OpCode::JumpI,
            0x58 => OpCode::Pc,
            0x59 => OpCode::MSize,
            0x5a => OpCode::Gas,
            0x5b => OpCode::JumpDest,
            0xf0 => OpCode::Create,
            0xf1 => OpCode::Call,
            0xf3 => OpCode::Return,
            0xf4 => OpCode::DelegateCall,
            0xf5 => OpCode::Create2,
            0xfa => OpCode::StaticCall,
            0xfd => OpCode::Revert,
            0xff => OpCode::SelfDestruct,
            _ => return None,
        };
        Some(op)
    }
}
