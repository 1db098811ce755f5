use super::VmError;

// Gas schedule of the contract machine. Values follow the classic
// frontier/homestead table the original chain shipped with.

pub const G_ZERO: u64 = 0;
pub const G_BASE: u64 = 2;
pub const G_VERYLOW: u64 = 3;
pub const G_LOW: u64 = 5;
pub const G_MID: u64 = 8;
pub const G_HIGH: u64 = 10;

pub const G_JUMPDEST: u64 = 1;

pub const G_KECCAK256: u64 = 30;
pub const G_KECCAK256_WORD: u64 = 6;

pub const G_BALANCE: u64 = 400;
pub const G_EXTCODE: u64 = 700;

pub const G_SLOAD: u64 = 200;
pub const G_SSTORE_SET: u64 = 20_000;
pub const G_SSTORE_RESET: u64 = 5_000;
// Credited when a non-zero slot is cleared
pub const R_SSTORE_CLEAR: u64 = 15_000;

pub const G_LOG: u64 = 375;
pub const G_LOG_TOPIC: u64 = 375;
pub const G_LOG_DATA: u64 = 8;

pub const G_CREATE: u64 = 32_000;
pub const G_CALL: u64 = 700;
pub const G_CALL_VALUE: u64 = 9_000;
// Granted to the callee on a value transfer, free of charge
pub const G_CALL_STIPEND: u64 = 2_300;
pub const G_NEW_ACCOUNT: u64 = 25_000;

pub const G_SELFDESTRUCT: u64 = 5_000;
pub const R_SELFDESTRUCT: u64 = 24_000;

pub const G_EXP: u64 = 10;
pub const G_EXP_BYTE: u64 = 50;

// Per-word cost of the *COPY family
pub const G_COPY: u64 = 3;

// Linear part of the memory cost, the quadratic part is
// words^2 / 512
pub const G_MEMORY: u64 = 3;

pub fn memory_gas(words: u64) -> Result<u64, VmError> {
    let linear = words.checked_mul(G_MEMORY).ok_or(VmError::OutOfGas)?;
    let square = words.checked_mul(words).ok_or(VmError::OutOfGas)?;
    linear.checked_add(square / 512).ok_or(VmError::OutOfGas)
}

// Cost of growing memory from `current` to `target` words
pub fn memory_expansion_gas(current: u64, target: u64) -> Result<u64, VmError> {
    if target <= current {
        return Ok(0);
    }
    Ok(memory_gas(target)? - memory_gas(current)?)
}

// Per-word cost for copies of `size` bytes
pub fn copy_gas(size: u64) -> Result<u64, VmError> {
    size.div_ceil(32).checked_mul(G_COPY).ok_or(VmError::OutOfGas)
}

// A callee may receive at most 63/64 of the gas still available
pub fn max_call_gas(available: u64) -> u64 {
    available - available / 64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_gas_quadratic() {
        assert_eq!(memory_gas(0).unwrap(), 0);
        assert_eq!(memory_gas(1).unwrap(), 3);
        // 3 * 1024 + 1024^2 / 512
        assert_eq!(memory_gas(1024).unwrap(), 3 * 1024 + 2048);
    }

    #[test]
    fn test_expansion_only_charges_growth() {
        assert_eq!(memory_expansion_gas(10, 10).unwrap(), 0);
        assert_eq!(memory_expansion_gas(10, 5).unwrap(), 0);
        let grow = memory_expansion_gas(0, 4).unwrap();
        assert_eq!(grow, memory_gas(4).unwrap());
    }

    #[test]
    fn test_63_64_rule() {
        assert_eq!(max_call_gas(64), 63);
        assert_eq!(max_call_gas(6400), 6300);
        assert_eq!(max_call_gas(10), 10); // below 64, nothing withheld
    }
}
