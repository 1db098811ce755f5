use crate::{
    crypto::{hash, Hash},
    serializer::{varint_size, Reader, ReaderError, Serializer, Writer},
};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

// Nonce must be equal to the one on chain to execute a transaction,
// used to prevent replay attacks and order transactions per sender
pub type Nonce = u64;

// keccak-256 of the empty byte string, the code hash of every
// account that carries no contract code
pub const EMPTY_CODE_HASH: Hash = Hash::new([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03,
    0xc0, 0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85,
    0xa4, 0x70,
]);

// Per-address state record stored in the state trie.
// Contract word storage lives under its own trie keys and is not
// part of this record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Account {
    balance: U256,
    nonce: Nonce,
    byte_code: Vec<u8>,
    code_hash: Hash,
    alias: Option<String>,
}

impl Account {
    pub fn new() -> Self {
        Self {
            balance: U256::zero(),
            nonce: 0,
            byte_code: Vec::new(),
            code_hash: EMPTY_CODE_HASH,
            alias: None,
        }
    }

    pub fn with_balance(balance: U256) -> Self {
        let mut account = Self::new();
        account.balance = balance;
        account
    }

    pub fn get_balance(&self) -> U256 {
        self.balance
    }

    pub fn set_balance(&mut self, balance: U256) {
        self.balance = balance;
    }

    pub fn get_nonce(&self) -> Nonce {
        self.nonce
    }

    pub fn set_nonce(&mut self, nonce: Nonce) {
        self.nonce = nonce;
    }

    pub fn get_byte_code(&self) -> &[u8] {
        &self.byte_code
    }

    pub fn get_code_hash(&self) -> &Hash {
        &self.code_hash
    }

    // Stores the contract code and refreshes the code hash
    pub fn set_byte_code(&mut self, byte_code: Vec<u8>) {
        self.code_hash = if byte_code.is_empty() {
            EMPTY_CODE_HASH
        } else {
            hash(&byte_code)
        };
        self.byte_code = byte_code;
    }

    pub fn has_code(&self) -> bool {
        !self.byte_code.is_empty()
    }

    pub fn get_alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn set_alias(&mut self, alias: String) {
        self.alias = Some(alias);
    }

    // An account in this state is treated as non existent and its
    // record is removed from the trie after each transaction
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code_hash == EMPTY_CODE_HASH
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer for Account {
    fn write(&self, writer: &mut Writer) {
        self.balance.write(writer);
        writer.write_u64(&self.nonce);
        writer.write_var_bytes(&self.byte_code);
        writer.write_hash(&self.code_hash);
        self.alias.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let balance = U256::read(reader)?;
        let nonce = reader.read_u64()?;
        let byte_code = reader.read_var_bytes()?;
        let code_hash = reader.read_hash()?;
        let alias = Option::read(reader)?;

        Ok(Self {
            balance,
            nonce,
            byte_code,
            code_hash,
            alias,
        })
    }

    fn size(&self) -> usize {
        self.balance.size()
            + self.nonce.size()
            + varint_size(self.byte_code.len() as u64)
            + self.byte_code.len()
            + self.code_hash.size()
            + self.alias.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_account() {
        let account = Account::new();
        assert!(account.is_empty());
        assert_eq!(*account.get_code_hash(), EMPTY_CODE_HASH);
        assert_eq!(EMPTY_CODE_HASH, hash(&[]));
    }

    #[test]
    fn test_account_with_code_not_empty() {
        let mut account = Account::new();
        account.set_byte_code(vec![0x60, 0x2a]);
        assert!(!account.is_empty());
        assert_eq!(*account.get_code_hash(), hash(&[0x60, 0x2a]));
    }

    #[test]
    fn test_account_roundtrip() {
        let mut account = Account::with_balance(U256::from(1000u64));
        account.set_nonce(3);
        account.set_byte_code(vec![1, 2, 3]);
        account.set_alias("alice".to_string());

        let bytes = account.to_bytes();
        assert_eq!(bytes.len(), account.size());

        let decoded = Account::from_bytes(&bytes).unwrap();
        assert_eq!(account, decoded);
    }
}
