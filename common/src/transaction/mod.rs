use crate::{
    account::Nonce,
    crypto::{Address, CryptoError, Hash, Hashable, Signature},
    serializer::{varint_size, Reader, ReaderError, Serializer, Writer},
};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

mod builder;

pub use builder::TransactionBuilder;

// The chain identifier is a 32-byte tag mixed into every signed
// payload so transactions cannot be replayed across networks
pub type ChainId = Hash;

// Maximum size of the data payload carried by a transaction
pub const MAX_DATA_SIZE: usize = 1024 * 1024; // 1 MB
// Maximum length of a registered alias
pub const MAX_ALIAS_LENGTH: usize = 64;

// All transaction kinds supported by the chain.
// The discriminant is part of the wire format, new kinds append only.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Transfer,
    CreateContract,
    CallContract,
    SetAlias,
}

impl Serializer for TxKind {
    fn write(&self, writer: &mut Writer) {
        let value = match self {
            TxKind::Transfer => 0u8,
            TxKind::CreateContract => 1,
            TxKind::CallContract => 2,
            TxKind::SetAlias => 3,
        };
        writer.write_u8(value);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        match reader.read_u8()? {
            0 => Ok(TxKind::Transfer),
            1 => Ok(TxKind::CreateContract),
            2 => Ok(TxKind::CallContract),
            3 => Ok(TxKind::SetAlias),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    fn size(&self) -> usize {
        1
    }
}

// Transaction to be sent over the network
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Transaction {
    /// Version of the transaction format
    version: u32,
    /// Chain this transaction is valid on
    chain_id: ChainId,
    /// Kind discriminant
    kind: TxKind,
    /// nonce must be equal to the one on chain account
    nonce: Nonce,
    /// Recipient, absent for contract creations
    to: Option<Address>,
    /// Value moved to the recipient
    amount: U256,
    /// Price per unit of gas, in wei
    gas_price: U256,
    /// Maximum gas the sender is willing to burn
    gas_limit: u64,
    /// Creation time, informational only
    timestamp: u64,
    /// Call input, init code or alias bytes depending on the kind
    data: Vec<u8>,
    /// Sender, must match the recovered signer
    from: Address,
    /// Recoverable signature over the keccak-256 of the body
    signature: Signature,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: u32,
        chain_id: ChainId,
        kind: TxKind,
        nonce: Nonce,
        to: Option<Address>,
        amount: U256,
        gas_price: U256,
        gas_limit: u64,
        timestamp: u64,
        data: Vec<u8>,
        from: Address,
        signature: Signature,
    ) -> Self {
        Self {
            version,
            chain_id,
            kind,
            nonce,
            to,
            amount,
            gas_price,
            gas_limit,
            timestamp,
            data,
            from,
            signature,
        }
    }

    pub fn get_version(&self) -> u32 {
        self.version
    }

    pub fn get_chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub fn get_kind(&self) -> TxKind {
        self.kind
    }

    pub fn get_nonce(&self) -> Nonce {
        self.nonce
    }

    pub fn get_to(&self) -> Option<&Address> {
        self.to.as_ref()
    }

    pub fn get_amount(&self) -> U256 {
        self.amount
    }

    pub fn get_gas_price(&self) -> U256 {
        self.gas_price
    }

    pub fn get_gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn get_timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data
    }

    pub fn get_from(&self) -> &Address {
        &self.from
    }

    pub fn get_signature(&self) -> &Signature {
        &self.signature
    }

    pub fn set_signature(&mut self, signature: Signature) {
        self.signature = signature;
    }

    pub fn is_contract_creation(&self) -> bool {
        self.kind == TxKind::CreateContract
    }

    // Upper bound the sender must be able to pay before admission:
    // amount + gas_price * gas_limit
    pub fn cost(&self) -> U256 {
        self.amount
            .saturating_add(self.gas_price.saturating_mul(U256::from(self.gas_limit)))
    }

    /// Bytes covered by the signature, the encoded body without the
    /// signature itself
    pub fn get_signing_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let mut writer = Writer::new(&mut buffer);
        self.write_body(&mut writer);
        buffer
    }

    fn write_body(&self, writer: &mut Writer) {
        writer.write_u32(&self.version);
        writer.write_hash(&self.chain_id);
        self.kind.write(writer);
        writer.write_u64(&self.nonce);
        self.to.write(writer);
        self.amount.write(writer);
        self.gas_price.write(writer);
        writer.write_u64(&self.gas_limit);
        writer.write_u64(&self.timestamp);
        writer.write_var_bytes(&self.data);
        self.from.write(writer);
    }

    fn body_size(&self) -> usize {
        4 + self.chain_id.size()
            + self.kind.size()
            + 8
            + self.to.size()
            + self.amount.size()
            + self.gas_price.size()
            + 8
            + 8
            + varint_size(self.data.len() as u64)
            + self.data.len()
            + self.from.size()
    }

    // Recover the signer and require it to be the declared sender
    pub fn verify_signature(&self) -> Result<(), CryptoError> {
        let signer = self.signature.recover_address(&self.hash())?;
        if signer != self.from {
            return Err(CryptoError::InvalidSignature);
        }
        Ok(())
    }

    // Alias bytes carried by a SetAlias transaction
    pub fn alias(&self) -> Option<String> {
        if self.kind != TxKind::SetAlias {
            return None;
        }
        String::from_utf8(self.data.clone()).ok()
    }
}

impl Serializer for Transaction {
    fn write(&self, writer: &mut Writer) {
        self.write_body(writer);
        self.signature.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let version = reader.read_u32()?;
        let chain_id = reader.read_hash()?;
        let kind = TxKind::read(reader)?;
        let nonce = reader.read_u64()?;
        let to = Option::read(reader)?;
        let amount = U256::read(reader)?;
        let gas_price = U256::read(reader)?;
        let gas_limit = reader.read_u64()?;
        let timestamp = reader.read_u64()?;
        let data = reader.read_var_bytes()?;
        if data.len() > MAX_DATA_SIZE {
            return Err(ReaderError::InvalidSize);
        }
        let from = Address::read(reader)?;
        let signature = Signature::read(reader)?;

        // A creation must not carry a recipient, everything else must
        match kind {
            TxKind::CreateContract if to.is_some() => return Err(ReaderError::InvalidValue),
            TxKind::Transfer | TxKind::CallContract if to.is_none() => {
                return Err(ReaderError::InvalidValue)
            }
            _ => {}
        }

        Ok(Transaction::new(
            version, chain_id, kind, nonce, to, amount, gas_price, gas_limit, timestamp, data,
            from, signature,
        ))
    }

    fn size(&self) -> usize {
        self.body_size() + self.signature.size()
    }
}

// The transaction hash covers the body only so it is stable across
// signature re-encoding
impl Hashable for Transaction {
    fn hash(&self) -> Hash {
        crate::crypto::hash(&self.get_signing_bytes())
    }
}

impl AsRef<Transaction> for Transaction {
    fn as_ref(&self) -> &Transaction {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::CHAIN_VERSION, crypto::KeyPair};

    fn signed_transfer(keypair: &KeyPair, nonce: Nonce, amount: u64) -> Transaction {
        TransactionBuilder::new(ChainId::zero(), keypair.get_address())
            .kind(TxKind::Transfer)
            .to(Address::zero())
            .amount(U256::from(amount))
            .gas_price(U256::from(1u64))
            .gas_limit(21_000)
            .nonce(nonce)
            .build(keypair)
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::new();
        let tx = signed_transfer(&keypair, 0, 100);
        assert_eq!(tx.get_version(), CHAIN_VERSION);
        tx.verify_signature().unwrap();
    }

    #[test]
    fn test_tampered_amount_rejected() {
        let keypair = KeyPair::new();
        let tx = signed_transfer(&keypair, 0, 100);

        let tampered = Transaction::new(
            tx.get_version(),
            tx.get_chain_id().clone(),
            tx.get_kind(),
            tx.get_nonce(),
            tx.get_to().copied(),
            U256::from(5000u64),
            tx.get_gas_price(),
            tx.get_gas_limit(),
            tx.get_timestamp(),
            tx.get_data().to_vec(),
            *tx.get_from(),
            tx.get_signature().clone(),
        );
        assert!(tampered.verify_signature().is_err());
    }

    #[test]
    fn test_serializer_roundtrip() {
        let keypair = KeyPair::new();
        let tx = signed_transfer(&keypair, 7, 42);

        let bytes = tx.to_bytes();
        assert_eq!(bytes.len(), tx.size());

        let decoded = Transaction::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.hash(), tx.hash());
        decoded.verify_signature().unwrap();
    }

    #[test]
    fn test_creation_with_recipient_rejected() {
        let keypair = KeyPair::new();
        let creation = TransactionBuilder::new(ChainId::zero(), keypair.get_address())
            .kind(TxKind::CreateContract)
            .data(vec![0x60, 0x2a])
            .gas_limit(60_000)
            .build(&keypair);
        assert!(creation.get_to().is_none());

        // Rewrite the kind tag of an encoded transfer so the decoder
        // sees a creation carrying a recipient
        let mut bytes = signed_transfer(&keypair, 0, 1).to_bytes();
        bytes[4 + 32] = 1; // kind offset: version + chain id
        assert!(Transaction::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_cost() {
        let keypair = KeyPair::new();
        let tx = signed_transfer(&keypair, 0, 100);
        assert_eq!(tx.cost(), U256::from(100u64 + 21_000));
    }
}
