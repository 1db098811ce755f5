use super::{ChainId, Transaction, TxKind};
use crate::{
    account::Nonce,
    config::{CHAIN_VERSION, GWEI, TX_GAS},
    crypto::{hash, Address, KeyPair, Signature},
    time::get_current_time_in_seconds,
};
use primitive_types::U256;

// Convenience builder used by the wallet surface and the tests to
// assemble and sign a transaction in one go.
pub struct TransactionBuilder {
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
}

impl TransactionBuilder {
    pub fn new(chain_id: ChainId, from: Address) -> Self {
        Self {
            chain_id,
            kind: TxKind::Transfer,
            nonce: 0,
            to: None,
            amount: U256::zero(),
            gas_price: U256::from(GWEI),
            gas_limit: TX_GAS,
            timestamp: get_current_time_in_seconds(),
            data: Vec::new(),
            from,
        }
    }

    pub fn kind(mut self, kind: TxKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn nonce(mut self, nonce: Nonce) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    pub fn amount(mut self, amount: U256) -> Self {
        self.amount = amount;
        self
    }

    pub fn gas_price(mut self, gas_price: U256) -> Self {
        self.gas_price = gas_price;
        self
    }

    pub fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.kind = TxKind::SetAlias;
        self.data = alias.as_bytes().to_vec();
        self
    }

    // Sign the body with the given key and produce the final
    // transaction. The key must own the `from` address.
    pub fn build(self, keypair: &KeyPair) -> Transaction {
        // The signature does not feed the signing bytes, a
        // placeholder is enough to encode the body
        let mut tx = Transaction::new(
            CHAIN_VERSION,
            self.chain_id,
            self.kind,
            self.nonce,
            self.to,
            self.amount,
            self.gas_price,
            self.gas_limit,
            self.timestamp,
            self.data,
            self.from,
            Signature::zero(),
        );

        let signature = keypair.sign(&hash(&tx.get_signing_bytes()));
        tx.set_signature(signature);
        tx
    }
}
