mod hash;
mod keys;

pub use hash::{hash, Hash, Hashable, HASH_SIZE};
pub use keys::{
    address_of, Address, CryptoError, KeyPair, PublicKey, Signature, ADDRESS_SIZE,
    PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};
