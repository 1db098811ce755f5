use crate::{
    crypto::hash::{hash, Hash},
    serializer::{Reader, ReaderError, Serializer, Writer},
};
use libsecp256k1::{Message, PublicKeyFormat, RecoveryId, SecretKey};
use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter},
    str::FromStr,
};
use thiserror::Error;

pub const ADDRESS_SIZE: usize = 20;
pub const PUBLIC_KEY_SIZE: usize = 33; // compressed secp256k1 point
pub const SIGNATURE_SIZE: usize = 65; // r || s || v

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("public key recovery failed")]
    RecoveryFailed,
}

// 20-byte account identifier, the tail of the keccak-256 of the
// uncompressed public key (leading 0x04 tag skipped).
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Debug, Hash)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }

    pub const fn zero() -> Self {
        Address::new([0; ADDRESS_SIZE])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; ADDRESS_SIZE]
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    // Tail of a 32-byte hash, used for contract address derivation
    pub fn from_hash(hash: &Hash) -> Self {
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&hash.as_bytes()[12..]);
        Address(bytes)
    }
}

impl FromStr for Address {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| "Invalid hex string")?;
        let bytes: [u8; ADDRESS_SIZE] = bytes.try_into().map_err(|_| "Invalid address")?;
        Ok(Address::new(bytes))
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "0x{}", self.to_hex())
    }
}

impl Serializer for Address {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Address::new(reader.read_bytes_20()?))
    }

    fn size(&self) -> usize {
        ADDRESS_SIZE
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&format!("0x{}", self.to_hex()))
    }
}

impl<'a> Deserialize<'a> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex = String::deserialize(deserializer)?;
        Address::from_str(&hex).map_err(SerdeError::custom)
    }
}

// Compressed secp256k1 public key as it appears in block headers
// (leader and minor signer identities).
#[derive(Eq, PartialEq, Clone, Copy, Debug, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub const fn new(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        PublicKey(bytes)
    }

    pub const fn zero() -> Self {
        PublicKey::new([0; PUBLIC_KEY_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn decompress(&self) -> Result<libsecp256k1::PublicKey, CryptoError> {
        libsecp256k1::PublicKey::parse_slice(&self.0, Some(PublicKeyFormat::Compressed))
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    pub fn address(&self) -> Result<Address, CryptoError> {
        Ok(address_of(&self.decompress()?))
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "0x{}", self.to_hex())
    }
}

impl Serializer for PublicKey {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes: [u8; PUBLIC_KEY_SIZE] = reader
            .read_bytes(PUBLIC_KEY_SIZE)?
            .try_into()
            .map_err(|_| ReaderError::InvalidSize)?;
        Ok(PublicKey::new(bytes))
    }

    fn size(&self) -> usize {
        PUBLIC_KEY_SIZE
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&format!("0x{}", self.to_hex()))
    }
}

impl<'a> Deserialize<'a> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex = String::deserialize(deserializer)?;
        let hex = hex.strip_prefix("0x").unwrap_or(&hex);
        let bytes = hex::decode(hex).map_err(SerdeError::custom)?;
        let bytes: [u8; PUBLIC_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| SerdeError::custom("Invalid public key length"))?;
        Ok(PublicKey::new(bytes))
    }
}

// Recoverable signature: 64 bytes of r || s followed by the recovery
// id v in {0, 1}.
#[derive(Eq, PartialEq, Clone, Debug)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    // All-zero placeholder used while assembling unsigned bodies
    pub const fn zero() -> Self {
        Signature([0; SIGNATURE_SIZE])
    }

    pub fn new(bytes: [u8; SIGNATURE_SIZE]) -> Result<Self, CryptoError> {
        if bytes[SIGNATURE_SIZE - 1] > 1 {
            return Err(CryptoError::InvalidSignature);
        }
        Ok(Signature(bytes))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SIGNATURE_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidSignature)?;
        Signature::new(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    // Recover the signing public key from the message hash
    pub fn recover(&self, hash: &Hash) -> Result<libsecp256k1::PublicKey, CryptoError> {
        let message = Message::parse(hash.as_bytes());
        let signature = libsecp256k1::Signature::parse_standard_slice(&self.0[..64])
            .map_err(|_| CryptoError::InvalidSignature)?;
        let recovery_id = RecoveryId::parse(self.0[64]).map_err(|_| CryptoError::InvalidSignature)?;
        libsecp256k1::recover(&message, &signature, &recovery_id)
            .map_err(|_| CryptoError::RecoveryFailed)
    }

    // Recover the signer address directly
    pub fn recover_address(&self, hash: &Hash) -> Result<Address, CryptoError> {
        Ok(address_of(&self.recover(hash)?))
    }

    pub fn verify(&self, hash: &Hash, key: &PublicKey) -> Result<bool, CryptoError> {
        let message = Message::parse(hash.as_bytes());
        let signature = libsecp256k1::Signature::parse_standard_slice(&self.0[..64])
            .map_err(|_| CryptoError::InvalidSignature)?;
        Ok(libsecp256k1::verify(&message, &signature, &key.decompress()?))
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "0x{}", self.to_hex())
    }
}

impl Serializer for Signature {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes: [u8; SIGNATURE_SIZE] = reader
            .read_bytes(SIGNATURE_SIZE)?
            .try_into()
            .map_err(|_| ReaderError::InvalidSize)?;
        Signature::new(bytes).map_err(|_| ReaderError::InvalidValue)
    }

    fn size(&self) -> usize {
        SIGNATURE_SIZE
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&format!("0x{}", self.to_hex()))
    }
}

impl<'a> Deserialize<'a> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex = String::deserialize(deserializer)?;
        let hex = hex.strip_prefix("0x").unwrap_or(&hex);
        let bytes = hex::decode(hex).map_err(SerdeError::custom)?;
        Signature::from_bytes(&bytes).map_err(SerdeError::custom)
    }
}

pub struct KeyPair {
    secret: SecretKey,
    public: libsecp256k1::PublicKey,
}

impl KeyPair {
    pub fn new() -> Self {
        let secret = SecretKey::random(&mut rand::rngs::OsRng);
        let public = libsecp256k1::PublicKey::from_secret_key(&secret);
        Self { secret, public }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let secret = SecretKey::parse(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        let public = libsecp256k1::PublicKey::from_secret_key(&secret);
        Ok(Self { secret, public })
    }

    pub fn get_public_key(&self) -> PublicKey {
        PublicKey::new(self.public.serialize_compressed())
    }

    pub fn get_address(&self) -> Address {
        address_of(&self.public)
    }

    pub fn sign(&self, hash: &Hash) -> Signature {
        let message = Message::parse(hash.as_bytes());
        let (signature, recovery_id) = libsecp256k1::sign(&message, &self.secret);
        let mut bytes = [0u8; SIGNATURE_SIZE];
        bytes[..64].copy_from_slice(&signature.serialize());
        bytes[64] = recovery_id.serialize();
        Signature(bytes)
    }
}

impl Default for KeyPair {
    fn default() -> Self {
        Self::new()
    }
}

// Derive the account address from an uncompressed public key
pub fn address_of(key: &libsecp256k1::PublicKey) -> Address {
    let uncompressed = key.serialize();
    // skip the leading 0x04 tag
    Address::from_hash(&hash(&uncompressed[1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_recover() {
        let keypair = KeyPair::new();
        let digest = hash(b"message");
        let signature = keypair.sign(&digest);

        let recovered = signature.recover_address(&digest).unwrap();
        assert_eq!(recovered, keypair.get_address());

        assert!(signature.verify(&digest, &keypair.get_public_key()).unwrap());
    }

    #[test]
    fn test_recover_rejects_other_message() {
        let keypair = KeyPair::new();
        let signature = keypair.sign(&hash(b"message"));

        // Recovery over another digest yields a different signer
        let recovered = signature.recover_address(&hash(b"other")).unwrap();
        assert_ne!(recovered, keypair.get_address());
    }

    #[test]
    fn test_invalid_recovery_id_rejected() {
        let keypair = KeyPair::new();
        let mut bytes = *keypair.sign(&hash(b"message")).as_bytes();
        bytes[64] = 4;
        assert!(Signature::new(bytes).is_err());
    }

    #[test]
    fn test_public_key_compress_roundtrip() {
        let keypair = KeyPair::new();
        let compressed = keypair.get_public_key();
        let decompressed = compressed.decompress().unwrap();
        assert_eq!(address_of(&decompressed), keypair.get_address());
    }
}
