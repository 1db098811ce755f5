use crate::{
    crypto::{Hash, Hashable, PublicKey},
    receipt::Bloom,
    serializer::{Reader, ReaderError, Serializer, Writer},
    time::TimestampSeconds,
    transaction::ChainId,
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Error as FmtError, Formatter};

// Upper bound on the minor signer set, the committee of a
// permissioned chain stays far below it. Enforced on decode, a
// header beyond it is malformed.
pub const MAX_MINOR_SIGNERS: usize = 64;

/// Block header, hashed in full to form the block identity.
///
/// The leader and minor signer set are produced by the consensus
/// engine; the core only checks them through the injected proof
/// validator.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BlockHeader {
    pub chain_id: ChainId,
    pub version: u32,
    pub previous_hash: Hash,
    pub height: u64,
    pub timestamp: TimestampSeconds,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub state_root: Hash,
    // Merkle root of the body's transaction hashes, zero when empty
    pub tx_root: Hash,
    pub receipt_root: Hash,
    pub bloom: Bloom,
    pub leader: PublicKey,
    pub minor_signers: Vec<PublicKey>,
}

impl BlockHeader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain_id: ChainId,
        version: u32,
        previous_hash: Hash,
        height: u64,
        timestamp: TimestampSeconds,
        gas_limit: u64,
        leader: PublicKey,
    ) -> Self {
        Self {
            chain_id,
            version,
            previous_hash,
            height,
            timestamp,
            gas_limit,
            gas_used: 0,
            state_root: Hash::zero(),
            tx_root: Hash::zero(),
            receipt_root: Hash::zero(),
            bloom: Bloom::zero(),
            leader,
            minor_signers: Vec::new(),
        }
    }

    pub fn get_chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub fn get_version(&self) -> u32 {
        self.version
    }

    pub fn get_previous_hash(&self) -> &Hash {
        &self.previous_hash
    }

    pub fn get_height(&self) -> u64 {
        self.height
    }

    pub fn get_timestamp(&self) -> TimestampSeconds {
        self.timestamp
    }

    pub fn get_gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn get_gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn get_state_root(&self) -> &Hash {
        &self.state_root
    }

    pub fn get_tx_root(&self) -> &Hash {
        &self.tx_root
    }

    pub fn get_receipt_root(&self) -> &Hash {
        &self.receipt_root
    }

    pub fn get_bloom(&self) -> &Bloom {
        &self.bloom
    }

    pub fn get_leader(&self) -> &PublicKey {
        &self.leader
    }

    pub fn get_minor_signers(&self) -> &[PublicKey] {
        &self.minor_signers
    }
}

impl Serializer for BlockHeader {
    fn write(&self, writer: &mut Writer) {
        writer.write_hash(&self.chain_id);
        writer.write_u32(&self.version);
        writer.write_hash(&self.previous_hash);
        writer.write_u64(&self.height);
        writer.write_u64(&self.timestamp);
        writer.write_u64(&self.gas_limit);
        writer.write_u64(&self.gas_used);
        writer.write_hash(&self.state_root);
        writer.write_hash(&self.tx_root);
        writer.write_hash(&self.receipt_root);
        self.bloom.write(writer);
        self.leader.write(writer);
        // An oversized signer set would truncate the count byte and
        // split consensus on the decoded header
        assert!(
            self.minor_signers.len() <= MAX_MINOR_SIGNERS,
            "header carries {} minor signers, limit is {}",
            self.minor_signers.len(),
            MAX_MINOR_SIGNERS
        );
        writer.write_u8(self.minor_signers.len() as u8);
        for signer in &self.minor_signers {
            signer.write(writer);
        }
    }

    fn read(reader: &mut Reader) -> Result<BlockHeader, ReaderError> {
        let chain_id = reader.read_hash()?;
        let version = reader.read_u32()?;
        let previous_hash = reader.read_hash()?;
        let height = reader.read_u64()?;
        let timestamp = reader.read_u64()?;
        let gas_limit = reader.read_u64()?;
        let gas_used = reader.read_u64()?;
        let state_root = reader.read_hash()?;
        let tx_root = reader.read_hash()?;
        let receipt_root = reader.read_hash()?;
        let bloom = Bloom::read(reader)?;
        let leader = PublicKey::read(reader)?;

        let signers_count = reader.read_u8()?;
        if signers_count as usize > MAX_MINOR_SIGNERS {
            return Err(ReaderError::InvalidValue);
        }
        let mut minor_signers = Vec::with_capacity(signers_count as usize);
        for _ in 0..signers_count {
            minor_signers.push(PublicKey::read(reader)?);
        }

        Ok(BlockHeader {
            chain_id,
            version,
            previous_hash,
            height,
            timestamp,
            gas_limit,
            gas_used,
            state_root,
            tx_root,
            receipt_root,
            bloom,
            leader,
            minor_signers,
        })
    }

    fn size(&self) -> usize {
        self.chain_id.size()
            + 4 // version
            + self.previous_hash.size()
            + 8 // height
            + 8 // timestamp
            + 8 // gas limit
            + 8 // gas used
            + self.state_root.size()
            + self.tx_root.size()
            + self.receipt_root.size()
            + self.bloom.size()
            + self.leader.size()
            + 1 // signers count
            + self.minor_signers.iter().map(|s| s.size()).sum::<usize>()
    }
}

impl Hashable for BlockHeader {}

impl Display for BlockHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "BlockHeader[height: {}, previous: {}, timestamp: {}, gas: {}/{}, txs root: {}]",
            self.height,
            self.previous_hash,
            self.timestamp,
            self.gas_used,
            self.gas_limit,
            self.tx_root,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::CHAIN_VERSION, crypto::KeyPair};

    #[test]
    fn test_header_serialization() {
        let leader = KeyPair::new().get_public_key();
        let mut header = BlockHeader::new(
            ChainId::zero(),
            CHAIN_VERSION,
            Hash::zero(),
            42,
            1_700_000_000,
            180_000_000,
            leader,
        );
        header.gas_used = 21_000;
        header.minor_signers = vec![KeyPair::new().get_public_key()];

        let serialized = header.to_bytes();
        assert_eq!(serialized.len(), header.size());

        let deserialized = BlockHeader::from_bytes(&serialized).unwrap();
        assert_eq!(header.hash(), deserialized.hash());
        assert_eq!(deserialized.get_height(), 42);
        assert_eq!(deserialized.get_minor_signers().len(), 1);
    }

    #[test]
    fn test_oversized_signer_set_rejected() {
        let leader = KeyPair::new().get_public_key();
        let header = BlockHeader::new(
            ChainId::zero(),
            CHAIN_VERSION,
            Hash::zero(),
            1,
            1_700_000_000,
            180_000_000,
            leader,
        );

        // Rewrite the trailing signer-count byte past the bound
        let mut bytes = header.to_bytes();
        let count_index = bytes.len() - 1;
        bytes[count_index] = MAX_MINOR_SIGNERS as u8 + 1;
        assert!(BlockHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_hash_covers_state_root() {
        let leader = KeyPair::new().get_public_key();
        let header = BlockHeader::new(
            ChainId::zero(),
            CHAIN_VERSION,
            Hash::zero(),
            1,
            1_700_000_000,
            180_000_000,
            leader,
        );

        let mut modified = header.clone();
        modified.state_root = crate::crypto::hash(b"other root");
        assert_ne!(header.hash(), modified.hash());
    }
}
