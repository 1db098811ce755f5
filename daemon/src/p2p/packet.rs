use arbor_common::{
    block::Block,
    crypto::Hash,
    serializer::{varint_size, Reader, ReaderError, Serializer, Writer},
    transaction::Transaction,
};
use std::sync::Arc;

// Wire vocabulary of the block manager protocol. Transport, framing
// and peer bookkeeping belong to the network collaborator; the core
// only defines the payloads and their deterministic encoding.

// A peer advertising its chain position
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerState {
    pub height: u64,
    pub best_hash: Hash,
}

impl Serializer for PeerState {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(&self.height);
        writer.write_hash(&self.best_hash);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            height: reader.read_u64()?,
            best_hash: reader.read_hash()?,
        })
    }

    fn size(&self) -> usize {
        8 + 32
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderHashEntry {
    pub height: u64,
    pub hash: Hash,
}

impl Serializer for HeaderHashEntry {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(&self.height);
        writer.write_hash(&self.hash);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            height: reader.read_u64()?,
            hash: reader.read_hash()?,
        })
    }

    fn size(&self) -> usize {
        8 + 32
    }
}

#[derive(Clone, Debug)]
pub enum Packet {
    PeerState(PeerState),
    ReqPeerState,
    GetHeaderHashes { from: u64, count: u64 },
    HeaderHashes(Vec<HeaderHashEntry>),
    GetBlocks(Vec<Hash>),
    Blocks(Vec<Block>),
    NewBlock(Block),
    NewTransaction(Arc<Transaction>),
}

impl Serializer for Packet {
    fn write(&self, writer: &mut Writer) {
        match self {
            Packet::PeerState(state) => {
                writer.write_u8(0);
                state.write(writer);
            }
            Packet::ReqPeerState => writer.write_u8(1),
            Packet::GetHeaderHashes { from, count } => {
                writer.write_u8(2);
                writer.write_u64(from);
                writer.write_u64(count);
            }
            Packet::HeaderHashes(entries) => {
                writer.write_u8(3);
                entries.write(writer);
            }
            Packet::GetBlocks(hashes) => {
                writer.write_u8(4);
                hashes.write(writer);
            }
            Packet::Blocks(blocks) => {
                writer.write_u8(5);
                writer.write_varint(blocks.len() as u64);
                for block in blocks {
                    block.write(writer);
                }
            }
            Packet::NewBlock(block) => {
                writer.write_u8(6);
                block.write(writer);
            }
            Packet::NewTransaction(tx) => {
                writer.write_u8(7);
                tx.write(writer);
            }
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            0 => Packet::PeerState(PeerState::read(reader)?),
            1 => Packet::ReqPeerState,
            2 => Packet::GetHeaderHashes {
                from: reader.read_u64()?,
                count: reader.read_u64()?,
            },
            3 => Packet::HeaderHashes(Vec::read(reader)?),
            4 => Packet::GetBlocks(Vec::read(reader)?),
            5 => {
                let count = reader.read_varint()?;
                if count > reader.remaining() as u64 {
                    return Err(ReaderError::InvalidSize);
                }
                let mut blocks = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    blocks.push(Block::read(reader)?);
                }
                Packet::Blocks(blocks)
            }
            6 => Packet::NewBlock(Block::read(reader)?),
            7 => Packet::NewTransaction(Arc::new(Transaction::read(reader)?)),
            _ => return Err(ReaderError::InvalidValue),
        })
    }

    fn size(&self) -> usize {
        1 + match self {
            Packet::PeerState(state) => state.size(),
            Packet::ReqPeerState => 0,
            Packet::GetHeaderHashes { .. } => 16,
            Packet::HeaderHashes(entries) => entries.size(),
            Packet::GetBlocks(hashes) => hashes.size(),
            Packet::Blocks(blocks) => {
                varint_size(blocks.len() as u64)
                    + blocks.iter().map(|b| b.size()).sum::<usize>()
            }
            Packet::NewBlock(block) => block.size(),
            Packet::NewTransaction(tx) => tx.size(),
        }
    }
}
