use super::BlockHeader;
use crate::{
    crypto::{Hash, Hashable},
    serializer::{varint_size, Reader, ReaderError, Serializer, Writer},
    transaction::Transaction,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter},
    ops::Deref,
    sync::Arc,
};

// Consensus proof attached to a block, produced and checked by the
// engine plugin. Kind 0 is the solo engine (leader signature over the
// header hash), other kinds are opaque to the core.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Proof {
    pub kind: u8,
    pub evidence: Vec<u8>,
}

impl Proof {
    pub const SOLO: u8 = 0;
    pub const BFT: u8 = 1;

    pub fn empty() -> Self {
        Self {
            kind: Proof::SOLO,
            evidence: Vec::new(),
        }
    }
}

impl Serializer for Proof {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(self.kind);
        writer.write_var_bytes(&self.evidence);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let kind = reader.read_u8()?;
        let evidence = reader.read_var_bytes()?;
        Ok(Self { kind, evidence })
    }

    fn size(&self) -> usize {
        1 + varint_size(self.evidence.len() as u64) + self.evidence.len()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Block {
    header: Arc<BlockHeader>,
    transactions: Vec<Arc<Transaction>>,
    proof: Proof,
}

impl Block {
    pub fn new(header: Arc<BlockHeader>, transactions: Vec<Arc<Transaction>>, proof: Proof) -> Self {
        Block {
            header,
            transactions,
            proof,
        }
    }

    pub fn get_header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn header_arc(&self) -> Arc<BlockHeader> {
        Arc::clone(&self.header)
    }

    pub fn get_txs_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn get_transactions(&self) -> &Vec<Arc<Transaction>> {
        &self.transactions
    }

    pub fn get_proof(&self) -> &Proof {
        &self.proof
    }

    pub fn split(self) -> (Arc<BlockHeader>, Vec<Arc<Transaction>>, Proof) {
        (self.header, self.transactions, self.proof)
    }
}

impl Serializer for Block {
    fn write(&self, writer: &mut Writer) {
        self.header.write(writer);
        writer.write_varint(self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.write(writer);
        }
        self.proof.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Block, ReaderError> {
        let header = BlockHeader::read(reader)?;
        let count = reader.read_varint()?;
        if count > reader.remaining() as u64 {
            return Err(ReaderError::InvalidSize);
        }

        let mut txs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            txs.push(Arc::new(Transaction::read(reader)?));
        }
        let proof = Proof::read(reader)?;

        Ok(Block::new(Arc::new(header), txs, proof))
    }

    fn size(&self) -> usize {
        self.header.size()
            + varint_size(self.transactions.len() as u64)
            + self.transactions.iter().map(|tx| tx.size()).sum::<usize>()
            + self.proof.size()
    }
}

// The block identity is the header hash, the body is bound to it
// through the tx root
impl Hashable for Block {
    fn hash(&self) -> Hash {
        self.header.hash()
    }
}

impl Deref for Block {
    type Target = BlockHeader;

    fn deref(&self) -> &Self::Target {
        self.get_header()
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "Block[height: {}, previous: {}, timestamp: {}, txs: {}]",
            self.height,
            self.previous_hash,
            self.timestamp,
            self.transactions.len()
        )
    }
}
