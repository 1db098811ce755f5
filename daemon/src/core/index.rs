use crate::core::error::BlockchainError;
use arbor_common::{
    block::BlockHeader,
    crypto::{Hash, Hashable},
    serializer::{Reader, ReaderError, Serializer, Writer},
};
use std::collections::HashMap;
use std::sync::Arc;

// Lifecycle flags of an indexed block
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct BlockStatus(u8);

impl BlockStatus {
    pub const DATA_STORED: u8 = 1 << 0;
    pub const VALID: u8 = 1 << 1;
    pub const INVALID: u8 = 1 << 2;
    pub const ANCESTOR_INVALID: u8 = 1 << 3;

    pub fn new() -> Self {
        BlockStatus(0)
    }

    pub fn with(flags: u8) -> Self {
        BlockStatus(flags)
    }

    pub fn has(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn add(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn is_invalid(&self) -> bool {
        self.has(BlockStatus::INVALID) || self.has(BlockStatus::ANCESTOR_INVALID)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

// Work contributed by a single block. In this permissioned setting
// the score is the leader plus every minor signer, so a better
// attested side chain wins a tie at equal length.
pub fn block_work(header: &BlockHeader) -> u128 {
    1 + header.get_minor_signers().len() as u128
}

// In-memory index entry, much lighter than the block body.
// The parent is a key into the index, never an owning reference.
#[derive(Clone, Debug)]
pub struct BlockNode {
    pub hash: Hash,
    pub header: Arc<BlockHeader>,
    pub parent: Option<Hash>,
    pub height: u64,
    pub status: BlockStatus,
    // Cumulative work from genesis
    pub work: u128,
}

impl BlockNode {
    pub fn new(header: Arc<BlockHeader>, parent_work: u128) -> Self {
        let hash = header.hash();
        let parent = if header.get_height() == 0 {
            None
        } else {
            Some(header.get_previous_hash().clone())
        };

        Self {
            hash,
            height: header.get_height(),
            parent,
            work: parent_work + block_work(&header),
            status: BlockStatus::new(),
            header,
        }
    }
}

impl Serializer for BlockNode {
    fn write(&self, writer: &mut Writer) {
        self.header.write(writer);
        writer.write_u8(self.status.bits());
        writer.write_u64(&((self.work >> 64) as u64));
        writer.write_u64(&(self.work as u64));
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let header = Arc::new(BlockHeader::read(reader)?);
        let status = BlockStatus::with(reader.read_u8()?);
        let high = reader.read_u64()?;
        let low = reader.read_u64()?;

        let hash = header.hash();
        let parent = if header.get_height() == 0 {
            None
        } else {
            Some(header.get_previous_hash().clone())
        };

        Ok(Self {
            hash,
            height: header.get_height(),
            parent,
            work: ((high as u128) << 64) | low as u128,
            status,
            header,
        })
    }

    fn size(&self) -> usize {
        self.header.size() + 1 + 16
    }
}

// Arena of every known block keyed by hash
#[derive(Default)]
pub struct BlockIndex {
    nodes: HashMap<Hash, BlockNode>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: BlockNode) {
        self.nodes.insert(node.hash.clone(), node);
    }

    pub fn have_block(&self, hash: &Hash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&BlockNode> {
        self.nodes.get(hash)
    }

    pub fn get_mut(&mut self, hash: &Hash) -> Option<&mut BlockNode> {
        self.nodes.get_mut(hash)
    }

    // A node is connectable when its parent is indexed with its data
    // stored
    pub fn is_connectable(&self, node: &BlockNode) -> bool {
        match &node.parent {
            None => true,
            Some(parent) => self
                .get(parent)
                .map(|p| p.status.has(BlockStatus::DATA_STORED))
                .unwrap_or(false),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // Walk up from the given node until the target height
    pub fn ancestor_at(&self, mut hash: Hash, height: u64) -> Result<Hash, BlockchainError> {
        loop {
            let node = self
                .get(&hash)
                .ok_or_else(|| BlockchainError::BlockNotFound(hash.clone()))?;
            if node.height == height {
                return Ok(hash);
            }
            if node.height < height {
                return Err(BlockchainError::BadHeight {
                    have: height,
                    parent: node.height,
                });
            }
            hash = node
                .parent
                .clone()
                .ok_or_else(|| BlockchainError::BlockNotFound(hash.clone()))?;
        }
    }

    // Lowest common ancestor of two indexed blocks, found by
    // equalizing heights and stepping both sides upwards
    pub fn lowest_common_ancestor(&self, a: &Hash, b: &Hash) -> Result<Hash, BlockchainError> {
        let height_a = self
            .get(a)
            .ok_or_else(|| BlockchainError::BlockNotFound(a.clone()))?
            .height;
        let height_b = self
            .get(b)
            .ok_or_else(|| BlockchainError::BlockNotFound(b.clone()))?
            .height;

        let common = height_a.min(height_b);
        let mut walk_a = self.ancestor_at(a.clone(), common)?;
        let mut walk_b = self.ancestor_at(b.clone(), common)?;

        while walk_a != walk_b {
            let node_a = self
                .get(&walk_a)
                .ok_or_else(|| BlockchainError::BlockNotFound(walk_a.clone()))?;
            let node_b = self
                .get(&walk_b)
                .ok_or_else(|| BlockchainError::BlockNotFound(walk_b.clone()))?;

            walk_a = node_a
                .parent
                .clone()
                .ok_or_else(|| BlockchainError::Corruption("chains share no ancestor".into()))?;
            walk_b = node_b
                .parent
                .clone()
                .ok_or_else(|| BlockchainError::Corruption("chains share no ancestor".into()))?;
        }

        Ok(walk_a)
    }

    // Flag a node and every descendant after a failed execution
    pub fn mark_invalid(&mut self, root: &Hash) {
        if let Some(node) = self.get_mut(root) {
            node.status.add(BlockStatus::INVALID);
        }

        let descendants: Vec<Hash> = self
            .nodes
            .values()
            .filter(|node| node.hash != *root)
            .filter(|node| self.descends_from(node, root))
            .map(|node| node.hash.clone())
            .collect();

        for hash in descendants {
            if let Some(node) = self.nodes.get_mut(&hash) {
                node.status.add(BlockStatus::ANCESTOR_INVALID);
            }
        }
    }

    fn descends_from(&self, node: &BlockNode, ancestor: &Hash) -> bool {
        let mut current = node.parent.clone();
        while let Some(hash) = current {
            if hash == *ancestor {
                return true;
            }
            current = self.get(&hash).and_then(|n| n.parent.clone());
        }
        false
    }
}

// Append-only view of the canonical chain with O(1) height lookup
#[derive(Default)]
pub struct ChainView {
    hashes: Vec<Hash>,
}

impl ChainView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tip(&self) -> Option<&Hash> {
        self.hashes.last()
    }

    pub fn height(&self) -> u64 {
        self.hashes.len().saturating_sub(1) as u64
    }

    pub fn hash_at_height(&self, height: u64) -> Option<&Hash> {
        self.hashes.get(height as usize)
    }

    pub fn contains(&self, hash: &Hash, height: u64) -> bool {
        self.hash_at_height(height) == Some(hash)
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    // Fast forward by one block
    pub fn push(&mut self, hash: Hash) {
        self.hashes.push(hash);
    }

    // Point the view at a new tip, truncating back to the fork point
    // and refilling from the index
    pub fn set_tip(&mut self, index: &BlockIndex, tip: &Hash) -> Result<(), BlockchainError> {
        let tip_node = index
            .get(tip)
            .ok_or_else(|| BlockchainError::BlockNotFound(tip.clone()))?;

        let mut rebuilt = vec![Hash::zero(); tip_node.height as usize + 1];
        let mut current = Some(tip.clone());
        let mut height = tip_node.height as i64;

        while let Some(hash) = current {
            if height < 0 {
                return Err(BlockchainError::Corruption("chain view underflow".into()));
            }
            let node = index
                .get(&hash)
                .ok_or_else(|| BlockchainError::BlockNotFound(hash.clone()))?;
            rebuilt[height as usize] = hash;
            current = node.parent.clone();
            height -= 1;
        }

        self.hashes = rebuilt;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::{
        config::{CHAIN_VERSION, GENESIS_GAS_LIMIT},
        crypto::KeyPair,
        transaction::ChainId,
    };

    fn header(previous: Hash, height: u64) -> Arc<BlockHeader> {
        Arc::new(BlockHeader::new(
            ChainId::zero(),
            CHAIN_VERSION,
            previous,
            height,
            1_700_000_000 + height,
            GENESIS_GAS_LIMIT,
            KeyPair::new().get_public_key(),
        ))
    }

    fn chain(index: &mut BlockIndex, length: u64) -> Vec<Hash> {
        let mut hashes = Vec::new();
        let mut previous = Hash::zero();
        let mut work = 0;
        for height in 0..length {
            let node = BlockNode::new(header(previous.clone(), height), work);
            work = node.work;
            previous = node.hash.clone();
            hashes.push(node.hash.clone());
            index.add_node(node);
        }
        hashes
    }

    #[test]
    fn test_status_flags() {
        let mut status = BlockStatus::new();
        status.add(BlockStatus::DATA_STORED);
        assert!(status.has(BlockStatus::DATA_STORED));
        assert!(!status.is_invalid());

        status.add(BlockStatus::ANCESTOR_INVALID);
        assert!(status.is_invalid());
    }

    #[test]
    fn test_lowest_common_ancestor() {
        let mut index = BlockIndex::new();
        let main = chain(&mut index, 4);

        // Fork at height 1
        let fork_node = BlockNode::new(
            header(main[1].clone(), 2),
            index.get(&main[1]).unwrap().work,
        );
        let fork_hash = fork_node.hash.clone();
        index.add_node(fork_node);

        let lca = index.lowest_common_ancestor(&main[3], &fork_hash).unwrap();
        assert_eq!(lca, main[1]);
    }

    #[test]
    fn test_mark_invalid_propagates() {
        let mut index = BlockIndex::new();
        let main = chain(&mut index, 4);

        index.mark_invalid(&main[1]);
        assert!(index.get(&main[1]).unwrap().status.has(BlockStatus::INVALID));
        assert!(index
            .get(&main[2])
            .unwrap()
            .status
            .has(BlockStatus::ANCESTOR_INVALID));
        assert!(index
            .get(&main[3])
            .unwrap()
            .status
            .has(BlockStatus::ANCESTOR_INVALID));
        assert!(!index.get(&main[0]).unwrap().status.is_invalid());
    }

    #[test]
    fn test_chain_view_set_tip() {
        let mut index = BlockIndex::new();
        let main = chain(&mut index, 3);

        let mut view = ChainView::new();
        view.set_tip(&index, &main[2]).unwrap();
        assert_eq!(view.height(), 2);
        assert_eq!(view.tip(), Some(&main[2]));
        assert_eq!(view.hash_at_height(0), Some(&main[0]));
        assert!(view.contains(&main[1], 1));
    }

    #[test]
    fn test_block_node_roundtrip() {
        let node = BlockNode::new(header(Hash::zero(), 0), 0);
        let bytes = node.to_bytes();
        assert_eq!(bytes.len(), node.size());

        let decoded = BlockNode::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.hash, node.hash);
        assert_eq!(decoded.work, node.work);
    }
}
