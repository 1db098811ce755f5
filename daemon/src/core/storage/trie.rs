use super::kv::KeyValueStore;
use crate::core::error::BlockchainError;
use arbor_common::{
    crypto::{hash, Hash},
    serializer::{varint_size, Reader, ReaderError, Serializer, Writer},
};

// Merkle-Patricia style trie over the key/value backend.
//
// Nodes are content addressed: they are stored under their own hash
// and never overwritten, so every state root that was ever committed
// stays readable. The reorganization driver relies on this to re-root
// a journal at an ancestor without any undo log.
//
// Paths are nibble strings (one half-byte per element). Shared
// prefixes are compressed into the branch node itself, suffixes into
// leaves, which keeps the node shape canonical for a given key set
// regardless of insertion order.

const NODE_PREFIX: &[u8] = b"trie/";

enum Node {
    Leaf {
        // remaining nibbles below the parent
        path: Vec<u8>,
        value: Vec<u8>,
    },
    Branch {
        // compressed nibbles shared by every key below this node
        prefix: Vec<u8>,
        children: [Option<Hash>; 16],
        // set when a key terminates exactly at this node
        value: Option<Vec<u8>>,
    },
}

impl Serializer for Node {
    fn write(&self, writer: &mut Writer) {
        match self {
            Node::Leaf { path, value } => {
                writer.write_u8(0);
                writer.write_var_bytes(path);
                writer.write_var_bytes(value);
            }
            Node::Branch {
                prefix,
                children,
                value,
            } => {
                writer.write_u8(1);
                writer.write_var_bytes(prefix);
                let mut bitmap: u16 = 0;
                for (i, child) in children.iter().enumerate() {
                    if child.is_some() {
                        bitmap |= 1 << i;
                    }
                }
                writer.write_u16(bitmap);
                for child in children.iter().flatten() {
                    writer.write_hash(child);
                }
                match value {
                    Some(value) => {
                        writer.write_bool(true);
                        writer.write_var_bytes(value);
                    }
                    None => writer.write_bool(false),
                }
            }
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        match reader.read_u8()? {
            0 => {
                let path = reader.read_var_bytes()?;
                let value = reader.read_var_bytes()?;
                Ok(Node::Leaf { path, value })
            }
            1 => {
                let prefix = reader.read_var_bytes()?;
                let bitmap = reader.read_u16()?;
                let mut children: [Option<Hash>; 16] = Default::default();
                for (i, child) in children.iter_mut().enumerate() {
                    if bitmap & (1 << i) != 0 {
                        *child = Some(reader.read_hash()?);
                    }
                }
                let value = if reader.read_bool()? {
                    Some(reader.read_var_bytes()?)
                } else {
                    None
                };
                Ok(Node::Branch {
                    prefix,
                    children,
                    value,
                })
            }
            _ => Err(ReaderError::InvalidValue),
        }
    }

    fn size(&self) -> usize {
        match self {
            Node::Leaf { path, value } => {
                1 + varint_size(path.len() as u64)
                    + path.len()
                    + varint_size(value.len() as u64)
                    + value.len()
            }
            Node::Branch {
                prefix,
                children,
                value,
            } => {
                let child_count = children.iter().flatten().count();
                1 + varint_size(prefix.len() as u64)
                    + prefix.len()
                    + 2
                    + child_count * 32
                    + 1
                    + value
                        .as_ref()
                        .map(|v| varint_size(v.len() as u64) + v.len())
                        .unwrap_or(0)
            }
        }
    }
}

// Expand a key into its nibble path
pub fn to_nibbles(key: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(key.len() * 2);
    for byte in key {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    nibbles
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

pub struct Trie<'a> {
    kv: &'a dyn KeyValueStore,
}

impl<'a> Trie<'a> {
    pub fn new(kv: &'a dyn KeyValueStore) -> Self {
        Self { kv }
    }

    fn load(&self, node_hash: &Hash) -> Result<Node, BlockchainError> {
        let mut key = NODE_PREFIX.to_vec();
        key.extend_from_slice(node_hash.as_bytes());
        let bytes = self
            .kv
            .get(&key)?
            .ok_or_else(|| BlockchainError::Corruption(format!("missing trie node {}", node_hash)))?;
        Node::from_bytes(&bytes)
            .map_err(|e| BlockchainError::Corruption(format!("undecodable trie node {}: {}", node_hash, e)))
    }

    fn store(&self, node: &Node) -> Result<Hash, BlockchainError> {
        let bytes = node.to_bytes();
        let node_hash = hash(&bytes);
        let mut key = NODE_PREFIX.to_vec();
        key.extend_from_slice(node_hash.as_bytes());
        self.kv.put(&key, &bytes)?;
        Ok(node_hash)
    }

    pub fn get(&self, root: &Hash, key: &[u8]) -> Result<Option<Vec<u8>>, BlockchainError> {
        if root.is_zero() {
            return Ok(None);
        }
        self.get_at(root, &to_nibbles(key))
    }

    fn get_at(&self, node_hash: &Hash, path: &[u8]) -> Result<Option<Vec<u8>>, BlockchainError> {
        match self.load(node_hash)? {
            Node::Leaf { path: leaf_path, value } => {
                if leaf_path == path {
                    Ok(Some(value))
                } else {
                    Ok(None)
                }
            }
            Node::Branch {
                prefix,
                children,
                value,
            } => {
                if !path.starts_with(&prefix) {
                    return Ok(None);
                }
                let rest = &path[prefix.len()..];
                match rest.first() {
                    None => Ok(value),
                    Some(&nibble) => match &children[nibble as usize] {
                        Some(child) => self.get_at(child, &rest[1..]),
                        None => Ok(None),
                    },
                }
            }
        }
    }

    // Insert or update, returning the new root
    pub fn insert(&self, root: &Hash, key: &[u8], value: &[u8]) -> Result<Hash, BlockchainError> {
        let node = if root.is_zero() { None } else { Some(root.clone()) };
        self.insert_at(node, to_nibbles(key), value)
    }

    fn insert_at(
        &self,
        node_hash: Option<Hash>,
        path: Vec<u8>,
        value: &[u8],
    ) -> Result<Hash, BlockchainError> {
        let node_hash = match node_hash {
            None => {
                return self.store(&Node::Leaf {
                    path,
                    value: value.to_vec(),
                })
            }
            Some(node_hash) => node_hash,
        };

        match self.load(&node_hash)? {
            Node::Leaf {
                path: leaf_path,
                value: leaf_value,
            } => {
                if leaf_path == path {
                    return self.store(&Node::Leaf {
                        path,
                        value: value.to_vec(),
                    });
                }

                // Split at the divergence point
                let cp = common_prefix(&leaf_path, &path);
                let mut children: [Option<Hash>; 16] = Default::default();
                let mut branch_value = None;

                self.place(&mut children, &mut branch_value, &leaf_path[cp..], leaf_value)?;
                self.place(&mut children, &mut branch_value, &path[cp..], value.to_vec())?;

                self.store(&Node::Branch {
                    prefix: path[..cp].to_vec(),
                    children,
                    value: branch_value,
                })
            }
            Node::Branch {
                prefix,
                mut children,
                value: mut branch_value,
            } => {
                let cp = common_prefix(&prefix, &path);
                if cp == prefix.len() {
                    // Fully inside this branch
                    let rest = &path[cp..];
                    match rest.first() {
                        None => branch_value = Some(value.to_vec()),
                        Some(&nibble) => {
                            let child = children[nibble as usize].take();
                            children[nibble as usize] =
                                Some(self.insert_at(child, rest[1..].to_vec(), value)?);
                        }
                    }
                    return self.store(&Node::Branch {
                        prefix,
                        children,
                        value: branch_value,
                    });
                }

                // The new key diverges inside the compressed prefix,
                // split the branch itself
                let lower = self.store(&Node::Branch {
                    prefix: prefix[cp + 1..].to_vec(),
                    children,
                    value: branch_value,
                })?;

                let mut split_children: [Option<Hash>; 16] = Default::default();
                let mut split_value = None;
                split_children[prefix[cp] as usize] = Some(lower);
                self.place(&mut split_children, &mut split_value, &path[cp..], value.to_vec())?;

                self.store(&Node::Branch {
                    prefix: path[..cp].to_vec(),
                    children: split_children,
                    value: split_value,
                })
            }
        }
    }

    // Attach a remainder below a freshly created branch
    fn place(
        &self,
        children: &mut [Option<Hash>; 16],
        branch_value: &mut Option<Vec<u8>>,
        rest: &[u8],
        value: Vec<u8>,
    ) -> Result<(), BlockchainError> {
        match rest.first() {
            None => *branch_value = Some(value),
            Some(&nibble) => {
                children[nibble as usize] = Some(self.store(&Node::Leaf {
                    path: rest[1..].to_vec(),
                    value,
                })?);
            }
        }
        Ok(())
    }

    // Remove a key, returning the new root (zero hash when the trie
    // becomes empty)
    pub fn remove(&self, root: &Hash, key: &[u8]) -> Result<Hash, BlockchainError> {
        if root.is_zero() {
            return Ok(Hash::zero());
        }
        Ok(self
            .remove_at(root, &to_nibbles(key))?
            .unwrap_or_else(Hash::zero))
    }

    fn remove_at(&self, node_hash: &Hash, path: &[u8]) -> Result<Option<Hash>, BlockchainError> {
        match self.load(node_hash)? {
            Node::Leaf { path: leaf_path, .. } => {
                if leaf_path == path {
                    Ok(None)
                } else {
                    Ok(Some(node_hash.clone()))
                }
            }
            Node::Branch {
                prefix,
                mut children,
                mut value,
            } => {
                if !path.starts_with(&prefix) {
                    return Ok(Some(node_hash.clone()));
                }
                let rest = &path[prefix.len()..];
                match rest.first() {
                    None => value = None,
                    Some(&nibble) => {
                        let slot = nibble as usize;
                        match children[slot].take() {
                            Some(child) => children[slot] = self.remove_at(&child, &rest[1..])?,
                            None => return Ok(Some(node_hash.clone())),
                        }
                    }
                }

                self.normalize(prefix, children, value)
            }
        }
    }

    // Collapse a branch that lost its reason to exist
    fn normalize(
        &self,
        prefix: Vec<u8>,
        children: [Option<Hash>; 16],
        value: Option<Vec<u8>>,
    ) -> Result<Option<Hash>, BlockchainError> {
        let child_count = children.iter().flatten().count();

        if child_count == 0 {
            return match value {
                None => Ok(None),
                Some(value) => Ok(Some(self.store(&Node::Leaf {
                    path: prefix,
                    value,
                })?)),
            };
        }

        if child_count == 1 && value.is_none() {
            let (index, child) = children
                .iter()
                .enumerate()
                .find_map(|(i, c)| c.as_ref().map(|c| (i, c.clone())))
                .ok_or_else(|| BlockchainError::Corruption("branch lost its child".into()))?;

            let mut merged_prefix = prefix;
            merged_prefix.push(index as u8);

            return match self.load(&child)? {
                Node::Leaf { path, value } => {
                    merged_prefix.extend_from_slice(&path);
                    Ok(Some(self.store(&Node::Leaf {
                        path: merged_prefix,
                        value,
                    })?))
                }
                Node::Branch {
                    prefix: child_prefix,
                    children: child_children,
                    value: child_value,
                } => {
                    merged_prefix.extend_from_slice(&child_prefix);
                    Ok(Some(self.store(&Node::Branch {
                        prefix: merged_prefix,
                        children: child_children,
                        value: child_value,
                    })?))
                }
            };
        }

        Ok(Some(self.store(&Node::Branch {
            prefix,
            children,
            value,
        })?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::kv::MemoryStore;
    use proptest::prelude::*;

    fn insert_all(trie: &Trie, entries: &[(&[u8], &[u8])]) -> Hash {
        let mut root = Hash::zero();
        for (key, value) in entries {
            root = trie.insert(&root, key, value).unwrap();
        }
        root
    }

    #[test]
    fn test_insert_and_get() {
        let kv = MemoryStore::new();
        let trie = Trie::new(&kv);

        let root = insert_all(
            &trie,
            &[(b"a:alice", b"1"), (b"a:bob", b"2"), (b"n:alias", b"3")],
        );

        assert_eq!(trie.get(&root, b"a:alice").unwrap().unwrap(), b"1");
        assert_eq!(trie.get(&root, b"a:bob").unwrap().unwrap(), b"2");
        assert_eq!(trie.get(&root, b"n:alias").unwrap().unwrap(), b"3");
        assert!(trie.get(&root, b"a:carol").unwrap().is_none());
    }

    #[test]
    fn test_prefix_keys() {
        let kv = MemoryStore::new();
        let trie = Trie::new(&kv);

        // One key is a strict prefix of the other
        let root = insert_all(&trie, &[(b"n:ab", b"short"), (b"n:abc", b"long")]);
        assert_eq!(trie.get(&root, b"n:ab").unwrap().unwrap(), b"short");
        assert_eq!(trie.get(&root, b"n:abc").unwrap().unwrap(), b"long");
    }

    #[test]
    fn test_update_changes_root() {
        let kv = MemoryStore::new();
        let trie = Trie::new(&kv);

        let root1 = trie.insert(&Hash::zero(), b"key", b"v1").unwrap();
        let root2 = trie.insert(&root1, b"key", b"v2").unwrap();
        assert_ne!(root1, root2);

        // Old root stays readable, content addressing keeps history
        assert_eq!(trie.get(&root1, b"key").unwrap().unwrap(), b"v1");
        assert_eq!(trie.get(&root2, b"key").unwrap().unwrap(), b"v2");
    }

    #[test]
    fn test_insertion_order_independent() {
        let kv = MemoryStore::new();
        let trie = Trie::new(&kv);

        let entries: [(&[u8], &[u8]); 4] = [
            (b"a:1", b"one"),
            (b"a:2", b"two"),
            (b"s:11", b"word"),
            (b"n:tom", b"addr"),
        ];
        let mut reversed = entries;
        reversed.reverse();

        assert_eq!(insert_all(&trie, &entries), insert_all(&trie, &reversed));
    }

    #[test]
    fn test_remove() {
        let kv = MemoryStore::new();
        let trie = Trie::new(&kv);

        let root_a = trie.insert(&Hash::zero(), b"a:alice", b"1").unwrap();
        let root_ab = trie.insert(&root_a, b"a:bob", b"2").unwrap();

        let removed = trie.remove(&root_ab, b"a:bob").unwrap();
        assert_eq!(removed, root_a);
        assert!(trie.get(&removed, b"a:bob").unwrap().is_none());

        let empty = trie.remove(&removed, b"a:alice").unwrap();
        assert_eq!(empty, Hash::zero());
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let kv = MemoryStore::new();
        let trie = Trie::new(&kv);

        let root = trie.insert(&Hash::zero(), b"a:alice", b"1").unwrap();
        assert_eq!(trie.remove(&root, b"a:bob").unwrap(), root);
    }

    proptest! {
        #[test]
        fn prop_trie_matches_model(entries in proptest::collection::btree_map(
            proptest::collection::vec(any::<u8>(), 1..16),
            proptest::collection::vec(any::<u8>(), 1..16),
            1..24,
        )) {
            let kv = MemoryStore::new();
            let trie = Trie::new(&kv);

            let mut root = Hash::zero();
            for (key, value) in &entries {
                root = trie.insert(&root, key, value).unwrap();
            }

            for (key, value) in &entries {
                prop_assert_eq!(trie.get(&root, key).unwrap().unwrap(), value.clone());
            }

            // Removing every key in order empties the trie
            for key in entries.keys() {
                root = trie.remove(&root, key).unwrap();
            }
            prop_assert_eq!(root, Hash::zero());
        }
    }
}
