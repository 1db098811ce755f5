// Merkle root calculation for transaction and receipt lists

use crate::crypto::{Hash, Hashable, HASH_SIZE};
use crate::receipt::Receipt;
use crate::transaction::Transaction;
use sha3::{Digest, Keccak256};
use std::sync::Arc;

/// Calculate the merkle root of a list of leaf hashes
///
/// This builds a binary merkle tree where:
/// - Parent nodes are keccak(left || right)
/// - An odd node at any level is paired with itself
/// - The empty list collapses to the all-zero sentinel
///
/// The body root in a header must match this value to bind the header
/// to the exact transaction list it was produced with.
pub fn calculate_merkle_root(mut hashes: Vec<Hash>) -> Hash {
    if hashes.is_empty() {
        return Hash::zero();
    }

    // Single leaf pairs with itself
    if hashes.len() == 1 {
        return hash_pair(&hashes[0], &hashes[0]);
    }

    while hashes.len() > 1 {
        let mut next_level = Vec::with_capacity(hashes.len().div_ceil(2));

        for chunk in hashes.chunks(2) {
            let left = &chunk[0];
            let right = if chunk.len() == 2 { &chunk[1] } else { &chunk[0] };
            next_level.push(hash_pair(left, right));
        }

        hashes = next_level;
    }

    hashes.remove(0)
}

/// Merkle root over the hashes of a transaction list
pub fn transactions_merkle_root(transactions: &[Arc<Transaction>]) -> Hash {
    calculate_merkle_root(transactions.iter().map(|tx| tx.hash()).collect())
}

/// Merkle root over the hashes of a receipt list
pub fn receipts_merkle_root(receipts: &[Receipt]) -> Hash {
    calculate_merkle_root(receipts.iter().map(|r| r.hash()).collect())
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());

    let result: [u8; HASH_SIZE] = hasher.finalize().into();
    Hash::new(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash;

    #[test]
    fn test_empty_merkle_root() {
        assert_eq!(calculate_merkle_root(vec![]), Hash::zero());
    }

    #[test]
    fn test_single_leaf() {
        let leaf = hash(b"tx");
        let root = calculate_merkle_root(vec![leaf.clone()]);
        assert_eq!(root, hash_pair(&leaf, &leaf));
    }

    #[test]
    fn test_two_leaves() {
        let a = hash(b"a");
        let b = hash(b"b");
        let root = calculate_merkle_root(vec![a.clone(), b.clone()]);
        assert_eq!(root, hash_pair(&a, &b));
    }

    #[test]
    fn test_three_leaves() {
        let a = hash(b"a");
        let b = hash(b"b");
        let c = hash(b"c");
        let root = calculate_merkle_root(vec![a.clone(), b.clone(), c.clone()]);

        // Level 0: [a, b, c]
        // Level 1: [h(a||b), h(c||c)]
        // Level 2: h(h(a||b) || h(c||c))
        let hab = hash_pair(&a, &b);
        let hcc = hash_pair(&c, &c);
        assert_eq!(root, hash_pair(&hab, &hcc));
    }

    #[test]
    fn test_distinct_lists_distinct_roots() {
        let a = hash(b"a");
        let b = hash(b"b");
        let root_ab = calculate_merkle_root(vec![a.clone(), b.clone()]);
        let root_ba = calculate_merkle_root(vec![b, a]);
        assert_ne!(root_ab, root_ba);
    }

    #[test]
    fn test_merkle_root_deterministic() {
        let leaves = vec![hash(b"1"), hash(b"2"), hash(b"3"), hash(b"4"), hash(b"5")];
        assert_eq!(
            calculate_merkle_root(leaves.clone()),
            calculate_merkle_root(leaves)
        );
    }

    use proptest::prelude::*;

    proptest! {
        // Appending a leaf always moves the root, so a header can
        // never commit to a truncated body
        #[test]
        fn prop_extended_list_changes_root(seeds in proptest::collection::vec(any::<u64>(), 1..32)) {
            let mut leaves: Vec<Hash> = seeds.iter().map(|s| hash(&s.to_be_bytes())).collect();
            let root = calculate_merkle_root(leaves.clone());

            leaves.push(hash(b"extra"));
            let extended = calculate_merkle_root(leaves);
            prop_assert_ne!(root, extended);
        }
    }
}
