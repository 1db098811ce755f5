use arbor_common::crypto::Hash;
use indexmap::IndexMap;

// In-memory overlay buffering state writes until Commit or Discard.
//
// The overlay maps logical state keys to their pending value, None
// marking a deletion. Reads check the overlay first and fall back to
// the trie at the base root. Savepoints give the VM a rollback point
// inside a single journal: every write appends an undo record, and
// rolling back replays them in reverse.
pub struct Journal {
    base_root: Hash,
    writes: IndexMap<Vec<u8>, Option<Vec<u8>>>,
    // (key, previous overlay entry), None when the key was untouched
    undo: Vec<(Vec<u8>, Option<Option<Vec<u8>>>)>,
}

// Index into the undo log marking a rollback point
pub type Savepoint = usize;

impl Journal {
    pub fn new(base_root: Hash) -> Self {
        Self {
            base_root,
            writes: IndexMap::new(),
            undo: Vec::new(),
        }
    }

    pub fn base_root(&self) -> &Hash {
        &self.base_root
    }

    // Overlay lookup: outer None means untouched, inner None a deletion
    pub fn get(&self, key: &[u8]) -> Option<&Option<Vec<u8>>> {
        self.writes.get(key)
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let previous = self.writes.insert(key.clone(), Some(value));
        self.undo.push((key, previous));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        let previous = self.writes.insert(key.clone(), None);
        self.undo.push((key, previous));
    }

    pub fn savepoint(&self) -> Savepoint {
        self.undo.len()
    }

    // Unwind every write made after the savepoint
    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        while self.undo.len() > savepoint {
            if let Some((key, previous)) = self.undo.pop() {
                match previous {
                    Some(entry) => {
                        self.writes.insert(key, entry);
                    }
                    None => {
                        self.writes.swap_remove(&key);
                    }
                }
            }
        }
    }

    // Buffered writes in deterministic (sorted key) order, ready to
    // be folded into the trie
    pub fn sorted_writes(&self) -> Vec<(&Vec<u8>, &Option<Vec<u8>>)> {
        let mut entries: Vec<_> = self.writes.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_reads() {
        let mut journal = Journal::new(Hash::zero());
        assert!(journal.get(b"key").is_none());

        journal.put(b"key".to_vec(), b"value".to_vec());
        assert_eq!(journal.get(b"key"), Some(&Some(b"value".to_vec())));

        journal.delete(b"key".to_vec());
        assert_eq!(journal.get(b"key"), Some(&None));
    }

    #[test]
    fn test_savepoint_rollback() {
        let mut journal = Journal::new(Hash::zero());
        journal.put(b"a".to_vec(), b"1".to_vec());

        let savepoint = journal.savepoint();
        journal.put(b"a".to_vec(), b"2".to_vec());
        journal.put(b"b".to_vec(), b"3".to_vec());
        journal.delete(b"a".to_vec());

        journal.rollback_to(savepoint);
        assert_eq!(journal.get(b"a"), Some(&Some(b"1".to_vec())));
        assert!(journal.get(b"b").is_none());
    }

    #[test]
    fn test_nested_savepoints() {
        let mut journal = Journal::new(Hash::zero());
        journal.put(b"a".to_vec(), b"1".to_vec());

        let outer = journal.savepoint();
        journal.put(b"b".to_vec(), b"2".to_vec());

        let inner = journal.savepoint();
        journal.put(b"c".to_vec(), b"3".to_vec());

        // Inner rollback must not disturb outer buffered writes
        journal.rollback_to(inner);
        assert!(journal.get(b"c").is_none());
        assert_eq!(journal.get(b"b"), Some(&Some(b"2".to_vec())));

        journal.rollback_to(outer);
        assert!(journal.get(b"b").is_none());
        assert_eq!(journal.get(b"a"), Some(&Some(b"1".to_vec())));
    }

    #[test]
    fn test_sorted_writes() {
        let mut journal = Journal::new(Hash::zero());
        journal.put(b"z".to_vec(), b"1".to_vec());
        journal.put(b"a".to_vec(), b"2".to_vec());
        journal.put(b"m".to_vec(), b"3".to_vec());

        let keys: Vec<_> = journal.sorted_writes().into_iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"m".to_vec(), b"z".to_vec()]);
    }
}
