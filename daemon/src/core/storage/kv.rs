use crate::core::error::BlockchainError;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

// Seam to the delegated on-disk engine. The core never assumes
// anything about the backend beyond atomic single-key operations.
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BlockchainError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), BlockchainError>;

    fn delete(&self, key: &[u8]) -> Result<(), BlockchainError>;

    fn contains(&self, key: &[u8]) -> Result<bool, BlockchainError> {
        Ok(self.get(key)?.is_some())
    }
}

// In-memory backend used by the tests and the ephemeral dev mode
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BlockchainError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), BlockchainError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))?;
        entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), BlockchainError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

// Default persistent backend
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BlockchainError> {
        let db = sled::open(path).map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))?;
        Ok(Self { db })
    }

    // Volatile database, handy for integration tests
    pub fn temporary() -> Result<Self, BlockchainError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))?;
        Ok(Self { db })
    }

    pub fn flush(&self) -> Result<(), BlockchainError> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BlockchainError> {
        self.db
            .get(key)
            .map(|value| value.map(|ivec| ivec.to_vec()))
            .map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), BlockchainError> {
        self.db
            .insert(key, value)
            .map(|_| ())
            .map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))
    }

    fn delete(&self, key: &[u8]) -> Result<(), BlockchainError> {
        self.db
            .remove(key)
            .map(|_| ())
            .map_err(|e| BlockchainError::StoreUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get(b"missing").unwrap().is_none());

        store.put(b"key", b"value").unwrap();
        assert_eq!(store.get(b"key").unwrap().unwrap(), b"value");
        assert!(store.contains(b"key").unwrap());

        store.delete(b"key").unwrap();
        assert!(!store.contains(b"key").unwrap());
    }
}
