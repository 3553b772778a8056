//! Small string key/value persistence used for layout state

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage i/o failed: {0}")]
    Io(String),
    #[error("storage is corrupt: {0}")]
    Corrupt(String),
}

/// Persistent storage collaborator
///
/// Failures are reported but callers treat them as non-fatal: a layout value
/// that cannot be read falls back to its default, one that cannot be written
/// is simply not remembered.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Volatile store, used when no storage path is configured
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Read and parse a value, logging and discarding anything unusable
pub(crate) fn load<T: std::str::FromStr>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    match store.get(key) {
        Ok(Some(raw)) => match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("Ignoring unparsable value {:?} for {}", raw, key);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            log::warn!("Failed to read {}: {}", key, e);
            None
        }
    }
}

pub(crate) fn save(store: &mut dyn KeyValueStore, key: &str, value: impl ToString) {
    if let Err(e) = store.set(key, &value.to_string()) {
        log::warn!("Failed to persist {}: {}", key, e);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Store whose every operation fails
    pub struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Io("disk on fire".to_string()))
        }

        fn set(&mut self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Io("disk on fire".to_string()))
        }
    }

    #[test]
    fn test_load_parses_and_tolerates_garbage() {
        let mut store = MemoryStore::default();
        save(&mut store, "n", 42);
        store.set("bad", "forty-two").unwrap();

        assert_eq!(load::<u32>(&store, "n"), Some(42));
        assert_eq!(load::<u32>(&store, "bad"), None);
        assert_eq!(load::<u32>(&store, "missing"), None);
    }

    #[test]
    fn test_broken_store_is_not_fatal() {
        let mut store = BrokenStore;
        save(&mut store, "n", 1);
        assert_eq!(load::<u32>(&store, "n"), None);
    }
}
