//! JSON file standing in for browser local storage

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use termhub_terminal::{KeyValueStore, StorageError};

/// Flat JSON object on disk, rewritten on every `set`
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl FileStore {
    /// Open `path`, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Map::new(),
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(values)) => values,
                Ok(_) => {
                    return Err(StorageError::Corrupt(format!(
                        "{} does not hold a JSON object",
                        path.display()
                    )))
                }
                Err(e) => return Err(StorageError::Corrupt(e.to_string())),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
            }
        }
        let text = serde_json::to_string_pretty(&self.values)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        std::fs::write(&self.path, text).map_err(|e| StorageError::Io(e.to_string()))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.get(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values
            .insert(key.to_string(), Value::String(value.to_string()));
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("layout.json");

        let mut store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("term.height").unwrap(), None);
        store.set("term.height", "320").unwrap();
        store.set("term.show", "true").unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("term.height").unwrap().as_deref(), Some("320"));
        assert_eq!(reopened.get("term.show").unwrap().as_deref(), Some("true"));
    }

    #[test]
    fn test_non_string_values_are_stringified() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");
        std::fs::write(&path, r#"{"term.btn.pos": 240}"#).unwrap();
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("term.btn.pos").unwrap().as_deref(), Some("240"));
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            FileStore::open(&path),
            Err(StorageError::Corrupt(_))
        ));
    }
}
