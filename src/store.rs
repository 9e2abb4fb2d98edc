//! Durable document storage.
//!
//! Every component keeps its state as one JSON document addressed by a key.
//! [`JsonFileStore`] maps a key to `<root>/<key>.json` and replaces files
//! atomically (temp file in the same directory, then rename), so a crash in
//! the middle of a write leaves the previous document intact.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tracing::debug;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns `None` when no document has been written under `key` yet.
    async fn read(&self, key: &str) -> StorageResult<Option<Value>>;

    async fn write(&self, key: &str, doc: &Value) -> StorageResult<()>;
}

/// Reads `key` and decodes it into `T`.
pub async fn load<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match store.read(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StorageError::Deserialize {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encodes `doc` and writes it under `key`.
pub async fn save<T: Serialize + ?Sized>(
    store: &dyn DocumentStore,
    key: &str,
    doc: &T,
) -> StorageResult<()> {
    let value = serde_json::to_value(doc).map_err(|source| StorageError::Serialize {
        key: key.to_string(),
        source,
    })?;
    store.write(key, &value).await
}

pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn read(&self, key: &str) -> StorageResult<Option<Value>> {
        let path = self.path_for(key);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::io(path, err)),
        };

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StorageError::Deserialize {
                key: key.to_string(),
                source,
            })
    }

    async fn write(&self, key: &str, doc: &Value) -> StorageResult<()> {
        let path = self.path_for(key);
        let mut bytes = serde_json::to_vec_pretty(doc).map_err(|source| StorageError::Serialize {
            key: key.to_string(),
            source,
        })?;
        bytes.push(b'\n');

        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| StorageError::io(&parent, e))?;

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&parent, &target, &bytes))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))??;

        debug!(key, path = %path.display(), "Wrote document");
        Ok(())
    }
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> StorageResult<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StorageError::io(dir, e))?;
    tmp.write_all(bytes)
        .map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.persist(target)
        .map_err(|e| StorageError::io(target, e.error))?;
    Ok(())
}

/// Process-local store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(&self, key: &str) -> StorageResult<Option<Value>> {
        let guard = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.get(key).cloned())
    }

    async fn write(&self, key: &str, doc: &Value) -> StorageResult<()> {
        let mut guard = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(key.to_string(), doc.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_document_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.read("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("logs"));

        store.write("queue", &json!({"a": 1})).await.unwrap();

        assert!(store.path_for("queue").exists());
        assert_eq!(store.read("queue").await.unwrap(), Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn overwrite_replaces_whole_document_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());

        store.write("doc", &json!({"items": [1, 2, 3]})).await.unwrap();
        store.write("doc", &json!({"items": []})).await.unwrap();

        assert_eq!(store.read("doc").await.unwrap(), Some(json!({"items": []})));
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn written_json_is_pretty_printed() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.write("doc", &json!({"a": {"b": 1}})).await.unwrap();

        let text = std::fs::read_to_string(store.path_for("doc")).unwrap();
        assert!(text.contains("\n  \"a\""));
    }

    #[tokio::test]
    async fn corrupt_document_is_a_deserialize_error() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        std::fs::write(store.path_for("broken"), "{not json").unwrap();

        let err = store.read("broken").await.unwrap_err();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn typed_helpers_round_trip_through_memory_store() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Counter {
            value: u32,
        }

        let store = MemoryStore::new();
        save(&store, "counter", &Counter { value: 7 }).await.unwrap();
        let loaded: Option<Counter> = load(&store, "counter").await.unwrap();
        assert_eq!(loaded, Some(Counter { value: 7 }));
    }
}
