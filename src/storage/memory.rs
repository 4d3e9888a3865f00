use super::{ObjectMeta, ObjectStore, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// In-memory object store for tests and demos.
///
/// Thread-safe via `RwLock`. Versions are a per-key write counter.
#[derive(Debug, Default, Clone)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
    version: u64,
    last_modified: DateTime<Utc>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, bypassing the file-based API.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.write() {
            let key = key.into();
            let version = objects.get(&key).map_or(1, |o| o.version + 1);
            objects.insert(
                key,
                StoredObject {
                    data: data.into(),
                    content_type: "application/octet-stream".into(),
                    version,
                    last_modified: Utc::now(),
                },
            );
        }
    }

    /// Contents of `key`, if present.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().ok()?.get(key).map(|o| o.data.clone())
    }

    /// Content type recorded for `key`, if present.
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .ok()?
            .get(key)
            .map(|o| o.content_type.clone())
    }

    /// All keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn poisoned() -> StorageError {
        StorageError::backend("lock poisoned")
    }
}

fn meta(key: &str, obj: &StoredObject) -> ObjectMeta {
    ObjectMeta {
        key: key.to_string(),
        size: obj.data.len() as u64,
        version: Some(obj.version.to_string()),
        last_modified: Some(obj.last_modified),
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StorageError> {
        let objects = self.objects.read().map_err(|_| Self::poisoned())?;
        Ok(objects.get(key).map(|o| meta(key, o)))
    }

    async fn download_to_file(&self, key: &str, local: &Path) -> Result<u64, StorageError> {
        let data = self
            .get(key)
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })?;
        tokio::fs::write(local, &data)
            .await
            .map_err(|e| StorageError::io(local, e))?;
        Ok(data.len() as u64)
    }

    async fn upload_from_file(
        &self,
        local: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<ObjectMeta, StorageError> {
        let data = tokio::fs::read(local)
            .await
            .map_err(|e| StorageError::io(local, e))?;

        let mut objects = self.objects.write().map_err(|_| Self::poisoned())?;
        let version = objects.get(key).map_or(1, |o| o.version + 1);
        let stored = StoredObject {
            data,
            content_type: content_type.to_string(),
            version,
            last_modified: Utc::now(),
        };
        let m = meta(key, &stored);
        objects.insert(key.to_string(), stored);
        Ok(m)
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        Ok(format!(
            "memory://localhost/{key}?expires={}&signature=mock",
            ttl.as_secs()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn download_missing_is_not_found() {
        let store = MemoryObjectStore::new();
        let dir = TempDir::new().unwrap();
        let err = store
            .download_to_file("nope.docx", &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn upload_then_head_reports_size_and_version() {
        let store = MemoryObjectStore::new();
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("a.pdf");
        std::fs::write(&local, b"%PDF-1.7").unwrap();

        let first = store
            .upload_from_file(&local, "converted-files/a.pdf", "application/pdf")
            .await
            .unwrap();
        assert_eq!(first.size, 8);
        assert_eq!(first.version.as_deref(), Some("1"));

        let second = store
            .upload_from_file(&local, "converted-files/a.pdf", "application/pdf")
            .await
            .unwrap();
        assert_eq!(second.version.as_deref(), Some("2"));

        let head = store.head("converted-files/a.pdf").await.unwrap().unwrap();
        assert_eq!(head, second);
        assert_eq!(
            store.content_type("converted-files/a.pdf").as_deref(),
            Some("application/pdf")
        );
    }

    #[tokio::test]
    async fn download_writes_seeded_bytes() {
        let store = MemoryObjectStore::new();
        store.insert("uploads/a.txt", b"hello".to_vec());
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("a.txt");

        let n = store.download_to_file("uploads/a.txt", &local).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(std::fs::read(&local).unwrap(), b"hello");
    }
}
