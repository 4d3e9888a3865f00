use super::{ConversionStatus, DocumentStore, StatusRecord, StatusStoreError, StatusUpdate};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// In-process document store.
///
/// Besides the current records it keeps the ordered log of every write, which
/// is what tests use to count terminal updates per document.
#[derive(Debug, Default, Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<(String, String), StatusRecord>,
    writes: Vec<(String, StatusUpdate)>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every update written for `doc_id`, oldest first, across collections.
    pub fn writes_for(&self, doc_id: &str) -> Vec<StatusUpdate> {
        self.inner
            .read()
            .map(|i| {
                i.writes
                    .iter()
                    .filter(|(d, _)| d == doc_id)
                    .map(|(_, u)| u.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of writes carrying a terminal status for `doc_id`.
    pub fn terminal_writes(&self, doc_id: &str) -> usize {
        self.writes_for(doc_id)
            .iter()
            .filter(|u| u.status().is_terminal())
            .count()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn merge(
        &self,
        collection: &str,
        doc_id: &str,
        update: &StatusUpdate,
    ) -> Result<(), StatusStoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StatusStoreError::Backend("lock poisoned".into()))?;

        let record = inner
            .records
            .entry((collection.to_string(), doc_id.to_string()))
            .or_insert_with(|| StatusRecord {
                doc_id: doc_id.to_string(),
                status: ConversionStatus::Processing,
                pdf_url: None,
                error_message: None,
                updated_at: None,
            });
        record.apply(update, Utc::now());
        inner.writes.push((doc_id.to_string(), update.clone()));
        Ok(())
    }

    async fn get(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> Result<Option<StatusRecord>, StatusStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StatusStoreError::Backend("lock poisoned".into()))?;
        Ok(inner
            .records
            .get(&(collection.to_string(), doc_id.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn merge_creates_then_overwrites() {
        let store = MemoryDocumentStore::new();
        store
            .merge("conversions", "d1", &StatusUpdate::error("first"))
            .await
            .unwrap();
        store
            .merge("conversions", "d1", &StatusUpdate::completed("https://u"))
            .await
            .unwrap();

        let rec = store.get("conversions", "d1").await.unwrap().unwrap();
        assert_eq!(rec.status, ConversionStatus::Completed);
        assert_eq!(rec.pdf_url.as_deref(), Some("https://u"));
        assert!(rec.error_message.is_none());
        assert!(rec.updated_at.is_some());

        assert_eq!(store.writes_for("d1").len(), 2);
        assert_eq!(store.terminal_writes("d1"), 2);
        assert!(store.get("other", "d1").await.unwrap().is_none());
    }
}
