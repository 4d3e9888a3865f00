//! Status recorder.
//!
//! Status writes are observability, not a correctness gate: a database
//! hiccup while recording an error must not replace the error being
//! recorded. [`StatusRecorder::update`] therefore logs and swallows.
//! The one write whose failure the pipeline has to see, the final
//! `completed`, goes through [`StatusRecorder::try_update`].

use crate::error::Doc2PdfError;
use crate::status::{DocumentStore, StatusRecord, StatusUpdate};
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Clone)]
pub struct StatusRecorder {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl StatusRecorder {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Merge `update` into the record for `doc_id`; failures are logged only.
    pub async fn update(&self, doc_id: &str, update: StatusUpdate) {
        if let Err(e) = self.try_update(doc_id, update).await {
            error!("{}", e);
        }
    }

    /// Merge `update` into the record for `doc_id`.
    pub async fn try_update(&self, doc_id: &str, update: StatusUpdate) -> Result<(), Doc2PdfError> {
        self.store
            .merge(&self.collection, doc_id, &update)
            .await
            .map_err(|e| Doc2PdfError::StatusWrite {
                doc_id: doc_id.to_string(),
                reason: e.to_string(),
            })?;
        debug!("Status of '{}' is now {}", doc_id, update.status().as_str());
        Ok(())
    }

    /// Current record for `doc_id`, if any.
    pub async fn get(&self, doc_id: &str) -> Result<Option<StatusRecord>, Doc2PdfError> {
        self.store
            .get(&self.collection, doc_id)
            .await
            .map_err(|e| Doc2PdfError::Internal(format!("status lookup for '{doc_id}': {e}")))
    }
}
