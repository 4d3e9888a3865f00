//! Storage gateway: the pipeline's view of the object store.
//!
//! Backends report [`StorageError`]s keyed by object key. The gateway turns
//! those into [`Doc2PdfError`]s that name the *file* the user asked about,
//! because that is what ends up in the persisted `errorMessage`.

use crate::error::Doc2PdfError;
use crate::storage::{ObjectMeta, ObjectStore, StorageError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Content type of every uploaded object.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Clone)]
pub struct StorageGateway {
    store: Arc<dyn ObjectStore>,
    converted_prefix: String,
}

impl StorageGateway {
    pub fn new(store: Arc<dyn ObjectStore>, converted_prefix: impl Into<String>) -> Self {
        Self {
            store,
            converted_prefix: converted_prefix.into(),
        }
    }

    /// Object key a converted PDF is uploaded under.
    ///
    /// The `docId` segment keeps two documents with the same file name from
    /// overwriting each other's output.
    pub fn converted_key(&self, doc_id: &str, pdf_name: &str) -> String {
        format!("{}{}/{}", self.converted_prefix, doc_id, pdf_name)
    }

    /// Download `object_key` to `local`.
    ///
    /// # Errors
    /// [`Doc2PdfError::NotFound`] when the object doesn't exist,
    /// [`Doc2PdfError::Transfer`] for anything else.
    pub async fn download(
        &self,
        object_key: &str,
        file_name: &str,
        local: &Path,
    ) -> Result<u64, Doc2PdfError> {
        let not_found = || Doc2PdfError::NotFound {
            file_name: file_name.to_string(),
        };

        match self.store.head(object_key).await {
            Ok(Some(meta)) => debug!("Source '{}' is {} bytes", object_key, meta.size),
            Ok(None) => return Err(not_found()),
            Err(e) => return Err(Doc2PdfError::download(file_name, e)),
        }

        let bytes = self
            .store
            .download_to_file(object_key, local)
            .await
            .map_err(|e| match e {
                // Deleted between head and download.
                StorageError::NotFound { .. } => not_found(),
                other => Doc2PdfError::download(file_name, other),
            })?;
        info!("Downloaded '{}' to {} ({} bytes)", object_key, local.display(), bytes);
        Ok(bytes)
    }

    /// Upload the converted PDF at `local` as `{prefix}{doc_id}/{pdf_name}`.
    pub async fn upload(
        &self,
        local: &Path,
        doc_id: &str,
        pdf_name: &str,
    ) -> Result<ObjectMeta, Doc2PdfError> {
        let key = self.converted_key(doc_id, pdf_name);
        let meta = self
            .store
            .upload_from_file(local, &key, PDF_CONTENT_TYPE)
            .await
            .map_err(|e| Doc2PdfError::upload(pdf_name, e))?;
        info!("Uploaded {} as '{}' ({} bytes)", local.display(), meta.key, meta.size);
        Ok(meta)
    }

    /// Mint a GET URL for `handle` that stays valid for `ttl`.
    pub async fn sign_download_url(
        &self,
        handle: &ObjectMeta,
        ttl: Duration,
    ) -> Result<String, Doc2PdfError> {
        self.store
            .signed_url(&handle.key, ttl)
            .await
            .map_err(|e| Doc2PdfError::Signing {
                key: handle.key.clone(),
                reason: e.to_string(),
            })
    }
}
