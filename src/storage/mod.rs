//! Object storage backends.
//!
//! [`ObjectStore`] is the narrow contract the storage gateway needs from a
//! bucket: an existence check, file-to-object and object-to-file transfers,
//! and time-limited signed GET URLs. Three implementations ship with the
//! crate:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`MemoryObjectStore`] | tests, demos |
//! | [`LocalObjectStore`]  | a directory acting as a bucket, HMAC-signed URLs served by the trigger |
//! | [`GcsObjectStore`]    | Google Cloud Storage, V4 signed URLs |

mod gcs;
mod local;
mod memory;

pub use gcs::GcsObjectStore;
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by an [`ObjectStore`].
///
/// The storage gateway maps these onto the pipeline's error taxonomy; the
/// backends themselves know nothing about file names or doc ids.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No object under this key.
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// Credentials are missing or were refused.
    #[error("credentials unavailable: {message}")]
    Credentials { message: String },

    /// Local file I/O failed.
    #[error("local I/O on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The backend answered with an error or could not be reached.
    #[error("{message}")]
    Backend { message: String },
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        StorageError::Backend {
            message: message.into(),
        }
    }
}

/// Metadata of a stored object. Doubles as the handle returned by uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object key inside the bucket.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Backend-specific version token (GCS generation, file mtime, counter).
    pub version: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage contract used by [`crate::pipeline::gateway::StorageGateway`].
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Metadata for `key`, or `None` when the object does not exist.
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StorageError>;

    /// Write the object at `key` to `local`, returning the bytes written.
    ///
    /// Returns [`StorageError::NotFound`] if the object doesn't exist.
    async fn download_to_file(&self, key: &str, local: &Path) -> Result<u64, StorageError>;

    /// Create or overwrite `key` with the contents of `local`.
    async fn upload_from_file(
        &self,
        local: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<ObjectMeta, StorageError>;

    /// A URL granting GET access to `key` for `ttl`.
    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}
