//! Conversion status records and the document stores that hold them.
//!
//! A status record lives in a collection (default `conversions`) under the
//! request's `docId`. Writes are merges: `status` and `updatedAt` always
//! change, and exactly one of `pdfUrl` / `errorMessage` is set while the
//! other is cleared, so the two can never coexist on a record.

mod firestore;
mod memory;

pub use firestore::FirestoreDocumentStore;
pub use memory::MemoryDocumentStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of one conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Processing,
    Completed,
    Error,
}

impl ConversionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionStatus::Processing => "processing",
            ConversionStatus::Completed => "completed",
            ConversionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConversionStatus::Processing)
    }
}

impl std::str::FromStr for ConversionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(ConversionStatus::Processing),
            "completed" => Ok(ConversionStatus::Completed),
            "error" => Ok(ConversionStatus::Error),
            other => Err(format!("unknown conversion status '{other}'")),
        }
    }
}

/// One status write. The variant decides both the status and which detail
/// field is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Processing,
    Completed { pdf_url: String },
    Error { message: String },
}

impl StatusUpdate {
    pub fn completed(pdf_url: impl Into<String>) -> Self {
        StatusUpdate::Completed {
            pdf_url: pdf_url.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StatusUpdate::Error {
            message: message.into(),
        }
    }

    pub fn status(&self) -> ConversionStatus {
        match self {
            StatusUpdate::Processing => ConversionStatus::Processing,
            StatusUpdate::Completed { .. } => ConversionStatus::Completed,
            StatusUpdate::Error { .. } => ConversionStatus::Error,
        }
    }

    pub fn pdf_url(&self) -> Option<&str> {
        match self {
            StatusUpdate::Completed { pdf_url } => Some(pdf_url),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            StatusUpdate::Error { message } => Some(message),
            _ => None,
        }
    }
}

/// A status record as read back from a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub doc_id: String,
    pub status: ConversionStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StatusRecord {
    /// Apply a merge write to this record, stamping `updated_at`.
    pub fn apply(&mut self, update: &StatusUpdate, now: DateTime<Utc>) {
        self.status = update.status();
        self.pdf_url = update.pdf_url().map(str::to_string);
        self.error_message = update.error_message().map(str::to_string);
        self.updated_at = Some(now);
    }
}

#[derive(Debug, Error)]
pub enum StatusStoreError {
    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error("{0}")]
    Backend(String),
}

/// Document database contract used by the status recorder.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Merge `update` into `collection/doc_id`, creating the record if needed.
    /// `updatedAt` is assigned by the store.
    async fn merge(
        &self,
        collection: &str,
        doc_id: &str,
        update: &StatusUpdate,
    ) -> Result<(), StatusStoreError>;

    /// Read `collection/doc_id`, `None` when it doesn't exist.
    async fn get(&self, collection: &str, doc_id: &str)
        -> Result<Option<StatusRecord>, StatusStoreError>;
}
