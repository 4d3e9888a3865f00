//! Error types for the edgequake-doc2pdf library.
//!
//! Two distinct error types reflect two distinct audiences:
//!
//! * [`Doc2PdfError`] is what a component reports, e.g. a storage transfer
//!   broke or the engine exited non-zero. These carry full
//!   diagnostic detail and are what gets logged and persisted as the
//!   `errorMessage` of a failed conversion.
//!
//! * [`PipelineError`] is what the caller of a pipeline run sees: the stage
//!   that failed plus a short, client-safe `detail` string. The original
//!   [`Doc2PdfError`] stays reachable through [`std::error::Error::source`].

use std::path::PathBuf;
use thiserror::Error;

/// All errors raised by the components of a conversion run.
#[derive(Debug, Error)]
pub enum Doc2PdfError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The request did not pass validation. Raised before any I/O.
    #[error("Invalid request: {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// The source object does not exist in the object store.
    #[error("File '{file_name}' not found in object storage.")]
    NotFound { file_name: String },

    /// Download or upload failed.
    #[error("Failed to {direction} file '{file_name}': {reason}")]
    Transfer {
        direction: TransferDirection,
        file_name: String,
        reason: String,
    },

    /// A signed URL could not be produced.
    #[error("Failed to sign download URL for '{key}': {reason}")]
    Signing { key: String, reason: String },

    // ── Engine errors ─────────────────────────────────────────────────────
    /// The conversion engine failed; `diagnostic` is the engine's own output.
    #[error("Failed to convert file '{file_name}' to PDF: {diagnostic}")]
    Conversion {
        file_name: String,
        diagnostic: String,
    },

    // ── Status errors ─────────────────────────────────────────────────────
    /// The document store rejected a status write.
    #[error("Failed to update status for doc ID '{doc_id}': {reason}")]
    StatusWrite { doc_id: String, reason: String },

    // ── Setup errors ──────────────────────────────────────────────────────
    /// Could not prepare a local working directory.
    #[error("Failed to prepare workspace directory '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Doc2PdfError {
    /// Shorthand for a download failure.
    pub fn download(file_name: impl Into<String>, reason: impl ToString) -> Self {
        Doc2PdfError::Transfer {
            direction: TransferDirection::Download,
            file_name: file_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for an upload failure.
    pub fn upload(file_name: impl Into<String>, reason: impl ToString) -> Self {
        Doc2PdfError::Transfer {
            direction: TransferDirection::Upload,
            file_name: file_name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Which way a failed transfer was going.
///
/// Uploads only ever carry converted PDFs, and the message says so.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Download,
    Upload,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferDirection::Download => f.write_str("download"),
            TransferDirection::Upload => f.write_str("upload converted"),
        }
    }
}

/// The stage a pipeline run was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Downloading,
    Converting,
    Uploading,
    Signing,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineStage::Downloading => "downloading",
            PipelineStage::Converting => "converting",
            PipelineStage::Uploading => "uploading",
            PipelineStage::Signing => "signing",
        };
        f.write_str(s)
    }
}

/// A failed pipeline run, as seen by whoever triggered it.
///
/// The `error` status has already been persisted (best effort) by the time
/// this value exists.
#[derive(Debug, Error)]
#[error("{detail}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    /// Short, client-safe description naming the affected file.
    pub detail: String,
    #[source]
    pub source: Doc2PdfError,
}

impl PipelineError {
    /// HTTP status code a synchronous trigger should answer with.
    ///
    /// A missing source object is the caller's problem (404); anything else
    /// is ours (500).
    pub fn status_code(&self) -> u16 {
        match self.source {
            Doc2PdfError::NotFound { .. } => 404,
            Doc2PdfError::Validation { .. } => 400,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_mentions_file_name() {
        let e = Doc2PdfError::NotFound {
            file_name: "report.docx".into(),
        };
        assert_eq!(
            e.to_string(),
            "File 'report.docx' not found in object storage."
        );
    }

    #[test]
    fn conversion_display_carries_diagnostic() {
        let e = Doc2PdfError::Conversion {
            file_name: "test.docx".into(),
            diagnostic: "Conversion error".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Failed to convert file 'test.docx'"), "got: {msg}");
        assert!(msg.ends_with("Conversion error"), "got: {msg}");
    }

    #[test]
    fn transfer_display_names_direction() {
        let e = Doc2PdfError::upload("test.pdf", "connection reset");
        assert_eq!(
            e.to_string(),
            "Failed to upload converted file 'test.pdf': connection reset"
        );
    }

    #[test]
    fn pipeline_error_status_codes() {
        let missing = PipelineError {
            stage: PipelineStage::Downloading,
            detail: "File 'a.docx' not found in object storage.".into(),
            source: Doc2PdfError::NotFound {
                file_name: "a.docx".into(),
            },
        };
        assert_eq!(missing.status_code(), 404);

        let engine = PipelineError {
            stage: PipelineStage::Converting,
            detail: "Failed to convert file 'a.docx' to PDF".into(),
            source: Doc2PdfError::Conversion {
                file_name: "a.docx".into(),
                diagnostic: "exit 1".into(),
            },
        };
        assert_eq!(engine.status_code(), 500);
        assert_eq!(engine.to_string(), "Failed to convert file 'a.docx' to PDF");
    }
}
