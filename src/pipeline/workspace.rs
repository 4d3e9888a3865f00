//! Local workspace: per-run file paths and their guaranteed removal.
//!
//! ## Why namespace by docId?
//!
//! Two concurrent requests for `report.docx` must not download over each
//! other. Paths are `{namespace}_{fileName}` where the namespace is a
//! filesystem-safe rendering of the `docId` plus a short hash of the raw
//! id, so ids that sanitise to the same string still get distinct paths.
//!
//! ## Why a guard?
//!
//! [`LocalArtifacts`] is created as soon as the paths are decided, before
//! either file exists. The orchestrator awaits [`LocalArtifacts::cleanup`]
//! when the run ends; if the run unwinds instead, `Drop` removes the files
//! synchronously. Either way cleanup happens exactly once, and deleting a
//! file that was never created is a no-op.

use crate::config::ServiceConfig;
use crate::error::Doc2PdfError;
use crate::request::ConversionRequest;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Longest sanitised `docId` kept in a path.
const MAX_NAMESPACE_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct Workspace {
    downloads_dir: PathBuf,
    converted_dir: PathBuf,
}

impl Workspace {
    /// Create both working directories (idempotent).
    pub async fn create(config: &ServiceConfig) -> Result<Self, Doc2PdfError> {
        for dir in [&config.downloads_dir, &config.converted_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Doc2PdfError::Workspace {
                    path: dir.clone(),
                    source: e,
                })?;
        }
        Ok(Self {
            downloads_dir: config.downloads_dir.clone(),
            converted_dir: config.converted_dir.clone(),
        })
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    pub fn converted_dir(&self) -> &Path {
        &self.converted_dir
    }

    /// Decide the two local paths for `request` and take ownership of them.
    pub fn allocate(&self, request: &ConversionRequest) -> LocalArtifacts {
        let ns = namespace(request.doc_id());
        let artifacts = LocalArtifacts {
            source: self
                .downloads_dir
                .join(format!("{ns}_{}", request.file_name())),
            target: self
                .converted_dir
                .join(format!("{ns}_{}", request.pdf_name())),
            cleaned: false,
        };
        debug!(
            "Local artifacts: {} / {}",
            artifacts.source.display(),
            artifacts.target.display()
        );
        artifacts
    }
}

/// `{sanitised docId}-{8 hex chars of sha256(docId)}`.
pub(crate) fn namespace(doc_id: &str) -> String {
    let safe: String = doc_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_NAMESPACE_LEN)
        .collect();
    let digest = Sha256::digest(doc_id.as_bytes());
    format!("{}-{}", safe, &hex::encode(digest)[..8])
}

/// The downloaded source and converted PDF of one run.
#[derive(Debug)]
pub struct LocalArtifacts {
    source: PathBuf,
    target: PathBuf,
    cleaned: bool,
}

impl LocalArtifacts {
    /// Where the downloaded source goes.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Where the converted PDF goes.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Remove both files.
    pub async fn cleanup(mut self) {
        self.cleaned = true;
        cleanup(&[&self.source, &self.target]).await;
    }
}

impl Drop for LocalArtifacts {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        for path in [&self.source, &self.target] {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

/// Delete each path if present. A failure is logged and the remaining
/// paths are still attempted.
pub async fn cleanup<P: AsRef<Path>>(paths: &[P]) {
    for path in paths {
        let path = path.as_ref();
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}
