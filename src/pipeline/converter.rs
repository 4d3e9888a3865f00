//! PDF converter: runs the engine without ever exposing a partial PDF.
//!
//! ## Why a scratch directory?
//!
//! LibreOffice writes its output in place and may leave a truncated file
//! behind when it crashes half-way. The engine therefore runs inside a
//! fresh scratch directory next to the target; only after it reports
//! success is the produced file renamed onto the target path. Same
//! directory, same filesystem, so the rename is atomic. The scratch
//! directory (and whatever the engine left in it) is removed when the
//! `TempDir` drops, on success and failure alike.

use crate::engine::ConversionEngine;
use crate::error::Doc2PdfError;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Clone)]
pub struct PdfConverter {
    engine: Arc<dyn ConversionEngine>,
    timeout: Duration,
}

impl PdfConverter {
    pub fn new(engine: Arc<dyn ConversionEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    /// Produce a PDF at `target` from the file at `source`.
    ///
    /// `file_name` is the user-facing name used in error messages. Sources
    /// that are already PDFs are copied through without invoking the engine.
    ///
    /// # Errors
    /// [`Doc2PdfError::Conversion`] with the engine's diagnostic on engine
    /// failure, timeout or when the result cannot be moved into place.
    pub async fn convert(
        &self,
        source: &Path,
        target: &Path,
        file_name: &str,
    ) -> Result<(), Doc2PdfError> {
        let failed = |diagnostic: String| Doc2PdfError::Conversion {
            file_name: file_name.to_string(),
            diagnostic,
        };

        let parent = target
            .parent()
            .ok_or_else(|| failed(format!("target {} has no parent", target.display())))?;
        let scratch = tempfile::Builder::new()
            .prefix(".scratch-")
            .tempdir_in(parent)
            .map_err(|e| failed(format!("cannot create scratch directory: {e}")))?;

        let start = Instant::now();
        let produced = if is_pdf(source) {
            debug!("{} is already a PDF, passing through", source.display());
            let staged = scratch.path().join("passthrough.pdf");
            tokio::fs::copy(source, &staged)
                .await
                .map_err(|e| failed(format!("cannot stage source: {e}")))?;
            staged
        } else {
            tokio::time::timeout(self.timeout, self.engine.convert(source, scratch.path()))
                .await
                .map_err(|_| {
                    failed(format!(
                        "engine timed out after {}s",
                        self.timeout.as_secs()
                    ))
                })?
                .map_err(failed)?
        };

        tokio::fs::rename(&produced, target)
            .await
            .map_err(|e| failed(format!("cannot move result into place: {e}")))?;

        info!(
            "Converted {} → {} in {}ms",
            source.display(),
            target.display(),
            start.elapsed().as_millis()
        );
        Ok(())
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "pdf")
}
