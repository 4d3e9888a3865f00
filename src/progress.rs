//! Progress-callback trait for per-run pipeline events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::ConversionPipeline::with_progress`] to observe runs as they move
//! through their stages.
//!
//! # Why callbacks instead of channels?
//!
//! The HTTP trigger answers before a run starts, so the persisted status
//! record is the only outcome it needs. A foreground caller such as the CLI
//! wants more: which stage is running right now. A callback lets it drive a
//! spinner without the library knowing anything about terminals. The trait
//! is `Send + Sync` because runs execute concurrently on the runtime.
//!
//! # Example
//!
//! ```rust
//! use edgequake_doc2pdf::{ConversionProgressCallback, PipelineStage};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct StageLog(Mutex<Vec<PipelineStage>>);
//!
//! impl ConversionProgressCallback for StageLog {
//!     fn on_stage_start(&self, _doc_id: &str, stage: PipelineStage) {
//!         if let Ok(mut log) = self.0.lock() {
//!             log.push(stage);
//!         }
//!     }
//! }
//!
//! let cb: Arc<dyn ConversionProgressCallback> = Arc::new(StageLog::default());
//! cb.on_stage_start("doc-1", PipelineStage::Downloading);
//! ```

use crate::error::PipelineStage;
use std::sync::Arc;

/// Called by the pipeline as a run progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Calls for different `doc_id`s may arrive
/// concurrently from different threads.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before the first stage.
    fn on_run_start(&self, doc_id: &str) {
        let _ = doc_id;
    }

    /// Called as each stage begins.
    fn on_stage_start(&self, doc_id: &str, stage: PipelineStage) {
        let _ = (doc_id, stage);
    }

    /// Called after the `completed` status has been written.
    fn on_run_complete(&self, doc_id: &str, pdf_url: &str) {
        let _ = (doc_id, pdf_url);
    }

    /// Called after the `error` status has been written.
    ///
    /// * `stage`: the stage that failed
    /// * `message`: the recorded `errorMessage`
    fn on_run_error(&self, doc_id: &str, stage: PipelineStage, message: &str) {
        let _ = (doc_id, stage, message);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type held by the pipeline.
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
