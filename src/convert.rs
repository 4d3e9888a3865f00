//! The conversion pipeline: one request, four stages, one terminal status.
//!
//! ## Why record before returning?
//!
//! Whoever triggered a run may learn about a failure (an HTTP 500, a CLI exit
//! code) and go look at the status record. That record must already say
//! `error` by then, so every failure path writes the status first and only
//! then hands the error back. The write itself is best effort: if the
//! database is down the original error still wins.
//!
//! ```text
//! START ─▶ DOWNLOADING ─▶ CONVERTING ─▶ UPLOADING ─▶ SIGNING ─▶ COMPLETED
//!               │              │             │           │
//!               └──────────── any failure ─▶ ERROR ◀─────┘
//! ```
//!
//! Local artifacts are removed after the terminal status is written, on
//! every exit path, exactly once.

use crate::config::ServiceConfig;
use crate::engine::ConversionEngine;
use crate::error::{Doc2PdfError, PipelineError, PipelineStage};
use crate::pipeline::converter::PdfConverter;
use crate::pipeline::gateway::StorageGateway;
use crate::pipeline::recorder::StatusRecorder;
use crate::pipeline::workspace::{LocalArtifacts, Workspace};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::request::ConversionRequest;
use crate::status::{DocumentStore, StatusUpdate};
use crate::storage::{ObjectMeta, ObjectStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, Instrument};

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct CompletedConversion {
    pub doc_id: String,
    /// Signed URL recorded as `pdfUrl`.
    pub pdf_url: String,
    /// The uploaded PDF.
    pub object: ObjectMeta,
    pub duration_ms: u64,
}

/// A stage failure on its way out of a run: the message that gets
/// persisted and the error the caller gets back.
struct StageFailure {
    recorded: String,
    error: PipelineError,
}

impl StageFailure {
    fn new(stage: PipelineStage, detail: String, source: Doc2PdfError) -> Self {
        Self {
            recorded: source.to_string(),
            error: PipelineError {
                stage,
                detail,
                source,
            },
        }
    }
}

/// Sequences gateway, converter and recorder for one request at a time.
///
/// Cheap to share: wrap it in an `Arc` and call [`run`](Self::run) from as
/// many tasks as needed. Runs share nothing but the injected backends.
pub struct ConversionPipeline {
    gateway: StorageGateway,
    converter: PdfConverter,
    recorder: StatusRecorder,
    workspace: Workspace,
    signed_url_ttl: Duration,
    progress: ProgressCallback,
}

impl ConversionPipeline {
    /// Wire a pipeline from its backends and create the working directories.
    pub async fn new(
        config: &ServiceConfig,
        objects: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentStore>,
        engine: Arc<dyn ConversionEngine>,
    ) -> Result<Self, Doc2PdfError> {
        let workspace = Workspace::create(config).await?;
        info!(
            "Workspace ready: downloads={} converted={}",
            workspace.downloads_dir().display(),
            workspace.converted_dir().display()
        );
        Ok(Self {
            gateway: StorageGateway::new(objects, config.converted_prefix.clone()),
            converter: PdfConverter::new(engine, config.engine_timeout),
            recorder: StatusRecorder::new(documents, config.status_collection.clone()),
            workspace,
            signed_url_ttl: config.signed_url_ttl,
            progress: Arc::new(NoopProgressCallback),
        })
    }

    /// Receive stage events for every run of this pipeline.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// The recorder this pipeline writes through, for read-side callers.
    pub fn recorder(&self) -> &StatusRecorder {
        &self.recorder
    }

    /// Run one request to a terminal status.
    ///
    /// # Returns
    /// `Ok` once `completed` has been recorded with the signed URL.
    ///
    /// # Errors
    /// [`PipelineError`] once `error` has been recorded (best effort). Its
    /// `detail` is short and client-safe; the full diagnostic is in the
    /// persisted `errorMessage` and in `source`.
    pub async fn run(
        &self,
        request: &ConversionRequest,
    ) -> Result<CompletedConversion, PipelineError> {
        let span = info_span!("conversion", doc_id = %request.doc_id());
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(
        &self,
        request: &ConversionRequest,
    ) -> Result<CompletedConversion, PipelineError> {
        let start = Instant::now();
        let doc_id = request.doc_id();
        info!("Starting conversion of '{}'", request.object_key());
        self.progress.on_run_start(doc_id);

        // Registered before either file exists.
        let artifacts = self.workspace.allocate(request);

        let outcome = match self.run_stages(request, &artifacts, start).await {
            Ok(done) => {
                info!("Conversion completed in {}ms", done.duration_ms);
                self.progress.on_run_complete(doc_id, &done.pdf_url);
                Ok(done)
            }
            Err(failure) => {
                let stage = failure.error.stage;
                error!("Conversion failed while {}: {}", stage, failure.recorded);
                self.recorder
                    .update(doc_id, StatusUpdate::error(failure.recorded.clone()))
                    .await;
                self.progress.on_run_error(doc_id, stage, &failure.recorded);
                Err(failure.error)
            }
        };

        artifacts.cleanup().await;
        outcome
    }

    async fn run_stages(
        &self,
        request: &ConversionRequest,
        artifacts: &LocalArtifacts,
        start: Instant,
    ) -> Result<CompletedConversion, StageFailure> {
        let doc_id = request.doc_id();
        let file_name = request.file_name();
        let pdf_name = request.pdf_name();

        // ── Stage 1: Download ────────────────────────────────────────────
        self.stage(doc_id, PipelineStage::Downloading);
        self.gateway
            .download(request.object_key(), file_name, artifacts.source())
            .await
            .map_err(|e| {
                let detail = match &e {
                    Doc2PdfError::NotFound { .. } => e.to_string(),
                    _ => format!("Failed to download file '{file_name}'"),
                };
                StageFailure::new(PipelineStage::Downloading, detail, e)
            })?;

        // ── Stage 2: Convert ─────────────────────────────────────────────
        self.stage(doc_id, PipelineStage::Converting);
        self.converter
            .convert(artifacts.source(), artifacts.target(), file_name)
            .await
            .map_err(|e| {
                StageFailure::new(
                    PipelineStage::Converting,
                    format!("Failed to convert file '{file_name}' to PDF"),
                    e,
                )
            })?;

        // ── Stage 3: Upload ──────────────────────────────────────────────
        self.stage(doc_id, PipelineStage::Uploading);
        let object = self
            .gateway
            .upload(artifacts.target(), doc_id, &pdf_name)
            .await
            .map_err(|e| {
                StageFailure::new(
                    PipelineStage::Uploading,
                    format!("Failed to upload converted file '{pdf_name}'"),
                    e,
                )
            })?;

        // ── Stage 4: Sign and record ─────────────────────────────────────
        self.stage(doc_id, PipelineStage::Signing);
        let finish = |e: Doc2PdfError| {
            let detail = format!("Failed to complete the conversion process for doc ID '{doc_id}'");
            let mut failure = StageFailure::new(PipelineStage::Signing, detail.clone(), e);
            failure.recorded = format!("{detail}: {}", failure.recorded);
            failure
        };
        let pdf_url = self
            .gateway
            .sign_download_url(&object, self.signed_url_ttl)
            .await
            .map_err(finish)?;
        self.recorder
            .try_update(doc_id, StatusUpdate::completed(pdf_url.clone()))
            .await
            .map_err(finish)?;

        Ok(CompletedConversion {
            doc_id: doc_id.to_string(),
            pdf_url,
            object,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn stage(&self, doc_id: &str, stage: PipelineStage) {
        info!("Stage: {}", stage);
        self.progress.on_stage_start(doc_id, stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{ConversionStatus, MemoryDocumentStore};
    use crate::storage::MemoryObjectStore;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};

    struct EchoEngine;

    #[async_trait]
    impl ConversionEngine for EchoEngine {
        async fn convert(&self, source: &Path, out_dir: &Path) -> Result<PathBuf, String> {
            let out = out_dir.join("out.pdf");
            tokio::fs::copy(source, &out).await.map_err(|e| e.to_string())?;
            Ok(out)
        }
    }

    #[tokio::test]
    async fn successful_run_records_signed_url() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig::builder().work_dir(dir.path()).build().unwrap();
        let objects = MemoryObjectStore::new();
        objects.insert("uploads/a.docx", b"doc".to_vec());
        let documents = MemoryDocumentStore::new();

        let pipeline = ConversionPipeline::new(
            &config,
            Arc::new(objects),
            Arc::new(documents.clone()),
            Arc::new(EchoEngine),
        )
        .await
        .unwrap();

        let req = ConversionRequest::new("doc-7", "a.docx", "gs://bucket/uploads/a.docx").unwrap();
        let done = pipeline.run(&req).await.unwrap();
        assert_eq!(done.object.key, "converted-files/doc-7/a.pdf");

        let rec = pipeline.recorder().get("doc-7").await.unwrap().unwrap();
        assert_eq!(rec.status, ConversionStatus::Completed);
        assert_eq!(rec.pdf_url.as_deref(), Some(done.pdf_url.as_str()));
        assert_eq!(documents.terminal_writes("doc-7"), 1);
    }
}
