//! # edgequake-doc2pdf
//!
//! Convert office documents held in object storage to PDF, and keep a
//! status record per conversion in a document database.
//!
//! ## Why this crate?
//!
//! Converting a `.docx` is the easy part: LibreOffice does it. The hard part
//! is everything around it when the conversion runs as a service. The source
//! lives in a bucket, the result must go back to one, the caller wants a
//! time-limited link, and a failure at any step must leave a readable
//! `error` record behind instead of a half-converted file on disk. This crate
//! is that surrounding pipeline, with every external system behind a trait so
//! it can be tested without a cloud account.
//!
//! ## Pipeline Overview
//!
//! ```text
//! {docId, fileName, filePath}
//!  │
//!  ├─ 0. Validate   allowed extension, strip gs://bucket/, basename
//!  ├─ 1. Download   object store → ./work/downloads/{ns}_{fileName}
//!  ├─ 2. Convert    LibreOffice in a scratch dir, atomic rename
//!  ├─ 3. Upload     → converted-files/{docId}/{name}.pdf
//!  ├─ 4. Sign       time-limited GET URL (default 5 minutes)
//!  └─ 5. Record     status = completed | error   (cleanup always runs)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doc2pdf::{
//!     ConversionPipeline, ConversionRequest, LibreOfficeEngine, MemoryDocumentStore,
//!     MemoryObjectStore, ServiceConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let objects = MemoryObjectStore::new();
//!     objects.insert("uploads/report.docx", std::fs::read("report.docx")?);
//!
//!     let config = ServiceConfig::default();
//!     let pipeline = ConversionPipeline::new(
//!         &config,
//!         Arc::new(objects),
//!         Arc::new(MemoryDocumentStore::new()),
//!         Arc::new(LibreOfficeEngine::default()),
//!     )
//!     .await?;
//!
//!     let request = ConversionRequest::new("doc-1", "report.docx", "gs://bucket/uploads/report.docx")?;
//!     let done = pipeline.run(&request).await?;
//!     println!("{}", done.pdf_url);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2pdf` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-doc2pdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod breaker;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gcp;
pub mod pipeline;
pub mod progress;
pub mod request;
pub mod server;
pub mod status;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use convert::{CompletedConversion, ConversionPipeline};
pub use dispatch::Dispatcher;
pub use engine::{ConversionEngine, LibreOfficeEngine};
pub use error::{Doc2PdfError, PipelineError, PipelineStage};
pub use gcp::TokenSource;
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use request::{ConversionRequest, ConversionRequestBody};
pub use server::AppState;
pub use status::{
    ConversionStatus, DocumentStore, FirestoreDocumentStore, MemoryDocumentStore, StatusRecord,
    StatusUpdate,
};
pub use storage::{
    GcsObjectStore, LocalObjectStore, MemoryObjectStore, ObjectMeta, ObjectStore, StorageError,
};
