//! Components the conversion pipeline is sequenced from.
//!
//! Each submodule wraps exactly one collaborator. Keeping them apart makes
//! each one testable on its own and keeps backend details (which store,
//! which engine) out of the orchestrator in [`crate::convert`].
//!
//! ## Data Flow
//!
//! ```text
//! gateway ──▶ converter ──▶ gateway ──▶ gateway ──▶ recorder
//! (download)  (engine)      (upload)    (sign URL)  (completed | error)
//!                  workspace: paths in, cleanup out
//! ```
//!
//! 1. [`workspace`]: per-run local paths namespaced by `docId`, and the
//!    guard that removes them on every exit path
//! 2. [`gateway`]: object-store transfers and signed URLs, with store
//!    errors mapped onto [`crate::Doc2PdfError`]
//! 3. [`converter`]: drives the [`crate::engine::ConversionEngine`] in a
//!    scratch directory so a failed run never leaves a partial PDF behind
//! 4. [`recorder`]: status writes; failures are logged, not raised

pub mod converter;
pub mod gateway;
pub mod recorder;
pub mod workspace;
