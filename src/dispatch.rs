//! Fire-and-forget submission with a bound on concurrent runs.
//!
//! The trigger must answer as soon as a request validates, so runs are
//! spawned onto the runtime and their outcome is observable only through the
//! status record. A semaphore caps how many runs execute at once; a
//! submission beyond the cap is still accepted and its task waits for a
//! permit in the background.

use crate::convert::{CompletedConversion, ConversionPipeline};
use crate::error::PipelineError;
use crate::request::ConversionRequest;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handle returned by [`Dispatcher::submit`]. Dropping it detaches the run.
pub type RunHandle = JoinHandle<Result<CompletedConversion, PipelineError>>;

#[derive(Clone)]
pub struct Dispatcher {
    pipeline: Arc<ConversionPipeline>,
    permits: Arc<Semaphore>,
    max_runs: usize,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<ConversionPipeline>, max_concurrent_runs: usize) -> Self {
        let max_runs = max_concurrent_runs.max(1);
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(max_runs)),
            max_runs,
        }
    }

    pub fn pipeline(&self) -> &Arc<ConversionPipeline> {
        &self.pipeline
    }

    /// Runs currently holding a permit.
    pub fn running(&self) -> usize {
        self.max_runs - self.permits.available_permits()
    }

    /// Schedule a run and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, request: ConversionRequest) -> RunHandle {
        let pipeline = Arc::clone(&self.pipeline);
        let permits = Arc::clone(&self.permits);
        debug!("Queued conversion for '{}'", request.doc_id());

        tokio::spawn(async move {
            // The semaphore is never closed; run unthrottled if it ever is.
            let _permit = match permits.acquire_owned().await {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("Concurrency limiter unavailable: {}", e);
                    None
                }
            };
            pipeline.run(&request).await
        })
    }
}
