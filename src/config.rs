//! Configuration for the conversion service.
//!
//! Everything the pipeline needs to know that is not part of a single request
//! lives in [`ServiceConfig`], built through [`ServiceConfigBuilder`]. Backend
//! clients (object store, document store, engine) are *not* part of the config;
//! they are constructed once at startup and injected into
//! [`crate::ConversionPipeline`] so tests can swap them out.

use crate::error::Doc2PdfError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default object key prefix for converted PDFs.
pub const DEFAULT_CONVERTED_PREFIX: &str = "converted-files/";

/// Default document-store collection holding conversion status records.
pub const DEFAULT_STATUS_COLLECTION: &str = "conversions";

/// Service-wide settings shared by every pipeline run.
///
/// # Example
/// ```rust
/// use edgequake_doc2pdf::ServiceConfig;
/// use std::time::Duration;
///
/// let config = ServiceConfig::builder()
///     .work_dir("/var/lib/doc2pdf")
///     .signed_url_ttl(Duration::from_secs(600))
///     .max_concurrent_runs(8)
///     .build()
///     .unwrap();
/// assert_eq!(config.converted_prefix, "converted-files/");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Directory receiving downloaded source files. Default: `./work/downloads`.
    pub downloads_dir: PathBuf,

    /// Directory receiving converted PDFs before upload. Default: `./work/converted`.
    pub converted_dir: PathBuf,

    /// Object key prefix for uploaded PDFs. Default: `converted-files/`.
    pub converted_prefix: String,

    /// Lifetime of the signed download URL. Default: 5 minutes.
    pub signed_url_ttl: Duration,

    /// Upper bound on pipeline runs executing at the same time. Default: 4.
    ///
    /// Submissions beyond this wait for a permit in the background; the
    /// trigger still answers immediately.
    pub max_concurrent_runs: usize,

    /// Kill the conversion engine after this long. Default: 120 s.
    pub engine_timeout: Duration,

    /// Collection name in the document store. Default: `conversions`.
    pub status_collection: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from("work/downloads"),
            converted_dir: PathBuf::from("work/converted"),
            converted_prefix: DEFAULT_CONVERTED_PREFIX.to_string(),
            signed_url_ttl: Duration::from_secs(5 * 60),
            max_concurrent_runs: 4,
            engine_timeout: Duration::from_secs(120),
            status_collection: DEFAULT_STATUS_COLLECTION.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    /// Put both working directories under `root` (`root/downloads`, `root/converted`).
    pub fn work_dir(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.config.downloads_dir = root.join("downloads");
        self.config.converted_dir = root.join("converted");
        self
    }

    pub fn downloads_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.downloads_dir = dir.into();
        self
    }

    pub fn converted_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.converted_dir = dir.into();
        self
    }

    pub fn converted_prefix(mut self, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        self.config.converted_prefix = prefix;
        self
    }

    pub fn signed_url_ttl(mut self, ttl: Duration) -> Self {
        self.config.signed_url_ttl = ttl;
        self
    }

    pub fn max_concurrent_runs(mut self, n: usize) -> Self {
        self.config.max_concurrent_runs = n;
        self
    }

    pub fn engine_timeout(mut self, timeout: Duration) -> Self {
        self.config.engine_timeout = timeout;
        self
    }

    pub fn status_collection(mut self, name: impl Into<String>) -> Self {
        self.config.status_collection = name.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, Doc2PdfError> {
        let c = &self.config;
        if c.max_concurrent_runs == 0 {
            return Err(Doc2PdfError::InvalidConfig(
                "max_concurrent_runs must be ≥ 1".into(),
            ));
        }
        if c.signed_url_ttl.is_zero() {
            return Err(Doc2PdfError::InvalidConfig(
                "signed_url_ttl must be non-zero".into(),
            ));
        }
        // V4 signed URLs cannot outlive 7 days.
        if c.signed_url_ttl > Duration::from_secs(7 * 24 * 3600) {
            return Err(Doc2PdfError::InvalidConfig(format!(
                "signed_url_ttl must be at most 7 days, got {}s",
                c.signed_url_ttl.as_secs()
            )));
        }
        if c.engine_timeout < Duration::from_secs(1) {
            return Err(Doc2PdfError::InvalidConfig(
                "engine_timeout must be at least 1s".into(),
            ));
        }
        if c.downloads_dir == c.converted_dir {
            return Err(Doc2PdfError::InvalidConfig(format!(
                "downloads_dir and converted_dir must differ (both are {})",
                c.downloads_dir.display()
            )));
        }
        if c.status_collection.trim().is_empty() {
            return Err(Doc2PdfError::InvalidConfig(
                "status_collection must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ServiceConfig::default();
        assert_eq!(c.signed_url_ttl, Duration::from_secs(300));
        assert_eq!(c.converted_prefix, "converted-files/");
        assert_eq!(c.status_collection, "conversions");
        assert_eq!(c.max_concurrent_runs, 4);
    }

    #[test]
    fn work_dir_sets_both_directories() {
        let c = ServiceConfig::builder().work_dir("/srv/x").build().unwrap();
        assert_eq!(c.downloads_dir, PathBuf::from("/srv/x/downloads"));
        assert_eq!(c.converted_dir, PathBuf::from("/srv/x/converted"));
    }

    #[test]
    fn prefix_gets_trailing_slash() {
        let c = ServiceConfig::builder()
            .converted_prefix("pdfs")
            .build()
            .unwrap();
        assert_eq!(c.converted_prefix, "pdfs/");
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = ServiceConfig::builder()
            .max_concurrent_runs(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Doc2PdfError::InvalidConfig(_)));
    }

    #[test]
    fn ttl_over_seven_days_rejected() {
        let err = ServiceConfig::builder()
            .signed_url_ttl(Duration::from_secs(8 * 24 * 3600))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("7 days"), "got: {err}");
    }

    #[test]
    fn shared_directory_rejected() {
        let err = ServiceConfig::builder()
            .downloads_dir("/tmp/same")
            .converted_dir("/tmp/same")
            .build()
            .unwrap_err();
        assert!(matches!(err, Doc2PdfError::InvalidConfig(_)));
    }
}
