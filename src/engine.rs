//! Conversion engines: the black box that turns an office document into a PDF.
//!
//! ## Why a trait?
//!
//! The real engine (LibreOffice) is a heavyweight external process that is
//! neither available in CI nor interesting to test. Everything around it
//! (scratch directories, atomic placement, error reporting) is, so the engine
//! sits behind [`ConversionEngine`] and tests inject a scripted fake.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Converts one local file into a PDF inside a directory.
#[async_trait]
pub trait ConversionEngine: Send + Sync + 'static {
    /// Convert `source` into a PDF written somewhere inside `out_dir` and
    /// return the produced file's path.
    ///
    /// On failure the `Err` carries the engine's own diagnostic text. Anything
    /// the engine left behind in `out_dir` is discarded by the caller.
    async fn convert(&self, source: &Path, out_dir: &Path) -> Result<PathBuf, String>;
}

/// Bytes kept literal in a `file://` URL path.
const URL_PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// `file://` URL of the private LibreOffice profile under `out_dir`.
fn profile_url(out_dir: &Path) -> String {
    let profile = out_dir.join(".lo-profile");
    format!(
        "file://{}",
        utf8_percent_encode(&profile.to_string_lossy(), URL_PATH)
    )
}

/// Default binary name, resolved through `PATH`.
pub const DEFAULT_SOFFICE: &str = "soffice";

/// LibreOffice in headless mode.
///
/// Runs `soffice --headless --convert-to pdf --outdir <out_dir> <source>`.
/// Every invocation gets its own user profile directory inside `out_dir`, so
/// concurrent conversions don't fight over LibreOffice's profile lock.
///
/// The child is killed when the returned future is dropped, which is how the
/// converter's timeout stops a hung engine.
#[derive(Debug, Clone)]
pub struct LibreOfficeEngine {
    binary: PathBuf,
}

impl Default for LibreOfficeEngine {
    fn default() -> Self {
        Self::new(DEFAULT_SOFFICE)
    }
}

impl LibreOfficeEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self, source: &Path, out_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(format!("-env:UserInstallation={}", profile_url(out_dir)))
        .arg("--headless")
        .arg("--norestore")
        .arg("--convert-to")
        .arg("pdf")
        .arg("--outdir")
        .arg(out_dir)
        .arg(source)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
        cmd
    }
}

/// Name LibreOffice gives its output: the source stem plus `.pdf`.
pub(crate) fn expected_output(source: &Path, out_dir: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    out_dir.join(format!("{stem}.pdf"))
}

#[async_trait]
impl ConversionEngine for LibreOfficeEngine {
    async fn convert(&self, source: &Path, out_dir: &Path) -> Result<PathBuf, String> {
        info!("Running {} on {}", self.binary.display(), source.display());

        let child = self
            .command(source, out_dir)
            .spawn()
            .map_err(|e| format!("cannot start {}: {e}", self.binary.display()))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("engine I/O error: {e}"))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("soffice stdout: {}", stdout.trim());

        if !output.status.success() {
            let diagnostic = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(format!("{} ({})", diagnostic, output.status));
        }

        // soffice exits 0 even when it refuses a file, so check for the result.
        let produced = expected_output(source, out_dir);
        if tokio::fs::metadata(&produced).await.is_err() {
            return Err(format!(
                "engine reported success but produced no PDF: {}",
                stderr.trim()
            ));
        }
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_output_replaces_extension() {
        let out = expected_output(Path::new("/w/d/abc_report.docx"), Path::new("/tmp/s"));
        assert_eq!(out, PathBuf::from("/tmp/s/abc_report.pdf"));
    }

    #[test]
    fn profile_url_escapes_reserved_bytes() {
        assert_eq!(
            profile_url(Path::new("/srv/work dir/100%/tmp#1")),
            "file:///srv/work%20dir/100%25/tmp%231/.lo-profile"
        );
        assert_eq!(
            profile_url(Path::new("/tmp/s")),
            "file:///tmp/s/.lo-profile"
        );
    }

    #[tokio::test]
    async fn missing_binary_is_a_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.docx");
        tokio::fs::write(&src, b"x").await.unwrap();

        let engine = LibreOfficeEngine::new(dir.path().join("no-such-soffice"));
        let err = engine.convert(&src, dir.path()).await.unwrap_err();
        assert!(err.contains("cannot start"), "got: {err}");
    }
}
