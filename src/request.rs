//! Conversion requests: wire shape, validation and normalisation.
//!
//! A [`ConversionRequestBody`] is whatever arrived on the wire. Turning it
//! into a [`ConversionRequest`] is the only way to obtain one, and that step
//! rejects bad values before any stage touches storage or disk.
//!
//! Normalisation is applied once, here, and nowhere else:
//! * `filePath` loses a single leading `scheme://bucket/` (e.g. `gs://my-bucket/`),
//! * `fileName` is reduced to its final path component.

use crate::error::Doc2PdfError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// File extensions the service accepts, matched case-sensitively.
pub const ALLOWED_EXTENSIONS: &[&str] = &[".pdf", ".docx", ".txt"];

static STORE_SCHEME_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://[^/]+/").unwrap());

/// Request body as posted to the trigger endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequestBody {
    #[serde(default)]
    pub doc_id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_path: String,
}

/// A validated, normalised conversion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    doc_id: String,
    file_name: String,
    object_key: String,
}

impl ConversionRequest {
    /// Validate and normalise the three request fields.
    ///
    /// # Errors
    /// [`Doc2PdfError::Validation`] when a field is empty or whitespace-only,
    /// when `fileName` lacks an allowed extension, or when `filePath` is
    /// nothing but a store prefix.
    pub fn new(
        doc_id: impl Into<String>,
        file_name: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Result<Self, Doc2PdfError> {
        let doc_id = doc_id.into();
        let file_name = file_name.into();
        let file_path = file_path.into();

        require_non_blank("docId", &doc_id)?;
        require_non_blank("fileName", &file_name)?;
        require_non_blank("filePath", &file_path)?;

        // Status records are keyed by docId, so it must be a single segment.
        if doc_id.contains('/') || doc_id == "." || doc_id == ".." {
            return Err(Doc2PdfError::Validation {
                field: "docId",
                reason: format!("'{doc_id}' must not contain '/' or be '.' or '..'"),
            });
        }

        let file_name = basename(&file_name).to_string();
        let extension = ALLOWED_EXTENSIONS.iter().find(|ext| file_name.ends_with(*ext));
        if extension.is_some_and(|ext| file_name.len() == ext.len()) {
            return Err(Doc2PdfError::Validation {
                field: "fileName",
                reason: format!("'{file_name}' has no name before its extension"),
            });
        }
        if extension.is_none() {
            return Err(Doc2PdfError::Validation {
                field: "fileName",
                reason: format!(
                    "must have a valid extension {}, got '{}'",
                    ALLOWED_EXTENSIONS.join(", "),
                    file_name
                ),
            });
        }

        let object_key = strip_store_prefix(&file_path).to_string();
        if object_key.trim().is_empty() {
            return Err(Doc2PdfError::Validation {
                field: "filePath",
                reason: format!("'{file_path}' does not name an object"),
            });
        }

        Ok(Self {
            doc_id,
            file_name,
            object_key,
        })
    }

    /// Identifier of the status record this run writes to.
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Source file name, reduced to its last path component.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Object key of the source, with any store prefix removed.
    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    /// Name of the PDF this run produces: `fileName` with its extension
    /// replaced by `.pdf`.
    pub fn pdf_name(&self) -> String {
        let stem = match self.file_name.rfind('.') {
            Some(0) | None => self.file_name.as_str(),
            Some(idx) => &self.file_name[..idx],
        };
        format!("{stem}.pdf")
    }
}

impl TryFrom<ConversionRequestBody> for ConversionRequest {
    type Error = Doc2PdfError;

    fn try_from(body: ConversionRequestBody) -> Result<Self, Self::Error> {
        ConversionRequest::new(body.doc_id, body.file_name, body.file_path)
    }
}

fn require_non_blank(field: &'static str, value: &str) -> Result<(), Doc2PdfError> {
    if value.trim().is_empty() {
        return Err(Doc2PdfError::Validation {
            field,
            reason: "field cannot be empty or only whitespace".into(),
        });
    }
    Ok(())
}

/// Strip one leading `scheme://bucket/` from an object locator.
pub fn strip_store_prefix(path: &str) -> &str {
    match STORE_SCHEME_PREFIX.find(path) {
        Some(m) => &path[m.end()..],
        None => path,
    }
}

/// Last component of a `/` or `\` separated path.
fn basename(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}
