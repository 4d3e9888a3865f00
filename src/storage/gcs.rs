//! Google Cloud Storage over the JSON API.
//!
//! ## Signed URLs without a private key
//!
//! V4 signing needs an RSA signature from the service account. Rather than
//! shipping the account's key file to every instance, the canonical request
//! and string-to-sign are built locally and the signature itself comes from
//! the IAM Credentials `signBlob` endpoint, authorised by an access token
//! from the same credentials as the storage calls.

use super::{ObjectMeta, ObjectStore, StorageError};
use crate::gcp::{TokenSource, CLOUD_PLATFORM_SCOPES, STORAGE_SCOPES};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const STORAGE_API: &str = "https://storage.googleapis.com";
const IAM_CREDENTIALS_API: &str = "https://iamcredentials.googleapis.com";
const SIGNING_HOST: &str = "storage.googleapis.com";

/// RFC 3986 unreserved characters survive; everything else is escaped.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Same as [`UNRESERVED`] but keeps `/` so object keys read as paths.
const PATH: &AsciiSet = &UNRESERVED.remove(b'/');

pub struct GcsObjectStore {
    client: reqwest::Client,
    bucket: String,
    tokens: Arc<TokenSource>,
    signer_email: Option<String>,
    api_base: String,
    iam_base: String,
}

impl std::fmt::Debug for GcsObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsObjectStore")
            .field("bucket", &self.bucket)
            .field("signer_email", &self.signer_email)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct GcsObject {
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    generation: Option<String>,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
}

impl From<GcsObject> for ObjectMeta {
    fn from(o: GcsObject) -> Self {
        ObjectMeta {
            key: o.name,
            size: o.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            version: o.generation,
            last_modified: o.updated,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignBlobResponse {
    signed_blob: String,
}

impl GcsObjectStore {
    /// `bucket` may be given with or without a `gs://` prefix.
    pub fn new(client: reqwest::Client, bucket: impl Into<String>, tokens: Arc<TokenSource>) -> Self {
        let bucket = bucket.into();
        let bucket = bucket
            .trim_start_matches("gs://")
            .trim_end_matches('/')
            .to_string();
        Self {
            client,
            bucket,
            tokens,
            signer_email: None,
            api_base: STORAGE_API.to_string(),
            iam_base: IAM_CREDENTIALS_API.to_string(),
        }
    }

    /// Service account that signs download URLs. When unset, the account of
    /// the key file behind `tokens` is used.
    pub fn with_signer(mut self, email: impl Into<String>) -> Self {
        self.signer_email = Some(email.into());
        self
    }

    /// Point API calls somewhere else (an emulator, a test server).
    pub fn with_endpoints(mut self, storage: impl Into<String>, iam: impl Into<String>) -> Self {
        self.api_base = storage.into().trim_end_matches('/').to_string();
        self.iam_base = iam.into().trim_end_matches('/').to_string();
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bearer(&self, scopes: &[&str]) -> Result<String, StorageError> {
        self.tokens
            .access_token(scopes)
            .await
            .map_err(|e| StorageError::Credentials { message: e.0 })
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.api_base,
            self.bucket,
            utf8_percent_encode(key, UNRESERVED)
        )
    }

    fn signer(&self) -> Result<String, StorageError> {
        match &self.signer_email {
            Some(email) => Ok(email.clone()),
            None => self
                .tokens
                .service_account_email()
                .map_err(|e| StorageError::Credentials { message: e.0 }),
        }
    }

    async fn sign_blob(&self, email: &str, payload: &[u8]) -> Result<Vec<u8>, StorageError> {
        let token = self.bearer(CLOUD_PLATFORM_SCOPES).await?;
        let url = format!(
            "{}/v1/projects/-/serviceAccounts/{}:signBlob",
            self.iam_base,
            utf8_percent_encode(email, UNRESERVED)
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "payload": STANDARD.encode(payload) }))
            .send()
            .await
            .map_err(|e| StorageError::backend(format!("signBlob request failed: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Credentials {
                message: format!("signBlob refused (HTTP {status}): {body}"),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::backend(format!(
                "signBlob failed (HTTP {status}): {body}"
            )));
        }

        let signed: SignBlobResponse = resp
            .json()
            .await
            .map_err(|e| StorageError::backend(format!("malformed signBlob response: {e}")))?;
        STANDARD
            .decode(signed.signed_blob)
            .map_err(|e| StorageError::backend(format!("signBlob returned invalid base64: {e}")))
    }
}

/// The pieces of a V4 signed URL that don't depend on the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct V4Request {
    pub canonical_uri: String,
    pub canonical_query: String,
    pub string_to_sign: String,
}

/// Build the canonical request and string-to-sign for a V4 signed GET.
pub(crate) fn v4_request(
    bucket: &str,
    key: &str,
    signer_email: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> V4Request {
    let datetime = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let scope = format!("{date}/auto/storage/goog4_request");
    let credential = format!("{signer_email}/{scope}");

    let canonical_uri = format!("/{}/{}", bucket, utf8_percent_encode(key, PATH));

    // Already in lexicographic order.
    let canonical_query = [
        ("X-Goog-Algorithm", "GOOG4-RSA-SHA256".to_string()),
        ("X-Goog-Credential", credential),
        ("X-Goog-Date", datetime.clone()),
        ("X-Goog-Expires", ttl.as_secs().to_string()),
        ("X-Goog-SignedHeaders", "host".to_string()),
    ]
    .iter()
    .map(|(k, v)| format!("{k}={}", utf8_percent_encode(v, UNRESERVED)))
    .collect::<Vec<_>>()
    .join("&");

    let canonical_request = format!(
        "GET\n{canonical_uri}\n{canonical_query}\nhost:{SIGNING_HOST}\n\nhost\nUNSIGNED-PAYLOAD"
    );
    let hashed = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    let string_to_sign = format!("GOOG4-RSA-SHA256\n{datetime}\n{scope}\n{hashed}");

    V4Request {
        canonical_uri,
        canonical_query,
        string_to_sign,
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StorageError> {
        let token = self.bearer(STORAGE_SCOPES).await?;
        let resp = self
            .client
            .get(self.object_url(key))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| StorageError::backend(format!("GCS metadata request failed: {e}")))?;

        match resp.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let obj: GcsObject = resp.json().await.map_err(|e| {
                    StorageError::backend(format!("malformed GCS object metadata: {e}"))
                })?;
                Ok(Some(obj.into()))
            }
            s => Err(StorageError::backend(format!(
                "GCS metadata for '{key}' failed: HTTP {s}"
            ))),
        }
    }

    async fn download_to_file(&self, key: &str, local: &Path) -> Result<u64, StorageError> {
        let token = self.bearer(STORAGE_SCOPES).await?;
        info!("Downloading gs://{}/{} to {}", self.bucket, key, local.display());

        let resp = self
            .client
            .get(self.object_url(key))
            .query(&[("alt", "media")])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| StorageError::backend(format!("GCS download request failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound {
                key: key.to_string(),
            });
        }
        if !resp.status().is_success() {
            return Err(StorageError::backend(format!(
                "GCS download of '{key}' failed: HTTP {}",
                resp.status()
            )));
        }

        let mut file = tokio::fs::File::create(local)
            .await
            .map_err(|e| StorageError::io(local, e))?;
        let mut written = 0u64;
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk
                .map_err(|e| StorageError::backend(format!("GCS download interrupted: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| StorageError::io(local, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| StorageError::io(local, e))?;

        debug!("Downloaded {} bytes", written);
        Ok(written)
    }

    async fn upload_from_file(
        &self,
        local: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<ObjectMeta, StorageError> {
        let data = tokio::fs::read(local)
            .await
            .map_err(|e| StorageError::io(local, e))?;
        let token = self.bearer(STORAGE_SCOPES).await?;
        info!("Uploading {} to gs://{}/{}", local.display(), self.bucket, key);

        let url = format!("{}/upload/storage/v1/b/{}/o", self.api_base, self.bucket);
        let resp = self
            .client
            .post(&url)
            .query(&[("uploadType", "media"), ("name", key)])
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| StorageError::backend(format!("GCS upload request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::backend(format!(
                "GCS upload of '{key}' failed: HTTP {status}: {body}"
            )));
        }

        let obj: GcsObject = resp
            .json()
            .await
            .map_err(|e| StorageError::backend(format!("malformed GCS upload response: {e}")))?;
        Ok(obj.into())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let email = self.signer()?;
        let req = v4_request(&self.bucket, key, &email, Utc::now(), ttl);
        let signature = hex::encode(self.sign_blob(&email, req.string_to_sign.as_bytes()).await?);
        Ok(format!(
            "https://{SIGNING_HOST}{}?{}&X-Goog-Signature={signature}",
            req.canonical_uri, req.canonical_query
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn v4_request_layout() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 0).unwrap();
        let req = v4_request(
            "my-bucket",
            "converted-files/doc 1/report.pdf",
            "signer@proj.iam.gserviceaccount.com",
            now,
            Duration::from_secs(300),
        );

        assert_eq!(req.canonical_uri, "/my-bucket/converted-files/doc%201/report.pdf");
        assert_eq!(
            req.canonical_query,
            "X-Goog-Algorithm=GOOG4-RSA-SHA256\
             &X-Goog-Credential=signer%40proj.iam.gserviceaccount.com%2F20240309%2Fauto%2Fstorage%2Fgoog4_request\
             &X-Goog-Date=20240309T123000Z\
             &X-Goog-Expires=300\
             &X-Goog-SignedHeaders=host"
        );

        let lines: Vec<&str> = req.string_to_sign.lines().collect();
        assert_eq!(lines[0], "GOOG4-RSA-SHA256");
        assert_eq!(lines[1], "20240309T123000Z");
        assert_eq!(lines[2], "20240309/auto/storage/goog4_request");
        assert_eq!(lines[3].len(), 64, "sha256 hex digest");
    }

    #[test]
    fn bucket_prefix_is_trimmed() {
        let store = GcsObjectStore::new(
            reqwest::Client::new(),
            "gs://bucket-a/",
            Arc::new(TokenSource::Static("t".into())),
        );
        assert_eq!(store.bucket(), "bucket-a");
        assert_eq!(
            store.object_url("uploads/a b.docx"),
            "https://storage.googleapis.com/storage/v1/b/bucket-a/o/uploads%2Fa%20b.docx"
        );
    }

    #[tokio::test]
    async fn signing_without_account_is_credentials_error() {
        let store = GcsObjectStore::new(
            reqwest::Client::new(),
            "bucket-a",
            Arc::new(TokenSource::Static("t".into())),
        );
        let err = store
            .signed_url("converted-files/a.pdf", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Credentials { .. }), "got: {err:?}");
    }
}
