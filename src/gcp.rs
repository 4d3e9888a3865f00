//! OAuth access tokens for Google Cloud APIs.
//!
//! Both the GCS object store and the Firestore document store authenticate
//! with a bearer token, each asking for its own scopes. Tokens come from one
//! of two places:
//!
//! * a token handed to the process (`GOOGLE_OAUTH_ACCESS_TOKEN`, e.g. from
//!   `gcloud auth print-access-token`), used as-is whatever the scopes;
//! * a [`gcp_auth::TokenProvider`]: a service-account key file, application
//!   default credentials, the gcloud CLI or the metadata server. The provider
//!   caches and refreshes tokens itself.
//!
//! Signing download URLs also needs the e-mail of a service account. It is
//! read from the key file's `client_email` when one is used, or set
//! explicitly with [`TokenSource::with_service_account_email`].

use gcp_auth::{CustomServiceAccount, TokenProvider};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable holding a pre-minted access token.
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Standard variable naming a service-account key file.
pub const CREDENTIALS_FILE_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

pub const STORAGE_SCOPES: &[&str] = &["https://www.googleapis.com/auth/devstorage.read_write"];
pub const DATASTORE_SCOPES: &[&str] = &["https://www.googleapis.com/auth/datastore"];
/// IAM Credentials `signBlob` accepts nothing narrower.
pub const CLOUD_PLATFORM_SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

#[derive(Debug, Error)]
#[error("{0}")]
pub struct AuthError(pub String);

/// Where access tokens come from.
pub enum TokenSource {
    Static(String),
    Provider {
        provider: Arc<dyn TokenProvider>,
        email: Option<String>,
    },
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSource::Static(_) => f.write_str("TokenSource::Static(<redacted>)"),
            TokenSource::Provider { email, .. } => f
                .debug_struct("TokenSource::Provider")
                .field("email", email)
                .finish_non_exhaustive(),
        }
    }
}

/// The one field of a key file needed besides what `gcp_auth` reads.
#[derive(Deserialize)]
struct KeyFileIdentity {
    client_email: String,
}

/// `client_email` of a service-account key file's contents.
pub(crate) fn key_file_email(json: &str) -> Result<String, AuthError> {
    let id: KeyFileIdentity = serde_json::from_str(json)
        .map_err(|e| AuthError(format!("not a service account key file: {e}")))?;
    if id.client_email.trim().is_empty() {
        return Err(AuthError("service account key file has an empty client_email".into()));
    }
    Ok(id.client_email)
}

impl TokenSource {
    /// A static token from [`ACCESS_TOKEN_ENV`], if set and non-empty.
    pub fn from_env() -> Option<Self> {
        std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(|t| TokenSource::Static(t.trim().to_string()))
    }

    pub fn from_provider(provider: Arc<dyn TokenProvider>) -> Self {
        TokenSource::Provider {
            provider,
            email: None,
        }
    }

    /// Tokens minted from a service-account key file. The signer e-mail is
    /// the file's `client_email`.
    pub async fn from_key_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AuthError(format!("cannot read key file '{}': {e}", path.display())))?;
        let email = key_file_email(&json)?;
        let account = CustomServiceAccount::from_json(&json)
            .map_err(|e| AuthError(format!("invalid key file '{}': {e}", path.display())))?;
        info!("Using service account {} from {}", email, path.display());
        Ok(TokenSource::Provider {
            provider: Arc::new(account),
            email: Some(email),
        })
    }

    /// Pick credentials the way Google client libraries do.
    ///
    /// In order: an explicit key file, a static token from the environment,
    /// a key file named by [`CREDENTIALS_FILE_ENV`], then whatever
    /// [`gcp_auth::provider`] discovers (gcloud, metadata server).
    pub async fn discover(key_file: Option<&Path>) -> Result<Self, AuthError> {
        if let Some(path) = key_file {
            return Self::from_key_file(path).await;
        }
        if let Some(source) = Self::from_env() {
            debug!("Using static access token from {}", ACCESS_TOKEN_ENV);
            return Ok(source);
        }
        if let Some(path) = std::env::var_os(CREDENTIALS_FILE_ENV).filter(|p| !p.is_empty()) {
            return Self::from_key_file(Path::new(&path)).await;
        }
        let provider = gcp_auth::provider()
            .await
            .map_err(|e| AuthError(format!("failed to initialize GCP authentication: {e}")))?;
        Ok(Self::from_provider(provider))
    }

    /// Override the service account that signs download URLs.
    pub fn with_service_account_email(self, address: impl Into<String>) -> Self {
        match self {
            TokenSource::Static(token) => TokenSource::Static(token),
            TokenSource::Provider { provider, .. } => TokenSource::Provider {
                provider,
                email: Some(address.into()),
            },
        }
    }

    /// A currently valid bearer token for `scopes`.
    pub async fn access_token(&self, scopes: &[&str]) -> Result<String, AuthError> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Provider { provider, .. } => provider
                .token(scopes)
                .await
                .map(|t| t.as_str().to_string())
                .map_err(|e| AuthError(format!("failed to get access token: {e}"))),
        }
    }

    /// E-mail of the service account behind these credentials, when known.
    pub fn service_account_email(&self) -> Result<String, AuthError> {
        match self {
            TokenSource::Provider {
                email: Some(email), ..
            } => Ok(email.clone()),
            _ => Err(AuthError(
                "no service account e-mail known for these credentials; set a signer e-mail".into(),
            )),
        }
    }
}
