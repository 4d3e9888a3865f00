//! A directory on local disk acting as a bucket.
//!
//! Object keys map to relative paths under `root`. Signed URLs point at the
//! trigger server's `/objects/{key}` route and carry an `expires` unix
//! timestamp plus an HMAC-SHA256 `sig` over `key \n expires`, so a URL can
//! be handed to a client exactly like a cloud signed URL.

use super::{ObjectMeta, ObjectStore, StorageError};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::Sha256;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Characters left untouched in the key part of a signed URL.
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

#[derive(Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    base_url: String,
    secret: Vec<u8>,
}

impl std::fmt::Debug for LocalObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalObjectStore")
            .field("root", &self.root)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl LocalObjectStore {
    /// `base_url` is where the trigger server is reachable, e.g.
    /// `http://127.0.0.1:8080`. `secret` keys the URL signatures.
    pub fn new(
        root: impl Into<PathBuf>,
        base_url: impl Into<String>,
        secret: impl AsRef<[u8]>,
    ) -> Result<Self, StorageError> {
        let secret = secret.as_ref().to_vec();
        if secret.is_empty() {
            return Err(StorageError::Credentials {
                message: "local store signing secret is empty".into(),
            });
        }
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StorageError::io(&root, e))?;
        Ok(Self {
            root,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path under `root`, refusing anything that escapes it.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(key);
        let clean = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StorageError::backend(format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(rel))
    }

    fn mac(secret: &[u8], key: &str, expires: u64) -> Result<HmacSha256, StorageError> {
        let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| StorageError::Credentials {
            message: "failed to initialise hmac".into(),
        })?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    fn sign(secret: &[u8], key: &str, expires: u64) -> Result<String, StorageError> {
        let bytes = Self::mac(secret, key, expires)?.finalize().into_bytes();
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Check a signature produced by [`ObjectStore::signed_url`].
    ///
    /// Fails for a bad signature as well as for an expired URL.
    pub fn verify(&self, key: &str, expires: u64, sig: &str) -> bool {
        if expires < unix_now() {
            return false;
        }
        let Ok(raw) = URL_SAFE_NO_PAD.decode(sig) else {
            return false;
        };
        match Self::mac(&self.secret, key, expires) {
            Ok(mac) => mac.verify_slice(&raw).is_ok(),
            Err(_) => false,
        }
    }

    /// Read an object on behalf of a signed-URL request.
    pub async fn read_signed(
        &self,
        key: &str,
        expires: u64,
        sig: &str,
    ) -> Result<Vec<u8>, StorageError> {
        if !self.verify(key, expires, sig) {
            return Err(StorageError::Credentials {
                message: "signature invalid or expired".into(),
            });
        }
        let path = self.resolve(key)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound {
                key: key.to_string(),
            },
            _ => StorageError::io(&path, e),
        })
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(md) if md.is_file() => {
                let modified = md.modified().ok().map(DateTime::<Utc>::from);
                Ok(Some(ObjectMeta {
                    key: key.to_string(),
                    size: md.len(),
                    version: modified.map(|t| t.timestamp_nanos_opt().unwrap_or(0).to_string()),
                    last_modified: modified,
                }))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    async fn download_to_file(&self, key: &str, local: &Path) -> Result<u64, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::copy(&path, local).await {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !path.exists() => {
                Err(StorageError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(e) => Err(StorageError::io(local, e)),
        }
    }

    async fn upload_from_file(
        &self,
        local: &Path,
        key: &str,
        _content_type: &str,
    ) -> Result<ObjectMeta, StorageError> {
        let dest = self.resolve(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }

        // Copy next to the destination, then rename: readers never see a
        // half-written object.
        let mut partial = dest.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);
        tokio::fs::copy(local, &partial)
            .await
            .map_err(|e| StorageError::io(local, e))?;
        if let Err(e) = tokio::fs::rename(&partial, &dest).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(StorageError::io(&dest, e));
        }
        debug!("Stored object '{}' at {}", key, dest.display());

        self.head(key)
            .await?
            .ok_or_else(|| StorageError::backend(format!("object '{key}' vanished after upload")))
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        self.resolve(key)?;
        let expires = unix_now().saturating_add(ttl.as_secs());
        let secret = self.secret.clone();
        let owned_key = key.to_string();

        let sig = tokio::task::spawn_blocking(move || Self::sign(&secret, &owned_key, expires))
            .await
            .map_err(|e| StorageError::backend(format!("signing task panicked: {e}")))??;

        Ok(format!(
            "{}/objects/{}?expires={expires}&sig={sig}",
            self.base_url,
            utf8_percent_encode(key, KEY_SEGMENT)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> LocalObjectStore {
        LocalObjectStore::new(dir.path().join("bucket"), "http://127.0.0.1:8080/", "s3cret").unwrap()
    }

    fn query_param<'a>(url: &'a str, name: &str) -> &'a str {
        let query = url.split_once('?').unwrap().1;
        query
            .split('&')
            .find_map(|kv| kv.strip_prefix(&format!("{name}=")))
            .unwrap()
    }

    #[test]
    fn keys_cannot_escape_root() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        assert!(s.resolve("../etc/passwd").is_err());
        assert!(s.resolve("/etc/passwd").is_err());
        assert!(s.resolve("").is_err());
        assert!(s.resolve("uploads/a.docx").is_ok());
    }

    #[tokio::test]
    async fn upload_download_and_head() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let src = dir.path().join("in.pdf");
        std::fs::write(&src, b"%PDF-1.4 body").unwrap();

        let meta = s
            .upload_from_file(&src, "converted-files/d1/in.pdf", "application/pdf")
            .await
            .unwrap();
        assert_eq!(meta.size, 13);

        let out = dir.path().join("out.pdf");
        s.download_to_file("converted-files/d1/in.pdf", &out).await.unwrap();
        assert_eq!(std::fs::read(out).unwrap(), b"%PDF-1.4 body");

        assert!(s.head("missing.pdf").await.unwrap().is_none());
        let err = s
            .download_to_file("missing.pdf", &dir.path().join("m"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn signed_url_round_trips_through_verify() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let url = s
            .signed_url("converted-files/d1/a b.pdf", Duration::from_secs(300))
            .await
            .unwrap();

        assert!(url.starts_with("http://127.0.0.1:8080/objects/converted-files/d1/a%20b.pdf?"));
        let expires: u64 = query_param(&url, "expires").parse().unwrap();
        let sig = query_param(&url, "sig");

        assert!(s.verify("converted-files/d1/a b.pdf", expires, sig));
        assert!(!s.verify("converted-files/d1/other.pdf", expires, sig));
        assert!(!s.verify("converted-files/d1/a b.pdf", expires + 1, sig));
    }

    #[test]
    fn expired_signature_rejected() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let past = unix_now() - 10;
        let sig = LocalObjectStore::sign(b"s3cret", "k.pdf", past).unwrap();
        assert!(!s.verify("k.pdf", past, &sig));
    }

    #[test]
    fn empty_secret_rejected() {
        let dir = TempDir::new().unwrap();
        let err = LocalObjectStore::new(dir.path(), "http://x", "").unwrap_err();
        assert!(matches!(err, StorageError::Credentials { .. }));
    }
}
