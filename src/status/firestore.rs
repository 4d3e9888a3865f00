//! Firestore over its REST API.
//!
//! Merges go through `documents:commit` with an `updateMask` listing
//! `status`, `pdfUrl` and `errorMessage`: fields in the mask but absent from
//! the document body are deleted, which is how the opposite detail field is
//! cleared. `updatedAt` is set by a `REQUEST_TIME` server transform, so the
//! timestamp comes from Firestore rather than from this process's clock.

use super::{ConversionStatus, DocumentStore, StatusRecord, StatusStoreError, StatusUpdate};
use crate::gcp::{TokenSource, DATASTORE_SCOPES};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

const FIRESTORE_API: &str = "https://firestore.googleapis.com";

const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub struct FirestoreDocumentStore {
    client: reqwest::Client,
    project: String,
    database: String,
    tokens: Arc<TokenSource>,
    api_base: String,
}

impl std::fmt::Debug for FirestoreDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirestoreDocumentStore")
            .field("project", &self.project)
            .field("database", &self.database)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl FirestoreDocumentStore {
    pub fn new(client: reqwest::Client, project: impl Into<String>, tokens: Arc<TokenSource>) -> Self {
        Self {
            client,
            project: project.into(),
            database: "(default)".to_string(),
            tokens,
            api_base: FIRESTORE_API.to_string(),
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Point API calls at an emulator or test server.
    pub fn with_endpoint(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn database_path(&self) -> String {
        format!("projects/{}/databases/{}", self.project, self.database)
    }

    async fn bearer(&self) -> Result<String, StatusStoreError> {
        self.tokens
            .access_token(DATASTORE_SCOPES)
            .await
            .map_err(|e| StatusStoreError::Credentials(e.0))
    }
}

/// Request body for a single merge write.
pub(crate) fn commit_body(database_path: &str, collection: &str, doc_id: &str, update: &StatusUpdate) -> Value {
    let mut fields = serde_json::Map::new();
    fields.insert(
        "status".into(),
        json!({ "stringValue": update.status().as_str() }),
    );
    if let Some(url) = update.pdf_url() {
        fields.insert("pdfUrl".into(), json!({ "stringValue": url }));
    }
    if let Some(msg) = update.error_message() {
        fields.insert("errorMessage".into(), json!({ "stringValue": msg }));
    }

    json!({
        "writes": [{
            "update": {
                "name": format!("{database_path}/documents/{collection}/{doc_id}"),
                "fields": fields,
            },
            "updateMask": { "fieldPaths": ["status", "pdfUrl", "errorMessage"] },
            "updateTransforms": [
                { "fieldPath": "updatedAt", "setToServerValue": "REQUEST_TIME" }
            ],
        }]
    })
}

/// Decode a Firestore document into a status record.
pub(crate) fn parse_document(doc_id: &str, doc: &Value) -> Result<StatusRecord, StatusStoreError> {
    let fields = &doc["fields"];
    let string = |name: &str| fields[name]["stringValue"].as_str().map(str::to_string);

    let status = string("status")
        .ok_or_else(|| StatusStoreError::Backend(format!("document '{doc_id}' has no status")))?
        .parse::<ConversionStatus>()
        .map_err(StatusStoreError::Backend)?;

    let updated_at = fields["updatedAt"]["timestampValue"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));

    Ok(StatusRecord {
        doc_id: doc_id.to_string(),
        status,
        pdf_url: string("pdfUrl"),
        error_message: string("errorMessage"),
        updated_at,
    })
}

#[async_trait]
impl DocumentStore for FirestoreDocumentStore {
    async fn merge(
        &self,
        collection: &str,
        doc_id: &str,
        update: &StatusUpdate,
    ) -> Result<(), StatusStoreError> {
        let token = self.bearer().await?;
        let url = format!("{}/v1/{}/documents:commit", self.api_base, self.database_path());
        let body = commit_body(&self.database_path(), collection, doc_id, update);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| StatusStoreError::Backend(format!("Firestore commit failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(StatusStoreError::Backend(format!(
                "Firestore commit for '{collection}/{doc_id}' failed: HTTP {status}: {text}"
            )));
        }
        debug!("Firestore merge {}/{} → {}", collection, doc_id, update.status().as_str());
        Ok(())
    }

    async fn get(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> Result<Option<StatusRecord>, StatusStoreError> {
        let token = self.bearer().await?;
        let url = format!(
            "{}/v1/{}/documents/{}/{}",
            self.api_base,
            self.database_path(),
            utf8_percent_encode(collection, SEGMENT),
            utf8_percent_encode(doc_id, SEGMENT)
        );

        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| StatusStoreError::Backend(format!("Firestore read failed: {e}")))?;

        match resp.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let doc: Value = resp.json().await.map_err(|e| {
                    StatusStoreError::Backend(format!("malformed Firestore document: {e}"))
                })?;
                parse_document(doc_id, &doc).map(Some)
            }
            s => Err(StatusStoreError::Backend(format!(
                "Firestore read of '{collection}/{doc_id}' failed: HTTP {s}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DB: &str = "projects/p1/databases/(default)";

    #[test]
    fn completed_commit_masks_error_message_away() {
        let body = commit_body(DB, "conversions", "doc123", &StatusUpdate::completed("https://u"));
        let write = &body["writes"][0];

        assert_eq!(
            write["update"]["name"],
            "projects/p1/databases/(default)/documents/conversions/doc123"
        );
        assert_eq!(write["update"]["fields"]["status"]["stringValue"], "completed");
        assert_eq!(write["update"]["fields"]["pdfUrl"]["stringValue"], "https://u");
        assert!(write["update"]["fields"].get("errorMessage").is_none());
        assert_eq!(
            write["updateMask"]["fieldPaths"],
            json!(["status", "pdfUrl", "errorMessage"])
        );
        assert_eq!(write["updateTransforms"][0]["setToServerValue"], "REQUEST_TIME");
    }

    #[test]
    fn error_commit_carries_message() {
        let body = commit_body(DB, "conversions", "d", &StatusUpdate::error("Conversion error"));
        let fields = &body["writes"][0]["update"]["fields"];
        assert_eq!(fields["status"]["stringValue"], "error");
        assert_eq!(fields["errorMessage"]["stringValue"], "Conversion error");
        assert!(fields.get("pdfUrl").is_none());
    }

    #[test]
    fn parse_document_reads_fields() {
        let doc = json!({
            "name": "projects/p1/databases/(default)/documents/conversions/d",
            "fields": {
                "status": { "stringValue": "error" },
                "errorMessage": { "stringValue": "boom" },
                "updatedAt": { "timestampValue": "2024-03-09T12:30:00.123456Z" }
            }
        });
        let rec = parse_document("d", &doc).unwrap();
        assert_eq!(rec.status, ConversionStatus::Error);
        assert_eq!(rec.error_message.as_deref(), Some("boom"));
        assert!(rec.pdf_url.is_none());
        assert!(rec.updated_at.is_some());
    }

    #[test]
    fn parse_document_without_status_fails() {
        let doc = json!({ "fields": {} });
        assert!(parse_document("d", &doc).is_err());
    }
}
