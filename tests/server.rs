//! HTTP trigger tests, driven through the router with `tower::ServiceExt`.
//!
//! The router is exercised in-process: no socket is bound and every backend
//! is an in-memory implementation.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use edgequake_doc2pdf::breaker::CircuitBreaker;
use edgequake_doc2pdf::server::{router, router_with_breaker};
use edgequake_doc2pdf::status::StatusStoreError;
use edgequake_doc2pdf::{
    AppState, ConversionEngine, ConversionPipeline, Dispatcher, DocumentStore,
    LocalObjectStore, MemoryDocumentStore, MemoryObjectStore, ObjectStore, ServiceConfig,
    StatusRecord, StatusUpdate,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

// ── Test helpers ─────────────────────────────────────────────────────────────

struct CopyEngine;

#[async_trait]
impl ConversionEngine for CopyEngine {
    async fn convert(&self, source: &Path, out_dir: &Path) -> Result<PathBuf, String> {
        let out = out_dir.join("out.pdf");
        tokio::fs::copy(source, &out).await.map_err(|e| e.to_string())?;
        Ok(out)
    }
}

/// Document store whose reads always fail.
#[derive(Default)]
struct UnreadableStore;

#[async_trait]
impl DocumentStore for UnreadableStore {
    async fn merge(&self, _: &str, _: &str, _: &StatusUpdate) -> Result<(), StatusStoreError> {
        Ok(())
    }

    async fn get(&self, _: &str, _: &str) -> Result<Option<StatusRecord>, StatusStoreError> {
        Err(StatusStoreError::Backend("unavailable".into()))
    }
}

struct TestApp {
    _dir: TempDir,
    objects: MemoryObjectStore,
    state: AppState,
}

async fn test_app_with(documents: Arc<dyn DocumentStore>) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig::builder().work_dir(dir.path()).build().unwrap();
    let objects = MemoryObjectStore::new();
    let pipeline = ConversionPipeline::new(
        &config,
        Arc::new(objects.clone()),
        documents,
        Arc::new(CopyEngine),
    )
    .await
    .unwrap();
    let state = AppState::new(Dispatcher::new(Arc::new(pipeline), 2));
    TestApp {
        _dir: dir,
        objects,
        state,
    }
}

async fn test_app() -> TestApp {
    test_app_with(Arc::new(MemoryDocumentStore::new())).await
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, req).await;
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

/// Poll the status route until the record is terminal.
async fn wait_for_terminal(app: &Router, doc_id: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = send_json(app, get(&format!("/conversions/{doc_id}"))).await;
        if status == StatusCode::OK && body["status"] != "processing" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("conversion of {doc_id} never reached a terminal status");
}

fn convert_body(doc_id: &str, file_name: &str) -> Value {
    json!({
        "docId": doc_id,
        "fileName": file_name,
        "filePath": format!("gs://uploads-bucket/incoming/{file_name}"),
    })
}

// ── Liveness ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn root_says_hello() {
    let t = test_app().await;
    let app = router(t.state);
    let (status, body) = send_json(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "Hello, World!" }));
}

#[tokio::test]
async fn health_is_ok() {
    let t = test_app().await;
    let app = router(t.state);
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

// ── POST /convert ────────────────────────────────────────────────────────────

#[tokio::test]
async fn convert_accepts_and_completes_in_background() {
    let t = test_app().await;
    t.objects.insert("incoming/test.docx", b"hello".to_vec());
    let app = router(t.state);

    let (status, body) = send_json(&app, post_json("/convert", convert_body("doc123", "test.docx"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, json!({ "message": "File conversion started." }));

    let record = wait_for_terminal(&app, "doc123").await;
    assert_eq!(record["status"], "completed");
    assert!(record["pdfUrl"]
        .as_str()
        .unwrap()
        .contains("converted-files/doc123/test.pdf"));
    assert!(record.get("errorMessage").is_none());
    assert_eq!(
        t.objects.get("converted-files/doc123/test.pdf").as_deref(),
        Some(&b"hello"[..])
    );
}

#[tokio::test]
async fn missing_source_is_still_accepted_then_recorded_as_error() {
    let t = test_app().await;
    let app = router(t.state);

    let (status, _) = send_json(&app, post_json("/convert", convert_body("doc404", "test.docx"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let record = wait_for_terminal(&app, "doc404").await;
    assert_eq!(record["status"], "error");
    assert!(record["errorMessage"].as_str().unwrap().contains("test.docx"));
    assert!(record.get("pdfUrl").is_none());
}

#[tokio::test]
async fn disallowed_extension_is_rejected() {
    let t = test_app().await;
    let app = router(t.state);

    let (status, body) = send_json(&app, post_json("/convert", convert_body("doc1", "report.exe"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("valid extension"));

    let (status, _) = send_json(&app, get("/conversions/doc1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "no record for a rejected request");
}

#[tokio::test]
async fn nested_doc_id_is_rejected() {
    let t = test_app().await;
    let app = router(t.state);

    let (status, body) =
        send_json(&app, post_json("/convert", convert_body("team/doc1", "report.docx"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("docId"));
}

#[tokio::test]
async fn empty_fields_are_rejected() {
    let t = test_app().await;
    let app = router(t.state);

    let (status, body) = send_json(
        &app,
        post_json("/convert", json!({ "docId": "", "fileName": "a.docx", "filePath": "gs://b/a.docx" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("docId"));

    let (status, _) = send_json(&app, post_json("/convert", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let t = test_app().await;
    let app = router(t.state);
    let req = Request::builder()
        .method("POST")
        .uri("/convert")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

// ── Authentication ───────────────────────────────────────────────────────────

#[tokio::test]
async fn api_token_guards_api_routes_only() {
    let t = test_app().await;
    t.objects.insert("incoming/test.txt", b"x".to_vec());
    let app = router(t.state.with_api_token("s3cret"));

    let (status, body) = send_json(&app, post_json("/convert", convert_body("d1", "test.txt"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["detail"].is_string());

    let mut wrong = post_json("/convert", convert_body("d1", "test.txt"));
    wrong
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer nope".parse().unwrap());
    let (status, _) = send_json(&app, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut right = post_json("/convert", convert_body("d1", "test.txt"));
    right
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
    let (status, _) = send_json(&app, right).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
}

// ── GET /conversions/{docId} ─────────────────────────────────────────────────

#[tokio::test]
async fn unknown_conversion_is_not_found() {
    let t = test_app().await;
    let app = router(t.state);
    let (status, body) = send_json(&app, get("/conversions/nobody")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("nobody"));
}

// ── Circuit breaker ──────────────────────────────────────────────────────────

#[tokio::test]
async fn breaker_opens_after_server_errors() {
    let t = test_app_with(Arc::new(UnreadableStore)).await;
    let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(60)));
    let app = router_with_breaker(t.state, breaker);

    let (status, _) = send_json(&app, get("/conversions/doc1")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, body) = send_json(&app, get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, json!({ "detail": "Service temporarily unavailable" }));
}

#[tokio::test]
async fn client_errors_do_not_trip_the_breaker() {
    let t = test_app().await;
    let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(60)));
    let app = router_with_breaker(t.state, breaker);

    for _ in 0..3 {
        let (status, _) = send_json(&app, post_json("/convert", convert_body("d", "x.exe"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    let (status, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
}

// ── Signed local objects ─────────────────────────────────────────────────────

#[tokio::test]
async fn local_signed_url_round_trip() {
    let t = test_app().await;
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalObjectStore::new(root.path(), "http://localhost", "key").unwrap());

    let src = root.path().join("upload.pdf");
    tokio::fs::write(&src, b"%PDF-1.7").await.unwrap();
    store
        .upload_from_file(&src, "converted-files/d1/out.pdf", "application/pdf")
        .await
        .unwrap();
    let url = store
        .signed_url("converted-files/d1/out.pdf", Duration::from_secs(300))
        .await
        .unwrap();
    let path_and_query = url.strip_prefix("http://localhost").unwrap().to_string();

    let app = router(t.state.with_local_objects(Arc::clone(&store)));

    let (status, body) = send(&app, get(&path_and_query)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"%PDF-1.7");

    let tampered = path_and_query.replace("sig=", "sig=AA");
    let (status, _) = send(&app, get(&tampered)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let unsigned = path_and_query.split('?').next().unwrap().to_string();
    let (status, _) = send(&app, get(&unsigned)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn object_route_is_off_without_local_store() {
    let t = test_app().await;
    let app = router(t.state);
    let (status, _) = send(&app, get("/objects/a/b.pdf?expires=1&sig=x")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
