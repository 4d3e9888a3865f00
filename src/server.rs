//! HTTP trigger for the conversion pipeline.
//!
//! | Route | |
//! |-------|---|
//! | `POST /convert` | validate, schedule a run, answer `202` at once |
//! | `GET /conversions/{docId}` | current status record |
//! | `GET /objects/{*key}` | serve a [`LocalObjectStore`] object behind a signed URL |
//! | `GET /health`, `GET /` | liveness |
//!
//! Every error body is `{"detail": "..."}`. When an API token is configured,
//! the API routes require `Authorization: Bearer <token>`.

use crate::breaker::{circuit_breaker_middleware, CircuitBreaker};
use crate::dispatch::Dispatcher;
use crate::error::Doc2PdfError;
use crate::request::{ConversionRequest, ConversionRequestBody};
use crate::status::StatusRecord;
use crate::storage::{LocalObjectStore, StorageError};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

// ── State ────────────────────────────────────────────────────────────────

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    /// Expected bearer token; `None` disables the check.
    pub api_token: Option<Arc<str>>,
    /// Set when the object store is a local directory whose signed URLs
    /// point back at this server.
    pub local_objects: Option<Arc<LocalObjectStore>>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            api_token: None,
            local_objects: None,
        }
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.api_token = (!token.trim().is_empty()).then(|| Arc::from(token.trim()));
        self
    }

    pub fn with_local_objects(mut self, store: Arc<LocalObjectStore>) -> Self {
        self.local_objects = Some(store);
        self
    }
}

// ── Errors ───────────────────────────────────────────────────────────────

/// Error answered by a handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid or missing bearer token")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(ref msg) = self {
            tracing::error!("Internal error: {}", msg);
        }
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<Doc2PdfError> for ApiError {
    fn from(e: Doc2PdfError) -> Self {
        match e {
            Doc2PdfError::Validation { .. } => ApiError::BadRequest(e.to_string()),
            Doc2PdfError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

// ── Router ───────────────────────────────────────────────────────────────

/// Build the router with a default circuit breaker.
pub fn router(state: AppState) -> Router {
    router_with_breaker(state, Arc::new(CircuitBreaker::default()))
}

pub fn router_with_breaker(state: AppState, breaker: Arc<CircuitBreaker>) -> Router {
    let api_routes = Router::new()
        .route("/convert", post(convert_handler))
        .route("/conversions/{doc_id}", get(status_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/objects/{*key}", get(object_handler))
        .merge(api_routes)
        .layer(middleware::from_fn_with_state(breaker, circuit_breaker_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, app: Router) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
            }
        })
        .await
}

// ── Middleware ───────────────────────────────────────────────────────────

async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.api_token.as_deref() {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        if presented != Some(expected) {
            warn!("Rejected request to {} with bad token", request.uri().path());
            return Err(ApiError::Unauthorized);
        }
    }
    Ok(next.run(request).await)
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({ "message": "Hello, World!" }))
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn convert_handler(
    State(state): State<AppState>,
    body: Result<Json<ConversionRequestBody>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let request = ConversionRequest::try_from(body)?;

    info!(
        "Accepted conversion of '{}' for doc ID '{}'",
        request.object_key(),
        request.doc_id()
    );
    // Detached: the outcome lands in the status record.
    drop(state.dispatcher.submit(request));

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "File conversion started." })),
    ))
}

async fn status_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Json<StatusRecord>, ApiError> {
    state
        .dispatcher
        .pipeline()
        .recorder()
        .get(&doc_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No conversion recorded for doc ID '{doc_id}'")))
}

#[derive(Debug, Deserialize)]
struct SignedQuery {
    expires: u64,
    sig: String,
}

async fn object_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    query: Result<Query<SignedQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let store = state
        .local_objects
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("Object serving is not enabled".into()))?;
    let Query(q) = query.map_err(|_| ApiError::Forbidden("Missing or malformed signature".into()))?;

    let data = store
        .read_signed(&key, q.expires, &q.sig)
        .await
        .map_err(|e| match e {
            StorageError::Credentials { message } => ApiError::Forbidden(message),
            StorageError::NotFound { key } => ApiError::NotFound(format!("No object '{key}'")),
            other => ApiError::Internal(other.to_string()),
        })?;

    let content_type = if key.ends_with(".pdf") {
        "application/pdf"
    } else {
        "application/octet-stream"
    };
    Ok(([(header::CONTENT_TYPE, content_type)], data).into_response())
}
