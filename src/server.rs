//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/call/{id}` | Full call record |
//! | `GET`  | `/api/calls/search` | Filtered call list (`query`, `company`, `date_from`, `date_to`) |
//! | `GET`  | `/api/call/{id}/summary` | Derived summary |
//! | `GET`  | `/api/companies` | Sorted unique companies |
//! | `GET`  | `/api/analytics/companies` | Same as `/api/companies` |
//! | `POST` | `/api/ask` | Ask a question about a call transcript |
//! | `POST` | `/api/calls/refresh` | Force a cache reload |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every error response is a JSON object with an `error` message and a
//! machine-readable `code`:
//!
//! ```json
//! { "error": "Call not found", "code": "not_found" }
//! ```
//!
//! Codes: `bad_request` (400), `not_found` (404), `rate_limited`, `timeout`,
//! `unreachable`, `provider_error`, `unknown`, `internal` (500). Internal
//! detail is logged, never returned.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::error::CallError;
use crate::models::{CallRecord, CallSummary};
use crate::qa::AnswerGateway;
use crate::query::{CallService, SearchParams};
use crate::store::CallStore;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub calls: CallService,
    pub gateway: Arc<AnswerGateway>,
}

impl AppState {
    /// Build the call store and QA gateway from configuration.
    ///
    /// Fails fast on configuration errors (missing local calls file, missing
    /// API credential outside the testing environment).
    pub fn from_config(config: &Config) -> Result<Self, CallError> {
        let store = CallStore::from_config(&config.storage)?;
        let gateway = AnswerGateway::from_config(config)?;
        Ok(Self {
            calls: CallService::new(Arc::new(store)),
            gateway: Arc::new(gateway),
        })
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/call/{id}", get(handle_get_call))
        .route("/api/call/{id}/summary", get(handle_get_summary))
        .route("/api/calls/search", get(handle_search))
        .route("/api/calls/refresh", post(handle_refresh))
        .route("/api/companies", get(handle_companies))
        .route("/api/analytics/companies", get(handle_companies))
        .route("/api/ask", post(handle_ask))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on an already-bound listener until the process exits.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Starts the HTTP server on `[server].bind`.
///
/// The configured calls file must exist (local mode) and, outside the
/// testing environment, a completion-API key must be set.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(
        bind = %config.server.bind,
        source = %state.calls.store().describe_source(),
        "CalPilot API listening"
    );
    serve(listener, state).await
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn call_not_found() -> AppError {
    CallError::NotFound("Call".to_string()).into()
}

impl From<CallError> for AppError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::InvalidArgument(_) => bad_request(err.to_string()),
            CallError::NotFound(what) => not_found(format!("{} not found", what)),
            CallError::Provider(kind) => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: kind.code().to_string(),
                message: kind.user_message().to_string(),
            },
            other => {
                error!(error = %other, "Request failed");
                internal("Internal server error")
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Calls ============

async fn handle_get_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CallRecord>, AppError> {
    state
        .calls
        .get_by_id(&id)
        .await
        .map(Json)
        .ok_or_else(call_not_found)
}

async fn handle_get_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CallSummary>, AppError> {
    state
        .calls
        .get_summary(&id)
        .await
        .map(Json)
        .ok_or_else(call_not_found)
}

async fn handle_search(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Vec<CallRecord>>, AppError> {
    let Query(params) =
        params.map_err(|e| bad_request(format!("Invalid search parameters: {}", e.body_text())))?;
    Ok(Json(state.calls.search(&params).await))
}

async fn handle_companies(State(state): State<AppState>) -> Json<Vec<String>> {
    let companies = state.calls.unique_companies().await;
    Json(companies.as_ref().clone())
}

#[derive(Serialize)]
struct RefreshResponse {
    message: String,
    count: usize,
}

async fn handle_refresh(State(state): State<AppState>) -> Result<Json<RefreshResponse>, AppError> {
    let count = state.calls.store().refresh().await.map_err(|e| {
        error!(error = %e, "Failed to refresh cache");
        internal("Failed to refresh cache")
    })?;
    Ok(Json(RefreshResponse {
        message: "Cache refreshed successfully".to_string(),
        count,
    }))
}

// ============ POST /api/ask ============

#[derive(Debug, Deserialize)]
struct AskRequest {
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    question: Option<String>,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    call_id: String,
    question: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Json(req) = body.map_err(|_| bad_request("No JSON data provided"))?;

    let mut missing = Vec::new();
    let call_id = req.call_id.unwrap_or_default();
    let question = req.question.unwrap_or_default();
    if call_id.trim().is_empty() {
        missing.push("call_id".to_string());
    }
    if question.trim().is_empty() {
        missing.push("question".to_string());
    }
    if !missing.is_empty() {
        return Err(CallError::InvalidArgument(missing).into());
    }

    let call = state
        .calls
        .get_by_id(&call_id)
        .await
        .ok_or_else(call_not_found)?;

    let answer = state
        .gateway
        .answer(call.id(), &question, call.transcript_text())
        .await?;

    Ok(Json(AskResponse {
        answer,
        call_id,
        question,
    }))
}
