//! HTTP tool server.
//!
//! Exposes the core operations over a JSON API shaped for MCP-style tool
//! clients (Cursor, Claude, and friends):
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/tools/search` | Search the index (semantic, bm25, graph, hybrid) |
//! | `POST` | `/tools/index` | Index a directory of Markdown files |
//! | `GET`  | `/tools/status` | Index statistics |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Error responses are `{ "error": { "code": ..., "message": ... } }` with
//! codes `bad_request`, `index_missing`, `model_mismatch`, `cancelled`,
//! and `internal`.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::VaultError;
use crate::models::{SearchMode, SearchResult};
use crate::service::{SearchOptions, VaultService};

#[derive(Clone)]
struct AppState {
    service: Arc<VaultService>,
}

/// Start the tool server on the configured bind address. The service (and
/// with it the graph-store lock and lazily loaded models) lives for the
/// whole server lifetime.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let service = Arc::new(VaultService::open_for_index(config.clone()).await?);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/tools/search", post(handle_search))
        .route("/tools/index", post(handle_index))
        .route("/tools/status", get(handle_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { service });

    tracing::info!(bind = %bind_addr, "tool server listening");
    println!("mdvault tool server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error responses ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

fn error_response(err: VaultError) -> Response {
    let (status, code) = match &err {
        VaultError::Config(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        VaultError::IndexMissing(_) => (StatusCode::NOT_FOUND, "index_missing"),
        VaultError::ModelMismatch { .. } => (StatusCode::CONFLICT, "model_mismatch"),
        VaultError::Cancelled => (StatusCode::REQUEST_TIMEOUT, "cancelled"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    (
        status,
        Json(ErrorBody {
            error: ErrorDetail {
                code,
                message: err.to_string(),
            },
        }),
    )
        .into_response()
}

// ============ /tools/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    rerank: Option<bool>,
    #[serde(default)]
    expand: Option<bool>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Response {
    let mode = match request.mode.as_deref().unwrap_or("hybrid").parse::<SearchMode>() {
        Ok(mode) => mode,
        Err(e) => return error_response(e),
    };
    let options = SearchOptions {
        mode,
        top_k: request.top_k,
        rerank: request.rerank.unwrap_or(true),
        expand: request.expand.unwrap_or(true),
        deadline: None,
    };

    match state.service.search(&request.query, &options).await {
        Ok(results) => Json(SearchResponse { results }).into_response(),
        Err(e) => error_response(e),
    }
}

// ============ /tools/index ============

#[derive(Deserialize)]
struct IndexRequest {
    directory: PathBuf,
}

async fn handle_index(
    State(state): State<AppState>,
    Json(request): Json<IndexRequest>,
) -> Response {
    match state.service.index(&request.directory, None).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(e),
    }
}

// ============ /tools/status ============

async fn handle_status(State(state): State<AppState>) -> Response {
    match state.service.status().await {
        Ok(Some(stats)) => Json(stats).into_response(),
        Ok(None) => Json(serde_json::json!({ "indexed": false })).into_response(),
        Err(e) => error_response(e),
    }
}

// ============ /health ============

async fn handle_health() -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}
