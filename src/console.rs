//! Operator HTTP console.
//!
//! A small JSON API for progress visibility and manual index operations,
//! served next to the stdio surface:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness check (returns version) |
//! | `GET`  | `/status` | Index status for the workspace |
//! | `GET`  | `/progress` | Tail of the JSON-lines progress log (`?tail=N`) |
//! | `POST` | `/index` | Start an index update (`{"reindex_all": bool}`) |
//! | `POST` | `/cancel` | Request cancellation of the running update |
//! | `POST` | `/reinitialize` | Delete all rows for the workspace+model |
//!
//! `POST /index` returns 202 immediately and the run continues in the
//! background; a second request while one is running gets 409 with code
//! `busy`. Error responses all use the same body shape:
//!
//! ```json
//! { "error": { "code": "busy", "message": "an index update is already running" } }
//! ```

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::error::Error;
use crate::indexer::{IndexEngine, IndexOptions};

#[derive(Clone)]
struct AppState {
    engine: Arc<IndexEngine>,
}

/// Start the console and serve until the process exits.
pub async fn run_console(engine: Arc<IndexEngine>, bind: &str) -> anyhow::Result<()> {
    let state = AppState { engine };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/progress", get(handle_progress))
        .route("/index", post(handle_index))
        .route("/cancel", post(handle_cancel))
        .route("/reinitialize", post(handle_reinitialize))
        .layer(cors)
        .with_state(state);

    info!("console listening on http://{bind}");
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Error responses ──────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::Busy => AppError {
                status: StatusCode::CONFLICT,
                code: "busy".to_string(),
                message: err.to_string(),
            },
            Error::Config(_) => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "config".to_string(),
                message: err.to_string(),
            },
            other => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal".to_string(),
                message: other.to_string(),
            },
        }
    }
}

// ── GET /health ──────────────────────────────────────────────────────────

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

// ── GET /status ──────────────────────────────────────────────────────────

async fn handle_status(
    State(state): State<AppState>,
) -> Result<Json<crate::models::StatusReport>, AppError> {
    Ok(Json(state.engine.status().await?))
}

// ── GET /progress ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ProgressQuery {
    /// Number of trailing log lines to return.
    #[serde(default = "default_tail")]
    tail: usize,
}

fn default_tail() -> usize {
    50
}

#[derive(Serialize)]
struct ProgressResponse {
    events: Vec<serde_json::Value>,
}

async fn handle_progress(
    State(state): State<AppState>,
    Query(query): Query<ProgressQuery>,
) -> Json<ProgressResponse> {
    let content =
        std::fs::read_to_string(state.engine.progress_log_path()).unwrap_or_default();
    let events: Vec<serde_json::Value> = content
        .lines()
        .rev()
        .take(query.tail)
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    Json(ProgressResponse { events })
}

// ── POST /index ──────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct IndexRequest {
    #[serde(default)]
    reindex_all: bool,
}

#[derive(Serialize)]
struct IndexStarted {
    started: bool,
    reindex_all: bool,
}

async fn handle_index(
    State(state): State<AppState>,
    body: Option<Json<IndexRequest>>,
) -> Result<(StatusCode, Json<IndexStarted>), AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let options = IndexOptions {
        reindex_all: request.reindex_all,
    };

    // The busy check is synchronous; the run itself continues after this
    // response is sent, observable through /progress.
    state.engine.start_update(options, None)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IndexStarted {
            started: true,
            reindex_all: request.reindex_all,
        }),
    ))
}

// ── POST /cancel ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CancelResponse {
    cancel_requested: bool,
}

async fn handle_cancel(State(state): State<AppState>) -> Json<CancelResponse> {
    state.engine.cancel();
    Json(CancelResponse {
        cancel_requested: true,
    })
}

// ── POST /reinitialize ───────────────────────────────────────────────────

#[derive(Serialize)]
struct ReinitializeResponse {
    reinitialized: bool,
}

async fn handle_reinitialize(
    State(state): State<AppState>,
) -> Result<Json<ReinitializeResponse>, AppError> {
    state.engine.reinitialize().await?;
    Ok(Json(ReinitializeResponse {
        reinitialized: true,
    }))
}
