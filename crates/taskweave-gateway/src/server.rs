//! HTTP surface over the orchestrator
//!
//!   POST /route                 {query, file_path?} -> {run_id, plan_id}
//!   POST /runs/:run_id/start    -> {} (202)
//!   POST /runs/:run_id/cancel   -> {}
//!   GET  /runs/:run_id          -> run view (state, nodes, artifacts)
//!   GET  /metrics               -> engine counters
//!   GET  /health                -> {ok, version, tools_available}

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use taskweave_core::{Error, Query};
use taskweave_engine::Orchestrator;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub port: u16,
    pub bind: BindMode,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8180,
            bind: BindMode::Loopback,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub enum BindMode {
    #[default]
    Loopback,
    Lan,
}

impl BindMode {
    pub fn to_addr(&self) -> &str {
        match self {
            BindMode::Loopback => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "lan" | "0.0.0.0" => BindMode::Lan,
            _ => BindMode::Loopback,
        }
    }
}

pub struct AppState {
    pub orchestrator: Orchestrator,
}

pub async fn start_gateway(config: GatewayConfig, orchestrator: Orchestrator) -> anyhow::Result<()> {
    let state = Arc::new(AppState { orchestrator });

    let app = Router::new()
        .route("/route", post(route_handler))
        .route("/runs/:run_id/start", post(start_handler))
        .route("/runs/:run_id/cancel", post(cancel_handler))
        .route("/runs/:run_id", get(run_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.bind.to_addr(), config.port)
        .parse()
        .expect("invalid bind address");

    info!("taskweave gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RouteRequest {
    query: String,
    #[serde(default)]
    file_path: Option<String>,
}

async fn route_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RouteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let query = Query {
        text: req.query,
        file_path: req.file_path,
    };
    let submission = state.orchestrator.submit(&query).await?;
    Ok(Json(submission))
}

async fn start_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(run_id): AxumPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.orchestrator.start(&run_id).await?;
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({}))))
}

async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(run_id): AxumPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.orchestrator.cancel(&run_id).await?;
    Ok(Json(serde_json::json!({})))
}

async fn run_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(run_id): AxumPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.orchestrator.status(&run_id).await?;
    Ok(Json(view))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.metrics_snapshot())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "tools_available": state.orchestrator.index().available_count(),
    }))
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            // Router/planner rejections: the query is the problem.
            Error::AmbiguousFlow(_) | Error::Plan(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Store(msg) if msg.starts_with("unknown") => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "error": { "kind": self.0.kind(), "message": self.0.to_string() }
        }));
        (status, body).into_response()
    }
}
