//! Read-only status endpoints.
//!
//! - `GET /health` - liveness and version
//! - `GET /status` - the most recent scheduler tick report, `null` before the first tick

use axum::extract::State;
use axum::http::Method;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use subpay::scheduler::TickReport;
use tokio::sync::watch;
use tower_http::cors;

/// Shared state for the status endpoints.
pub type StatusState = watch::Receiver<Option<TickReport>>;

/// `GET /status` response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Service version.
    pub version: &'static str,
    /// Latest completed tick.
    pub last_tick: Option<TickReport>,
}

/// Builds the status router around the scheduler's report channel.
pub fn status_router(reports: StatusState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(reports)
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET])
                .allow_headers(cors::Any),
        )
}

/// `GET /health` - Liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /status` - Latest tick report.
pub async fn status(State(reports): State<StatusState>) -> Json<StatusResponse> {
    let last_tick = reports.borrow().clone();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        last_tick,
    })
}
