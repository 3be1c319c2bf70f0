//! Read-only admin surface.
//!
//! Serves liveness and a copy-out view of the engine's caches. The
//! reconciler owns the caches; everything here reads the snapshot it
//! publishes after each tick, so the admin surface never touches shared
//! state.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;

use crate::reconciler::EngineStatus;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
}

/// Build the admin router over the engine's status snapshot.
pub fn routes(status: watch::Receiver<EngineStatus>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(engine_status))
        .with_state(status)
}

/// Liveness probe: 200 whenever the process is up.
async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "reaper".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// The last published engine snapshot.
async fn engine_status(
    State(status): State<watch::Receiver<EngineStatus>>,
) -> Json<EngineStatus> {
    Json(status.borrow().clone())
}
