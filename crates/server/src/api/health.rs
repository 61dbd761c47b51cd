use axum::Json;
use axum::extract::State;
use serde::Serialize;
use sluice_pipeline::MetricsSnapshot;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// `GET /health` -- liveness check.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// `GET /metrics` -- pipeline counters.
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.pipeline.metrics().snapshot())
}
