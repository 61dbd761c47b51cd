pub mod config;
pub mod health;
pub mod ingest;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use sluice_pipeline::Pipeline;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ServerError;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The wired pipeline.
    pub pipeline: Arc<Pipeline>,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

/// Build the Axum router with all API routes and middleware.
pub fn router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_body_bytes);
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .route("/v1/ingest", post(ingest::ingest))
        .route("/v1/config", put(config::put_config))
        .with_state(state)
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Decode a JSON body regardless of its declared content type.
///
/// Producers post raw JSON without headers, so axum's `Json` extractor is
/// too strict here.
pub(crate) fn decode_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ServerError> {
    serde_json::from_slice(body)
        .map_err(|e| ServerError::BadRequest(format!("request body is not valid JSON: {e}")))
}
