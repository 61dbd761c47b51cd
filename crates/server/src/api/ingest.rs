use axum::Json;
use axum::extract::State;
use bytes::Bytes;
use serde::Serialize;
use sluice_pipeline::{EnqueueOutcome, SubmitRequest};

use super::{AppState, decode_body};
use crate::error::ServerError;

/// Body of a successful `POST /v1/ingest`.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub outcome: EnqueueOutcome,
}

/// `POST /v1/ingest` -- authenticate a submission and queue it.
pub async fn ingest(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IngestResponse>, ServerError> {
    let request: SubmitRequest = decode_body(&body)?;
    let outcome = state.pipeline.router().route(request).await?;
    Ok(Json(IngestResponse {
        status: "queued",
        outcome,
    }))
}
