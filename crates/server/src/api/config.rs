use axum::Json;
use axum::extract::State;
use bytes::Bytes;
use serde::Serialize;
use sluice_pipeline::ConfigRequest;

use super::{AppState, decode_body};
use crate::error::ServerError;

/// Body of a successful `PUT /v1/config`. The API key is never echoed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub status: &'static str,
    pub account_id: String,
    pub destination_ref: Option<String>,
    pub transform_expression: Option<String>,
}

/// `PUT /v1/config` -- replace an account's destination and expression.
pub async fn put_config(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ConfigResponse>, ServerError> {
    let request: ConfigRequest = decode_body(&body)?;
    let saved = state.pipeline.provisioner().save_config(request).await?;
    Ok(Json(ConfigResponse {
        status: "saved",
        account_id: saved.account_id.to_string(),
        destination_ref: saved.destination_ref,
        transform_expression: saved.transform_expression,
    }))
}
