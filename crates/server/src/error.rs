use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sluice_pipeline::{ProvisionError, RouteError};
use thiserror::Error;

/// Errors that can occur when running the Sluice server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The request body could not be decoded.
    #[error("{0}")]
    BadRequest(String),

    /// A submission was rejected or could not be routed.
    #[error(transparent)]
    Route(#[from] RouteError),

    /// A configuration update was rejected or could not be stored.
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_)
            | Self::Route(RouteError::Validation(_))
            | Self::Provision(ProvisionError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Route(RouteError::Unauthorized) | Self::Provision(ProvisionError::Unauthorized) => {
                StatusCode::FORBIDDEN
            }
            Self::Config(_)
            | Self::Io(_)
            | Self::Route(RouteError::DeliveryFailure { .. })
            | Self::Provision(ProvisionError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
