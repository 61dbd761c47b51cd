use sluice_store::{QueueError, StoreError};
use thiserror::Error;

use crate::config::DEFAULT_OPERATION_TIMEOUT;

/// Errors specific to AWS backend operations.
#[derive(Debug, Error)]
pub enum AwsBackendError {
    /// The AWS SDK returned an error from the service.
    #[error("AWS service error: {0}")]
    ServiceError(String),

    /// The request was throttled by the AWS service.
    #[error("AWS request throttled")]
    Throttled,

    /// A network or connection error occurred communicating with AWS.
    #[error("AWS connection error: {0}")]
    Connection(String),

    /// The request timed out.
    #[error("AWS request timed out")]
    Timeout,

    /// A stored record or response did not have the expected shape.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl From<AwsBackendError> for StoreError {
    fn from(err: AwsBackendError) -> Self {
        match err {
            AwsBackendError::ServiceError(msg) => StoreError::Backend(msg),
            AwsBackendError::Throttled => StoreError::Throttled("AWS request throttled".to_owned()),
            AwsBackendError::Connection(msg) => StoreError::Connection(msg),
            AwsBackendError::Timeout => StoreError::Timeout(DEFAULT_OPERATION_TIMEOUT),
            AwsBackendError::InvalidData(msg) => StoreError::Serialization(msg),
        }
    }
}

impl From<AwsBackendError> for QueueError {
    fn from(err: AwsBackendError) -> Self {
        match err {
            AwsBackendError::ServiceError(msg) => QueueError::Backend(msg),
            AwsBackendError::Throttled => QueueError::Throttled("AWS request throttled".to_owned()),
            AwsBackendError::Connection(msg) => QueueError::Connection(msg),
            AwsBackendError::Timeout => QueueError::Timeout(DEFAULT_OPERATION_TIMEOUT),
            AwsBackendError::InvalidData(msg) => QueueError::Serialization(msg),
        }
    }
}

/// Classify an AWS SDK error string into the appropriate [`AwsBackendError`].
///
/// This helper inspects the error message for common patterns (throttling,
/// timeout, connection) and maps them to the correct variant.
pub fn classify_sdk_error(error_str: &str) -> AwsBackendError {
    let lower = error_str.to_lowercase();
    if lower.contains("throttl") || lower.contains("rate exceed") || lower.contains("too many") {
        AwsBackendError::Throttled
    } else if lower.contains("timeout") || lower.contains("timed out") {
        AwsBackendError::Timeout
    } else if lower.contains("connection")
        || lower.contains("connect")
        || lower.contains("dns")
        || lower.contains("network")
        || lower.contains("dispatch failure")
    {
        AwsBackendError::Connection(error_str.to_owned())
    } else {
        AwsBackendError::ServiceError(error_str.to_owned())
    }
}
