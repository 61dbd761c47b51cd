use std::fmt;

use sluice_store::StoreError;
use thiserror::Error;

/// The write that failed while routing a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStage {
    /// Writing the externalized payload to the object store.
    OverflowWrite,
    /// Sending the message to the queue.
    Enqueue,
}

impl fmt::Display for FailedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OverflowWrite => "overflow_write",
            Self::Enqueue => "enqueue",
        })
    }
}

/// Errors returned by [`PayloadRouter::route`](crate::router::PayloadRouter::route).
#[derive(Debug, Error)]
pub enum RouteError {
    /// A required field is missing, empty or malformed.
    #[error("{0}")]
    Validation(String),

    /// The API key does not match the account.
    #[error("invalid API key")]
    Unauthorized,

    /// The payload could not be persisted.
    #[error("{stage} failed: {reason}")]
    DeliveryFailure { stage: FailedStage, reason: String },
}

/// Errors returned by the [`DeliveryForwarder`](crate::delivery::DeliveryForwarder).
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The destination cannot be written by the configured object store.
    #[error("unusable destination: {0}")]
    Destination(String),

    /// The derived value could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The object store write failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Destination(_) | Self::Serialization(_) => false,
        }
    }
}

/// Errors returned by the [`Provisioner`](crate::provisioning::Provisioner).
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid API key")]
    Unauthorized,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn route_error_messages() {
        assert_eq!(RouteError::Unauthorized.to_string(), "invalid API key");
        let err = RouteError::DeliveryFailure {
            stage: FailedStage::OverflowWrite,
            reason: "bucket missing".into(),
        };
        assert_eq!(err.to_string(), "overflow_write failed: bucket missing");
    }

    #[test]
    fn delivery_error_transience_follows_store() {
        let timeout = DeliveryError::from(StoreError::Timeout(Duration::from_secs(1)));
        assert!(timeout.is_transient());
        assert!(!DeliveryError::Destination("gs://b".into()).is_transient());
    }
}
