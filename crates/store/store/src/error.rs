use std::time::Duration;

use thiserror::Error;

/// Errors from credential, configuration and object store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Throttled(_) | Self::Timeout(_)
        )
    }
}

/// Errors from message queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message of {size} bytes exceeds the {limit} byte queue limit")]
    TooLarge { size: usize, limit: usize },

    #[error("receipt is stale or unknown: {0}")]
    InvalidReceipt(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl QueueError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Throttled(_) | Self::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(StoreError::Throttled("slow down".into()).is_transient());
        assert!(!StoreError::NotFound("k".into()).is_transient());
        assert!(!StoreError::Serialization("bad".into()).is_transient());

        assert!(QueueError::Connection("reset".into()).is_transient());
        assert!(!QueueError::TooLarge { size: 2, limit: 1 }.is_transient());
        assert!(!QueueError::InvalidReceipt("r".into()).is_transient());
    }

    #[test]
    fn too_large_message() {
        let err = QueueError::TooLarge {
            size: 300_000,
            limit: 262_144,
        };
        assert_eq!(
            err.to_string(),
            "message of 300000 bytes exceeds the 262144 byte queue limit"
        );
    }
}
