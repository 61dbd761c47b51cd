use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sluice_core::{ExternalRef, TransformResult, delivery_file_name};
use sluice_store::{ObjectStore, StoreError};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::timeout::bounded;

/// Writes derived values to their destination.
///
/// Every call writes a new object under a fresh key; nothing is overwritten
/// and failed writes are not retried here.
#[derive(Clone)]
pub struct DeliveryForwarder {
    objects: Arc<dyn ObjectStore>,
    call_timeout: Duration,
}

impl std::fmt::Debug for DeliveryForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryForwarder")
            .field("scheme", &self.objects.scheme())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl DeliveryForwarder {
    pub fn new(objects: Arc<dyn ObjectStore>, call_timeout: Duration) -> Self {
        Self {
            objects,
            call_timeout,
        }
    }

    /// Write `result.derived_value` as JSON and return where it landed.
    #[instrument(skip(self, result), fields(destination = %result.destination))]
    pub async fn deliver(&self, result: &TransformResult) -> Result<ExternalRef, DeliveryError> {
        let destination = &result.destination;
        let scheme = self.objects.scheme();
        if let Some(wanted) = &destination.scheme {
            if wanted != scheme {
                return Err(DeliveryError::Destination(format!(
                    "{destination} cannot be written by a {scheme} store"
                )));
            }
        }

        let body = serde_json::to_vec(&result.derived_value)
            .map_err(|e| DeliveryError::Serialization(e.to_string()))?;
        let key = destination.key_for(&delivery_file_name(Uuid::new_v4()));

        bounded(
            self.call_timeout,
            self.objects
                .put(&destination.bucket, &key, Bytes::from(body), "application/json"),
            StoreError::Timeout,
        )
        .await?;

        let location = ExternalRef::new(scheme, destination.bucket.clone(), key);
        info!(location = %location, "result delivered");
        Ok(location)
    }
}
