use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_core::{AccountId, ExternalRef, INLINE_LIMIT_BYTES, IngestMessage, overflow_key};
use sluice_store::{ObjectStore, StoreError};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::AuthGate;
use crate::error::{FailedStage, RouteError};
use crate::metrics::PipelineMetrics;
use crate::queue::QueueAdapter;
use crate::timeout::bounded;

/// A submission as received at the front door.
///
/// Fields are optional so that presence can be validated with a precise
/// error instead of a generic decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitRequest {
    #[serde(default, rename = "accountId", alias = "Email")]
    pub account_id: Option<String>,
    #[serde(default, rename = "apiKey", alias = "APIKey")]
    pub api_key: Option<String>,
    #[serde(default, alias = "Data")]
    pub data: Option<Value>,
}

/// How a submission travelled to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    Inline,
    Overflow,
}

/// The result of a successful [`PayloadRouter::route`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueOutcome {
    pub mode: RouteMode,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
}

/// `null`, `""`, `[]` and `{}` count as absent. `0` and `false` do not.
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn required_text(value: Option<String>, field: &str) -> Result<String, RouteError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(RouteError::Validation(format!("{field} is required"))),
    }
}

/// Validate presence and shape. Never touches a collaborator.
fn validate(request: SubmitRequest) -> Result<(AccountId, String, Value), RouteError> {
    let account = required_text(request.account_id, "accountId")?;
    let api_key = required_text(request.api_key, "apiKey")?;
    let data = match request.data {
        Some(data) if !is_empty_value(&data) => data,
        _ => return Err(RouteError::Validation("data is required".to_owned())),
    };
    let account_id = AccountId::parse(&account)
        .map_err(|e| RouteError::Validation(format!("accountId is invalid: {e}")))?;
    Ok((account_id, api_key, data))
}

/// Validates, authorizes and enqueues submissions, externalizing large
/// payloads to the object store first.
#[derive(Clone)]
pub struct PayloadRouter {
    gate: AuthGate,
    queue: QueueAdapter,
    objects: Arc<dyn ObjectStore>,
    overflow_bucket: String,
    call_timeout: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl std::fmt::Debug for PayloadRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadRouter")
            .field("overflow_bucket", &self.overflow_bucket)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl PayloadRouter {
    pub fn new(
        gate: AuthGate,
        queue: QueueAdapter,
        objects: Arc<dyn ObjectStore>,
        overflow_bucket: impl Into<String>,
        call_timeout: Duration,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            gate,
            queue,
            objects,
            overflow_bucket: overflow_bucket.into(),
            call_timeout,
            metrics,
        }
    }

    /// Route one submission onto the queue.
    #[instrument(skip_all)]
    pub async fn route(&self, request: SubmitRequest) -> Result<EnqueueOutcome, RouteError> {
        self.metrics.increment_requests_received();

        let (account_id, api_key, data) = validate(request).inspect_err(|e| {
            self.metrics.increment_rejected_validation();
            info!(error = %e, "submission rejected");
        })?;

        if !self.gate.authorize(&account_id, &api_key).await {
            self.metrics.increment_rejected_unauthorized();
            warn!(account_id = %account_id, "submission with invalid API key");
            return Err(RouteError::Unauthorized);
        }

        let outcome = self
            .enqueue(account_id.clone(), api_key, data)
            .await
            .inspect_err(|e| {
                self.metrics.increment_route_failures();
                error!(account_id = %account_id, error = %e, "failed to route submission");
            })?;

        match outcome.mode {
            RouteMode::Inline => self.metrics.increment_routed_inline(),
            RouteMode::Overflow => self.metrics.increment_routed_overflow(),
        }
        info!(
            account_id = %account_id,
            message_id = %outcome.message_id,
            mode = ?outcome.mode,
            "submission queued"
        );
        Ok(outcome)
    }

    async fn enqueue(
        &self,
        account_id: AccountId,
        api_key: String,
        data: Value,
    ) -> Result<EnqueueOutcome, RouteError> {
        let envelope = IngestMessage::Inline {
            account_id: account_id.clone(),
            api_key: api_key.clone(),
            data,
        };
        let body = envelope
            .to_body()
            .map_err(|e| RouteError::Validation(format!("data cannot be encoded: {e}")))?;

        if body.len() < INLINE_LIMIT_BYTES {
            let message_id = self
                .queue
                .enqueue_body(&body)
                .await
                .map_err(|e| stage_failure(FailedStage::Enqueue, &e))?;
            return Ok(EnqueueOutcome {
                mode: RouteMode::Inline,
                message_id,
                external_ref: None,
            });
        }

        // The blob must be committed before the reference is enqueued.
        let key = overflow_key(&account_id, Uuid::new_v4());
        bounded(
            self.call_timeout,
            self.objects.put(
                &self.overflow_bucket,
                &key,
                Bytes::from(body),
                "application/json",
            ),
            StoreError::Timeout,
        )
        .await
        .map_err(|e| stage_failure(FailedStage::OverflowWrite, &e))?;

        let external_ref = ExternalRef::new(self.objects.scheme(), self.overflow_bucket.clone(), key);
        let reference = IngestMessage::Reference {
            account_id,
            api_key,
            external_ref: external_ref.clone(),
        };
        let message_id = self
            .queue
            .enqueue(&reference)
            .await
            .map_err(|e| stage_failure(FailedStage::Enqueue, &e))?;

        Ok(EnqueueOutcome {
            mode: RouteMode::Overflow,
            message_id,
            external_ref: Some(external_ref.to_string()),
        })
    }
}

fn stage_failure(stage: FailedStage, err: &dyn std::fmt::Display) -> RouteError {
    RouteError::DeliveryFailure {
        stage,
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(account: Option<&str>, key: Option<&str>, data: Option<Value>) -> SubmitRequest {
        SubmitRequest {
            account_id: account.map(str::to_owned),
            api_key: key.map(str::to_owned),
            data,
        }
    }

    #[test]
    fn empty_values() {
        for v in [json!(null), json!(""), json!([]), json!({})] {
            assert!(is_empty_value(&v), "{v} should be empty");
        }
        for v in [json!(0), json!(false), json!(" "), json!([null]), json!({"a": null})] {
            assert!(!is_empty_value(&v), "{v} should not be empty");
        }
    }

    #[test]
    fn validation_errors_name_the_field() {
        let cases = [
            (request(None, Some("k"), Some(json!(1))), "accountId is required"),
            (request(Some("  "), Some("k"), Some(json!(1))), "accountId is required"),
            (request(Some("a@x.com"), None, Some(json!(1))), "apiKey is required"),
            (request(Some("a@x.com"), Some("k"), None), "data is required"),
            (request(Some("a@x.com"), Some("k"), Some(json!({}))), "data is required"),
        ];
        for (req, expected) in cases {
            match validate(req) {
                Err(RouteError::Validation(msg)) => assert_eq!(msg, expected),
                other => panic!("expected validation error, got {other:?}"),
            }
        }
    }

    #[test]
    fn malformed_account_is_a_validation_error() {
        let err = validate(request(Some("no-at-sign"), Some("k"), Some(json!(1)))).unwrap_err();
        assert!(matches!(err, RouteError::Validation(msg) if msg.starts_with("accountId is invalid")));
    }

    #[test]
    fn validation_normalizes_the_account() {
        let (account, key, data) =
            validate(request(Some(" A@X.COM "), Some("k"), Some(json!(0)))).unwrap();
        assert_eq!(account.as_str(), "A@x.com");
        assert_eq!(key, "k");
        assert_eq!(data, json!(0));
    }

    #[test]
    fn submit_request_accepts_legacy_names() {
        let req: SubmitRequest =
            serde_json::from_str(r#"{"Email":"a@x.com","APIKey":"k","Data":{"x":1}}"#).unwrap();
        assert_eq!(req.account_id.as_deref(), Some("a@x.com"));
        assert_eq!(req.api_key.as_deref(), Some("k"));
        assert_eq!(req.data, Some(json!({"x": 1})));
    }

    #[test]
    fn outcome_serialization() {
        let outcome = EnqueueOutcome {
            mode: RouteMode::Overflow,
            message_id: "m-1".into(),
            external_ref: Some("s3://b/k".into()),
        };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"mode": "overflow", "messageId": "m-1", "externalRef": "s3://b/k"})
        );
        let inline = EnqueueOutcome {
            mode: RouteMode::Inline,
            external_ref: None,
            ..outcome
        };
        assert!(serde_json::to_value(&inline).unwrap().get("externalRef").is_none());
    }
}
