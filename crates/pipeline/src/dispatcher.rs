use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_core::{
    AccountId, BatchItemFailure, BatchResponse, DestinationRef, ExternalRef, IngestMessage,
    QueueEvent, TransformResult,
};
use sluice_expr::{Engine, Program, TransformError};
use sluice_store::{ConfigStore, ObjectStore, StoreError};
use tracing::{Span, debug, field, info, instrument, warn};

use crate::Collaborators;
use crate::auth::AuthGate;
use crate::delivery::DeliveryForwarder;
use crate::error::DeliveryError;
use crate::metrics::PipelineMetrics;
use crate::queue::{Delivery, PollSettings, QueueAdapter};
use crate::timeout::bounded;

/// Why a message was dropped without delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The body, account or referenced blob could not be decoded or found.
    Malformed,
    /// Credential re-verification denied the message.
    Unauthorized,
    /// The account has no usable destination or expression.
    Unconfigured,
    /// The expression failed to compile or evaluate.
    TransformFailed,
    /// The destination cannot be written by this deployment.
    Undeliverable,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Malformed => "malformed",
            Self::Unauthorized => "unauthorized",
            Self::Unconfigured => "unconfigured",
            Self::TransformFailed => "transform_failed",
            Self::Undeliverable => "undeliverable",
        })
    }
}

/// The outcome of processing one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The derived value was written to `location`.
    Delivered { location: ExternalRef },
    /// Processing can never succeed; the message is discarded.
    Dropped(DropReason),
    /// A transient failure; the message should be redelivered.
    Retry { error: String },
}

impl Disposition {
    /// Terminal outcomes are acknowledged; retries are not.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Retry { .. })
    }
}

fn dropped(reason: DropReason) -> Disposition {
    Disposition::Dropped(reason)
}

fn retry(error: impl fmt::Display) -> Disposition {
    Disposition::Retry {
        error: error.to_string(),
    }
}

/// Timeouts and switches for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Bound on every individual store call.
    pub call_timeout: Duration,
    /// Bound on processing one message end to end. Keep it below the
    /// queue's visibility timeout.
    pub processing_deadline: Duration,
    /// Re-check the message's API key before transforming.
    pub verify_credentials: bool,
    /// Compiled expressions kept in memory.
    pub cache_capacity: u64,
    pub poll: PollSettings,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            processing_deadline: Duration::from_secs(45),
            verify_credentials: false,
            cache_capacity: 1_000,
            poll: PollSettings::default(),
        }
    }
}

/// What happened to one message of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOutcome {
    pub message_id: String,
    pub disposition: Disposition,
    /// Whether the message was removed from the queue.
    pub acked: bool,
}

/// Per-message results of [`TransformDispatcher::process_batch`], in batch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub outcomes: Vec<MessageOutcome>,
}

impl BatchReport {
    pub fn delivered(&self) -> usize {
        self.count(|d| matches!(d, Disposition::Delivered { .. }))
    }

    pub fn dropped(&self) -> usize {
        self.count(|d| matches!(d, Disposition::Dropped(_)))
    }

    pub fn retried(&self) -> usize {
        self.count(|d| matches!(d, Disposition::Retry { .. }))
    }

    fn count(&self, pred: impl Fn(&Disposition) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.disposition)).count()
    }
}

/// Turns queued messages into delivered results.
///
/// Each message is handled on its own: its payload is resolved (fetching
/// externalized blobs), the account's configuration is looked up, the
/// expression is evaluated and the result written to the destination.
/// Failures are classified into a [`Disposition`] rather than returned.
pub struct TransformDispatcher {
    queue: QueueAdapter,
    gate: AuthGate,
    configs: Arc<dyn ConfigStore>,
    objects: Arc<dyn ObjectStore>,
    forwarder: DeliveryForwarder,
    engine: Engine,
    programs: Cache<String, Arc<Program>>,
    settings: DispatchSettings,
    metrics: Arc<PipelineMetrics>,
}

impl fmt::Debug for TransformDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformDispatcher")
            .field("settings", &self.settings)
            .field("engine", &self.engine)
            .field("cached_programs", &self.programs.entry_count())
            .finish_non_exhaustive()
    }
}

impl TransformDispatcher {
    pub fn new(
        collaborators: &Collaborators,
        engine: Engine,
        settings: DispatchSettings,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let call_timeout = settings.call_timeout;
        Self {
            queue: QueueAdapter::new(
                Arc::clone(&collaborators.queue),
                settings.poll.clone(),
                call_timeout,
            ),
            gate: AuthGate::new(Arc::clone(&collaborators.credentials), call_timeout),
            configs: Arc::clone(&collaborators.configs),
            objects: Arc::clone(&collaborators.objects),
            forwarder: DeliveryForwarder::new(Arc::clone(&collaborators.objects), call_timeout),
            engine,
            programs: Cache::new(settings.cache_capacity),
            settings,
            metrics,
        }
    }

    /// The adapter this dispatcher acknowledges through.
    pub fn queue(&self) -> &QueueAdapter {
        &self.queue
    }

    /// Process one message. Never fails; the outcome says what to do next.
    ///
    /// A polled delivery is bounded by whatever is left of its visibility
    /// window as well as the processing deadline. One whose window has
    /// already run out is left for redelivery untouched.
    pub async fn process(&self, delivery: &Delivery) -> Disposition {
        self.metrics.increment_messages_processed();
        let disposition = match delivery.remaining(&self.settings.poll) {
            None => retry("visibility window closed before processing started"),
            Some(remaining) => {
                let deadline = remaining.min(self.settings.processing_deadline);
                match tokio::time::timeout(deadline, self.run(delivery)).await {
                    Ok(Ok(location)) => Disposition::Delivered { location },
                    Ok(Err(disposition)) => disposition,
                    Err(_) => retry(format!("processing exceeded {deadline:?}")),
                }
            }
        };
        self.record(&delivery.message_id, &disposition);
        disposition
    }

    /// Process deliveries one after another, acknowledging terminal outcomes.
    pub async fn process_batch(&self, deliveries: &[Delivery]) -> BatchReport {
        let mut outcomes = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            let disposition = self.process(delivery).await;
            let acked = disposition.is_terminal() && self.ack(delivery).await;
            outcomes.push(MessageOutcome {
                message_id: delivery.message_id.clone(),
                disposition,
                acked,
            });
        }
        BatchReport { outcomes }
    }

    /// Entry point for platform-triggered invocations.
    ///
    /// Nothing is acknowledged here; the platform removes every record not
    /// listed in the returned failures.
    pub async fn handle_event(&self, event: QueueEvent) -> BatchResponse {
        let mut batch_item_failures = Vec::new();
        for record in event.records {
            let delivery = Delivery::from(record);
            if let Disposition::Retry { .. } = self.process(&delivery).await {
                batch_item_failures.push(BatchItemFailure {
                    item_identifier: delivery.message_id,
                });
            }
        }
        BatchResponse {
            batch_item_failures,
        }
    }

    async fn ack(&self, delivery: &Delivery) -> bool {
        if delivery.receipt.is_none() {
            return false;
        }
        match self.queue.ack(delivery).await {
            Ok(()) => true,
            Err(e) => {
                warn!(message_id = %delivery.message_id, error = %e, "failed to acknowledge message");
                false
            }
        }
    }

    fn record(&self, message_id: &str, disposition: &Disposition) {
        match disposition {
            Disposition::Delivered { location } => {
                self.metrics.increment_delivered();
                info!(message_id = %message_id, location = %location, "message delivered");
            }
            Disposition::Dropped(reason) => {
                match reason {
                    DropReason::Malformed => self.metrics.increment_dropped_malformed(),
                    DropReason::Unauthorized => self.metrics.increment_dropped_unauthorized(),
                    DropReason::Unconfigured => self.metrics.increment_dropped_unconfigured(),
                    DropReason::TransformFailed => self.metrics.increment_dropped_transform(),
                    DropReason::Undeliverable => self.metrics.increment_dropped_undeliverable(),
                }
                warn!(message_id = %message_id, reason = %reason, "message dropped");
            }
            Disposition::Retry { error } => {
                self.metrics.increment_retried();
                warn!(message_id = %message_id, error = %error, "message left for redelivery");
            }
        }
    }

    #[instrument(skip_all, fields(message_id = %delivery.message_id, account_id = field::Empty))]
    async fn run(&self, delivery: &Delivery) -> Result<ExternalRef, Disposition> {
        let message = delivery.message().map_err(|e| {
            warn!(error = %e, "undecodable message body");
            dropped(DropReason::Malformed)
        })?;
        let account_id = message.account_id();
        Span::current().record("account_id", field::display(account_id));
        debug!(kind = message.kind(), "processing message");

        let payload = self.resolve_payload(&message).await?;

        if self.settings.verify_credentials
            && !self.gate.authorize(account_id, message.api_key()).await
        {
            return Err(dropped(DropReason::Unauthorized));
        }

        let (destination, expression) = self.load_config(account_id).await?;

        let program = self.program(&expression).await.map_err(|e| {
            warn!(error = %e, "expression does not compile");
            dropped(DropReason::TransformFailed)
        })?;
        let derived_value = program.evaluate(&payload).map_err(|e| {
            warn!(error = %e, "transform failed");
            dropped(DropReason::TransformFailed)
        })?;

        let result = TransformResult {
            derived_value,
            destination,
        };
        self.forwarder.deliver(&result).await.map_err(|e| match e {
            DeliveryError::Store(e) => retry(format!("delivery failed: {e}")),
            other => {
                warn!(error = %other, "destination is unusable");
                dropped(DropReason::Undeliverable)
            }
        })
    }

    /// The JSON value the expression runs against.
    async fn resolve_payload(&self, message: &IngestMessage) -> Result<Value, Disposition> {
        let (account_id, external_ref) = match message {
            IngestMessage::Inline { data, .. } => return Ok(data.clone()),
            IngestMessage::Reference {
                account_id,
                external_ref,
                ..
            } => (account_id, external_ref),
        };

        if external_ref.scheme != self.objects.scheme() {
            warn!(external_ref = %external_ref, "reference points outside the object store");
            return Err(dropped(DropReason::Malformed));
        }

        let blob = bounded(
            self.settings.call_timeout,
            self.objects.get(&external_ref.bucket, &external_ref.key),
            StoreError::Timeout,
        )
        .await
        .map_err(|e| match e {
            StoreError::NotFound(_) => {
                warn!(external_ref = %external_ref, "referenced blob does not exist");
                dropped(DropReason::Malformed)
            }
            e => retry(format!("fetching {external_ref}: {e}")),
        })?;

        let document: Value = serde_json::from_slice(&blob).map_err(|e| {
            warn!(external_ref = %external_ref, error = %e, "referenced blob is not JSON");
            dropped(DropReason::Malformed)
        })?;

        // Blobs written by the router hold the full envelope.
        match IngestMessage::deserialize(&document) {
            Ok(IngestMessage::Inline {
                account_id: owner,
                data,
                ..
            }) => {
                if owner == *account_id {
                    Ok(data)
                } else {
                    warn!(external_ref = %external_ref, "blob belongs to another account");
                    Err(dropped(DropReason::Malformed))
                }
            }
            _ => Ok(document),
        }
    }

    /// Destination and expression for an account.
    async fn load_config(
        &self,
        account_id: &AccountId,
    ) -> Result<(DestinationRef, String), Disposition> {
        let config = bounded(
            self.settings.call_timeout,
            self.configs.get(account_id),
            StoreError::Timeout,
        )
        .await
        .map_err(|e| retry(format!("config lookup failed: {e}")))?
        .ok_or_else(|| {
            info!("no configuration for account");
            dropped(DropReason::Unconfigured)
        })?;

        if !config.is_complete() {
            info!("configuration is incomplete");
            return Err(dropped(DropReason::Unconfigured));
        }
        let (Some(destination), Some(expression)) =
            (config.destination_ref, config.transform_expression)
        else {
            return Err(dropped(DropReason::Unconfigured));
        };
        let destination = destination.parse::<DestinationRef>().map_err(|e| {
            warn!(error = %e, "configured destination does not parse");
            dropped(DropReason::Unconfigured)
        })?;
        Ok((destination, expression))
    }

    async fn program(&self, expression: &str) -> Result<Arc<Program>, Arc<TransformError>> {
        self.programs
            .try_get_with(expression.to_owned(), async {
                self.engine.compile(expression).map(Arc::new)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use sluice_core::{AccountConfig, AccountCredential};
    use sluice_store::{ConfigStore, CredentialStore, MessageQueue};
    use sluice_store_memory::{
        MemoryConfigStore, MemoryCredentialStore, MemoryObjectStore, MemoryQueue,
    };

    use super::*;

    const OFFLINE_BUCKET: &str = "offline";

    /// Object store in which one bucket cannot be reached.
    struct PartlyOffline(Arc<MemoryObjectStore>);

    #[async_trait]
    impl ObjectStore for PartlyOffline {
        fn scheme(&self) -> &str {
            self.0.scheme()
        }

        async fn put(
            &self,
            bucket: &str,
            key: &str,
            body: Bytes,
            content_type: &str,
        ) -> Result<(), StoreError> {
            if bucket == OFFLINE_BUCKET {
                return Err(StoreError::Connection("bucket unreachable".into()));
            }
            self.0.put(bucket, key, body, content_type).await
        }

        async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
            if bucket == OFFLINE_BUCKET {
                return Err(StoreError::Connection("bucket unreachable".into()));
            }
            self.0.get(bucket, key).await
        }
    }

    /// Config store that takes `delay` to answer every lookup.
    struct SlowConfigs {
        inner: MemoryConfigStore,
        delay: Duration,
    }

    #[async_trait]
    impl ConfigStore for SlowConfigs {
        async fn get(&self, account_id: &AccountId) -> Result<Option<AccountConfig>, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.get(account_id).await
        }

        async fn put(&self, config: &AccountConfig) -> Result<(), StoreError> {
            self.inner.put(config).await
        }
    }

    struct Fixture {
        credentials: Arc<MemoryCredentialStore>,
        configs: Arc<MemoryConfigStore>,
        objects: Arc<MemoryObjectStore>,
        queue: Arc<MemoryQueue>,
        metrics: Arc<PipelineMetrics>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                credentials: Arc::new(MemoryCredentialStore::new()),
                configs: Arc::new(MemoryConfigStore::new()),
                objects: Arc::new(MemoryObjectStore::new()),
                queue: Arc::new(MemoryQueue::new()),
                metrics: Arc::new(PipelineMetrics::default()),
            }
        }

        fn dispatcher(&self, settings: DispatchSettings) -> TransformDispatcher {
            self.dispatcher_with_configs(self.configs.clone(), settings)
        }

        fn dispatcher_with_configs(
            &self,
            configs: Arc<dyn ConfigStore>,
            settings: DispatchSettings,
        ) -> TransformDispatcher {
            let collaborators = Collaborators {
                credentials: self.credentials.clone(),
                configs,
                objects: Arc::new(PartlyOffline(Arc::clone(&self.objects))),
                queue: self.queue.clone(),
            };
            TransformDispatcher::new(
                &collaborators,
                Engine::default(),
                settings,
                Arc::clone(&self.metrics),
            )
        }

        async fn configure(&self, destination: &str, expression: &str) {
            self.configs
                .put(&AccountConfig::new(account(), destination, expression))
                .await
                .unwrap();
        }
    }

    fn account() -> AccountId {
        AccountId::parse("a@x.com").unwrap()
    }

    fn delivery(body: String) -> Delivery {
        Delivery {
            message_id: "m-1".into(),
            receipt: None,
            body,
            received_at: None,
        }
    }

    fn inline(data: Value) -> Delivery {
        let message = IngestMessage::Inline {
            account_id: account(),
            api_key: "key123".into(),
            data,
        };
        delivery(message.to_body().unwrap())
    }

    fn reference(external_ref: ExternalRef) -> Delivery {
        let message = IngestMessage::Reference {
            account_id: account(),
            api_key: "key123".into(),
            external_ref,
        };
        delivery(message.to_body().unwrap())
    }

    #[tokio::test]
    async fn inline_message_is_transformed_and_delivered() {
        let fx = Fixture::new();
        fx.configure("bucket1", ".key").await;
        let d = fx
            .dispatcher(DispatchSettings::default())
            .process(&inline(json!({"key": "value"})))
            .await;

        let Disposition::Delivered { location } = &d else {
            panic!("expected delivery, got {d:?}");
        };
        assert_eq!(location.bucket, "bucket1");
        let body = fx.objects.get("bucket1", &location.key).await.unwrap();
        assert_eq!(&body[..], br#""value""#);
        assert_eq!(fx.metrics.snapshot().delivered, 1);
    }

    #[tokio::test]
    async fn undecodable_body_is_malformed() {
        let fx = Fixture::new();
        let dispatcher = fx.dispatcher(DispatchSettings::default());
        for body in ["nope", r#"{"accountId":"bad","apiKey":"k","data":1}"#, "{}"] {
            assert_eq!(
                dispatcher.process(&delivery(body.to_owned())).await,
                Disposition::Dropped(DropReason::Malformed)
            );
        }
        assert_eq!(fx.metrics.snapshot().dropped_malformed, 3);
    }

    #[tokio::test]
    async fn missing_or_incomplete_config_is_unconfigured() {
        let fx = Fixture::new();
        let dispatcher = fx.dispatcher(DispatchSettings::default());
        assert_eq!(
            dispatcher.process(&inline(json!(1))).await,
            Disposition::Dropped(DropReason::Unconfigured)
        );

        fx.configs
            .put(&AccountConfig {
                account_id: account(),
                destination_ref: Some("bucket1".into()),
                transform_expression: Some("   ".into()),
            })
            .await
            .unwrap();
        assert_eq!(
            dispatcher.process(&inline(json!(1))).await,
            Disposition::Dropped(DropReason::Unconfigured)
        );

        fx.configure("s3://", ".").await;
        assert_eq!(
            dispatcher.process(&inline(json!(1))).await,
            Disposition::Dropped(DropReason::Unconfigured)
        );
    }

    #[tokio::test]
    async fn transform_errors_are_terminal_and_repeatable() {
        let fx = Fixture::new();
        fx.configure("bucket1", ".field.inner").await;
        let dispatcher = fx.dispatcher(DispatchSettings::default());
        let message = inline(json!({"field": "value"}));

        let first = dispatcher.process(&message).await;
        let second = dispatcher.process(&message).await;
        assert_eq!(first, Disposition::Dropped(DropReason::TransformFailed));
        assert_eq!(first, second);
        assert!(fx.objects.is_empty());

        fx.configure("bucket1", "map(").await;
        assert_eq!(
            dispatcher.process(&message).await,
            Disposition::Dropped(DropReason::TransformFailed)
        );
    }

    #[tokio::test]
    async fn reference_is_fetched_and_unwrapped() {
        let fx = Fixture::new();
        fx.configure("bucket1/out", ".items | length").await;
        let envelope = IngestMessage::Inline {
            account_id: account(),
            api_key: "key123".into(),
            data: json!({"items": [1, 2, 3]}),
        };
        fx.objects
            .put(
                "overflow",
                "ingestion_data/a@x.com/1.json",
                envelope.to_body().unwrap().into(),
                "application/json",
            )
            .await
            .unwrap();

        let d = fx
            .dispatcher(DispatchSettings::default())
            .process(&reference(ExternalRef::new(
                "s3",
                "overflow",
                "ingestion_data/a@x.com/1.json",
            )))
            .await;
        let Disposition::Delivered { location } = &d else {
            panic!("expected delivery, got {d:?}");
        };
        assert!(location.key.starts_with("out/transformed_data_"));
        let body = fx.objects.get("bucket1", &location.key).await.unwrap();
        assert_eq!(&body[..], b"3");
    }

    #[tokio::test]
    async fn bare_blob_document_is_the_payload() {
        let fx = Fixture::new();
        fx.configure("bucket1", ".name").await;
        fx.objects
            .put("overflow", "doc.json", br#"{"name":"n"}"#.to_vec().into(), "application/json")
            .await
            .unwrap();

        let d = fx
            .dispatcher(DispatchSettings::default())
            .process(&reference(ExternalRef::new("s3", "overflow", "doc.json")))
            .await;
        assert!(matches!(d, Disposition::Delivered { .. }));
    }

    #[tokio::test]
    async fn unreachable_blob_is_retried_and_missing_or_bad_blob_dropped() {
        let fx = Fixture::new();
        fx.configure("bucket1", ".").await;
        let dispatcher = fx.dispatcher(DispatchSettings::default());

        let unreachable = dispatcher
            .process(&reference(ExternalRef::new("s3", OFFLINE_BUCKET, "a.json")))
            .await;
        assert!(matches!(unreachable, Disposition::Retry { .. }));

        for _ in 0..2 {
            assert_eq!(
                dispatcher
                    .process(&reference(ExternalRef::new("s3", "overflow", "gone.json")))
                    .await,
                Disposition::Dropped(DropReason::Malformed)
            );
        }

        fx.objects
            .put("overflow", "bad.json", b"{not json".to_vec().into(), "application/json")
            .await
            .unwrap();
        assert_eq!(
            dispatcher
                .process(&reference(ExternalRef::new("s3", "overflow", "bad.json")))
                .await,
            Disposition::Dropped(DropReason::Malformed)
        );
    }

    #[tokio::test]
    async fn blob_for_another_account_is_malformed() {
        let fx = Fixture::new();
        fx.configure("bucket1", ".").await;
        let foreign = IngestMessage::Inline {
            account_id: AccountId::parse("b@x.com").unwrap(),
            api_key: "other".into(),
            data: json!(1),
        };
        fx.objects
            .put("overflow", "b.json", foreign.to_body().unwrap().into(), "application/json")
            .await
            .unwrap();

        let d = fx
            .dispatcher(DispatchSettings::default())
            .process(&reference(ExternalRef::new("s3", "overflow", "b.json")))
            .await;
        assert_eq!(d, Disposition::Dropped(DropReason::Malformed));
    }

    #[tokio::test]
    async fn credential_reverification_is_optional() {
        let fx = Fixture::new();
        fx.configure("bucket1", ".").await;
        let message = inline(json!(1));

        let lenient = fx.dispatcher(DispatchSettings::default());
        assert!(matches!(
            lenient.process(&message).await,
            Disposition::Delivered { .. }
        ));

        let strict = fx.dispatcher(DispatchSettings {
            verify_credentials: true,
            ..DispatchSettings::default()
        });
        assert_eq!(
            strict.process(&message).await,
            Disposition::Dropped(DropReason::Unauthorized)
        );

        fx.credentials
            .put(&AccountCredential::new(account(), "key123"))
            .await
            .unwrap();
        assert!(matches!(
            strict.process(&message).await,
            Disposition::Delivered { .. }
        ));
    }

    #[tokio::test]
    async fn foreign_destination_scheme_is_undeliverable() {
        let fx = Fixture::new();
        fx.configure("gs://bucket1", ".").await;
        let d = fx
            .dispatcher(DispatchSettings::default())
            .process(&inline(json!(1)))
            .await;
        assert_eq!(d, Disposition::Dropped(DropReason::Undeliverable));
    }

    #[tokio::test]
    async fn batch_acks_terminal_outcomes_only() {
        let fx = Fixture::new();
        fx.configure("bucket1", ".").await;
        let good = IngestMessage::Inline {
            account_id: account(),
            api_key: "key123".into(),
            data: json!({"a": 1}),
        };
        let unreachable_blob = IngestMessage::Reference {
            account_id: account(),
            api_key: "key123".into(),
            external_ref: ExternalRef::new("s3", OFFLINE_BUCKET, "a.json"),
        };
        fx.queue.send(&good.to_body().unwrap()).await.unwrap();
        fx.queue.send("garbage").await.unwrap();
        fx.queue.send(&unreachable_blob.to_body().unwrap()).await.unwrap();

        let dispatcher = fx.dispatcher(DispatchSettings {
            poll: PollSettings {
                wait_time: Duration::ZERO,
                ..PollSettings::default()
            },
            ..DispatchSettings::default()
        });
        let batch: Vec<Delivery> = dispatcher.queue().poll().await.unwrap().collect();
        let report = dispatcher.process_batch(&batch).await;

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.delivered(), 1);
        assert_eq!(report.dropped(), 1);
        assert_eq!(report.retried(), 1);
        let acked: Vec<bool> = report.outcomes.iter().map(|o| o.acked).collect();
        assert_eq!(acked, [true, true, false]);
        assert_eq!(fx.queue.len().await, 1);
    }

    #[tokio::test]
    async fn handle_event_reports_retries() {
        let fx = Fixture::new();
        fx.configure("bucket1", ".").await;
        let event: QueueEvent = serde_json::from_value(json!({
            "Records": [
                {"messageId": "ok", "receiptHandle": "r1", "body": inline(json!(1)).body},
                {"messageId": "bad", "receiptHandle": "r2", "body": "garbage"},
                {
                    "messageId": "later",
                    "receiptHandle": "r3",
                    "body": reference(ExternalRef::new("s3", OFFLINE_BUCKET, "a.json")).body
                }
            ]
        }))
        .unwrap();

        let response = fx
            .dispatcher(DispatchSettings::default())
            .handle_event(event)
            .await;
        assert_eq!(
            response,
            BatchResponse {
                batch_item_failures: vec![BatchItemFailure {
                    item_identifier: "later".into()
                }]
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn batch_processing_stops_before_the_visibility_window_closes() {
        let fx = Fixture::new();
        let configs = Arc::new(SlowConfigs {
            inner: MemoryConfigStore::new(),
            delay: Duration::from_secs(9),
        });
        configs
            .put(&AccountConfig::new(account(), "bucket1", "."))
            .await
            .unwrap();
        for i in 0..10 {
            fx.queue.send(&inline(json!(i)).body).await.unwrap();
        }

        // Window is 60s minus a 5s ack margin; each message costs 9s.
        let dispatcher = fx.dispatcher_with_configs(
            configs,
            DispatchSettings {
                poll: PollSettings {
                    wait_time: Duration::ZERO,
                    ..PollSettings::default()
                },
                ..DispatchSettings::default()
            },
        );
        let batch: Vec<Delivery> = dispatcher.queue().poll().await.unwrap().collect();
        assert_eq!(batch.len(), 10);
        let report = dispatcher.process_batch(&batch).await;

        assert_eq!(report.delivered(), 6);
        assert_eq!(report.retried(), 4);
        for outcome in &report.outcomes {
            assert_eq!(outcome.acked, outcome.disposition.is_terminal());
        }
        assert_eq!(fx.objects.keys("bucket1").len(), 6);

        tokio::time::advance(Duration::from_secs(10)).await;
        let redelivered = fx
            .queue
            .receive(10, Duration::ZERO, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(redelivered.len(), 4);
    }

    #[tokio::test]
    async fn compiled_programs_are_cached() {
        let fx = Fixture::new();
        fx.configure("bucket1", ".a").await;
        let dispatcher = fx.dispatcher(DispatchSettings::default());
        for _ in 0..3 {
            dispatcher.process(&inline(json!({"a": 1}))).await;
        }
        dispatcher.programs.run_pending_tasks().await;
        assert_eq!(dispatcher.programs.entry_count(), 1);
        assert_eq!(fx.objects.keys("bucket1").len(), 3);
    }
}
