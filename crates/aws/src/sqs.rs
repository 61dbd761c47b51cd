use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use serde::{Deserialize, Serialize};
use sluice_store::error::QueueError;
use sluice_store::queue::{MessageQueue, ReceivedMessage};
use tracing::{debug, error, instrument, warn};

use crate::auth::load_sdk_config;
use crate::config::AwsBaseConfig;
use crate::error::{AwsBackendError, classify_sdk_error};

/// SQS service maximum for a single message body.
pub const SQS_MAX_MESSAGE_BYTES: usize = 256 * 1024;

/// SQS accepts at most this many messages per receive.
const SQS_MAX_BATCH: usize = 10;

/// SQS long polling waits at most this long.
const SQS_MAX_WAIT_SECS: u64 = 20;

fn default_max_message_bytes() -> usize {
    SQS_MAX_MESSAGE_BYTES
}

/// Configuration for the SQS queue backend.
#[derive(Clone, Serialize, Deserialize)]
pub struct SqsConfig {
    /// Shared AWS configuration (region, role ARN, endpoint URL).
    #[serde(flatten)]
    pub aws: AwsBaseConfig,

    /// URL of the ingestion queue.
    pub queue_url: String,

    /// Largest body accepted by the queue.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl std::fmt::Debug for SqsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsConfig")
            .field("aws", &self.aws)
            .field("queue_url", &self.queue_url)
            .field("max_message_bytes", &self.max_message_bytes)
            .finish()
    }
}

impl SqsConfig {
    /// Create a new `SqsConfig` for the given queue.
    pub fn new(aws: AwsBaseConfig, queue_url: impl Into<String>) -> Self {
        Self {
            aws,
            queue_url: queue_url.into(),
            max_message_bytes: SQS_MAX_MESSAGE_BYTES,
        }
    }

    /// Set the body size ceiling.
    #[must_use]
    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = limit;
        self
    }
}

/// Clamp a receive request to what SQS accepts: `(max_messages, wait_secs, visibility_secs)`.
fn receive_params(max_messages: usize, wait: Duration, visibility: Duration) -> (i32, i32, i32) {
    let max = i32::try_from(max_messages.clamp(1, SQS_MAX_BATCH)).unwrap_or(1);
    let wait = i32::try_from(wait.as_secs().min(SQS_MAX_WAIT_SECS)).unwrap_or(0);
    let visibility = i32::try_from(visibility.as_secs()).unwrap_or(i32::MAX);
    (max, wait, visibility)
}

/// [`MessageQueue`] over an SQS standard queue.
pub struct SqsQueue {
    config: SqsConfig,
    client: aws_sdk_sqs::Client,
}

impl std::fmt::Debug for SqsQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsQueue")
            .field("config", &self.config)
            .field("client", &"<SqsClient>")
            .finish()
    }
}

impl SqsQueue {
    /// Create a new `SqsQueue` by building an AWS SDK client.
    pub async fn new(config: SqsConfig) -> Self {
        let sdk_config = load_sdk_config(&config.aws).await;
        let client = aws_sdk_sqs::Client::new(&sdk_config);
        Self { config, client }
    }

    /// Create an `SqsQueue` with a pre-built client (for testing).
    pub fn with_client(config: SqsConfig, client: aws_sdk_sqs::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    #[instrument(skip(self, body), fields(backend = "aws-sqs", size = body.len()))]
    async fn send(&self, body: &str) -> Result<String, QueueError> {
        let result = self
            .client
            .send_message()
            .queue_url(&self.config.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| {
                let err_str = DisplayErrorContext(&e).to_string();
                error!(error = %err_str, "SQS send_message failed");
                QueueError::from(classify_sdk_error(&err_str))
            })?;

        let message_id = result.message_id.ok_or_else(|| {
            QueueError::from(AwsBackendError::InvalidData(
                "send_message returned no message id".to_owned(),
            ))
        })?;
        debug!(message_id = %message_id, "SQS message sent");
        Ok(message_id)
    }

    #[instrument(skip(self), fields(backend = "aws-sqs"))]
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let (max, wait_secs, visibility_secs) = receive_params(max_messages, wait, visibility);
        let output = self
            .client
            .receive_message()
            .queue_url(&self.config.queue_url)
            .max_number_of_messages(max)
            .wait_time_seconds(wait_secs)
            .visibility_timeout(visibility_secs)
            .send()
            .await
            .map_err(|e| {
                let err_str = DisplayErrorContext(&e).to_string();
                error!(error = %err_str, "SQS receive_message failed");
                QueueError::from(classify_sdk_error(&err_str))
            })?;

        let mut received = Vec::new();
        for message in output.messages.unwrap_or_default() {
            let (Some(message_id), Some(receipt)) = (message.message_id, message.receipt_handle)
            else {
                warn!("skipping SQS message without id or receipt handle");
                continue;
            };
            received.push(ReceivedMessage {
                message_id,
                receipt,
                body: message.body.unwrap_or_default(),
            });
        }
        debug!(count = received.len(), "SQS messages received");
        Ok(received)
    }

    #[instrument(skip(self, receipt), fields(backend = "aws-sqs"))]
    async fn ack(&self, receipt: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.config.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| {
                let err_str = DisplayErrorContext(&e).to_string();
                if e.into_service_error().is_receipt_handle_is_invalid() {
                    warn!("SQS rejected a stale receipt handle");
                    return QueueError::InvalidReceipt(receipt.to_owned());
                }
                error!(error = %err_str, "SQS delete_message failed");
                QueueError::from(classify_sdk_error(&err_str))
            })?;
        Ok(())
    }

    fn max_message_bytes(&self) -> usize {
        self.config.max_message_bytes
    }
}
