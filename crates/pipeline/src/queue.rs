use std::sync::Arc;
use std::time::Duration;

use sluice_core::{DecodeError, IngestMessage, QueueRecord};
use sluice_store::{MessageQueue, QueueError, ReceivedMessage};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::timeout::bounded;

/// How the adapter receives from the queue.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Upper bound on messages per poll.
    pub max_messages: usize,
    /// How long a poll waits for messages to arrive.
    pub wait_time: Duration,
    /// How long a received message stays hidden before redelivery.
    pub visibility_timeout: Duration,
    /// Part of the visibility window reserved for the acknowledgement.
    /// Processing must finish before `visibility_timeout - ack_margin`.
    pub ack_margin: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_time: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(60),
            ack_margin: Duration::from_secs(5),
        }
    }
}

/// One received message, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    /// Handle for acknowledging; absent when the platform acknowledges.
    pub receipt: Option<String>,
    pub body: String,
    /// When the poll that produced this delivery returned. Absent when the
    /// platform owns the visibility window.
    pub received_at: Option<Instant>,
}

impl Delivery {
    /// Decode the body into an [`IngestMessage`].
    pub fn message(&self) -> Result<IngestMessage, DecodeError> {
        IngestMessage::from_body(&self.body)
    }

    /// Time left to process this delivery and still acknowledge it before it
    /// becomes visible to other consumers. `None` once that time is gone.
    pub fn remaining(&self, settings: &PollSettings) -> Option<Duration> {
        let Some(received_at) = self.received_at else {
            return Some(Duration::MAX);
        };
        let remaining = settings
            .visibility_timeout
            .saturating_sub(settings.ack_margin)
            .saturating_sub(received_at.elapsed());
        (!remaining.is_zero()).then_some(remaining)
    }
}

impl From<ReceivedMessage> for Delivery {
    fn from(m: ReceivedMessage) -> Self {
        Self {
            message_id: m.message_id,
            receipt: Some(m.receipt),
            body: m.body,
            received_at: None,
        }
    }
}

impl From<QueueRecord> for Delivery {
    fn from(r: QueueRecord) -> Self {
        Self {
            message_id: r.message_id,
            receipt: (!r.receipt_handle.is_empty()).then_some(r.receipt_handle),
            body: r.body,
            received_at: None,
        }
    }
}

/// The messages returned by one [`QueueAdapter::poll`].
///
/// Iterating yields [`Delivery`] values in receive order, each stamped with
/// the batch's receive time; bodies are only decoded when
/// [`Delivery::message`] is called.
#[derive(Debug)]
pub struct PollBatch {
    messages: std::vec::IntoIter<ReceivedMessage>,
    received_at: Instant,
}

impl PollBatch {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.len() == 0
    }
}

impl Iterator for PollBatch {
    type Item = Delivery;

    fn next(&mut self) -> Option<Delivery> {
        let received_at = self.received_at;
        self.messages.next().map(|m| Delivery {
            received_at: Some(received_at),
            ..Delivery::from(m)
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.messages.size_hint()
    }
}

impl ExactSizeIterator for PollBatch {}

/// Sends, receives and acknowledges [`IngestMessage`]s on a [`MessageQueue`].
#[derive(Clone)]
pub struct QueueAdapter {
    queue: Arc<dyn MessageQueue>,
    settings: PollSettings,
    call_timeout: Duration,
}

impl std::fmt::Debug for QueueAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueAdapter")
            .field("settings", &self.settings)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl QueueAdapter {
    pub fn new(queue: Arc<dyn MessageQueue>, settings: PollSettings, call_timeout: Duration) -> Self {
        Self {
            queue,
            settings,
            call_timeout,
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Serialize and send `message`. Returns the queue's message id.
    pub async fn enqueue(&self, message: &IngestMessage) -> Result<String, QueueError> {
        let body = message
            .to_body()
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        self.enqueue_body(&body).await
    }

    /// Send an already-encoded message body.
    ///
    /// Bodies over the queue's limit are rejected before anything is sent.
    #[instrument(skip(self, body), fields(size = body.len()))]
    pub(crate) async fn enqueue_body(&self, body: &str) -> Result<String, QueueError> {
        let limit = self.queue.max_message_bytes();
        if body.len() > limit {
            warn!(limit, "message exceeds queue limit, not sending");
            return Err(QueueError::TooLarge {
                size: body.len(),
                limit,
            });
        }
        let message_id =
            bounded(self.call_timeout, self.queue.send(body), QueueError::Timeout).await?;
        debug!(message_id = %message_id, "message enqueued");
        Ok(message_id)
    }

    /// Receive the next batch of messages.
    pub async fn poll(&self) -> Result<PollBatch, QueueError> {
        let s = &self.settings;
        let messages = bounded(
            s.wait_time + self.call_timeout,
            self.queue
                .receive(s.max_messages, s.wait_time, s.visibility_timeout),
            QueueError::Timeout,
        )
        .await?;
        Ok(PollBatch {
            messages: messages.into_iter(),
            received_at: Instant::now(),
        })
    }

    /// Permanently remove a delivered message.
    ///
    /// Deliveries without a receipt are acknowledged by the platform that
    /// handed them out, so this is a no-op for them.
    pub async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let Some(receipt) = &delivery.receipt else {
            return Ok(());
        };
        bounded(self.call_timeout, self.queue.ack(receipt), QueueError::Timeout).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sluice_core::AccountId;
    use sluice_store_memory::MemoryQueue;

    use super::*;

    fn adapter(queue: Arc<MemoryQueue>) -> QueueAdapter {
        QueueAdapter::new(
            queue,
            PollSettings {
                wait_time: Duration::ZERO,
                ..PollSettings::default()
            },
            Duration::from_secs(5),
        )
    }

    fn inline(data: serde_json::Value) -> IngestMessage {
        IngestMessage::Inline {
            account_id: AccountId::parse("a@x.com").unwrap(),
            api_key: "key123".into(),
            data,
        }
    }

    #[tokio::test]
    async fn enqueue_poll_ack() {
        let queue = Arc::new(MemoryQueue::new());
        let adapter = adapter(Arc::clone(&queue));
        let message = inline(json!({"key": "value"}));

        let id = adapter.enqueue(&message).await.unwrap();
        let mut batch = adapter.poll().await.unwrap();
        assert_eq!(batch.len(), 1);

        let delivery = batch.next().unwrap();
        assert_eq!(delivery.message_id, id);
        assert_eq!(delivery.message().unwrap(), message);
        assert!(batch.next().is_none());

        adapter.ack(&delivery).await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn oversized_message_is_never_sent() {
        let queue = Arc::new(MemoryQueue::new().with_max_message_bytes(64));
        let adapter = adapter(Arc::clone(&queue));

        let err = adapter
            .enqueue(&inline(json!("x".repeat(100))))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::TooLarge { limit: 64, .. }));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn undecodable_bodies_surface_per_delivery() {
        let queue = Arc::new(MemoryQueue::new());
        let adapter = adapter(Arc::clone(&queue));
        queue.send("not json").await.unwrap();
        adapter.enqueue(&inline(json!(1))).await.unwrap();

        let results: Vec<bool> = adapter
            .poll()
            .await
            .unwrap()
            .map(|d| d.message().is_ok())
            .collect();
        assert_eq!(results, [false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn polled_deliveries_track_the_visibility_window() {
        let queue = Arc::new(MemoryQueue::new());
        let adapter = adapter(Arc::clone(&queue));
        adapter.enqueue(&inline(json!(1))).await.unwrap();

        let delivery = adapter.poll().await.unwrap().next().unwrap();
        let settings = adapter.settings();
        assert_eq!(delivery.remaining(settings), Some(Duration::from_secs(55)));

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(delivery.remaining(settings), Some(Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(delivery.remaining(settings), None);
    }

    #[tokio::test]
    async fn platform_records_ack_as_noop() {
        let queue = Arc::new(MemoryQueue::new());
        let adapter = adapter(queue);
        let delivery = Delivery::from(QueueRecord {
            message_id: "m-1".into(),
            receipt_handle: String::new(),
            body: "{}".into(),
        });
        assert!(delivery.receipt.is_none());
        assert_eq!(delivery.remaining(adapter.settings()), Some(Duration::MAX));
        adapter.ack(&delivery).await.unwrap();
    }
}
