use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueError;

/// A message handed out by [`MessageQueue::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Stable identifier assigned when the message was sent.
    pub message_id: String,
    /// Handle for acknowledging this particular receipt.
    pub receipt: String,
    pub body: String,
}

/// An at-least-once message queue with visibility timeouts.
///
/// A received message is hidden from other receivers until its visibility
/// window closes. Messages that are not acknowledged within that window are
/// delivered again.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Send a message body. Returns the assigned message id.
    async fn send(&self, body: &str) -> Result<String, QueueError>;

    /// Receive up to `max_messages`, waiting at most `wait` for at least one
    /// to become available. An empty result is not an error.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Remove a received message permanently.
    async fn ack(&self, receipt: &str) -> Result<(), QueueError>;

    /// Largest body, in bytes, the queue accepts.
    fn max_message_bytes(&self) -> usize;
}
