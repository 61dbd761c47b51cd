use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use sluice_store::error::QueueError;
use sluice_store::queue::{MessageQueue, ReceivedMessage};

/// Body size limit matching the SQS maximum.
const DEFAULT_MAX_MESSAGE_BYTES: usize = 256 * 1024;

#[derive(Debug)]
struct Slot {
    message_id: String,
    body: String,
    /// Receipt of the most recent receive, if any.
    receipt: Option<String>,
    visible_at: Instant,
}

/// In-memory [`MessageQueue`] with SQS-style visibility timeouts.
///
/// Every receive hands out a fresh receipt handle and hides the message
/// until the visibility window elapses. Only the latest receipt can
/// acknowledge a message; acks with older receipts fail with
/// [`QueueError::InvalidReceipt`].
#[derive(Debug)]
pub struct MemoryQueue {
    slots: Mutex<VecDeque<Slot>>,
    arrivals: Notify,
    max_message_bytes: usize,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self {
            slots: Mutex::new(VecDeque::new()),
            arrivals: Notify::new(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = limit;
        self
    }

    /// Number of messages not yet acknowledged, including in-flight ones.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    /// Bodies of every unacknowledged message, in send order.
    pub async fn bodies(&self) -> Vec<String> {
        self.slots
            .lock()
            .await
            .iter()
            .map(|slot| slot.body.clone())
            .collect()
    }

    /// Claim visible messages, or report when the next one becomes visible.
    async fn claim(
        &self,
        max_messages: usize,
        visibility: Duration,
    ) -> (Vec<ReceivedMessage>, Option<Instant>) {
        let mut slots = self.slots.lock().await;
        let now = Instant::now();
        let mut claimed = Vec::new();
        for slot in slots.iter_mut() {
            if claimed.len() >= max_messages {
                break;
            }
            if slot.visible_at <= now {
                let receipt = Uuid::new_v4().to_string();
                slot.receipt = Some(receipt.clone());
                slot.visible_at = now + visibility;
                claimed.push(ReceivedMessage {
                    message_id: slot.message_id.clone(),
                    receipt,
                    body: slot.body.clone(),
                });
            }
        }
        let next_visible = slots.iter().map(|slot| slot.visible_at).min();
        (claimed, next_visible)
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn send(&self, body: &str) -> Result<String, QueueError> {
        if body.len() > self.max_message_bytes {
            return Err(QueueError::TooLarge {
                size: body.len(),
                limit: self.max_message_bytes,
            });
        }
        let message_id = Uuid::new_v4().to_string();
        self.slots.lock().await.push_back(Slot {
            message_id: message_id.clone(),
            body: body.to_owned(),
            receipt: None,
            visible_at: Instant::now(),
        });
        self.arrivals.notify_one();
        Ok(message_id)
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let max_messages = max_messages.max(1);
        let deadline = Instant::now() + wait;
        loop {
            let (claimed, next_visible) = self.claim(max_messages, visibility).await;
            if !claimed.is_empty() || Instant::now() >= deadline {
                return Ok(claimed);
            }
            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                () = self.arrivals.notified() => {}
                () = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, receipt: &str) -> Result<(), QueueError> {
        let mut slots = self.slots.lock().await;
        let position = slots
            .iter()
            .position(|slot| slot.receipt.as_deref() == Some(receipt))
            .ok_or_else(|| QueueError::InvalidReceipt(receipt.to_owned()))?;
        slots.remove(position);
        Ok(())
    }

    fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sluice_store::testing::run_queue_conformance_tests;

    use super::*;

    const VISIBILITY: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn conformance() {
        let queue = MemoryQueue::new();
        run_queue_conformance_tests(&queue)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_message_is_redelivered_after_visibility_timeout() {
        let queue = MemoryQueue::new();
        let id = queue.send("payload").await.unwrap();

        let first = queue.receive(1, Duration::ZERO, VISIBILITY).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].message_id, id);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(queue
            .receive(1, Duration::ZERO, VISIBILITY)
            .await
            .unwrap()
            .is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        let second = queue.receive(1, Duration::ZERO, VISIBILITY).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, id);
        assert_ne!(second[0].receipt, first[0].receipt);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_receipt_is_rejected() {
        let queue = MemoryQueue::new();
        queue.send("payload").await.unwrap();

        let first = queue.receive(1, Duration::ZERO, VISIBILITY).await.unwrap();
        tokio::time::advance(VISIBILITY + Duration::from_secs(1)).await;
        let second = queue.receive(1, Duration::ZERO, VISIBILITY).await.unwrap();

        let err = queue.ack(&first[0].receipt).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidReceipt(_)));
        assert_eq!(queue.len().await, 1);

        queue.ack(&second[0].receipt).await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_waits_for_new_messages() {
        let queue = Arc::new(MemoryQueue::new());
        let receiver = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .receive(10, Duration::from_secs(20), VISIBILITY)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        queue.send("late").await.unwrap();

        let received = receiver.await.unwrap().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn receive_gives_up_after_wait() {
        let queue = MemoryQueue::new();
        let start = Instant::now();
        let received = queue
            .receive(10, Duration::from_secs(20), VISIBILITY)
            .await
            .unwrap();
        assert!(received.is_empty());
        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test]
    async fn respects_max_messages() {
        let queue = MemoryQueue::new();
        for i in 0..5 {
            queue.send(&format!("m{i}")).await.unwrap();
        }
        let batch = queue.receive(3, Duration::ZERO, VISIBILITY).await.unwrap();
        let bodies: Vec<&str> = batch.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["m0", "m1", "m2"]);
        assert_eq!(queue.bodies().await.len(), 5);
    }

    #[tokio::test]
    async fn rejects_oversized_bodies() {
        let queue = MemoryQueue::new().with_max_message_bytes(4);
        let err = queue.send("too long").await.unwrap_err();
        assert!(matches!(err, QueueError::TooLarge { size: 8, limit: 4 }));
        assert!(queue.is_empty().await);
    }
}
