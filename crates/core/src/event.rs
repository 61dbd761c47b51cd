//! Queue-trigger event shapes.
//!
//! When the dispatcher is invoked by the queue platform rather than by a
//! polling worker, it receives a batch of records and answers with the ids
//! of the records that must be redelivered.

use serde::{Deserialize, Serialize};

/// A batch of queue records delivered to a consumer invocation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<QueueRecord>,
}

/// One record in a [`QueueEvent`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    pub message_id: String,
    #[serde(default)]
    pub receipt_handle: String,
    pub body: String,
}

/// Partial batch response listing the records to redeliver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}
