pub mod account;
pub mod event;
pub mod locator;
pub mod message;

pub use account::{AccountConfig, AccountCredential, AccountId, AccountIdError};
pub use event::{BatchItemFailure, BatchResponse, QueueEvent, QueueRecord};
pub use locator::{DestinationRef, ExternalRef, LocatorError};
pub use message::{DecodeError, IngestMessage, TransformResult};

use uuid::Uuid;

/// Serialized envelopes at or above this many bytes are externalized.
pub const INLINE_LIMIT_BYTES: usize = 256 * 1024;

/// Key prefix for overflowed payload blobs.
pub const OVERFLOW_KEY_PREFIX: &str = "ingestion_data";

/// File-name prefix for delivered results.
pub const DELIVERY_KEY_PREFIX: &str = "transformed_data_";

/// Object key for an overflowed envelope: `ingestion_data/{account}/{id}.json`.
pub fn overflow_key(account_id: &AccountId, id: Uuid) -> String {
    format!("{OVERFLOW_KEY_PREFIX}/{account_id}/{id}.json")
}

/// File name for a delivered result: `transformed_data_{id}.json`.
pub fn delivery_file_name(id: Uuid) -> String {
    format!("{DELIVERY_KEY_PREFIX}{id}.json")
}
