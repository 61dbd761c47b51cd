pub mod error;
pub mod queue;
pub mod store;
pub mod testing;

pub use error::{QueueError, StoreError};
pub use queue::{MessageQueue, ReceivedMessage};
pub use store::{ConfigStore, CredentialStore, ObjectStore};
