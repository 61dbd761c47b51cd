mod queue;
mod store;

pub use queue::MemoryQueue;
pub use store::{MemoryConfigStore, MemoryCredentialStore, MemoryObjectStore};
