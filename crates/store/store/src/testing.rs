use std::time::Duration;

use bytes::Bytes;
use sluice_core::{AccountConfig, AccountCredential, AccountId};

use crate::error::{QueueError, StoreError};
use crate::queue::MessageQueue;
use crate::store::{ConfigStore, CredentialStore, ObjectStore};

fn account(raw: &str) -> AccountId {
    AccountId::parse(raw).unwrap_or_else(|e| panic!("test account {raw:?} is invalid: {e}"))
}

/// Run the credential store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if any backend call fails.
pub async fn run_credential_store_conformance_tests(
    store: &dyn CredentialStore,
) -> Result<(), StoreError> {
    let missing = store.get(&account("missing@example.com")).await?;
    assert!(missing.is_none(), "get on missing account should return None");

    let id = account("owner@example.com");
    store.put(&AccountCredential::new(id.clone(), "key-1")).await?;
    let found = store.get(&id).await?;
    assert_eq!(found.as_ref().map(|c| c.api_key.as_str()), Some("key-1"));

    store.put(&AccountCredential::new(id.clone(), "key-2")).await?;
    let found = store.get(&id).await?;
    assert_eq!(
        found.as_ref().map(|c| c.api_key.as_str()),
        Some("key-2"),
        "put should replace the previous key"
    );
    Ok(())
}

/// Run the configuration store conformance test suite.
///
/// # Errors
///
/// Returns an error if any backend call fails.
pub async fn run_config_store_conformance_tests(store: &dyn ConfigStore) -> Result<(), StoreError> {
    let missing = store.get(&account("missing@example.com")).await?;
    assert!(missing.is_none(), "get on missing account should return None");

    let id = account("owner@example.com");
    store
        .put(&AccountConfig::new(id.clone(), "bucket1", ".key"))
        .await?;
    let found = store.get(&id).await?;
    assert_eq!(
        found,
        Some(AccountConfig::new(id.clone(), "bucket1", ".key"))
    );

    store
        .put(&AccountConfig::new(id.clone(), "bucket2/out", ".other"))
        .await?;
    let found = store.get(&id).await?;
    assert_eq!(
        found.and_then(|c| c.transform_expression),
        Some(".other".to_owned()),
        "the last write should win"
    );
    Ok(())
}

/// Run the object store conformance test suite.
///
/// # Errors
///
/// Returns an error if any backend call fails.
pub async fn run_object_store_conformance_tests(store: &dyn ObjectStore) -> Result<(), StoreError> {
    assert!(!store.scheme().is_empty(), "scheme must not be empty");

    match store.get("conformance", "missing.json").await {
        Err(StoreError::NotFound(_)) => {}
        other => panic!("get on missing object should be NotFound, got {other:?}"),
    }

    store
        .put(
            "conformance",
            "dir/object.json",
            Bytes::from_static(br#"{"a":1}"#),
            "application/json",
        )
        .await?;
    let body = store.get("conformance", "dir/object.json").await?;
    assert_eq!(&body[..], br#"{"a":1}"#);

    match store.get("other-bucket", "dir/object.json").await {
        Err(StoreError::NotFound(_)) => {}
        other => panic!("objects must be scoped to their bucket, got {other:?}"),
    }
    Ok(())
}

/// Run the message queue conformance test suite.
///
/// The queue must be empty when the suite starts.
///
/// # Errors
///
/// Returns an error if any backend call fails.
pub async fn run_queue_conformance_tests(queue: &dyn MessageQueue) -> Result<(), QueueError> {
    let visibility = Duration::from_secs(30);
    let none = Duration::ZERO;

    let empty = queue.receive(10, none, visibility).await?;
    assert!(empty.is_empty(), "receive on an empty queue should return nothing");

    let first = queue.send("first").await?;
    let second = queue.send("second").await?;
    assert_ne!(first, second, "message ids must be unique");

    let received = queue.receive(10, none, visibility).await?;
    let mut bodies: Vec<&str> = received.iter().map(|m| m.body.as_str()).collect();
    bodies.sort_unstable();
    assert_eq!(bodies, ["first", "second"]);

    let hidden = queue.receive(10, none, visibility).await?;
    assert!(
        hidden.is_empty(),
        "received messages should be invisible until the window closes"
    );

    for message in &received {
        queue.ack(&message.receipt).await?;
    }
    let after_ack = queue.receive(10, none, visibility).await?;
    assert!(after_ack.is_empty(), "acked messages should be gone");

    assert!(queue.max_message_bytes() > 0);
    Ok(())
}
