use async_trait::async_trait;
use bytes::Bytes;

use sluice_core::{AccountConfig, AccountCredential, AccountId};

use crate::error::StoreError;

/// Lookup and storage of per-account API keys.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the credential for an account. Returns `None` if none is stored.
    async fn get(&self, account_id: &AccountId) -> Result<Option<AccountCredential>, StoreError>;

    /// Store a credential, replacing any previous key for the account.
    async fn put(&self, credential: &AccountCredential) -> Result<(), StoreError>;
}

/// Lookup and storage of per-account transform configuration.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch the configuration for an account. Returns `None` if none is stored.
    async fn get(&self, account_id: &AccountId) -> Result<Option<AccountConfig>, StoreError>;

    /// Store a configuration. The last write wins.
    async fn put(&self, config: &AccountConfig) -> Result<(), StoreError>;
}

/// Bucket/key addressed blob storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// URI scheme used when rendering locators for this store, e.g. `s3`.
    fn scheme(&self) -> &str;

    /// Write `body` to `bucket/key`, overwriting any existing object.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StoreError>;

    /// Read the object at `bucket/key`.
    ///
    /// Returns [`StoreError::NotFound`] if the object does not exist.
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError>;
}
