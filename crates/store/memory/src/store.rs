use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use sluice_core::{AccountConfig, AccountCredential, AccountId};
use sluice_store::error::StoreError;
use sluice_store::store::{ConfigStore, CredentialStore, ObjectStore};

/// In-memory [`CredentialStore`] keyed by normalized account id.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    data: DashMap<String, AccountCredential>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, account_id: &AccountId) -> Result<Option<AccountCredential>, StoreError> {
        Ok(self.data.get(account_id.as_str()).map(|c| c.clone()))
    }

    async fn put(&self, credential: &AccountCredential) -> Result<(), StoreError> {
        self.data
            .insert(credential.account_id.as_str().to_owned(), credential.clone());
        Ok(())
    }
}

/// In-memory [`ConfigStore`] keyed by normalized account id.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    data: DashMap<String, AccountConfig>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, account_id: &AccountId) -> Result<Option<AccountConfig>, StoreError> {
        Ok(self.data.get(account_id.as_str()).map(|c| c.clone()))
    }

    async fn put(&self, config: &AccountConfig) -> Result<(), StoreError> {
        self.data
            .insert(config.account_id.as_str().to_owned(), config.clone());
        Ok(())
    }
}

/// In-memory [`ObjectStore`] backed by a [`DashMap`] of `(bucket, key)`.
///
/// Locators rendered for this store use the `s3` scheme unless another is
/// set with [`MemoryObjectStore::with_scheme`], so configuration written
/// against it stays valid when switching to the AWS backend.
#[derive(Debug)]
pub struct MemoryObjectStore {
    scheme: String,
    objects: DashMap<(String, String), Bytes>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self {
            scheme: "s3".to_owned(),
            objects: DashMap::new(),
        }
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Total number of stored objects across all buckets.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Sorted keys stored in `bucket`.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == bucket)
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        _content_type: &str,
    ) -> Result<(), StoreError> {
        self.objects
            .insert((bucket.to_owned(), key.to_owned()), body);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        self.objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|body| body.clone())
            .ok_or_else(|| StoreError::NotFound(format!("{bucket}/{key}")))
    }
}
