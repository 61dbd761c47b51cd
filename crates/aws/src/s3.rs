use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use sluice_store::error::StoreError;
use sluice_store::store::ObjectStore;
use tracing::{debug, error, instrument};

use crate::auth::load_sdk_config;
use crate::config::AwsBaseConfig;
use crate::error::{AwsBackendError, classify_sdk_error};

/// [`ObjectStore`] over S3 buckets.
pub struct S3ObjectStore {
    config: AwsBaseConfig,
    client: aws_sdk_s3::Client,
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("config", &self.config)
            .field("client", &"<S3Client>")
            .finish()
    }
}

impl S3ObjectStore {
    /// Create a new `S3ObjectStore` by building an AWS SDK client.
    pub async fn new(config: AwsBaseConfig) -> Self {
        let sdk_config = load_sdk_config(&config).await;
        // Path-style addressing keeps LocalStack endpoints working.
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.is_local())
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_config);
        Self { config, client }
    }

    /// Create an `S3ObjectStore` with a pre-built client (for testing).
    pub fn with_client(config: AwsBaseConfig, client: aws_sdk_s3::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[allow(clippy::unnecessary_literal_bound)]
    fn scheme(&self) -> &str {
        "s3"
    }

    #[instrument(skip(self, body), fields(backend = "aws-s3", size = body.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                let err_str = DisplayErrorContext(&e).to_string();
                error!(error = %err_str, "S3 put_object failed");
                StoreError::from(classify_sdk_error(&err_str))
            })?;
        debug!("S3 object uploaded");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "aws-s3"))]
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        let result = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let err_str = DisplayErrorContext(&e).to_string();
                if e.into_service_error().is_no_such_key() {
                    return StoreError::NotFound(format!("{bucket}/{key}"));
                }
                error!(error = %err_str, "S3 get_object failed");
                StoreError::from(classify_sdk_error(&err_str))
            })?;

        let body = result
            .body
            .collect()
            .await
            .map_err(|e| {
                error!(error = %e, "failed to read S3 body");
                StoreError::from(AwsBackendError::Connection(format!(
                    "failed to read S3 body: {e}"
                )))
            })?
            .into_bytes();
        debug!(size = body.len(), "S3 object downloaded");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_store() -> S3ObjectStore {
        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .build();
        S3ObjectStore::with_client(
            AwsBaseConfig::new("us-east-1"),
            aws_sdk_s3::Client::from_conf(conf),
        )
    }

    #[test]
    fn scheme_is_s3() {
        assert_eq!(offline_store().scheme(), "s3");
    }

    #[test]
    fn debug_hides_client() {
        let debug = format!("{:?}", offline_store());
        assert!(debug.contains("<S3Client>"));
        assert!(debug.contains("us-east-1"));
    }
}
