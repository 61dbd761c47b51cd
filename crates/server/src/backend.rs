use std::sync::Arc;

use sluice_pipeline::Collaborators;
use sluice_store_memory::{
    MemoryConfigStore, MemoryCredentialStore, MemoryObjectStore, MemoryQueue,
};
use tracing::info;

#[cfg(feature = "aws")]
use sluice_aws::{
    AwsBaseConfig, DynamoConfigStore, DynamoCredentialStore, S3ObjectStore, SqsConfig, SqsQueue,
    TableConfig,
};

use crate::config::SluiceConfig;
use crate::error::ServerError;

/// Build the collaborators selected by `[backend] kind`.
#[allow(clippy::unused_async)]
pub async fn create_collaborators(config: &SluiceConfig) -> Result<Collaborators, ServerError> {
    let collaborators = match config.backend.kind.as_str() {
        "memory" => memory_collaborators(config),
        #[cfg(feature = "aws")]
        "aws" => aws_collaborators(config).await?,
        #[cfg(not(feature = "aws"))]
        "aws" => {
            return Err(ServerError::Config(
                "backend kind 'aws' requires the 'aws' feature".into(),
            ));
        }
        other => {
            return Err(ServerError::Config(format!(
                "unknown backend kind '{other}' (expected 'memory' or 'aws')"
            )));
        }
    };
    info!(backend = %config.backend.kind, "collaborators initialized");
    Ok(collaborators)
}

fn memory_collaborators(config: &SluiceConfig) -> Collaborators {
    Collaborators {
        credentials: Arc::new(MemoryCredentialStore::new()),
        configs: Arc::new(MemoryConfigStore::new()),
        objects: Arc::new(MemoryObjectStore::new()),
        queue: Arc::new(MemoryQueue::new().with_max_message_bytes(config.queue.max_message_bytes)),
    }
}

#[cfg(feature = "aws")]
async fn aws_collaborators(config: &SluiceConfig) -> Result<Collaborators, ServerError> {
    let queue_url = config
        .queue
        .url
        .as_deref()
        .ok_or_else(|| ServerError::Config("aws backend requires [queue] url".into()))?;

    let mut aws = AwsBaseConfig::new(&config.backend.region).with_operation_timeout(
        std::time::Duration::from_secs(config.backend.operation_timeout_seconds),
    );
    if let Some(ref url) = config.backend.endpoint_url {
        aws = aws.with_endpoint_url(url);
    }
    if let Some(ref arn) = config.backend.role_arn {
        aws = aws.with_role_arn(arn);
    }

    let tables = TableConfig {
        credential_table: config.tables.credential_table.clone(),
        config_table: config.tables.config_table.clone(),
        key_attribute: config.tables.key_attribute.clone(),
        api_key_attribute: config.tables.api_key_attribute.clone(),
        destination_attribute: config.tables.destination_attribute.clone(),
        expression_attribute: config.tables.expression_attribute.clone(),
    };

    let sqs = SqsConfig::new(aws.clone(), queue_url)
        .with_max_message_bytes(config.queue.max_message_bytes);

    Ok(Collaborators {
        credentials: Arc::new(DynamoCredentialStore::new(&aws, tables.clone()).await),
        configs: Arc::new(DynamoConfigStore::new(&aws, tables).await),
        objects: Arc::new(S3ObjectStore::new(aws).await),
        queue: Arc::new(SqsQueue::new(sqs).await),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_by_default() {
        let config = SluiceConfig::from_toml("").unwrap();
        let collaborators = create_collaborators(&config).await.unwrap();
        assert_eq!(collaborators.objects.scheme(), "s3");
        assert_eq!(
            collaborators.queue.max_message_bytes(),
            config.queue.max_message_bytes
        );
    }

    #[tokio::test]
    async fn unknown_backend_is_a_config_error() {
        let config = SluiceConfig::from_toml("[backend]\nkind = \"redis\"").unwrap();
        let err = create_collaborators(&config).await.unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[cfg(feature = "aws")]
    #[tokio::test]
    async fn aws_backend_requires_queue_url() {
        let config = SluiceConfig::from_toml("[backend]\nkind = \"aws\"").unwrap();
        let err = create_collaborators(&config).await.unwrap_err();
        assert!(err.to_string().contains("[queue] url"));
    }
}
