//! AWS backends for the Sluice ingestion pipeline.
//!
//! This crate provides feature-gated implementations of the `sluice-store`
//! collaborator traits:
//!
//! - **SQS** (`sqs` feature): [`MessageQueue`](sluice_store::MessageQueue)
//! - **S3** (`s3` feature): [`ObjectStore`](sluice_store::ObjectStore)
//! - **`DynamoDB`** (`dynamodb` feature):
//!   [`CredentialStore`](sluice_store::CredentialStore) and
//!   [`ConfigStore`](sluice_store::ConfigStore) over the account tables
//!
//! All backends share a common [`AwsBaseConfig`](config::AwsBaseConfig) for
//! region, endpoint override, operation timeout, and optional STS
//! assume-role credentials.

pub mod auth;
pub mod config;
pub mod error;

#[cfg(feature = "sqs")]
pub mod sqs;

#[cfg(feature = "s3")]
pub mod s3;

#[cfg(feature = "dynamodb")]
pub mod dynamodb;

// Re-exports for convenience.
pub use config::AwsBaseConfig;
pub use error::AwsBackendError;

#[cfg(feature = "sqs")]
pub use sqs::{SqsConfig, SqsQueue};

#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

#[cfg(feature = "dynamodb")]
pub use dynamodb::{DynamoConfigStore, DynamoCredentialStore, TableConfig};
