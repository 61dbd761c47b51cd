use serde::Deserialize;
use sluice_core::INLINE_LIMIT_BYTES;

/// Which collaborators the pipeline runs against.
///
/// # Example
///
/// ```toml
/// [backend]
/// kind = "aws"
/// region = "eu-west-1"
/// endpoint_url = "http://localhost:4566"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// `"memory"` (single process, nothing persisted) or `"aws"`.
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Endpoint override for local development (e.g. `LocalStack`).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Optional IAM role to assume for every AWS call.
    #[serde(default)]
    pub role_arn: Option<String>,
    /// Upper bound on a single SDK operation, retries included.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            region: default_region(),
            endpoint_url: None,
            role_arn: None,
            operation_timeout_seconds: default_operation_timeout(),
        }
    }
}

fn default_kind() -> String {
    "memory".to_owned()
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

fn default_operation_timeout() -> u64 {
    30
}

/// Ingestion queue settings.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Queue URL. Required by the `aws` backend.
    #[serde(default)]
    pub url: Option<String>,
    /// Messages requested per poll.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Long-poll wait in seconds.
    #[serde(default = "default_wait_time")]
    pub wait_time_seconds: u64,
    /// How long a received message stays hidden from other consumers.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_seconds: u64,
    /// End of the visibility window kept free for acknowledging. Processing
    /// of a polled message stops this many seconds before the window closes.
    #[serde(default = "default_ack_margin")]
    pub ack_margin_seconds: u64,
    /// Largest body the queue accepts.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_messages: default_max_messages(),
            wait_time_seconds: default_wait_time(),
            visibility_timeout_seconds: default_visibility_timeout(),
            ack_margin_seconds: default_ack_margin(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

fn default_max_messages() -> usize {
    10
}

fn default_wait_time() -> u64 {
    20
}

fn default_visibility_timeout() -> u64 {
    60
}

fn default_ack_margin() -> u64 {
    5
}

fn default_max_message_bytes() -> usize {
    INLINE_LIMIT_BYTES
}

/// Object storage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Bucket receiving payloads too large to enqueue inline.
    #[serde(default = "default_overflow_bucket")]
    pub overflow_bucket: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            overflow_bucket: default_overflow_bucket(),
        }
    }
}

fn default_overflow_bucket() -> String {
    "sluice-overflow".to_owned()
}

/// Account table and attribute names.
///
/// The defaults match the tables provisioned for the legacy producers.
#[derive(Debug, Clone, Deserialize)]
pub struct TablesConfig {
    #[serde(default = "default_credential_table")]
    pub credential_table: String,
    #[serde(default = "default_config_table")]
    pub config_table: String,
    #[serde(default = "default_key_attribute")]
    pub key_attribute: String,
    #[serde(default = "default_api_key_attribute")]
    pub api_key_attribute: String,
    #[serde(default = "default_destination_attribute")]
    pub destination_attribute: String,
    #[serde(default = "default_expression_attribute")]
    pub expression_attribute: String,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            credential_table: default_credential_table(),
            config_table: default_config_table(),
            key_attribute: default_key_attribute(),
            api_key_attribute: default_api_key_attribute(),
            destination_attribute: default_destination_attribute(),
            expression_attribute: default_expression_attribute(),
        }
    }
}

fn default_credential_table() -> String {
    "UserAPIKeyTable".to_owned()
}

fn default_config_table() -> String {
    "UserConfigurationTable".to_owned()
}

fn default_key_attribute() -> String {
    "Email".to_owned()
}

fn default_api_key_attribute() -> String {
    "APIKey".to_owned()
}

fn default_destination_attribute() -> String {
    "S3BucketARN".to_owned()
}

fn default_expression_attribute() -> String {
    "JQExpression".to_owned()
}
