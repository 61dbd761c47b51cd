use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound on one SDK call, retries included, unless overridden.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings shared by the SQS, S3 and `DynamoDB` backends.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsBaseConfig {
    pub region: String,
    /// Override for local stacks such as `LocalStack`. Also switches S3 to
    /// path-style addressing.
    pub endpoint_url: Option<String>,
    /// Role assumed through STS before any backend call.
    pub role_arn: Option<String>,
    pub operation_timeout_secs: u64,
}

impl fmt::Debug for AwsBaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsBaseConfig")
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("role_arn", &self.role_arn.as_ref().map(|_| "[REDACTED]"))
            .field("operation_timeout_secs", &self.operation_timeout_secs)
            .finish()
    }
}

impl Default for AwsBaseConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_owned(),
            endpoint_url: None,
            role_arn: None,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT.as_secs(),
        }
    }
}

impl AwsBaseConfig {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    #[must_use]
    pub fn with_role_arn(mut self, role_arn: impl Into<String>) -> Self {
        self.role_arn = Some(role_arn.into());
        self
    }

    /// Sub-second timeouts round up to one second.
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn is_local(&self) -> bool {
        self.endpoint_url.is_some()
    }
}
