use aws_config::sts::AssumeRoleProvider;
use aws_config::timeout::TimeoutConfig;
use aws_config::{ConfigLoader, Region, SdkConfig};
use tracing::{debug, info};

use crate::config::AwsBaseConfig;

const ASSUME_ROLE_SESSION: &str = "sluice-pipeline";

fn loader(config: &AwsBaseConfig) -> ConfigLoader {
    let timeouts = TimeoutConfig::builder()
        .operation_timeout(config.operation_timeout())
        .build();
    let loader = aws_config::from_env()
        .region(Region::new(config.region.clone()))
        .timeout_config(timeouts);
    match &config.endpoint_url {
        Some(endpoint) => loader.endpoint_url(endpoint),
        None => loader,
    }
}

/// Resolve SDK settings from the environment credential chain.
///
/// With `role_arn` set, the environment credentials are only used to call
/// STS, and every backend call runs as the assumed role.
pub async fn load_sdk_config(config: &AwsBaseConfig) -> SdkConfig {
    if let Some(endpoint) = &config.endpoint_url {
        debug!(endpoint = %endpoint, "using local AWS endpoint");
    }

    let Some(role_arn) = &config.role_arn else {
        return loader(config).load().await;
    };

    info!(region = %config.region, "assuming backend role via STS");
    let base = loader(config).load().await;
    let credentials = AssumeRoleProvider::builder(role_arn)
        .session_name(ASSUME_ROLE_SESSION)
        .region(Region::new(config.region.clone()))
        .configure(&base)
        .build()
        .await;

    loader(config).credentials_provider(credentials).load().await
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn applies_region_and_timeout() {
        let config = AwsBaseConfig::new("ap-northeast-1")
            .with_endpoint_url("http://localhost:4566")
            .with_operation_timeout(Duration::from_secs(7));
        let sdk = load_sdk_config(&config).await;
        assert_eq!(sdk.region().map(AsRef::as_ref), Some("ap-northeast-1"));
        assert_eq!(
            sdk.timeout_config().and_then(|t| t.operation_timeout()),
            Some(Duration::from_secs(7))
        );
    }
}
