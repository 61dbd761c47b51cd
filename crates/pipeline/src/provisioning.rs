use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sluice_core::{AccountConfig, AccountCredential, AccountId, DestinationRef};
use sluice_expr::Engine;
use sluice_store::{ConfigStore, CredentialStore, StoreError};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::AuthGate;
use crate::error::ProvisionError;
use crate::timeout::bounded;

/// A configuration update submitted by an account owner.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigRequest {
    #[serde(default, rename = "accountId", alias = "Email")]
    pub account_id: Option<String>,
    #[serde(default, rename = "apiKey", alias = "APIKey")]
    pub api_key: Option<String>,
    #[serde(default, rename = "destinationRef", alias = "S3BucketARN")]
    pub destination_ref: Option<String>,
    #[serde(default, rename = "transformExpression", alias = "JQExpression")]
    pub transform_expression: Option<String>,
}

fn required(value: Option<String>, field: &str) -> Result<String, ProvisionError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ProvisionError::Validation(format!("{field} is required"))),
    }
}

fn parse_account(raw: &str) -> Result<AccountId, ProvisionError> {
    AccountId::parse(raw).map_err(|e| ProvisionError::Validation(format!("accountId is invalid: {e}")))
}

/// Issues API keys and stores per-account configuration.
#[derive(Clone)]
pub struct Provisioner {
    gate: AuthGate,
    credentials: Arc<dyn CredentialStore>,
    configs: Arc<dyn ConfigStore>,
    engine: Engine,
    call_timeout: Duration,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl Provisioner {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        configs: Arc<dyn ConfigStore>,
        engine: Engine,
        call_timeout: Duration,
    ) -> Self {
        Self {
            gate: AuthGate::new(Arc::clone(&credentials), call_timeout),
            credentials,
            configs,
            engine,
            call_timeout,
        }
    }

    /// Generate a fresh API key for `account`, replacing any previous one.
    #[instrument(skip(self))]
    pub async fn issue_api_key(&self, account: &str) -> Result<String, ProvisionError> {
        let account_id = parse_account(account)?;
        let api_key = Uuid::new_v4().to_string();
        let credential = AccountCredential::new(account_id.clone(), api_key.clone());
        bounded(
            self.call_timeout,
            self.credentials.put(&credential),
            StoreError::Timeout,
        )
        .await?;
        info!(account_id = %account_id, "issued API key");
        Ok(api_key)
    }

    /// Validate and store a configuration without checking credentials.
    ///
    /// Operator tooling calls this directly; account owners go through
    /// [`save_config`](Self::save_config).
    pub async fn put_config(
        &self,
        account_id: AccountId,
        destination_ref: &str,
        transform_expression: &str,
    ) -> Result<AccountConfig, ProvisionError> {
        destination_ref
            .parse::<DestinationRef>()
            .map_err(|e| ProvisionError::Validation(format!("destinationRef is invalid: {e}")))?;
        self.engine.compile(transform_expression).map_err(|e| {
            ProvisionError::Validation(format!("transformExpression is invalid: {e}"))
        })?;

        let config = AccountConfig::new(account_id, destination_ref.trim(), transform_expression);
        bounded(self.call_timeout, self.configs.put(&config), StoreError::Timeout).await?;
        info!(account_id = %config.account_id, "stored configuration");
        Ok(config)
    }

    /// Authenticated configuration update.
    #[instrument(skip_all)]
    pub async fn save_config(&self, request: ConfigRequest) -> Result<AccountConfig, ProvisionError> {
        let account = required(request.account_id, "accountId")?;
        let api_key = required(request.api_key, "apiKey")?;
        let destination_ref = required(request.destination_ref, "destinationRef")?;
        let transform_expression = required(request.transform_expression, "transformExpression")?;
        let account_id = parse_account(&account)?;

        if !self.gate.authorize(&account_id, &api_key).await {
            warn!(account_id = %account_id, "configuration update with invalid API key");
            return Err(ProvisionError::Unauthorized);
        }

        self.put_config(account_id, &destination_ref, &transform_expression)
            .await
    }
}
