use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use serde::{Deserialize, Serialize};
use sluice_core::{AccountConfig, AccountCredential, AccountId};
use sluice_store::error::StoreError;
use sluice_store::store::{ConfigStore, CredentialStore};
use tracing::{debug, error, instrument};

use crate::auth::load_sdk_config;
use crate::config::AwsBaseConfig;
use crate::error::{AwsBackendError, classify_sdk_error};

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

/// Table and attribute names for the account tables.
///
/// Both tables are keyed by the normalized account id stored as a string
/// partition key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    #[serde(default = "default_credential_table")]
    pub credential_table: String,
    #[serde(default = "default_config_table")]
    pub config_table: String,
    /// Partition key attribute of both tables.
    #[serde(default = "default_key_attribute")]
    pub key_attribute: String,
    #[serde(default = "default_api_key_attribute")]
    pub api_key_attribute: String,
    #[serde(default = "default_destination_attribute")]
    pub destination_attribute: String,
    #[serde(default = "default_expression_attribute")]
    pub expression_attribute: String,
}

impl Default for TableConfig {
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

type Item = HashMap<String, AttributeValue>;

/// Read an optional string attribute, rejecting non-string values.
fn string_attr(item: &Item, name: &str) -> Result<Option<String>, AwsBackendError> {
    match item.get(name) {
        None | Some(AttributeValue::Null(_)) => Ok(None),
        Some(AttributeValue::S(s)) => Ok(Some(s.clone())),
        Some(_) => Err(AwsBackendError::InvalidData(format!(
            "attribute {name} is not a string"
        ))),
    }
}

fn credential_from_item(
    tables: &TableConfig,
    account_id: &AccountId,
    item: &Item,
) -> Result<Option<AccountCredential>, AwsBackendError> {
    Ok(string_attr(item, &tables.api_key_attribute)?
        .map(|api_key| AccountCredential::new(account_id.clone(), api_key)))
}

fn config_from_item(
    tables: &TableConfig,
    account_id: &AccountId,
    item: &Item,
) -> Result<AccountConfig, AwsBackendError> {
    Ok(AccountConfig {
        account_id: account_id.clone(),
        destination_ref: string_attr(item, &tables.destination_attribute)?,
        transform_expression: string_attr(item, &tables.expression_attribute)?,
    })
}

/// Fetch one item by account key.
async fn get_account_item(
    client: &aws_sdk_dynamodb::Client,
    table: &str,
    key_attribute: &str,
    account_id: &AccountId,
) -> Result<Option<Item>, StoreError> {
    let output = client
        .get_item()
        .table_name(table)
        .key(key_attribute, AttributeValue::S(account_id.to_string()))
        .send()
        .await
        .map_err(|e| {
            let err_str = DisplayErrorContext(&e).to_string();
            error!(error = %err_str, table = %table, "DynamoDB get_item failed");
            StoreError::from(classify_sdk_error(&err_str))
        })?;
    Ok(output.item)
}

async fn put_account_item(
    client: &aws_sdk_dynamodb::Client,
    table: &str,
    item: Item,
) -> Result<(), StoreError> {
    client
        .put_item()
        .table_name(table)
        .set_item(Some(item))
        .send()
        .await
        .map_err(|e| {
            let err_str = DisplayErrorContext(&e).to_string();
            error!(error = %err_str, table = %table, "DynamoDB put_item failed");
            StoreError::from(classify_sdk_error(&err_str))
        })?;
    Ok(())
}

/// [`CredentialStore`] over the API key table.
pub struct DynamoCredentialStore {
    tables: TableConfig,
    client: aws_sdk_dynamodb::Client,
}

impl std::fmt::Debug for DynamoCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoCredentialStore")
            .field("tables", &self.tables)
            .field("client", &"<DynamoDbClient>")
            .finish()
    }
}

impl DynamoCredentialStore {
    /// Create a new store by building an AWS SDK client.
    pub async fn new(aws: &AwsBaseConfig, tables: TableConfig) -> Self {
        let sdk_config = load_sdk_config(aws).await;
        let client = aws_sdk_dynamodb::Client::new(&sdk_config);
        Self { tables, client }
    }

    /// Create a store with a pre-built client (for testing).
    pub fn with_client(tables: TableConfig, client: aws_sdk_dynamodb::Client) -> Self {
        Self { tables, client }
    }
}

#[async_trait]
impl CredentialStore for DynamoCredentialStore {
    #[instrument(skip(self), fields(backend = "aws-dynamodb", account_id = %account_id))]
    async fn get(&self, account_id: &AccountId) -> Result<Option<AccountCredential>, StoreError> {
        let item = get_account_item(
            &self.client,
            &self.tables.credential_table,
            &self.tables.key_attribute,
            account_id,
        )
        .await?;
        debug!(found = item.is_some(), "credential lookup finished");
        match item {
            Some(item) => Ok(credential_from_item(&self.tables, account_id, &item)?),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, credential), fields(backend = "aws-dynamodb", account_id = %credential.account_id))]
    async fn put(&self, credential: &AccountCredential) -> Result<(), StoreError> {
        let item = Item::from([
            (
                self.tables.key_attribute.clone(),
                AttributeValue::S(credential.account_id.to_string()),
            ),
            (
                self.tables.api_key_attribute.clone(),
                AttributeValue::S(credential.api_key.clone()),
            ),
        ]);
        put_account_item(&self.client, &self.tables.credential_table, item).await
    }
}

/// [`ConfigStore`] over the account configuration table.
pub struct DynamoConfigStore {
    tables: TableConfig,
    client: aws_sdk_dynamodb::Client,
}

impl std::fmt::Debug for DynamoConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoConfigStore")
            .field("tables", &self.tables)
            .field("client", &"<DynamoDbClient>")
            .finish()
    }
}

impl DynamoConfigStore {
    /// Create a new store by building an AWS SDK client.
    pub async fn new(aws: &AwsBaseConfig, tables: TableConfig) -> Self {
        let sdk_config = load_sdk_config(aws).await;
        let client = aws_sdk_dynamodb::Client::new(&sdk_config);
        Self { tables, client }
    }

    /// Create a store with a pre-built client (for testing).
    pub fn with_client(tables: TableConfig, client: aws_sdk_dynamodb::Client) -> Self {
        Self { tables, client }
    }
}

#[async_trait]
impl ConfigStore for DynamoConfigStore {
    #[instrument(skip(self), fields(backend = "aws-dynamodb", account_id = %account_id))]
    async fn get(&self, account_id: &AccountId) -> Result<Option<AccountConfig>, StoreError> {
        let item = get_account_item(
            &self.client,
            &self.tables.config_table,
            &self.tables.key_attribute,
            account_id,
        )
        .await?;
        debug!(found = item.is_some(), "config lookup finished");
        match item {
            Some(item) => Ok(Some(config_from_item(&self.tables, account_id, &item)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, config), fields(backend = "aws-dynamodb", account_id = %config.account_id))]
    async fn put(&self, config: &AccountConfig) -> Result<(), StoreError> {
        let mut item = Item::from([(
            self.tables.key_attribute.clone(),
            AttributeValue::S(config.account_id.to_string()),
        )]);
        if let Some(destination) = &config.destination_ref {
            item.insert(
                self.tables.destination_attribute.clone(),
                AttributeValue::S(destination.clone()),
            );
        }
        if let Some(expression) = &config.transform_expression {
            item.insert(
                self.tables.expression_attribute.clone(),
                AttributeValue::S(expression.clone()),
            );
        }
        put_account_item(&self.client, &self.tables.config_table, item).await
    }
}
