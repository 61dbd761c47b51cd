use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons an account identifier can be rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountIdError {
    /// The identifier was empty or only whitespace.
    #[error("account id is empty")]
    Empty,

    /// The identifier does not contain an `@` separator.
    #[error("account id must be email-shaped (missing '@')")]
    MissingSeparator,

    /// Nothing precedes the final `@`.
    #[error("account id has an empty local part")]
    EmptyLocalPart,

    /// Nothing follows the final `@`.
    #[error("account id has an empty domain")]
    EmptyDomain,
}

/// A normalized, email-shaped account identifier.
///
/// Normalization trims surrounding whitespace and lower-cases the domain
/// part only; the local part is kept verbatim. Every store is keyed on this
/// normalized form, so parsing happens once at the edge of the system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Parse and normalize a raw account identifier.
    pub fn parse(raw: &str) -> Result<Self, AccountIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AccountIdError::Empty);
        }
        let (local, domain) = trimmed
            .rsplit_once('@')
            .ok_or(AccountIdError::MissingSeparator)?;
        if local.is_empty() {
            return Err(AccountIdError::EmptyLocalPart);
        }
        if domain.is_empty() {
            return Err(AccountIdError::EmptyDomain);
        }
        Ok(Self(format!("{local}@{}", domain.to_lowercase())))
    }

    /// Borrow the normalized identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccountId {
    type Error = AccountIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The API key issued to an account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCredential {
    pub account_id: AccountId,
    pub api_key: String,
}

impl fmt::Debug for AccountCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredential")
            .field("account_id", &self.account_id)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl AccountCredential {
    /// Create a credential record.
    pub fn new(account_id: AccountId, api_key: impl Into<String>) -> Self {
        Self {
            account_id,
            api_key: api_key.into(),
        }
    }
}

/// Per-account transform configuration.
///
/// Both the destination and the expression are optional at the storage level
/// so that a partially provisioned record can be represented; the dispatcher
/// refuses to act on incomplete records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountConfig {
    pub account_id: AccountId,
    #[serde(default)]
    pub destination_ref: Option<String>,
    #[serde(default)]
    pub transform_expression: Option<String>,
}

impl AccountConfig {
    /// Create a fully populated configuration record.
    pub fn new(
        account_id: AccountId,
        destination_ref: impl Into<String>,
        transform_expression: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            destination_ref: Some(destination_ref.into()),
            transform_expression: Some(transform_expression.into()),
        }
    }

    /// Whether both the destination and the expression are present and non-blank.
    pub fn is_complete(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.destination_ref) && present(&self.transform_expression)
    }
}
