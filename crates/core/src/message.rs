use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::account::AccountId;
use crate::locator::{DestinationRef, ExternalRef};

/// Errors produced when a queue body cannot be decoded into an [`IngestMessage`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The body is not valid JSON or does not have the message shape.
    #[error("invalid message body: {0}")]
    Json(#[from] serde_json::Error),
}

/// The unit of work carried on the queue.
///
/// Exactly one of `data` / `externalRef` is present on the wire. Legacy
/// producers used `Email`, `APIKey`, `Data` and `S3Url`; those spellings are
/// accepted when decoding but never emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IngestMessage {
    /// The payload travels inside the message.
    #[serde(rename_all = "camelCase")]
    Inline {
        account_id: AccountId,
        api_key: String,
        data: Value,
    },
    /// The payload was externalized and the message points at it.
    #[serde(rename_all = "camelCase")]
    Reference {
        account_id: AccountId,
        api_key: String,
        external_ref: ExternalRef,
    },
}

impl IngestMessage {
    pub fn account_id(&self) -> &AccountId {
        match self {
            Self::Inline { account_id, .. } | Self::Reference { account_id, .. } => account_id,
        }
    }

    pub fn api_key(&self) -> &str {
        match self {
            Self::Inline { api_key, .. } | Self::Reference { api_key, .. } => api_key,
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Inline { .. } => "inline",
            Self::Reference { .. } => "reference",
        }
    }

    /// Decode a queue body.
    pub fn from_body(body: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(body)?)
    }

    /// Encode this message as a compact JSON queue body.
    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "accountId", alias = "Email")]
    account_id: Option<AccountId>,
    #[serde(rename = "apiKey", alias = "APIKey")]
    api_key: Option<String>,
    #[serde(default, alias = "Data")]
    data: Option<Value>,
    #[serde(rename = "externalRef", alias = "S3Url")]
    external_ref: Option<ExternalRef>,
}

impl<'de> Deserialize<'de> for IngestMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let raw = RawMessage::deserialize(deserializer)?;
        let account_id = raw.account_id.ok_or_else(|| D::Error::missing_field("accountId"))?;
        let api_key = raw.api_key.ok_or_else(|| D::Error::missing_field("apiKey"))?;

        match (raw.data, raw.external_ref) {
            (Some(data), None) => Ok(Self::Inline {
                account_id,
                api_key,
                data,
            }),
            (None, Some(external_ref)) => Ok(Self::Reference {
                account_id,
                api_key,
                external_ref,
            }),
            (Some(_), Some(_)) => Err(D::Error::custom(
                "message carries both data and externalRef",
            )),
            (None, None) => Err(D::Error::custom(
                "message carries neither data nor externalRef",
            )),
        }
    }
}

/// A derived value paired with the destination it should be written to.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformResult {
    pub derived_value: Value,
    pub destination: DestinationRef,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn account() -> AccountId {
        AccountId::parse("a@x.com").unwrap()
    }

    #[test]
    fn inline_wire_shape() {
        let msg = IngestMessage::Inline {
            account_id: account(),
            api_key: "key123".into(),
            data: json!({"key": "value"}),
        };
        assert_eq!(
            msg.to_body().unwrap(),
            r#"{"accountId":"a@x.com","apiKey":"key123","data":{"key":"value"}}"#
        );
    }

    #[test]
    fn reference_wire_shape() {
        let msg = IngestMessage::Reference {
            account_id: account(),
            api_key: "key123".into(),
            external_ref: "s3://b/ingestion_data/a@x.com/1.json".parse().unwrap(),
        };
        let value: Value = serde_json::from_str(&msg.to_body().unwrap()).unwrap();
        assert_eq!(value["externalRef"], "s3://b/ingestion_data/a@x.com/1.json");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn decodes_both_variants() {
        let inline =
            IngestMessage::from_body(r#"{"accountId":"a@X.com","apiKey":"k","data":[1,2]}"#)
                .unwrap();
        assert_eq!(inline.kind(), "inline");
        assert_eq!(inline.account_id().as_str(), "a@x.com");

        let reference = IngestMessage::from_body(
            r#"{"accountId":"a@x.com","apiKey":"k","externalRef":"s3://b/k.json"}"#,
        )
        .unwrap();
        assert_eq!(reference.kind(), "reference");
    }

    #[test]
    fn accepts_legacy_field_names() {
        let msg = IngestMessage::from_body(
            r#"{"Email":"a@x.com","APIKey":"k","S3Url":"s3://bucket/ingestion_data/a@x.com/1.json"}"#,
        )
        .unwrap();
        assert!(matches!(msg, IngestMessage::Reference { .. }));
        assert_eq!(msg.api_key(), "k");
    }

    #[test]
    fn rejects_ambiguous_or_empty_messages() {
        let both = IngestMessage::from_body(
            r#"{"accountId":"a@x.com","apiKey":"k","data":1,"externalRef":"s3://b/k"}"#,
        );
        assert!(both.unwrap_err().to_string().contains("both"));

        let neither = IngestMessage::from_body(r#"{"accountId":"a@x.com","apiKey":"k"}"#);
        assert!(neither.unwrap_err().to_string().contains("neither"));
    }

    #[test]
    fn rejects_missing_or_invalid_account() {
        assert!(IngestMessage::from_body(r#"{"apiKey":"k","data":1}"#).is_err());
        assert!(IngestMessage::from_body(r#"{"accountId":"","apiKey":"k","data":1}"#).is_err());
        assert!(IngestMessage::from_body("not json").is_err());
    }
}
