//! Object-store locators.
//!
//! [`ExternalRef`] points at an overflowed payload (`scheme://bucket/key`),
//! while [`DestinationRef`] names the bucket (and optional prefix) that
//! transformed results are written under.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when parsing a locator string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    /// The locator was empty.
    #[error("locator is empty")]
    Empty,

    /// The locator lacks a `scheme://` prefix.
    #[error("locator {0:?} has no scheme")]
    MissingScheme(String),

    /// The locator has no bucket component.
    #[error("locator {0:?} has no bucket")]
    MissingBucket(String),

    /// The locator has no object key component.
    #[error("locator {0:?} has no object key")]
    MissingKey(String),
}

/// A fully qualified reference to a stored object: `scheme://bucket/key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalRef {
    pub scheme: String,
    pub bucket: String,
    pub key: String,
}

impl ExternalRef {
    pub fn new(
        scheme: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

impl FromStr for ExternalRef {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(LocatorError::Empty);
        }
        let (scheme, rest) = s
            .split_once("://")
            .filter(|(scheme, _)| !scheme.is_empty())
            .ok_or_else(|| LocatorError::MissingScheme(s.to_owned()))?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(LocatorError::MissingBucket(s.to_owned()));
        }
        if key.is_empty() {
            return Err(LocatorError::MissingKey(s.to_owned()));
        }
        Ok(Self::new(scheme, bucket, key))
    }
}

impl Serialize for ExternalRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ExternalRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Where transformed results for an account are written.
///
/// Accepted forms:
///
/// - `bucket`
/// - `bucket/some/prefix`
/// - `s3://bucket/some/prefix` (any scheme)
/// - `arn:aws:s3:::bucket` or `arn:aws:s3:::bucket/some/prefix`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationRef {
    pub scheme: Option<String>,
    pub bucket: String,
    pub prefix: Option<String>,
}

impl DestinationRef {
    /// Build the object key for `file_name` under this destination's prefix.
    pub fn key_for(&self, file_name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{file_name}"),
            None => file_name.to_owned(),
        }
    }
}

impl fmt::Display for DestinationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{scheme}://")?;
        }
        f.write_str(&self.bucket)?;
        if let Some(prefix) = &self.prefix {
            write!(f, "/{prefix}")?;
        }
        Ok(())
    }
}

impl FromStr for DestinationRef {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(LocatorError::Empty);
        }

        let (scheme, rest) = if s.starts_with("arn:") {
            // The resource portion of an S3 ARN follows the `:::` separator.
            let resource = s
                .rsplit_once(":::")
                .map(|(_, resource)| resource)
                .ok_or_else(|| LocatorError::MissingBucket(s.to_owned()))?;
            (None, resource)
        } else if let Some((scheme, rest)) = s.split_once("://") {
            if scheme.is_empty() {
                return Err(LocatorError::MissingScheme(s.to_owned()));
            }
            (Some(scheme.to_owned()), rest)
        } else {
            (None, s)
        };

        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(LocatorError::MissingBucket(s.to_owned()));
        }
        let prefix = prefix.trim_matches('/');

        Ok(Self {
            scheme,
            bucket: bucket.to_owned(),
            prefix: (!prefix.is_empty()).then(|| prefix.to_owned()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_ref_roundtrip() {
        let r: ExternalRef = "s3://overflow/ingestion_data/a@x.com/abc.json"
            .parse()
            .unwrap();
        assert_eq!(r.scheme, "s3");
        assert_eq!(r.bucket, "overflow");
        assert_eq!(r.key, "ingestion_data/a@x.com/abc.json");
        assert_eq!(r.to_string(), "s3://overflow/ingestion_data/a@x.com/abc.json");
    }

    #[test]
    fn external_ref_rejects_partial_locators() {
        assert_eq!("".parse::<ExternalRef>(), Err(LocatorError::Empty));
        assert!(matches!(
            "bucket/key".parse::<ExternalRef>(),
            Err(LocatorError::MissingScheme(_))
        ));
        assert!(matches!(
            "s3:///key".parse::<ExternalRef>(),
            Err(LocatorError::MissingBucket(_))
        ));
        assert!(matches!(
            "s3://bucket".parse::<ExternalRef>(),
            Err(LocatorError::MissingKey(_))
        ));
    }

    #[test]
    fn destination_plain_bucket() {
        let d: DestinationRef = "bucket1".parse().unwrap();
        assert_eq!(d.bucket, "bucket1");
        assert!(d.prefix.is_none());
        assert!(d.scheme.is_none());
        assert_eq!(d.key_for("out.json"), "out.json");
    }

    #[test]
    fn destination_with_prefix_and_scheme() {
        let d: DestinationRef = "s3://results/team-a/daily/".parse().unwrap();
        assert_eq!(d.scheme.as_deref(), Some("s3"));
        assert_eq!(d.bucket, "results");
        assert_eq!(d.prefix.as_deref(), Some("team-a/daily"));
        assert_eq!(d.key_for("x.json"), "team-a/daily/x.json");
        assert_eq!(d.to_string(), "s3://results/team-a/daily");
    }

    #[test]
    fn destination_from_bucket_arn() {
        let d: DestinationRef = "arn:aws:s3:::customer-bucket".parse().unwrap();
        assert_eq!(d.bucket, "customer-bucket");
        assert!(d.scheme.is_none());

        let d: DestinationRef = "arn:aws:s3:::customer-bucket/out".parse().unwrap();
        assert_eq!(d.prefix.as_deref(), Some("out"));
    }

    #[test]
    fn destination_rejects_missing_bucket() {
        assert!(matches!(
            "arn:aws:iam::123:role/x".parse::<DestinationRef>(),
            Err(LocatorError::MissingBucket(_))
        ));
        assert!(matches!(
            "/prefix-only".parse::<DestinationRef>(),
            Err(LocatorError::MissingBucket(_))
        ));
    }
}
