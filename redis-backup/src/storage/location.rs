//! Storage location URIs.
//!
//! - `s3://bucket` or `s3://bucket/some/prefix`
//! - `file:///var/backups/redis` (a local directory used as the store root)

use crate::{BackupError, Result};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    S3 { bucket: String, prefix: Option<String> },
    Local { root: PathBuf },
}

impl StorageLocation {
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| BackupError::Config(format!("invalid storage URI '{}': {}", uri, reason));

        if let Some(rest) = uri.strip_prefix("s3://") {
            let (bucket, prefix) = match rest.split_once('/') {
                Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
                None => (rest, ""),
            };
            if bucket.is_empty() {
                return Err(invalid("missing bucket name"));
            }
            return Ok(Self::S3 {
                bucket: bucket.to_string(),
                prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
            });
        }

        if let Some(path) = uri.strip_prefix("file://") {
            if !path.starts_with('/') {
                return Err(invalid("file URIs need an absolute path"));
            }
            return Ok(Self::Local {
                root: PathBuf::from(path),
            });
        }

        Err(invalid("expected s3://bucket[/prefix] or file:///dir"))
    }

    /// Key prefix inside the store, without leading or trailing slashes.
    pub fn prefix(&self) -> Option<&str> {
        match self {
            Self::S3 { prefix, .. } => prefix.as_deref(),
            Self::Local { .. } => None,
        }
    }

    /// Full object key of a file name stored at this location.
    pub fn object_key(&self, name: &str) -> String {
        match self.prefix() {
            Some(prefix) => format!("{}/{}", prefix, name),
            None => name.to_string(),
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S3 { bucket, prefix: Some(prefix) } => write!(f, "s3://{}/{}", bucket, prefix),
            Self::S3 { bucket, prefix: None } => write!(f, "s3://{}", bucket),
            Self::Local { root } => write!(f, "file://{}", root.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3() {
        let loc = StorageLocation::parse("s3://backups/redis/prd/").unwrap();
        assert_eq!(
            loc,
            StorageLocation::S3 {
                bucket: "backups".into(),
                prefix: Some("redis/prd".into())
            }
        );
        assert_eq!(loc.object_key("a.tar.gz"), "redis/prd/a.tar.gz");
        assert_eq!(loc.to_string(), "s3://backups/redis/prd");
    }

    #[test]
    fn test_parse_bare_bucket() {
        for uri in ["s3://backups", "s3://backups/"] {
            let loc = StorageLocation::parse(uri).unwrap();
            assert_eq!(loc.prefix(), None);
            assert_eq!(loc.object_key("a.tar.gz"), "a.tar.gz");
        }
    }

    #[test]
    fn test_parse_file() {
        let loc = StorageLocation::parse("file:///var/backups").unwrap();
        assert_eq!(
            loc,
            StorageLocation::Local {
                root: PathBuf::from("/var/backups")
            }
        );
    }

    #[test]
    fn test_parse_invalid() {
        for uri in ["", "backups", "s3://", "s3:///prefix", "gs://bucket", "file://relative"] {
            assert!(StorageLocation::parse(uri).unwrap_err().is_config(), "{}", uri);
        }
    }
}
