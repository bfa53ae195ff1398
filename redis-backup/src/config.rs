//! Configuration management for the backup tool.
//!
//! Settings come from an optional TOML file; command-line flags and their
//! environment fallbacks override the file. Every field has a default, so an
//! empty file (or no file at all) is a valid configuration.

use crate::archive::Compression;
use crate::cluster::nodes::{parse_node_list, NodeAddr};
use crate::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Profile with built-in node defaults.
pub const LOCAL_PROFILE: &str = "local";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cluster: ClusterSection,
    /// Node lists per environment profile.
    pub profiles: HashMap<String, ProfileConfig>,
    pub backup: BackupConfig,
    pub restore: RestoreConfig,
    pub verify: VerifyConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Environment profile (local, dev, prd, ...)
    pub profile: String,

    /// Explicit node list; takes precedence over the profile table
    pub nodes: Vec<NodeAddr>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub nodes: Vec<NodeAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Key pattern passed to SCAN MATCH
    #[serde(rename = "match")]
    pub match_pattern: String,

    /// Records per chunk file
    pub chunk_keys: usize,

    /// Local output directory for backup folders and archives
    pub out_dir: PathBuf,

    /// Archive compression (gzip, zstd)
    pub compression: Compression,

    /// COUNT hint for each SCAN request
    pub scan_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Working directory for downloads and extraction
    pub work_dir: PathBuf,

    /// Report progress every N restored keys
    pub progress_every: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Number of records to sample
    pub sample: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Archive location, e.g. `s3://bucket/prefix`
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            profile: LOCAL_PROFILE.to_string(),
            nodes: Vec::new(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            match_pattern: "*".to_string(),
            chunk_keys: 5000,
            out_dir: PathBuf::from("/data/backups"),
            compression: Compression::Gzip,
            scan_count: 1000,
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp"),
            progress_every: 1000,
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self { sample: 500 }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Resolve the cluster to talk to.
    ///
    /// Precedence: `nodes_override` (flag or `REDIS_NODES`), then
    /// `[cluster].nodes`, then `[profiles.<profile>]`, then the built-in
    /// defaults of the `local` profile.
    pub fn cluster_config(&self, profile: Option<&str>, nodes_override: Option<&str>) -> Result<ClusterConfig> {
        let profile = profile.unwrap_or(&self.cluster.profile).to_string();

        let nodes = if let Some(list) = nodes_override {
            parse_node_list(list)?
        } else if !self.cluster.nodes.is_empty() {
            self.cluster.nodes.clone()
        } else if let Some(p) = self.profiles.get(&profile).filter(|p| !p.nodes.is_empty()) {
            p.nodes.clone()
        } else {
            default_nodes_for_profile(&profile)?
        };

        Ok(ClusterConfig { profile, nodes })
    }
}

/// Which cluster a run talks to. Passed explicitly into the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub profile: String,
    pub nodes: Vec<NodeAddr>,
}

/// Built-in node list of a profile. Only `local` has one.
pub fn default_nodes_for_profile(profile: &str) -> Result<Vec<NodeAddr>> {
    if profile == LOCAL_PROFILE {
        return Ok((7001..=7006).map(|port| NodeAddr::new("localhost", port)).collect());
    }
    Err(BackupError::Config(format!(
        "profile '{}' has no built-in nodes; provide REDIS_NODES or a [profiles.{}] table",
        profile, profile
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cluster.profile, "local");
        assert_eq!(config.backup.chunk_keys, 5000);
        assert_eq!(config.backup.match_pattern, "*");
        assert_eq!(config.restore.progress_every, 1000);
        assert_eq!(config.verify.sample, 500);
        assert!(config.storage.uri.is_none());
    }

    #[test]
    fn test_local_profile_defaults() {
        let cluster = Config::default().cluster_config(None, None).unwrap();
        assert_eq!(cluster.profile, "local");
        assert_eq!(cluster.nodes.len(), 6);
        assert_eq!(cluster.nodes[0], NodeAddr::new("localhost", 7001));
        assert_eq!(cluster.nodes[5], NodeAddr::new("localhost", 7006));
    }

    #[test]
    fn test_other_profile_requires_nodes() {
        let err = Config::default().cluster_config(Some("prd"), None).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_override_wins() {
        let cluster = Config::default()
            .cluster_config(Some("prd"), Some("10.0.0.1:6379,10.0.0.2:6379"))
            .unwrap();
        assert_eq!(cluster.profile, "prd");
        assert_eq!(cluster.nodes.len(), 2);
    }

    #[test]
    fn test_from_toml_with_profiles() {
        let toml = r#"
            [cluster]
            profile = "dev"

            [profiles.dev]
            nodes = ["dev-redis-1:6379", "dev-redis-2:6379"]

            [backup]
            match = "session:*"
            chunk_keys = 100
            compression = "zstd"

            [storage]
            uri = "s3://backups/redis"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.backup.match_pattern, "session:*");
        assert_eq!(config.backup.chunk_keys, 100);
        assert_eq!(config.backup.compression, Compression::Zstd);
        assert_eq!(config.backup.scan_count, 1000);
        assert_eq!(config.storage.uri.as_deref(), Some("s3://backups/redis"));

        let cluster = config.cluster_config(None, None).unwrap();
        assert_eq!(cluster.profile, "dev");
        assert_eq!(cluster.nodes[1], NodeAddr::new("dev-redis-2", 6379));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("redis-backup.toml");
        std::fs::write(&path, "[verify]\nsample = 42\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.verify.sample, 42);
        assert_eq!(config.log.level, "info");
    }
}
