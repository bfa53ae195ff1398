//! Backup manifest, serialized as `metadata.json` in each backup directory.

use crate::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the manifest inside a backup directory.
pub const MANIFEST_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
    pub env_profile: String,
    #[serde(rename = "match")]
    pub match_pattern: String,
    pub chunk_keys: usize,
    /// Records written; only known once the scan has finished.
    #[serde(default)]
    pub total_keys: u64,
}

impl BackupManifest {
    pub fn write_to(&self, backup_dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(backup_dir.join(MANIFEST_FILE), json)?;
        Ok(())
    }

    pub fn read_from(backup_dir: &Path) -> Result<Self> {
        let bytes = std::fs::read(backup_dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// `redis-backup-<profile>-<YYYYMMDDThhmmssZ>-<4 hex>`
pub fn generate_backup_id(profile: &str, now: DateTime<Utc>) -> String {
    let suffix: u16 = rand::thread_rng().gen();
    format!(
        "redis-backup-{}-{}-{:04x}",
        profile,
        now.format("%Y%m%dT%H%M%SZ"),
        suffix
    )
}
