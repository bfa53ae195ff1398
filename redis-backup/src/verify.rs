//! Sampled post-restore verification.
//!
//! A random sample of the backup's records is checked against the live
//! cluster: the key must exist, and a recorded TTL must still be within
//! [`TTL_TOLERANCE_MS`] of the live one.

use crate::chunk::ChunkReader;
use crate::cluster::Keyspace;
use crate::record::KeyRecord;
use crate::{BackupError, Result};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Allowed drift between recorded and live TTL, inclusive.
pub const TTL_TOLERANCE_MS: u64 = 5000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Records in the backup
    pub total: u64,
    pub sampled: u64,
    pub missing: u64,
    pub ttl_mismatch: u64,
}

impl VerifyReport {
    /// Passes when the backup had records and none of the sampled keys are
    /// missing. TTL drift is reported but does not fail verification.
    pub fn passed(&self) -> bool {
        self.total > 0 && self.missing == 0
    }
}

/// True when a live TTL is acceptable for a record that had `expected_ms`.
pub fn ttl_matches(expected_ms: u64, live_ms: Option<u64>) -> bool {
    match live_ms {
        Some(live) => live.abs_diff(expected_ms) <= TTL_TOLERANCE_MS,
        None => false,
    }
}

pub struct Verifier {
    sample: usize,
    cancel: CancellationToken,
}

impl Verifier {
    pub fn new(sample: usize) -> Self {
        Self {
            sample,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Check a sample of the records in `backup_dir` against `keyspace`.
    pub async fn verify<K>(&self, keyspace: &mut K, backup_dir: &Path) -> Result<VerifyReport>
    where
        K: Keyspace + ?Sized,
    {
        let records = ChunkReader::read_all(backup_dir)?;
        let sample: Vec<&KeyRecord> = {
            let mut rng = rand::thread_rng();
            records.choose_multiple(&mut rng, self.sample).collect()
        };

        let mut report = VerifyReport {
            total: records.len() as u64,
            sampled: sample.len() as u64,
            ..Default::default()
        };

        for record in sample {
            if self.cancel.is_cancelled() {
                return Err(BackupError::Interrupted);
            }

            if !keyspace.exists(&record.key).await? {
                debug!("Missing key '{}'", record.key);
                report.missing += 1;
                continue;
            }
            if let Some(expected) = record.pttl {
                let live = keyspace.pttl(&record.key).await?;
                if !ttl_matches(expected, live) {
                    debug!("TTL drift on '{}': recorded {} ms, live {:?}", record.key, expected, live);
                    report.ttl_mismatch += 1;
                }
            }
        }

        Ok(report)
    }
}
