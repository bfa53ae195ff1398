//! Structured pipeline events.
//!
//! The orchestrators report progress and recoverable failures as
//! [`PipelineEvent`]s through an [`EventSink`]. The CLI logs them; services
//! and tests can subscribe through a broadcast channel instead.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Maximum number of queued events per subscriber
const BROADCAST_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PipelineEvent {
    #[serde(rename = "backup:started")]
    BackupStarted {
        backup_id: String,
        profile: String,
        pattern: String,
    },

    /// A part file was flushed
    #[serde(rename = "backup:chunk")]
    ChunkWritten { index: usize, records: usize },

    #[serde(rename = "backup:completed")]
    BackupCompleted {
        backup_id: String,
        total_keys: u64,
        skipped_keys: u64,
        archive: String,
        archive_bytes: u64,
    },

    #[serde(rename = "backup:uploaded")]
    Uploaded { key: String, bytes: u64 },

    #[serde(rename = "restore:started")]
    RestoreStarted { source: String },

    #[serde(rename = "restore:completed")]
    RestoreCompleted {
        restored: u64,
        skipped_existing: u64,
        failed: u64,
        group_failures: u64,
    },

    #[serde(rename = "verify:completed")]
    VerifyCompleted {
        total: u64,
        sampled: u64,
        missing: u64,
        ttl_mismatch: u64,
        passed: bool,
    },

    /// Periodic key counter for long runs
    #[serde(rename = "progress")]
    Progress {
        operation: String,
        processed: u64,
        keys_per_second: u64,
    },

    /// One key could not be dumped or written and was skipped
    #[serde(rename = "key:failed")]
    KeyFailed {
        operation: String,
        key: String,
        error: String,
    },

    /// Best-effort consumer group read or create failed
    #[serde(rename = "group:failed")]
    GroupFailed {
        key: String,
        group: Option<String>,
        error: String,
    },

    /// Terminal failure of a run
    #[serde(rename = "failed")]
    Failed { operation: String, error: String },
}

/// Receiver of pipeline events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Writes every event as a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::BackupStarted {
                backup_id,
                profile,
                pattern,
            } => info!("Backup {} started (profile: {}, match: {})", backup_id, profile, pattern),
            PipelineEvent::ChunkWritten { index, records } => {
                info!("Chunk {} written ({} keys)", index, records)
            }
            PipelineEvent::BackupCompleted {
                backup_id,
                total_keys,
                skipped_keys,
                archive,
                archive_bytes,
            } => info!(
                "Backup {} complete: {} keys ({} skipped), archive {} ({})",
                backup_id,
                total_keys,
                skipped_keys,
                archive,
                crate::progress::format_bytes(archive_bytes)
            ),
            PipelineEvent::Uploaded { key, bytes } => {
                info!("Uploaded {} ({})", key, crate::progress::format_bytes(bytes))
            }
            PipelineEvent::RestoreStarted { source } => info!("Restoring from {}", source),
            PipelineEvent::RestoreCompleted {
                restored,
                skipped_existing,
                failed,
                group_failures,
            } => info!(
                "Restore complete: {} restored, {} skipped (existing), {} failed, {} group failures",
                restored, skipped_existing, failed, group_failures
            ),
            PipelineEvent::VerifyCompleted {
                total,
                sampled,
                missing,
                ttl_mismatch,
                passed,
            } => {
                let verdict = if passed { "PASSED" } else { "FAILED" };
                info!(
                    "Verify {}: {} records, {} sampled, {} missing, {} ttl mismatches",
                    verdict, total, sampled, missing, ttl_mismatch
                )
            }
            PipelineEvent::Progress {
                operation,
                processed,
                keys_per_second,
            } => info!("{}: {} keys processed ({} keys/s)", operation, processed, keys_per_second),
            PipelineEvent::KeyFailed { operation, key, error } => {
                warn!("{}: skipping key '{}': {}", operation, key, error)
            }
            PipelineEvent::GroupFailed { key, group, error } => match group {
                Some(group) => warn!("Consumer group '{}' on '{}' skipped: {}", group, key, error),
                None => warn!("Consumer groups of '{}' unavailable: {}", key, error),
            },
            PipelineEvent::Failed { operation, error } => error!("{} failed: {}", operation, error),
        }
    }
}

/// Publishes events on a tokio broadcast channel.
///
/// Events emitted while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<PipelineEvent>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

/// Drain every event currently queued on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
