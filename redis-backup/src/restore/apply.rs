//! Replays records against a live keyspace.

use crate::cluster::Keyspace;
use crate::codec;
use crate::events::{EventSink, PipelineEvent};
use crate::progress::KeyProgress;
use crate::record::{KeyRecord, KeyValue};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Conflict and metadata policy for a restore.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Replace keys that already exist instead of skipping them
    pub overwrite: bool,

    /// Recreate consumer groups recorded for streams
    pub recreate_groups: bool,

    /// Emit a progress event every N processed records
    pub progress_every: u64,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            recreate_groups: false,
            progress_every: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreStats {
    /// Records applied (including empty collections that needed no write)
    pub restored: u64,
    /// Records skipped because the key already existed
    pub skipped_existing: u64,
    /// Records whose write failed
    pub failed: u64,
    /// Consumer groups that could not be recreated
    pub group_failures: u64,
}

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Restored,
    SkippedExisting,
    Failed,
}

pub struct RestoreApplier {
    options: RestoreOptions,
    events: Arc<dyn EventSink>,
    progress: KeyProgress,
    stats: RestoreStats,
}

impl RestoreApplier {
    pub fn new(options: RestoreOptions, events: Arc<dyn EventSink>) -> Self {
        let progress = KeyProgress::new(options.progress_every);
        Self {
            options,
            events,
            progress,
            stats: RestoreStats::default(),
        }
    }

    /// Apply one record. A failing write is reported and counted; it never
    /// stops the restore.
    pub async fn apply<K>(&mut self, keyspace: &mut K, record: &KeyRecord) -> ApplyOutcome
    where
        K: Keyspace + ?Sized,
    {
        let outcome = match self.write(keyspace, record).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.events.emit(PipelineEvent::KeyFailed {
                    operation: "restore".into(),
                    key: record.key.clone(),
                    error: e.to_string(),
                });
                ApplyOutcome::Failed
            }
        };

        match outcome {
            ApplyOutcome::Restored => self.stats.restored += 1,
            ApplyOutcome::SkippedExisting => self.stats.skipped_existing += 1,
            ApplyOutcome::Failed => self.stats.failed += 1,
        }

        if self.progress.tick() {
            self.events.emit(PipelineEvent::Progress {
                operation: "restore".into(),
                processed: self.progress.processed(),
                keys_per_second: self.progress.keys_per_second(),
            });
        }
        outcome
    }

    async fn write<K>(&mut self, keyspace: &mut K, record: &KeyRecord) -> Result<ApplyOutcome>
    where
        K: Keyspace + ?Sized,
    {
        let key = record.key.as_str();
        if keyspace.exists(key).await? {
            if !self.options.overwrite {
                debug!("Key '{}' exists, skipping", key);
                return Ok(ApplyOutcome::SkippedExisting);
            }
            keyspace.delete(key).await?;
        }

        let mut written = codec::write_value(keyspace, key, &record.value).await?;

        if self.options.recreate_groups {
            if let KeyValue::Stream { groups, .. } = &record.value {
                for group in groups {
                    match keyspace.stream_group_create(key, group).await {
                        Ok(()) => written = true,
                        Err(e) => {
                            self.stats.group_failures += 1;
                            self.events.emit(PipelineEvent::GroupFailed {
                                key: key.to_string(),
                                group: Some(group.name.clone()),
                                error: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        if written {
            if let Some(ttl) = record.pttl {
                keyspace.pexpire(key, ttl).await?;
            }
        }

        Ok(ApplyOutcome::Restored)
    }

    pub fn stats(&self) -> &RestoreStats {
        &self.stats
    }

    pub fn into_stats(self) -> RestoreStats {
        self.stats
    }
}
