//! Backup pipeline: scan, dump, chunk, archive, upload.

pub mod manifest;
pub mod scan;

use crate::archive::{self, Compression};
use crate::chunk::{ChunkWriter, KEYS_DIR};
use crate::cluster::Keyspace;
use crate::codec;
use crate::config::Config;
use crate::events::{EventSink, PipelineEvent};
use crate::progress::{format_duration, KeyProgress};
use crate::storage::ObjectStoreGateway;
use crate::utils::run_blocking;
use crate::{BackupError, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use self::manifest::{generate_backup_id, BackupManifest, MANIFEST_FILE};
pub use self::scan::{KeyEnumerator, ScannedKey};

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub profile: String,
    pub match_pattern: String,
    pub chunk_keys: usize,
    pub scan_count: usize,
    pub out_dir: PathBuf,
    pub compression: Compression,
    /// Emit a progress event every N scanned keys
    pub progress_every: u64,
}

impl BackupOptions {
    pub fn from_config(config: &Config, profile: &str) -> Self {
        Self {
            profile: profile.to_string(),
            match_pattern: config.backup.match_pattern.clone(),
            chunk_keys: config.backup.chunk_keys,
            scan_count: config.backup.scan_count,
            out_dir: config.backup.out_dir.clone(),
            compression: config.backup.compression,
            progress_every: config.restore.progress_every,
        }
    }

    /// Reject settings that would fail only after the scan has started.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_keys == 0 {
            return Err(BackupError::Config("--chunk-keys must be at least 1".into()));
        }
        if self.match_pattern.is_empty() {
            return Err(BackupError::Config("--match must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupSummary {
    pub backup_id: String,
    pub backup_dir: PathBuf,
    pub archive: PathBuf,
    pub archive_bytes: u64,
    pub total_keys: u64,
    /// Keys that could not be dumped or had an unsupported type
    pub skipped_keys: u64,
    pub chunks: usize,
    /// Object key of the uploaded archive
    pub uploaded: Option<String>,
}

pub struct BackupOrchestrator {
    events: Arc<dyn EventSink>,
    cancel: CancellationToken,
}

impl BackupOrchestrator {
    pub fn new(events: Arc<dyn EventSink>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    pub async fn run<K>(
        &self,
        keyspace: &mut K,
        options: &BackupOptions,
        gateway: Option<&ObjectStoreGateway>,
    ) -> Result<BackupSummary>
    where
        K: Keyspace + ?Sized,
    {
        options.validate()?;

        let created_at = Utc::now();
        let backup_id = generate_backup_id(&options.profile, created_at);
        let backup_dir = options.out_dir.join(&backup_id);
        let mut writer = ChunkWriter::new(backup_dir.join(KEYS_DIR), options.chunk_keys)?;

        self.events.emit(PipelineEvent::BackupStarted {
            backup_id: backup_id.clone(),
            profile: options.profile.clone(),
            pattern: options.match_pattern.clone(),
        });

        let mut keys = KeyEnumerator::new(options.match_pattern.clone(), options.scan_count);
        let mut progress = KeyProgress::new(options.progress_every);
        let mut skipped_keys = 0u64;

        while let Some(scanned) = keys.next_key(keyspace).await? {
            if self.cancel.is_cancelled() {
                warn!("Backup {} interrupted after {} keys", backup_id, progress.processed());
                return Err(BackupError::Interrupted);
            }

            let key = match scanned {
                ScannedKey::Name(key) => key,
                ScannedKey::Undecodable(name) => {
                    warn!("Skipping key with a non UTF-8 name: {:?}", name);
                    skipped_keys += 1;
                    self.events.emit(PipelineEvent::KeyFailed {
                        operation: "backup".into(),
                        key: name,
                        error: "key name is not valid UTF-8".into(),
                    });
                    continue;
                }
            };

            match codec::dump_key(keyspace, &key, self.events.as_ref()).await {
                Ok(Some(record)) => {
                    if let Some(chunk) = writer.push(record)? {
                        self.events.emit(PipelineEvent::ChunkWritten {
                            index: writer.chunks_written() - 1,
                            records: chunk.records,
                        });
                    }
                }
                Ok(None) => skipped_keys += 1,
                Err(e) => {
                    skipped_keys += 1;
                    self.events.emit(PipelineEvent::KeyFailed {
                        operation: "backup".into(),
                        key: key.clone(),
                        error: e.to_string(),
                    });
                }
            }

            if progress.tick() {
                self.events.emit(PipelineEvent::Progress {
                    operation: "backup".into(),
                    processed: progress.processed(),
                    keys_per_second: progress.keys_per_second(),
                });
            }
        }

        let chunks_before = writer.chunks_written();
        let (total_keys, last) = writer.finish()?;
        if let Some(chunk) = &last {
            self.events.emit(PipelineEvent::ChunkWritten {
                index: chunks_before,
                records: chunk.records,
            });
        }
        let chunks = chunks_before + usize::from(last.is_some());

        let manifest = BackupManifest {
            backup_id: backup_id.clone(),
            created_at,
            env_profile: options.profile.clone(),
            match_pattern: options.match_pattern.clone(),
            chunk_keys: options.chunk_keys,
            total_keys,
        };
        manifest.write_to(&backup_dir)?;
        info!(
            "Backup written: {} ({} keys in {} chunks, {})",
            backup_dir.display(),
            total_keys,
            chunks,
            format_duration(progress.elapsed())
        );

        let compression = options.compression;
        let dir = backup_dir.clone();
        let archive = run_blocking(move || archive::build_archive(&dir, compression)).await?;
        let archive_bytes = tokio::fs::metadata(&archive).await?.len();

        self.events.emit(PipelineEvent::BackupCompleted {
            backup_id: backup_id.clone(),
            total_keys,
            skipped_keys,
            archive: archive.display().to_string(),
            archive_bytes,
        });

        let uploaded = match gateway {
            Some(gateway) => {
                let key = gateway.upload(&archive).await?;
                self.events.emit(PipelineEvent::Uploaded {
                    key: key.clone(),
                    bytes: archive_bytes,
                });
                Some(key)
            }
            None => None,
        };

        Ok(BackupSummary {
            backup_id,
            backup_dir,
            archive,
            archive_bytes,
            total_keys,
            skipped_keys,
            chunks,
            uploaded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{list_part_files, ChunkReader};
    use crate::cluster::memory::{MemoryKeyspace, StoredValue};
    use crate::events::{drain, BroadcastSink};
    use crate::storage::StorageLocation;
    use object_store::memory::InMemory;
    use tempfile::TempDir;

    fn options(out_dir: PathBuf, chunk_keys: usize) -> BackupOptions {
        BackupOptions {
            profile: "local".into(),
            match_pattern: "*".into(),
            chunk_keys,
            scan_count: 10,
            out_dir,
            compression: Compression::Gzip,
            progress_every: 1000,
        }
    }

    fn orchestrator() -> (BackupOrchestrator, BroadcastSink) {
        let sink = BroadcastSink::new();
        let orchestrator = BackupOrchestrator::new(Arc::new(sink.clone()), CancellationToken::new());
        (orchestrator, sink)
    }

    #[tokio::test]
    async fn test_backup_writes_chunks_manifest_and_archive() {
        let temp = TempDir::new().unwrap();
        let mut ks = MemoryKeyspace::new();
        for i in 0..5 {
            ks.insert(format!("k{}", i), StoredValue::String(i.to_string()));
        }
        let (orchestrator, _) = orchestrator();

        let summary = orchestrator
            .run(&mut ks, &options(temp.path().to_path_buf(), 2), None)
            .await
            .unwrap();

        assert_eq!(summary.total_keys, 5);
        assert_eq!(summary.chunks, 3);
        assert_eq!(list_part_files(&summary.backup_dir).unwrap().len(), 3);
        assert!(summary.archive.is_file());
        assert!(summary.archive_bytes > 0);
        assert_eq!(
            summary.archive.file_name().unwrap().to_string_lossy(),
            format!("{}.tar.gz", summary.backup_id)
        );

        let manifest = BackupManifest::read_from(&summary.backup_dir).unwrap();
        assert_eq!(manifest.total_keys, 5);
        assert_eq!(manifest.chunk_keys, 2);
        assert_eq!(manifest.env_profile, "local");
    }

    #[tokio::test]
    async fn test_failing_key_is_skipped() {
        let temp = TempDir::new().unwrap();
        let mut ks = MemoryKeyspace::new();
        ks.insert("a", StoredValue::String("1".into()));
        ks.insert("b", StoredValue::String("2".into()));
        ks.insert("c", StoredValue::Other("ReJSON-RL".into()));
        ks.fail_key("b");
        let (orchestrator, sink) = orchestrator();
        let mut rx = sink.subscribe();

        let summary = orchestrator
            .run(&mut ks, &options(temp.path().to_path_buf(), 10), None)
            .await
            .unwrap();

        assert_eq!(summary.total_keys, 1);
        assert_eq!(summary.skipped_keys, 2);
        let records = ChunkReader::read_all(&summary.backup_dir).unwrap();
        assert_eq!(records[0].key, "a");

        let failed: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::KeyFailed { key, .. } => Some(key),
                _ => None,
            })
            .collect();
        assert_eq!(failed, vec!["b"]);
    }

    #[tokio::test]
    async fn test_binary_key_name_is_skipped() {
        let temp = TempDir::new().unwrap();
        let mut ks = MemoryKeyspace::new();
        ks.insert("good", StoredValue::String("1".into()));
        ks.add_binary_name("\u{FFFD}\u{1}");
        let (orchestrator, sink) = orchestrator();
        let mut rx = sink.subscribe();

        let summary = orchestrator
            .run(&mut ks, &options(temp.path().to_path_buf(), 10), None)
            .await
            .unwrap();

        assert_eq!(summary.total_keys, 1);
        assert_eq!(summary.skipped_keys, 1);
        let records = ChunkReader::read_all(&summary.backup_dir).unwrap();
        assert_eq!(records[0].key, "good");
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            PipelineEvent::KeyFailed { key, .. } if key == "\u{FFFD}\u{1}"
        )));
    }

    #[tokio::test]
    async fn test_empty_match_still_produces_archive() {
        let temp = TempDir::new().unwrap();
        let mut ks = MemoryKeyspace::new();
        ks.insert("a", StoredValue::String("1".into()));
        let (orchestrator, _) = orchestrator();

        let mut opts = options(temp.path().to_path_buf(), 10);
        opts.match_pattern = "nomatch:*".into();
        let summary = orchestrator.run(&mut ks, &opts, None).await.unwrap();

        assert_eq!(summary.total_keys, 0);
        assert_eq!(summary.chunks, 0);
        assert!(summary.archive.is_file());
    }

    #[tokio::test]
    async fn test_cancelled_backup_is_interrupted() {
        let temp = TempDir::new().unwrap();
        let mut ks = MemoryKeyspace::new();
        ks.insert("a", StoredValue::String("1".into()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let orchestrator = BackupOrchestrator::new(Arc::new(BroadcastSink::new()), cancel);

        let err = orchestrator
            .run(&mut ks, &options(temp.path().to_path_buf(), 10), None)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 130);
    }

    #[tokio::test]
    async fn test_zero_chunk_keys_rejected_before_scan() {
        let temp = TempDir::new().unwrap();
        let mut ks = MemoryKeyspace::new();
        let (orchestrator, _) = orchestrator();

        let err = orchestrator
            .run(&mut ks, &options(temp.path().to_path_buf(), 0), None)
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_backup_uploads_archive() {
        let temp = TempDir::new().unwrap();
        let mut ks = MemoryKeyspace::new();
        ks.insert("a", StoredValue::String("1".into()));
        let gateway = ObjectStoreGateway::new(
            Arc::new(InMemory::new()),
            StorageLocation::parse("s3://bucket/redis").unwrap(),
        );
        let (orchestrator, _) = orchestrator();

        let summary = orchestrator
            .run(&mut ks, &options(temp.path().to_path_buf(), 10), Some(&gateway))
            .await
            .unwrap();

        let expected = format!("redis/{}.tar.gz", summary.backup_id);
        assert_eq!(summary.uploaded.as_deref(), Some(expected.as_str()));
        assert_eq!(gateway.latest().await.unwrap().unwrap().key, expected);
    }
}
