//! Restore pipeline: resolve the source, extract, replay.

pub mod apply;

use crate::archive::{self, Compression};
use crate::chunk::ChunkReader;
use crate::cluster::Keyspace;
use crate::events::{EventSink, PipelineEvent};
use crate::storage::{BackupObject, ObjectStoreGateway};
use crate::utils::run_blocking;
use crate::{BackupError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use self::apply::{ApplyOutcome, RestoreApplier, RestoreOptions, RestoreStats};

/// Where a restore reads its backup from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreSource {
    /// A local backup directory or archive
    Path(PathBuf),
    /// Newest archive in the object store
    Latest,
    /// Archive of a specific backup in the object store
    ById(String),
}

impl fmt::Display for RestoreSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Latest => f.write_str("latest backup in object store"),
            Self::ById(id) => write!(f, "backup {} in object store", id),
        }
    }
}

/// Turn a source into a local backup directory, downloading and extracting
/// as needed.
pub async fn prepare_source(
    source: &RestoreSource,
    gateway: Option<&ObjectStoreGateway>,
    work_dir: &Path,
) -> Result<PathBuf> {
    match source {
        RestoreSource::Path(path) => {
            if Compression::from_path(path).is_some() {
                if !path.is_file() {
                    return Err(BackupError::Config(format!(
                        "archive not found: {}",
                        path.display()
                    )));
                }
                extract(path.clone(), work_dir).await
            } else if path.is_dir() {
                Ok(path.clone())
            } else {
                Err(BackupError::Config(format!(
                    "input is neither a backup directory nor a .tar.gz/.tar.zst archive: {}",
                    path.display()
                )))
            }
        }
        RestoreSource::Latest | RestoreSource::ById(_) => {
            let gateway = gateway.ok_or_else(|| {
                BackupError::Config("S3_URI is required for --from-s3".into())
            })?;
            let object = select_object(source, gateway).await?;

            let local = work_dir.join(object.file_name());
            info!("Downloading backup {}", object.key);
            gateway.download(&object.key, &local).await?;
            extract(local, work_dir).await
        }
    }
}

async fn select_object(source: &RestoreSource, gateway: &ObjectStoreGateway) -> Result<BackupObject> {
    let objects = gateway.list().await?;
    if objects.is_empty() {
        return Err(BackupError::Config(format!(
            "No backups found in {}",
            gateway.location()
        )));
    }

    match source {
        RestoreSource::ById(id) => gateway
            .select_by_id(objects, id)
            .ok_or_else(|| BackupError::Config(format!("Backup id not found: {}", id))),
        _ => objects
            .into_iter()
            .next()
            .ok_or_else(|| BackupError::Config("No backups found".into())),
    }
}

async fn extract(archive_path: PathBuf, work_dir: &Path) -> Result<PathBuf> {
    let work_dir = work_dir.to_path_buf();
    run_blocking(move || archive::extract_archive(&archive_path, &work_dir)).await
}

pub struct RestoreOrchestrator {
    events: Arc<dyn EventSink>,
    cancel: CancellationToken,
}

impl RestoreOrchestrator {
    pub fn new(events: Arc<dyn EventSink>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Replay every record of `backup_dir` in file and line order.
    pub async fn run<K>(&self, keyspace: &mut K, backup_dir: &Path, options: RestoreOptions) -> Result<RestoreStats>
    where
        K: Keyspace + ?Sized,
    {
        let records = ChunkReader::open(backup_dir)?;
        self.events.emit(PipelineEvent::RestoreStarted {
            source: backup_dir.display().to_string(),
        });

        let mut applier = RestoreApplier::new(options, Arc::clone(&self.events));
        for record in records {
            if self.cancel.is_cancelled() {
                warn!("Restore interrupted after {} keys", applier.stats().restored);
                return Err(BackupError::Interrupted);
            }
            let record = record?;
            applier.apply(keyspace, &record).await;
        }

        let stats = applier.into_stats();
        self.events.emit(PipelineEvent::RestoreCompleted {
            restored: stats.restored,
            skipped_existing: stats.skipped_existing,
            failed: stats.failed,
            group_failures: stats.group_failures,
        });
        Ok(stats)
    }
}
