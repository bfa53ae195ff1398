//! Entry points of the four operations.
//!
//! Each `run_*` function builds its clients from the configuration, runs the
//! pipeline and maps the outcome to a process exit code. Terminal failures
//! are reported once, as a `Failed` event and an `error:` line on stderr.

use crate::backup::{BackupOptions, BackupOrchestrator};
use crate::cluster::RedisKeyspace;
use crate::config::Config;
use crate::events::{EventSink, PipelineEvent};
use crate::progress::format_bytes;
use crate::restore::{prepare_source, RestoreOptions, RestoreOrchestrator, RestoreSource};
use crate::storage::{BackupObject, ObjectStoreGateway};
use crate::utils::errors::{EXIT_FAILURE, EXIT_OK};
use crate::verify::Verifier;
use crate::{BackupError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a run needs besides its per-command arguments.
#[derive(Clone)]
pub struct RunContext {
    /// Configuration with command-line overrides already applied
    pub config: Config,
    /// Comma-separated node list that replaces the profile's nodes
    pub nodes_override: Option<String>,
    pub events: Arc<dyn EventSink>,
    pub cancel: CancellationToken,
}

impl RunContext {
    fn gateway(&self) -> Result<Option<ObjectStoreGateway>> {
        self.config
            .storage
            .uri
            .as_deref()
            .filter(|uri| !uri.is_empty())
            .map(ObjectStoreGateway::from_uri)
            .transpose()
    }

    async fn connect(&self) -> Result<RedisKeyspace> {
        let cluster = self
            .config
            .cluster_config(None, self.nodes_override.as_deref())?;
        RedisKeyspace::connect(&cluster).await
    }

    fn report(&self, operation: &str, result: Result<i32>) -> i32 {
        match result {
            Ok(code) => code,
            Err(e) => {
                self.events.emit(PipelineEvent::Failed {
                    operation: operation.to_string(),
                    error: e.to_string(),
                });
                eprintln!("error: {}", e);
                e.exit_code()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub source: RestoreSource,
    pub options: RestoreOptions,
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub input: PathBuf,
    pub sample: usize,
}

pub async fn run_backup(ctx: &RunContext) -> i32 {
    let result = backup(ctx).await;
    ctx.report("backup", result)
}

async fn backup(ctx: &RunContext) -> Result<i32> {
    let cluster = ctx.config.cluster_config(None, ctx.nodes_override.as_deref())?;
    let options = BackupOptions::from_config(&ctx.config, &cluster.profile);
    options.validate()?;
    let gateway = ctx.gateway()?;

    let mut keyspace = RedisKeyspace::connect(&cluster).await?;
    let summary = BackupOrchestrator::new(Arc::clone(&ctx.events), ctx.cancel.clone())
        .run(&mut keyspace, &options, gateway.as_ref())
        .await?;

    println!("Backup written: {}", summary.backup_dir.display());
    println!(
        "Archive: {} ({})",
        summary.archive.display(),
        format_bytes(summary.archive_bytes)
    );
    if let (Some(key), Some(gateway)) = (&summary.uploaded, &gateway) {
        let file_name = key.rsplit('/').next().unwrap_or(key);
        println!("Uploaded: {}/{}", gateway.location(), file_name);
    }
    Ok(EXIT_OK)
}

pub async fn run_restore(ctx: &RunContext, request: RestoreRequest) -> i32 {
    let result = restore(ctx, request).await;
    ctx.report("restore", result)
}

async fn restore(ctx: &RunContext, request: RestoreRequest) -> Result<i32> {
    // Resolve and unpack the source before touching the cluster.
    let gateway = ctx.gateway()?;
    let backup_dir = prepare_source(&request.source, gateway.as_ref(), &request.work_dir).await?;

    let mut keyspace = ctx.connect().await?;
    let stats = RestoreOrchestrator::new(Arc::clone(&ctx.events), ctx.cancel.clone())
        .run(&mut keyspace, &backup_dir, request.options)
        .await?;

    println!(
        "Restore complete. Restored {} keys ({} skipped as existing, {} failed).",
        stats.restored, stats.skipped_existing, stats.failed
    );
    Ok(EXIT_OK)
}

/// List archives newest first. Returns the exit code and the listing.
pub async fn run_list(ctx: &RunContext) -> (i32, Vec<BackupObject>) {
    match list(ctx).await {
        Ok(objects) => {
            if objects.is_empty() {
                println!("No backups found.");
            }
            for object in &objects {
                println!("{}", format_list_line(object));
            }
            (EXIT_OK, objects)
        }
        Err(e) => (ctx.report("list", Err(e)), Vec::new()),
    }
}

async fn list(ctx: &RunContext) -> Result<Vec<BackupObject>> {
    let gateway = ctx
        .gateway()?
        .ok_or_else(|| BackupError::Config("S3_URI is required to list backups".into()))?;
    gateway.list().await
}

/// `<rfc3339>\t<size>\t<key>`
pub fn format_list_line(object: &BackupObject) -> String {
    format!(
        "{}\t{:>10}\t{}",
        object.last_modified.to_rfc3339(),
        object.size,
        object.key
    )
}

pub async fn run_verify(ctx: &RunContext, request: VerifyRequest) -> i32 {
    let result = verify(ctx, request).await;
    ctx.report("verify", result)
}

async fn verify(ctx: &RunContext, request: VerifyRequest) -> Result<i32> {
    if !request.input.is_dir() {
        return Err(BackupError::Config(format!(
            "verify input must be a backup directory: {}",
            request.input.display()
        )));
    }

    let mut keyspace = ctx.connect().await?;
    let report = Verifier::new(request.sample)
        .with_cancel(ctx.cancel.clone())
        .verify(&mut keyspace, &request.input)
        .await?;

    ctx.events.emit(PipelineEvent::VerifyCompleted {
        total: report.total,
        sampled: report.sampled,
        missing: report.missing,
        ttl_mismatch: report.ttl_mismatch,
        passed: report.passed(),
    });

    if report.total == 0 {
        println!("No keys found in backup.");
        return Ok(EXIT_FAILURE);
    }
    println!(
        "Verify sample={} -> missing={}, ttl_mismatch={}",
        report.sampled, report.missing, report.ttl_mismatch
    );
    Ok(if report.passed() { EXIT_OK } else { EXIT_FAILURE })
}
