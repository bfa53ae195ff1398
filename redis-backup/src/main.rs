//! redis-backup - Main entry point
//!
//! Logical backup, restore, listing and verification for Redis Cluster.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use redis_backup::archive::Compression;
use redis_backup::commands::{self, RestoreRequest, RunContext, VerifyRequest};
use redis_backup::config::Config;
use redis_backup::events::TracingSink;
use redis_backup::restore::{RestoreOptions, RestoreSource};
use redis_backup::shutdown::InterruptHandler;
use redis_backup::{utils, BackupError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "redis-backup", author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", env = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Environment profile (local, dev, prd, ...)
    #[arg(long, env = "ENV_PROFILE", global = true)]
    env_profile: Option<String>,

    /// Comma-separated host:port seed nodes (overrides the profile)
    #[arg(long, env = "REDIS_NODES", global = true)]
    redis_nodes: Option<String>,

    /// Archive location, e.g. s3://bucket/prefix
    #[arg(long, env = "S3_URI", global = true)]
    s3_uri: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump matching keys into a chunked archive
    Backup {
        /// Key pattern passed to SCAN MATCH
        #[arg(long = "match", value_name = "PATTERN")]
        match_pattern: Option<String>,

        /// Records per chunk file
        #[arg(long)]
        chunk_keys: Option<usize>,

        /// Local output directory
        #[arg(short, long, env = "BACKUP_DIR")]
        out_dir: Option<PathBuf>,

        /// Archive compression (gzip, zstd)
        #[arg(long)]
        compression: Option<String>,
    },

    /// Replay a backup into the cluster
    Restore {
        /// Backup directory or .tar.gz/.tar.zst archive
        #[arg(short, long, conflicts_with = "from_s3")]
        input: Option<PathBuf>,

        /// Fetch the archive from the object store
        #[arg(long, value_enum)]
        from_s3: Option<FromS3>,

        /// Backup id for --from-s3 by-id
        #[arg(long)]
        backup_id: Option<String>,

        /// Replace keys that already exist
        #[arg(long)]
        overwrite: bool,

        /// Recreate stream consumer groups
        #[arg(long)]
        recreate_stream_groups: bool,

        /// Directory for downloads and extraction
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },

    /// List archives in the object store, newest first
    List,

    /// Check a sample of a backup against the live cluster
    Verify {
        /// Backup directory
        #[arg(short, long)]
        input: PathBuf,

        /// Number of records to sample
        #[arg(long)]
        sample: Option<usize>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FromS3 {
    Latest,
    ById,
}

fn restore_source(
    input: Option<PathBuf>,
    from_s3: Option<FromS3>,
    backup_id: Option<String>,
) -> redis_backup::Result<RestoreSource> {
    match (input, from_s3) {
        (Some(path), _) => Ok(RestoreSource::Path(path)),
        (None, Some(FromS3::Latest)) => Ok(RestoreSource::Latest),
        (None, Some(FromS3::ById)) => backup_id.map(RestoreSource::ById).ok_or_else(|| {
            BackupError::Config("--backup-id is required when using --from-s3 by-id".into())
        }),
        (None, None) => Err(BackupError::Config(
            "One of --input or --from-s3 is required".into(),
        )),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_level = args.log_level.clone().unwrap_or_else(|| config.log.level.clone());
    utils::logger::init(&log_level)?;

    tracing::debug!("Starting redis-backup v{}", env!("CARGO_PKG_VERSION"));

    if let Some(profile) = args.env_profile {
        config.cluster.profile = profile;
    }
    if let Some(uri) = args.s3_uri {
        config.storage.uri = Some(uri);
    }

    let interrupts = InterruptHandler::new();
    let ctx = RunContext {
        config,
        nodes_override: args.redis_nodes,
        events: Arc::new(TracingSink),
        cancel: interrupts.token(),
    };
    let listener = interrupts.spawn();

    let code = match args.command {
        Command::Backup {
            match_pattern,
            chunk_keys,
            out_dir,
            compression,
        } => {
            let mut ctx = ctx.clone();
            let backup = &mut ctx.config.backup;
            if let Some(pattern) = match_pattern {
                backup.match_pattern = pattern;
            }
            if let Some(chunk_keys) = chunk_keys {
                backup.chunk_keys = chunk_keys;
            }
            if let Some(out_dir) = out_dir {
                backup.out_dir = out_dir;
            }
            match compression.map(|c| c.parse::<Compression>()).transpose() {
                Ok(Some(compression)) => backup.compression = compression,
                Ok(None) => {}
                Err(e) => return Ok(fail(&e)),
            }
            commands::run_backup(&ctx).await
        }
        Command::Restore {
            input,
            from_s3,
            backup_id,
            overwrite,
            recreate_stream_groups,
            work_dir,
        } => {
            let source = match restore_source(input, from_s3, backup_id) {
                Ok(source) => source,
                Err(e) => return Ok(fail(&e)),
            };
            let request = RestoreRequest {
                source,
                options: RestoreOptions {
                    overwrite,
                    recreate_groups: recreate_stream_groups,
                    progress_every: ctx.config.restore.progress_every,
                },
                work_dir: work_dir.unwrap_or_else(|| ctx.config.restore.work_dir.clone()),
            };
            commands::run_restore(&ctx, request).await
        }
        Command::List => commands::run_list(&ctx).await.0,
        Command::Verify { input, sample } => {
            let request = VerifyRequest {
                input,
                sample: sample.unwrap_or(ctx.config.verify.sample),
            };
            commands::run_verify(&ctx, request).await
        }
    };

    // Stop the signal listener
    ctx.cancel.cancel();
    let _ = listener.await;

    Ok(ExitCode::from(code as u8))
}

fn fail(e: &BackupError) -> ExitCode {
    eprintln!("error: {}", e);
    ExitCode::from(e.exit_code() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_restore_source_selection() {
        let source = restore_source(None, Some(FromS3::ById), Some("b1".into())).unwrap();
        assert_eq!(source, RestoreSource::ById("b1".into()));

        assert!(restore_source(None, Some(FromS3::ById), None).unwrap_err().is_config());
        assert!(restore_source(None, None, None).unwrap_err().is_config());
        assert_eq!(
            restore_source(Some(PathBuf::from("/b")), None, None).unwrap(),
            RestoreSource::Path(PathBuf::from("/b"))
        );
    }

    #[test]
    fn test_parse_restore_flags() {
        let args = Args::try_parse_from([
            "redis-backup",
            "--env-profile",
            "dev",
            "restore",
            "--from-s3",
            "by-id",
            "--backup-id",
            "redis-backup-dev-20240101T000000Z-abcd",
            "--overwrite",
        ])
        .unwrap();
        assert_eq!(args.env_profile.as_deref(), Some("dev"));
        match args.command {
            Command::Restore {
                from_s3, overwrite, ..
            } => {
                assert_eq!(from_s3, Some(FromS3::ById));
                assert!(overwrite);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
