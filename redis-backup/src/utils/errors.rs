//! Custom error types for the backup tool.

use thiserror::Error;

/// Exit code for a successful run.
pub const EXIT_OK: i32 = 0;

/// Exit code for a verification failure or any other reported failure.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for a run stopped by SIGINT/SIGTERM.
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Error, Debug)]
pub enum BackupError {
    /// Missing or invalid configuration, raised before any destructive work.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed chunk line, missing `keys/` directory or unusable archive.
    #[error("Archive format error: {0}")]
    ArchiveFormat(String),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A reply from the cluster did not have the expected shape.
    #[error("Unexpected reply: {0}")]
    Decode(String),

    /// Error reported by a non-Redis keyspace implementation.
    #[error("Keyspace error: {0}")]
    Keyspace(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Interrupted")]
    Interrupted,
}

impl BackupError {
    /// Process exit code for a run that terminated with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        }
    }

    /// Returns true if this error was raised by configuration validation.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(BackupError::Interrupted.exit_code(), 130);
        assert_eq!(BackupError::Config("missing input".into()).exit_code(), 1);
        assert_eq!(BackupError::ArchiveFormat("bad line".into()).exit_code(), 1);
    }

    #[test]
    fn test_messages_are_single_line() {
        let err = BackupError::Config("S3_URI is required for --from-s3".into());
        let msg = err.to_string();
        assert_eq!(msg, "Configuration error: S3_URI is required for --from-s3");
        assert!(!msg.contains('\n'));
    }
}
