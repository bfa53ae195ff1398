//! redis-backup library
//!
//! Logical backup, restore and sampled verification for Redis Cluster, with
//! archives kept in S3 or any other `object_store` backend.

pub mod archive;
pub mod backup;
pub mod chunk;
pub mod cluster;
pub mod codec;
pub mod commands;
pub mod config;
pub mod events;
pub mod progress;
pub mod record;
pub mod restore;
pub mod shutdown;
pub mod storage;
pub mod utils;
pub mod verify;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
