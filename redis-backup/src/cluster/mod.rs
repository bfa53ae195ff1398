//! Client boundary between the pipeline and a key-value cluster.
//!
//! The pipeline only talks to a cluster through [`Keyspace`]. Every method
//! returns values already normalized into the canonical record types, so
//! callers never inspect raw client replies.

pub mod memory;
pub mod nodes;
pub mod redis_cluster;
pub mod value;

use crate::record::{ConsumerGroup, ScoredMember, StreamEntry};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

pub use self::memory::MemoryKeyspace;
pub use self::nodes::NodeAddr;
pub use self::redis_cluster::RedisKeyspace;

/// Position of a scan across the shards of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanCursor {
    /// Index of the shard being scanned.
    pub shard: usize,
    /// Cursor returned by the shard's last `SCAN` reply.
    pub position: u64,
}

/// One page of scan results.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub keys: Vec<String>,
    /// Names that could not be decoded; reported and skipped by the caller.
    pub undecodable: Vec<String>,
    /// `None` once every shard has been exhausted.
    pub next: Option<ScanCursor>,
}

/// Operations the backup pipeline needs from a cluster.
#[async_trait]
pub trait Keyspace: Send {
    /// Fetch one page of keys matching `pattern`.
    async fn scan(&mut self, cursor: ScanCursor, pattern: &str, count: usize) -> Result<ScanPage>;

    /// Raw `TYPE` reply (`string`, `hash`, ..., `none`).
    async fn key_type(&mut self, key: &str) -> Result<String>;

    /// Remaining time-to-live in milliseconds; `None` when the key has no
    /// expiry or does not exist.
    async fn pttl(&mut self, key: &str) -> Result<Option<u64>>;

    async fn exists(&mut self, key: &str) -> Result<bool>;

    async fn delete(&mut self, key: &str) -> Result<()>;

    async fn pexpire(&mut self, key: &str, ttl_ms: u64) -> Result<()>;

    async fn get_string(&mut self, key: &str) -> Result<String>;

    async fn set_string(&mut self, key: &str, value: &str) -> Result<()>;

    async fn hash_get_all(&mut self, key: &str) -> Result<BTreeMap<String, String>>;

    async fn hash_set(&mut self, key: &str, fields: &BTreeMap<String, String>) -> Result<()>;

    async fn list_range_all(&mut self, key: &str) -> Result<Vec<String>>;

    async fn list_push(&mut self, key: &str, items: &[String]) -> Result<()>;

    async fn set_members(&mut self, key: &str) -> Result<Vec<String>>;

    async fn set_add(&mut self, key: &str, members: &[String]) -> Result<()>;

    /// Members with scores in ascending score order.
    async fn zset_range_with_scores(&mut self, key: &str) -> Result<Vec<ScoredMember>>;

    async fn zset_add(&mut self, key: &str, members: &[ScoredMember]) -> Result<()>;

    async fn stream_range_all(&mut self, key: &str) -> Result<Vec<StreamEntry>>;

    /// Append one entry using its recorded id.
    async fn stream_add(&mut self, key: &str, entry: &StreamEntry) -> Result<()>;

    async fn stream_groups(&mut self, key: &str) -> Result<Vec<ConsumerGroup>>;

    /// Create a consumer group, creating the stream if it does not exist.
    async fn stream_group_create(&mut self, key: &str, group: &ConsumerGroup) -> Result<()>;
}
