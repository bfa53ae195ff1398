//! In-memory [`Keyspace`] for tests and dry runs.
//!
//! Time is frozen: a TTL set on a key stays at the same value until it is
//! changed, which keeps TTL comparisons deterministic. Failures can be
//! injected per key and per consumer group.

use super::{Keyspace, ScanCursor, ScanPage};
use crate::record::{ConsumerGroup, ScoredMember, StreamEntry};
use crate::{BackupError, Result};
use async_trait::async_trait;
use globset::{Glob, GlobMatcher};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Values held by the in-memory keyspace.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    String(String),
    Hash(BTreeMap<String, String>),
    List(Vec<String>),
    Set(BTreeSet<String>),
    /// Kept ordered by score, then member, like a real sorted set.
    Zset(Vec<ScoredMember>),
    Stream {
        entries: Vec<StreamEntry>,
        groups: Vec<ConsumerGroup>,
    },
    /// A type the backup does not support, e.g. a module type.
    Other(String),
}

impl StoredValue {
    fn type_name(&self) -> &str {
        match self {
            Self::String(_) => "string",
            Self::Hash(_) => "hash",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Zset(_) => "zset",
            Self::Stream { .. } => "stream",
            Self::Other(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    value: StoredValue,
    ttl_ms: Option<u64>,
}

#[derive(Debug, Default)]
pub struct MemoryKeyspace {
    data: BTreeMap<String, Entry>,
    failing_keys: HashSet<String>,
    failing_group_reads: HashSet<String>,
    failing_groups: HashSet<String>,
    binary_names: Vec<String>,
}

fn wrong_type(key: &str) -> BackupError {
    BackupError::Keyspace(format!(
        "WRONGTYPE Operation against key '{}' holding the wrong kind of value",
        key
    ))
}

impl MemoryKeyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a key.
    pub fn insert(&mut self, key: impl Into<String>, value: StoredValue) {
        self.data.insert(key.into(), Entry { value, ttl_ms: None });
    }

    pub fn insert_with_ttl(&mut self, key: impl Into<String>, value: StoredValue, ttl_ms: u64) {
        self.data.insert(
            key.into(),
            Entry {
                value,
                ttl_ms: Some(ttl_ms),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<&StoredValue> {
        self.data.get(key).map(|entry| &entry.value)
    }

    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.data.get(key).and_then(|entry| entry.ttl_ms)
    }

    /// Change the remaining TTL of an existing key, simulating elapsed time.
    pub fn set_ttl(&mut self, key: &str, ttl_ms: Option<u64>) {
        if let Some(entry) = self.data.get_mut(key) {
            entry.ttl_ms = ttl_ms;
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<StoredValue> {
        self.data.remove(key).map(|entry| entry.value)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    /// Snapshot of every key, value and TTL, for state comparisons.
    pub fn snapshot(&self) -> Vec<(String, StoredValue, Option<u64>)> {
        self.data
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone(), e.ttl_ms))
            .collect()
    }

    /// Make every read and write of `key` fail.
    pub fn fail_key(&mut self, key: impl Into<String>) {
        self.failing_keys.insert(key.into());
    }

    /// Make `XINFO GROUPS` fail for `key`.
    pub fn fail_group_reads(&mut self, key: impl Into<String>) {
        self.failing_group_reads.insert(key.into());
    }

    /// Make creating the group called `name` fail.
    pub fn fail_group_create(&mut self, name: impl Into<String>) {
        self.failing_groups.insert(name.into());
    }

    /// Report `lossy_name` as an undecodable key on the first scan page.
    pub fn add_binary_name(&mut self, lossy_name: impl Into<String>) {
        self.binary_names.push(lossy_name.into());
    }

    fn check(&self, key: &str) -> Result<()> {
        if self.failing_keys.contains(key) {
            return Err(BackupError::Keyspace(format!("injected failure for key '{}'", key)));
        }
        Ok(())
    }

    fn entry(&self, key: &str) -> Result<Option<&Entry>> {
        self.check(key)?;
        Ok(self.data.get(key))
    }

    /// Entry for a write, created with `init` when missing.
    fn entry_mut(&mut self, key: &str, init: impl FnOnce() -> StoredValue) -> Result<&mut StoredValue> {
        self.check(key)?;
        let entry = self.data.entry(key.to_string()).or_insert_with(|| Entry {
            value: init(),
            ttl_ms: None,
        });
        Ok(&mut entry.value)
    }
}

fn matcher(pattern: &str) -> Result<GlobMatcher> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|e| BackupError::Keyspace(format!("invalid pattern '{}': {}", pattern, e)))
}

#[async_trait]
impl Keyspace for MemoryKeyspace {
    async fn scan(&mut self, cursor: ScanCursor, pattern: &str, count: usize) -> Result<ScanPage> {
        let matcher = matcher(pattern)?;
        let start = cursor.position as usize;
        let count = count.max(1);

        let visited: Vec<&String> = self.data.keys().skip(start).take(count).collect();
        let keys = visited
            .iter()
            .filter(|k| matcher.is_match(k.as_str()))
            .map(|k| k.to_string())
            .collect();

        let end = start + visited.len();
        let next = (end < self.data.len()).then_some(ScanCursor {
            shard: 0,
            position: end as u64,
        });
        let undecodable = if start == 0 {
            self.binary_names.clone()
        } else {
            Vec::new()
        };
        Ok(ScanPage {
            keys,
            undecodable,
            next,
        })
    }

    async fn key_type(&mut self, key: &str) -> Result<String> {
        Ok(self
            .entry(key)?
            .map(|e| e.value.type_name().to_string())
            .unwrap_or_else(|| "none".to_string()))
    }

    async fn pttl(&mut self, key: &str) -> Result<Option<u64>> {
        Ok(self.entry(key)?.and_then(|e| e.ttl_ms))
    }

    async fn exists(&mut self, key: &str) -> Result<bool> {
        Ok(self.entry(key)?.is_some())
    }

    async fn delete(&mut self, key: &str) -> Result<()> {
        self.check(key)?;
        self.data.remove(key);
        Ok(())
    }

    async fn pexpire(&mut self, key: &str, ttl_ms: u64) -> Result<()> {
        self.check(key)?;
        if ttl_ms == 0 {
            self.data.remove(key);
        } else if let Some(entry) = self.data.get_mut(key) {
            entry.ttl_ms = Some(ttl_ms);
        }
        Ok(())
    }

    async fn get_string(&mut self, key: &str) -> Result<String> {
        match self.entry(key)?.map(|e| &e.value) {
            Some(StoredValue::String(s)) => Ok(s.clone()),
            Some(_) => Err(wrong_type(key)),
            None => Err(BackupError::Keyspace(format!("key '{}' does not exist", key))),
        }
    }

    async fn set_string(&mut self, key: &str, value: &str) -> Result<()> {
        self.check(key)?;
        // SET replaces any value and clears the TTL.
        self.insert(key, StoredValue::String(value.to_string()));
        Ok(())
    }

    async fn hash_get_all(&mut self, key: &str) -> Result<BTreeMap<String, String>> {
        match self.entry(key)?.map(|e| &e.value) {
            Some(StoredValue::Hash(h)) => Ok(h.clone()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(BTreeMap::new()),
        }
    }

    async fn hash_set(&mut self, key: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        match self.entry_mut(key, || StoredValue::Hash(BTreeMap::new()))? {
            StoredValue::Hash(h) => {
                h.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn list_range_all(&mut self, key: &str) -> Result<Vec<String>> {
        match self.entry(key)?.map(|e| &e.value) {
            Some(StoredValue::List(l)) => Ok(l.clone()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn list_push(&mut self, key: &str, items: &[String]) -> Result<()> {
        match self.entry_mut(key, || StoredValue::List(Vec::new()))? {
            StoredValue::List(l) => {
                l.extend_from_slice(items);
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn set_members(&mut self, key: &str) -> Result<Vec<String>> {
        match self.entry(key)?.map(|e| &e.value) {
            // Reverse order stands in for the arbitrary order of SMEMBERS.
            Some(StoredValue::Set(s)) => Ok(s.iter().rev().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn set_add(&mut self, key: &str, members: &[String]) -> Result<()> {
        match self.entry_mut(key, || StoredValue::Set(BTreeSet::new()))? {
            StoredValue::Set(s) => {
                s.extend(members.iter().cloned());
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn zset_range_with_scores(&mut self, key: &str) -> Result<Vec<ScoredMember>> {
        match self.entry(key)?.map(|e| &e.value) {
            Some(StoredValue::Zset(z)) => Ok(z.clone()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn zset_add(&mut self, key: &str, members: &[ScoredMember]) -> Result<()> {
        match self.entry_mut(key, || StoredValue::Zset(Vec::new()))? {
            StoredValue::Zset(z) => {
                for (member, score) in members {
                    z.retain(|(m, _)| m != member);
                    z.push((member.clone(), *score));
                }
                z.sort_by(|(ma, sa), (mb, sb)| sa.total_cmp(sb).then_with(|| ma.cmp(mb)));
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn stream_range_all(&mut self, key: &str) -> Result<Vec<StreamEntry>> {
        match self.entry(key)?.map(|e| &e.value) {
            Some(StoredValue::Stream { entries, .. }) => Ok(entries.clone()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn stream_add(&mut self, key: &str, entry: &StreamEntry) -> Result<()> {
        let stream = self.entry_mut(key, || StoredValue::Stream {
            entries: Vec::new(),
            groups: Vec::new(),
        })?;
        match stream {
            StoredValue::Stream { entries, .. } => {
                if let Some(last) = entries.last() {
                    if stream_id(entry.id()) <= stream_id(last.id()) {
                        return Err(BackupError::Keyspace(
                            "ERR The ID specified in XADD is equal or smaller than the target stream top item"
                                .into(),
                        ));
                    }
                }
                entries.push(entry.clone());
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn stream_groups(&mut self, key: &str) -> Result<Vec<ConsumerGroup>> {
        if self.failing_group_reads.contains(key) {
            return Err(BackupError::Keyspace(format!("injected XINFO failure for '{}'", key)));
        }
        match self.entry(key)?.map(|e| &e.value) {
            Some(StoredValue::Stream { groups, .. }) => Ok(groups.clone()),
            Some(_) => Err(wrong_type(key)),
            None => Err(BackupError::Keyspace("ERR no such key".into())),
        }
    }

    async fn stream_group_create(&mut self, key: &str, group: &ConsumerGroup) -> Result<()> {
        if self.failing_groups.contains(&group.name) {
            return Err(BackupError::Keyspace(format!(
                "injected failure creating group '{}'",
                group.name
            )));
        }
        let stream = self.entry_mut(key, || StoredValue::Stream {
            entries: Vec::new(),
            groups: Vec::new(),
        })?;
        match stream {
            StoredValue::Stream { groups, .. } => {
                if groups.iter().any(|g| g.name == group.name) {
                    return Err(BackupError::Keyspace(
                        "BUSYGROUP Consumer Group name already exists".into(),
                    ));
                }
                groups.push(ConsumerGroup::new(group.name.clone(), group.last_delivered_id.clone()));
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }
}

/// Numeric ordering key of a `<ms>-<seq>` stream id.
fn stream_id(id: &str) -> (u64, u64) {
    let (ms, seq) = id.split_once('-').unwrap_or((id, "0"));
    (ms.parse().unwrap_or(0), seq.parse().unwrap_or(0))
}
