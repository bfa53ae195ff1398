//! Per-type dump and write rules.
//!
//! | type   | dump                    | write            |
//! |--------|-------------------------|------------------|
//! | string | `GET`                   | `SET`            |
//! | hash   | `HGETALL`               | `HSET`           |
//! | list   | `LRANGE 0 -1`           | `RPUSH`          |
//! | set    | `SMEMBERS`, then sorted | `SADD`           |
//! | zset   | `ZRANGE 0 -1 WITHSCORES`| `ZADD`           |
//! | stream | `XRANGE - +`, `XINFO GROUPS` | `XADD <id>`, `XGROUP CREATE` |

use crate::cluster::Keyspace;
use crate::events::{EventSink, PipelineEvent};
use crate::record::{KeyKind, KeyRecord, KeyValue};
use crate::Result;
use tracing::debug;

/// Read one key into a record.
///
/// Returns `Ok(None)` for types the backup does not carry and for keys that
/// disappeared after the scan saw them. Consumer groups are read best-effort:
/// a failure is reported and the record carries no groups.
pub async fn dump_key<K>(keyspace: &mut K, key: &str, events: &dyn EventSink) -> Result<Option<KeyRecord>>
where
    K: Keyspace + ?Sized,
{
    let type_name = keyspace.key_type(key).await?;
    let Some(kind) = KeyKind::from_type_name(&type_name) else {
        debug!("Skipping key '{}' of type {}", key, type_name);
        return Ok(None);
    };

    let value = match kind {
        KeyKind::String => KeyValue::String {
            value: keyspace.get_string(key).await?,
        },
        KeyKind::Hash => KeyValue::Hash {
            value: keyspace.hash_get_all(key).await?,
        },
        KeyKind::List => KeyValue::List {
            value: keyspace.list_range_all(key).await?,
        },
        KeyKind::Set => {
            let mut members = keyspace.set_members(key).await?;
            members.sort();
            KeyValue::Set { value: members }
        }
        KeyKind::Zset => KeyValue::Zset {
            value: keyspace.zset_range_with_scores(key).await?,
        },
        KeyKind::Stream => {
            let entries = keyspace.stream_range_all(key).await?;
            let groups = match keyspace.stream_groups(key).await {
                Ok(groups) => groups,
                Err(e) => {
                    events.emit(PipelineEvent::GroupFailed {
                        key: key.to_string(),
                        group: None,
                        error: e.to_string(),
                    });
                    Vec::new()
                }
            };
            KeyValue::Stream {
                value: entries,
                groups,
            }
        }
    };

    let pttl = keyspace.pttl(key).await?;
    Ok(Some(KeyRecord::new(key, value).with_pttl(pttl)))
}

/// Write a record's value with the inverse of its dump command.
///
/// Empty collections are not written. Returns whether anything was written.
/// Consumer groups are left to the caller.
pub async fn write_value<K>(keyspace: &mut K, key: &str, value: &KeyValue) -> Result<bool>
where
    K: Keyspace + ?Sized,
{
    if value.is_empty() {
        return Ok(false);
    }

    match value {
        KeyValue::String { value } => keyspace.set_string(key, value).await?,
        KeyValue::Hash { value } => keyspace.hash_set(key, value).await?,
        KeyValue::List { value } => keyspace.list_push(key, value).await?,
        KeyValue::Set { value } => keyspace.set_add(key, value).await?,
        KeyValue::Zset { value } => keyspace.zset_add(key, value).await?,
        KeyValue::Stream { value, .. } => {
            for entry in value {
                keyspace.stream_add(key, entry).await?;
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::{MemoryKeyspace, StoredValue};
    use crate::events::{drain, BroadcastSink};
    use crate::record::{ConsumerGroup, StreamEntry};
    use std::collections::{BTreeMap, BTreeSet};

    fn entry(id: &str, fields: &[(&str, &str)]) -> StreamEntry {
        StreamEntry(
            id.to_string(),
            fields.iter().map(|(f, v)| (f.to_string(), v.to_string())).collect(),
        )
    }

    #[tokio::test]
    async fn test_dump_sorts_set_members() {
        let mut ks = MemoryKeyspace::new();
        let members: BTreeSet<String> = ["b", "c", "a"].iter().map(|s| s.to_string()).collect();
        ks.insert("tags", StoredValue::Set(members));

        let record = dump_key(&mut ks, "tags", &BroadcastSink::new()).await.unwrap().unwrap();
        assert_eq!(
            record.value,
            KeyValue::Set {
                value: vec!["a".into(), "b".into(), "c".into()]
            }
        );
        assert_eq!(record.pttl, None);
    }

    #[tokio::test]
    async fn test_dump_captures_ttl() {
        let mut ks = MemoryKeyspace::new();
        ks.insert_with_ttl("a", StoredValue::String("1".into()), 60_000);

        let record = dump_key(&mut ks, "a", &BroadcastSink::new()).await.unwrap().unwrap();
        assert_eq!(record.pttl, Some(60_000));
    }

    #[tokio::test]
    async fn test_dump_skips_unsupported_and_vanished() {
        let mut ks = MemoryKeyspace::new();
        ks.insert("bloom", StoredValue::Other("MBbloom--".into()));
        let sink = BroadcastSink::new();

        assert!(dump_key(&mut ks, "bloom", &sink).await.unwrap().is_none());
        assert!(dump_key(&mut ks, "gone", &sink).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dump_stream_group_failure_is_tolerated() {
        let mut ks = MemoryKeyspace::new();
        ks.insert(
            "events",
            StoredValue::Stream {
                entries: vec![entry("1-0", &[("a", "1")])],
                groups: vec![ConsumerGroup::new("g1", "1-0")],
            },
        );
        ks.fail_group_reads("events");
        let sink = BroadcastSink::new();
        let mut rx = sink.subscribe();

        let record = dump_key(&mut ks, "events", &sink).await.unwrap().unwrap();
        match record.value {
            KeyValue::Stream { value, groups } => {
                assert_eq!(value.len(), 1);
                assert!(groups.is_empty());
            }
            other => panic!("unexpected value {:?}", other),
        }
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [PipelineEvent::GroupFailed { group: None, .. }]
        ));
    }

    #[tokio::test]
    async fn test_dump_error_propagates() {
        let mut ks = MemoryKeyspace::new();
        ks.insert("k", StoredValue::String("v".into()));
        ks.fail_key("k");
        assert!(dump_key(&mut ks, "k", &BroadcastSink::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_write_skips_empty_collections() {
        let mut ks = MemoryKeyspace::new();
        let written = write_value(&mut ks, "h", &KeyValue::Hash { value: BTreeMap::new() })
            .await
            .unwrap();
        assert!(!written);
        assert!(ks.is_empty());

        let written = write_value(&mut ks, "s", &KeyValue::String { value: String::new() })
            .await
            .unwrap();
        assert!(written);
        assert_eq!(ks.get("s"), Some(&StoredValue::String(String::new())));
    }

    #[tokio::test]
    async fn test_write_stream_keeps_ids_and_field_order() {
        let mut ks = MemoryKeyspace::new();
        let entries = vec![entry("5-0", &[("z", "1"), ("a", "2")]), entry("7-3", &[("m", "x")])];
        write_value(
            &mut ks,
            "s",
            &KeyValue::Stream {
                value: entries.clone(),
                groups: Vec::new(),
            },
        )
        .await
        .unwrap();

        let stored = ks.stream_range_all("s").await.unwrap();
        assert_eq!(stored, entries);
        let fields: Vec<&str> = stored[0].fields().keys().map(String::as_str).collect();
        assert_eq!(fields, vec!["z", "a"]);
    }
}
