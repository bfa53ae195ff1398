//! Normalization of raw Redis replies.
//!
//! Replies arrive as [`redis::Value`] in RESP2 or RESP3 shape depending on the
//! connection. Each function here accepts every shape the server may send for
//! one command and turns it into the canonical record representation, or
//! fails with [`BackupError::Decode`].

use crate::record::{ConsumerGroup, ScoredMember, StreamEntry};
use crate::{BackupError, Result};
use indexmap::IndexMap;
use redis::Value;
use std::collections::BTreeMap;

fn unexpected(what: &str, value: &Value) -> BackupError {
    BackupError::Decode(format!("expected {}, got {:?}", what, value))
}

/// A single textual reply.
pub fn text(value: Value) -> Result<String> {
    match value {
        Value::BulkString(bytes) => String::from_utf8(bytes)
            .map_err(|e| BackupError::Decode(format!("value is not valid UTF-8: {}", e))),
        Value::SimpleString(s) => Ok(s),
        Value::VerbatimString { text, .. } => Ok(text),
        Value::Okay => Ok("OK".to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Double(d) => Ok(d.to_string()),
        other => Err(unexpected("string", &other)),
    }
}

/// An array of textual replies; `Nil` is an empty array.
pub fn text_list(value: Value) -> Result<Vec<String>> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Array(items) | Value::Set(items) => items.into_iter().map(text).collect(),
        other => Err(unexpected("array", &other)),
    }
}

/// Field/value pairs, either a RESP3 map or a flat RESP2 array.
pub fn pairs(value: Value) -> Result<Vec<(String, String)>> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Map(entries) => entries
            .into_iter()
            .map(|(k, v)| Ok((text(k)?, text(v)?)))
            .collect(),
        Value::Array(items) => {
            if items.len() % 2 != 0 {
                return Err(BackupError::Decode(format!(
                    "expected an even number of elements, got {}",
                    items.len()
                )));
            }
            let mut out = Vec::with_capacity(items.len() / 2);
            let mut iter = items.into_iter();
            while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                out.push((text(k)?, text(v)?));
            }
            Ok(out)
        }
        other => Err(unexpected("field/value pairs", &other)),
    }
}

/// `HGETALL` reply.
pub fn hash(value: Value) -> Result<BTreeMap<String, String>> {
    Ok(pairs(value)?.into_iter().collect())
}

/// A sorted-set score.
pub fn score(value: Value) -> Result<f64> {
    match value {
        Value::Double(d) => Ok(d),
        Value::Int(i) => Ok(i as f64),
        other => {
            let s = text(other)?;
            s.parse::<f64>()
                .map_err(|_| BackupError::Decode(format!("invalid score: {}", s)))
        }
    }
}

/// `ZRANGE ... WITHSCORES` reply: `[[m, s], ...]` (RESP3) or `[m, s, ...]` (RESP2).
pub fn scored_members(value: Value) -> Result<Vec<ScoredMember>> {
    let items = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => return Err(unexpected("array", &other)),
    };

    if items.iter().all(|item| matches!(item, Value::Array(_))) {
        return items
            .into_iter()
            .map(|item| match item {
                Value::Array(pair) if pair.len() == 2 => {
                    let mut pair = pair.into_iter();
                    match (pair.next(), pair.next()) {
                        (Some(m), Some(s)) => Ok((text(m)?, score(s)?)),
                        _ => Err(BackupError::Decode("short member/score pair".into())),
                    }
                }
                other => Err(unexpected("member/score pair", &other)),
            })
            .collect();
    }

    if items.len() % 2 != 0 {
        return Err(BackupError::Decode(format!(
            "expected member/score pairs, got {} elements",
            items.len()
        )));
    }
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(m), Some(s)) = (iter.next(), iter.next()) {
        out.push((text(m)?, score(s)?));
    }
    Ok(out)
}

/// `XRANGE` reply: `[[id, [f, v, ...]], ...]`.
pub fn stream_entries(value: Value) -> Result<Vec<StreamEntry>> {
    let items = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => return Err(unexpected("array of stream entries", &other)),
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Array(parts) if parts.len() == 2 => {
                let mut parts = parts.into_iter();
                match (parts.next(), parts.next()) {
                    (Some(id), Some(fields)) => {
                        let fields: IndexMap<String, String> = pairs(fields)?.into_iter().collect();
                        Ok(StreamEntry(text(id)?, fields))
                    }
                    _ => Err(BackupError::Decode("short stream entry".into())),
                }
            }
            other => Err(unexpected("stream entry", &other)),
        })
        .collect()
}

/// `XINFO GROUPS` reply: one map (or flat array) of attributes per group.
pub fn consumer_groups(value: Value) -> Result<Vec<ConsumerGroup>> {
    let items = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => return Err(unexpected("array of groups", &other)),
    };

    let mut groups = Vec::with_capacity(items.len());
    for item in items {
        let mut name = None;
        let mut group = ConsumerGroup::new(String::new(), "$");
        let attributes = match item {
            Value::Map(entries) => entries,
            Value::Array(flat) => {
                let mut entries = Vec::with_capacity(flat.len() / 2);
                let mut iter = flat.into_iter();
                while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                    entries.push((k, v));
                }
                entries
            }
            other => return Err(unexpected("group attributes", &other)),
        };

        for (k, v) in attributes {
            match text(k)?.as_str() {
                "name" => name = Some(text(v)?),
                "last-delivered-id" => group.last_delivered_id = text(v)?,
                "consumers" => group.consumers = integer(v).ok(),
                "pending" => group.pending = integer(v).ok(),
                _ => {}
            }
        }

        group.name = name.ok_or_else(|| BackupError::Decode("group without a name".into()))?;
        groups.push(group);
    }
    Ok(groups)
}

/// A non-negative integer reply.
pub fn integer(value: Value) -> Result<u64> {
    match value {
        Value::Int(i) if i >= 0 => Ok(i as u64),
        other => {
            let s = text(other)?;
            s.parse::<u64>()
                .map_err(|_| BackupError::Decode(format!("invalid integer: {}", s)))
        }
    }
}

/// `PTTL` reply: negative values (-1 no expiry, -2 missing key) become `None`.
pub fn ttl(value: Value) -> Result<Option<u64>> {
    match value {
        Value::Nil => Ok(None),
        Value::Int(i) if i < 0 => Ok(None),
        Value::Int(i) => Ok(Some(i as u64)),
        other => {
            let s = text(other)?;
            let ms = s
                .parse::<i64>()
                .map_err(|_| BackupError::Decode(format!("invalid ttl: {}", s)))?;
            Ok(u64::try_from(ms).ok())
        }
    }
}

/// Decoded `SCAN` reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReply {
    pub cursor: u64,
    pub keys: Vec<String>,
    /// Key names that are not valid UTF-8, rendered lossily for reporting.
    pub undecodable: Vec<String>,
}

/// `SCAN` reply: `[cursor, [key, ...]]`.
///
/// Keys are decoded one by one so that a single binary key name does not
/// take the rest of the page down with it.
pub fn scan_reply(value: Value) -> Result<ScanReply> {
    match value {
        Value::Array(parts) if parts.len() == 2 => {
            let mut parts = parts.into_iter();
            match (parts.next(), parts.next()) {
                (Some(cursor), Some(keys)) => {
                    let cursor = text(cursor)?;
                    let cursor = cursor
                        .parse::<u64>()
                        .map_err(|_| BackupError::Decode(format!("invalid scan cursor: {}", cursor)))?;
                    let mut reply = ScanReply {
                        cursor,
                        ..Default::default()
                    };
                    for item in scan_keys(keys)? {
                        match item {
                            Value::BulkString(bytes) => match String::from_utf8(bytes) {
                                Ok(key) => reply.keys.push(key),
                                Err(e) => reply
                                    .undecodable
                                    .push(String::from_utf8_lossy(e.as_bytes()).into_owned()),
                            },
                            other => reply.keys.push(text(other)?),
                        }
                    }
                    Ok(reply)
                }
                _ => Err(BackupError::Decode("short scan reply".into())),
            }
        }
        other => Err(unexpected("scan reply", &other)),
    }
}

fn scan_keys(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Array(items) | Value::Set(items) => Ok(items),
        other => Err(unexpected("array", &other)),
    }
}
