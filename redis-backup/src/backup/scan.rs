//! Cursor-driven key enumeration.

use crate::cluster::{Keyspace, ScanCursor};
use crate::Result;
use std::collections::VecDeque;

/// One entry of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannedKey {
    Name(String),
    /// A key whose name is not valid UTF-8, rendered lossily.
    Undecodable(String),
}

/// Lazily yields the keys matching a pattern, one scan page at a time.
///
/// The enumerator does not hold the keyspace, so the caller can use the same
/// connection to dump each key between calls. Once exhausted it stays
/// exhausted.
pub struct KeyEnumerator {
    pattern: String,
    count: usize,
    cursor: Option<ScanCursor>,
    buffered: VecDeque<ScannedKey>,
    pages: u64,
}

impl KeyEnumerator {
    pub fn new(pattern: impl Into<String>, count: usize) -> Self {
        Self {
            pattern: pattern.into(),
            count: count.max(1),
            cursor: Some(ScanCursor::default()),
            buffered: VecDeque::new(),
            pages: 0,
        }
    }

    /// Next key, fetching pages as needed. A failing scan request is an error;
    /// an undecodable name is yielded for the caller to skip.
    pub async fn next_key<K>(&mut self, keyspace: &mut K) -> Result<Option<ScannedKey>>
    where
        K: Keyspace + ?Sized,
    {
        loop {
            if let Some(key) = self.buffered.pop_front() {
                return Ok(Some(key));
            }
            let Some(cursor) = self.cursor else {
                return Ok(None);
            };

            let page = keyspace.scan(cursor, &self.pattern, self.count).await?;
            self.pages += 1;
            self.buffered.extend(page.undecodable.into_iter().map(ScannedKey::Undecodable));
            self.buffered.extend(page.keys.into_iter().map(ScannedKey::Name));
            self.cursor = page.next;
        }
    }

    /// Scan requests issued so far.
    pub fn pages(&self) -> u64 {
        self.pages
    }
}
