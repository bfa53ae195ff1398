//! Key records: the unit of transfer between a cluster and a backup.
//!
//! One record is one line of a chunk file:
//!
//! ```text
//! {"type":"zset","value":[["a",1.0],["b",2.5]],"key":"scores","pttl":60000}
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A sorted-set member with its score.
pub type ScoredMember = (String, f64);

/// One stream entry: its id and its fields in insertion order.
///
/// Serialized as `[id, {field: value, ...}]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEntry(pub String, pub IndexMap<String, String>);

impl StreamEntry {
    pub fn id(&self) -> &str {
        &self.0
    }

    pub fn fields(&self) -> &IndexMap<String, String> {
        &self.1
    }
}

/// Consumer group attached to a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerGroup {
    pub name: String,

    /// Id of the last entry delivered to the group; `$` when unknown.
    #[serde(rename = "last-delivered-id", default = "default_last_delivered_id")]
    pub last_delivered_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumers: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<u64>,
}

impl ConsumerGroup {
    pub fn new(name: impl Into<String>, last_delivered_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_delivered_id: last_delivered_id.into(),
            consumers: None,
            pending: None,
        }
    }
}

fn default_last_delivered_id() -> String {
    "$".to_string()
}

/// The six key types a backup can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    String,
    Hash,
    List,
    Set,
    Zset,
    Stream,
}

impl KeyKind {
    /// Map a `TYPE` reply to a supported kind; `None` for anything else
    /// (module types, `none` for a key that vanished).
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "hash" => Some(Self::Hash),
            "list" => Some(Self::List),
            "set" => Some(Self::Set),
            "zset" => Some(Self::Zset),
            "stream" => Some(Self::Stream),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Hash => "hash",
            Self::List => "list",
            Self::Set => "set",
            Self::Zset => "zset",
            Self::Stream => "stream",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serde for `[member, score]` pairs. JSON has no representation for
/// infinity, so `+inf`/`-inf` scores are written as the strings `"inf"` and
/// `"-inf"`. Reading also accepts `"+inf"` and the `Infinity` spellings.
mod scored_members {
    use super::ScoredMember;
    use serde::de::{self, Deserializer, Visitor};
    use serde::ser::{self, SerializeSeq, Serializer};
    use serde::{Deserialize, Serialize};
    use std::fmt;

    struct Score(f64);

    impl Serialize for Score {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let score = self.0;
            if score.is_finite() {
                serializer.serialize_f64(score)
            } else if score.is_nan() {
                Err(ser::Error::custom("NaN is not a valid sorted-set score"))
            } else if score.is_sign_positive() {
                serializer.serialize_str("inf")
            } else {
                serializer.serialize_str("-inf")
            }
        }
    }

    struct ScoreVisitor;

    impl Visitor<'_> for ScoreVisitor {
        type Value = Score;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number, \"inf\" or \"-inf\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Score, E> {
            Ok(Score(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Score, E> {
            Ok(Score(v as f64))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Score, E> {
            Ok(Score(v as f64))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Score, E> {
            match v {
                "inf" | "+inf" | "Infinity" | "+Infinity" => Ok(Score(f64::INFINITY)),
                "-inf" | "-Infinity" => Ok(Score(f64::NEG_INFINITY)),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }

    impl<'de> Deserialize<'de> for Score {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_any(ScoreVisitor)
        }
    }

    pub fn serialize<S: Serializer>(
        members: &[ScoredMember],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(members.len()))?;
        for (member, score) in members {
            seq.serialize_element(&(member, Score(*score)))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<ScoredMember>, D::Error> {
        let pairs = Vec::<(String, Score)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().map(|(member, Score(score))| (member, score)).collect())
    }
}

/// Type-specific payload of a record, tagged by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KeyValue {
    String {
        value: String,
    },
    Hash {
        value: BTreeMap<String, String>,
    },
    List {
        value: Vec<String>,
    },
    /// Members are kept sorted so archives diff cleanly.
    Set {
        value: Vec<String>,
    },
    /// Pairs in ascending score order, as read from the server.
    Zset {
        #[serde(with = "scored_members")]
        value: Vec<ScoredMember>,
    },
    Stream {
        value: Vec<StreamEntry>,
        #[serde(default)]
        groups: Vec<ConsumerGroup>,
    },
}

impl KeyValue {
    pub fn kind(&self) -> KeyKind {
        match self {
            Self::String { .. } => KeyKind::String,
            Self::Hash { .. } => KeyKind::Hash,
            Self::List { .. } => KeyKind::List,
            Self::Set { .. } => KeyKind::Set,
            Self::Zset { .. } => KeyKind::Zset,
            Self::Stream { .. } => KeyKind::Stream,
        }
    }

    /// True for collections without elements. Strings are never empty in
    /// this sense since an empty string is still a value.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::String { .. } => false,
            Self::Hash { value } => value.is_empty(),
            Self::List { value } | Self::Set { value } => value.is_empty(),
            Self::Zset { value } => value.is_empty(),
            Self::Stream { value, .. } => value.is_empty(),
        }
    }
}

/// One dumped key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    #[serde(flatten)]
    pub value: KeyValue,

    pub key: String,

    /// Remaining time-to-live in milliseconds at dump time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pttl: Option<u64>,
}

impl KeyRecord {
    pub fn new(key: impl Into<String>, value: KeyValue) -> Self {
        Self {
            value,
            key: key.into(),
            pttl: None,
        }
    }

    pub fn with_pttl(mut self, pttl: Option<u64>) -> Self {
        self.pttl = pttl;
        self
    }

    pub fn kind(&self) -> KeyKind {
        self.value.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_record_wire_format() {
        let record = KeyRecord::new("a", KeyValue::String { value: "1".into() });
        let line = serde_json::to_string(&record).unwrap();
        assert_eq!(line, r#"{"type":"string","value":"1","key":"a"}"#);
    }

    #[test]
    fn test_parse_row_written_by_older_tool() {
        // Field order and extra group attributes differ from what we write.
        let line = r#"{"type": "stream", "key": "events", "value": [["1-0", {"f": "v"}], ["2-0", {"b": "2", "a": "1"}]], "groups": [{"name": "g1", "consumers": 1, "pending": 0, "last-delivered-id": "1-0", "entries-read": 1, "lag": 1}], "pttl": 1200}"#;
        let record: KeyRecord = serde_json::from_str(line).unwrap();

        assert_eq!(record.key, "events");
        assert_eq!(record.pttl, Some(1200));
        let KeyValue::Stream { value, groups } = record.value else {
            panic!("expected stream");
        };
        assert_eq!(value.len(), 2);
        assert_eq!(value[1].id(), "2-0");
        let fields: Vec<_> = value[1].fields().keys().cloned().collect();
        assert_eq!(fields, vec!["b", "a"]);
        assert_eq!(groups, vec![ConsumerGroup {
            name: "g1".into(),
            last_delivered_id: "1-0".into(),
            consumers: Some(1),
            pending: Some(0),
        }]);
    }

    #[test]
    fn test_group_without_last_delivered_id_defaults_to_dollar() {
        let group: ConsumerGroup = serde_json::from_str(r#"{"name": "g"}"#).unwrap();
        assert_eq!(group.last_delivered_id, "$");
    }

    #[test]
    fn test_zset_scores_accept_integers() {
        let line = r#"{"type":"zset","key":"z","value":[["a",1],["b",2.5]]}"#;
        let record: KeyRecord = serde_json::from_str(line).unwrap();
        assert_eq!(
            record.value,
            KeyValue::Zset { value: vec![("a".into(), 1.0), ("b".into(), 2.5)] }
        );
    }

    #[test]
    fn test_infinite_scores_survive_a_line() {
        let record = KeyRecord::new(
            "z",
            KeyValue::Zset {
                value: vec![
                    ("bottom".into(), f64::NEG_INFINITY),
                    ("m".into(), 1.5),
                    ("top".into(), f64::INFINITY),
                ],
            },
        );
        let line = serde_json::to_string(&record).unwrap();
        assert_eq!(
            line,
            r#"{"type":"zset","value":[["bottom","-inf"],["m",1.5],["top","inf"]],"key":"z"}"#
        );
        assert_eq!(serde_json::from_str::<KeyRecord>(&line).unwrap(), record);
    }

    #[test]
    fn test_infinity_spellings_accepted() {
        let line = r#"{"type":"zset","key":"z","value":[["a","+inf"],["b","-Infinity"],["c","Infinity"]]}"#;
        let record: KeyRecord = serde_json::from_str(line).unwrap();
        assert_eq!(
            record.value,
            KeyValue::Zset {
                value: vec![
                    ("a".into(), f64::INFINITY),
                    ("b".into(), f64::NEG_INFINITY),
                    ("c".into(), f64::INFINITY),
                ]
            }
        );

        let bad = r#"{"type":"zset","key":"z","value":[["a","lots"]]}"#;
        assert!(serde_json::from_str::<KeyRecord>(bad).is_err());
        let null = r#"{"type":"zset","key":"z","value":[["a",null]]}"#;
        assert!(serde_json::from_str::<KeyRecord>(null).is_err());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let line = r#"{"type":"ReJSON-RL","key":"j","value":"{}"}"#;
        assert!(serde_json::from_str::<KeyRecord>(line).is_err());
    }

    #[test]
    fn test_kind_from_type_name() {
        assert_eq!(KeyKind::from_type_name("zset"), Some(KeyKind::Zset));
        assert_eq!(KeyKind::from_type_name("none"), None);
        assert_eq!(KeyKind::from_type_name("ReJSON-RL"), None);
        assert_eq!(KeyKind::Stream.to_string(), "stream");
    }

    #[test]
    fn test_is_empty() {
        assert!(!KeyValue::String { value: String::new() }.is_empty());
        assert!(KeyValue::Hash { value: BTreeMap::new() }.is_empty());
        assert!(KeyValue::Stream { value: vec![], groups: vec![] }.is_empty());
        assert!(!KeyValue::List { value: vec!["x".into()] }.is_empty());
    }
}
