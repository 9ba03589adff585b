//! Raw and accepted records
//!
//! A [`RawRecord`] is one source-native row (an API result, a parsed archive
//! entry) tagged with the unit it came from. Records are transient: they
//! live only as long as the batch that carries them.

use super::ids::{NaturalKey, WorkUnitId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Annotation fields attached by classifier stages
pub type Annotations = Map<String, Value>;

/// A single record as produced by the batch fetcher
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Unit this record was fetched from
    pub unit_id: WorkUnitId,
    /// Position of the record within its unit, in fetch order
    pub sequence: u64,
    /// Record fields
    pub fields: Map<String, Value>,
}

impl RawRecord {
    /// Create a new raw record
    pub fn new(unit_id: WorkUnitId, sequence: u64, fields: Map<String, Value>) -> Self {
        Self {
            unit_id,
            sequence,
            fields,
        }
    }

    /// Build a record from any JSON value; non-objects are wrapped under `value`
    pub fn from_value(unit_id: WorkUnitId, sequence: u64, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self::new(unit_id, sequence, fields)
    }

    /// Look up a field by name, or by JSON pointer when it starts with `/`
    pub fn field(&self, name: &str) -> Option<&Value> {
        if name.starts_with('/') {
            let mut current: Option<&Value> = None;
            for (i, segment) in name.split('/').skip(1).enumerate() {
                let segment = segment.replace("~1", "/").replace("~0", "~");
                current = if i == 0 {
                    self.fields.get(&segment)
                } else {
                    match current? {
                        Value::Object(map) => map.get(&segment),
                        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                        _ => None,
                    }
                };
            }
            current
        } else {
            self.fields.get(name)
        }
    }

    /// Field rendered as text, if it is a non-null scalar
    pub fn field_text(&self, name: &str) -> Option<String> {
        match self.field(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Revision marker used to resolve conflicting versions of the same entity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Revision {
    /// Source-provided update timestamp
    Timestamp(DateTime<Utc>),
    /// Monotonic version counter
    Counter(i64),
}

impl Revision {
    /// Parse a revision from a JSON value (RFC 3339 string, date, or integer)
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Revision::Counter),
            Value::String(s) => {
                if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                    return Some(Revision::Timestamp(ts.with_timezone(&Utc)));
                }
                if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                    return date
                        .and_hms_opt(0, 0, 0)
                        .map(|dt| Revision::Timestamp(dt.and_utc()));
                }
                s.parse::<i64>().ok().map(Revision::Counter)
            }
            _ => None,
        }
    }

    /// Timestamp form of the revision, if any
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Revision::Timestamp(ts) => Some(*ts),
            Revision::Counter(_) => None,
        }
    }
}

/// A record that passed classification and carries its identity
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedRecord {
    /// Natural key derived by the classifier policy
    pub key: NaturalKey,
    /// SHA-256 of the normalized record content
    pub content_hash: String,
    /// Optional revision used by the conflict policy
    pub revision: Option<Revision>,
    /// The record itself
    pub record: RawRecord,
    /// Provenance annotations from passing stages
    pub annotations: Annotations,
}
