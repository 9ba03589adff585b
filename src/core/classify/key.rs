//! Natural key, content hash and revision derivation
//!
//! Supplied by the classifier policy so the deduplicator never decides what
//! identity means.

use crate::domain::{NaturalKey, RawRecord, Revision};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// How identity is derived from a record
#[derive(Debug, Clone, Default)]
pub struct KeyPolicy {
    /// Identifier fields joined into the key
    pub id_fields: Vec<String>,
    /// Fields hashed into a key when no identifier is present
    pub hash_fields: Vec<String>,
    /// Field holding an update timestamp or version counter
    pub revision_field: Option<String>,
    /// Fields left out of the content hash (fetch timestamps and the like)
    pub content_ignore_fields: Vec<String>,
}

impl KeyPolicy {
    /// Derive the natural key
    ///
    /// Identifier fields win when all are present; otherwise the key is a
    /// SHA-256 over the normalized `hash_fields`. With neither configured
    /// the whole record content is hashed.
    ///
    /// # Errors
    ///
    /// Returns a reason string when no usable key can be derived.
    pub fn natural_key(&self, record: &RawRecord) -> Result<NaturalKey, String> {
        if !self.id_fields.is_empty() {
            let parts: Option<Vec<String>> = self
                .id_fields
                .iter()
                .map(|f| record.field_text(f).filter(|v| !v.trim().is_empty()))
                .collect();
            if let Some(parts) = parts {
                return NaturalKey::from_parts(parts);
            }
            if self.hash_fields.is_empty() {
                return Err(format!(
                    "identifier field(s) {} missing",
                    self.id_fields.join(", ")
                ));
            }
        }

        if self.hash_fields.is_empty() {
            return NaturalKey::new(format!("sha256:{}", self.content_hash(record)));
        }

        let mut hasher = Sha256::new();
        let mut any = false;
        for field in &self.hash_fields {
            let normalized = record.field(field).map(normalize_for_key).unwrap_or_default();
            any |= !normalized.is_empty();
            hasher.update(field.as_bytes());
            hasher.update(b"\x1f");
            hasher.update(normalized.as_bytes());
            hasher.update(b"\x1e");
        }
        if !any {
            return Err(format!(
                "hash field(s) {} all empty",
                self.hash_fields.join(", ")
            ));
        }
        NaturalKey::new(format!("sha256:{:x}", hasher.finalize()))
    }

    /// SHA-256 of the record content with object keys sorted
    pub fn content_hash(&self, record: &RawRecord) -> String {
        let mut fields = record.fields.clone();
        for ignored in &self.content_ignore_fields {
            fields.remove(ignored);
        }
        let canonical = normalize_json(&Value::Object(fields));
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Revision marker, if the record carries one
    pub fn revision(&self, record: &RawRecord) -> Option<Revision> {
        self.revision_field
            .as_ref()
            .and_then(|f| record.field(f))
            .and_then(Revision::from_value)
    }
}

/// Lowercase, trim and collapse whitespace; structured values use canonical JSON
fn normalize_for_key(value: &Value) -> String {
    let text = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => normalize_json(value).to_string(),
        other => other.to_string(),
    };
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Recursively sort object keys so equal content serializes identically
fn normalize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, normalize_json(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_json).collect()),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WorkUnitId;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        RawRecord::from_value(WorkUnitId::new("u").unwrap(), 0, value)
    }

    #[test]
    fn test_id_fields() {
        let policy = KeyPolicy {
            id_fields: vec!["source".to_string(), "id".to_string()],
            ..Default::default()
        };
        let key = policy
            .natural_key(&record(json!({"source": "oa", "id": 123})))
            .unwrap();
        assert_eq!(key.as_str(), "oa|123");
        assert!(!key.is_derived());

        assert!(policy.natural_key(&record(json!({"source": "oa"}))).is_err());
    }

    #[test]
    fn test_hash_fallback_is_normalized() {
        let policy = KeyPolicy {
            id_fields: vec!["doi".to_string()],
            hash_fields: vec!["title".to_string(), "year".to_string()],
            ..Default::default()
        };
        let a = policy
            .natural_key(&record(json!({"title": "  Solar   Cells ", "year": 2020})))
            .unwrap();
        let b = policy
            .natural_key(&record(json!({"title": "solar cells", "year": 2020, "extra": 1})))
            .unwrap();
        let c = policy
            .natural_key(&record(json!({"title": "solar cells", "year": 2021})))
            .unwrap();

        assert!(a.is_derived());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(policy.natural_key(&record(json!({"other": 1}))).is_err());
    }

    #[test]
    fn test_content_hash_ignores_key_order_and_ignored_fields() {
        let policy = KeyPolicy {
            content_ignore_fields: vec!["fetched_at".to_string()],
            ..Default::default()
        };
        let a = record(json!({"id": 1, "meta": {"b": 2, "a": 1}, "fetched_at": "x"}));
        let b = record(json!({"meta": {"a": 1, "b": 2}, "id": 1, "fetched_at": "y"}));
        let c = record(json!({"id": 1, "meta": {"a": 1, "b": 3}}));

        assert_eq!(policy.content_hash(&a), policy.content_hash(&b));
        assert_ne!(policy.content_hash(&a), policy.content_hash(&c));
        assert_eq!(policy.content_hash(&a).len(), 64);
    }

    #[test]
    fn test_revision() {
        let policy = KeyPolicy {
            revision_field: Some("updated_date".to_string()),
            ..Default::default()
        };
        let rev = policy
            .revision(&record(json!({"updated_date": "2024-05-01T00:00:00Z"})))
            .unwrap();
        assert!(rev.as_timestamp().is_some());
        assert!(policy.revision(&record(json!({}))).is_none());
    }
}
