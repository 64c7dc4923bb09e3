//! Dedup key derivation for raw events.
//!
//! The key is a SHA-256 over the event identity fields plus a canonical hash
//! of the payload, so providers without a stable native event id still dedup
//! deterministically. Canonicalization makes two payloads that differ only in
//! object key order or timezone representation hash identically.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::TimezoneRequiredError;

/// Parse an occurrence timestamp from an upstream payload. Timestamps without
/// an explicit offset are rejected rather than silently assumed UTC.
pub fn parse_occurrence_timestamp(raw: &str) -> Result<DateTime<Utc>, TimezoneRequiredError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| TimezoneRequiredError(raw.to_string()))
}

/// Derive the dedup key for a raw event. Same inputs always produce the same
/// key, across processes and releases.
pub fn dedup_key(
    source_system: &str,
    event_type: &str,
    source_event_id: Option<&str>,
    repo_external_id: &str,
    occurred_at: DateTime<Utc>,
    payload: &Value,
) -> String {
    let mut hasher = Sha256::new();
    hash_field(&mut hasher, source_system);
    hash_field(&mut hasher, event_type);
    match source_event_id {
        Some(id) => {
            hasher.update(b"1");
            hash_field(&mut hasher, id);
        }
        None => hasher.update(b"0"),
    }
    hash_field(&mut hasher, repo_external_id);
    hash_field(&mut hasher, &canonical_timestamp(occurred_at));
    hash_json(&mut hasher, payload);
    hex::encode(hasher.finalize())
}

// Fields are length-prefixed so adjacent values can never re-align into the
// same byte stream.
fn hash_field(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_be_bytes());
    hasher.update(field.as_bytes());
}

fn canonical_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// Walks the payload feeding the hasher directly, no string intermediate.
// Object keys are hashed in sorted order, and strings that parse as RFC 3339
// timestamps are normalized to UTC first.
fn hash_json(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(b) => {
            hasher.update(b"b");
            hasher.update([*b as u8]);
        }
        Value::Number(n) => {
            hasher.update(b"#");
            hash_field(hasher, &n.to_string());
        }
        Value::String(s) => {
            hasher.update(b"s");
            match DateTime::parse_from_rfc3339(s) {
                Ok(dt) => hash_field(hasher, &canonical_timestamp(dt.with_timezone(&Utc))),
                Err(_) => hash_field(hasher, s),
            }
        }
        Value::Array(items) => {
            hasher.update(b"[");
            hasher.update((items.len() as u64).to_be_bytes());
            for item in items {
                hash_json(hasher, item);
            }
        }
        Value::Object(map) => {
            hasher.update(b"{");
            hasher.update((map.len() as u64).to_be_bytes());
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for key in keys {
                hash_field(hasher, key);
                hash_json(hasher, &map[key]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key_for(payload: &Value) -> String {
        dedup_key(
            "github",
            "commit",
            Some("evt-1"),
            "org/repo",
            "2024-05-01T10:00:00Z".parse().unwrap(),
            payload,
        )
    }

    #[test]
    fn test_same_inputs_same_key() {
        let payload = json!({"sha": "abc123", "message": "fix build"});
        assert_eq!(key_for(&payload), key_for(&payload));
        assert_eq!(key_for(&payload).len(), 64);
    }

    #[test]
    fn test_payload_field_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"sha": "abc123", "message": "fix build"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"message": "fix build", "sha": "abc123"}"#).unwrap();
        assert_eq!(key_for(&a), key_for(&b));
    }

    #[test]
    fn test_payload_timestamps_normalize_to_utc() {
        let a = json!({"sha": "abc123", "authored_at": "2024-05-01T12:00:00+02:00"});
        let b = json!({"sha": "abc123", "authored_at": "2024-05-01T10:00:00Z"});
        assert_eq!(key_for(&a), key_for(&b));
    }

    #[test]
    fn test_payload_content_changes_the_key() {
        let a = json!({"sha": "abc123"});
        let b = json!({"sha": "def456"});
        assert_ne!(key_for(&a), key_for(&b));
    }

    #[test]
    fn test_missing_native_id_is_distinct_from_empty() {
        let payload = json!({"sha": "abc123"});
        let occurred = "2024-05-01T10:00:00Z".parse().unwrap();
        let with_empty = dedup_key("github", "commit", Some(""), "org/repo", occurred, &payload);
        let without = dedup_key("github", "commit", None, "org/repo", occurred, &payload);
        assert_ne!(with_empty, without);
    }

    #[test]
    fn test_nested_arrays_and_objects_hash_stably() {
        let a: Value = serde_json::from_str(
            r#"{"labels": ["bug", "ci"], "author": {"login": "alice", "bot": false}}"#,
        )
        .unwrap();
        let b: Value = serde_json::from_str(
            r#"{"author": {"bot": false, "login": "alice"}, "labels": ["bug", "ci"]}"#,
        )
        .unwrap();
        assert_eq!(key_for(&a), key_for(&b));
        // Array order is significant, unlike object key order
        let c: Value = serde_json::from_str(
            r#"{"labels": ["ci", "bug"], "author": {"login": "alice", "bot": false}}"#,
        )
        .unwrap();
        assert_ne!(key_for(&a), key_for(&c));
    }

    #[test]
    fn test_occurrence_timestamp_requires_offset() {
        assert!(parse_occurrence_timestamp("2024-05-01T10:00:00Z").is_ok());
        let offset = parse_occurrence_timestamp("2024-05-01T12:00:00+02:00").unwrap();
        let utc = parse_occurrence_timestamp("2024-05-01T10:00:00Z").unwrap();
        assert_eq!(offset, utc);

        assert!(parse_occurrence_timestamp("2024-05-01T10:00:00").is_err());
        assert!(parse_occurrence_timestamp("not a timestamp").is_err());
    }
}
