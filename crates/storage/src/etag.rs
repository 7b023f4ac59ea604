//! Content-hash ETags.
//!
//! The tag is the uppercase hex MD5 of a canonical JSON rendering of the
//! state: object keys sorted, `null` members omitted and RFC 3339 timestamps
//! rewritten in UTC. Array order and `null` array elements are preserved.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use md5::{Digest, Md5};
use serde_json::Value;

/// Compute the ETag of a state value.
pub fn compute_etag(state: &Value) -> String {
    let canonical = canonicalize(state).to_string();
    hex::encode_upper(Md5::digest(canonical.as_bytes()))
}

/// Rewrite `value` into its canonical form.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(members) => {
            let sorted: BTreeMap<&String, Value> = members
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::String(s) => Value::String(normalize_timestamp(s).unwrap_or_else(|| s.clone())),
        other => other.clone(),
    }
}

fn normalize_timestamp(s: &str) -> Option<String> {
    let parsed = DateTime::parse_from_rfc3339(s).ok()?;
    Some(
        parsed
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::AutoSi, true),
    )
}
