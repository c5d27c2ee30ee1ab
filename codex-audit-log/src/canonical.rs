//! One canonical JSON-like serialization shared by audit hashing and
//! idempotency fingerprinting (`spec.md` §9: "both must use the same
//! function to make cross-checks cheap"): sorted object keys, UTC ISO-8601
//! timestamps, integer minor units, no `NaN`/`Infinity`.

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

/// The fields hashed into an audit event's chain link. Kept separate from
/// [`crate::AuditRecord`] so the hash input is fixed even if the record type
/// grows fields that should not affect the chain (e.g. a future display-only
/// annotation).
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalEvent {
    pub company_id: Option<String>,
    pub actor_user_id: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub before: Value,
    pub after: Value,
    pub occurred_at: DateTime<Utc>,
    pub correlation_id: Option<String>,
}

impl From<&crate::AuditRecord> for CanonicalEvent {
    fn from(record: &crate::AuditRecord) -> Self {
        Self {
            company_id: record.company_id.clone(),
            actor_user_id: record.actor_user_id.clone(),
            action: record.action.clone(),
            entity_type: record.entity_type.clone(),
            entity_id: record.entity_id.clone(),
            before: record.before.clone(),
            after: record.after.clone(),
            occurred_at: record.occurred_at,
            correlation_id: record.correlation_id.clone(),
        }
    }
}

/// Serializes `value` with object keys sorted lexicographically at every
/// nesting level, timestamps rendered as UTC ISO-8601 (via `serde`'s
/// `DateTime<Utc>` impl), and no `NaN`/`Infinity` float values (JSON has no
/// representation for them; `serde_json` already refuses to serialize
/// them, so this function's guarantee is sorted keys, not new validation).
pub fn to_canonical_json<T: Serialize>(value: &T) -> String {
    let raw = serde_json::to_value(value).unwrap_or(Value::Null);
    sort_keys(raw).to_string()
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, Value> = std::collections::BTreeMap::new();
            for (key, val) in map {
                sorted.insert(key, sort_keys(val));
            }
            let mut out = serde_json::Map::new();
            for (key, val) in sorted {
                out.insert(key, val);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
