// ABOUTME: Content fingerprinting for change detection on flat records
// ABOUTME: Stable across field order, volatile-field churn, and formatting noise

use dbf_reader::{Record, Value};
use sha2::{Digest, Sha256};

/// Computes a stable content hash over a record's non-excluded fields.
///
/// Field names are matched case-insensitively against `excluded_fields` and
/// hashed in lexicographic order of their upper-cased names, so neither the
/// source's field order nor schema churn on excluded fields affects the
/// digest. Values are normalized first via [`normalize`]. Two records with
/// the same normalized, non-excluded field values always hash identically.
pub fn fingerprint(record: &Record, excluded_fields: &[String]) -> String {
    let mut entries: Vec<(String, String)> = record
        .fields()
        .filter(|(name, _)| {
            !excluded_fields
                .iter()
                .any(|excluded| excluded.eq_ignore_ascii_case(name))
        })
        .map(|(name, value)| (name.to_ascii_uppercase(), normalize(value)))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (name, value) in &entries {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"|");
    }
    format!("{:x}", hasher.finalize())
}

/// Canonical string form of a field value used as hash input.
///
/// Null and empty collapse to the empty string, numerics to their shortest
/// decimal form (no trailing zeros), text is trimmed of surrounding
/// whitespace.
pub fn normalize(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Text(text) => text.trim().to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Decimal(d) => d.normalize().to_string(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::Logical(b) => b.to_string(),
    }
}
