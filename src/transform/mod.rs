//! Column transform engine.
//!
//! [`apply_transform`] maps one value under a [`TransformPolicy`]. It never
//! fails: a shape a policy does not understand is returned unchanged, and
//! null always passes through. [`transform_record`] applies a resolved column
//! mapping to a whole source record.

pub mod string_ops;

use serde_json::{Map, Number, Value};

use crate::{infer, schema::TransformPolicy};

pub const REDACTED: &str = "[REDACTED]";
pub const HASH_LENGTH: usize = 16;
pub const GENERALIZE_PREFIX_CHARS: usize = 3;
pub const MASK_SUFFIX: &str = "***";

pub type Record = Map<String, Value>;

/// Returns the transformed value, or `None` when the field must be left out
/// of the written record entirely.
pub fn apply_transform(value: &Value, policy: TransformPolicy) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }
    match policy {
        TransformPolicy::None => Some(value.clone()),
        TransformPolicy::Hash => Some(Value::String(hash_value(value))),
        TransformPolicy::Redact => Some(Value::String(REDACTED.to_string())),
        TransformPolicy::Generalize => Some(generalize(value)),
        TransformPolicy::Skip => None,
    }
}

/// Truncated SHA-256 of the value's text. Strings hash their contents; other
/// shapes hash their JSON rendering behind a type tag, so `42` and `"42"`
/// stay distinct.
pub fn hash_value(value: &Value) -> String {
    let tag = match value {
        Value::String(text) => return string_ops::sha256_prefix(text, HASH_LENGTH),
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    string_ops::sha256_prefix(&format!("{tag}:{value}"), HASH_LENGTH)
}

fn generalize(value: &Value) -> Value {
    match value {
        Value::Number(number) => round_number(number).unwrap_or_else(|| value.clone()),
        Value::String(text) => Value::String(generalize_text(text)),
        other => other.clone(),
    }
}

fn round_number(number: &Number) -> Option<Value> {
    if let Some(int) = number.as_i64() {
        return Some(Value::from(round_to_ten(int as f64) as i64));
    }
    let rounded = round_to_ten(number.as_f64()?);
    Number::from_f64(rounded).map(Value::Number)
}

fn generalize_text(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(parsed) = infer::parse_numeric_token(trimmed) {
        return format!("{}", round_to_ten(parsed));
    }
    if (infer::is_iso_date(trimmed) || infer::is_iso_datetime(trimmed))
        && let Some(month) = string_ops::year_month(trimmed)
    {
        return month.to_string();
    }
    string_ops::mask_after(trimmed, GENERALIZE_PREFIX_CHARS, MASK_SUFFIX)
}

fn round_to_ten(value: f64) -> f64 {
    (value / 10.0).round() * 10.0
}

/// One resolved source-to-target column binding.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    pub source: String,
    pub target: String,
    pub policy: TransformPolicy,
}

/// Builds the target record in mapping order. Fields absent from the source
/// are written as null; SKIP columns are omitted.
pub fn transform_record(record: &Record, mappings: &[ColumnMapping]) -> Record {
    let mut output = Record::with_capacity(mappings.len());
    for mapping in mappings {
        if mapping.policy == TransformPolicy::Skip {
            continue;
        }
        let value = record.get(&mapping.source).unwrap_or(&Value::Null);
        if let Some(transformed) = apply_transform(value, mapping.policy) {
            output.insert(mapping.target.clone(), transformed);
        }
    }
    output
}
