//! Column type inference over a bounded value sample.
//!
//! Every non-null sample is classified independently and the tallies decide
//! the column type, so the result does not depend on sample order. A column
//! only receives a narrow type when every classified value agrees; any
//! disagreement falls back to [`ColumnType::String`].

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::schema::ColumnType;

const BOOLEAN_TOKENS: &[&str] = &["true", "false", "t", "f", "yes", "no", "y", "n"];

const ISO_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Default)]
struct TypeCandidate {
    non_null: usize,
    numeric: usize,
    fractional: usize,
    boolean: usize,
    date: usize,
    datetime: usize,
    array: usize,
    object: usize,
}

impl TypeCandidate {
    fn update(&mut self, value: &Value, date_format: Option<&str>) {
        match value {
            Value::Null => {}
            Value::Bool(_) => {
                self.non_null += 1;
                self.boolean += 1;
            }
            Value::Number(number) => {
                self.non_null += 1;
                self.numeric += 1;
                if !number.is_i64() && !number.is_u64() {
                    let is_fractional = number.as_f64().is_some_and(|f| f.fract() != 0.0);
                    if is_fractional {
                        self.fractional += 1;
                    }
                }
            }
            Value::Array(_) => {
                self.non_null += 1;
                self.array += 1;
            }
            Value::Object(_) => {
                self.non_null += 1;
                self.object += 1;
            }
            Value::String(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return;
                }
                self.non_null += 1;
                self.update_text(trimmed, date_format);
            }
        }
    }

    fn update_text(&mut self, text: &str, date_format: Option<&str>) {
        if let Some(parsed) = parse_numeric_token(text) {
            self.numeric += 1;
            if parsed.fract() != 0.0 {
                self.fractional += 1;
            }
            return;
        }
        let lowered = text.to_ascii_lowercase();
        if BOOLEAN_TOKENS.contains(&lowered.as_str()) {
            self.boolean += 1;
        } else if is_iso_datetime(text) {
            self.datetime += 1;
        } else if is_iso_date(text) || matches_date_format(text, date_format) {
            self.date += 1;
        }
    }

    fn all(&self, count: usize) -> bool {
        count == self.non_null
    }

    fn decide(&self) -> ColumnType {
        if self.non_null == 0 {
            return ColumnType::Unknown;
        }
        if self.all(self.array) {
            ColumnType::Array
        } else if self.all(self.object) {
            ColumnType::Object
        } else if self.all(self.numeric) {
            if self.fractional > 0 {
                ColumnType::Number
            } else {
                ColumnType::Integer
            }
        } else if self.all(self.boolean) {
            ColumnType::Boolean
        } else if self.all(self.date + self.datetime) {
            if self.datetime > 0 {
                ColumnType::DateTime
            } else {
                ColumnType::Date
            }
        } else {
            ColumnType::String
        }
    }
}

/// Infers the semantic type of a sampled column.
pub fn infer_column_type(samples: &[Value]) -> ColumnType {
    infer_column_type_with(samples, None)
}

/// Same as [`infer_column_type`], additionally accepting `date_format` as a
/// DATE pattern for sources that do not use ISO-8601.
pub fn infer_column_type_with(samples: &[Value], date_format: Option<&str>) -> ColumnType {
    let mut candidate = TypeCandidate::default();
    for value in samples {
        candidate.update(value, date_format);
    }
    candidate.decide()
}

/// Returns the numeric value of a plain decimal token. Tokens with leading
/// zeros are identifiers (zip codes, record numbers) and are rejected.
pub fn parse_numeric_token(text: &str) -> Option<f64> {
    let body = text.strip_prefix(['-', '+']).unwrap_or(text);
    if !body.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return None;
    }
    if !body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '-' | '+'))
    {
        return None;
    }
    let integer_part = body.split(['.', 'e', 'E']).next().unwrap_or_default();
    if integer_part.len() > 1 && integer_part.starts_with('0') {
        return None;
    }
    text.parse::<f64>().ok().filter(|value| value.is_finite())
}

pub fn is_iso_date(text: &str) -> bool {
    text.len() == 10 && NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
}

pub fn is_iso_datetime(text: &str) -> bool {
    if DateTime::parse_from_rfc3339(text).is_ok() {
        return true;
    }
    ISO_DATETIME_FORMATS
        .iter()
        .any(|format| NaiveDateTime::parse_from_str(text, format).is_ok())
}

fn matches_date_format(text: &str, date_format: Option<&str>) -> bool {
    date_format.is_some_and(|format| NaiveDate::parse_from_str(text, format).is_ok())
}
