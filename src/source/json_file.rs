use std::io::Read;

use anyhow::{Context, Result};
use serde_json::Value;

use super::{
    FileSourceConfig, RowError, RowIter, RowWindow, SourceAdapter, SourceRows, SourceSample,
    collect_sample,
};
use crate::{
    schema::{ImportOptions, SourceType},
    transform::Record,
};

/// JSON adapter accepting either a top-level array of objects or one object
/// per line. Nested arrays and objects are kept as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSource;

impl SourceAdapter for JsonSource {
    fn source_type(&self) -> SourceType {
        SourceType::Json
    }

    fn sample(
        &self,
        config: &Value,
        options: &ImportOptions,
        limit: usize,
    ) -> Result<SourceSample> {
        let document = load_document(config)?;
        let total = RowWindow::new(options).clamp_total(document.len() as u64);
        let rows = collect_sample(windowed(document, options), limit)?;
        Ok(SourceSample {
            columns: collect_columns(&rows),
            rows,
            total_estimate: total,
        })
    }

    fn open(&self, config: &Value, options: &ImportOptions) -> Result<SourceRows> {
        let document = load_document(config)?;
        let total = RowWindow::new(options).clamp_total(document.len() as u64);
        let objects: Vec<Record> = document
            .iter()
            .filter_map(|value| value.as_object().cloned())
            .collect();
        Ok(SourceRows {
            columns: collect_columns(&objects),
            total_hint: Some(total),
            rows: windowed(document, options),
        })
    }
}

fn load_document(config: &Value) -> Result<Vec<Value>> {
    let location = FileSourceConfig::parse(config, SourceType::Json)?;
    let mut text = String::new();
    location
        .open()?
        .read_to_string(&mut text)
        .with_context(|| format!("Reading JSON source {}", location.describe()))?;

    let body = text.strip_prefix('\u{feff}').unwrap_or(&text);
    let trimmed = body.trim_start();
    if trimmed.starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(trimmed)
            .with_context(|| format!("Parsing JSON array from {}", location.describe()))?;
        return Ok(values);
    }
    body.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| {
                format!("Parsing line {} of {}", idx + 1, location.describe())
            })
        })
        .collect()
}

fn windowed(document: Vec<Value>, options: &ImportOptions) -> RowIter {
    let mut window = RowWindow::new(options);
    let admitted = document
        .into_iter()
        .enumerate()
        .filter(move |_| !window.exhausted() && window.admit());
    Box::new(admitted.map(|(idx, value)| {
        match value {
            Value::Object(record) => Ok(record),
            other => Err(RowError::Recoverable {
                row: idx as u64 + 1,
                message: format!("expected an object but found {}", kind_of(&other)),
            }),
        }
    }))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Union of keys in first-seen order.
fn collect_columns(rows: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.iter().any(|existing| existing == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}
