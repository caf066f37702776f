//! Source preview.
//!
//! Samples a source through its adapter, infers a type and runs the
//! sensitive-data matcher per column, and returns the result without touching
//! any job.

use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    cli::{PreviewArgs, SourceArgs},
    error::{ImportError, ImportResult},
    infer,
    phi::{Evidence, PhiCategory, PhiMatcher},
    schema::{ColumnDefinition, ImportOptions, PhiStatus, SourceType},
    settings::Settings,
    source::SourceRegistry,
    table,
    transform::Record,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhiWarning {
    pub column: String,
    pub category: PhiCategory,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResult {
    pub columns: Vec<ColumnDefinition>,
    pub sample_rows: Vec<Record>,
    pub total_estimate: u64,
    pub warnings: Vec<PhiWarning>,
}

/// Everything a preview needs, borrowed from the owning service.
#[derive(Debug, Clone, Copy)]
pub struct Previewer<'a> {
    pub registry: &'a SourceRegistry,
    pub matcher: &'a PhiMatcher,
    pub settings: &'a Settings,
}

impl Previewer<'_> {
    pub fn preview(
        &self,
        source_type: SourceType,
        source_config: &Value,
        options: &ImportOptions,
        sample_rows: Option<usize>,
    ) -> ImportResult<PreviewResult> {
        let adapter = self.registry.get(source_type)?;
        let limit = self.settings.sample_limit(sample_rows);
        let sample = adapter
            .sample(source_config, options, limit)
            .map_err(ImportError::configuration)?;
        debug!(
            "Previewing {} column(s) from {} sampled row(s)",
            sample.columns.len(),
            sample.rows.len()
        );

        let mut columns = Vec::with_capacity(sample.columns.len());
        let mut warnings = Vec::new();
        for name in &sample.columns {
            let (column, warning) = self.describe_column(name, &sample.rows, options);
            columns.push(column);
            warnings.extend(warning);
        }

        let mut sample_rows = sample.rows;
        sample_rows.truncate(limit);
        Ok(PreviewResult {
            columns,
            sample_rows,
            total_estimate: sample.total_estimate,
            warnings,
        })
    }

    fn describe_column(
        &self,
        name: &str,
        rows: &[Record],
        options: &ImportOptions,
    ) -> (ColumnDefinition, Option<PhiWarning>) {
        let values: Vec<Value> = rows
            .iter()
            .map(|row| row.get(name).cloned().unwrap_or(Value::Null))
            .collect();
        let column_type = infer::infer_column_type_with(&values, options.date_format.as_deref());
        let mut column = ColumnDefinition::new(name, column_type);
        column.nullable = rows.is_empty() || values.iter().any(Value::is_null);

        let Some(detection) = self.matcher.detect(name, &values) else {
            return (column, None);
        };
        // Name matches are always DETECTED; value-only matches must clear
        // the threshold.
        let status = match detection.evidence {
            Evidence::ColumnName => PhiStatus::Detected,
            Evidence::SampleValue if detection.confidence >= self.settings.detected_threshold => {
                PhiStatus::Detected
            }
            Evidence::SampleValue => PhiStatus::NeedsReview,
        };
        let warning = PhiWarning {
            column: name.to_string(),
            category: detection.category,
            confidence: detection.confidence,
        };
        (column.with_phi(detection.category, status), Some(warning))
    }
}

pub fn execute(args: &PreviewArgs) -> Result<()> {
    let source = &args.source;
    let settings = Settings::load_or_default(source.settings.as_deref())?;
    let result = preview_from_args(source, &settings)?;

    print_columns(&result);
    if !result.sample_rows.is_empty() {
        println!();
        print_rows(&result);
    }
    println!();
    println!(
        "{} column(s), {} sampled row(s), {} total",
        result.columns.len(),
        result.sample_rows.len(),
        result.total_estimate
    );
    for warning in &result.warnings {
        println!(
            "warning: column '{}' looks like {} (confidence {:.2})",
            warning.column, warning.category, warning.confidence
        );
    }
    info!(
        "Previewed {:?} with {} sensitive-data warning(s)",
        source.input,
        result.warnings.len()
    );
    Ok(())
}

/// Previews the file named on the command line with the built-in adapters.
pub(crate) fn preview_from_args(source: &SourceArgs, settings: &Settings) -> Result<PreviewResult> {
    let registry = SourceRegistry::with_defaults();
    let matcher = PhiMatcher::new()?;
    let previewer = Previewer {
        registry: &registry,
        matcher: &matcher,
        settings,
    };
    let result = previewer
        .preview(
            source.source,
            &file_source_config(&source.input),
            &source.import_options(),
            source.sample_rows,
        )
        .with_context(|| format!("Previewing {:?}", source.input))?;
    Ok(result)
}

pub(crate) fn file_source_config(path: &Path) -> Value {
    json!({ "path": path.to_string_lossy() })
}

fn print_columns(result: &PreviewResult) {
    let headers = ["column", "type", "nullable", "phi_status", "category", "confidence"]
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    let rows = result
        .columns
        .iter()
        .map(|column| {
            let confidence = result
                .warnings
                .iter()
                .find(|w| w.column == column.name)
                .map(|w| format!("{:.2}", w.confidence))
                .unwrap_or_default();
            vec![
                column.name.clone(),
                column.column_type.to_string(),
                column.nullable.to_string(),
                column.phi_status.as_str().to_string(),
                column
                    .phi_category
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
                confidence,
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
}

fn print_rows(result: &PreviewResult) {
    let headers = result
        .columns
        .iter()
        .map(|c| c.name.clone())
        .collect::<Vec<_>>();
    let rows = result
        .sample_rows
        .iter()
        .map(|record| {
            headers
                .iter()
                .map(|name| table::render_value(record.get(name)))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
}
