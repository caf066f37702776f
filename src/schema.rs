//! Column model and import configuration.
//!
//! This module owns the [`ImportConfig`] struct (the contract a job is created
//! from), the [`ColumnType`] enum produced by inference, and the per-column
//! [`ColumnDefinition`] carrying sensitive-data status and transform policy.
//!
//! ## Responsibilities
//!
//! - YAML configuration loading and saving via `serde_yaml`
//! - Source type and import option parsing
//! - Detection of columns whose sensitive-data status is unresolved

use std::{fmt, fs::File, io::BufReader, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ImportError, ImportResult},
    io_utils,
    phi::PhiCategory,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnType {
    String,
    Number,
    Integer,
    Boolean,
    Date,
    #[serde(rename = "DATETIME")]
    DateTime,
    Array,
    Object,
    Unknown,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Number => "number",
            ColumnType::Integer => "integer",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::Array => "array",
            ColumnType::Object => "object",
            ColumnType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhiStatus {
    #[default]
    Clean,
    Detected,
    NeedsReview,
    Scrubbed,
}

impl PhiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhiStatus::Clean => "clean",
            PhiStatus::Detected => "detected",
            PhiStatus::NeedsReview => "needs_review",
            PhiStatus::Scrubbed => "scrubbed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformPolicy {
    #[default]
    None,
    Hash,
    Redact,
    Generalize,
    Skip,
}

impl TransformPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformPolicy::None => "none",
            TransformPolicy::Hash => "hash",
            TransformPolicy::Redact => "redact",
            TransformPolicy::Generalize => "generalize",
            TransformPolicy::Skip => "skip",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Name written to the target.
    pub name: String,
    /// Name of the field in the source.
    pub original_name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "ColumnDefinition::default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub phi_status: PhiStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phi_category: Option<PhiCategory>,
    #[serde(default)]
    pub transform: TransformPolicy,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        let name = name.into();
        Self {
            original_name: name.clone(),
            name,
            column_type,
            nullable: true,
            phi_status: PhiStatus::Clean,
            phi_category: None,
            transform: TransformPolicy::None,
        }
    }

    pub const fn default_nullable() -> bool {
        true
    }

    pub fn with_phi(mut self, category: PhiCategory, status: PhiStatus) -> Self {
        self.phi_category = Some(category);
        self.phi_status = status;
        self
    }

    pub fn with_transform(mut self, transform: TransformPolicy) -> Self {
        self.transform = transform;
        self
    }

    /// A detected column may only be imported once a transform is chosen.
    pub fn is_unresolved(&self) -> bool {
        self.phi_status == PhiStatus::Detected && self.transform == TransformPolicy::None
    }

    /// Applies the category's default transform to an unresolved column.
    pub fn scrub(&mut self) -> bool {
        if !self.is_unresolved() {
            return false;
        }
        let category = self.phi_category.unwrap_or(PhiCategory::Name);
        self.transform = category.default_transform();
        self.phi_status = PhiStatus::Scrubbed;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Csv,
    Json,
    Excel,
    Survey,
    ObjectStorage,
    Database,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Csv => "csv",
            SourceType::Json => "json",
            SourceType::Excel => "excel",
            SourceType::Survey => "survey",
            SourceType::ObjectStorage => "object_storage",
            SourceType::Database => "database",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["csv", "json", "excel", "survey", "object_storage", "database"]
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "csv" | "tsv" => Ok(SourceType::Csv),
            "json" | "ndjson" => Ok(SourceType::Json),
            "excel" | "xlsx" => Ok(SourceType::Excel),
            "survey" => Ok(SourceType::Survey),
            "object_storage" | "s3" => Ok(SourceType::ObjectStorage),
            "database" | "sql" => Ok(SourceType::Database),
            _ => Err(anyhow!(
                "Unknown source type '{value}'. Supported types: {}",
                SourceType::variants().join(", ")
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub dataset_id: String,
    pub table: String,
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dataset_id, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub has_header: bool,
    /// Single character or one of `tab`, `comma`, `pipe`, `semicolon`.
    pub delimiter: String,
    pub encoding: Option<String>,
    pub skip_rows: usize,
    pub limit_rows: Option<usize>,
    /// Extra chrono format accepted as a DATE during inference.
    pub date_format: Option<String>,
    pub enable_phi_scan: bool,
    pub auto_scrub: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            has_header: true,
            delimiter: ",".to_string(),
            encoding: None,
            skip_rows: 0,
            limit_rows: None,
            date_format: None,
            enable_phi_scan: true,
            auto_scrub: false,
        }
    }
}

impl ImportOptions {
    pub fn delimiter_byte(&self) -> ImportResult<u8> {
        io_utils::parse_delimiter(&self.delimiter).map_err(ImportError::Configuration)
    }

    pub fn resolved_encoding(&self) -> ImportResult<&'static encoding_rs::Encoding> {
        io_utils::resolve_encoding(self.encoding.as_deref()).map_err(ImportError::configuration)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    pub source_type: SourceType,
    /// Adapter-specific settings, validated by the adapter itself.
    #[serde(default)]
    pub source_config: serde_json::Value,
    pub target: TargetRef,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub options: ImportOptions,
}

impl ImportConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening import config {path:?}"))?;
        let reader = BufReader::new(file);
        let config: ImportConfig =
            serde_yaml::from_reader(reader).context("Parsing import config YAML")?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Creating import config {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing import config YAML")
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn unresolved_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns.iter().filter(|c| c.is_unresolved())
    }

    /// Columns flagged sensitive, whether or not a transform resolved them.
    pub fn detected_count(&self) -> usize {
        self.columns
            .iter()
            .filter(|c| matches!(c.phi_status, PhiStatus::Detected | PhiStatus::Scrubbed))
            .count()
    }

    /// Resolves every unresolved column with its category default. Returns
    /// the names of the columns that changed.
    pub fn auto_scrub(&mut self) -> Vec<String> {
        self.columns
            .iter_mut()
            .filter_map(|column| column.scrub().then(|| column.name.clone()))
            .collect()
    }
}
