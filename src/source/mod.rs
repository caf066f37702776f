//! Pluggable source adapters.
//!
//! Each [`SourceType`] is served by one [`SourceAdapter`]. Adapters take the
//! opaque `source_config` from an [`ImportConfig`](crate::schema::ImportConfig)
//! and either return a bounded sample (preview) or a row stream (import).
//! Types without a registered adapter are rejected with a configuration
//! error.

mod csv_file;
mod json_file;

use std::{collections::HashMap, fmt, io::Cursor, io::Read, path::PathBuf, sync::Arc};

use anyhow::{Context, Result, anyhow, bail};
use log::debug;
use serde::Deserialize;
use serde_json::Value;

pub use csv_file::CsvSource;
pub use json_file::JsonSource;

use crate::{
    error::{ImportError, ImportResult},
    io_utils,
    schema::{ImportOptions, SourceType},
    transform::Record,
};

/// Bounded read of a source used by preview.
#[derive(Debug, Clone, Default)]
pub struct SourceSample {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
    /// Total row count; may be an estimate when counting is expensive.
    pub total_estimate: u64,
}

/// A problem reading one row.
#[derive(Debug)]
pub enum RowError {
    /// The row is unusable but reading may continue.
    Recoverable { row: u64, message: String },
    /// The source can no longer be read.
    Fatal(anyhow::Error),
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowError::Recoverable { row, message } => write!(f, "row {row}: {message}"),
            RowError::Fatal(err) => write!(f, "{err:#}"),
        }
    }
}

pub type RowIter = Box<dyn Iterator<Item = Result<Record, RowError>> + Send>;

/// Full read of a source used by the import stage.
pub struct SourceRows {
    pub columns: Vec<String>,
    pub total_hint: Option<u64>,
    pub rows: RowIter,
}

impl fmt::Debug for SourceRows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRows")
            .field("columns", &self.columns)
            .field("total_hint", &self.total_hint)
            .finish_non_exhaustive()
    }
}

pub trait SourceAdapter: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Returns at most `limit` rows plus the source's column names.
    fn sample(&self, config: &Value, options: &ImportOptions, limit: usize)
    -> Result<SourceSample>;

    /// Opens the whole source for streaming.
    fn open(&self, config: &Value, options: &ImportOptions) -> Result<SourceRows>;
}

#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: HashMap<SourceType, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in file adapters.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CsvSource));
        registry.register(Arc::new(JsonSource));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.source_type(), adapter);
    }

    pub fn get(&self, source_type: SourceType) -> ImportResult<Arc<dyn SourceAdapter>> {
        self.adapters.get(&source_type).cloned().ok_or_else(|| {
            ImportError::Configuration(format!(
                "Unsupported source type '{source_type}': no adapter registered"
            ))
        })
    }

    pub fn supports(&self, source_type: SourceType) -> bool {
        self.adapters.contains_key(&source_type)
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.adapters.keys().map(SourceType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("SourceRegistry")
            .field("adapters", &types)
            .finish()
    }
}

/// Location of a file-backed source: a path on disk or inline content.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileSourceConfig {
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    content: Option<String>,
}

impl FileSourceConfig {
    pub(crate) fn parse(config: &Value, kind: SourceType) -> Result<Self> {
        let parsed: FileSourceConfig = serde_json::from_value(config.clone())
            .with_context(|| format!("Parsing {kind} source configuration"))?;
        match (&parsed.path, &parsed.content) {
            (Some(_), Some(_)) => bail!("{kind} source accepts either 'path' or 'content', not both"),
            (None, None) => Err(anyhow!("{kind} source requires 'path' or 'content'")),
            _ => Ok(parsed),
        }
    }

    pub(crate) fn open(&self) -> Result<Box<dyn Read + Send>> {
        match (&self.path, &self.content) {
            (Some(path), _) => Ok(Box::new(io_utils::open_file(path)?)),
            (None, Some(content)) => Ok(Box::new(Cursor::new(content.clone().into_bytes()))),
            (None, None) => Err(anyhow!("Source has neither 'path' nor 'content'")),
        }
    }

    pub(crate) fn describe(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => "<inline>".to_string(),
        }
    }
}

/// Skip/limit window shared by the file adapters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RowWindow {
    skip: usize,
    remaining: Option<usize>,
}

impl RowWindow {
    pub(crate) fn new(options: &ImportOptions) -> Self {
        Self {
            skip: options.skip_rows,
            remaining: options.limit_rows,
        }
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Returns true if the next row falls inside the window.
    pub(crate) fn admit(&mut self) -> bool {
        if self.skip > 0 {
            self.skip -= 1;
            return false;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        true
    }

    pub(crate) fn clamp_total(&self, total: u64) -> u64 {
        let after_skip = total.saturating_sub(self.skip as u64);
        match self.remaining {
            Some(limit) => after_skip.min(limit as u64),
            None => after_skip,
        }
    }
}

/// Collects rows from a stream into a sample, dropping recoverable errors.
pub(crate) fn collect_sample(rows: RowIter, limit: usize) -> Result<Vec<Record>> {
    let mut sample = Vec::with_capacity(limit.min(1024));
    for item in rows {
        if sample.len() >= limit {
            break;
        }
        match item {
            Ok(record) => sample.push(record),
            Err(RowError::Recoverable { row, message }) => {
                debug!("Skipping unreadable sample row {row}: {message}");
            }
            Err(RowError::Fatal(err)) => return Err(err),
        }
    }
    Ok(sample)
}
