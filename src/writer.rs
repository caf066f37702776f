//! Bulk writers invoked during IMPORTING.
//!
//! A writer receives transformed batches for one target. Failures are fatal
//! to the job; batches already written are not rolled back.

use std::{
    collections::{HashMap, hash_map::Entry},
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;

use crate::{io_utils, schema::TargetRef, table, transform::Record};

#[async_trait]
pub trait BulkWriter: Send + Sync {
    /// Writes one batch and returns how many rows were accepted.
    async fn write(&self, target: &TargetRef, rows: &[Record]) -> Result<usize>;

    /// Location of everything written to `target`, if the writer has one.
    fn location(&self, _target: &TargetRef) -> Option<String> {
        None
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps written rows in memory, grouped by target.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    tables: Mutex<HashMap<String, Vec<Record>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, target: &TargetRef) -> Vec<Record> {
        lock(&self.tables)
            .get(&target.to_string())
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_rows(&self) -> usize {
        lock(&self.tables).values().map(Vec::len).sum()
    }
}

#[async_trait]
impl BulkWriter for MemoryWriter {
    async fn write(&self, target: &TargetRef, rows: &[Record]) -> Result<usize> {
        lock(&self.tables)
            .entry(target.to_string())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(rows.len())
    }

    fn location(&self, target: &TargetRef) -> Option<String> {
        Some(format!("memory://{target}"))
    }
}

struct OpenTable {
    headers: Vec<String>,
    writer: csv::Writer<BufWriter<File>>,
}

type OpenTables = Arc<Mutex<HashMap<String, OpenTable>>>;

/// Writes each target to `<dir>/<dataset>_<table>.csv`. The header row is
/// taken from the first record written. File I/O runs on the blocking pool.
pub struct CsvFileWriter {
    dir: PathBuf,
    delimiter: u8,
    open: OpenTables,
}

impl std::fmt::Debug for CsvFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvFileWriter")
            .field("dir", &self.dir)
            .field("delimiter", &io_utils::printable_delimiter(self.delimiter))
            .finish_non_exhaustive()
    }
}

impl CsvFileWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            delimiter: b',',
            open: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn path_for(&self, target: &TargetRef) -> PathBuf {
        self.dir
            .join(format!("{}_{}.csv", sanitize(&target.dataset_id), sanitize(&target.table)))
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn open_table(dir: &Path, path: &Path, delimiter: u8, first: &Record) -> Result<OpenTable> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Creating output directory {dir:?}"))?;
    let mut writer = io_utils::create_csv_writer(path, delimiter)?;
    let headers: Vec<String> = first.keys().cloned().collect();
    writer
        .write_record(&headers)
        .with_context(|| format!("Writing header row to {path:?}"))?;
    debug!("Opened {path:?} with {} column(s)", headers.len());
    Ok(OpenTable { headers, writer })
}

fn append_rows(
    tables: &Mutex<HashMap<String, OpenTable>>,
    key: String,
    dir: &Path,
    path: &Path,
    delimiter: u8,
    rows: &[Record],
) -> Result<usize> {
    let Some(first) = rows.first() else {
        return Ok(0);
    };
    let mut open = lock(tables);
    let output = match open.entry(key) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => entry.insert(open_table(dir, path, delimiter, first)?),
    };
    for (idx, row) in rows.iter().enumerate() {
        let cells: Vec<String> = output
            .headers
            .iter()
            .map(|header| table::render_value(row.get(header)))
            .collect();
        output
            .writer
            .write_record(&cells)
            .with_context(|| format!("Writing row {} to {path:?}", idx + 1))?;
    }
    output
        .writer
        .flush()
        .with_context(|| format!("Flushing {path:?}"))?;
    Ok(rows.len())
}

#[async_trait]
impl BulkWriter for CsvFileWriter {
    async fn write(&self, target: &TargetRef, rows: &[Record]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let tables = Arc::clone(&self.open);
        let key = target.to_string();
        let dir = self.dir.clone();
        let path = self.path_for(target);
        let delimiter = self.delimiter;
        let rows = rows.to_vec();
        tokio::task::spawn_blocking(move || {
            append_rows(&tables, key, &dir, &path, delimiter, &rows)
        })
        .await
        .context("CSV writer task failed")?
    }

    fn location(&self, target: &TargetRef) -> Option<String> {
        Some(self.path_for(target).display().to_string())
    }
}
