#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use data_import::{
    ids::SequentialIds,
    schema::{ColumnDefinition, ColumnType, ImportConfig, ImportOptions, SourceType, TargetRef},
    service::ImportService,
    settings::Settings,
    writer::BulkWriter,
};
use serde_json::json;
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

pub fn target() -> TargetRef {
    TargetRef {
        dataset_id: "clinic".to_string(),
        table: "visits".to_string(),
    }
}

/// CSV config over inline content with one clean STRING column per name.
pub fn inline_csv_config(content: &str, columns: &[&str]) -> ImportConfig {
    ImportConfig {
        source_type: SourceType::Csv,
        source_config: json!({ "content": content }),
        target: target(),
        columns: columns
            .iter()
            .map(|name| ColumnDefinition::new(*name, ColumnType::String))
            .collect(),
        options: ImportOptions::default(),
    }
}

/// Service with sequential ids so runs are reproducible.
pub fn service(writer: Arc<dyn BulkWriter>, settings: Settings) -> ImportService {
    ImportService::new(writer)
        .expect("service")
        .with_ids(Arc::new(SequentialIds::new()))
        .with_settings(settings)
}

/// Settings with a small batch so progress moves several times per job.
pub fn small_batches(batch_size: usize) -> Settings {
    Settings {
        batch_size,
        ..Settings::default()
    }
}
