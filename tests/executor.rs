mod common;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use data_import::{
    error::ImportResult,
    job::{ImportJob, JobStatus, Severity},
    phi::PhiCategory,
    schema::{ColumnDefinition, ColumnType, PhiStatus, SourceType, TargetRef, TransformPolicy},
    settings::Settings,
    store::{JobFilter, JobStore, MemoryJobStore, UpdateOutcome},
    transform::{self, Record},
    writer::{BulkWriter, CsvFileWriter, MemoryWriter},
};
use serde_json::{Value, json};
use uuid::Uuid;

use common::{TestWorkspace, fixture_path, inline_csv_config, service, small_batches, target};

const TWO_BY_TWO: &str = "a,b\n1,2\n3,4\n";

fn rows(count: usize) -> String {
    let mut content = String::from("n\n");
    for idx in 1..=count {
        content.push_str(&format!("{idx}\n"));
    }
    content
}

/// Records the progress of every accepted write.
#[derive(Default)]
struct ObservingStore {
    inner: MemoryJobStore,
    progress: Mutex<Vec<u8>>,
}

impl JobStore for ObservingStore {
    fn create(&self, job: ImportJob) -> ImportResult<ImportJob> {
        self.inner.create(job)
    }

    fn get(&self, id: Uuid) -> ImportResult<Option<ImportJob>> {
        self.inner.get(id)
    }

    fn list(&self, tenant_id: &str, filter: &JobFilter) -> ImportResult<Vec<ImportJob>> {
        self.inner.list(tenant_id, filter)
    }

    fn update_if(
        &self,
        id: Uuid,
        guard: &dyn Fn(&ImportJob) -> bool,
        apply: &mut dyn FnMut(&mut ImportJob),
    ) -> ImportResult<UpdateOutcome> {
        let outcome = self.inner.update_if(id, guard, apply)?;
        if let UpdateOutcome::Applied(job) = &outcome {
            self.progress.lock().expect("progress lock").push(job.progress);
        }
        Ok(outcome)
    }
}

/// Cancels the job from inside the write that reaches `cancel_on`.
struct CancellingWriter {
    store: Arc<MemoryJobStore>,
    job: Mutex<Option<Uuid>>,
    calls: Mutex<usize>,
    cancel_on: usize,
    inner: MemoryWriter,
}

#[async_trait]
impl BulkWriter for CancellingWriter {
    async fn write(&self, target: &TargetRef, rows: &[Record]) -> anyhow::Result<usize> {
        let call = {
            let mut calls = self.calls.lock().expect("calls lock");
            *calls += 1;
            *calls
        };
        if call == self.cancel_on {
            let id = self.job.lock().expect("job lock").expect("job id set");
            assert!(self.store.cancel(id).expect("cancel"));
        }
        self.inner.write(target, rows).await
    }
}

struct FailingWriter;

#[async_trait]
impl BulkWriter for FailingWriter {
    async fn write(&self, _target: &TargetRef, _rows: &[Record]) -> anyhow::Result<usize> {
        Err(anyhow!("disk full"))
    }
}

struct SlowWriter(MemoryWriter);

#[async_trait]
impl BulkWriter for SlowWriter {
    async fn write(&self, target: &TargetRef, rows: &[Record]) -> anyhow::Result<usize> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.0.write(target, rows).await
    }
}

#[tokio::test]
async fn end_to_end_success() {
    let writer = Arc::new(MemoryWriter::new());
    let service = service(writer.clone(), Settings::default());

    let preview = service
        .preview(SourceType::Csv, &json!({ "content": TWO_BY_TWO }), None)
        .expect("preview");
    assert_eq!(preview.columns.len(), 2);
    assert!(preview.warnings.is_empty());

    let mut config = inline_csv_config(TWO_BY_TWO, &[]);
    config.columns = preview.columns;
    let job = service.create_job(config, "alice", "acme").expect("create");
    assert_eq!(job.status, JobStatus::Pending);

    let finished = service.execute_job(job.id).await.expect("execute");
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.progress, 100);
    assert_eq!(finished.rows_processed, 2);
    assert_eq!(finished.rows_total, Some(2));
    assert!(finished.result_id.is_some());
    assert!(finished.started_at.is_some());
    assert!(finished.completed_at.is_some());
    assert!(finished.errors.is_empty());

    let written = writer.rows(&target());
    assert_eq!(written.len(), 2);
    assert_eq!(written[1]["a"], json!("3"));

    assert_eq!(service.get_job(job.id).expect("get"), Some(finished));
}

#[tokio::test]
async fn detected_column_without_transform_fails_validation() {
    let writer = Arc::new(MemoryWriter::new());
    let service = service(writer.clone(), Settings::default());
    let mut config = inline_csv_config("ssn,b\n123-45-6789,2\n", &["b"]);
    config.columns.insert(
        0,
        ColumnDefinition::new("ssn", ColumnType::String)
            .with_phi(PhiCategory::Ssn, PhiStatus::Detected),
    );
    let job = service.create_job(config, "alice", "acme").expect("create");

    let finished = service.execute_job(job.id).await.expect("execute");
    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(finished.rows_processed, 0);
    assert!(finished.completed_at.is_some());
    let error = finished
        .errors
        .iter()
        .find(|m| m.severity == Severity::Error)
        .expect("error entry");
    assert!(error.message.contains("ssn"), "{}", error.message);
    assert!(error.message.starts_with("Validation error"));
    assert_eq!(writer.total_rows(), 0);
}

#[tokio::test]
async fn previewed_name_columns_are_gated_like_any_detection() {
    let writer = Arc::new(MemoryWriter::new());
    let service = service(writer.clone(), Settings::default());
    let content = "patient_name,home_address\nJane Doe,12 Main Street\n";
    let preview = service
        .preview(SourceType::Csv, &json!({ "content": content }), None)
        .expect("preview");

    let mut config = inline_csv_config(content, &[]);
    config.columns = preview.columns;
    let job = service.create_job(config, "alice", "acme").expect("create");
    let finished = service.execute_job(job.id).await.expect("execute");

    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(finished.rows_processed, 0);
    let message = &finished.errors[0].message;
    assert!(message.contains("'patient_name' (NAME)"), "{message}");
    assert!(message.contains("'home_address' (ADDRESS)"), "{message}");
    assert_eq!(writer.total_rows(), 0);
}

#[tokio::test]
async fn progress_is_monotonic_and_ends_at_100() {
    let store = Arc::new(ObservingStore::default());
    let service = service(Arc::new(MemoryWriter::new()), small_batches(2))
        .with_store(store.clone());
    let config = inline_csv_config(&rows(7), &["n"]);
    let job = service.create_job(config, "o", "t").expect("create");

    let finished = service.execute_job(job.id).await.expect("execute");
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.rows_processed, 7);

    let observed = store.progress.lock().expect("progress lock").clone();
    assert!(observed.len() > 4, "expected several updates, got {observed:?}");
    assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]), "{observed:?}");
    assert_eq!(observed.last(), Some(&100));
    assert!(observed.iter().any(|p| *p > 50 && *p < 100));
}

#[tokio::test]
async fn cancellation_is_honoured_at_the_next_batch_boundary() {
    let store = Arc::new(MemoryJobStore::new());
    let writer = Arc::new(CancellingWriter {
        store: store.clone(),
        job: Mutex::new(None),
        calls: Mutex::new(0),
        cancel_on: 2,
        inner: MemoryWriter::new(),
    });
    let service = service(writer.clone(), small_batches(1)).with_store(store.clone());
    let job = service
        .create_job(inline_csv_config(&rows(5), &["n"]), "o", "t")
        .expect("create");
    *writer.job.lock().expect("job lock") = Some(job.id);

    let finished = service.execute_job(job.id).await.expect("execute");
    assert_eq!(finished.status, JobStatus::Cancelled);
    assert_eq!(finished.rows_processed, 1);
    assert!(finished.result_id.is_none());
    assert!(finished.errors.is_empty());
    assert_eq!(writer.inner.total_rows(), 2);
    assert_eq!(service.get_job(job.id).expect("get"), Some(finished));
}

#[tokio::test]
async fn writer_failure_fails_the_job() {
    let service = service(Arc::new(FailingWriter), Settings::default());
    let job = service
        .create_job(inline_csv_config(TWO_BY_TWO, &["a", "b"]), "o", "t")
        .expect("create");
    let finished = service.execute_job(job.id).await.expect("execute");
    assert_eq!(finished.status, JobStatus::Failed);
    let messages: Vec<&str> = finished.errors.iter().map(|m| m.message.as_str()).collect();
    assert!(messages.iter().any(|m| m.contains("disk full")), "{messages:?}");
}

#[tokio::test]
async fn row_budget_fails_with_timeout() {
    let settings = Settings {
        batch_size: 1,
        max_rows: Some(2),
        ..Settings::default()
    };
    let writer = Arc::new(MemoryWriter::new());
    let service = service(writer.clone(), settings);
    let job = service
        .create_job(inline_csv_config(&rows(4), &["n"]), "o", "t")
        .expect("create");
    let finished = service.execute_job(job.id).await.expect("execute");
    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(finished.rows_processed, 2);
    assert!(finished.errors[0].message.starts_with("Timeout"));
    assert_eq!(writer.total_rows(), 2);
}

#[tokio::test]
async fn wall_clock_budget_fails_with_timeout() {
    let settings = Settings {
        batch_size: 1,
        timeout_secs: Some(0),
        ..Settings::default()
    };
    let service = service(Arc::new(SlowWriter(MemoryWriter::new())), settings);
    let job = service
        .create_job(inline_csv_config(&rows(3), &["n"]), "o", "t")
        .expect("create");
    let finished = service.execute_job(job.id).await.expect("execute");
    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished.errors[0].message.contains("budget"));
}

#[tokio::test]
async fn ragged_rows_become_warnings() {
    let writer = Arc::new(MemoryWriter::new());
    let service = service(writer.clone(), Settings::default());
    let job = service
        .create_job(inline_csv_config("a,b\n1,2\n3\n5,6\n", &["a", "b"]), "o", "t")
        .expect("create");
    let finished = service.execute_job(job.id).await.expect("execute");
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.rows_processed, 2);
    assert_eq!(finished.warnings_count, 1);
    let warning = &finished.errors[0];
    assert_eq!(warning.severity, Severity::Warning);
    assert_eq!(warning.row, Some(2));
}

#[tokio::test]
async fn transforms_shape_written_records() {
    let writer = Arc::new(MemoryWriter::new());
    let service = service(writer.clone(), Settings::default());
    let mut config = inline_csv_config(
        "SSN,Patient Name,Age,Notes\n123-45-6789,Jane Doe,44,private\n",
        &[],
    );
    let mut ssn = ColumnDefinition::new("ssn_hash", ColumnType::String)
        .with_phi(PhiCategory::Ssn, PhiStatus::Detected)
        .with_transform(TransformPolicy::Hash);
    ssn.original_name = "SSN".to_string();
    let mut name = ColumnDefinition::new("patient_name", ColumnType::String)
        .with_phi(PhiCategory::Name, PhiStatus::Detected)
        .with_transform(TransformPolicy::Redact);
    name.original_name = "Patient Name".to_string();
    let mut age = ColumnDefinition::new("age", ColumnType::Integer)
        .with_transform(TransformPolicy::Generalize);
    age.original_name = "Age".to_string();
    let mut notes =
        ColumnDefinition::new("notes", ColumnType::String).with_transform(TransformPolicy::Skip);
    notes.original_name = "Notes".to_string();
    config.columns = vec![ssn, name, age, notes];

    let job = service.create_job(config, "o", "t").expect("create");
    let finished = service.execute_job(job.id).await.expect("execute");
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.phi_detections, 2);

    let written = writer.rows(&target());
    let record = &written[0];
    let keys: Vec<&str> = record.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["ssn_hash", "patient_name", "age"]);
    assert_eq!(
        record["ssn_hash"],
        Value::String(transform::hash_value(&json!("123-45-6789")))
    );
    assert_eq!(record["patient_name"], json!(transform::REDACTED));
    assert_eq!(record["age"], json!("40"));
}

#[tokio::test]
async fn auto_scrub_resolves_detected_columns_at_creation() {
    let service = service(Arc::new(MemoryWriter::new()), Settings::default());
    let mut config = inline_csv_config("ssn\n123-45-6789\n", &[]);
    config.columns = vec![
        ColumnDefinition::new("ssn", ColumnType::String)
            .with_phi(PhiCategory::Ssn, PhiStatus::Detected),
    ];
    config.options.auto_scrub = true;

    let job = service.create_job(config, "o", "t").expect("create");
    let ssn = job.config.column("ssn").expect("ssn column");
    assert_eq!(ssn.transform, TransformPolicy::Hash);
    assert_eq!(ssn.phi_status, PhiStatus::Scrubbed);

    let finished = service.execute_job(job.id).await.expect("execute");
    assert_eq!(finished.status, JobStatus::Completed);
}

#[tokio::test]
async fn disabled_scan_records_no_detections() {
    let service = service(Arc::new(MemoryWriter::new()), Settings::default());
    let mut config = inline_csv_config("email\nx@example.com\n", &[]);
    config.columns = vec![
        ColumnDefinition::new("email", ColumnType::String)
            .with_phi(PhiCategory::Email, PhiStatus::Detected)
            .with_transform(TransformPolicy::Hash),
    ];
    config.options.enable_phi_scan = false;
    let job = service.create_job(config, "o", "t").expect("create");
    let finished = service.execute_job(job.id).await.expect("execute");
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.phi_detections, 0);
}

#[tokio::test]
async fn missing_source_column_fails_mapping() {
    let service = service(Arc::new(MemoryWriter::new()), Settings::default());
    let job = service
        .create_job(inline_csv_config(TWO_BY_TWO, &["a", "zzz"]), "o", "t")
        .expect("create");
    let finished = service.execute_job(job.id).await.expect("execute");
    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(finished.rows_processed, 0);
    assert!(finished.errors[0].message.contains("zzz"));
    assert!(finished.errors[0].message.starts_with("Execution error"));
}

#[tokio::test]
async fn execute_requires_pending() {
    let service = service(Arc::new(MemoryWriter::new()), Settings::default());
    let job = service
        .create_job(inline_csv_config(TWO_BY_TWO, &["a", "b"]), "o", "t")
        .expect("create");
    let finished = service.execute_job(job.id).await.expect("execute");

    let err = service.execute_job(job.id).await.unwrap_err();
    assert_eq!(err.kind(), "INVALID_STATE");
    assert!(err.to_string().contains("COMPLETED"));
    assert_eq!(service.get_job(job.id).expect("get"), Some(finished.clone()));

    assert!(!service.cancel_job(job.id).expect("cancel"));
    assert_eq!(service.get_job(job.id).expect("get"), Some(finished));

    let missing = service.execute_job(Uuid::from_u128(999)).await.unwrap_err();
    assert_eq!(missing.kind(), "NOT_FOUND");
}

#[tokio::test]
async fn dispatched_file_import_writes_csv() {
    let workspace = TestWorkspace::new();
    let writer = Arc::new(CsvFileWriter::new(workspace.path().join("out")));
    let service = service(writer.clone(), small_batches(1));
    let mut config = inline_csv_config("", &[]);
    config.source_config = json!({ "path": fixture_path("patients.csv") });
    config.columns = ["patient_id", "age"]
        .into_iter()
        .map(|name| ColumnDefinition::new(name, ColumnType::Integer))
        .collect();
    let job = service.create_job(config, "o", "t").expect("create");

    let handle = service.dispatch_job(job.id).expect("dispatch");
    let finished = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("job finishes")
        .expect("join")
        .expect("run");
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.rows_processed, 3);

    let written = std::fs::read_to_string(writer.path_for(&target())).expect("output csv");
    assert_eq!(written, "patient_id,age\n1,39\n2,34\n3,48\n");
}

#[tokio::test]
async fn dispatch_returns_once_the_job_is_claimed() {
    let service = service(Arc::new(MemoryWriter::new()), Settings::default());
    let job = service
        .create_job(inline_csv_config(TWO_BY_TWO, &["a", "b"]), "o", "t")
        .expect("create");

    let handle = service.dispatch_job(job.id).expect("dispatch");
    let claimed = service.get_job(job.id).expect("get").expect("job");
    assert_ne!(claimed.status, JobStatus::Pending);
    assert!(service.dispatch_job(job.id).is_err());

    let finished = handle.await.expect("join").expect("run");
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(
        service.get_job(job.id).expect("get").map(|j| j.status),
        Some(JobStatus::Completed)
    );
}
