mod common;

use std::sync::Arc;

use data_import::{
    job::{ImportJob, JobStatus},
    schema::SourceType,
    settings::Settings,
    store::JobFilter,
    writer::MemoryWriter,
};
use uuid::Uuid;

use common::{inline_csv_config, service};

fn ids(jobs: &[ImportJob]) -> Vec<u128> {
    jobs.iter().map(|job| job.id.as_u128()).collect()
}

#[test]
fn created_jobs_start_pending_with_zeroed_counters() {
    let service = service(Arc::new(MemoryWriter::new()), Settings::default());
    let job = service
        .create_job(inline_csv_config("a\n1\n", &["a"]), "alice", "acme")
        .expect("create");
    assert_eq!(job.id, Uuid::from_u128(1));
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.progress, 0);
    assert_eq!(job.rows_processed, 0);
    assert_eq!(job.warnings_count, 0);
    assert_eq!(job.phi_detections, 0);
    assert!(job.errors.is_empty());
    assert_eq!(job.owner_id, "alice");
    assert_eq!(job.tenant_id, "acme");
}

#[test]
fn unknown_job_is_none() {
    let service = service(Arc::new(MemoryWriter::new()), Settings::default());
    assert!(service.get_job(Uuid::from_u128(42)).expect("get").is_none());
}

#[test]
fn list_is_scoped_filtered_and_newest_first() {
    let service = service(Arc::new(MemoryWriter::new()), Settings::default());
    for (owner, tenant) in [("alice", "acme"), ("bob", "acme"), ("alice", "acme"), ("carol", "globex")] {
        service
            .create_job(inline_csv_config("a\n1\n", &["a"]), owner, tenant)
            .expect("create");
    }
    assert!(service.cancel_job(Uuid::from_u128(2)).expect("cancel"));

    let all = service.list_jobs("acme", &JobFilter::default()).expect("list");
    assert_eq!(ids(&all), vec![3, 2, 1]);

    let alice = JobFilter {
        owner_id: Some("alice".to_string()),
        ..JobFilter::default()
    };
    assert_eq!(ids(&service.list_jobs("acme", &alice).expect("list")), vec![3, 1]);

    let cancelled = JobFilter {
        status: Some(JobStatus::Cancelled),
        ..JobFilter::default()
    };
    assert_eq!(ids(&service.list_jobs("acme", &cancelled).expect("list")), vec![2]);

    let capped = JobFilter {
        limit: Some(2),
        ..JobFilter::default()
    };
    assert_eq!(ids(&service.list_jobs("acme", &capped).expect("list")), vec![3, 2]);
    assert_eq!(ids(&service.list_jobs("globex", &JobFilter::default()).expect("list")), vec![4]);
}

#[tokio::test]
async fn cancelled_job_cannot_be_executed_or_cancelled_again() {
    let service = service(Arc::new(MemoryWriter::new()), Settings::default());
    let job = service
        .create_job(inline_csv_config("a\n1\n", &["a"]), "o", "t")
        .expect("create");
    assert!(service.cancel_job(job.id).expect("cancel"));
    let cancelled = service.get_job(job.id).expect("get").expect("job");
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.started_at.is_none());
    assert!(cancelled.completed_at.is_some());

    assert!(!service.cancel_job(job.id).expect("cancel again"));
    let err = service.execute_job(job.id).await.unwrap_err();
    assert_eq!(err.kind(), "INVALID_STATE");
    assert!(err.to_string().contains("CANCELLED"));
    assert_eq!(service.get_job(job.id).expect("get"), Some(cancelled));
}

#[test]
fn cancel_of_unknown_job_is_false() {
    let service = service(Arc::new(MemoryWriter::new()), Settings::default());
    assert!(!service.cancel_job(Uuid::from_u128(7)).expect("cancel"));
}

#[test]
fn configuration_errors_surface_before_a_job_exists() {
    let service = service(Arc::new(MemoryWriter::new()), Settings::default());

    let mut unsupported = inline_csv_config("a\n1\n", &["a"]);
    unsupported.source_type = SourceType::Survey;
    let err = service.create_job(unsupported, "o", "t").unwrap_err();
    assert_eq!(err.kind(), "CONFIGURATION_ERROR");

    let mut bad_delimiter = inline_csv_config("a\n1\n", &["a"]);
    bad_delimiter.options.delimiter = "::".to_string();
    let err = service.create_job(bad_delimiter, "o", "t").unwrap_err();
    assert_eq!(err.kind(), "CONFIGURATION_ERROR");

    assert!(service.list_jobs("t", &JobFilter::default()).expect("list").is_empty());
}

#[test]
fn jobs_serialize_to_a_flat_record() {
    let service = service(Arc::new(MemoryWriter::new()), Settings::default());
    let job = service
        .create_job(inline_csv_config("a\n1\n", &["a"]), "o", "t")
        .expect("create");
    let value = serde_json::to_value(&job).expect("serialize");
    assert_eq!(value["status"], "PENDING");
    assert_eq!(value["config"]["source_type"], "CSV");
    assert_eq!(value["config"]["columns"][0]["type"], "STRING");
    let restored: ImportJob = serde_json::from_value(value).expect("deserialize");
    assert_eq!(restored, job);
}
