//! Import job executor.
//!
//! Drives one job from VALIDATING to a terminal status. Every store write is
//! guarded on the status the executor expects to find; a rejected write means
//! the job was cancelled underneath us and the run stops without further
//! mutation. Any error raised by a stage is recorded on the job as an ERROR
//! entry before the job moves to FAILED.

use std::{sync::Arc, time::Instant};

use log::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{ImportError, ImportResult},
    ids::IdGenerator,
    job::{ImportJob, JobMessage, JobStatus},
    schema::ImportConfig,
    settings::Settings,
    source::{RowError, RowIter, SourceRegistry, SourceRows},
    store::{JobStore, UpdateOutcome},
    transform::{self, ColumnMapping, Record},
    writer::BulkWriter,
};

pub const MAPPING_PROGRESS: u8 = 30;
pub const SCANNING_PROGRESS: u8 = 50;

/// Outcome of a guarded stage write.
enum Step {
    Advanced(ImportJob),
    /// The job left the expected status (cancelled); carries the record as
    /// found.
    Stopped(ImportJob),
}

#[derive(Clone)]
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    registry: Arc<SourceRegistry>,
    writer: Arc<dyn BulkWriter>,
    ids: Arc<dyn IdGenerator>,
    settings: Arc<Settings>,
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<SourceRegistry>,
        writer: Arc<dyn BulkWriter>,
        ids: Arc<dyn IdGenerator>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            registry,
            writer,
            ids,
            settings,
        }
    }

    /// Claims a PENDING job by moving it to VALIDATING. Any other status is
    /// rejected without mutation.
    pub fn begin(&self, id: Uuid) -> ImportResult<ImportJob> {
        let outcome = self.store.update_if(
            id,
            &|job: &ImportJob| job.status == JobStatus::Pending,
            &mut |job: &mut ImportJob| job.transition_to(JobStatus::Validating),
        )?;
        match outcome {
            UpdateOutcome::Applied(job) => {
                info!("Job {id} started");
                Ok(job)
            }
            UpdateOutcome::Rejected(job) => Err(ImportError::InvalidState {
                id,
                status: job.status,
            }),
            UpdateOutcome::Missing => Err(ImportError::NotFound(id)),
        }
    }

    /// Runs a claimed job to completion and returns its final record.
    /// Stage failures end in FAILED and are not returned as errors.
    pub async fn run(&self, job: ImportJob) -> ImportResult<ImportJob> {
        let id = job.id;
        match self.run_stages(job).await {
            Ok(job) => Ok(job),
            Err(ImportError::NotFound(missing)) => Err(ImportError::NotFound(missing)),
            Err(err) => self.fail(id, &err),
        }
    }

    async fn run_stages(&self, job: ImportJob) -> ImportResult<ImportJob> {
        let started = Instant::now();
        let config = job.config.clone();

        self.validate(&config)?;
        let job = match self.advance(job.id, JobStatus::Validating, &mut |job: &mut ImportJob| {
            job.transition_to(JobStatus::Mapping);
            job.advance_progress(MAPPING_PROGRESS);
        })? {
            Step::Advanced(job) => job,
            Step::Stopped(job) => return Ok(job),
        };
        debug!("Job {} validated", job.id);

        let registry = Arc::clone(&self.registry);
        let mapping_config = config.clone();
        let (rows, mappings) =
            tokio::task::spawn_blocking(move || map_columns(&registry, &mapping_config))
                .await
                .map_err(|err| ImportError::Execution(format!("Mapping task failed: {err}")))??;
        let total_hint = rows.total_hint;
        let mut stage = JobStatus::Mapping;
        if config.options.enable_phi_scan {
            let job = match self.advance(job.id, stage, &mut |job: &mut ImportJob| {
                job.rows_total = total_hint;
                job.transition_to(JobStatus::PhiScanning);
                job.advance_progress(SCANNING_PROGRESS);
            })? {
                Step::Advanced(job) => job,
                Step::Stopped(job) => return Ok(job),
            };
            let detections = config.detected_count() as u64;
            debug!("Job {} carries {detections} sensitive column(s)", job.id);
            if let Step::Stopped(job) = self.advance(job.id, JobStatus::PhiScanning, &mut |job: &mut ImportJob| {
                job.phi_detections = detections;
            })? {
                return Ok(job);
            }
            stage = JobStatus::PhiScanning;
        }

        let job = match self.advance(job.id, stage, &mut |job: &mut ImportJob| {
            job.rows_total = total_hint;
            job.transition_to(JobStatus::Importing);
            job.advance_progress(SCANNING_PROGRESS);
        })? {
            Step::Advanced(job) => job,
            Step::Stopped(job) => return Ok(job),
        };
        info!("Job {} importing into {}", job.id, config.target);

        if let Some(stopped) = self.import_rows(&job, &config, rows, mappings, started).await? {
            return Ok(stopped);
        }

        let result_id = self.ids.artifact_id();
        match self.advance(job.id, JobStatus::Importing, &mut |job: &mut ImportJob| {
            job.result_id = Some(result_id);
            job.progress = 100;
            job.transition_to(JobStatus::Completed);
        })? {
            Step::Advanced(job) => {
                info!(
                    "Job {} completed: {} row(s), {} warning(s), result {result_id}{}",
                    job.id,
                    job.rows_processed,
                    job.warnings_count,
                    self.writer
                        .location(&config.target)
                        .map(|location| format!(" at {location}"))
                        .unwrap_or_default()
                );
                Ok(job)
            }
            Step::Stopped(job) => Ok(job),
        }
    }

    fn validate(&self, config: &ImportConfig) -> ImportResult<()> {
        self.registry.get(config.source_type)?;
        if config.target.dataset_id.trim().is_empty() || config.target.table.trim().is_empty() {
            return Err(ImportError::Validation(
                "Target dataset and table must both be set".to_string(),
            ));
        }
        if config.columns.is_empty() {
            return Err(ImportError::Validation(
                "At least one column must be declared".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(duplicate) = config
            .columns
            .iter()
            .find(|column| !seen.insert(column.name.as_str()))
        {
            return Err(ImportError::Validation(format!(
                "Target column '{}' is declared more than once",
                duplicate.name
            )));
        }
        let unresolved: Vec<String> = config
            .unresolved_columns()
            .map(|column| match column.phi_category {
                Some(category) => format!("'{}' ({category})", column.name),
                None => format!("'{}'", column.name),
            })
            .collect();
        if !unresolved.is_empty() {
            return Err(ImportError::Validation(format!(
                "Sensitive column(s) {} require a transform other than NONE",
                unresolved.join(", ")
            )));
        }
        Ok(())
    }

    /// Streams rows to the writer in batches. Reading runs on the blocking
    /// pool one batch at a time. Returns the job record if the job was
    /// cancelled at a batch boundary.
    async fn import_rows(
        &self,
        job: &ImportJob,
        config: &ImportConfig,
        mut source: SourceRows,
        mappings: Vec<ColumnMapping>,
        started: Instant,
    ) -> ImportResult<Option<ImportJob>> {
        let batch_size = self.settings.batch_size.max(1);
        let total = job.rows_total;
        let mappings: Arc<[ColumnMapping]> = mappings.into();
        let mut processed = 0u64;

        loop {
            let id = job.id;
            let batch_mappings = Arc::clone(&mappings);
            let (returned, filled) = tokio::task::spawn_blocking(move || {
                let filled = fill_batch(id, &mut source.rows, &batch_mappings, batch_size);
                (source, filled)
            })
            .await
            .map_err(|err| ImportError::Execution(format!("Reading task failed: {err}")))?;
            source = returned;
            let Batch {
                records,
                warnings,
                exhausted,
            } = filled?;

            if let Some(limit) = self.settings.max_rows
                && processed + records.len() as u64 > limit
            {
                return Err(ImportError::Timeout(format!(
                    "Row budget of {limit} exceeded after {processed} row(s)"
                )));
            }
            if !records.is_empty() {
                let written = self
                    .writer
                    .write(&config.target, &records)
                    .await
                    .map_err(|err| ImportError::execution(err.context("Writing batch")))?;
                processed += written as u64;
            }

            let progress = import_progress(processed, total);
            let step = self.advance(job.id, JobStatus::Importing, &mut |job: &mut ImportJob| {
                job.rows_processed = processed;
                job.advance_progress(progress);
                for message in warnings.iter().cloned() {
                    job.push_message(message);
                }
            })?;
            if let Step::Stopped(job) = step {
                info!("Job {} stopped at {processed} row(s): {}", job.id, job.status);
                return Ok(Some(job));
            }
            debug!("Job {} batch done: {processed} row(s), {progress}%", job.id);

            if exhausted {
                return Ok(None);
            }
            if let Some(timeout) = self.settings.timeout()
                && started.elapsed() > timeout
            {
                return Err(ImportError::Timeout(format!(
                    "Job exceeded its {}s budget after {processed} row(s)",
                    timeout.as_secs()
                )));
            }
        }
    }

    /// Applies `apply` only while the job is still in `expected`.
    fn advance(
        &self,
        id: Uuid,
        expected: JobStatus,
        apply: &mut dyn FnMut(&mut ImportJob),
    ) -> ImportResult<Step> {
        match self
            .store
            .update_if(id, &|job: &ImportJob| job.status == expected, apply)?
        {
            UpdateOutcome::Applied(job) => Ok(Step::Advanced(job)),
            UpdateOutcome::Rejected(job) => Ok(Step::Stopped(job)),
            UpdateOutcome::Missing => Err(ImportError::NotFound(id)),
        }
    }

    fn fail(&self, id: Uuid, err: &ImportError) -> ImportResult<ImportJob> {
        warn!("Job {id} failed: {err}");
        let message = err.to_string();
        match self.store.update_if(
            id,
            &|job: &ImportJob| !job.is_terminal(),
            &mut |job: &mut ImportJob| {
                job.push_message(JobMessage::error(message.clone()));
                job.transition_to(JobStatus::Failed);
            },
        )? {
            UpdateOutcome::Applied(job) | UpdateOutcome::Rejected(job) => Ok(job),
            UpdateOutcome::Missing => Err(ImportError::NotFound(id)),
        }
    }
}

/// Opens the source and binds every declared column to a source field.
/// Runs on the blocking pool: opening a file source reads it.
fn map_columns(
    registry: &SourceRegistry,
    config: &ImportConfig,
) -> ImportResult<(SourceRows, Vec<ColumnMapping>)> {
    let adapter = registry.get(config.source_type)?;
    let rows = adapter
        .open(&config.source_config, &config.options)
        .map_err(ImportError::execution)?;
    let missing: Vec<&str> = config
        .columns
        .iter()
        .filter(|column| !rows.columns.contains(&column.original_name))
        .map(|column| column.original_name.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(ImportError::Execution(format!(
            "Source is missing column(s): {}",
            missing.join(", ")
        )));
    }
    let mappings = config
        .columns
        .iter()
        .map(|column| ColumnMapping {
            source: column.original_name.clone(),
            target: column.name.clone(),
            policy: column.transform,
        })
        .collect();
    Ok((rows, mappings))
}

/// One batch read from the source, already transformed.
struct Batch {
    records: Vec<Record>,
    warnings: Vec<JobMessage>,
    exhausted: bool,
}

/// Pulls up to `size` rows from the source. Recoverable row problems become
/// warnings; a fatal one ends the job.
fn fill_batch(
    id: Uuid,
    rows: &mut RowIter,
    mappings: &[ColumnMapping],
    size: usize,
) -> ImportResult<Batch> {
    let mut batch = Batch {
        records: Vec::with_capacity(size),
        warnings: Vec::new(),
        exhausted: false,
    };
    while batch.records.len() < size {
        match rows.next() {
            None => {
                batch.exhausted = true;
                break;
            }
            Some(Ok(record)) => batch
                .records
                .push(transform::transform_record(&record, mappings)),
            Some(Err(RowError::Recoverable { row, message })) => {
                debug!("Job {id} row {row}: {message}");
                batch.warnings.push(JobMessage::row_warning(row, message));
            }
            Some(Err(RowError::Fatal(err))) => {
                return Err(ImportError::execution(err.context("Reading source rows")));
            }
        }
    }
    Ok(batch)
}

/// Maps rows written onto the 50..100 band, holding below 100 until the
/// job completes. Without a known total the value stays at 50.
pub fn import_progress(processed: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => {
            let share = (processed.min(total) * 50) / total;
            (u64::from(SCANNING_PROGRESS) + share).min(99) as u8
        }
        _ => SCANNING_PROGRESS,
    }
}
