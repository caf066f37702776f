//! Public import operations.
//!
//! [`ImportService`] wires the preview path, the job store, and the executor
//! together. Jobs are created PENDING, claimed synchronously when executed or
//! dispatched, and observed through [`ImportService::get_job`].

use std::sync::Arc;

use anyhow::Result;
use log::info;
use serde_json::Value;
use tokio::{runtime::Handle, task::JoinHandle};
use uuid::Uuid;

use crate::{
    error::{ImportError, ImportResult},
    executor::JobExecutor,
    ids::{IdGenerator, UuidGenerator},
    job::ImportJob,
    phi::PhiMatcher,
    preview::{PreviewResult, Previewer},
    schema::{ImportConfig, ImportOptions, SourceType},
    settings::Settings,
    source::SourceRegistry,
    store::{JobFilter, JobStore, MemoryJobStore},
    writer::BulkWriter,
};

pub struct ImportService {
    store: Arc<dyn JobStore>,
    registry: Arc<SourceRegistry>,
    matcher: Arc<PhiMatcher>,
    writer: Arc<dyn BulkWriter>,
    ids: Arc<dyn IdGenerator>,
    settings: Arc<Settings>,
}

impl std::fmt::Debug for ImportService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportService")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ImportService {
    /// Service with an in-memory store, the built-in adapters, random ids,
    /// and default settings.
    pub fn new(writer: Arc<dyn BulkWriter>) -> Result<Self> {
        Ok(Self {
            store: Arc::new(MemoryJobStore::new()),
            registry: Arc::new(SourceRegistry::with_defaults()),
            matcher: Arc::new(PhiMatcher::new()?),
            writer,
            ids: Arc::new(UuidGenerator),
            settings: Arc::new(Settings::default()),
        })
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_registry(mut self, registry: SourceRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Samples a source without creating or touching any job.
    pub fn preview(
        &self,
        source_type: SourceType,
        source_config: &Value,
        options: Option<&ImportOptions>,
    ) -> ImportResult<PreviewResult> {
        let defaults = ImportOptions::default();
        self.previewer()
            .preview(source_type, source_config, options.unwrap_or(&defaults), None)
    }

    pub fn previewer(&self) -> Previewer<'_> {
        Previewer {
            registry: &self.registry,
            matcher: &self.matcher,
            settings: &self.settings,
        }
    }

    /// Stores a PENDING job bound to `config`. Source type, delimiter, and
    /// encoding are checked here so configuration errors surface before a
    /// job exists. With `auto_scrub` set, unresolved sensitive columns take
    /// their category default first.
    pub fn create_job(
        &self,
        mut config: ImportConfig,
        owner_id: &str,
        tenant_id: &str,
    ) -> ImportResult<ImportJob> {
        self.registry.get(config.source_type)?;
        config.options.delimiter_byte()?;
        config.options.resolved_encoding()?;
        if config.options.auto_scrub {
            let scrubbed = config.auto_scrub();
            if !scrubbed.is_empty() {
                info!("Auto-scrubbed column(s): {}", scrubbed.join(", "));
            }
        }
        let job = ImportJob::new(self.ids.job_id(), config, owner_id, tenant_id);
        let job = self.store.create(job)?;
        info!("Created job {} for tenant '{tenant_id}'", job.id);
        Ok(job)
    }

    pub fn get_job(&self, id: Uuid) -> ImportResult<Option<ImportJob>> {
        self.store.get(id)
    }

    pub fn list_jobs(&self, tenant_id: &str, filter: &JobFilter) -> ImportResult<Vec<ImportJob>> {
        self.store.list(tenant_id, filter)
    }

    pub fn cancel_job(&self, id: Uuid) -> ImportResult<bool> {
        let cancelled = self.store.cancel(id)?;
        if cancelled {
            info!("Cancelled job {id}");
        }
        Ok(cancelled)
    }

    /// Runs a PENDING job to a terminal status and returns the final record.
    pub async fn execute_job(&self, id: Uuid) -> ImportResult<ImportJob> {
        let executor = self.executor();
        let job = executor.begin(id)?;
        executor.run(job).await
    }

    /// Claims a PENDING job and runs it on the current tokio runtime,
    /// returning as soon as the job has left PENDING.
    pub fn dispatch_job(&self, id: Uuid) -> ImportResult<JoinHandle<ImportResult<ImportJob>>> {
        let runtime = Handle::try_current()
            .map_err(|err| ImportError::Execution(format!("No async runtime available: {err}")))?;
        let executor = self.executor();
        let job = executor.begin(id)?;
        Ok(runtime.spawn(async move { executor.run(job).await }))
    }

    fn executor(&self) -> JobExecutor {
        JobExecutor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.writer),
            Arc::clone(&self.ids),
            Arc::clone(&self.settings),
        )
    }
}
