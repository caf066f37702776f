//! Job store abstraction.
//!
//! Every mutation goes through [`JobStore::update_if`], which evaluates a
//! guard and applies a change under one lock (or one transaction in a shared
//! store). The executor guards each write on the stage it expects, so a
//! cancel that lands between two batches is observed on the next write
//! instead of being overwritten.

use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use log::debug;
use uuid::Uuid;

use crate::{
    error::{ImportError, ImportResult},
    job::{ImportJob, JobStatus},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub owner_id: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

impl JobFilter {
    fn matches(&self, job: &ImportJob) -> bool {
        self.owner_id
            .as_deref()
            .is_none_or(|owner| job.owner_id == owner)
            && self.status.is_none_or(|status| job.status == status)
    }
}

/// Result of a conditional update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The guard held; carries the record after the change.
    Applied(ImportJob),
    /// The guard failed; carries the unchanged record.
    Rejected(ImportJob),
    Missing,
}

pub trait JobStore: Send + Sync {
    /// Stores a new job. Fails if the id is already taken.
    fn create(&self, job: ImportJob) -> ImportResult<ImportJob>;

    fn get(&self, id: Uuid) -> ImportResult<Option<ImportJob>>;

    /// Jobs of one tenant, newest first.
    fn list(&self, tenant_id: &str, filter: &JobFilter) -> ImportResult<Vec<ImportJob>>;

    /// Atomically applies `apply` if `guard` holds for the current record.
    fn update_if(
        &self,
        id: Uuid,
        guard: &dyn Fn(&ImportJob) -> bool,
        apply: &mut dyn FnMut(&mut ImportJob),
    ) -> ImportResult<UpdateOutcome>;

    /// Moves a non-terminal job to CANCELLED. Returns false when the job is
    /// absent or already terminal.
    fn cancel(&self, id: Uuid) -> ImportResult<bool> {
        let outcome = self.update_if(
            id,
            &|job: &ImportJob| !job.is_terminal(),
            &mut |job: &mut ImportJob| job.transition_to(JobStatus::Cancelled),
        )?;
        Ok(matches!(outcome, UpdateOutcome::Applied(_)))
    }
}

/// Process-local store backed by a lock-protected map.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, ImportJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, ImportJob>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, ImportJob>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, job: ImportJob) -> ImportResult<ImportJob> {
        let mut jobs = self.write();
        if jobs.contains_key(&job.id) {
            return Err(ImportError::Store(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    fn get(&self, id: Uuid) -> ImportResult<Option<ImportJob>> {
        Ok(self.read().get(&id).cloned())
    }

    fn list(&self, tenant_id: &str, filter: &JobFilter) -> ImportResult<Vec<ImportJob>> {
        let mut jobs: Vec<ImportJob> = self
            .read()
            .values()
            .filter(|job| job.tenant_id == tenant_id && filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    fn update_if(
        &self,
        id: Uuid,
        guard: &dyn Fn(&ImportJob) -> bool,
        apply: &mut dyn FnMut(&mut ImportJob),
    ) -> ImportResult<UpdateOutcome> {
        let mut jobs = self.write();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(UpdateOutcome::Missing);
        };
        if !guard(&*job) {
            debug!("Rejected update for job {id} in status {}", job.status);
            return Ok(UpdateOutcome::Rejected(job.clone()));
        }
        apply(job);
        Ok(UpdateOutcome::Applied(job.clone()))
    }
}
