//! Error taxonomy for preview, job management, and execution.
//!
//! Adapter and writer internals work in `anyhow` and are folded into one of
//! these variants at the service boundary so callers can branch on the kind.

use thiserror::Error;
use uuid::Uuid;

use crate::job::JobStatus;

#[derive(Debug, Error)]
pub enum ImportError {
    /// Bad, missing, or unsupported source configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The job configuration is internally inconsistent.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A source adapter or bulk writer failed while the job was running.
    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Invalid state: job {id} is {status}")]
    InvalidState { id: Uuid, status: JobStatus },

    #[error("Job {0} not found")]
    NotFound(Uuid),

    /// A row or wall-clock budget was exhausted.
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Job store error: {0}")]
    Store(String),
}

impl ImportError {
    pub fn kind(&self) -> &'static str {
        match self {
            ImportError::Configuration(_) => "CONFIGURATION_ERROR",
            ImportError::Validation(_) => "VALIDATION_ERROR",
            ImportError::Execution(_) => "EXECUTION_ERROR",
            ImportError::InvalidState { .. } => "INVALID_STATE",
            ImportError::NotFound(_) => "NOT_FOUND",
            ImportError::Timeout(_) => "TIMEOUT",
            ImportError::Store(_) => "STORE_ERROR",
        }
    }

    /// Wraps an adapter failure raised while sampling or opening a source.
    pub fn configuration(err: anyhow::Error) -> Self {
        match err.downcast::<ImportError>() {
            Ok(inner) => inner,
            Err(err) => ImportError::Configuration(format!("{err:#}")),
        }
    }

    /// Wraps an adapter or writer failure raised while a job is running.
    pub fn execution(err: anyhow::Error) -> Self {
        match err.downcast::<ImportError>() {
            Ok(inner) => inner,
            Err(err) => ImportError::Execution(format!("{err:#}")),
        }
    }
}

pub type ImportResult<T> = std::result::Result<T, ImportError>;
