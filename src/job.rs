//! Import job record and lifecycle.
//!
//! A job advances PENDING → VALIDATING → MAPPING → PHI_SCANNING → IMPORTING →
//! COMPLETED, with FAILED and CANCELLED reachable from any non-terminal
//! status. Only the executor moves a job between stages; the store only
//! creates, reads, and cancels.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::ImportConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Validating,
    Mapping,
    PhiScanning,
    Importing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Validating => "VALIDATING",
            JobStatus::Mapping => "MAPPING",
            JobStatus::PhiScanning => "PHI_SCANNING",
            JobStatus::Importing => "IMPORTING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase().replace('-', "_");
        [
            JobStatus::Pending,
            JobStatus::Validating,
            JobStatus::Mapping,
            JobStatus::PhiScanning,
            JobStatus::Importing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ]
        .into_iter()
        .find(|status| status.as_str() == normalized)
        .ok_or_else(|| anyhow::anyhow!("Unknown job status '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub message: String,
    pub severity: Severity,
}

impl JobMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            row: None,
            column: None,
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn row_warning(row: u64, message: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            column: None,
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub owner_id: String,
    pub tenant_id: String,
    pub config: ImportConfig,
    pub status: JobStatus,
    /// Percentage in `0..=100`.
    pub progress: u8,
    pub rows_processed: u64,
    pub rows_total: Option<u64>,
    pub errors: Vec<JobMessage>,
    pub warnings_count: u64,
    pub phi_detections: u64,
    pub result_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn new(
        id: Uuid,
        config: ImportConfig,
        owner_id: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            id,
            owner_id: owner_id.into(),
            tenant_id: tenant_id.into(),
            config,
            status: JobStatus::Pending,
            progress: 0,
            rows_processed: 0,
            rows_total: None,
            errors: Vec::new(),
            warnings_count: 0,
            phi_detections: 0,
            result_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves to `status`, stamping the start time when execution begins
    /// (VALIDATING) and the completion time on reaching a terminal status.
    /// A job cancelled while PENDING never gets a start time.
    pub fn transition_to(&mut self, status: JobStatus) {
        if status == JobStatus::Validating && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.status = status;
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }

    /// Raises progress, never lowering it.
    pub fn advance_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
    }

    pub fn push_message(&mut self, message: JobMessage) {
        if message.severity == Severity::Warning {
            self.warnings_count += 1;
        }
        self.errors.push(message);
    }

    /// Most recent ERROR entry, if the job recorded one.
    pub fn last_error(&self) -> Option<&JobMessage> {
        self.errors
            .iter()
            .rev()
            .find(|message| message.severity == Severity::Error)
    }
}
