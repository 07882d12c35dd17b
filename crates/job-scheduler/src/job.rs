//! Job records and the runner interface

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;

use capability::TaskParams;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque job identifier, a UUID v4 generated at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state. Only `Pending` can change; the other three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Fired,
    Cancelled,
    /// Overdue past the grace period under the `skip` misfire policy
    Missed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Fired => "fired",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Missed => "missed",
        };
        f.write_str(s)
    }
}

/// What a job dispatches: the shared task parameters and the credential
/// store file to dispatch them across.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub account_source: PathBuf,
    pub params: TaskParams,
}

/// Snapshot of one scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub due_at: DateTime<Utc>,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub fired_at: Option<DateTime<Utc>>,
    /// Error from the runner, if the fired job failed
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Boxed error returned by job runners.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Executes a fired job.
///
/// Errors and panics are recorded on the job and never stop the scheduler.
pub trait JobRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        job_id: JobId,
        payload: &'a JobPayload,
    ) -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'a>>;
}
