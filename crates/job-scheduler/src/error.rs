//! Error types for the job scheduler

use crate::job::{JobId, JobStatus};

/// Errors from scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job {id} already finished ({status})")]
    AlreadyFinished { id: JobId, status: JobStatus },

    #[error("failed to persist scheduler state to {path}: {reason}")]
    Persistence { path: String, reason: String },

    #[error("scheduler state at {path} is corrupt: {reason}")]
    CorruptState { path: String, reason: String },

    #[error("I/O error reading scheduler state at {path}: {reason}")]
    Io { path: String, reason: String },
}

/// Result alias for scheduler operations.
pub type Result<T> = std::result::Result<T, Error>;
