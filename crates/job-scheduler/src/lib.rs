//! Deferred batch jobs
//!
//! A `Scheduler` holds jobs keyed by due time and fires each one exactly
//! once through an injected `JobRunner`. Jobs can be listed and cancelled
//! until they fire. The job table optionally persists to a JSON state file
//! so pending jobs survive restarts.

mod error;
mod job;
mod scheduler;
mod state;

pub use error::{Error, Result};
pub use job::{BoxError, Job, JobId, JobPayload, JobRunner, JobStatus};
pub use scheduler::{
    DEFAULT_HISTORY_LIMIT, DEFAULT_MISFIRE_GRACE, MisfirePolicy, Scheduler, SchedulerConfig,
};
