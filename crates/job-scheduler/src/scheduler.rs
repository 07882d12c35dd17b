//! Scheduler instance and its firing loop
//!
//! One background task owns firing. It sleeps until the earliest pending due
//! time (never longer than `MAX_SLEEP`, so wall-clock jumps are picked up)
//! and is woken early by submit/cancel. Due jobs are marked `Fired` under the
//! table lock and, when a state file is configured, that transition is saved
//! before their runner starts, which makes firing at-most-once across
//! restarts. If the save fails the jobs stay `Pending` and are retried after
//! `PERSIST_RETRY`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::job::{Job, JobId, JobPayload, JobRunner, JobStatus};
use crate::state;

/// Longest the loop sleeps between checks.
const MAX_SLEEP: Duration = Duration::from_secs(30);

/// Delay before retrying due jobs whose `Fired` transition could not be saved.
const PERSIST_RETRY: Duration = Duration::from_secs(2);

/// Default lateness tolerated before a job counts as misfired.
pub const DEFAULT_MISFIRE_GRACE: Duration = Duration::from_secs(60);

/// Default number of terminal jobs kept for enumeration.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// What to do with a pending job found more than the grace period late,
/// typically after a restart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisfirePolicy {
    #[default]
    FireImmediately,
    /// Mark the job `Missed` without running it
    Skip,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub misfire_policy: MisfirePolicy,
    pub misfire_grace: Duration,
    /// JSON file the job table is written to after every change
    pub state_path: Option<PathBuf>,
    pub history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            misfire_policy: MisfirePolicy::default(),
            misfire_grace: DEFAULT_MISFIRE_GRACE,
            state_path: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Handle to a running scheduler. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    jobs: Mutex<HashMap<JobId, Job>>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Load persisted state (if configured) and spawn the firing loop.
    ///
    /// Pending jobs loaded from disk that are already overdue are resolved
    /// by the misfire policy on the loop's first pass.
    pub async fn start(config: SchedulerConfig, runner: Arc<dyn JobRunner>) -> Result<Self> {
        let loaded = match &config.state_path {
            Some(path) => state::load(path).await?,
            None => Vec::new(),
        };
        let pending = loaded.iter().filter(|j| !j.status.is_terminal()).count();

        let inner = Arc::new(Inner::new(config, loaded));
        let shutdown_rx = inner.shutdown.subscribe();
        let handle = tokio::spawn(run_loop(Arc::clone(&inner), runner, shutdown_rx));
        *inner.task.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);

        info!(
            pending,
            misfire_policy = ?inner.config.misfire_policy,
            misfire_grace_secs = inner.config.misfire_grace.as_secs(),
            "scheduler started"
        );
        Ok(Self { inner })
    }

    /// Register a job due at `due_at` and return its id. Nothing runs yet.
    ///
    /// When a state file is configured and cannot be written, the job is
    /// not registered.
    pub async fn submit(&self, due_at: DateTime<Utc>, payload: JobPayload) -> Result<JobId> {
        let job = Job {
            id: JobId::new(),
            due_at,
            payload,
            status: JobStatus::Pending,
            submitted_at: Utc::now(),
            fired_at: None,
            last_error: None,
        };
        let id = job.id;

        let mut jobs = self.inner.jobs.lock().await;
        jobs.insert(id, job);
        if let Err(e) = self.inner.persist(&jobs).await {
            jobs.remove(&id);
            return Err(e);
        }
        drop(jobs);

        metrics::counter!("scheduler_jobs_total", "event" => "submitted").increment(1);
        info!(job_id = %id, due_at = %due_at, "job submitted");
        self.inner.wake.notify_one();
        Ok(id)
    }

    /// Ids of every known job, pending and retained history. Unordered.
    pub async fn list(&self) -> Vec<JobId> {
        self.inner.jobs.lock().await.keys().copied().collect()
    }

    /// Snapshots of every known job, sorted by due time.
    pub async fn jobs(&self) -> Vec<Job> {
        let jobs = self.inner.jobs.lock().await;
        sorted(&jobs).into_iter().cloned().collect()
    }

    pub async fn get(&self, id: JobId) -> Option<Job> {
        self.inner.jobs.lock().await.get(&id).cloned()
    }

    pub async fn pending_count(&self) -> usize {
        self.inner
            .jobs
            .lock()
            .await
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .count()
    }

    /// Cancel a pending job.
    ///
    /// Fails with `NotFound` for unknown ids and `AlreadyFinished` once the
    /// job has fired, been cancelled or been missed.
    pub async fn cancel(&self, id: JobId) -> Result<()> {
        let mut jobs = self.inner.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(Error::NotFound(id))?;
        if job.status.is_terminal() {
            return Err(Error::AlreadyFinished {
                id,
                status: job.status,
            });
        }
        job.status = JobStatus::Cancelled;

        self.inner.prune(&mut jobs);
        if let Err(e) = self.inner.persist(&jobs).await {
            warn!(job_id = %id, error = %e, "failed to persist cancellation");
        }
        drop(jobs);

        metrics::counter!("scheduler_jobs_total", "event" => "cancelled").increment(1);
        info!(job_id = %id, "job cancelled");
        self.inner.wake.notify_one();
        Ok(())
    }

    /// Stop the firing loop and wait for in-flight runners to finish.
    ///
    /// Pending jobs stay pending (and persisted, if configured).
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
        let handle = self
            .inner
            .task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(error = %e, "scheduler loop terminated abnormally");
        }
        info!("scheduler stopped");
    }
}

impl Inner {
    fn new(config: SchedulerConfig, jobs: Vec<Job>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            jobs: Mutex::new(jobs.into_iter().map(|job| (job.id, job)).collect()),
            wake: Notify::new(),
            shutdown,
            task: std::sync::Mutex::new(None),
        }
    }

    async fn persist(&self, jobs: &HashMap<JobId, Job>) -> Result<()> {
        match &self.config.state_path {
            Some(path) => state::save(path, &sorted(jobs)).await,
            None => Ok(()),
        }
    }

    /// Drop the oldest terminal jobs beyond `history_limit`.
    fn prune(&self, jobs: &mut HashMap<JobId, Job>) {
        let mut terminal: Vec<(DateTime<Utc>, JobId)> = jobs
            .values()
            .filter(|job| job.status.is_terminal())
            .map(|job| (job.due_at, job.id))
            .collect();
        if terminal.len() <= self.config.history_limit {
            return;
        }
        terminal.sort();
        let excess = terminal.len() - self.config.history_limit;
        for (_, id) in terminal.into_iter().take(excess) {
            jobs.remove(&id);
        }
        debug!(pruned = excess, "pruned job history");
    }

    /// Transition every pending job due at `now` and return the ones to
    /// run, plus when the loop should look again.
    ///
    /// Nothing is returned to run unless the transitions were saved.
    async fn collect_due(
        &self,
        now: DateTime<Utc>,
    ) -> (Vec<(JobId, JobPayload)>, Option<DateTime<Utc>>) {
        let mut jobs = self.jobs.lock().await;
        let due = jobs
            .values()
            .any(|job| job.status == JobStatus::Pending && job.due_at <= now);
        if !due {
            let next_due = next_pending(&jobs);
            return (Vec::new(), next_due);
        }

        let before = jobs.clone();
        let mut to_fire = Vec::new();
        let (mut misfired, mut missed) = (0u64, 0u64);

        for job in jobs.values_mut() {
            if job.status != JobStatus::Pending || job.due_at > now {
                continue;
            }

            let lateness = (now - job.due_at).to_std().unwrap_or_default();
            if lateness > self.config.misfire_grace {
                misfired += 1;
                warn!(
                    job_id = %job.id,
                    due_at = %job.due_at,
                    late_secs = lateness.as_secs(),
                    policy = ?self.config.misfire_policy,
                    "job misfired"
                );
                if self.config.misfire_policy == MisfirePolicy::Skip {
                    job.status = JobStatus::Missed;
                    missed += 1;
                    continue;
                }
            }

            job.status = JobStatus::Fired;
            job.fired_at = Some(now);
            to_fire.push((job.id, job.payload.clone()));
        }

        self.prune(&mut jobs);
        if let Err(e) = self.persist(&jobs).await {
            error!(
                error = %e,
                due = to_fire.len(),
                retry_secs = PERSIST_RETRY.as_secs(),
                "failed to persist fired jobs, holding them pending"
            );
            *jobs = before;
            let retry_at = now
                + chrono::Duration::from_std(PERSIST_RETRY).unwrap_or(chrono::Duration::zero());
            return (Vec::new(), Some(retry_at));
        }

        metrics::counter!("scheduler_jobs_total", "event" => "misfired").increment(misfired);
        metrics::counter!("scheduler_jobs_total", "event" => "missed").increment(missed);
        metrics::counter!("scheduler_jobs_total", "event" => "fired").increment(to_fire.len() as u64);

        (to_fire, next_pending(&jobs))
    }

    async fn record_outcome(&self, id: JobId, outcome: std::result::Result<(), String>) {
        let mut jobs = self.jobs.lock().await;
        match outcome {
            Ok(()) => {
                info!(job_id = %id, "job completed");
                return;
            }
            Err(reason) => {
                metrics::counter!("scheduler_jobs_total", "event" => "failed").increment(1);
                error!(job_id = %id, error = %reason, "job runner failed");
                match jobs.get_mut(&id) {
                    Some(job) => job.last_error = Some(reason),
                    None => {
                        debug!(job_id = %id, "job pruned before its runner finished");
                        return;
                    }
                }
            }
        }
        if let Err(e) = self.persist(&jobs).await {
            warn!(job_id = %id, error = %e, "failed to persist job error");
        }
    }
}

fn next_pending(jobs: &HashMap<JobId, Job>) -> Option<DateTime<Utc>> {
    jobs.values()
        .filter(|job| job.status == JobStatus::Pending)
        .map(|job| job.due_at)
        .min()
}

fn sorted(jobs: &HashMap<JobId, Job>) -> Vec<&Job> {
    let mut list: Vec<&Job> = jobs.values().collect();
    list.sort_by_key(|job| (job.due_at, job.submitted_at, job.id));
    list
}

async fn run_loop(
    inner: Arc<Inner>,
    runner: Arc<dyn JobRunner>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut in_flight = JoinSet::new();

    loop {
        let (due, next_due) = inner.collect_due(Utc::now()).await;
        for (id, payload) in due {
            in_flight.spawn(fire(Arc::clone(&inner), Arc::clone(&runner), id, payload));
        }

        let sleep_for = match next_due {
            Some(at) => (at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(MAX_SLEEP),
            None => MAX_SLEEP,
        };

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = inner.wake.notified() => {}
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "job task terminated abnormally");
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    if !in_flight.is_empty() {
        info!(
            in_flight = in_flight.len(),
            "waiting for running jobs before shutdown"
        );
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "job task terminated abnormally");
        }
    }
}

/// Run one fired job. The runner gets its own task so a panic is caught
/// here and recorded like any other failure.
async fn fire(inner: Arc<Inner>, runner: Arc<dyn JobRunner>, id: JobId, payload: JobPayload) {
    info!(
        job_id = %id,
        account_source = %payload.account_source.display(),
        "firing job"
    );
    let task = tokio::spawn(async move {
        runner
            .run(id, &payload)
            .await
            .map_err(|e| e.to_string())
    });
    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(e) => Err(format!("runner panicked: {e}")),
    };
    inner.record_outcome(id, outcome).await;
}
