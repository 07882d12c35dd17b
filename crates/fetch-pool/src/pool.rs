//! Worker pool draining a shared fetch queue
//!
//! The queue is a `Mutex<VecDeque>`: a dequeue hands each request to exactly
//! one worker. Retries happen inside the worker, immediately and in order,
//! before it pulls the next request. Each worker collects its own results;
//! they are merged after every worker has been joined.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use capability::{CapabilityError, Fetcher};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::sidecar;

/// Attempts per resource when not configured.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// Concurrent workers when not configured.
pub const DEFAULT_WORKERS: usize = 2;

/// One queued resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub resource: String,
}

/// Outcome for one resource. Also the sidecar record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResult {
    pub resource: String,
    pub succeeded: bool,
    /// Between 1 and the retry budget
    pub attempts_made: u32,
}

/// Fixed-size pool fetching resources with a per-resource retry budget.
pub struct FetchPool {
    fetcher: Arc<dyn Fetcher>,
    retry_budget: u32,
    workers: usize,
    attempt_timeout: Option<Duration>,
}

impl FetchPool {
    /// Pool with the default budget (3) and worker count (2).
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            retry_budget: DEFAULT_RETRY_BUDGET,
            workers: DEFAULT_WORKERS,
            attempt_timeout: None,
        }
    }

    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Count an attempt as failed if it runs longer than `timeout`.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Fetch every resource into `output_dir`.
    ///
    /// Returns one result per distinct resource, in no particular order,
    /// once every worker has drained the queue. Duplicate resources are
    /// fetched once. Fails only on invalid configuration or when the output
    /// directory cannot be created.
    pub async fn run<I, S>(&self, resources: I, output_dir: &Path) -> Result<Vec<FetchResult>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.retry_budget == 0 {
            return Err(Error::InvalidConfig(
                "retry budget must be greater than 0".into(),
            ));
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig(
                "worker count must be greater than 0".into(),
            ));
        }

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| Error::OutputDir {
                path: output_dir.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut seen = HashSet::new();
        let queue: VecDeque<FetchRequest> = resources
            .into_iter()
            .map(Into::into)
            .filter(|resource: &String| seen.insert(resource.clone()))
            .map(|resource| FetchRequest { resource })
            .collect();
        let total = queue.len();
        let worker_count = self.workers.min(total).max(1);

        info!(
            resources = total,
            workers = worker_count,
            retry_budget = self.retry_budget,
            output_dir = %output_dir.display(),
            "starting fetch pool"
        );

        let queue = Arc::new(Mutex::new(queue));
        let output_dir = Arc::new(output_dir.to_path_buf());

        let handles: Vec<_> = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(worker(
                    worker_id,
                    Arc::clone(&queue),
                    Arc::clone(&self.fetcher),
                    Arc::clone(&output_dir),
                    self.retry_budget,
                    self.attempt_timeout,
                ))
            })
            .collect();

        let mut results = Vec::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok(mut worker_results) => results.append(&mut worker_results),
                Err(e) => error!(error = %e, "fetch worker terminated abnormally"),
            }
        }

        let succeeded = results.iter().filter(|r| r.succeeded).count();
        info!(
            resources = results.len(),
            succeeded,
            failed = results.len() - succeeded,
            "fetch pool drained"
        );
        Ok(results)
    }
}

/// Pull requests until the queue is empty.
async fn worker(
    worker_id: usize,
    queue: Arc<Mutex<VecDeque<FetchRequest>>>,
    fetcher: Arc<dyn Fetcher>,
    output_dir: Arc<PathBuf>,
    retry_budget: u32,
    attempt_timeout: Option<Duration>,
) -> Vec<FetchResult> {
    let mut results = Vec::new();

    loop {
        let Some(request) = queue.lock().await.pop_front() else {
            break;
        };

        let result = fetch_with_retries(
            &fetcher,
            request.resource,
            &output_dir,
            retry_budget,
            attempt_timeout,
        )
        .await;

        if let Err(e) = sidecar::write(&output_dir, &result).await {
            warn!(resource = %result.resource, error = %e, "failed to write fetch sidecar");
        }

        let outcome = if result.succeeded { "succeeded" } else { "failed" };
        metrics::counter!("fetch_requests_total", "outcome" => outcome).increment(1);
        results.push(result);
    }

    debug!(worker_id, fetched = results.len(), "fetch worker drained queue");
    results
}

/// Run the attempts for one resource in their own task so a panicking
/// fetcher costs only this resource, not the worker.
async fn fetch_with_retries(
    fetcher: &Arc<dyn Fetcher>,
    resource: String,
    output_dir: &Arc<PathBuf>,
    retry_budget: u32,
    attempt_timeout: Option<Duration>,
) -> FetchResult {
    let attempts = Arc::new(AtomicU32::new(0));
    let task = tokio::spawn(attempt_loop(
        Arc::clone(fetcher),
        resource.clone(),
        Arc::clone(output_dir),
        retry_budget,
        attempt_timeout,
        Arc::clone(&attempts),
    ));

    let succeeded = match task.await {
        Ok(succeeded) => succeeded,
        Err(e) => {
            error!(resource = %resource, error = %e, "fetch task terminated abnormally");
            false
        }
    };
    let attempts_made = attempts.load(Ordering::SeqCst).clamp(1, retry_budget);

    if !succeeded {
        warn!(
            resource = %resource,
            attempts = attempts_made,
            "fetch exhausted retry budget"
        );
    }

    FetchResult {
        resource,
        succeeded,
        attempts_made,
    }
}

async fn attempt_loop(
    fetcher: Arc<dyn Fetcher>,
    resource: String,
    output_dir: Arc<PathBuf>,
    retry_budget: u32,
    attempt_timeout: Option<Duration>,
    attempts: Arc<AtomicU32>,
) -> bool {
    for attempt in 1..=retry_budget {
        attempts.store(attempt, Ordering::SeqCst);
        metrics::counter!("fetch_attempts_total").increment(1);

        let fetch = fetcher.fetch(&resource, &output_dir);
        let outcome = match attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, fetch).await.unwrap_or_else(|_| {
                Err(CapabilityError::TimedOut {
                    program: fetcher.id().to_string(),
                    secs: limit.as_secs(),
                })
            }),
            None => fetch.await,
        };

        match outcome {
            Ok(()) => {
                debug!(resource = %resource, attempt, "fetch succeeded");
                return true;
            }
            Err(e) => {
                warn!(
                    resource = %resource,
                    attempt,
                    retry_budget,
                    error = %e,
                    "fetch attempt failed"
                );
            }
        }
    }
    false
}
