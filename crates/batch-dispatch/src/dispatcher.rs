//! Batch dispatcher: one concurrent task per account
//!
//! Fan-out defaults to one task per account. `with_max_concurrency` bounds
//! how many run at once through a semaphore; queued tasks wait for a permit
//! before authenticating.

use std::sync::Arc;
use std::time::{Duration, Instant};

use capability::{Authenticator, TaskParams, Uploader};
use credential_store::{CredentialRecord, CredentialStore, StoreMedium};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::report::{AccountOutcome, AccountTaskFailure, DispatchReport};

/// Runs authenticate → upload → rotate for every account in a store.
///
/// The authenticator and uploader are shared via `Arc` across account tasks.
pub struct Dispatcher {
    authenticator: Arc<dyn Authenticator>,
    uploader: Arc<dyn Uploader>,
    max_concurrency: Option<usize>,
    task_timeout: Option<Duration>,
}

impl Dispatcher {
    /// Create a dispatcher with no concurrency cap and no task timeout.
    pub fn new(authenticator: Arc<dyn Authenticator>, uploader: Arc<dyn Uploader>) -> Self {
        Self {
            authenticator,
            uploader,
            max_concurrency: None,
            task_timeout: None,
        }
    }

    /// Cap the number of account tasks running at once. Zero means no cap.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = (limit > 0).then_some(limit);
        self
    }

    /// Fail any account task that runs longer than `timeout`.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Dispatch `params` to every account in `store`, then persist it once.
    ///
    /// Account failures are reported in the returned `DispatchReport` and
    /// never abort siblings. Only a failure to persist the store is an
    /// error; the in-memory store still holds the rotated records.
    pub async fn dispatch(
        &self,
        store: &mut CredentialStore,
        medium: &dyn StoreMedium,
        params: &TaskParams,
    ) -> Result<DispatchReport> {
        let started = Instant::now();
        let params = Arc::new(params.clone());
        let limiter = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));

        let records = store.take_records();
        info!(
            accounts = records.len(),
            max_concurrency = ?self.max_concurrency,
            resource = %params.resource,
            "dispatching batch"
        );

        // Each task owns its record; the clone is only used if the task dies.
        let mut tasks = Vec::with_capacity(records.len());
        for record in records {
            let original = record.clone();
            let handle = tokio::spawn(run_account(
                record,
                Arc::clone(&self.authenticator),
                Arc::clone(&self.uploader),
                Arc::clone(&params),
                limiter.clone(),
                self.task_timeout,
            ));
            tasks.push((original, handle));
        }

        let mut report = DispatchReport::default();
        let mut restored = Vec::with_capacity(tasks.len());
        for (original, handle) in tasks {
            match handle.await {
                Ok((record, outcome)) => {
                    report.record(record.identifier(), outcome);
                    restored.push(record);
                }
                Err(e) => {
                    let reason = if e.is_panic() {
                        "account task panicked"
                    } else {
                        "account task cancelled"
                    };
                    error!(account_id = original.identifier(), error = %e, "{reason}");
                    metrics::counter!("dispatch_accounts_total", "outcome" => "failed")
                        .increment(1);
                    report.record(
                        original.identifier(),
                        AccountOutcome::Failed {
                            failure: AccountTaskFailure::Aborted(reason.into()),
                        },
                    );
                    restored.push(original);
                }
            }
        }

        store.restore_records(restored)?;

        metrics::histogram!("dispatch_duration_seconds").record(started.elapsed().as_secs_f64());

        if let Err(source) = store.save(medium).await {
            error!(
                location = %medium.location(),
                error = %source,
                succeeded = report.succeeded_count(),
                "failed to persist credential store after batch"
            );
            metrics::counter!("dispatch_persist_failures_total").increment(1);
            return Err(Error::Persistence { source, report });
        }

        info!(
            accounts = report.len(),
            succeeded = report.succeeded_count(),
            failed = report.failed_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch dispatch complete"
        );
        Ok(report)
    }
}

/// One account's task: authenticate → upload → rotate, strictly in order.
///
/// Always hands the record back so the dispatcher can restore it.
async fn run_account(
    mut record: CredentialRecord,
    authenticator: Arc<dyn Authenticator>,
    uploader: Arc<dyn Uploader>,
    params: Arc<TaskParams>,
    limiter: Option<Arc<Semaphore>>,
    timeout: Option<Duration>,
) -> (CredentialRecord, AccountOutcome) {
    let _permit = match limiter {
        Some(semaphore) => semaphore.acquire_owned().await.ok(),
        None => None,
    };

    let work = async {
        authenticator
            .authenticate(&record)
            .await
            .map_err(|e| AccountTaskFailure::Authentication(e.to_string()))?;
        uploader
            .upload(&record, &params)
            .await
            .map_err(|e| AccountTaskFailure::Upload(e.to_string()))
    };

    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .unwrap_or(Err(AccountTaskFailure::TimedOut(limit.as_millis() as u64))),
        None => work.await,
    };

    let outcome = match result {
        Ok(()) => {
            credential_store::rotate(&mut record);
            info!(account_id = record.identifier(), "account task succeeded");
            AccountOutcome::Succeeded
        }
        Err(failure) => {
            warn!(
                account_id = record.identifier(),
                error = %failure,
                "account task failed"
            );
            AccountOutcome::Failed { failure }
        }
    };

    metrics::counter!("dispatch_accounts_total", "outcome" => outcome.label()).increment(1);
    (record, outcome)
}
