//! Wiring between config, capabilities and the engines
//!
//! `DispatchRunner` is what the scheduler calls when a job fires: it loads a
//! fresh credential store from the job's account source and dispatches to it.
//! The CLI `dispatch` command goes through the same `dispatch_from_file`.
//!
//! Runs against one account file never overlap: `dispatch_from_file` holds
//! the store's file lock from load through save, and `DispatchRunner` queues
//! its own jobs per file before they reach that lock.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use batch_dispatch::{DispatchReport, Dispatcher};
use capability::{
    Authenticator, CommandAuthenticator, CommandFetcher, CommandUploader, NoopAuthenticator,
    TaskParams,
};
use credential_store::{CredentialStore, JsonFileMedium, StoreLock};
use fetch_pool::FetchPool;
use job_scheduler::{BoxError, JobId, JobPayload, JobRunner};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::DispatchRunError;

/// Build the dispatcher from `[login]`, `[upload]` and `[dispatch]`.
pub fn build_dispatcher(config: &Config) -> common::Result<Dispatcher> {
    let upload = config.upload.clone().ok_or_else(|| {
        common::Error::Config("[upload] section is required to dispatch".into())
    })?;

    let authenticator: Arc<dyn Authenticator> = match &config.login {
        Some(login) => Arc::new(CommandAuthenticator::new(login.clone())),
        None => Arc::new(NoopAuthenticator),
    };

    let mut dispatcher = Dispatcher::new(authenticator, Arc::new(CommandUploader::new(upload)));
    if let Some(limit) = config.dispatch.max_concurrency {
        dispatcher = dispatcher.with_max_concurrency(limit);
    }
    if let Some(secs) = config.dispatch.task_timeout_secs {
        dispatcher = dispatcher.with_task_timeout(Duration::from_secs(secs));
    }
    Ok(dispatcher)
}

/// Build the fetch pool from `[fetch]`, with optional CLI overrides.
pub fn build_fetch_pool(config: &Config, retries: Option<u32>, workers: Option<usize>) -> FetchPool {
    let mut pool = FetchPool::new(Arc::new(CommandFetcher::new(config.fetch.command.clone())))
        .with_retry_budget(retries.unwrap_or(config.fetch.retries))
        .with_workers(workers.unwrap_or(config.fetch.workers));
    if let Some(secs) = config.fetch.attempt_timeout_secs {
        pool = pool.with_attempt_timeout(Duration::from_secs(secs));
    }
    pool
}

/// Load the store at `accounts`, dispatch `params` across it and persist.
///
/// The store's lock is held for the whole cycle.
pub async fn dispatch_from_file(
    dispatcher: &Dispatcher,
    accounts: &Path,
    params: &TaskParams,
) -> Result<DispatchReport, DispatchRunError> {
    let _lock = StoreLock::acquire(accounts).await?;
    let medium = JsonFileMedium::new(accounts);
    let mut store = CredentialStore::load(&medium).await?;
    if store.is_empty() {
        warn!(accounts = %accounts.display(), "credential store has no accounts");
    }
    let report = dispatcher.dispatch(&mut store, &medium, params).await?;
    Ok(report)
}

/// Scheduler job runner backed by a `Dispatcher`.
pub struct DispatchRunner {
    dispatcher: Arc<Dispatcher>,
    gates: std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl DispatchRunner {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            gates: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Per-file gate, keyed by canonical path so `./a.json` and `a.json` match.
    async fn gate_for(&self, accounts: &Path) -> Arc<Mutex<()>> {
        let key = canonical_key(accounts).await;
        let mut gates = self.gates.lock().unwrap_or_else(|p| p.into_inner());
        gates.entry(key).or_default().clone()
    }
}

/// Canonicalize the directory; the store file itself may not exist yet.
async fn canonical_key(accounts: &Path) -> PathBuf {
    if let Ok(path) = tokio::fs::canonicalize(accounts).await {
        return path;
    }
    let dir = match accounts.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    match (tokio::fs::canonicalize(dir).await, accounts.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => accounts.to_path_buf(),
    }
}

impl JobRunner for DispatchRunner {
    fn run<'a>(
        &'a self,
        job_id: JobId,
        payload: &'a JobPayload,
    ) -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'a>> {
        Box::pin(async move {
            let gate = self.gate_for(&payload.account_source).await;
            let _turn = gate.lock().await;
            debug!(job_id = %job_id, accounts = %payload.account_source.display(), "account source gate held");

            let report =
                dispatch_from_file(&self.dispatcher, &payload.account_source, &payload.params)
                    .await?;
            for (account_id, failure) in report.failures() {
                warn!(job_id = %job_id, account_id, error = %failure, "account failed in scheduled batch");
            }
            info!(
                job_id = %job_id,
                succeeded = report.succeeded_count(),
                failed = report.failed_count(),
                "scheduled batch finished"
            );
            Ok::<(), BoxError>(())
        })
    }
}
