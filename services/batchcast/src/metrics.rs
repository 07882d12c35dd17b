//! Prometheus metrics exposition
//!
//! The library crates emit:
//!
//! - `dispatch_accounts_total` (counter): label `outcome`
//! - `dispatch_duration_seconds` (histogram)
//! - `dispatch_persist_failures_total` (counter)
//! - `fetch_requests_total` (counter): label `outcome`
//! - `fetch_attempts_total` (counter)
//! - `scheduler_jobs_total` (counter): label `event`

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Batch wall time, 100ms to 30 minutes.
const DISPATCH_DURATION_BUCKETS: &[f64] = &[
    0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0,
];

fn builder() -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("dispatch_duration_seconds".to_string()),
            DISPATCH_DURATION_BUCKETS,
        )
        .context("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `dispatch_duration_seconds` gets explicit buckets so it renders as a
/// histogram (with `_bucket` lines) rather than a summary.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let handle = builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")?;
    describe();
    Ok(handle)
}

/// Register HELP text for every metric the service emits.
fn describe() {
    metrics::describe_counter!(
        "dispatch_accounts_total",
        "Account tasks finished, by outcome"
    );
    metrics::describe_histogram!(
        "dispatch_duration_seconds",
        metrics::Unit::Seconds,
        "Wall time of one batch dispatch"
    );
    metrics::describe_counter!(
        "dispatch_persist_failures_total",
        "Batches whose credential store could not be saved"
    );
    metrics::describe_counter!(
        "fetch_requests_total",
        "Fetch requests finished, by outcome"
    );
    metrics::describe_counter!("fetch_attempts_total", "Individual fetch attempts");
    metrics::describe_counter!("scheduler_jobs_total", "Scheduler job events, by event");
}
