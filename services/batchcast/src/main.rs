//! batchcast
//!
//! Single-binary service that:
//! 1. Dispatches one upload concurrently across every account in a credential store
//! 2. Rotates each successful account's secret and persists the store once per batch
//! 3. Schedules batches for later and fires each exactly once when due
//! 4. Fetches clip resources with a bounded-retry worker pool

mod admin;
mod cli;
mod config;
mod error;
mod metrics;
mod runner;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use capability::TaskParams;
use clap::Parser;
use job_scheduler::Scheduler;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::AdminState;
use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::runner::DispatchRunner;

/// How long the admin server may take to drain after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state accessible from the top-level handlers
#[derive(Clone)]
struct AppState {
    scheduler: Scheduler,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with health, metrics and admin routes.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, admin: AdminState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .merge(admin::build_admin_router(admin))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Dispatch {
            video,
            title,
            accounts,
            options,
        } => {
            let params = TaskParams {
                resource: video,
                title,
                options: options.into_iter().collect::<BTreeMap<_, _>>(),
            };
            let accounts = accounts.unwrap_or_else(|| config.accounts.path.clone());
            dispatch_now(&config, &accounts, &params).await
        }
        Commands::Fetch {
            output,
            retries,
            workers,
            resources,
        } => {
            let output = output.unwrap_or_else(|| config.fetch.output_dir.clone());
            fetch(&config, &output, retries, workers, resources).await
        }
    }
}

/// Load the config file. Without `--config` or `CONFIG_PATH`, a missing
/// default file means built-in defaults.
fn load_config(cli_path: Option<&Path>) -> Result<Config> {
    let explicit = cli_path.is_some() || std::env::var_os("CONFIG_PATH").is_some();
    let config_path = Config::resolve_path(cli_path);

    if !explicit && !config_path.exists() {
        info!(path = %config_path.display(), "no config file, using defaults");
        return Config::from_env().context("invalid configuration from environment");
    }

    info!(path = %config_path.display(), "loading configuration");
    Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))
}

/// `batchcast dispatch`: run one batch now and print the report as JSON.
async fn dispatch_now(config: &Config, accounts: &Path, params: &TaskParams) -> Result<()> {
    let dispatcher = runner::build_dispatcher(config)?;
    let report = runner::dispatch_from_file(&dispatcher, accounts, params)
        .await
        .with_context(|| format!("dispatch across {} failed", accounts.display()))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.failed_count() > 0 {
        warn!(
            failed = report.failed_count(),
            succeeded = report.succeeded_count(),
            "some accounts failed"
        );
    }
    Ok(())
}

/// `batchcast fetch`: run the fetch pool and print every result as JSON.
async fn fetch(
    config: &Config,
    output: &Path,
    retries: Option<u32>,
    workers: Option<usize>,
    resources: Vec<String>,
) -> Result<()> {
    let pool = runner::build_fetch_pool(config, retries, workers);
    let results = pool
        .run(resources, output)
        .await
        .context("fetch pool failed")?;

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

/// `batchcast serve`: scheduler plus admin API until SIGINT/SIGTERM.
async fn serve(config: Config) -> Result<()> {
    info!("starting batchcast");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder()?;

    let dispatcher = Arc::new(runner::build_dispatcher(&config)?);
    let scheduler = Scheduler::start(
        config.scheduler.to_scheduler_config(),
        Arc::new(DispatchRunner::new(dispatcher)),
    )
    .await
    .context("failed to start scheduler")?;

    info!(
        listen_addr = %config.server.listen_addr,
        accounts = %config.accounts.path.display(),
        state_path = ?config.scheduler.state_path,
        "configuration loaded"
    );

    let app_state = AppState {
        scheduler: scheduler.clone(),
        prometheus,
        started_at: Instant::now(),
    };
    let admin_state = AdminState::new(scheduler.clone(), config.accounts.path.clone());
    let app = build_router(app_state, admin_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting admin requests");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("admin server drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    // Waits for running batches so their rotations are persisted
    scheduler.shutdown().await;

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: status, uptime and pending job count.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "pending_jobs": state.scheduler.pending_count().await,
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use job_scheduler::{BoxError, JobId, JobPayload, JobRunner, SchedulerConfig};
    use std::future::Future;
    use std::path::PathBuf;
    use std::pin::Pin;
    use tower::ServiceExt;

    struct IdleRunner;

    impl JobRunner for IdleRunner {
        fn run<'a>(
            &'a self,
            _job_id: JobId,
            _payload: &'a JobPayload,
        ) -> Pin<Box<dyn Future<Output = std::result::Result<(), BoxError>> + Send + 'a>>
        {
            Box::pin(async { Ok(()) })
        }
    }

    /// Create a PrometheusHandle for tests without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    async fn test_app(max_connections: usize) -> (Router, Scheduler) {
        let scheduler = Scheduler::start(SchedulerConfig::default(), Arc::new(IdleRunner))
            .await
            .unwrap();
        let state = AppState {
            scheduler: scheduler.clone(),
            prometheus: test_prometheus_handle(),
            started_at: Instant::now(),
        };
        let admin = AdminState::new(scheduler.clone(), PathBuf::from("accounts.json"));
        (build_router(state, admin, max_connections), scheduler)
    }

    #[tokio::test]
    async fn health_reports_pending_jobs() {
        let (app, scheduler) = test_app(16).await;
        scheduler
            .submit(
                chrono::Utc::now() + chrono::TimeDelta::hours(1),
                JobPayload {
                    account_source: PathBuf::from("accounts.json"),
                    params: TaskParams::default(),
                },
            )
            .await
            .unwrap();

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["pending_jobs"], 1);
        assert!(json["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_prometheus_text() {
        let (app, _scheduler) = test_app(16).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn admin_routes_are_mounted() {
        let (app, _scheduler) = test_app(16).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/jobs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (app, _scheduler) = test_app(16).await;

        for uri in ["/admin/nope", "/admin/jobs/extra/segment", "/jobs"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "uri: {uri}");
        }
    }
}
