//! Admin API for deferred jobs and accounts
//!
//! Endpoints:
//! - GET    /admin/jobs       list job snapshots sorted by due time
//! - POST   /admin/jobs       schedule a batch dispatch
//! - DELETE /admin/jobs/{id}  cancel a pending job
//! - GET    /admin/accounts   account identifiers and rotation times

use std::collections::BTreeMap;
use std::path::PathBuf;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use capability::TaskParams;
use chrono::{DateTime, TimeDelta, Utc};
use credential_store::{CredentialStore, JsonFileMedium};
use job_scheduler::{JobId, JobPayload, Scheduler};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ApiError;

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    scheduler: Scheduler,
    /// Credential store used when a submitted job names none
    default_accounts: PathBuf,
}

impl AdminState {
    pub fn new(scheduler: Scheduler, default_accounts: PathBuf) -> Self {
        Self {
            scheduler,
            default_accounts,
        }
    }
}

/// Build the admin axum router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/jobs", get(list_jobs).post(submit_job))
        .route("/admin/jobs/{id}", delete(cancel_job))
        .route("/admin/accounts", get(list_accounts))
        .with_state(state)
}

fn json_ok(status: StatusCode, body: serde_json::Value) -> impl IntoResponse {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /admin/jobs
async fn list_jobs(State(state): State<AdminState>) -> impl IntoResponse {
    let jobs = state.scheduler.jobs().await;
    json_ok(StatusCode::OK, serde_json::json!({ "jobs": jobs }))
}

/// Request body for POST /admin/jobs. Exactly one of `due_at` and
/// `delay_secs` must be given.
#[derive(Debug, Deserialize)]
struct SubmitJobRequest {
    #[serde(default)]
    due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    delay_secs: Option<u64>,
    #[serde(default)]
    accounts: Option<PathBuf>,
    resource: String,
    title: String,
    #[serde(default)]
    options: BTreeMap<String, String>,
}

impl SubmitJobRequest {
    fn due_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ApiError> {
        match (self.due_at, self.delay_secs) {
            (Some(at), None) => Ok(at),
            (None, Some(secs)) => i64::try_from(secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .and_then(|delay| now.checked_add_signed(delay))
                .ok_or_else(|| ApiError::BadRequest(format!("delay_secs out of range: {secs}"))),
            (None, None) => Err(ApiError::BadRequest(
                "one of due_at or delay_secs is required".into(),
            )),
            (Some(_), Some(_)) => Err(ApiError::BadRequest(
                "due_at and delay_secs are mutually exclusive".into(),
            )),
        }
    }
}

/// POST /admin/jobs, returns 201 with the new job id.
async fn submit_job(
    State(state): State<AdminState>,
    body: Result<axum::Json<SubmitJobRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let axum::Json(body) = body?;
    if body.resource.trim().is_empty() {
        return Err(ApiError::BadRequest("resource must not be empty".into()));
    }
    if body.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".into()));
    }
    let due_at = body.due_at(Utc::now())?;

    let payload = JobPayload {
        account_source: body
            .accounts
            .unwrap_or_else(|| state.default_accounts.clone()),
        params: TaskParams {
            resource: body.resource,
            title: body.title,
            options: body.options,
        },
    };
    let job_id = state.scheduler.submit(due_at, payload).await?;

    Ok(json_ok(
        StatusCode::CREATED,
        serde_json::json!({ "job_id": job_id, "due_at": due_at }),
    ))
}

/// DELETE /admin/jobs/{id}
async fn cancel_job(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id: JobId = id
        .parse()
        .map_err(|_| ApiError::NotFound(format!("job not found: {id}")))?;
    state.scheduler.cancel(job_id).await?;

    info!(job_id = %job_id, "job cancelled via admin API");
    Ok(json_ok(
        StatusCode::OK,
        serde_json::json!({ "job_id": job_id, "status": "cancelled" }),
    ))
}

/// GET /admin/accounts
///
/// Never exposes secrets.
async fn list_accounts(State(state): State<AdminState>) -> Result<impl IntoResponse, ApiError> {
    let store = CredentialStore::load(&JsonFileMedium::new(&state.default_accounts))
        .await
        .map_err(|e| {
            warn!(error = %e, "failed to load credential store for admin listing");
            ApiError::Internal(e.to_string())
        })?;

    let accounts: Vec<serde_json::Value> = store
        .records()
        .iter()
        .map(|record| {
            serde_json::json!({
                "identifier": record.identifier(),
                "last_rotated_at": record.last_rotated_at(),
            })
        })
        .collect();

    Ok(json_ok(
        StatusCode::OK,
        serde_json::json!({ "accounts": accounts }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use credential_store::{CredentialRecord, StoreMedium};
    use job_scheduler::{BoxError, JobRunner, JobStatus, SchedulerConfig};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct IdleRunner;

    impl JobRunner for IdleRunner {
        fn run<'a>(
            &'a self,
            _job_id: JobId,
            _payload: &'a JobPayload,
        ) -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }
    }

    async fn test_state(dir: &std::path::Path) -> AdminState {
        let scheduler = Scheduler::start(SchedulerConfig::default(), Arc::new(IdleRunner))
            .await
            .unwrap();
        AdminState::new(scheduler, dir.join("accounts.json"))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn post_job(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/admin/jobs")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn delete_job(id: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(format!("/admin/jobs/{id}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn submit_with_delay_creates_pending_job() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let app = build_admin_router(state.clone());

        let (status, json) = send(
            app,
            post_job(serde_json::json!({
                "delay_secs": 3600,
                "resource": "clip.mp4",
                "title": "evening post",
                "options": {"visibility": "private"}
            })),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        let job_id: JobId = json["job_id"].as_str().unwrap().parse().unwrap();
        let job = state.scheduler.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.payload.account_source, dir.path().join("accounts.json"));
        assert_eq!(job.payload.params.options["visibility"], "private");
        assert!(job.due_at > Utc::now() + TimeDelta::minutes(59));
    }

    #[tokio::test]
    async fn submit_with_explicit_due_at_and_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let app = build_admin_router(state.clone());

        let (status, json) = send(
            app,
            post_job(serde_json::json!({
                "due_at": "2099-01-01T08:00:00Z",
                "accounts": "/srv/other-accounts.json",
                "resource": "clip.mp4",
                "title": "new year"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["due_at"], "2099-01-01T08:00:00Z");
        let job_id: JobId = json["job_id"].as_str().unwrap().parse().unwrap();
        let job = state.scheduler.get(job_id).await.unwrap();
        assert_eq!(
            job.payload.account_source,
            PathBuf::from("/srv/other-accounts.json")
        );
    }

    #[tokio::test]
    async fn submit_rejects_bad_timing_and_empty_fields() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;

        let cases = [
            serde_json::json!({"resource": "clip.mp4", "title": "t"}),
            serde_json::json!({
                "due_at": "2099-01-01T08:00:00Z",
                "delay_secs": 10,
                "resource": "clip.mp4",
                "title": "t"
            }),
            serde_json::json!({"delay_secs": 10, "resource": " ", "title": "t"}),
            serde_json::json!({"delay_secs": 10, "resource": "clip.mp4", "title": ""}),
            serde_json::json!({"delay_secs": u64::MAX, "resource": "clip.mp4", "title": "t"}),
        ];
        for body in cases {
            let (status, json) = send(build_admin_router(state.clone()), post_job(body.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
            assert!(json["error"].is_string(), "body: {body}");
        }
        assert!(state.scheduler.list().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_or_incomplete_bodies_are_json_400s() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;

        let raw = |content_type: &str, body: &str| {
            Request::builder()
                .method("POST")
                .uri("/admin/jobs")
                .header("content-type", content_type)
                .body(Body::from(body.to_string()))
                .unwrap()
        };
        let requests = [
            raw("application/json", "{not json"),
            raw("application/json", r#"{"delay_secs": 10, "title": "t"}"#),
            raw("application/json", r#"{"delay_secs": "soon", "resource": "clip.mp4", "title": "t"}"#),
            raw("text/plain", r#"{"delay_secs": 10, "resource": "clip.mp4", "title": "t"}"#),
        ];
        for request in requests {
            let (status, json) = send(build_admin_router(state.clone()), request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            let message = json["error"].as_str().unwrap();
            assert!(message.starts_with("invalid request body"), "got: {message}");
        }
        assert!(state.scheduler.list().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_pending_then_finished_then_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;

        let (_, json) = send(
            build_admin_router(state.clone()),
            post_job(serde_json::json!({
                "delay_secs": 3600,
                "resource": "clip.mp4",
                "title": "t"
            })),
        )
        .await;
        let id = json["job_id"].as_str().unwrap().to_string();

        let (status, json) = send(build_admin_router(state.clone()), delete_job(&id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "cancelled");

        let (status, _) = send(build_admin_router(state.clone()), delete_job(&id)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            build_admin_router(state.clone()),
            delete_job("6f1c2a4e-8d1b-4f7e-9a51-3c2d6e9b0a11"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(build_admin_router(state), delete_job("not-a-job")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_jobs_returns_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        for delay in [7200, 3600] {
            send(
                build_admin_router(state.clone()),
                post_job(serde_json::json!({
                    "delay_secs": delay,
                    "resource": "clip.mp4",
                    "title": format!("in {delay}s")
                })),
            )
            .await;
        }

        let (status, json) = send(
            build_admin_router(state),
            Request::builder()
                .uri("/admin/jobs")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let jobs = json["jobs"].as_array().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0]["payload"]["params"]["title"], "in 3600s");
        assert_eq!(jobs[0]["status"], "pending");
    }

    #[tokio::test]
    async fn list_accounts_never_exposes_secrets() {
        let dir = tempfile::tempdir().unwrap();
        JsonFileMedium::new(dir.path().join("accounts.json"))
            .save(&[
                CredentialRecord::new("acct-1", "pw_1"),
                CredentialRecord::new("acct-2", "pw_2"),
            ])
            .await
            .unwrap();
        let state = test_state(dir.path()).await;

        let (status, json) = send(
            build_admin_router(state),
            Request::builder()
                .uri("/admin/accounts")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let accounts = json["accounts"].as_array().unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0]["identifier"], "acct-1");
        assert!(accounts[0]["last_rotated_at"].is_null());
        assert!(accounts[0].get("secret").is_none());
        assert!(!json.to_string().contains("pw_1"));
    }

    #[tokio::test]
    async fn list_accounts_missing_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;

        let (status, json) = send(
            build_admin_router(state),
            Request::builder()
                .uri("/admin/accounts")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["accounts"], serde_json::json!([]));
    }
}
