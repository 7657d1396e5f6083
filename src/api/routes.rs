//! REST endpoints: submit jobs, poll status, list recent jobs.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::context::{DEFAULT_JOB_TYPE, TaskContext};
use crate::error::QueueError;
use crate::queue::{JobQueue, JobRecord};

/// Default and maximum page size for `GET /jobs`.
const DEFAULT_LIST_LIMIT: usize = 10;
const MAX_LIST_LIMIT: usize = 100;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct ApiState {
    pub queue: Arc<dyn JobQueue>,
    /// Repo used when a submission names none.
    pub default_repo: Option<String>,
    /// Per-job timeout handed to the queue.
    pub job_timeout: Duration,
}

/// Issue and PR numbers arrive as either JSON numbers or strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumberOrString {
    Number(u64),
    Text(String),
}

impl NumberOrString {
    fn into_ref(self) -> Option<String> {
        match self {
            Self::Number(n) => Some(n.to_string()),
            Self::Text(s) => {
                let s = s.trim().trim_start_matches('#').to_string();
                (!s.is_empty()).then_some(s)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    #[serde(default)]
    pub request: String,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub issue: Option<NumberOrString>,
    #[serde(default)]
    pub pr: Option<NumberOrString>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub job_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

/// Build the Axum router with job REST routes.
pub fn job_routes(state: ApiState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/{id}", get(get_job).delete(cancel_job))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn root() -> impl IntoResponse {
    Json(json!({
        "service": "agent-brain",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "queue_depth": state.queue.depth().await
    }))
}

// ── Jobs ────────────────────────────────────────────────────────────────

async fn create_job(
    State(state): State<ApiState>,
    Json(body): Json<CreateJobRequest>,
) -> impl IntoResponse {
    let request = body.request.trim();
    if request.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "request must not be empty"})),
        );
    }

    let mut ctx = TaskContext::new(request)
        .with_job_type(
            body.job_type
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_JOB_TYPE.to_string()),
        )
        .with_constraints(body.constraints);
    ctx.repo = body
        .repo
        .filter(|r| !r.trim().is_empty())
        .or_else(|| state.default_repo.clone());
    ctx.issue = body.issue.and_then(NumberOrString::into_ref);
    ctx.pr = body.pr.and_then(NumberOrString::into_ref);

    let task_id = ctx.task_id.clone();
    match state
        .queue
        .enqueue(ctx.to_mapping(), &task_id, state.job_timeout)
        .await
    {
        Ok(ack) => {
            info!(
                task_id = %task_id,
                job_type = %ctx.job_type,
                repo = ctx.repo.as_deref().unwrap_or("none"),
                "Job submitted"
            );
            (
                StatusCode::OK,
                Json(json!({
                    "task_id": task_id,
                    "status": ack.status,
                    "message": format!("Job {task_id} queued for processing"),
                })),
            )
        }
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Failed to enqueue job");
            let status = match e {
                QueueError::Duplicate { .. } => StatusCode::CONFLICT,
                QueueError::Closed => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({"error": e.to_string()})))
        }
    }
}

async fn get_job(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.queue.fetch_record(&id).await {
        Some(record) => (StatusCode::OK, Json(job_status(&record))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("Job {id} not found")})),
        ),
    }
}

async fn cancel_job(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.queue.cancel(&id).await {
        Ok(cancelled) => {
            let status = state.queue.fetch_status(&id).await;
            (
                StatusCode::OK,
                Json(json!({"task_id": id, "cancelled": cancelled, "status": status})),
            )
        }
        Err(QueueError::NotFound { .. }) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("Job {id} not found")})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        ),
    }
}

async fn list_jobs(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let jobs: Vec<Value> = state
        .queue
        .list_recent(limit)
        .await
        .iter()
        .map(|r| {
            json!({
                "task_id": r.task_id,
                "status": r.status,
                "request": r.request,
                "created_at": r.created_at,
                "ended_at": r.ended_at,
            })
        })
        .collect();
    Json(json!({ "jobs": jobs }))
}

/// Status payload for one job. `result` and `error` appear once it finished.
fn job_status(record: &JobRecord) -> Value {
    let mut body = json!({
        "task_id": record.task_id,
        "status": record.status,
        "created_at": record.created_at,
        "started_at": record.started_at,
        "ended_at": record.ended_at,
    });
    if let Some(result) = &record.result {
        body["result"] = json!(result);
    }
    if let Some(error) = record.error() {
        body["error"] = json!(error);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_or_string_refs() {
        assert_eq!(NumberOrString::Number(123).into_ref().as_deref(), Some("123"));
        assert_eq!(
            NumberOrString::Text("#45".into()).into_ref().as_deref(),
            Some("45")
        );
        assert_eq!(NumberOrString::Text("  ".into()).into_ref(), None);
    }

    #[test]
    fn create_request_defaults() {
        let body: CreateJobRequest =
            serde_json::from_value(json!({"request": "Fix it", "issue": 7})).unwrap();
        assert!(body.constraints.is_empty());
        assert!(body.job_type.is_none());
        assert_eq!(body.issue.and_then(NumberOrString::into_ref).as_deref(), Some("7"));
    }
}
