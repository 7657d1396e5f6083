//! Integration tests for the job REST API.
//!
//! Each test spins up an Axum server on a random port backed by a real
//! `MemoryQueue` and drives it over HTTP with reqwest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use agent_brain::api::{ApiState, job_routes};
use agent_brain::cli::{JobsClient, SubmitJob, status_lines};
use agent_brain::context::TaskContext;
use agent_brain::error::{ClientError, LlmError};
use agent_brain::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};
use agent_brain::pipeline::{JobProcessor, JobTypeCatalog, Router};
use agent_brain::queue::{JobQueue, MemoryQueue};
use agent_brain::skills::{Skill, SkillRegistry, SkillResult};
use agent_brain::worker::WorkerPool;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stub LLM provider for integration tests (no real API calls).
struct StubLlm;

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Ok(CompletionResponse {
            content: "PERSONA: researcher\nSKILLS: echo\nEXECUTOR: none".to_string(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

/// Echoes the repo and issue back as outputs. Fails on "please fail".
struct EchoSkill;

#[async_trait]
impl Skill for EchoSkill {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "echo"
    }
    fn inputs_schema(&self) -> Value {
        json!({})
    }
    fn outputs_schema(&self) -> Value {
        json!({})
    }
    fn allowed_tools(&self) -> &[&str] {
        &[]
    }
    fn success_checks(&self) -> &[&str] {
        &["context_gathered"]
    }
    async fn run(&self, ctx: &TaskContext) -> SkillResult {
        if ctx.request == "please fail" {
            return SkillResult::failure("asked to fail");
        }
        SkillResult::success()
            .with_output("repo", json!(ctx.repo))
            .with_output("issue", json!(ctx.issue))
            .with_check("context_gathered")
    }
}

struct TestServer {
    base: String,
    queue: Arc<dyn JobQueue>,
    client: reqwest::Client,
}

/// Start the API (and optionally workers) on a random port.
async fn start_server(with_workers: bool) -> TestServer {
    let queue: Arc<dyn JobQueue> = Arc::new(MemoryQueue::new());

    if with_workers {
        let mut skills = SkillRegistry::new();
        skills.register(Arc::new(EchoSkill));
        let processor = Arc::new(JobProcessor::new(
            Router::new(Arc::new(StubLlm)),
            Arc::new(skills),
            Arc::new(JobTypeCatalog::builtin()),
        ));
        // Dropping the pool handle leaves the worker tasks running.
        let _pool = WorkerPool::spawn(Arc::clone(&queue), processor, 1);
    }

    let app = job_routes(ApiState {
        queue: Arc::clone(&queue),
        default_repo: Some("drafted-web".to_string()),
        job_timeout: Duration::from_secs(30),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        queue,
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    async fn submit(&self, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}/jobs", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    /// Poll `GET /jobs/{id}` until the job is terminal.
    async fn wait_for(&self, task_id: &str) -> Value {
        loop {
            let (_, body) = self.get(&format!("/jobs/{task_id}")).await;
            if matches!(body["status"].as_str(), Some("completed" | "failed" | "cancelled")) {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

// ── Health ──────────────────────────────────────────────────────────

#[tokio::test]
async fn root_and_health_report_status() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(false).await;

        let (status, root) = server.get("/").await;
        assert_eq!(status, 200);
        assert_eq!(root["service"], "agent-brain");
        assert_eq!(root["status"], "ok");

        server.submit(json!({"request": "queued only"})).await;
        let (status, health) = server.get("/health").await;
        assert_eq!(status, 200);
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["queue_depth"], 1);
    })
    .await
    .expect("test timed out");
}

// ── Submission ──────────────────────────────────────────────────────

#[tokio::test]
async fn submit_queues_job_with_defaults() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(false).await;

        let (status, body) = server
            .submit(json!({"request": "Fix issue #123", "issue": 123}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "queued");
        let task_id = body["task_id"].as_str().unwrap().to_string();
        assert!(body["message"].as_str().unwrap().contains(&task_id));

        let (status, job) = server.get(&format!("/jobs/{task_id}")).await;
        assert_eq!(status, 200);
        assert_eq!(job["status"], "queued");
        assert!(job["started_at"].is_null());
        assert!(job.get("result").is_none());

        let queued = server.queue.dequeue().await.unwrap();
        assert_eq!(queued.payload["repo"], "drafted-web");
        assert_eq!(queued.payload["issue"], "123");
        assert_eq!(queued.payload["job_type"], "issue_to_pr");
        assert_eq!(queued.timeout, Duration::from_secs(30));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn empty_request_is_rejected() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(false).await;

        let (status, body) = server.submit(json!({"request": "   "})).await;
        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("request"));
        assert_eq!(server.queue.depth().await, 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_job_is_404() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(false).await;

        let (status, body) = server.get("/jobs/does-not-exist").await;
        assert_eq!(status, 404);
        assert!(body["error"].as_str().unwrap().contains("does-not-exist"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cancel_queued_job() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(false).await;
        let (_, body) = server.submit(json!({"request": "cancel me"})).await;
        let task_id = body["task_id"].as_str().unwrap();

        let resp = server
            .client
            .delete(format!("{}/jobs/{task_id}", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["cancelled"], true);
        assert_eq!(body["status"], "cancelled");
    })
    .await
    .expect("test timed out");
}

// ── End to end ──────────────────────────────────────────────────────

#[tokio::test]
async fn submitted_job_runs_to_completion() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(true).await;

        let (_, body) = server
            .submit(json!({"request": "Look into issue 9", "repo": "drafted-api", "issue": "9"}))
            .await;
        let task_id = body["task_id"].as_str().unwrap();

        let job = server.wait_for(task_id).await;
        assert_eq!(job["status"], "completed");
        assert!(job["started_at"].is_string());
        assert!(job["ended_at"].is_string());
        assert!(job.get("error").is_none());
        assert_eq!(job["result"]["persona"], "researcher");
        assert_eq!(job["result"]["outputs"]["repo"], "drafted-api");
        assert_eq!(job["result"]["outputs"]["issue"], "9");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn failed_job_reports_error() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(true).await;

        let (_, body) = server.submit(json!({"request": "please fail"})).await;
        let task_id = body["task_id"].as_str().unwrap();

        let job = server.wait_for(task_id).await;
        assert_eq!(job["status"], "failed");
        assert_eq!(job["error"], "asked to fail");
        assert_eq!(job["result"]["status"], "failed");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn list_recent_jobs() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(false).await;
        for i in 0..3 {
            server.submit(json!({"request": format!("job {i}")})).await;
        }

        let (status, body) = server.get("/jobs?limit=2").await;
        assert_eq!(status, 200);
        let jobs = body["jobs"].as_array().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0]["request"], "job 2");
        assert_eq!(jobs[0]["status"], "queued");
    })
    .await
    .expect("test timed out");
}

// ── CLI client ──────────────────────────────────────────────────────

#[tokio::test]
async fn cli_client_submits_and_follows_job() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(true).await;
        let client = JobsClient::new(&server.base).unwrap();

        let mut job = SubmitJob::new("Look into issue 9");
        job.repo = Some("drafted-api".to_string());
        job.issue = Some(9);
        let ack = client.submit(&job).await.unwrap();
        let task_id = ack["task_id"].as_str().unwrap().to_string();

        let mut lines = Vec::new();
        let done = client
            .follow(&task_id, Duration::from_millis(20), |line| lines.push(line))
            .await
            .unwrap();

        assert_eq!(done["status"], "completed");
        assert!(lines[0].starts_with("Status: "));
        assert_eq!(lines.iter().filter(|l| *l == "Status: completed").count(), 1);
        assert_eq!(lines.iter().filter(|l| l.starts_with("Routed: ")).count(), 1);

        let status = status_lines(&client.job(&task_id).await.unwrap());
        assert_eq!(status[1], "Status: completed");
        assert!(status.contains(&"  Persona: researcher".to_string()));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cli_client_maps_missing_job_and_reads_health() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(false).await;
        let client = JobsClient::new(&server.base).unwrap();

        let err = client.job("no-such-job").await.unwrap_err();
        assert!(matches!(err, ClientError::JobNotFound(ref id) if id == "no-such-job"));
        let err = client.cancel("no-such-job").await.unwrap_err();
        assert!(matches!(err, ClientError::JobNotFound(_)));

        let ack = client.submit(&SubmitJob::new("wait here")).await.unwrap();
        let health = client.health().await.unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["queue_depth"], 1);

        let task_id = ack["task_id"].as_str().unwrap();
        let cancelled = client.cancel(task_id).await.unwrap();
        assert_eq!(cancelled["cancelled"], true);
    })
    .await
    .expect("test timed out");
}
