//! `brain` command-line client for the job API.
//!
//! Thin transport over `POST /jobs`, `GET /jobs/{id}`, `DELETE /jobs/{id}`
//! and `GET /health`. Output is built as lines so it can be checked without
//! a terminal.

use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

use crate::context::DEFAULT_JOB_TYPE;
use crate::error::ClientError;
use crate::queue::QueueStatus;

const DEFAULT_API_URL: &str = "http://localhost:7000";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between polls in `brain logs --follow`.
pub const FOLLOW_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(name = "brain", version, about = "Submit and track Agent Brain jobs")]
pub struct Cli {
    /// Base URL of the job API.
    #[arg(long, env = "BRAIN_API_URL", default_value = DEFAULT_API_URL, global = true)]
    pub api_url: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    #[command(about = "Submit a new job")]
    Run {
        /// Free-text instruction, e.g. "Fix issue #123".
        request: String,
        #[arg(long)]
        repo: Option<String>,
        #[arg(long)]
        issue: Option<u64>,
        #[arg(long)]
        pr: Option<u64>,
        #[arg(long, default_value = DEFAULT_JOB_TYPE)]
        job_type: String,
        /// Repeatable.
        #[arg(long = "constraint")]
        constraints: Vec<String>,
    },
    #[command(about = "Show a job's status and result")]
    Status { job_id: String },
    #[command(about = "Print a job's log lines")]
    Logs {
        job_id: String,
        /// Poll until the job finishes.
        #[arg(long, short)]
        follow: bool,
    },
    #[command(about = "Cancel a job that has not started")]
    Cancel { job_id: String },
    #[command(about = "Check API health")]
    Health,
}

/// Body of `POST /jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitJob {
    pub request: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr: Option<u64>,
    pub job_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
}

impl SubmitJob {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            repo: None,
            issue: None,
            pr: None,
            job_type: DEFAULT_JOB_TYPE.to_string(),
            constraints: Vec::new(),
        }
    }
}

// ── HTTP client ─────────────────────────────────────────────────────────

pub struct JobsClient {
    http: reqwest::Client,
    base_url: String,
}

impl JobsClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::RequestFailed {
                url: base_url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&SubmitJob>,
    ) -> Result<Value, ClientError> {
        let url = format!("{}{path}", self.base_url);
        let mut builder = self.http.request(method, &url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(|e| ClientError::RequestFailed {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    pub async fn submit(&self, job: &SubmitJob) -> Result<Value, ClientError> {
        self.send(reqwest::Method::POST, "/jobs", Some(job)).await
    }

    pub async fn job(&self, job_id: &str) -> Result<Value, ClientError> {
        self.send(reqwest::Method::GET, &format!("/jobs/{job_id}"), None)
            .await
            .map_err(|e| not_found_as(e, job_id))
    }

    pub async fn cancel(&self, job_id: &str) -> Result<Value, ClientError> {
        self.send(reqwest::Method::DELETE, &format!("/jobs/{job_id}"), None)
            .await
            .map_err(|e| not_found_as(e, job_id))
    }

    pub async fn health(&self) -> Result<Value, ClientError> {
        self.send(reqwest::Method::GET, "/health", None).await
    }

    /// Poll a job until it is terminal, handing each new output line to
    /// `emit`. Status changes and log lines are each emitted once.
    pub async fn follow(
        &self,
        job_id: &str,
        interval: Duration,
        mut emit: impl FnMut(String),
    ) -> Result<Value, ClientError> {
        let mut last_status: Option<String> = None;
        let mut printed = 0;
        loop {
            let job = self.job(job_id).await?;
            let status = job["status"].as_str().unwrap_or("unknown").to_string();
            if last_status.as_deref() != Some(status.as_str()) {
                emit(format!("Status: {status}"));
                last_status = Some(status);
            }
            let logs = log_lines(&job);
            for line in logs.iter().skip(printed) {
                emit(line.clone());
            }
            printed = printed.max(logs.len());

            if is_terminal(&job) {
                return Ok(job);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

fn not_found_as(err: ClientError, job_id: &str) -> ClientError {
    match err {
        ClientError::HttpStatus { status: 404, .. } => {
            ClientError::JobNotFound(job_id.to_string())
        }
        other => other,
    }
}

fn is_terminal(job: &Value) -> bool {
    serde_json::from_value::<QueueStatus>(job["status"].clone())
        .is_ok_and(|status| status.is_terminal())
}

// ── Rendering ───────────────────────────────────────────────────────────

pub fn submitted_lines(ack: &Value) -> Vec<String> {
    let task_id = ack["task_id"].as_str().unwrap_or("?");
    vec![
        format!("✓ Job submitted: {task_id}"),
        format!("   Status: {}", ack["status"].as_str().unwrap_or("unknown")),
        "Track progress:".to_string(),
        format!("   brain status {task_id}"),
        format!("   brain logs {task_id} --follow"),
    ]
}

pub fn status_lines(job: &Value) -> Vec<String> {
    let mut lines = vec![
        format!("Job ID: {}", job["task_id"].as_str().unwrap_or("?")),
        format!("Status: {}", job["status"].as_str().unwrap_or("unknown")),
    ];
    if let Some(created) = job["created_at"].as_str() {
        lines.push(format!("Created: {created}"));
    }

    let result = &job["result"];
    if result.is_object() {
        lines.push("Result:".to_string());
        if let Some(persona) = result["persona"].as_str() {
            lines.push(format!("  Persona: {persona}"));
        }
        if let Some(skills) = result["skills_executed"].as_array().filter(|s| !s.is_empty()) {
            let names: Vec<&str> = skills.iter().filter_map(Value::as_str).collect();
            lines.push(format!("  Skills: {}", names.join(", ")));
        }
        if result["outputs"].as_object().is_some_and(|o| !o.is_empty()) {
            lines.push(format!("  Outputs: {}", result["outputs"]));
        }
        if let Some(artifacts) = result["artifacts"].as_object().filter(|a| !a.is_empty()) {
            lines.push("  Artifacts:".to_string());
            for (key, value) in artifacts {
                lines.push(format!("    - {key}: {}", value.as_str().unwrap_or_default()));
            }
        }
    }
    if let Some(error) = job["error"].as_str() {
        lines.push(format!("Error: {error}"));
    }
    lines
}

/// Pipeline log lines of a finished job; empty while it is still pending.
pub fn log_lines(job: &Value) -> Vec<String> {
    job["result"]["logs"]
        .as_array()
        .map(|logs| logs.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

pub fn health_lines(health: &Value) -> Vec<String> {
    vec![
        format!("Status: {}", health["status"].as_str().unwrap_or("unknown")),
        format!("Queue depth: {}", health["queue_depth"]),
    ]
}

// ── Entry point ─────────────────────────────────────────────────────────

/// Run one parsed command, printing to stdout.
pub async fn execute(cli: Cli) -> Result<(), ClientError> {
    let client = JobsClient::new(&cli.api_url)?;
    let print = |lines: Vec<String>| lines.into_iter().for_each(|l| println!("{l}"));

    match cli.command {
        Command::Run {
            request,
            repo,
            issue,
            pr,
            job_type,
            constraints,
        } => {
            let job = SubmitJob {
                request,
                repo,
                issue,
                pr,
                job_type,
                constraints,
            };
            print(submitted_lines(&client.submit(&job).await?));
        }
        Command::Status { job_id } => print(status_lines(&client.job(&job_id).await?)),
        Command::Logs { job_id, follow: false } => {
            let logs = log_lines(&client.job(&job_id).await?);
            if logs.is_empty() {
                println!("No logs available yet");
            }
            print(logs);
        }
        Command::Logs { job_id, follow: true } => {
            println!("Following logs for {job_id} (Ctrl+C to stop)...");
            tokio::select! {
                result = client.follow(&job_id, FOLLOW_INTERVAL, |line| println!("{line}")) => {
                    result?;
                }
                _ = tokio::signal::ctrl_c() => println!("Stopped following logs"),
            }
        }
        Command::Cancel { job_id } => {
            let body = client.cancel(&job_id).await?;
            let verdict = if body["cancelled"].as_bool().unwrap_or(false) {
                "cancelled"
            } else {
                "not cancelled (already started or finished)"
            };
            println!("Job {job_id} {verdict}");
        }
        Command::Health => print(health_lines(&client.health().await?)),
    }
    Ok(())
}
