//! Executor trait: a long-running code-change backend.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExecutorError;

/// State of a run on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutorStatus {
    /// Map a backend status string. Unknown values are treated as still running.
    pub fn from_backend(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "queued" => Self::Queued,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Work handed to an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorTask {
    pub repo: String,
    pub instruction: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default = "default_branch_base")]
    pub branch_base: String,
}

fn default_branch_base() -> String {
    "main".to_string()
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorArtifacts {
    #[serde(default)]
    pub patch: Option<String>,
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub test_report: Option<Value>,
    #[serde(default)]
    pub deploy_url: Option<String>,
    #[serde(default)]
    pub files_changed: Vec<String>,
}

/// Lazy stream of log lines.
pub type LogStream = BoxStream<'static, Result<String, ExecutorError>>;

/// A code-execution backend. Runs are addressed only by `run_id`.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Registry key (e.g. `openhands`).
    fn name(&self) -> &str;

    /// Start a run and return its id.
    async fn start(&self, task: &ExecutorTask) -> Result<String, ExecutorError>;

    async fn get_status(&self, run_id: &str) -> Result<ExecutorStatus, ExecutorError>;

    /// Log lines as the backend produces them.
    async fn stream_logs(&self, run_id: &str) -> Result<LogStream, ExecutorError>;

    async fn get_artifacts(&self, run_id: &str) -> Result<ExecutorArtifacts, ExecutorError>;

    /// Request cancellation. `false` means the backend refused; keep polling.
    async fn cancel(&self, run_id: &str) -> bool;
}
