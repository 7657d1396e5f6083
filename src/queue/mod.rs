//! Job queue boundary between submission and workers.
//!
//! Payloads are flat task-context mappings. The queue owns per-task
//! exclusivity: a task id that is queued or running cannot be enqueued again.

mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::QueueError;
use crate::pipeline::JobResult;

pub use memory::{MemoryQueue, Retention};

/// Externally visible state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    NotFound,
}

impl QueueStatus {
    /// Whether the job will never change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::NotFound => "not_found",
        };
        write!(f, "{s}")
    }
}

/// Acknowledgment returned by [`JobQueue::enqueue`].
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueAck {
    pub task_id: String,
    pub status: QueueStatus,
    /// Jobs waiting ahead of this one.
    pub position: usize,
    pub enqueued_at: DateTime<Utc>,
}

/// A job handed to a worker.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub task_id: String,
    pub payload: Map<String, Value>,
    pub timeout: Duration,
    /// Distinguishes re-enqueues of the same task id.
    pub(crate) seq: u64,
}

/// Bookkeeping for one job, as reported by the status API.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub task_id: String,
    pub status: QueueStatus,
    pub request: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl JobRecord {
    /// Error text of a failed job.
    pub fn error(&self) -> Option<&str> {
        self.result.as_ref().and_then(|r| r.error.as_deref())
    }
}

/// Async queue of task-context payloads.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job. Fails if `task_id` is already queued or running.
    async fn enqueue(
        &self,
        payload: Map<String, Value>,
        task_id: &str,
        timeout: Duration,
    ) -> Result<EnqueueAck, QueueError>;

    /// Wait for the next queued job. `None` once the queue is closed and drained.
    async fn dequeue(&self) -> Option<QueuedJob>;

    /// Move a dequeued job to `running`. Returns `false` if it was cancelled
    /// in the meantime and must not run.
    async fn mark_running(&self, task_id: &str) -> Result<bool, QueueError>;

    /// Store the terminal result of a running job.
    async fn complete(&self, task_id: &str, result: JobResult) -> Result<(), QueueError>;

    async fn fetch_status(&self, task_id: &str) -> QueueStatus;

    /// Terminal result, if the job has finished.
    async fn fetch_result(&self, task_id: &str) -> Option<JobResult>;

    async fn fetch_record(&self, task_id: &str) -> Option<JobRecord>;

    /// Cancel a job that has not started. Returns whether it was cancelled.
    async fn cancel(&self, task_id: &str) -> Result<bool, QueueError>;

    /// Most recently created jobs first.
    async fn list_recent(&self, limit: usize) -> Vec<JobRecord>;

    /// Jobs waiting to run.
    async fn depth(&self) -> usize;

    /// Stop accepting jobs; workers drain what is left.
    async fn close(&self);
}
