//! In-process job queue: an mpsc channel for ordering plus a job table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};

use super::{EnqueueAck, JobQueue, JobRecord, QueueStatus, QueuedJob};
use crate::error::QueueError;
use crate::pipeline::{JobOutcome, JobResult};

/// How long finished jobs stay queryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    /// Age after which a terminal record is dropped.
    pub result_ttl: Duration,
    /// Most terminal records kept; the oldest go first.
    pub max_finished: usize,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            result_ttl: Duration::from_secs(24 * 60 * 60),
            max_finished: 1000,
        }
    }
}

pub struct MemoryQueue {
    /// `None` once closed.
    tx: RwLock<Option<mpsc::UnboundedSender<QueuedJob>>>,
    rx: Mutex<mpsc::UnboundedReceiver<QueuedJob>>,
    jobs: RwLock<HashMap<String, JobRecord>>,
    next_seq: AtomicU64,
    retention: Retention,
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: RwLock::new(Some(tx)),
            rx: Mutex::new(rx),
            jobs: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
            retention: Retention::default(),
        }
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }
}

/// Drop terminal records past the TTL, then the oldest beyond the cap.
/// Queued and running jobs are never touched.
fn prune(jobs: &mut HashMap<String, JobRecord>, retention: Retention, now: DateTime<Utc>) {
    let before = jobs.len();
    jobs.retain(|_, r| {
        !r.status.is_terminal()
            || r.ended_at.is_none_or(|ended| {
                (now - ended)
                    .to_std()
                    .map_or(true, |age| age < retention.result_ttl)
            })
    });

    let mut finished: Vec<(DateTime<Utc>, u64, String)> = jobs
        .values()
        .filter(|r| r.status.is_terminal())
        .map(|r| (r.ended_at.unwrap_or(r.created_at), r.seq, r.task_id.clone()))
        .collect();
    if finished.len() > retention.max_finished {
        finished.sort();
        let excess = finished.len() - retention.max_finished;
        for (_, _, task_id) in finished.into_iter().take(excess) {
            jobs.remove(&task_id);
        }
    }

    let pruned = before - jobs.len();
    if pruned > 0 {
        debug!(pruned, remaining = jobs.len(), "Pruned finished jobs");
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(
        &self,
        payload: Map<String, Value>,
        task_id: &str,
        timeout: Duration,
    ) -> Result<EnqueueAck, QueueError> {
        let sender = self.tx.read().await;
        let tx = sender.as_ref().ok_or(QueueError::Closed)?;

        let mut jobs = self.jobs.write().await;
        prune(&mut jobs, self.retention, Utc::now());
        if let Some(existing) = jobs.get(task_id) {
            if !existing.status.is_terminal() {
                warn!(task_id, status = %existing.status, "Rejected duplicate enqueue");
                return Err(QueueError::Duplicate {
                    task_id: task_id.to_string(),
                });
            }
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let position = jobs
            .values()
            .filter(|r| r.status == QueueStatus::Queued)
            .count();
        let request = payload
            .get("request")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        jobs.insert(
            task_id.to_string(),
            JobRecord {
                task_id: task_id.to_string(),
                status: QueueStatus::Queued,
                request,
                created_at: now,
                started_at: None,
                ended_at: None,
                timeout_secs: timeout.as_secs(),
                result: None,
                seq,
            },
        );
        tx.send(QueuedJob {
            task_id: task_id.to_string(),
            payload,
            timeout,
            seq,
        })
        .map_err(|_| QueueError::Closed)?;

        info!(task_id, position, timeout_secs = timeout.as_secs(), "Job enqueued");
        Ok(EnqueueAck {
            task_id: task_id.to_string(),
            status: QueueStatus::Queued,
            position,
            enqueued_at: now,
        })
    }

    async fn dequeue(&self) -> Option<QueuedJob> {
        let mut rx = self.rx.lock().await;
        loop {
            let job = rx.recv().await?;
            let jobs = self.jobs.read().await;
            match jobs.get(&job.task_id) {
                Some(record) if record.seq == job.seq && record.status == QueueStatus::Queued => {
                    return Some(job);
                }
                _ => debug!(task_id = %job.task_id, "Dropping cancelled or stale queue entry"),
            }
        }
    }

    async fn mark_running(&self, task_id: &str) -> Result<bool, QueueError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(task_id).ok_or_else(|| QueueError::NotFound {
            task_id: task_id.to_string(),
        })?;

        match record.status {
            QueueStatus::Queued => {
                record.status = QueueStatus::Running;
                record.started_at = Some(Utc::now());
                debug!(task_id, "Job running");
                Ok(true)
            }
            QueueStatus::Running => Err(QueueError::Duplicate {
                task_id: task_id.to_string(),
            }),
            _ => Ok(false),
        }
    }

    async fn complete(&self, task_id: &str, result: JobResult) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().await;
        prune(&mut jobs, self.retention, Utc::now());
        let record = jobs.get_mut(task_id).ok_or_else(|| QueueError::NotFound {
            task_id: task_id.to_string(),
        })?;

        record.status = match result.status {
            JobOutcome::Completed => QueueStatus::Completed,
            JobOutcome::Failed => QueueStatus::Failed,
        };
        record.ended_at = Some(Utc::now());
        info!(task_id, status = %record.status, "Job result stored");
        record.result = Some(result);
        Ok(())
    }

    async fn fetch_status(&self, task_id: &str) -> QueueStatus {
        self.jobs
            .read()
            .await
            .get(task_id)
            .map_or(QueueStatus::NotFound, |r| r.status)
    }

    async fn fetch_result(&self, task_id: &str) -> Option<JobResult> {
        self.jobs
            .read()
            .await
            .get(task_id)
            .and_then(|r| r.result.clone())
    }

    async fn fetch_record(&self, task_id: &str) -> Option<JobRecord> {
        self.jobs.read().await.get(task_id).cloned()
    }

    async fn cancel(&self, task_id: &str) -> Result<bool, QueueError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(task_id).ok_or_else(|| QueueError::NotFound {
            task_id: task_id.to_string(),
        })?;

        if record.status != QueueStatus::Queued {
            debug!(task_id, status = %record.status, "Cannot cancel job that is not queued");
            return Ok(false);
        }
        record.status = QueueStatus::Cancelled;
        record.ended_at = Some(Utc::now());
        info!(task_id, "Job cancelled");
        Ok(true)
    }

    async fn list_recent(&self, limit: usize) -> Vec<JobRecord> {
        let jobs = self.jobs.read().await;
        let mut records: Vec<JobRecord> = jobs.values().cloned().collect();
        records.sort_by(|a, b| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));
        records.truncate(limit);
        records
    }

    async fn depth(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|r| r.status == QueueStatus::Queued)
            .count()
    }

    async fn close(&self) {
        if self.tx.write().await.take().is_some() {
            info!("Job queue closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(60);

    fn payload(task_id: &str) -> Map<String, Value> {
        match json!({"task_id": task_id, "request": format!("job {task_id}")}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn result(task_id: &str, ok: bool) -> JobResult {
        let mut result = JobResult::aborted(task_id, "Deploy preview not found");
        if ok {
            result.status = JobOutcome::Completed;
            result.error = None;
        }
        result
    }

    #[tokio::test]
    async fn lifecycle_queued_running_completed() {
        let queue = MemoryQueue::new();
        let ack = queue.enqueue(payload("t-1"), "t-1", TIMEOUT).await.unwrap();
        assert_eq!(ack.status, QueueStatus::Queued);
        assert_eq!(ack.position, 0);
        assert_eq!(queue.depth().await, 1);

        let job = queue.dequeue().await.unwrap();
        assert_eq!(job.task_id, "t-1");
        assert_eq!(job.timeout, TIMEOUT);
        assert!(queue.mark_running("t-1").await.unwrap());
        assert_eq!(queue.fetch_status("t-1").await, QueueStatus::Running);
        assert!(queue.fetch_result("t-1").await.is_none());

        queue.complete("t-1", result("t-1", true)).await.unwrap();
        assert_eq!(queue.fetch_status("t-1").await, QueueStatus::Completed);
        assert!(queue.fetch_result("t-1").await.unwrap().is_success());

        let record = queue.fetch_record("t-1").await.unwrap();
        assert_eq!(record.request, "job t-1");
        assert!(record.started_at.is_some());
        assert!(record.ended_at.is_some());
    }

    #[tokio::test]
    async fn failed_result_reports_failed() {
        let queue = MemoryQueue::new();
        queue.enqueue(payload("t-1"), "t-1", TIMEOUT).await.unwrap();
        queue.dequeue().await.unwrap();
        queue.mark_running("t-1").await.unwrap();
        queue.complete("t-1", result("t-1", false)).await.unwrap();

        assert_eq!(queue.fetch_status("t-1").await, QueueStatus::Failed);
        let record = queue.fetch_record("t-1").await.unwrap();
        assert_eq!(record.error(), Some("Deploy preview not found"));
    }

    #[tokio::test]
    async fn duplicate_task_id_rejected_until_terminal() {
        let queue = MemoryQueue::new();
        queue.enqueue(payload("t-1"), "t-1", TIMEOUT).await.unwrap();
        let dup = queue.enqueue(payload("t-1"), "t-1", TIMEOUT).await;
        assert!(matches!(dup, Err(QueueError::Duplicate { .. })));

        queue.dequeue().await.unwrap();
        queue.mark_running("t-1").await.unwrap();
        let dup = queue.enqueue(payload("t-1"), "t-1", TIMEOUT).await;
        assert!(matches!(dup, Err(QueueError::Duplicate { .. })));

        queue.complete("t-1", result("t-1", true)).await.unwrap();
        assert!(queue.enqueue(payload("t-1"), "t-1", TIMEOUT).await.is_ok());
        assert_eq!(queue.fetch_status("t-1").await, QueueStatus::Queued);
    }

    #[tokio::test]
    async fn cancelled_job_is_never_dequeued() {
        let queue = MemoryQueue::new();
        queue.enqueue(payload("t-1"), "t-1", TIMEOUT).await.unwrap();
        queue.enqueue(payload("t-2"), "t-2", TIMEOUT).await.unwrap();

        assert!(queue.cancel("t-1").await.unwrap());
        assert_eq!(queue.fetch_status("t-1").await, QueueStatus::Cancelled);
        assert_eq!(queue.dequeue().await.unwrap().task_id, "t-2");

        queue.mark_running("t-2").await.unwrap();
        assert!(!queue.cancel("t-2").await.unwrap());
        assert!(matches!(
            queue.cancel("missing").await,
            Err(QueueError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn reenqueue_after_cancel_skips_stale_entry() {
        let queue = MemoryQueue::new();
        queue.enqueue(payload("t-1"), "t-1", TIMEOUT).await.unwrap();
        queue.cancel("t-1").await.unwrap();
        queue
            .enqueue(payload("t-1"), "t-1", Duration::from_secs(5))
            .await
            .unwrap();

        let job = queue.dequeue().await.unwrap();
        assert_eq!(job.timeout, Duration::from_secs(5));
        assert!(queue.mark_running("t-1").await.unwrap());
    }

    #[tokio::test]
    async fn list_recent_newest_first() {
        let queue = MemoryQueue::new();
        for id in ["a", "b", "c"] {
            queue.enqueue(payload(id), id, TIMEOUT).await.unwrap();
        }
        let recent: Vec<String> = queue
            .list_recent(2)
            .await
            .into_iter()
            .map(|r| r.task_id)
            .collect();
        assert_eq!(recent, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = MemoryQueue::new();
        queue.enqueue(payload("t-1"), "t-1", TIMEOUT).await.unwrap();
        queue.close().await;

        assert!(matches!(
            queue.enqueue(payload("t-2"), "t-2", TIMEOUT).await,
            Err(QueueError::Closed)
        ));
        assert_eq!(queue.dequeue().await.unwrap().task_id, "t-1");
        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let queue = MemoryQueue::new();
        assert_eq!(queue.fetch_status("nope").await, QueueStatus::NotFound);
        assert!(queue.fetch_record("nope").await.is_none());
        assert!(matches!(
            queue.mark_running("nope").await,
            Err(QueueError::NotFound { .. })
        ));
    }

    async fn run_to_end(queue: &MemoryQueue, task_id: &str) {
        queue.enqueue(payload(task_id), task_id, TIMEOUT).await.unwrap();
        queue.dequeue().await.unwrap();
        queue.mark_running(task_id).await.unwrap();
        queue.complete(task_id, result(task_id, true)).await.unwrap();
    }

    #[tokio::test]
    async fn finished_jobs_capped_oldest_first() {
        let queue = MemoryQueue::new().with_retention(Retention {
            result_ttl: Duration::from_secs(3600),
            max_finished: 2,
        });
        for id in ["t-1", "t-2", "t-3"] {
            run_to_end(&queue, id).await;
        }
        // The cap applies on the next write.
        queue.enqueue(payload("t-4"), "t-4", TIMEOUT).await.unwrap();

        assert_eq!(queue.fetch_status("t-1").await, QueueStatus::NotFound);
        assert_eq!(queue.fetch_status("t-2").await, QueueStatus::Completed);
        assert_eq!(queue.fetch_status("t-3").await, QueueStatus::Completed);
        assert_eq!(queue.fetch_status("t-4").await, QueueStatus::Queued);
    }

    #[tokio::test]
    async fn expired_results_dropped_but_live_jobs_kept() {
        let queue = MemoryQueue::new().with_retention(Retention {
            result_ttl: Duration::ZERO,
            max_finished: 100,
        });
        run_to_end(&queue, "done").await;
        queue.enqueue(payload("waiting"), "waiting", TIMEOUT).await.unwrap();
        queue.enqueue(payload("busy"), "busy", TIMEOUT).await.unwrap();
        queue.dequeue().await.unwrap();
        queue.mark_running("waiting").await.unwrap();
        queue.enqueue(payload("late"), "late", TIMEOUT).await.unwrap();

        assert_eq!(queue.fetch_status("done").await, QueueStatus::NotFound);
        assert_eq!(queue.fetch_status("waiting").await, QueueStatus::Running);
        assert_eq!(queue.fetch_status("busy").await, QueueStatus::Queued);
        assert_eq!(queue.fetch_status("late").await, QueueStatus::Queued);
    }
}
