//! Worker tasks that pull jobs off the queue and run the pipeline.
//!
//! Each job runs in its own tokio task so a panic or an overrun of the job
//! timeout is contained and reported as a `failed` result.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::context::TaskContext;
use crate::error::PipelineError;
use crate::pipeline::{JobProcessor, JobResult};
use crate::queue::{JobQueue, QueuedJob};

/// Extra time past the job timeout before the worker gives up on a task that
/// ignores cancellation.
const ABORT_GRACE: Duration = Duration::from_secs(5);

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `concurrency` workers (at least one).
    pub fn spawn(
        queue: Arc<dyn JobQueue>,
        processor: Arc<JobProcessor>,
        concurrency: usize,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let handles = (0..concurrency)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let processor = Arc::clone(&processor);
                tokio::spawn(async move { worker_loop(worker, queue, processor).await })
            })
            .collect();
        info!(concurrency, "Worker pool started");
        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit. Workers exit once the queue is closed
    /// and drained.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
    }

    /// Stop workers immediately. Jobs in flight are dropped.
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn worker_loop(worker: usize, queue: Arc<dyn JobQueue>, processor: Arc<JobProcessor>) {
    debug!(worker, "Worker waiting for jobs");
    while let Some(job) = queue.dequeue().await {
        let task_id = job.task_id.clone();
        match queue.mark_running(&task_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(worker, task_id = %task_id, "Job cancelled before start, skipping");
                continue;
            }
            Err(e) => {
                warn!(worker, task_id = %task_id, error = %e, "Could not claim job");
                continue;
            }
        }

        info!(worker, task_id = %task_id, "Worker picked up job");
        let result = execute_job(Arc::clone(&processor), job).await;
        if let Err(e) = queue.complete(&task_id, result).await {
            error!(worker, task_id = %task_id, error = %e, "Failed to store job result");
        }
    }
    info!(worker, "Worker stopped");
}

/// Run one queued job to a terminal result under its timeout.
///
/// The pipeline enforces the timeout itself so the failed result keeps its
/// trail. The worker only aborts a task still running after `ABORT_GRACE`.
pub async fn execute_job(processor: Arc<JobProcessor>, job: QueuedJob) -> JobResult {
    let QueuedJob {
        task_id,
        payload,
        timeout,
        ..
    } = job;

    let ctx = match TaskContext::from_mapping(payload) {
        Ok(ctx) => ctx,
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Rejected job payload");
            return JobResult::aborted(task_id, e.to_string());
        }
    };

    let handle = tokio::spawn(async move { processor.process_within(ctx, timeout).await });
    let abort = handle.abort_handle();

    match tokio::time::timeout(timeout + ABORT_GRACE, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            let err = PipelineError::WorkerCrashed(e.to_string());
            error!(task_id = %task_id, error = %err, "Job task crashed");
            JobResult::aborted(task_id, err.to_string())
        }
        Err(_) => {
            abort.abort();
            let err = PipelineError::JobTimeout(timeout);
            warn!(task_id = %task_id, error = %err, "Job timed out");
            JobResult::aborted(task_id, err.to_string())
        }
    }
}
