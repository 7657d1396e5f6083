//! Worker pool: drains the job queue with N concurrent pipelines.

mod pool;

pub use pool::{WorkerPool, execute_job};
