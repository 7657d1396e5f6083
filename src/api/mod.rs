//! HTTP submission API for agent jobs.

mod routes;

pub use routes::{ApiState, CreateJobRequest, NumberOrString, job_routes};
