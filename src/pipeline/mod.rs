//! Job pipeline.
//!
//! Every job flows through:
//! 1. `Router::route()`: LLM picks persona, skills and executor
//! 2. `JobProcessor::process()`: skills run in order under the job type's
//!    step timeouts, retries and gates
//! 3. A terminal [`JobResult`] goes back to the queue
//!
//! A failing skill halts the job unless its step is optional.

pub mod job_type;
pub mod processor;
pub mod router;
pub mod types;

pub use job_type::{JobGate, JobType, JobTypeCatalog, RetryPolicy, SkillStep};
pub use processor::{JobProcessor, PipelineConfig};
pub use router::Router;
pub use types::{JobOutcome, JobResult, RoutingDecision};
