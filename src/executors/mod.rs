//! Code-execution backends.
//!
//! The `openhands_pr` skill starts runs through an [`Executor`] picked from
//! the [`ExecutorRegistry`]; the routed executor name, or the default.

mod executor;
pub mod openhands;
mod registry;

pub use executor::{Executor, ExecutorArtifacts, ExecutorStatus, ExecutorTask, LogStream};
pub use openhands::OpenHandsExecutor;
pub use registry::ExecutorRegistry;
