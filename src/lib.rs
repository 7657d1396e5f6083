//! Agent Brain: routes agent jobs to skills and runs them as a pipeline.

pub mod api;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod executors;
pub mod llm;
pub mod pipeline;
pub mod queue;
pub mod skills;
pub mod tools;
pub mod worker;
