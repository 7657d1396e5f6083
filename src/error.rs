//! Error types for agent-brain.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Skill error: {0}")]
    Skill(#[from] SkillError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by tool clients (GitHub, Netlify, Notion, Firebase).
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {tool} is not configured: {reason}")]
    NotConfigured { tool: String, reason: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Tool {tool} request failed: {reason}")]
    RequestFailed { tool: String, reason: String },

    #[error("Tool {tool} returned HTTP {status}: {body}")]
    HttpStatus {
        tool: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {tool}: {reason}")]
    InvalidResponse { tool: String, reason: String },

    #[error("Timed out after {timeout:?} waiting on {tool}")]
    Timeout { tool: String, timeout: Duration },
}

/// Errors inside a skill body. Always folded into a failed `SkillResult`.
#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("{0} required")]
    MissingInput(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("{0}")]
    Failed(String),
}

/// Code-execution backend errors.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Executor {name} not registered")]
    NotFound { name: String },

    #[error("Executor {executor} request failed: {reason}")]
    RequestFailed { executor: String, reason: String },

    #[error("Executor {executor} returned HTTP {status}")]
    HttpStatus { executor: String, status: u16 },

    #[error("Invalid response from executor {executor}: {reason}")]
    InvalidResponse { executor: String, reason: String },
}

/// Queue boundary errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Task {task_id} is already queued or running")]
    Duplicate { task_id: String },

    #[error("Task {task_id} not found")]
    NotFound { task_id: String },

    #[error("Queue is closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Faults in the pipeline's own control flow (never a skill-reported failure).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Task {task_id}: cannot transition from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("Task {task_id}: routing already set")]
    RoutingAlreadySet { task_id: String },

    #[error("Skill {skill} panicked: {message}")]
    SkillPanicked { skill: String, message: String },

    #[error("Invalid task context: {0}")]
    InvalidContext(String),

    #[error("Job exceeded timeout of {0:?}")]
    JobTimeout(Duration),

    #[error("Job worker crashed: {0}")]
    WorkerCrashed(String),
}

/// Errors from the command-line client talking to the job API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("API returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

/// Result type alias for agent-brain.
pub type Result<T> = std::result::Result<T, Error>;
