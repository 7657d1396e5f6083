//! Skill trait and result types.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::{ContextUpdate, TaskContext};
use crate::error::SkillError;

/// Outcome of a skill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for SkillStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Result returned by [`Skill::run`].
///
/// Skills never mutate the task context directly. Outputs and artifacts are
/// merged by the pipeline, and slot writes travel in `context_updates`.
#[derive(Debug, Clone, Default)]
pub struct SkillResult {
    pub status: SkillStatus,
    pub outputs: Map<String, Value>,
    pub artifacts: BTreeMap<String, String>,
    pub logs: Vec<String>,
    pub error: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    /// Entries from [`Skill::success_checks`] this run satisfied.
    pub passed_checks: Vec<String>,
    pub context_updates: Vec<ContextUpdate>,
}

impl SkillResult {
    /// An empty, still-running result for a skill body to fill in.
    pub fn running() -> Self {
        Self {
            status: SkillStatus::Running,
            ..Self::default()
        }
    }

    /// A successful result with no payload.
    pub fn success() -> Self {
        Self {
            status: SkillStatus::Success,
            ..Self::default()
        }
    }

    /// A failed result carrying `error`.
    pub fn failure(error: impl Into<String>) -> Self {
        Self::running().fail(error)
    }

    pub fn is_success(&self) -> bool {
        self.status == SkillStatus::Success
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    pub fn output(&mut self, key: impl Into<String>, value: Value) {
        self.outputs.insert(key.into(), value);
    }

    pub fn artifact(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.artifacts.insert(key.into(), value.into());
    }

    pub fn pass(&mut self, check: impl Into<String>) {
        self.passed_checks.push(check.into());
    }

    pub fn update(&mut self, update: ContextUpdate) {
        self.context_updates.push(update);
    }

    pub fn with_output(mut self, key: impl Into<String>, value: Value) -> Self {
        self.output(key, value);
        self
    }

    pub fn with_check(mut self, check: impl Into<String>) -> Self {
        self.pass(check);
        self
    }

    /// Mark the run successful.
    pub fn succeed(mut self) -> Self {
        self.status = SkillStatus::Success;
        self.error = None;
        self
    }

    /// Mark the run failed. Partial outputs are kept.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        let error = error.into();
        self.logs.push(format!("Error: {error}"));
        self.status = SkillStatus::Failed;
        self.error = Some(error);
        self
    }

    /// Finish a run from the body's result.
    pub fn finish(self, outcome: Result<(), SkillError>) -> Self {
        match outcome {
            Ok(()) => self.succeed(),
            Err(e) => self.fail(e.to_string()),
        }
    }
}

/// A named capability the pipeline can execute against a task context.
///
/// `run` is total: internal errors become a failed [`SkillResult`].
#[async_trait]
pub trait Skill: Send + Sync {
    /// Unique registry key.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the context fields this skill reads.
    fn inputs_schema(&self) -> Value;

    /// JSON Schema of the outputs this skill writes.
    fn outputs_schema(&self) -> Value;

    /// Tool clients this skill may call.
    fn allowed_tools(&self) -> &[&str];

    /// Named checks a successful run may satisfy. Gates consume these.
    fn success_checks(&self) -> &[&str];

    async fn run(&self, ctx: &TaskContext) -> SkillResult;
}
