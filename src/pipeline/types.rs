//! Shared types for the job pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::TaskContext;

// ── Routing ─────────────────────────────────────────────────────────

pub const DEFAULT_PERSONA: &str = "coder";
pub const DEFAULT_SKILL: &str = "github_context";
pub const DEFAULT_EXECUTOR: &str = "openhands";

/// Personas the router may choose, with their one-line brief.
pub const PERSONAS: [(&str, &str); 5] = [
    ("researcher", "Evidence-first investigation, no code changes"),
    ("debugger", "Reproduce bugs, identify root cause"),
    ("coder", "Implement features/fixes with tests"),
    ("breaker", "Adversarial testing, security checks"),
    ("communicator", "Summaries, PR descriptions"),
];

pub fn is_known_persona(name: &str) -> bool {
    PERSONAS.iter().any(|(p, _)| *p == name)
}

/// The router's choice of persona, skills and executor for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub persona: String,
    /// Ordered skill names; never empty.
    pub skills: Vec<String>,
    /// `None` when no code change is needed.
    pub executor: Option<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl Default for RoutingDecision {
    fn default() -> Self {
        Self {
            persona: DEFAULT_PERSONA.to_string(),
            skills: vec![DEFAULT_SKILL.to_string()],
            executor: Some(DEFAULT_EXECUTOR.to_string()),
            reasoning: String::new(),
        }
    }
}

// ── Terminal result ─────────────────────────────────────────────────

/// Terminal status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Failed,
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What a job hands back when it stops, successful or not.
///
/// Outputs and artifacts accumulated before a failure are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobOutcome,
    pub task_id: String,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub skills_executed: Vec<String>,
    #[serde(default)]
    pub skills_skipped: Vec<String>,
    /// Skills whose final attempt failed, including optional ones.
    #[serde(default)]
    pub skills_failed: Vec<String>,
    #[serde(default)]
    pub outputs: Map<String, Value>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
}

/// Bookkeeping for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct JobTrail {
    /// Skills that ran to success, in order.
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    pub logs: Vec<String>,
}

impl JobTrail {
    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }
}

impl JobResult {
    pub fn completed(ctx: &TaskContext, trail: JobTrail) -> Self {
        Self::from_context(JobOutcome::Completed, ctx, trail, None)
    }

    pub fn failed(ctx: &TaskContext, trail: JobTrail, error: impl Into<String>) -> Self {
        Self::from_context(JobOutcome::Failed, ctx, trail, Some(error.into()))
    }

    /// A failed result for a job that never produced a usable context
    /// (bad payload, timeout, crashed worker).
    pub fn aborted(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: JobOutcome::Failed,
            task_id: task_id.into(),
            persona: None,
            skills_executed: Vec::new(),
            skills_skipped: Vec::new(),
            skills_failed: Vec::new(),
            outputs: Map::new(),
            artifacts: BTreeMap::new(),
            error: Some(error.into()),
            logs: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobOutcome::Completed
    }

    fn from_context(
        status: JobOutcome,
        ctx: &TaskContext,
        trail: JobTrail,
        error: Option<String>,
    ) -> Self {
        Self {
            status,
            task_id: ctx.task_id.clone(),
            persona: ctx.persona.clone(),
            skills_executed: trail.executed,
            skills_skipped: trail.skipped,
            skills_failed: trail.failed,
            outputs: ctx.outputs.clone(),
            artifacts: ctx.artifacts.clone(),
            error,
            logs: trail.logs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_routing_decision() {
        let decision = RoutingDecision::default();
        assert_eq!(decision.persona, "coder");
        assert_eq!(decision.skills, vec!["github_context"]);
        assert_eq!(decision.executor.as_deref(), Some("openhands"));
    }

    #[test]
    fn persona_catalog() {
        assert!(is_known_persona("breaker"));
        assert!(!is_known_persona("wizard"));
    }

    #[test]
    fn completed_result_omits_error() {
        let mut ctx = TaskContext::with_id("t-1", "x");
        ctx.outputs.insert("issue_data".into(), json!({"number": 1}));
        let result = JobResult::completed(
            &ctx,
            JobTrail {
                executed: vec!["github_context".into()],
                ..Default::default()
            },
        );

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "completed");
        assert!(json.get("error").is_none());
        assert_eq!(json["outputs"]["issue_data"]["number"], 1);
    }

    #[test]
    fn failed_result_keeps_outputs() {
        let mut ctx = TaskContext::with_id("t-2", "x");
        ctx.outputs.insert("issue_data".into(), json!({}));
        let result = JobResult::failed(&ctx, JobTrail::default(), "Deploy preview not found");

        assert!(!result.is_success());
        assert_eq!(result.error.as_deref(), Some("Deploy preview not found"));
        assert!(result.outputs.contains_key("issue_data"));
    }
}
