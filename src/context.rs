//! Task context: the per-job record threaded through routing and skill execution.
//!
//! Every collection field is initialised eagerly, both by the constructors and
//! when deserialising from a flat mapping, so readers never need a null check.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::PipelineError;

/// Job type used when a submission does not name one.
pub const DEFAULT_JOB_TYPE: &str = "issue_to_pr";

/// Lifecycle state of a task inside the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue.
    #[default]
    Queued,
    /// Router is choosing persona, skills and executor.
    Routing,
    /// A skill step is running (`current_step` names it).
    Executing,
    /// All steps ran; job gates are being checked.
    Gating,
    /// Terminal: every step and required gate succeeded.
    Completed,
    /// Terminal: a step, gate or the pipeline itself failed.
    Failed,
}

impl TaskStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        if self.is_terminal() {
            return false;
        }

        matches!(
            (self, target),
            (Queued, Routing)
                | (Routing, Executing)
                | (Routing, Gating)
                | (Executing, Executing)
                | (Executing, Gating)
                | (Gating, Completed)
                | (_, Failed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Routing => "routing",
            Self::Executing => "executing",
            Self::Gating => "gating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A write to one of the per-integration context slots.
///
/// Skills see the context read-only and hand these back in their result;
/// the pipeline applies them after the step finishes.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextUpdate {
    Github(Map<String, Value>),
    Netlify(Map<String, Value>),
    Firebase(Map<String, Value>),
    Metadata { key: String, value: Value },
}

/// Context for one agent job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    /// Opaque unique id, assigned at creation.
    pub task_id: String,
    #[serde(default = "default_job_type", deserialize_with = "null_as_job_type")]
    pub job_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub request: String,

    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub repo: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub issue: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub pr: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub constraints: Vec<String>,

    // Routing: written once by the pipeline after the router decides.
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub skills: Vec<String>,
    #[serde(default)]
    pub executor: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub status: TaskStatus,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub outputs: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub artifacts: BTreeMap<String, String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub github_context: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub netlify_context: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub firebase_context: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Map<String, Value>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl TaskContext {
    /// Create a new context with a freshly generated task id.
    pub fn new(request: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), request)
    }

    /// Create a new context with an explicit task id.
    pub fn with_id(task_id: impl Into<String>, request: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            job_type: DEFAULT_JOB_TYPE.to_string(),
            request: request.into(),
            repo: None,
            issue: None,
            pr: None,
            constraints: Vec::new(),
            persona: None,
            skills: Vec::new(),
            executor: None,
            status: TaskStatus::Queued,
            current_step: None,
            outputs: Map::new(),
            artifacts: BTreeMap::new(),
            github_context: Map::new(),
            netlify_context: Map::new(),
            firebase_context: Map::new(),
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = job_type.into();
        self
    }

    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    pub fn with_issue(mut self, issue: impl ToString) -> Self {
        self.issue = Some(issue.to_string());
        self
    }

    pub fn with_pr(mut self, pr: impl ToString) -> Self {
        self.pr = Some(pr.to_string());
        self
    }

    pub fn with_constraints(mut self, constraints: Vec<String>) -> Self {
        self.constraints = constraints;
        self
    }

    /// Build a context from a flat JSON mapping (the queue payload format).
    ///
    /// Omitted or `null` collection fields become empty containers.
    pub fn from_mapping(mapping: Map<String, Value>) -> Result<Self, PipelineError> {
        serde_json::from_value(Value::Object(mapping))
            .map_err(|e| PipelineError::InvalidContext(e.to_string()))
    }

    /// Serialize into a flat JSON mapping.
    pub fn to_mapping(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Whether the router decision has already been written.
    pub fn is_routed(&self) -> bool {
        self.persona.is_some()
    }

    /// Record the routing decision. Fails if routing was already set.
    pub fn set_routing(
        &mut self,
        persona: impl Into<String>,
        skills: Vec<String>,
        executor: Option<String>,
    ) -> Result<(), PipelineError> {
        if self.is_routed() {
            return Err(PipelineError::RoutingAlreadySet {
                task_id: self.task_id.clone(),
            });
        }
        self.persona = Some(persona.into());
        self.skills = skills;
        self.executor = executor;
        self.touch();
        Ok(())
    }

    /// Transition to a new state, optionally naming the current step.
    pub fn transition_to(
        &mut self,
        status: TaskStatus,
        step: Option<String>,
    ) -> Result<(), PipelineError> {
        if !self.status.can_transition_to(status) {
            return Err(PipelineError::InvalidTransition {
                task_id: self.task_id.clone(),
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        self.status = status;
        self.current_step = step;
        self.touch();
        Ok(())
    }

    /// Merge skill outputs. Keys are only inserted or overwritten.
    pub fn merge_outputs(&mut self, outputs: Map<String, Value>) {
        for (key, value) in outputs {
            self.outputs.insert(key, value);
        }
        self.touch();
    }

    /// Merge skill artifacts. Keys are only inserted or overwritten.
    pub fn merge_artifacts(&mut self, artifacts: BTreeMap<String, String>) {
        self.artifacts.extend(artifacts);
        self.touch();
    }

    /// Apply a context slot write produced by a skill.
    pub fn apply_update(&mut self, update: ContextUpdate) {
        match update {
            ContextUpdate::Github(map) => self.github_context = map,
            ContextUpdate::Netlify(map) => self.netlify_context = map,
            ContextUpdate::Firebase(map) => self.firebase_context = map,
            ContextUpdate::Metadata { key, value } => {
                self.metadata.insert(key, value);
            }
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn default_job_type() -> String {
    DEFAULT_JOB_TYPE.to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_job_type<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.is_empty())
        .unwrap_or_else(default_job_type))
}

/// Accepts a string, a number, or null (issue and PR numbers arrive either way).
fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn from_mapping_defaults_collections_to_empty() {
        let ctx = TaskContext::from_mapping(mapping(json!({
            "task_id": "t-1",
            "request": "Fix issue #123"
        })))
        .unwrap();

        assert!(ctx.outputs.is_empty());
        assert!(ctx.artifacts.is_empty());
        assert!(ctx.constraints.is_empty());
        assert!(ctx.skills.is_empty());
        assert!(ctx.metadata.is_empty());
        assert!(ctx.github_context.is_empty());
        assert_eq!(ctx.job_type, DEFAULT_JOB_TYPE);
        assert_eq!(ctx.status, TaskStatus::Queued);
    }

    #[test]
    fn from_mapping_treats_null_collections_as_empty() {
        let ctx = TaskContext::from_mapping(mapping(json!({
            "task_id": "t-2",
            "request": "x",
            "constraints": null,
            "skills": null,
            "outputs": null,
            "artifacts": null,
            "metadata": null,
            "job_type": null
        })))
        .unwrap();

        assert!(ctx.constraints.is_empty());
        assert!(ctx.skills.is_empty());
        assert!(ctx.outputs.is_empty());
        assert!(ctx.artifacts.is_empty());
        assert!(ctx.metadata.is_empty());
        assert_eq!(ctx.job_type, DEFAULT_JOB_TYPE);
    }

    #[test]
    fn from_mapping_accepts_numeric_issue_and_pr() {
        let ctx = TaskContext::from_mapping(mapping(json!({
            "task_id": "t-3",
            "request": "x",
            "repo": "drafted-web",
            "issue": 123,
            "pr": "45"
        })))
        .unwrap();

        assert_eq!(ctx.issue.as_deref(), Some("123"));
        assert_eq!(ctx.pr.as_deref(), Some("45"));
        assert_eq!(ctx.repo.as_deref(), Some("drafted-web"));
    }

    #[test]
    fn from_mapping_requires_task_id() {
        let result = TaskContext::from_mapping(mapping(json!({"request": "x"})));
        assert!(matches!(result, Err(PipelineError::InvalidContext(_))));
    }

    #[test]
    fn mapping_roundtrip_preserves_fields() {
        let ctx = TaskContext::with_id("t-4", "Add tests")
            .with_repo("drafted-web")
            .with_issue(7)
            .with_constraints(vec!["no breaking changes".into()]);
        let back = TaskContext::from_mapping(ctx.to_mapping()).unwrap();

        assert_eq!(back.task_id, "t-4");
        assert_eq!(back.issue.as_deref(), Some("7"));
        assert_eq!(back.constraints, vec!["no breaking changes".to_string()]);
        assert!(back.outputs.is_empty());
    }

    #[test]
    fn routing_is_written_once() {
        let mut ctx = TaskContext::new("x");
        ctx.set_routing("coder", vec!["github_context".into()], None)
            .unwrap();
        let second = ctx.set_routing("researcher", vec![], None);
        assert!(matches!(second, Err(PipelineError::RoutingAlreadySet { .. })));
        assert_eq!(ctx.persona.as_deref(), Some("coder"));
    }

    #[test]
    fn state_transitions_valid() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Routing));
        assert!(TaskStatus::Routing.can_transition_to(TaskStatus::Executing));
        assert!(TaskStatus::Executing.can_transition_to(TaskStatus::Executing));
        assert!(TaskStatus::Executing.can_transition_to(TaskStatus::Gating));
        assert!(TaskStatus::Gating.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Executing.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Executing));
        assert!(!TaskStatus::Executing.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Routing));
    }

    #[test]
    fn transition_records_current_step() {
        let mut ctx = TaskContext::new("x");
        ctx.transition_to(TaskStatus::Routing, None).unwrap();
        ctx.transition_to(TaskStatus::Executing, Some("github_context".into()))
            .unwrap();
        assert_eq!(ctx.current_step.as_deref(), Some("github_context"));

        let err = ctx.transition_to(TaskStatus::Completed, None);
        assert!(matches!(err, Err(PipelineError::InvalidTransition { .. })));
    }

    #[test]
    fn merge_overwrites_but_never_removes() {
        let mut ctx = TaskContext::new("x");
        ctx.merge_outputs(mapping(json!({"a": 1, "b": 2})));
        ctx.merge_outputs(mapping(json!({"b": 3})));

        assert_eq!(ctx.outputs["a"], 1);
        assert_eq!(ctx.outputs["b"], 3);
    }

    #[test]
    fn apply_update_writes_slots() {
        let mut ctx = TaskContext::new("x");
        ctx.apply_update(ContextUpdate::Github(mapping(json!({"issue_data": {}}))));
        ctx.apply_update(ContextUpdate::Metadata {
            key: "notion_context".into(),
            value: json!({"pages": []}),
        });

        assert!(ctx.github_context.contains_key("issue_data"));
        assert!(ctx.metadata.contains_key("notion_context"));
    }

    #[test]
    fn task_status_serde() {
        let json = serde_json::to_string(&TaskStatus::Gating).unwrap();
        assert_eq!(json, "\"gating\"");
        assert_eq!(TaskStatus::Executing.to_string(), "executing");
    }
}
