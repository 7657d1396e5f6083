//! Job type templates: ordered steps, gates and retry policy per job kind.
//!
//! Built-in templates are merged with an optional TOML file at startup:
//!
//! ```toml
//! [[job_types]]
//! name = "issue_to_pr"
//! description = "Turn an issue into a pull request"
//! required_persona = "coder"
//!
//! [[job_types.steps]]
//! skill_name = "github_context"
//! retry_count = 1
//! timeout_seconds = 120
//!
//! [[job_types.gates]]
//! name = "pr_created"
//! condition = "pr_created"
//! required = true
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// One step of a job workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillStep {
    pub skill_name: String,
    /// Seed values the step reads from `outputs` when nothing set them yet.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// A failing optional step is logged and the job continues.
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl SkillStep {
    pub fn new(skill_name: impl Into<String>) -> Self {
        Self {
            skill_name: skill_name.into(),
            inputs: Map::new(),
            optional: false,
            retry_count: 0,
            timeout_seconds: None,
        }
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// A named check that must hold after the last step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobGate {
    pub name: String,
    /// Success check name a skill must have passed.
    pub condition: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl JobGate {
    pub fn required(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            condition: name.clone(),
            name,
            required: true,
            timeout_seconds: None,
        }
    }

    pub fn advisory(name: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name)
        }
    }
}

fn default_true() -> bool {
    true
}

/// Exponential backoff between step attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries for steps without their own `retry_count`.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff_ms as f64 * self.backoff_multiplier.max(1.0).powi(exponent);
        Duration::from_millis(millis.min(self.max_backoff_ms as f64) as u64)
    }

    /// Delay before retry number `attempt`, plus up to 25% random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter_cap = (base.as_millis() / 4) as u64;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        base + Duration::from_millis(jitter)
    }
}

/// A workflow template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobType {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_persona: Option<String>,
    #[serde(default)]
    pub steps: Vec<SkillStep>,
    #[serde(default)]
    pub gates: Vec<JobGate>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl JobType {
    /// The template step for `skill_name`, if any.
    pub fn step(&self, skill_name: &str) -> Option<&SkillStep> {
        self.steps.iter().find(|s| s.skill_name == skill_name)
    }
}

#[derive(Deserialize)]
struct JobTypeFile {
    #[serde(default)]
    job_types: Vec<JobType>,
}

/// Job type templates by name. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct JobTypeCatalog {
    types: HashMap<String, JobType>,
}

impl JobTypeCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `issue_to_pr` and `research`. Built-in gates are advisory; only
    /// operator templates can make a gate required.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.insert(JobType {
            name: "issue_to_pr".to_string(),
            description: "Gather context, implement a fix, and locate its deploy preview"
                .to_string(),
            required_persona: Some("coder".to_string()),
            steps: vec![
                SkillStep::new("github_context").with_retries(1).with_timeout(120),
                SkillStep::new("openhands_pr").with_timeout(1800),
                SkillStep::new("netlify_deploy").with_retries(1).with_timeout(300),
            ],
            gates: vec![
                JobGate::advisory("context_gathered"),
                JobGate::advisory("pr_created"),
                JobGate::advisory("tests_pass"),
            ],
            retry_policy: RetryPolicy::default(),
            metadata: Map::new(),
        });
        catalog.insert(JobType {
            name: "research".to_string(),
            description: "Evidence-first investigation without code changes".to_string(),
            required_persona: Some("researcher".to_string()),
            steps: vec![
                SkillStep::new("github_context").with_retries(1).with_timeout(120),
                SkillStep::new("notion_read").optional().with_timeout(120),
                SkillStep::new("firebase_context").optional().with_timeout(120),
            ],
            gates: vec![JobGate::advisory("context_gathered")],
            retry_policy: RetryPolicy::default(),
            metadata: Map::new(),
        });
        catalog
    }

    /// Built-ins overridden by the templates in a TOML file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut catalog = Self::builtin();
        for job_type in parse_toml(&text)? {
            tracing::info!(job_type = %job_type.name, path = %path.display(), "Loaded job type");
            catalog.insert(job_type);
        }
        Ok(catalog)
    }

    /// Insert or replace a template.
    pub fn insert(&mut self, job_type: JobType) {
        self.types.insert(job_type.name.clone(), job_type);
    }

    pub fn get(&self, name: &str) -> Option<&JobType> {
        self.types.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.keys().cloned().collect();
        names.sort();
        names
    }
}

fn parse_toml(text: &str) -> Result<Vec<JobType>, ConfigError> {
    let file: JobTypeFile =
        toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    for job_type in &file.job_types {
        if job_type.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "job_types.name".to_string(),
                message: "job type name must not be empty".to_string(),
            });
        }
    }
    Ok(file.job_types)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtins_present() {
        let catalog = JobTypeCatalog::builtin();
        assert_eq!(catalog.names(), vec!["issue_to_pr", "research"]);

        let issue = catalog.get("issue_to_pr").unwrap();
        assert_eq!(issue.step("github_context").unwrap().retry_count, 1);
        assert!(!issue.step("netlify_deploy").unwrap().optional);
        assert!(issue.step("notion_write").is_none());

        for job_type in catalog.names() {
            let template = catalog.get(&job_type).unwrap();
            assert!(template.gates.iter().all(|g| !g.required), "{job_type}");
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 300,
        };
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(300));
        assert_eq!(policy.base_delay(10), Duration::from_millis(300));

        let jittered = policy.delay(2);
        assert!(jittered >= Duration::from_millis(200));
        assert!(jittered <= Duration::from_millis(250));
    }

    #[test]
    fn load_file_overrides_builtin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[job_types]]
name = "issue_to_pr"
description = "custom"

[[job_types.steps]]
skill_name = "github_context"
optional = true
inputs = {{ include_content = false }}

[[job_types.gates]]
name = "has context"
condition = "context_gathered"

[job_types.retry_policy]
max_retries = 2

[[job_types]]
name = "summarize"
required_persona = "communicator"

[[job_types.steps]]
skill_name = "notion_write"
timeout_seconds = 30
"#
        )
        .unwrap();

        let catalog = JobTypeCatalog::load_file(file.path()).unwrap();
        let issue = catalog.get("issue_to_pr").unwrap();
        assert_eq!(issue.description, "custom");
        assert!(issue.step("github_context").unwrap().optional);
        assert_eq!(
            issue.step("github_context").unwrap().inputs["include_content"],
            false
        );
        assert!(issue.gates[0].required);
        assert_eq!(issue.retry_policy.max_retries, 2);
        assert_eq!(issue.retry_policy.initial_backoff_ms, 1_000);

        let summarize = catalog.get("summarize").unwrap();
        assert_eq!(summarize.step("notion_write").unwrap().timeout_seconds, Some(30));
        assert!(catalog.get("research").is_some());
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let result = parse_toml("[[job_types]]\nname = ");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn empty_name_rejected() {
        let result = parse_toml("[[job_types]]\nname = \"  \"\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
