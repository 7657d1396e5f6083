//! `openhands_pr`: run a code change on an executor and collect the PR.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};

use crate::context::TaskContext;
use crate::error::{ExecutorError, SkillError};
use crate::executors::{Executor, ExecutorRegistry, ExecutorStatus, ExecutorTask};
use crate::skills::{Skill, SkillResult};
use crate::tools;

const POLL_INTERVAL: Duration = Duration::from_secs(10);
const MAX_WAIT: Duration = Duration::from_secs(1500);
const CANCEL_GRACE: Duration = Duration::from_secs(120);
const BRANCH_BASE: &str = "main";

static PR_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/pull/(\d+)").expect("PR number pattern is valid"));

/// PR number from a pull request URL.
pub fn pr_number_from_url(url: &str) -> Option<u64> {
    PR_NUMBER
        .captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub struct CodeChangeSkill {
    executors: Arc<ExecutorRegistry>,
    poll_interval: Duration,
    max_wait: Duration,
    /// How long to keep polling after the backend refuses a cancel.
    cancel_grace: Duration,
}

impl CodeChangeSkill {
    pub fn new(executors: Arc<ExecutorRegistry>) -> Self {
        Self {
            executors,
            poll_interval: POLL_INTERVAL,
            max_wait: MAX_WAIT,
            cancel_grace: CANCEL_GRACE,
        }
    }

    pub fn with_polling(mut self, poll_interval: Duration, max_wait: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.max_wait = max_wait;
        self
    }

    pub fn with_cancel_grace(mut self, cancel_grace: Duration) -> Self {
        self.cancel_grace = cancel_grace;
        self
    }

    async fn execute(&self, ctx: &TaskContext, result: &mut SkillResult) -> Result<(), SkillError> {
        let executor = self
            .executors
            .get(ctx.executor.as_deref())
            .ok_or_else(|| ExecutorError::NotFound {
                name: ctx
                    .executor
                    .clone()
                    .unwrap_or_else(|| "<default>".to_string()),
            })?;
        let repo = ctx
            .repo
            .clone()
            .ok_or_else(|| SkillError::MissingInput("repo".to_string()))?;

        let task = ExecutorTask {
            repo,
            instruction: ctx.request.clone(),
            constraints: ctx.constraints.clone(),
            branch_base: BRANCH_BASE.to_string(),
        };
        let run_id = executor.start(&task).await?;
        result.log(format!("Started {} run {run_id}", executor.name()));
        result.output("run_id", json!(run_id));

        let status = self.wait_for_run(executor.as_ref(), &run_id, result).await?;
        if status != ExecutorStatus::Completed {
            return Err(SkillError::Failed(format!(
                "Executor run {run_id} ended with status {status}"
            )));
        }

        let artifacts = executor.get_artifacts(&run_id).await?;
        for line in &artifacts.logs {
            result.log(line.clone());
        }

        if let Some(pr_url) = &artifacts.pr_url {
            result.log(format!("PR: {pr_url}"));
            result.output("pr_url", json!(pr_url));
            result.artifact("pr_url", pr_url.clone());
            if let Some(number) = pr_number_from_url(pr_url) {
                result.output("pr_number", json!(number));
            }
            result.pass("pr_created");
        }
        if let Some(deploy_url) = &artifacts.deploy_url {
            result.artifact("deploy_url", deploy_url.clone());
        }
        if let Some(patch) = &artifacts.patch {
            result.output("patch", json!(patch));
        }
        result.output("files_changed", json!(artifacts.files_changed));
        if let Some(report) = &artifacts.test_report {
            if tests_passed(report) {
                result.pass("tests_pass");
            }
            result.output("test_report", report.clone());
        }
        Ok(())
    }

    /// Poll until the run is terminal. On expiry, request a cancel. A refused
    /// cancel means the run may still finish, so polling continues for
    /// `cancel_grace` and a terminal status reached then is reported.
    async fn wait_for_run(
        &self,
        executor: &dyn Executor,
        run_id: &str,
        result: &mut SkillResult,
    ) -> Result<ExecutorStatus, SkillError> {
        if let Some(status) = self.poll_until(executor, run_id, self.max_wait, result).await? {
            return Ok(status);
        }

        let timed_out = || {
            SkillError::Failed(format!(
                "Executor run {run_id} did not finish within {}s",
                self.max_wait.as_secs()
            ))
        };
        if executor.cancel(run_id).await {
            result.log(format!("Cancelled run {run_id}"));
            return Err(timed_out());
        }

        tracing::warn!(run_id = %run_id, "Executor refused cancel, still polling");
        result.log(format!("Cancel of run {run_id} was refused, still polling"));
        match self.poll_until(executor, run_id, self.cancel_grace, result).await? {
            Some(status) => Ok(status),
            None => Err(timed_out()),
        }
    }

    /// Poll status until terminal (`Some`) or until `limit` passes (`None`).
    async fn poll_until(
        &self,
        executor: &dyn Executor,
        run_id: &str,
        limit: Duration,
        result: &mut SkillResult,
    ) -> Result<Option<ExecutorStatus>, SkillError> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let status = executor.get_status(run_id).await?;
            if status.is_terminal() {
                result.log(format!("Run {run_id} {status}"));
                return Ok(Some(status));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn tests_passed(report: &Value) -> bool {
    report.get("passed").and_then(Value::as_bool).unwrap_or(false)
        || report.get("status").and_then(Value::as_str) == Some("passed")
}

#[async_trait]
impl Skill for CodeChangeSkill {
    fn name(&self) -> &str {
        "openhands_pr"
    }

    fn description(&self) -> &str {
        "Execute code changes and open a PR (uses the routed executor)"
    }

    fn inputs_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo": {"type": "string"},
                "request": {"type": "string"},
                "constraints": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["repo", "request"]
        })
    }

    fn outputs_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "run_id": {"type": "string"},
                "pr_url": {"type": "string"},
                "pr_number": {"type": "integer"},
                "patch": {"type": "string"},
                "files_changed": {"type": "array"},
                "test_report": {"type": "object"}
            }
        })
    }

    fn allowed_tools(&self) -> &[&str] {
        &[tools::EXECUTOR]
    }

    fn success_checks(&self) -> &[&str] {
        &["pr_created", "tests_pass"]
    }

    async fn run(&self, ctx: &TaskContext) -> SkillResult {
        let mut result = SkillResult::running();
        let outcome = self.execute(ctx, &mut result).await;
        result.finish(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::{ExecutorArtifacts, LogStream};
    use futures::StreamExt;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports `statuses` in order, then repeats the last one. Once a cancel
    /// was requested, reports `after_cancel` instead when set.
    struct ScriptedExecutor {
        statuses: Vec<ExecutorStatus>,
        polls: AtomicUsize,
        cancelled: AtomicUsize,
        accept_cancel: bool,
        after_cancel: Option<ExecutorStatus>,
        started: Mutex<Option<ExecutorTask>>,
        artifacts: ExecutorArtifacts,
    }

    impl ScriptedExecutor {
        fn new(statuses: Vec<ExecutorStatus>, artifacts: ExecutorArtifacts) -> Self {
            Self {
                statuses,
                polls: AtomicUsize::new(0),
                cancelled: AtomicUsize::new(0),
                accept_cancel: true,
                after_cancel: None,
                started: Mutex::new(None),
                artifacts,
            }
        }

        fn refusing_cancel(mut self, after_cancel: Option<ExecutorStatus>) -> Self {
            self.accept_cancel = false;
            self.after_cancel = after_cancel;
            self
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        fn name(&self) -> &str {
            "openhands"
        }
        async fn start(&self, task: &ExecutorTask) -> Result<String, ExecutorError> {
            *self.started.lock().unwrap() = Some(task.clone());
            Ok("run-42".into())
        }
        async fn get_status(&self, _run_id: &str) -> Result<ExecutorStatus, ExecutorError> {
            let i = self.polls.fetch_add(1, Ordering::SeqCst);
            if self.cancelled.load(Ordering::SeqCst) > 0 {
                if let Some(status) = self.after_cancel {
                    return Ok(status);
                }
            }
            Ok(*self
                .statuses
                .get(i)
                .or(self.statuses.last())
                .unwrap_or(&ExecutorStatus::Running))
        }
        async fn stream_logs(&self, _run_id: &str) -> Result<LogStream, ExecutorError> {
            Ok(futures::stream::empty().boxed())
        }
        async fn get_artifacts(&self, _run_id: &str) -> Result<ExecutorArtifacts, ExecutorError> {
            Ok(self.artifacts.clone())
        }
        async fn cancel(&self, _run_id: &str) -> bool {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
            self.accept_cancel
        }
    }

    fn skill_with(executor: Arc<ScriptedExecutor>) -> CodeChangeSkill {
        let mut registry = ExecutorRegistry::new();
        registry.register(executor, true);
        CodeChangeSkill::new(Arc::new(registry))
            .with_polling(Duration::from_millis(1), Duration::from_millis(50))
            .with_cancel_grace(Duration::from_millis(50))
    }

    fn ctx() -> TaskContext {
        TaskContext::new("Fix the mobile layout bug")
            .with_repo("drafted-web")
            .with_constraints(vec!["add tests".into()])
    }

    #[test]
    fn extracts_pr_number() {
        assert_eq!(
            pr_number_from_url("https://github.com/drafted/web/pull/128"),
            Some(128)
        );
        assert_eq!(pr_number_from_url("https://github.com/drafted/web"), None);
    }

    #[tokio::test]
    async fn completed_run_collects_artifacts() {
        let executor = Arc::new(ScriptedExecutor::new(
            vec![ExecutorStatus::Queued, ExecutorStatus::Running, ExecutorStatus::Completed],
            ExecutorArtifacts {
                pr_url: Some("https://github.com/drafted/web/pull/77".into()),
                deploy_url: Some("https://pr-77.netlify.app".into()),
                files_changed: vec!["src/App.tsx".into()],
                test_report: Some(json!({"passed": true})),
                ..Default::default()
            },
        ));
        let result = skill_with(executor.clone()).run(&ctx()).await;

        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.outputs["pr_number"], 77);
        assert_eq!(result.outputs["run_id"], "run-42");
        assert_eq!(result.artifacts["deploy_url"], "https://pr-77.netlify.app");
        assert_eq!(result.passed_checks, vec!["pr_created", "tests_pass"]);

        let task = executor.started.lock().unwrap().clone().unwrap();
        assert_eq!(task.instruction, "Fix the mobile layout bug");
        assert_eq!(task.branch_base, "main");
        assert_eq!(task.constraints, vec!["add tests"]);
    }

    #[tokio::test]
    async fn failed_run_fails_skill() {
        let executor = Arc::new(ScriptedExecutor::new(
            vec![ExecutorStatus::Failed],
            ExecutorArtifacts::default(),
        ));
        let result = skill_with(executor).run(&ctx()).await;
        assert_eq!(
            result.error.as_deref(),
            Some("Executor run run-42 ended with status failed")
        );
        assert_eq!(result.outputs["run_id"], "run-42");
    }

    #[tokio::test]
    async fn expired_run_is_cancelled() {
        let executor = Arc::new(ScriptedExecutor::new(
            vec![ExecutorStatus::Running],
            ExecutorArtifacts::default(),
        ));
        let result = skill_with(executor.clone()).run(&ctx()).await;

        assert!(!result.is_success());
        assert!(result.error.unwrap().contains("did not finish"));
        assert_eq!(executor.cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refused_cancel_keeps_polling_and_collects_pr() {
        let executor = Arc::new(
            ScriptedExecutor::new(
                vec![ExecutorStatus::Running],
                ExecutorArtifacts {
                    pr_url: Some("https://github.com/drafted/web/pull/91".into()),
                    ..Default::default()
                },
            )
            .refusing_cancel(Some(ExecutorStatus::Completed)),
        );
        let result = skill_with(executor.clone()).run(&ctx()).await;

        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(executor.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(result.outputs["pr_number"], 91);
        assert!(
            result
                .logs
                .contains(&"Cancel of run run-42 was refused, still polling".to_string())
        );
        assert!(result.logs.contains(&"Run run-42 completed".to_string()));
    }

    #[tokio::test]
    async fn refused_cancel_fails_after_grace() {
        let executor = Arc::new(
            ScriptedExecutor::new(vec![ExecutorStatus::Running], ExecutorArtifacts::default())
                .refusing_cancel(None),
        );
        let result = skill_with(executor.clone()).run(&ctx()).await;

        assert!(!result.is_success());
        assert!(result.error.unwrap().contains("did not finish"));
        assert_eq!(executor.cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_executor_fails() {
        let executor = Arc::new(ScriptedExecutor::new(vec![], ExecutorArtifacts::default()));
        let mut ctx = ctx();
        ctx.executor = Some("codex".into());
        let result = skill_with(executor).run(&ctx).await;
        assert_eq!(result.error.as_deref(), Some("Executor codex not registered"));
    }
}
