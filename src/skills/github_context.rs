//! `github_context`: issue, related code and recent PRs.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::context::{ContextUpdate, TaskContext};
use crate::error::SkillError;
use crate::skills::{Skill, SkillResult};
use crate::tools::{self, GitHubClient};

const RECENT_PR_LIMIT: usize = 5;

pub struct GitHubContextSkill {
    github: Arc<GitHubClient>,
}

impl GitHubContextSkill {
    pub fn new(github: Arc<GitHubClient>) -> Self {
        Self { github }
    }

    async fn gather(&self, ctx: &TaskContext, result: &mut SkillResult) -> Result<(), SkillError> {
        let repo = ctx
            .repo
            .as_deref()
            .ok_or_else(|| SkillError::MissingInput("repo".to_string()))?;

        if let Some(issue) = ctx.issue.as_deref() {
            let number: u64 = issue
                .trim_start_matches('#')
                .parse()
                .map_err(|_| SkillError::Failed(format!("Invalid issue number '{issue}'")))?;

            result.log(format!("Fetching issue #{number}..."));
            let issue = self.github.get_issue(repo, number).await?;
            result.log(format!("Issue: {}", issue.title));
            let title = issue.title.clone();
            result.output("issue_data", json!(issue));
            result.pass("issue_data_fetched");

            if !title.is_empty() {
                result.log("Searching for related code...");
                let files = self.github.search_code(&title, Some(repo)).await?;
                result.log(format!("Found {} related files", files.len()));
                result.output("related_files", json!(files));
            }
        }

        result.log("Fetching recent PRs...");
        let prs = self.github.list_prs(repo, "open", RECENT_PR_LIMIT).await?;
        result.log(format!("Found {} recent PRs", prs.len()));
        result.output("recent_prs", json!(prs));

        let slot = result.outputs.clone();
        result.update(ContextUpdate::Github(slot));
        result.pass("context_gathered");
        Ok(())
    }
}

#[async_trait]
impl Skill for GitHubContextSkill {
    fn name(&self) -> &str {
        "github_context"
    }

    fn description(&self) -> &str {
        "Fetch issue/PR details, related code, and context from GitHub"
    }

    fn inputs_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo": {"type": "string"},
                "issue": {"type": "integer"}
            },
            "required": ["repo"]
        })
    }

    fn outputs_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "issue_data": {"type": "object"},
                "related_files": {"type": "array"},
                "recent_prs": {"type": "array"}
            }
        })
    }

    fn allowed_tools(&self) -> &[&str] {
        &[tools::GITHUB]
    }

    fn success_checks(&self) -> &[&str] {
        &["issue_data_fetched", "context_gathered"]
    }

    async fn run(&self, ctx: &TaskContext) -> SkillResult {
        let mut result = SkillResult::running();
        let outcome = self.gather(ctx, &mut result).await;
        result.finish(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::github::GitHubConfig;

    fn skill() -> GitHubContextSkill {
        let client = GitHubClient::new(GitHubConfig {
            token: None,
            org: "drafted".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
        })
        .unwrap();
        GitHubContextSkill::new(Arc::new(client))
    }

    #[tokio::test]
    async fn missing_repo_fails_without_network() {
        let result = skill().run(&TaskContext::new("Fix issue")).await;
        assert!(!result.is_success());
        assert_eq!(result.error.as_deref(), Some("repo required"));
    }

    #[tokio::test]
    async fn invalid_issue_number_fails() {
        let ctx = TaskContext::new("x").with_repo("drafted-web").with_issue("abc");
        let result = skill().run(&ctx).await;
        assert_eq!(result.error.as_deref(), Some("Invalid issue number 'abc'"));
    }

    #[test]
    fn declares_github_tool() {
        let s = skill();
        assert_eq!(s.allowed_tools(), &["github"]);
        assert!(s.success_checks().contains(&"context_gathered"));
    }
}
