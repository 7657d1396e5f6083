//! `netlify_deploy`: locate the deploy preview for a pull request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::context::{ContextUpdate, TaskContext};
use crate::error::SkillError;
use crate::skills::{Skill, SkillResult};
use crate::tools::{self, NetlifyClient};

const MAX_WAIT: Duration = Duration::from_secs(60);

pub struct NetlifyDeploySkill {
    netlify: Arc<NetlifyClient>,
    max_wait: Duration,
}

impl NetlifyDeploySkill {
    pub fn new(netlify: Arc<NetlifyClient>) -> Self {
        Self {
            netlify,
            max_wait: MAX_WAIT,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    async fn locate(&self, ctx: &TaskContext, result: &mut SkillResult) -> Result<(), SkillError> {
        let pr_number =
            pr_number(ctx).ok_or_else(|| SkillError::MissingInput("PR number".to_string()))?;

        result.log(format!("Looking for deploy preview for PR #{pr_number}..."));
        let Some(deploy) = self
            .netlify
            .get_deploy_for_pr(pr_number, self.max_wait)
            .await?
        else {
            result.log("No deploy preview found yet");
            return Err(SkillError::Failed("Deploy preview not found".to_string()));
        };

        let url = deploy.url.clone().unwrap_or_default();
        result.log(format!("Deploy preview: {url}"));
        result.log(format!("  State: {}", deploy.state));

        result.output("deploy_url", json!(url));
        result.output("deploy_id", json!(deploy.id));
        result.output("state", json!(deploy.state));
        result.artifact("deploy_url", url);

        let slot = result.outputs.clone();
        result.update(ContextUpdate::Netlify(slot));
        result.pass("deploy_url_found");
        Ok(())
    }
}

/// PR number from a previous step's `pr_number` output, else the request.
pub(crate) fn pr_number(ctx: &TaskContext) -> Option<u64> {
    match ctx.outputs.get("pr_number") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim_start_matches('#').parse().ok(),
        _ => None,
    }
    .or_else(|| {
        ctx.pr
            .as_deref()
            .and_then(|pr| pr.trim_start_matches('#').parse().ok())
    })
}

#[async_trait]
impl Skill for NetlifyDeploySkill {
    fn name(&self) -> &str {
        "netlify_deploy"
    }

    fn description(&self) -> &str {
        "Get deploy preview URL and status for a PR"
    }

    fn inputs_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pr": {"type": "integer"},
                "pr_number": {"type": "integer"}
            }
        })
    }

    fn outputs_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "deploy_url": {"type": "string"},
                "deploy_id": {"type": "string"},
                "state": {"type": "string"}
            }
        })
    }

    fn allowed_tools(&self) -> &[&str] {
        &[tools::NETLIFY]
    }

    fn success_checks(&self) -> &[&str] {
        &["deploy_url_found"]
    }

    async fn run(&self, ctx: &TaskContext) -> SkillResult {
        let mut result = SkillResult::running();
        let outcome = self.locate(ctx, &mut result).await;
        result.finish(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::netlify::NetlifyConfig;
    use secrecy::SecretString;

    #[test]
    fn pr_number_prefers_outputs() {
        let mut ctx = TaskContext::new("x").with_pr(7);
        assert_eq!(pr_number(&ctx), Some(7));

        ctx.outputs.insert("pr_number".into(), json!(42));
        assert_eq!(pr_number(&ctx), Some(42));

        ctx.outputs.insert("pr_number".into(), json!("#43"));
        assert_eq!(pr_number(&ctx), Some(43));
    }

    #[test]
    fn pr_number_absent() {
        assert_eq!(pr_number(&TaskContext::new("x")), None);
    }

    #[tokio::test]
    async fn missing_pr_fails() {
        let client = NetlifyClient::new(NetlifyConfig {
            token: SecretString::from("t"),
            site_id: "site".into(),
            base_url: "http://127.0.0.1:9".into(),
        })
        .unwrap();
        let skill = NetlifyDeploySkill::new(Arc::new(client));

        let result = skill.run(&TaskContext::new("x")).await;
        assert_eq!(result.error.as_deref(), Some("PR number required"));
        assert!(result.outputs.is_empty());
    }
}
