//! Netlify deploy client.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;
use crate::tools::{NETLIFY, decode_json, env_opt, request_failed};

const DEFAULT_BASE_URL: &str = "https://api.netlify.com/api/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PR_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEPLOY_POLL_INTERVAL: Duration = Duration::from_secs(10);
const PR_SCAN_LIMIT: u32 = 50;

/// Netlify client configuration.
#[derive(Debug, Clone)]
pub struct NetlifyConfig {
    pub token: SecretString,
    pub site_id: String,
    pub base_url: String,
}

impl NetlifyConfig {
    /// Read `NETLIFY_AUTH_TOKEN` and `NETLIFY_SITE_ID`.
    pub fn from_env() -> Result<Self, ToolError> {
        let token = env_opt("NETLIFY_AUTH_TOKEN").ok_or_else(|| ToolError::NotConfigured {
            tool: NETLIFY.to_string(),
            reason: "NETLIFY_AUTH_TOKEN not set".to_string(),
        })?;
        let site_id = env_opt("NETLIFY_SITE_ID").ok_or_else(|| ToolError::NotConfigured {
            tool: NETLIFY.to_string(),
            reason: "NETLIFY_SITE_ID not set".to_string(),
        })?;
        Ok(Self {
            token: SecretString::from(token),
            site_id,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }
}

/// Deploy preview located for a pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrDeploy {
    pub id: String,
    pub url: Option<String>,
    pub state: String,
    pub created_at: Option<String>,
    pub published_at: Option<String>,
}

/// Find the deploy belonging to `pr_number` in a deploy listing.
///
/// A deploy matches when its `context` carries the token `pr-<n>`
/// (case-insensitive) or its `branch` carries `pull/<n>` followed by `/` or
/// the end. `pr-1` never matches `pr-12`.
pub fn match_pr_deploy(deploys: &[Value], pr_number: u64) -> Option<PrDeploy> {
    let context_tag = format!("pr-{pr_number}");
    let branch_tag = format!("pull/{pr_number}");

    deploys.iter().find_map(|deploy| {
        let context = deploy
            .get("context")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let branch = deploy
            .get("branch")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let context_hit = has_tag(&context, &context_tag, |next| !next.is_ascii_digit());
        let branch_hit = has_tag(branch, &branch_tag, |next| next == '/');
        if !context_hit && !branch_hit {
            return None;
        }

        let field = |name: &str| deploy.get(name).and_then(Value::as_str).map(str::to_string);
        Some(PrDeploy {
            id: field("id")?,
            url: field("deploy_ssl_url").or_else(|| field("ssl_url")),
            state: field("state").unwrap_or_default(),
            created_at: field("created_at"),
            published_at: field("published_at"),
        })
    })
}

/// True when `tag` occurs in `haystack` and is followed by the end or by a
/// character accepted by `boundary`.
fn has_tag(haystack: &str, tag: &str, boundary: impl Fn(char) -> bool) -> bool {
    haystack
        .match_indices(tag)
        .any(|(at, _)| haystack[at + tag.len()..].chars().next().is_none_or(&boundary))
}

/// Netlify client bound to one site.
pub struct NetlifyClient {
    http: reqwest::Client,
    config: NetlifyConfig,
    pr_poll_interval: Duration,
    deploy_poll_interval: Duration,
}

impl NetlifyClient {
    pub fn new(config: NetlifyConfig) -> Result<Self, ToolError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| request_failed(NETLIFY, e))?;
        Ok(Self {
            http,
            config,
            pr_poll_interval: PR_POLL_INTERVAL,
            deploy_poll_interval: DEPLOY_POLL_INTERVAL,
        })
    }

    pub fn from_env() -> Result<Self, ToolError> {
        Self::new(NetlifyConfig::from_env()?)
    }

    /// Override both polling intervals.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.pr_poll_interval = interval;
        self.deploy_poll_interval = interval;
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ToolError> {
        let response = self
            .http
            .get(format!("{}{path}", self.config.base_url))
            .bearer_auth(self.config.token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| request_failed(NETLIFY, e))?;
        decode_json(NETLIFY, response).await
    }

    pub async fn get_site(&self) -> Result<Value, ToolError> {
        self.get_json(&format!("/sites/{}", self.config.site_id), &[])
            .await
    }

    pub async fn list_deploys(&self, limit: u32) -> Result<Vec<Value>, ToolError> {
        self.get_json(
            &format!("/sites/{}/deploys", self.config.site_id),
            &[("per_page", limit.to_string())],
        )
        .await
    }

    pub async fn get_deploy(&self, deploy_id: &str) -> Result<Value, ToolError> {
        self.get_json(&format!("/deploys/{deploy_id}"), &[]).await
    }

    /// Poll the deploy list for a PR's preview, every 5 s for up to `max_wait`.
    pub async fn get_deploy_for_pr(
        &self,
        pr_number: u64,
        max_wait: Duration,
    ) -> Result<Option<PrDeploy>, ToolError> {
        let interval_ms = self.pr_poll_interval.as_millis().max(1);
        let attempts = u64::try_from(max_wait.as_millis() / interval_ms)
            .unwrap_or(u64::MAX)
            .max(1);

        for attempt in 1..=attempts {
            let deploys = self.list_deploys(PR_SCAN_LIMIT).await?;
            if let Some(found) = match_pr_deploy(&deploys, pr_number) {
                tracing::debug!(pr = pr_number, deploy = %found.id, "Found deploy preview");
                return Ok(Some(found));
            }
            if attempt < attempts {
                tokio::time::sleep(self.pr_poll_interval).await;
            }
        }
        Ok(None)
    }

    pub async fn trigger_build(&self) -> Result<Value, ToolError> {
        let response = self
            .http
            .post(format!(
                "{}/sites/{}/builds",
                self.config.base_url, self.config.site_id
            ))
            .bearer_auth(self.config.token.expose_secret())
            .send()
            .await
            .map_err(|e| request_failed(NETLIFY, e))?;
        decode_json(NETLIFY, response).await
    }

    /// Poll a deploy every 10 s until it is `ready` or `error`.
    pub async fn wait_for_deploy(
        &self,
        deploy_id: &str,
        timeout: Duration,
    ) -> Result<Value, ToolError> {
        let started = tokio::time::Instant::now();
        loop {
            let deploy = self.get_deploy(deploy_id).await?;
            let state = deploy.get("state").and_then(Value::as_str).unwrap_or("");
            if matches!(state, "ready" | "error") {
                return Ok(deploy);
            }
            if started.elapsed() > timeout {
                return Err(ToolError::Timeout {
                    tool: NETLIFY.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(self.deploy_poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn matches_by_context_case_insensitive() {
        let deploys = vec![
            json!({"id": "d1", "context": "production", "state": "ready"}),
            json!({
                "id": "d2",
                "context": "deploy-preview PR-45",
                "state": "ready",
                "deploy_ssl_url": "https://pr-45--site.netlify.app",
                "created_at": "2024-01-01T00:00:00Z"
            }),
        ];
        let found = match_pr_deploy(&deploys, 45).unwrap();
        assert_eq!(found.id, "d2");
        assert_eq!(found.url.as_deref(), Some("https://pr-45--site.netlify.app"));
        assert!(found.published_at.is_none());
    }

    #[test]
    fn matches_by_branch_and_falls_back_to_ssl_url() {
        let deploys = vec![json!({
            "id": "d3",
            "branch": "refs/pull/7/head",
            "state": "building",
            "ssl_url": "https://site.netlify.app"
        })];
        let found = match_pr_deploy(&deploys, 7).unwrap();
        assert_eq!(found.url.as_deref(), Some("https://site.netlify.app"));
        assert_eq!(found.state, "building");
    }

    #[test]
    fn no_match_for_prefix_pr() {
        let deploys = vec![
            json!({"id": "d12", "context": "pr-12", "state": "ready"}),
            json!({"id": "d13", "branch": "pull/12/head", "state": "ready"}),
            json!({"id": "d14", "branch": "pull/1x", "state": "ready"}),
        ];
        assert!(match_pr_deploy(&deploys, 1).is_none());
    }

    #[test]
    fn exact_token_matches_after_prefix_lookalike() {
        let deploys = vec![
            json!({"id": "d12", "context": "pr-12", "state": "ready"}),
            json!({"id": "d1", "context": "deploy-preview pr-1", "state": "ready"}),
        ];
        assert_eq!(match_pr_deploy(&deploys, 1).unwrap().id, "d1");

        let by_branch = vec![json!({"id": "b1", "branch": "pull/1", "state": "ready"})];
        assert_eq!(match_pr_deploy(&by_branch, 1).unwrap().id, "b1");
    }

    #[test]
    fn no_match_for_other_pr() {
        let deploys = vec![json!({"id": "d1", "context": "pr-12", "state": "ready"})];
        assert!(match_pr_deploy(&deploys, 99).is_none());
    }
}
