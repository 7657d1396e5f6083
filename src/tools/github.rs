//! GitHub REST client.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::tools::{GITHUB, decode_json, ensure_success, env_opt, request_failed};

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const DEFAULT_ORG: &str = "drafted";
const USER_AGENT: &str = "agent-brain";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_SEARCH_RESULTS: usize = 10;

/// GitHub client configuration.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub token: Option<SecretString>,
    /// Owner used when a repo is given without one.
    pub org: String,
    pub base_url: String,
}

impl GitHubConfig {
    /// Read `GITHUB_TOKEN` and `GITHUB_ORG` (default `drafted`).
    pub fn from_env() -> Self {
        Self {
            token: env_opt("GITHUB_TOKEN").map(SecretString::from),
            org: env_opt("GITHUB_ORG").unwrap_or_else(|| DEFAULT_ORG.to_string()),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Issue summary returned to skills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub url: String,
}

/// A code search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeHit {
    pub path: String,
    pub repo: String,
    pub url: String,
    pub sha: String,
}

/// Pull request summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub url: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct WireIssue {
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    #[serde(default)]
    labels: Vec<WireLabel>,
    #[serde(default)]
    assignees: Vec<WireUser>,
    created_at: String,
    updated_at: String,
    html_url: String,
}

#[derive(Deserialize)]
struct WireLabel {
    name: String,
}

#[derive(Deserialize)]
struct WireUser {
    login: String,
}

#[derive(Deserialize)]
struct WireSearch {
    #[serde(default)]
    items: Vec<WireCodeItem>,
}

#[derive(Deserialize)]
struct WireCodeItem {
    path: String,
    sha: String,
    html_url: String,
    repository: WireRepository,
}

#[derive(Deserialize)]
struct WireRepository {
    name: String,
}

#[derive(Deserialize)]
struct WirePull {
    number: u64,
    title: String,
    state: String,
    html_url: String,
    user: Option<WireUser>,
    created_at: Option<String>,
}

impl From<WirePull> for PullRequest {
    fn from(pr: WirePull) -> Self {
        Self {
            number: pr.number,
            title: pr.title,
            state: pr.state,
            url: pr.html_url,
            author: pr.user.map(|u| u.login),
            created_at: pr.created_at,
        }
    }
}

/// Thin GitHub client scoped to one organisation.
pub struct GitHubClient {
    http: reqwest::Client,
    config: GitHubConfig,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Result<Self, ToolError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| request_failed(GITHUB, e))?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> Result<Self, ToolError> {
        Self::new(GitHubConfig::from_env())
    }

    /// `owner/name`, prefixing the configured org when the repo has no owner.
    pub fn full_repo(&self, repo: &str) -> String {
        if repo.contains('/') {
            repo.to_string()
        } else {
            format!("{}/{}", self.config.org, repo)
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.request_as(method, path, "application/vnd.github+json")
    }

    /// reqwest appends headers, so the media type is set exactly once here.
    fn request_as(
        &self,
        method: reqwest::Method,
        path: &str,
        accept: &str,
    ) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{path}", self.config.base_url))
            .header("Accept", accept);
        match &self.config.token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    pub async fn get_issue(&self, repo: &str, issue_number: u64) -> Result<Issue, ToolError> {
        let path = format!("/repos/{}/issues/{issue_number}", self.full_repo(repo));
        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| request_failed(GITHUB, e))?;
        let issue: WireIssue = decode_json(GITHUB, response).await?;

        Ok(Issue {
            number: issue.number,
            title: issue.title,
            body: issue.body,
            state: issue.state,
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            assignees: issue.assignees.into_iter().map(|u| u.login).collect(),
            created_at: issue.created_at,
            updated_at: issue.updated_at,
            url: issue.html_url,
        })
    }

    /// Search code in one repo, or across the org when `repo` is `None`.
    pub async fn search_code(
        &self,
        query: &str,
        repo: Option<&str>,
    ) -> Result<Vec<CodeHit>, ToolError> {
        let scope = match repo {
            Some(repo) => format!("repo:{}", self.full_repo(repo)),
            None => format!("org:{}", self.config.org),
        };
        let q = format!("{query} {scope}");
        let response = self
            .request(reqwest::Method::GET, "/search/code")
            .query(&[("q", q.as_str()), ("per_page", "10")])
            .send()
            .await
            .map_err(|e| request_failed(GITHUB, e))?;
        let search: WireSearch = decode_json(GITHUB, response).await?;

        Ok(search
            .items
            .into_iter()
            .take(MAX_SEARCH_RESULTS)
            .map(|item| CodeHit {
                path: item.path,
                repo: item.repository.name,
                url: item.html_url,
                sha: item.sha,
            })
            .collect())
    }

    /// Fetch a file's raw contents at `git_ref`.
    pub async fn get_file(&self, repo: &str, path: &str, git_ref: &str) -> Result<String, ToolError> {
        let url_path = format!("/repos/{}/contents/{path}", self.full_repo(repo));
        let response = self
            .request_as(
                reqwest::Method::GET,
                &url_path,
                "application/vnd.github.raw+json",
            )
            .query(&[("ref", git_ref)])
            .send()
            .await
            .map_err(|e| request_failed(GITHUB, e))?;
        let response = ensure_success(GITHUB, response).await?;

        // Directories come back as a JSON listing even with the raw media type.
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));
        let text = response.text().await.map_err(|e| request_failed(GITHUB, e))?;
        if is_json && text.trim_start().starts_with('[') {
            return Err(ToolError::InvalidResponse {
                tool: GITHUB.to_string(),
                reason: format!("Path {path} is a directory, not a file"),
            });
        }
        Ok(text)
    }

    pub async fn list_prs(
        &self,
        repo: &str,
        state: &str,
        limit: usize,
    ) -> Result<Vec<PullRequest>, ToolError> {
        let path = format!("/repos/{}/pulls", self.full_repo(repo));
        let per_page = limit.to_string();
        let response = self
            .request(reqwest::Method::GET, &path)
            .query(&[("state", state), ("per_page", per_page.as_str())])
            .send()
            .await
            .map_err(|e| request_failed(GITHUB, e))?;
        let pulls: Vec<WirePull> = decode_json(GITHUB, response).await?;

        Ok(pulls.into_iter().take(limit).map(PullRequest::from).collect())
    }

    pub async fn create_pr(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest, ToolError> {
        let path = format!("/repos/{}/pulls", self.full_repo(repo));
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&serde_json::json!({
                "title": title,
                "body": body,
                "head": head,
                "base": base,
            }))
            .send()
            .await
            .map_err(|e| request_failed(GITHUB, e))?;
        let pr: WirePull = decode_json(GITHUB, response).await?;

        tracing::info!(repo = %repo, pr = pr.number, "Created pull request");
        Ok(pr.into())
    }

    /// Comment on an issue or pull request.
    pub async fn add_comment(
        &self,
        repo: &str,
        issue_number: u64,
        comment: &str,
    ) -> Result<(), ToolError> {
        let path = format!(
            "/repos/{}/issues/{issue_number}/comments",
            self.full_repo(repo)
        );
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&serde_json::json!({ "body": comment }))
            .send()
            .await
            .map_err(|e| request_failed(GITHUB, e))?;
        ensure_success(GITHUB, response).await?;
        Ok(())
    }
}
