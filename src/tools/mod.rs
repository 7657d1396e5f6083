//! Tool clients exposed to skills.
//!
//! Each client wraps one external API behind a narrow, allowlisted set of
//! operations. Skills declare the tool names they use in `allowed_tools`.

pub mod firebase;
pub mod github;
pub mod netlify;
pub mod notion;

pub use firebase::{DocumentStore, FirebaseClient, FirestoreRest};
pub use github::GitHubClient;
pub use netlify::NetlifyClient;
pub use notion::NotionClient;

use serde::de::DeserializeOwned;

use crate::error::ToolError;

/// Tool identifiers referenced by `Skill::allowed_tools`.
pub const GITHUB: &str = "github";
pub const NETLIFY: &str = "netlify";
pub const NOTION: &str = "notion";
pub const FIREBASE: &str = "firebase";
pub const EXECUTOR: &str = "executor";

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

/// Map a transport error into a `ToolError`.
pub(crate) fn request_failed(tool: &str, err: reqwest::Error) -> ToolError {
    ToolError::RequestFailed {
        tool: tool.to_string(),
        reason: err.to_string(),
    }
}

/// Fail on a non-2xx status, otherwise decode the JSON body.
pub(crate) async fn decode_json<T: DeserializeOwned>(
    tool: &str,
    response: reqwest::Response,
) -> Result<T, ToolError> {
    let response = ensure_success(tool, response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| ToolError::InvalidResponse {
            tool: tool.to_string(),
            reason: e.to_string(),
        })
}

/// Fail on a non-2xx status.
pub(crate) async fn ensure_success(
    tool: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ToolError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body: String = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(MAX_ERROR_BODY)
        .collect();
    Err(ToolError::HttpStatus {
        tool: tool.to_string(),
        status: status.as_u16(),
        body,
    })
}

/// Read an optional, non-empty environment variable.
pub(crate) fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
