//! OpenHands run API executor.

use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::error::ExecutorError;
use crate::executors::{Executor, ExecutorArtifacts, ExecutorStatus, ExecutorTask, LogStream};

const DEFAULT_URL: &str = "http://localhost:8000";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const NAME: &str = "openhands";

/// OpenHands connection settings.
#[derive(Debug, Clone)]
pub struct OpenHandsConfig {
    pub url: String,
}

impl OpenHandsConfig {
    /// Read `OPENHANDS_URL` (default `http://localhost:8000`).
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("OPENHANDS_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_URL.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct StartResponse {
    run_id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

pub struct OpenHandsExecutor {
    http: reqwest::Client,
    base_url: String,
}

impl OpenHandsExecutor {
    pub fn new(config: OpenHandsConfig) -> Result<Self, ExecutorError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(request_failed)?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_env() -> Result<Self, ExecutorError> {
        Self::new(OpenHandsConfig::from_env())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn request_failed(err: reqwest::Error) -> ExecutorError {
    ExecutorError::RequestFailed {
        executor: NAME.to_string(),
        reason: err.to_string(),
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ExecutorError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(ExecutorError::HttpStatus {
            executor: NAME.to_string(),
            status: response.status().as_u16(),
        })
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ExecutorError> {
    check_status(response)?
        .json::<T>()
        .await
        .map_err(|e| ExecutorError::InvalidResponse {
            executor: NAME.to_string(),
            reason: e.to_string(),
        })
}

/// Split a chunked byte stream into lines. A trailing partial line is
/// emitted when the stream ends.
fn byte_lines<S, B>(chunks: S) -> impl Stream<Item = Result<String, ExecutorError>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send,
{
    let state = (Box::pin(chunks), Vec::<u8>::new(), false);
    futures::stream::unfold(state, |(mut chunks, mut buffer, mut done)| async move {
        loop {
            if let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line[..pos])
                    .trim_end_matches('\r')
                    .to_string();
                return Some((Ok(text), (chunks, buffer, done)));
            }
            if done {
                if buffer.is_empty() {
                    return None;
                }
                let text = String::from_utf8_lossy(&buffer).to_string();
                buffer.clear();
                return Some((Ok(text), (chunks, buffer, done)));
            }
            match chunks.next().await {
                Some(Ok(chunk)) => buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    done = true;
                    buffer.clear();
                    return Some((Err(request_failed(e)), (chunks, buffer, done)));
                }
                None => done = true,
            }
        }
    })
}

#[async_trait]
impl Executor for OpenHandsExecutor {
    fn name(&self) -> &str {
        NAME
    }

    async fn start(&self, task: &ExecutorTask) -> Result<String, ExecutorError> {
        let response = self
            .http
            .post(self.url("/api/runs"))
            .json(&json!({
                "repository": task.repo,
                "instruction": task.instruction,
                "constraints": task.constraints,
                "branch_base": task.branch_base,
            }))
            .send()
            .await
            .map_err(request_failed)?;
        let started: StartResponse = decode(response).await?;
        tracing::info!(run_id = %started.run_id, repo = %task.repo, "OpenHands run started");
        Ok(started.run_id)
    }

    async fn get_status(&self, run_id: &str) -> Result<ExecutorStatus, ExecutorError> {
        let response = self
            .http
            .get(self.url(&format!("/api/runs/{run_id}")))
            .send()
            .await
            .map_err(request_failed)?;
        let status: StatusResponse = decode(response).await?;
        Ok(ExecutorStatus::from_backend(&status.status))
    }

    async fn stream_logs(&self, run_id: &str) -> Result<LogStream, ExecutorError> {
        let response = self
            .http
            .get(self.url(&format!("/api/runs/{run_id}/logs")))
            .send()
            .await
            .map_err(request_failed)?;
        let response = check_status(response)?;
        Ok(byte_lines(response.bytes_stream()).boxed())
    }

    async fn get_artifacts(&self, run_id: &str) -> Result<ExecutorArtifacts, ExecutorError> {
        let response = self
            .http
            .get(self.url(&format!("/api/runs/{run_id}/artifacts")))
            .send()
            .await
            .map_err(request_failed)?;
        decode(response).await
    }

    async fn cancel(&self, run_id: &str) -> bool {
        let result = self
            .http
            .post(self.url(&format!("/api/runs/{run_id}/cancel")))
            .send()
            .await
            .map_err(request_failed)
            .and_then(check_status);
        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "OpenHands cancel failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn byte_lines_splits_across_chunks() {
        let chunks = futures::stream::iter(vec![
            Ok::<_, reqwest::Error>(b"step 1\nste".to_vec()),
            Ok(b"p 2\r\n".to_vec()),
            Ok(b"done".to_vec()),
        ]);
        let lines: Vec<String> = byte_lines(chunks)
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["step 1", "step 2", "done"]);
    }

    #[tokio::test]
    async fn byte_lines_empty_stream() {
        let chunks = futures::stream::iter(Vec::<Result<Vec<u8>, reqwest::Error>>::new());
        assert_eq!(byte_lines(chunks).count().await, 0);
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let exec = OpenHandsExecutor::new(OpenHandsConfig {
            url: "http://oh:8000/".into(),
        })
        .unwrap();
        assert_eq!(exec.url("/api/runs"), "http://oh:8000/api/runs");
    }
}
