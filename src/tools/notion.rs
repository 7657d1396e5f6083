//! Notion API client.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ToolError;
use crate::tools::{NOTION, decode_json, env_opt, request_failed};

const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const UNTITLED: &str = "Untitled";
const TITLE_KEYS: [&str; 4] = ["title", "Title", "Name", "name"];

/// Notion client configuration.
#[derive(Debug, Clone)]
pub struct NotionConfig {
    pub token: SecretString,
    /// Parent for pages created without an explicit parent.
    pub root_page_id: Option<String>,
    pub base_url: String,
}

impl NotionConfig {
    /// Read `NOTION_TOKEN` and `NOTION_ROOT_PAGE_ID`.
    pub fn from_env() -> Result<Self, ToolError> {
        let token = env_opt("NOTION_TOKEN").ok_or_else(|| ToolError::NotConfigured {
            tool: NOTION.to_string(),
            reason: "NOTION_TOKEN not set".to_string(),
        })?;
        Ok(Self {
            token: SecretString::from(token),
            root_page_id: env_opt("NOTION_ROOT_PAGE_ID"),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }
}

/// Search hit (page or database).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub url: Option<String>,
    pub last_edited: Option<String>,
}

/// Page metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    pub created_time: Option<String>,
    pub last_edited_time: Option<String>,
    pub properties: Value,
}

/// A page created by `create_page`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedPage {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
}

/// A database row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseEntry {
    pub id: String,
    pub properties: Value,
    pub url: Option<String>,
}

#[derive(Deserialize)]
struct ResultList {
    #[serde(default)]
    results: Vec<Value>,
}

/// Title of a page or database, or `"Untitled"`.
pub fn extract_title(obj: &Value) -> String {
    let Some(properties) = obj.get("properties") else {
        return UNTITLED.to_string();
    };
    for key in TITLE_KEYS {
        let Some(prop) = properties.get(key) else {
            continue;
        };
        if prop.get("type").and_then(Value::as_str) != Some("title") {
            continue;
        }
        if let Some(first) = prop
            .get("title")
            .and_then(Value::as_array)
            .and_then(|t| t.first())
        {
            return first
                .get("plain_text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
        }
    }
    UNTITLED.to_string()
}

/// Plain text of a block's `rich_text`, empty for other block shapes.
pub fn extract_block_text(block: &Value) -> String {
    let Some(kind) = block.get("type").and_then(Value::as_str) else {
        return String::new();
    };
    block
        .get(kind)
        .and_then(|data| data.get("rich_text"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|rt| rt.get("plain_text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Build a paragraph block holding `text`.
pub fn paragraph_block(text: &str) -> Value {
    json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": {
            "rich_text": [{"type": "text", "text": {"content": text}}]
        }
    })
}

/// Build a level-2 heading block.
pub fn heading_block(text: &str) -> Value {
    json!({
        "object": "block",
        "type": "heading_2",
        "heading_2": {
            "rich_text": [{"type": "text", "text": {"content": text}}]
        }
    })
}

fn str_field(obj: &Value, name: &str) -> Option<String> {
    obj.get(name).and_then(Value::as_str).map(str::to_string)
}

/// Notion client using an integration token.
pub struct NotionClient {
    http: reqwest::Client,
    config: NotionConfig,
}

impl NotionClient {
    pub fn new(config: NotionConfig) -> Result<Self, ToolError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| request_failed(NOTION, e))?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> Result<Self, ToolError> {
        Self::new(NotionConfig::from_env()?)
    }

    pub fn root_page_id(&self) -> Option<&str> {
        self.config.root_page_id.as_deref()
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ToolError> {
        let mut builder = self
            .http
            .request(method, format!("{}{path}", self.config.base_url))
            .bearer_auth(self.config.token.expose_secret())
            .header("Notion-Version", NOTION_VERSION);
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder.send().await.map_err(|e| request_failed(NOTION, e))?;
        decode_json(NOTION, response).await
    }

    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>, ToolError> {
        let body = json!({ "query": query, "page_size": limit });
        let list: ResultList = serde_json::from_value(
            self.send(reqwest::Method::POST, "/search", Some(body)).await?,
        )
        .map_err(|e| invalid(e.to_string()))?;

        Ok(list
            .results
            .iter()
            .filter_map(|item| {
                Some(SearchHit {
                    id: str_field(item, "id")?,
                    kind: str_field(item, "object").unwrap_or_default(),
                    title: extract_title(item),
                    url: str_field(item, "url"),
                    last_edited: str_field(item, "last_edited_time"),
                })
            })
            .collect())
    }

    pub async fn get_page(&self, page_id: &str) -> Result<Page, ToolError> {
        let page = self
            .send(reqwest::Method::GET, &format!("/pages/{page_id}"), None)
            .await?;
        Ok(Page {
            id: str_field(&page, "id").unwrap_or_else(|| page_id.to_string()),
            title: extract_title(&page),
            url: str_field(&page, "url"),
            created_time: str_field(&page, "created_time"),
            last_edited_time: str_field(&page, "last_edited_time"),
            properties: page.get("properties").cloned().unwrap_or(json!({})),
        })
    }

    /// Page body as text, one paragraph per non-empty block.
    pub async fn get_page_content(&self, page_id: &str) -> Result<String, ToolError> {
        let blocks: ResultList = serde_json::from_value(
            self.send(
                reqwest::Method::GET,
                &format!("/blocks/{page_id}/children"),
                None,
            )
            .await?,
        )
        .map_err(|e| invalid(e.to_string()))?;

        Ok(blocks
            .results
            .iter()
            .map(extract_block_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    pub async fn create_page(
        &self,
        parent_id: &str,
        title: &str,
        content: Vec<Value>,
    ) -> Result<CreatedPage, ToolError> {
        let mut body = json!({
            "parent": {"page_id": parent_id},
            "properties": {
                "title": {"title": [{"text": {"content": title}}]}
            }
        });
        if !content.is_empty() {
            body["children"] = Value::Array(content);
        }
        let page = self
            .send(reqwest::Method::POST, "/pages", Some(body))
            .await?;

        let id = str_field(&page, "id").ok_or_else(|| invalid("page has no id".to_string()))?;
        tracing::info!(page_id = %id, "Created Notion page");
        Ok(CreatedPage {
            id,
            title: title.to_string(),
            url: str_field(&page, "url"),
        })
    }

    pub async fn append_blocks(&self, page_id: &str, blocks: Vec<Value>) -> Result<(), ToolError> {
        self.send(
            reqwest::Method::PATCH,
            &format!("/blocks/{page_id}/children"),
            Some(json!({ "children": blocks })),
        )
        .await?;
        Ok(())
    }

    pub async fn query_database(
        &self,
        database_id: &str,
        filter: Option<Value>,
        limit: u32,
    ) -> Result<Vec<DatabaseEntry>, ToolError> {
        let mut body = json!({ "page_size": limit });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }
        let list: ResultList = serde_json::from_value(
            self.send(
                reqwest::Method::POST,
                &format!("/databases/{database_id}/query"),
                Some(body),
            )
            .await?,
        )
        .map_err(|e| invalid(e.to_string()))?;

        Ok(list
            .results
            .iter()
            .filter_map(|item| {
                Some(DatabaseEntry {
                    id: str_field(item, "id")?,
                    properties: item.get("properties").cloned().unwrap_or(json!({})),
                    url: str_field(item, "url"),
                })
            })
            .collect())
    }
}

fn invalid(reason: String) -> ToolError {
    ToolError::InvalidResponse {
        tool: NOTION.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_from_name_property() {
        let page = json!({
            "properties": {
                "Name": {"type": "title", "title": [{"plain_text": "Roadmap"}]}
            }
        });
        assert_eq!(extract_title(&page), "Roadmap");
    }

    #[test]
    fn title_defaults_to_untitled() {
        assert_eq!(extract_title(&json!({})), "Untitled");
        let empty = json!({"properties": {"title": {"type": "title", "title": []}}});
        assert_eq!(extract_title(&empty), "Untitled");
        let wrong_type = json!({"properties": {"Name": {"type": "rich_text"}}});
        assert_eq!(extract_title(&wrong_type), "Untitled");
    }

    #[test]
    fn block_text_joins_rich_text() {
        let block = json!({
            "type": "paragraph",
            "paragraph": {"rich_text": [{"plain_text": "Hello, "}, {"plain_text": "world"}]}
        });
        assert_eq!(extract_block_text(&block), "Hello, world");
    }

    #[test]
    fn block_text_empty_for_non_text_blocks() {
        assert_eq!(extract_block_text(&json!({"type": "divider", "divider": {}})), "");
        assert_eq!(extract_block_text(&json!({})), "");
    }

    #[test]
    fn paragraph_block_uses_write_shape() {
        // Notion only fills `plain_text` on read.
        assert_eq!(
            paragraph_block("hi")["paragraph"]["rich_text"][0]["text"]["content"],
            "hi"
        );
    }
}
