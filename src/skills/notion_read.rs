//! `notion_read`: fetch a known page or search the workspace.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::context::{ContextUpdate, TaskContext};
use crate::error::SkillError;
use crate::skills::{Skill, SkillResult};
use crate::tools::{self, NotionClient};

const SEARCH_LIMIT: u32 = 5;

pub struct NotionReadSkill {
    notion: Arc<NotionClient>,
}

impl NotionReadSkill {
    pub fn new(notion: Arc<NotionClient>) -> Self {
        Self { notion }
    }

    async fn read(&self, ctx: &TaskContext, result: &mut SkillResult) -> Result<(), SkillError> {
        if let Some(page_id) = ctx.outputs.get("notion_page_id").and_then(Value::as_str) {
            result.log(format!("Fetching Notion page {page_id}..."));
            let page = self.notion.get_page(page_id).await?;
            let content = self.notion.get_page_content(page_id).await?;
            result.log(format!("Page: {}", page.title));
            result.log(format!("  Content length: {} chars", content.len()));
            result.output("page", json!(page));
            result.output("content", json!(content));
        } else if !ctx.request.is_empty() {
            result.log(format!("Searching Notion for: {}", ctx.request));
            let pages = self.notion.search(&ctx.request, SEARCH_LIMIT).await?;
            result.log(format!("Found {} pages", pages.len()));
            for page in &pages {
                result.log(format!("  - {} ({})", page.title, page.kind));
            }

            let include_content = ctx
                .outputs
                .get("include_content")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            if let Some(first) = pages.first().filter(|_| include_content) {
                result.log(format!("Fetching content of: {}", first.title));
                let content = self.notion.get_page_content(&first.id).await?;
                result.log(format!("Content length: {} chars", content.len()));
                result.output("content", json!(content));
            }
            result.output("pages", json!(pages));
        }

        let notion_context = Value::Object(result.outputs.clone());
        result.update(ContextUpdate::Metadata {
            key: "notion_context".to_string(),
            value: notion_context,
        });
        result.pass("pages_found_or_fetched");
        Ok(())
    }
}

#[async_trait]
impl Skill for NotionReadSkill {
    fn name(&self) -> &str {
        "notion_read"
    }

    fn description(&self) -> &str {
        "Search and read Notion pages"
    }

    fn inputs_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "notion_page_id": {"type": "string"},
                "include_content": {"type": "boolean", "default": true}
            }
        })
    }

    fn outputs_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "page": {"type": "object"},
                "pages": {"type": "array"},
                "content": {"type": "string"}
            }
        })
    }

    fn allowed_tools(&self) -> &[&str] {
        &[tools::NOTION]
    }

    fn success_checks(&self) -> &[&str] {
        &["pages_found_or_fetched"]
    }

    async fn run(&self, ctx: &TaskContext) -> SkillResult {
        let mut result = SkillResult::running();
        let outcome = self.read(ctx, &mut result).await;
        result.finish(outcome)
    }
}
