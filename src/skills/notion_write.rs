//! `notion_write`: publish a job summary page.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::context::TaskContext;
use crate::error::SkillError;
use crate::skills::{Skill, SkillResult};
use crate::tools::notion::{heading_block, paragraph_block};
use crate::tools::{self, NotionClient};

pub struct NotionWriteSkill {
    notion: Arc<NotionClient>,
}

impl NotionWriteSkill {
    pub fn new(notion: Arc<NotionClient>) -> Self {
        Self { notion }
    }

    async fn write(&self, ctx: &TaskContext, result: &mut SkillResult) -> Result<(), SkillError> {
        let parent_id = ctx
            .outputs
            .get("notion_parent_id")
            .and_then(Value::as_str)
            .or_else(|| self.notion.root_page_id())
            .ok_or_else(|| {
                SkillError::Failed(
                    "No parent page ID specified and NOTION_ROOT_PAGE_ID not set".to_string(),
                )
            })?;
        let title = summary_title(ctx);

        result.log(format!("Creating Notion page: {title}"));
        result.log(format!("Parent: {parent_id}"));
        let page = self
            .notion
            .create_page(parent_id, &title, summary_blocks(ctx))
            .await?;

        let url = page.url.clone().unwrap_or_default();
        result.log(format!("Page created: {url}"));
        result.output("page_id", json!(page.id));
        result.output("page_url", json!(url));
        result.artifact("notion_page", url);
        result.pass("page_created_or_updated");
        Ok(())
    }
}

fn summary_title(ctx: &TaskContext) -> String {
    ctx.outputs
        .get("notion_title")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Agent Summary: {}", ctx.task_id))
}

/// Request, then PR and deploy links when earlier steps produced them.
fn summary_blocks(ctx: &TaskContext) -> Vec<Value> {
    let mut blocks = vec![heading_block("Request"), paragraph_block(&ctx.request)];
    if ctx.outputs.is_empty() {
        return blocks;
    }

    blocks.push(heading_block("Results"));
    if let Some(pr_url) = ctx.outputs.get("pr_url").and_then(Value::as_str) {
        blocks.push(paragraph_block(&format!("PR: {pr_url}")));
    }
    if let Some(deploy_url) = ctx.outputs.get("deploy_url").and_then(Value::as_str) {
        blocks.push(paragraph_block(&format!("Deploy: {deploy_url}")));
    }
    blocks
}

#[async_trait]
impl Skill for NotionWriteSkill {
    fn name(&self) -> &str {
        "notion_write"
    }

    fn description(&self) -> &str {
        "Create or update Notion pages with job summaries"
    }

    fn inputs_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "notion_parent_id": {"type": "string"},
                "notion_title": {"type": "string"}
            }
        })
    }

    fn outputs_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "page_id": {"type": "string"},
                "page_url": {"type": "string"}
            }
        })
    }

    fn allowed_tools(&self) -> &[&str] {
        &[tools::NOTION]
    }

    fn success_checks(&self) -> &[&str] {
        &["page_created_or_updated"]
    }

    async fn run(&self, ctx: &TaskContext) -> SkillResult {
        let mut result = SkillResult::running();
        let outcome = self.write(ctx, &mut result).await;
        result.finish(outcome)
    }
}
