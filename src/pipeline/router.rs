//! Router: asks the language model for a persona, skills and executor.
//!
//! The model answers in a line format:
//!
//! ```text
//! PERSONA: coder
//! SKILLS: github_context, openhands_pr
//! EXECUTOR: openhands
//! REASONING: needs a code change
//! ```
//!
//! Any field that is missing or malformed falls back to its default, and an
//! LLM failure yields the full default decision. Routing never fails a job.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::TaskContext;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{
    DEFAULT_EXECUTOR, DEFAULT_PERSONA, DEFAULT_SKILL, PERSONAS, RoutingDecision, is_known_persona,
};

/// Max tokens for the routing call.
const ROUTING_MAX_TOKENS: u32 = 1024;

/// Temperature for routing (deterministic-ish).
const ROUTING_TEMPERATURE: f32 = 0.1;

/// Skill catalog used when the router is not given the registry's.
const DEFAULT_SKILL_CATALOG: [(&str, &str); 3] = [
    ("github_context", "Fetch issue/PR/file context"),
    ("netlify_deploy", "Get deploy preview URL"),
    ("openhands_pr", "Execute code changes (uses OpenHands)"),
];

pub struct Router {
    llm: Arc<dyn LlmProvider>,
    skill_catalog: Vec<(String, String)>,
}

impl Router {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            skill_catalog: DEFAULT_SKILL_CATALOG
                .iter()
                .map(|(n, d)| (n.to_string(), d.to_string()))
                .collect(),
        }
    }

    /// Advertise these `(name, description)` skills in the prompt.
    pub fn with_skill_catalog(mut self, catalog: Vec<(String, String)>) -> Self {
        if !catalog.is_empty() {
            self.skill_catalog = catalog;
        }
        self
    }

    /// Decide routing for a task. Never fails.
    pub async fn route(&self, ctx: &TaskContext) -> RoutingDecision {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_routing_system_prompt(&self.skill_catalog)),
            ChatMessage::user(build_routing_user_prompt(ctx)),
        ])
        .with_temperature(ROUTING_TEMPERATURE)
        .with_max_tokens(ROUTING_MAX_TOKENS);

        let decision = match self.llm.complete(request).await {
            Ok(response) => {
                debug!(task_id = %ctx.task_id, raw = %response.content, "Routing response");
                parse_routing_response(&response.content)
            }
            Err(e) => {
                warn!(
                    task_id = %ctx.task_id,
                    error = %e,
                    "Routing LLM call failed, using default routing"
                );
                RoutingDecision::default()
            }
        };

        info!(
            task_id = %ctx.task_id,
            persona = %decision.persona,
            skills = ?decision.skills,
            executor = decision.executor.as_deref().unwrap_or("none"),
            "Routed task"
        );
        decision
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_routing_system_prompt(skill_catalog: &[(String, String)]) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(
        "You are the routing brain for an agent system. Given a task, decide:\n\
         1. Which persona should handle it\n\
         2. Which skills are needed, in order\n\
         3. Which executor to use (if code changes are needed)\n\n\
         Available personas:\n",
    );
    for (name, brief) in PERSONAS {
        prompt.push_str(&format!("- {name}: {brief}\n"));
    }
    prompt.push_str("\nAvailable skills:\n");
    for (name, description) in skill_catalog {
        prompt.push_str(&format!("- {name}: {description}\n"));
    }
    prompt.push_str(
        "\nRespond in exactly this format:\n\
         PERSONA: <persona_name>\n\
         SKILLS: <skill1>, <skill2>, <skill3>\n\
         EXECUTOR: <executor_name> (or \"none\" if no code changes)\n\
         REASONING: <why these choices>",
    );
    prompt
}

fn build_routing_user_prompt(ctx: &TaskContext) -> String {
    let mut prompt = String::with_capacity(256);
    prompt.push_str(&format!("Task: {}\n", ctx.request));
    prompt.push_str(&format!("Repo: {}\n", ctx.repo.as_deref().unwrap_or("none")));
    if let Some(issue) = &ctx.issue {
        prompt.push_str(&format!("Issue: #{issue}\n"));
    }
    if let Some(pr) = &ctx.pr {
        prompt.push_str(&format!("PR: #{pr}\n"));
    }
    let constraints = if ctx.constraints.is_empty() {
        "none".to_string()
    } else {
        ctx.constraints.join(", ")
    };
    prompt.push_str(&format!("Constraints: {constraints}"));
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

/// First word of a field value, stripped of surrounding punctuation.
fn first_token(value: &str) -> &str {
    value
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
}

/// Parse the line format. Unknown lines are ignored; each field falls back
/// to its default independently.
pub fn parse_routing_response(text: &str) -> RoutingDecision {
    let mut decision = RoutingDecision::default();

    for line in text.lines() {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim().to_ascii_uppercase().as_str() {
            "PERSONA" => {
                let persona = first_token(value).to_lowercase();
                if is_known_persona(&persona) {
                    decision.persona = persona;
                } else {
                    warn!(persona = %value, "Unknown persona in routing response, using default");
                    decision.persona = DEFAULT_PERSONA.to_string();
                }
            }
            "SKILLS" => {
                let skills: Vec<String> = value
                    .split(',')
                    .map(|s| s.trim().trim_matches(|c| c == '`' || c == '"' || c == '\''))
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                decision.skills = if skills.is_empty() {
                    vec![DEFAULT_SKILL.to_string()]
                } else {
                    skills
                };
            }
            "EXECUTOR" => {
                let executor = first_token(value).to_lowercase();
                decision.executor = match executor.as_str() {
                    "none" => None,
                    "" => Some(DEFAULT_EXECUTOR.to_string()),
                    _ => Some(executor),
                };
            }
            "REASONING" => decision.reasoning = value.to_string(),
            _ => {}
        }
    }

    decision
}
