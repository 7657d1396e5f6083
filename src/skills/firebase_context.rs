//! `firebase_context`: load allowlisted Firestore collections.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};

use crate::context::{ContextUpdate, TaskContext};
use crate::error::SkillError;
use crate::skills::{Skill, SkillResult};
use crate::tools::{self, FirebaseClient};

const DEFAULT_COLLECTION: &str = "jobs";
const READ_LIMIT: usize = 20;

pub struct FirebaseContextSkill {
    firebase: FirebaseClient,
}

impl FirebaseContextSkill {
    pub fn new(firebase: FirebaseClient) -> Self {
        Self { firebase }
    }

    async fn load(&self, ctx: &TaskContext, result: &mut SkillResult) -> Result<(), SkillError> {
        let collections = requested_collections(ctx);
        let mut slot = Map::new();

        for collection in &collections {
            result.log(format!("Reading Firestore collection '{collection}'..."));
            let docs = self
                .firebase
                .read_collection(collection, READ_LIMIT, None)
                .await?;
            result.log(format!("Loaded {} documents from {collection}", docs.len()));
            slot.insert(collection.clone(), json!(docs));
        }

        let mut audit = Map::new();
        audit.insert("task_id".into(), json!(ctx.task_id));
        audit.insert("action".into(), json!("firebase_context"));
        audit.insert("collections".into(), json!(collections));
        audit.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        let log_id = self.firebase.log_agent_action(audit).await?;
        result.log(format!("Audit record {log_id} written"));

        result.output("firebase_collections", json!(collections));
        result.update(ContextUpdate::Firebase(slot));
        result.pass("firebase_context_loaded");
        Ok(())
    }
}

/// `metadata.firebase_collections` as a list or comma-separated string.
fn requested_collections(ctx: &TaskContext) -> Vec<String> {
    let names: Vec<String> = match ctx.metadata.get("firebase_collections") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s.split(',').map(|p| p.trim().to_string()).collect(),
        _ => Vec::new(),
    };
    let names: Vec<String> = names.into_iter().filter(|n| !n.is_empty()).collect();
    if names.is_empty() {
        vec![DEFAULT_COLLECTION.to_string()]
    } else {
        names
    }
}

#[async_trait]
impl Skill for FirebaseContextSkill {
    fn name(&self) -> &str {
        "firebase_context"
    }

    fn description(&self) -> &str {
        "Read allowlisted Firestore collections for product context"
    }

    fn inputs_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "firebase_collections": {"type": "array", "items": {"type": "string"}}
            }
        })
    }

    fn outputs_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "firebase_collections": {"type": "array"}
            }
        })
    }

    fn allowed_tools(&self) -> &[&str] {
        &[tools::FIREBASE]
    }

    fn success_checks(&self) -> &[&str] {
        &["firebase_context_loaded"]
    }

    async fn run(&self, ctx: &TaskContext) -> SkillResult {
        let mut result = SkillResult::running();
        let outcome = self.load(ctx, &mut result).await;
        result.finish(outcome)
    }
}
