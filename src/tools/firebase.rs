//! Firebase (Firestore) access with a collection allowlist.
//!
//! Every operation checks the collection before touching the store:
//! reads are limited to [`ALLOWED_COLLECTIONS`], writes to
//! [`WRITE_ALLOWED_COLLECTIONS`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};

use crate::error::ToolError;
use crate::tools::{FIREBASE, decode_json, env_opt, request_failed};

/// Collections any operation may touch.
pub const ALLOWED_COLLECTIONS: [&str; 5] =
    ["candidates", "jobs", "matches", "analytics", "agent_logs"];

/// Collections that accept writes.
pub const WRITE_ALLOWED_COLLECTIONS: [&str; 2] = ["analytics", "agent_logs"];

/// Audit trail collection.
pub const AGENT_LOGS: &str = "agent_logs";

const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A single-field query filter (`field op value`).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub op: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: "==".to_string(),
            value,
        }
    }
}

/// Document storage backend. Documents are returned with their `id` inlined.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> Result<Option<Map<String, Value>>, ToolError>;

    async fn list(
        &self,
        collection: &str,
        limit: usize,
        filter: Option<&FieldFilter>,
    ) -> Result<Vec<Map<String, Value>>, ToolError>;

    /// Merge `data` into a document, creating it (with a generated id when
    /// `doc_id` is `None`). Returns the document id.
    async fn set(
        &self,
        collection: &str,
        doc_id: Option<&str>,
        data: Map<String, Value>,
    ) -> Result<String, ToolError>;
}

/// Verify `collection` may be read, or written when `write` is set.
pub fn check_collection_access(collection: &str, write: bool) -> Result<(), ToolError> {
    if !ALLOWED_COLLECTIONS.contains(&collection) {
        return Err(ToolError::PermissionDenied(format!(
            "Collection '{collection}' not in allowlist"
        )));
    }
    if write && !WRITE_ALLOWED_COLLECTIONS.contains(&collection) {
        return Err(ToolError::PermissionDenied(format!(
            "Write access to '{collection}' not allowed"
        )));
    }
    Ok(())
}

/// Allowlist-enforcing client over a [`DocumentStore`].
#[derive(Clone)]
pub struct FirebaseClient {
    store: Arc<dyn DocumentStore>,
}

impl FirebaseClient {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Firestore REST client from `FIREBASE_PROJECT_ID` / `FIREBASE_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self, ToolError> {
        Ok(Self::new(Arc::new(FirestoreRest::from_env()?)))
    }

    pub async fn read_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> Result<Option<Map<String, Value>>, ToolError> {
        check_collection_access(collection, false)?;
        self.store.get(collection, doc_id).await
    }

    pub async fn read_collection(
        &self,
        collection: &str,
        limit: usize,
        filter: Option<&FieldFilter>,
    ) -> Result<Vec<Map<String, Value>>, ToolError> {
        check_collection_access(collection, false)?;
        self.store.list(collection, limit, filter).await
    }

    pub async fn write_document(
        &self,
        collection: &str,
        data: Map<String, Value>,
        doc_id: Option<&str>,
    ) -> Result<String, ToolError> {
        check_collection_access(collection, true)?;
        let id = self.store.set(collection, doc_id, data).await?;
        tracing::debug!(collection = %collection, doc_id = %id, "Wrote Firestore document");
        Ok(id)
    }

    /// Append an audit record to `agent_logs`.
    pub async fn log_agent_action(&self, action: Map<String, Value>) -> Result<String, ToolError> {
        self.write_document(AGENT_LOGS, action, None).await
    }
}

// ── Firestore REST backend ──────────────────────────────────────────

/// Firestore over its REST API, authenticated with an OAuth access token.
pub struct FirestoreRest {
    http: reqwest::Client,
    project_id: String,
    access_token: SecretString,
    base_url: String,
}

impl FirestoreRest {
    pub fn new(project_id: impl Into<String>, access_token: SecretString) -> Result<Self, ToolError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| request_failed(FIREBASE, e))?;
        Ok(Self {
            http,
            project_id: project_id.into(),
            access_token,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn from_env() -> Result<Self, ToolError> {
        let project_id = env_opt("FIREBASE_PROJECT_ID").ok_or_else(|| ToolError::NotConfigured {
            tool: FIREBASE.to_string(),
            reason: "FIREBASE_PROJECT_ID not set".to_string(),
        })?;
        let token = env_opt("FIREBASE_ACCESS_TOKEN").ok_or_else(|| ToolError::NotConfigured {
            tool: FIREBASE.to_string(),
            reason: "FIREBASE_ACCESS_TOKEN not set".to_string(),
        })?;
        Self::new(project_id, SecretString::from(token))
    }

    /// Point at an emulator or another Firestore host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn documents_url(&self) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents",
            self.base_url, self.project_id
        )
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(self.access_token.expose_secret())
    }
}

#[async_trait]
impl DocumentStore for FirestoreRest {
    async fn get(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> Result<Option<Map<String, Value>>, ToolError> {
        let response = self
            .request(
                reqwest::Method::GET,
                format!("{}/{collection}/{doc_id}", self.documents_url()),
            )
            .send()
            .await
            .map_err(|e| request_failed(FIREBASE, e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let doc: Value = decode_json(FIREBASE, response).await?;
        Ok(Some(decode_document(&doc)))
    }

    async fn list(
        &self,
        collection: &str,
        limit: usize,
        filter: Option<&FieldFilter>,
    ) -> Result<Vec<Map<String, Value>>, ToolError> {
        let Some(filter) = filter else {
            let response = self
                .request(
                    reqwest::Method::GET,
                    format!("{}/{collection}", self.documents_url()),
                )
                .query(&[("pageSize", limit.to_string())])
                .send()
                .await
                .map_err(|e| request_failed(FIREBASE, e))?;
            let body: Value = decode_json(FIREBASE, response).await?;
            return Ok(body
                .get("documents")
                .and_then(Value::as_array)
                .map(|docs| docs.iter().map(decode_document).collect())
                .unwrap_or_default());
        };

        let query = json!({
            "structuredQuery": {
                "from": [{"collectionId": collection}],
                "where": {
                    "fieldFilter": {
                        "field": {"fieldPath": filter.field},
                        "op": filter_operator(&filter.op)?,
                        "value": encode_value(&filter.value),
                    }
                },
                "limit": limit,
            }
        });
        let response = self
            .request(
                reqwest::Method::POST,
                format!("{}:runQuery", self.documents_url()),
            )
            .json(&query)
            .send()
            .await
            .map_err(|e| request_failed(FIREBASE, e))?;
        let rows: Vec<Value> = decode_json(FIREBASE, response).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("document"))
            .map(decode_document)
            .collect())
    }

    async fn set(
        &self,
        collection: &str,
        doc_id: Option<&str>,
        data: Map<String, Value>,
    ) -> Result<String, ToolError> {
        let body = json!({ "fields": encode_fields(&data) });
        let request = match doc_id {
            Some(id) => {
                // Only the listed fields are replaced; the rest are kept.
                let mask: Vec<(&str, &str)> = data
                    .keys()
                    .map(|k| ("updateMask.fieldPaths", k.as_str()))
                    .collect();
                self.request(
                    reqwest::Method::PATCH,
                    format!("{}/{collection}/{id}", self.documents_url()),
                )
                .query(&mask)
            }
            None => self.request(
                reqwest::Method::POST,
                format!("{}/{collection}", self.documents_url()),
            ),
        };
        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| request_failed(FIREBASE, e))?;
        let doc: Value = decode_json(FIREBASE, response).await?;
        doc.get("name")
            .and_then(Value::as_str)
            .and_then(|name| name.rsplit('/').next())
            .map(str::to_string)
            .ok_or_else(|| ToolError::InvalidResponse {
                tool: FIREBASE.to_string(),
                reason: "document has no name".to_string(),
            })
    }
}

fn filter_operator(op: &str) -> Result<&'static str, ToolError> {
    Ok(match op {
        "==" => "EQUAL",
        "!=" => "NOT_EQUAL",
        "<" => "LESS_THAN",
        "<=" => "LESS_THAN_OR_EQUAL",
        ">" => "GREATER_THAN",
        ">=" => "GREATER_THAN_OR_EQUAL",
        "in" => "IN",
        "array-contains" => "ARRAY_CONTAINS",
        other => {
            return Err(ToolError::RequestFailed {
                tool: FIREBASE.to_string(),
                reason: format!("unsupported filter operator '{other}'"),
            });
        }
    })
}

// ── Firestore value encoding ────────────────────────────────────────

fn encode_fields(data: &Map<String, Value>) -> Value {
    Value::Object(
        data.iter()
            .map(|(k, v)| (k.clone(), encode_value(v)))
            .collect(),
    )
}

/// JSON value to a Firestore typed value.
pub(crate) fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

/// Firestore typed value back to plain JSON.
pub(crate) fn decode_value(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|o| o.iter().next()) else {
        return Value::Null;
    };
    match kind.as_str() {
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| inner.clone()),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|vs| vs.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(decode_fields(inner.get("fields"))),
        "nullValue" => Value::Null,
        // stringValue, booleanValue, doubleValue, timestampValue, referenceValue, ...
        _ => inner.clone(),
    }
}

fn decode_fields(fields: Option<&Value>) -> Map<String, Value> {
    fields
        .and_then(Value::as_object)
        .map(|f| f.iter().map(|(k, v)| (k.clone(), decode_value(v))).collect())
        .unwrap_or_default()
}

fn decode_document(doc: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(id) = doc
        .get("name")
        .and_then(Value::as_str)
        .and_then(|n| n.rsplit('/').next())
    {
        out.insert("id".to_string(), Value::String(id.to_string()));
    }
    out.extend(decode_fields(doc.get("fields")));
    out
}
