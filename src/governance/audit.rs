//! Audit Recorder
//!
//! Every terminal request outcome produces exactly one audit record, written
//! best effort: an audit failure must never fail the user-facing request.
//! Records are redacted before they leave this module; raw prompts, raw
//! credentials, and geometry coordinates never reach the sink.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;
use tracing::warn;

const MAX_ERROR_CHARS: usize = 300;

/// Metadata keys that are dropped outright.
const SENSITIVE_METADATA_KEYS: [&str; 4] = ["prompt", "query_text", "api_key", "x_api_key"];

#[derive(Debug, Clone, Error)]
#[error("audit write failed: {0}")]
pub struct AuditError(pub String);

/// Write-only, fully redacted record of one request outcome.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub user_id: String,
    pub query_text: String,
    pub query_type: Option<String>,
    pub execution_time_ms: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub data_sources: Vec<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        user_identifier: &str,
        prompt: &str,
        query_type: Option<&str>,
        execution_time_ms: i64,
        status: &str,
        error_message: Option<&str>,
        data_sources: Vec<String>,
        metadata: Option<&Map<String, Value>>,
    ) -> Self {
        Self {
            user_id: hash_identifier(user_identifier),
            query_text: redacted_query_text(prompt),
            query_type: query_type.map(|s| s.to_string()),
            execution_time_ms,
            status: status.to_string(),
            error_message: error_message.map(sanitize_error_message),
            data_sources,
            metadata: redact_metadata(metadata),
            created_at: Utc::now(),
        }
    }
}

pub fn hash_identifier(value: &str) -> String {
    let normalized = value.trim();
    let normalized = if normalized.is_empty() {
        "anonymous"
    } else {
        normalized
    };
    let digest = Sha256::digest(normalized.as_bytes());
    format!("sha256:{}", hex::encode(digest))
}

pub fn redacted_query_text(prompt: &str) -> String {
    let normalized = prompt.trim();
    let digest = Sha256::digest(normalized.as_bytes());
    format!(
        "redacted:sha256:{}:len:{}",
        hex::encode(digest),
        normalized.chars().count()
    )
}

pub fn sanitize_error_message(message: &str) -> String {
    let flattened = message.split_whitespace().collect::<Vec<_>>().join(" ");
    flattened.chars().take(MAX_ERROR_CHARS).collect()
}

/// Geometry payloads are summarized to type plus presence of coordinates.
fn summarize_geometry(value: &Value) -> Value {
    match value.as_object() {
        Some(obj) => json!({
            "type": obj.get("type").and_then(Value::as_str).unwrap_or("unknown"),
            "has_coordinates": obj.contains_key("coordinates"),
        }),
        None => Value::Null,
    }
}

fn redact_metadata(metadata: Option<&Map<String, Value>>) -> Value {
    let Some(metadata) = metadata else {
        return json!({});
    };

    let mut redacted = Map::new();
    for (key, value) in metadata {
        if SENSITIVE_METADATA_KEYS.contains(&key.to_lowercase().as_str()) {
            continue;
        }
        if key == "geometry" || key == "geometry_b" {
            redacted.insert(format!("{key}_summary"), summarize_geometry(value));
            continue;
        }
        redacted.insert(key.clone(), value.clone());
    }
    Value::Object(redacted)
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Persists audit events into `audit.query_log`.
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let attribution = json!({
            "prompt_policy": "redacted",
            "user_policy": "hashed",
        });
        sqlx::query(
            r#"
            INSERT INTO audit.query_log (
                user_id,
                query_text,
                query_type,
                execution_time_ms,
                status,
                error_message,
                data_sources,
                attribution,
                metadata,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&event.user_id)
        .bind(&event.query_text)
        .bind(&event.query_type)
        .bind(event.execution_time_ms)
        .bind(&event.status)
        .bind(&event.error_message)
        .bind(json!(event.data_sources))
        .bind(attribution)
        .bind(&event.metadata)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| AuditError(err.to_string()))?;
        Ok(())
    }
}

/// Sink used when auditing has nowhere to go (test environments).
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

/// The audit attempt is wrapped so its failure is logged and swallowed.
pub async fn record_best_effort(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(err) = sink.record(&event).await {
        warn!(error = %err, "audit.write_failed");
    }
}
