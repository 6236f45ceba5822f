//! HTTP Server
//!
//! The axum router and the request pipeline: rate limit, authenticate,
//! authorize, validate (or extract, or plan), dispatch, ground, audit,
//! respond. State is explicitly constructed and injected so tests can run
//! isolated instances.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::GatewayError;
use crate::governance::{record_best_effort, AuditEvent, AuditSink};
use crate::llm::Planner;
use crate::query::{
    build_evidence, dispatch, extract_structured_operation, Evidence, OperationResult,
    StructuredOperation, Verification,
};
use crate::security::{AuthResolver, Permission, RequestLimiter};
use crate::spatial::GeometryBackend;

const API_KEY_HEADER: &str = "x-api-key";

/// Envelope fields that ride alongside the operation fields in a request
/// body. Everything else is handed to the strict validator untouched.
const ENVELOPE_KEYS: [&str; 3] = ["prompt", "return_format", "include_confidence"];

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub limiter: Arc<RequestLimiter>,
    pub auth: AuthResolver,
    pub backend: Arc<dyn GeometryBackend>,
    pub audit: Arc<dyn AuditSink>,
    pub planner: Option<Arc<Planner>>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub status: String,
    pub message: String,
    pub request: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<OperationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_status: Option<Verification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Vec<Evidence>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/query", post(query))
        .route("/query/natural", post(query_natural))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let addr = state.settings.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "server.listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn ready(State(state): State<AppState>) -> Response {
    if state.settings.is_test_env() {
        return Json(json!({ "status": "ready" })).into_response();
    }
    match state.backend.ping().await {
        Ok(()) => Json(json!({ "status": "ready" })).into_response(),
        Err(err) => {
            warn!(error = %err, "ready.backend_unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "detail": "Backend unreachable." })),
            )
                .into_response()
        }
    }
}

async fn query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    handle(state, headers, body, QueryMode::Structured).await
}

async fn query_natural(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    handle(state, headers, body, QueryMode::Natural).await
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum QueryMode {
    Structured,
    Natural,
}

/// Runs the pipeline and writes exactly one audit record for the terminal
/// outcome, success or error, before the response leaves.
async fn handle(state: AppState, headers: HeaderMap, body: Value, mode: QueryMode) -> Response {
    let started = Instant::now();
    let request_id = Uuid::new_v4();
    let credential = credential_from(&headers);
    let prompt = body
        .get("prompt")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let outcome = run_pipeline(&state, &headers, &body, &credential, mode).await;
    let duration_ms = started.elapsed().as_millis() as i64;

    let (status, query_type, error_message, data_sources) = match &outcome {
        Ok(done) => (
            "success",
            done.query_type.clone(),
            None,
            done.data_sources.clone(),
        ),
        Err(err) => (
            err.category(),
            requested_operation(&body),
            Some(err.to_string()),
            Vec::new(),
        ),
    };
    let metadata = operation_candidate(&body).and_then(|candidate| candidate.as_object().cloned());
    let event = AuditEvent::build(
        &credential,
        &prompt,
        query_type.as_deref(),
        duration_ms,
        status,
        error_message.as_deref(),
        data_sources,
        metadata.as_ref(),
    );
    record_best_effort(state.audit.as_ref(), event).await;
    info!(%request_id, status, duration_ms, "request.finished");

    match outcome {
        Ok(done) => Json(done.response).into_response(),
        Err(err) => err.into_response(),
    }
}

struct PipelineOutcome {
    response: QueryResponse,
    query_type: Option<String>,
    data_sources: Vec<String>,
}

async fn run_pipeline(
    state: &AppState,
    headers: &HeaderMap,
    body: &Value,
    credential: &str,
    mode: QueryMode,
) -> Result<PipelineOutcome, GatewayError> {
    if !body.is_object() {
        return Err(GatewayError::InputValidation(
            "Request body must be a JSON object.".into(),
        ));
    }

    let identifier = limiter_identifier(credential, headers);
    state.limiter.check(&identifier)?;

    authenticate(state, credential)?;

    let role = state.auth.resolve_role(credential).await;
    if !role.has_permission(Permission::QueryPublic) {
        return Err(GatewayError::Authorization);
    }

    let prompt = body
        .get("prompt")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let operation = match mode {
        QueryMode::Natural => Some(extract_structured_operation(prompt)?),
        QueryMode::Structured => match operation_candidate(body) {
            Some(candidate) if candidate.get("operation").is_some() => {
                Some(StructuredOperation::validate(&candidate)?)
            }
            _ => match &state.planner {
                Some(planner) => Some(planner.plan(prompt).await?),
                None => None,
            },
        },
    };

    let Some(operation) = operation else {
        info!("query.pending");
        return Ok(PipelineOutcome {
            response: QueryResponse {
                status: "pending".to_string(),
                message: "No structured operation provided. Provide 'operation' \
                          or enable the LLM planner."
                    .to_string(),
                request: body.clone(),
                result: None,
                verification_status: None,
                evidence: None,
            },
            query_type: None,
            data_sources: Vec::new(),
        });
    };

    let kind = operation.kind();
    info!(operation = kind, "query.received");

    let result = dispatch(
        &operation,
        state.backend.as_ref(),
        &state.settings.allowed_tables,
        &state.settings.default_table,
    )
    .await?;

    let (verification_status, evidence) = build_evidence(&result, &operation);
    let data_sources = match &result {
        OperationResult::Neighbors { table, .. } => vec![table.clone()],
        _ => Vec::new(),
    };

    info!(operation = kind, "query.completed");
    Ok(PipelineOutcome {
        response: QueryResponse {
            status: "completed".to_string(),
            message: "Structured operation executed successfully.".to_string(),
            request: body.clone(),
            result: Some(result),
            verification_status: Some(verification_status),
            evidence: Some(evidence),
        },
        query_type: Some(kind.to_string()),
        data_sources,
    })
}

fn authenticate(state: &AppState, credential: &str) -> Result<(), GatewayError> {
    let expected = state.settings.api_key.trim();
    if !state.settings.is_test_env() && expected.is_empty() {
        error!("auth.api_key_not_configured");
        return Err(GatewayError::Unexpected);
    }
    if !expected.is_empty() && credential != expected {
        return Err(GatewayError::Authentication("Invalid API key.".into()));
    }
    Ok(())
}

fn credential_from(headers: &HeaderMap) -> String {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

/// Rate-limit identifier: the credential when present, otherwise a
/// pseudonymous connection-origin fallback. The limiter hashes whatever it
/// receives; nothing raw is retained in the bucket table.
fn limiter_identifier(credential: &str, headers: &HeaderMap) -> String {
    if !credential.is_empty() {
        return credential.to_string();
    }
    let origin = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("anonymous");
    format!("ip:{origin}")
}

fn operation_candidate(body: &Value) -> Option<Value> {
    let obj = body.as_object()?;
    let candidate: Map<String, Value> = obj
        .iter()
        .filter(|(key, _)| !ENVELOPE_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if candidate.is_empty() {
        None
    } else {
        Some(Value::Object(candidate))
    }
}

fn requested_operation(body: &Value) -> Option<String> {
    body.get("operation")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
}
