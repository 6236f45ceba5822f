//! Router-level tests driving the full request pipeline through axum.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{Behavior, MockBackend};
use geogate::config::Settings;
use geogate::governance::{AuditError, AuditEvent, AuditSink};
use geogate::llm::{Planner, PlannerProvider, ProviderFailure};
use geogate::security::{AuthResolver, RequestLimiter};
use geogate::server::{router, AppState};
use serde_json::{json, Value};
use tower::util::ServiceExt;

struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct FixedProvider {
    response: Result<String, ProviderFailure>,
}

#[async_trait]
impl PlannerProvider for FixedProvider {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderFailure> {
        self.response.clone()
    }
}

fn test_settings(overrides: &[(&str, &str)]) -> Settings {
    let mut kv: HashMap<String, String> =
        HashMap::from([("APP_ENV".to_string(), "test".to_string())]);
    for (key, value) in overrides {
        kv.insert(key.to_string(), value.to_string());
    }
    Settings::from_kv(&kv).unwrap()
}

struct TestApp {
    state: AppState,
    audit: Arc<RecordingAuditSink>,
}

fn test_app(settings: Settings, backend: MockBackend, limiter: RequestLimiter) -> TestApp {
    let audit = RecordingAuditSink::new();
    let state = AppState {
        settings: Arc::new(settings),
        limiter: Arc::new(limiter),
        auth: AuthResolver::static_only(),
        backend: Arc::new(backend),
        audit: audit.clone(),
        planner: None,
    };
    TestApp { state, audit }
}

fn default_app() -> TestApp {
    test_app(
        test_settings(&[]),
        MockBackend::normal(),
        RequestLimiter::Disabled,
    )
}

async fn post_json(
    state: AppState,
    path: &str,
    headers: &[(&str, &str)],
    body: &Value,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    for (key, value) in headers {
        builder = builder.header(*key, *value);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();

    let response = router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get(state: AppState, path: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    let response = router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn point() -> Value {
    json!({"type": "Point", "coordinates": [151.2, -33.8]})
}

#[tokio::test]
async fn health_always_succeeds() {
    let app = default_app();
    let (status, body) = get(app.state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn readiness_is_bypassed_in_test_environments() {
    let app = test_app(
        test_settings(&[]),
        MockBackend::with(Behavior::Down),
        RequestLimiter::Disabled,
    );
    let (status, _) = get(app.state, "/ready").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn readiness_fails_when_the_backend_is_unreachable() {
    let app = test_app(
        test_settings(&[("APP_ENV", "production"), ("API_KEY", "k")]),
        MockBackend::with(Behavior::Down),
        RequestLimiter::Disabled,
    );
    let (status, body) = get(app.state, "/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["detail"], "Backend unreachable.");
}

#[tokio::test]
async fn structured_buffer_completes_with_verified_evidence() {
    let app = default_app();
    let body = json!({
        "prompt": "buffer the well",
        "operation": "buffer",
        "geometry": point(),
        "distance": 100,
        "units": "meters",
    });
    let (status, response) = post_json(app.state, "/query", &[], &body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "completed");
    assert_eq!(response["verification_status"], "verified");
    assert_eq!(response["evidence"][0]["source_kind"], "input_geometry");
    assert_eq!(response["request"], body);
    assert_eq!(response["result"]["units"], "meters");
}

#[tokio::test]
async fn nearest_neighbors_completes_unverified() {
    let app = default_app();
    let body = json!({
        "operation": "nearest_neighbors",
        "geometry": point(),
        "limit": 2,
    });
    let (status, response) = post_json(app.state, "/query", &[], &body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["verification_status"], "unverified");
    let evidence = response["evidence"].as_array().unwrap();
    assert_eq!(evidence.len(), 2);
    for entry in evidence {
        assert_eq!(entry["source_kind"], "queried_table");
        assert_eq!(entry["verification"], "unverified");
    }
}

#[tokio::test]
async fn validation_errors_name_the_field() {
    let app = default_app();
    let body = json!({
        "operation": "buffer",
        "geometry": point(),
    });
    let (status, response) = post_json(app.state, "/query", &[], &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["detail"].as_str().unwrap().contains("distance"));
}

#[tokio::test]
async fn extra_fields_are_rejected() {
    let app = default_app();
    let body = json!({
        "operation": "buffer",
        "geometry": point(),
        "distance": 5,
        "hexcolor": "#ff0000",
    });
    let (status, response) = post_json(app.state, "/query", &[], &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["detail"].as_str().unwrap().contains("hexcolor"));
}

#[tokio::test]
async fn natural_path_extracts_and_executes() {
    let app = default_app();
    let body = json!({
        "prompt": r#"Please compute {"operation":"calculate_area","geometry":{"type":"Polygon","coordinates":[[[0,0],[0,1],[1,1],[0,0]]]},"units":"hectares"} for me"#,
    });
    let (status, response) = post_json(app.state, "/query/natural", &[], &body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "completed");
    assert_eq!(response["result"]["area"], json!(1.0));
    assert_eq!(response["verification_status"], "verified");
}

#[tokio::test]
async fn natural_path_refuses_prose_and_ambiguity() {
    let app = default_app();
    let (status, response) = post_json(
        app.state.clone(),
        "/query/natural",
        &[],
        &json!({"prompt": "what is near the sacred river?"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(response["detail"]
        .as_str()
        .unwrap()
        .contains("Could not parse"));

    let two = format!(
        "{} and {}",
        json!({"operation": "calculate_area", "geometry": point()}),
        json!({"operation": "buffer", "geometry": point(), "distance": 1}),
    );
    let (status, response) =
        post_json(app.state, "/query/natural", &[], &json!({ "prompt": two })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(response["detail"].as_str().unwrap().contains("Multiple"));
}

#[tokio::test]
async fn unlisted_table_is_rejected_with_the_allowed_set() {
    let app = test_app(
        test_settings(&[("ALLOWED_TABLES", "data.features,data.roads")]),
        MockBackend::normal(),
        RequestLimiter::Disabled,
    );
    let body = json!({
        "operation": "nearest_neighbors",
        "geometry": point(),
        "table": "secret.sites",
    });
    let (status, response) = post_json(app.state, "/query", &[], &body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let detail = response["detail"].as_str().unwrap();
    assert!(detail.contains("secret.sites"));
    assert!(detail.contains("data.features"));
    assert!(detail.contains("data.roads"));
}

#[tokio::test]
async fn missing_operation_without_planner_is_pending() {
    let app = default_app();
    let (status, response) = post_json(
        app.state,
        "/query",
        &[],
        &json!({"prompt": "tell me about the rivers"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "pending");
    assert!(response.get("result").is_none());
}

#[tokio::test]
async fn planner_fills_in_the_operation_when_enabled() {
    let mut app = default_app();
    let provider = FixedProvider {
        response: Ok(
            r#"{"operation":"buffer","geometry":{"type":"Point","coordinates":[0,0]},"distance":25}"#
                .to_string(),
        ),
    };
    app.state.planner = Some(Arc::new(Planner::new(Arc::new(provider), 0, 4000)));

    let (status, response) = post_json(
        app.state,
        "/query",
        &[],
        &json!({"prompt": "put a 25m buffer around the point"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "completed");
    assert_eq!(response["verification_status"], "verified");
}

#[tokio::test]
async fn planner_transport_failure_maps_to_service_unavailable() {
    let mut app = default_app();
    let provider = FixedProvider {
        response: Err(ProviderFailure::Transport("timed out".into())),
    };
    app.state.planner = Some(Arc::new(Planner::new(Arc::new(provider), 0, 4000)));

    let (status, _) = post_json(
        app.state,
        "/query",
        &[],
        &json!({"prompt": "put a buffer around the point"}),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn planner_gibberish_maps_to_bad_gateway() {
    let mut app = default_app();
    let provider = FixedProvider {
        response: Ok("the answer is obviously a buffer".to_string()),
    };
    app.state.planner = Some(Arc::new(Planner::new(Arc::new(provider), 0, 4000)));

    let (status, _) = post_json(
        app.state,
        "/query",
        &[],
        &json!({"prompt": "put a buffer around the point"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn configured_api_key_is_required_and_checked() {
    let app = test_app(
        test_settings(&[("API_KEY", "right-key")]),
        MockBackend::normal(),
        RequestLimiter::Disabled,
    );
    let body = json!({
        "operation": "calculate_area",
        "geometry": point(),
    });

    let (status, response) = post_json(
        app.state.clone(),
        "/query",
        &[("x-api-key", "wrong-key")],
        &body,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response["detail"], "Invalid API key.");

    let (status, _) = post_json(app.state, "/query", &[("x-api-key", "right-key")], &body).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn rate_limit_rejects_the_second_call_in_the_window() {
    let limiter = RequestLimiter::build(
        true,
        "production",
        1,
        Duration::from_secs(60),
        None,
        16,
        Duration::from_secs(3600),
    );
    let app = test_app(test_settings(&[]), MockBackend::normal(), limiter);
    let body = json!({
        "operation": "calculate_area",
        "geometry": point(),
    });

    let (status, _) = post_json(app.state.clone(), "/query", &[], &body).await;
    assert_eq!(status, StatusCode::OK);
    let (status, response) = post_json(app.state, "/query", &[], &body).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response["detail"], "Rate limit exceeded.");
}

#[tokio::test]
async fn every_outcome_writes_exactly_one_redacted_audit_record() {
    let app = default_app();
    let audit = app.audit.clone();

    let good = json!({
        "prompt": "buffer the sacred well",
        "operation": "buffer",
        "geometry": point(),
        "distance": 100,
    });
    let (status, _) = post_json(app.state.clone(), "/query", &[("x-api-key", "member:k1")], &good)
        .await;
    assert_eq!(status, StatusCode::OK);

    let bad = json!({"operation": "buffer", "geometry": point()});
    let (status, _) = post_json(app.state, "/query", &[("x-api-key", "member:k1")], &bad).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let events = audit.events();
    assert_eq!(events.len(), 2);

    let success = &events[0];
    assert_eq!(success.status, "success");
    assert_eq!(success.query_type.as_deref(), Some("buffer"));
    assert!(success.user_id.starts_with("sha256:"));
    assert!(!success.user_id.contains("member:k1"));
    assert!(success.query_text.starts_with("redacted:sha256:"));
    assert!(!success.query_text.contains("sacred"));
    let metadata = success.metadata.as_object().unwrap();
    assert!(metadata.contains_key("geometry_summary"));
    assert!(!success.metadata.to_string().contains("151.2"));

    let failure = &events[1];
    assert_eq!(failure.status, "validation_error");
    assert!(failure
        .error_message
        .as_deref()
        .unwrap()
        .contains("distance"));
}

#[tokio::test]
async fn non_object_bodies_are_rejected() {
    let app = default_app();
    let (status, response) = post_json(app.state, "/query", &[], &json!([1, 2, 3])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["detail"]
        .as_str()
        .unwrap()
        .contains("JSON object"));
}
