//! Geogate Server
//!
//! Wires configuration, the PostGIS backend, rate limiting, authorization,
//! auditing, and the optional LLM planner into one explicitly-owned
//! application state, then serves the HTTP API.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use geogate::config::{AuthBackend, Settings};
use geogate::governance::PgAuditSink;
use geogate::llm::{OllamaPlanner, Planner};
use geogate::security::{AuthResolver, PgRoleStore, RequestLimiter};
use geogate::server::{run_server, AppState};
use geogate::spatial::PostgisBackend;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(true)
        .init();

    let settings = Arc::new(Settings::from_env()?);
    info!(
        app = %settings.app_name,
        environment = %settings.environment,
        "starting"
    );

    let pool = PgPoolOptions::new()
        .min_connections(settings.db_pool_min)
        .max_connections(settings.db_pool_max)
        .connect_lazy(&settings.resolve_read_dsn())
        .context("invalid database DSN")?;

    let limiter = Arc::new(RequestLimiter::build(
        settings.rate_limit_enabled,
        &settings.environment,
        settings.rate_limit_requests,
        settings.rate_limit_window(),
        settings.rate_limit_burst,
        settings.rate_limit_max_identifiers,
        settings.rate_limit_idle_ttl(),
    ));

    let auth = match settings.auth_backend {
        AuthBackend::Static => AuthResolver::static_only(),
        AuthBackend::Lookup => AuthResolver::with_store(Arc::new(PgRoleStore::new(pool.clone()))),
    };

    let planner = if settings.llm_enabled {
        let provider = OllamaPlanner::new(
            settings.llm_ollama_base_url.clone(),
            settings.llm_model.clone(),
            settings.llm_timeout(),
        )
        .map_err(|err| anyhow::anyhow!("failed to build LLM provider: {err}"))?;
        Some(Arc::new(Planner::new(
            Arc::new(provider),
            settings.llm_max_retries,
            settings.llm_prompt_max_chars,
        )))
    } else {
        None
    };

    let state = AppState {
        settings: settings.clone(),
        limiter,
        auth,
        backend: Arc::new(PostgisBackend::new(pool.clone())),
        audit: Arc::new(PgAuditSink::new(pool)),
        planner,
    };

    run_server(state).await
}
