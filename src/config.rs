//! Configuration
//!
//! Settings come from the environment with development defaults. Parsing is
//! kept separate from `std::env` so tests can feed a plain key/value map.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone)]
pub struct Settings {
    pub app_name: String,
    pub environment: String,
    pub bind_addr: String,
    pub api_key: String,

    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub db_dsn: String,
    pub db_read_dsn: String,
    pub db_read_user: String,
    pub db_read_password: String,
    pub db_pool_min: u32,
    pub db_pool_max: u32,

    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_burst: Option<u32>,
    pub rate_limit_max_identifiers: usize,
    pub rate_limit_idle_ttl_seconds: u64,

    pub default_table: String,
    pub allowed_tables: BTreeSet<String>,

    pub auth_backend: AuthBackend,

    pub llm_enabled: bool,
    pub llm_ollama_base_url: String,
    pub llm_model: String,
    pub llm_timeout_seconds: u64,
    pub llm_max_retries: u32,
    pub llm_prompt_max_chars: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthBackend {
    Static,
    Lookup,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let kv: HashMap<String, String> = std::env::vars().collect();
        Self::from_kv(&kv)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self> {
        let environment = kv
            .get("APP_ENV")
            .or_else(|| kv.get("ENVIRONMENT"))
            .cloned()
            .unwrap_or_else(|| "development".to_string());

        let default_table = string(kv, "DEFAULT_TABLE", "data.features");
        let allowed_tables: BTreeSet<String> = string(kv, "ALLOWED_TABLES", &default_table)
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if allowed_tables.is_empty() {
            bail!("ALLOWED_TABLES must name at least one table");
        }

        let auth_backend = match string(kv, "AUTH_BACKEND", "lookup").to_lowercase().as_str() {
            "static" => AuthBackend::Static,
            "lookup" => AuthBackend::Lookup,
            other => bail!("AUTH_BACKEND must be 'static' or 'lookup', got '{other}'"),
        };

        Ok(Self {
            app_name: string(kv, "APP_NAME", "Geogate API"),
            environment,
            bind_addr: string(kv, "BIND_ADDR", "0.0.0.0:8000"),
            api_key: string(kv, "API_KEY", ""),

            db_host: string(kv, "POSTGRES_HOST", "localhost"),
            db_port: parse(kv, "POSTGRES_PORT", 5432)?,
            db_name: string(kv, "POSTGRES_DB", "geogate"),
            db_user: string(kv, "POSTGRES_USER", "geogate_user"),
            db_password: string(kv, "POSTGRES_PASSWORD", ""),
            db_dsn: string(kv, "DB_DSN", ""),
            db_read_dsn: string(kv, "DB_READ_DSN", ""),
            db_read_user: string(kv, "DB_READ_USER", ""),
            db_read_password: string(kv, "DB_READ_PASSWORD", ""),
            db_pool_min: parse(kv, "DB_POOL_MIN", 1)?,
            db_pool_max: parse(kv, "DB_POOL_MAX", 5)?,

            rate_limit_enabled: boolean(kv, "RATE_LIMIT_ENABLED", true)?,
            rate_limit_requests: parse(kv, "RATE_LIMIT_REQUESTS", 60)?,
            rate_limit_window_seconds: parse(kv, "RATE_LIMIT_WINDOW_SECONDS", 60)?,
            rate_limit_burst: optional(kv, "RATE_LIMIT_BURST")?,
            rate_limit_max_identifiers: parse(kv, "RATE_LIMIT_MAX_IDENTIFIERS", 10_000)?,
            rate_limit_idle_ttl_seconds: parse(kv, "RATE_LIMIT_IDLE_TTL_SECONDS", 900)?,

            default_table,
            allowed_tables,

            auth_backend,

            llm_enabled: boolean(kv, "LLM_ENABLED", false)?,
            llm_ollama_base_url: string(kv, "LLM_OLLAMA_BASE_URL", "http://localhost:11434"),
            llm_model: string(kv, "LLM_MODEL", "qwen2.5:7b-instruct"),
            llm_timeout_seconds: parse(kv, "LLM_TIMEOUT_SECONDS", 20)?,
            llm_max_retries: parse(kv, "LLM_MAX_RETRIES", 1)?,
            llm_prompt_max_chars: parse(kv, "LLM_PROMPT_MAX_CHARS", 4000)?,
        })
    }

    pub fn is_test_env(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "test" | "testing")
    }

    /// Resolve the connection string for read-path queries: an explicit read
    /// DSN wins, then the primary DSN, then one assembled from parts with
    /// optional read-only credential overrides.
    pub fn resolve_read_dsn(&self) -> String {
        let read_dsn = self.db_read_dsn.trim();
        if !read_dsn.is_empty() {
            return read_dsn.to_string();
        }
        let primary = self.db_dsn.trim();
        if !primary.is_empty() {
            return primary.to_string();
        }

        let user = if self.db_read_user.trim().is_empty() {
            &self.db_user
        } else {
            &self.db_read_user
        };
        let password = if self.db_read_password.is_empty() {
            &self.db_password
        } else {
            &self.db_read_password
        };
        format!(
            "postgres://{user}:{password}@{host}:{port}/{db}",
            host = self.db_host,
            port = self.db_port,
            db = self.db_name,
        )
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_seconds)
    }

    pub fn rate_limit_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.rate_limit_idle_ttl_seconds)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds)
    }
}

fn string(kv: &HashMap<String, String>, key: &str, default: &str) -> String {
    kv.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse<T: std::str::FromStr>(kv: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match kv.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw.parse::<T>().with_context(|| format!("invalid {key}: '{raw}'")),
        None => Ok(default),
    }
}

fn optional<T: std::str::FromStr>(kv: &HashMap<String, String>, key: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match kv.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => Ok(Some(
            raw.parse::<T>()
                .with_context(|| format!("invalid {key}: '{raw}'"))?,
        )),
        None => Ok(None),
    }
}

fn boolean(kv: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    match kv.get(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(raw) if raw.is_empty() => Ok(default),
        Some(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => bail!("invalid {key}: '{other}' is not a boolean"),
        },
    }
}
