//! Planner Provider Interface
//!
//! The planner talks to a text-generation provider through exactly one
//! capability. New providers are added by implementing the trait, never by
//! branching inside the planner.

use async_trait::async_trait;
use thiserror::Error;

/// Provider failures split by remediation. `Transport` covers timeouts,
/// network errors, and non-2xx responses and is retried with backoff;
/// `Output` is a contract violation by the provider and is never retried.
#[derive(Debug, Clone, Error)]
pub enum ProviderFailure {
    #[error("provider transport failure: {0}")]
    Transport(String),
    #[error("{0}")]
    Output(String),
}

#[async_trait]
pub trait PlannerProvider: Send + Sync {
    /// Generate raw text for the given prompt. Expected, but never trusted,
    /// to be a JSON object.
    async fn generate(&self, prompt: &str) -> Result<String, ProviderFailure>;
}

/// The three disjoint planner failure kinds. Callers map each to a different
/// remediation: fix the prompt, retry later, or report the provider.
#[derive(Debug, Clone, Error)]
pub enum PlannerError {
    #[error("{0}")]
    Input(String),
    #[error("LLM provider unavailable.")]
    Unavailable,
    #[error("{0}")]
    Output(String),
}
