//! LLM Planner Path
//!
//! Optional: wraps an external text-generation provider behind a one-method
//! capability interface and re-validates everything it produces.

pub mod ollama;
pub mod planner;
pub mod provider;

pub use ollama::OllamaPlanner;
pub use planner::Planner;
pub use provider::{PlannerError, PlannerProvider, ProviderFailure};
