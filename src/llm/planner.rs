//! LLM Planner
//!
//! Turns a free-text prompt into a structured operation via an external
//! provider. The provider gets zero trust: its output passes through the
//! same strict validator as manual input, and the prompt is sanitized before
//! it ever leaves the process.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::query::StructuredOperation;

use super::provider::{PlannerError, PlannerProvider, ProviderFailure};

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

const PLANNER_SYSTEM_PROMPT: &str = "You are a strict GIS operation planner.\n\
Return exactly one JSON object and no additional text.\n\
Allowed keys: operation, geometry, geometry_b, table, limit, distance, units, srid, from_epsg, to_epsg.\n\
Allowed operations: buffer, calculate_area, find_intersections, nearest_neighbors, transform_crs.\n\
Never invent unavailable fields; use only values supported by the user request.\n";

pub struct Planner {
    provider: Arc<dyn PlannerProvider>,
    max_retries: u32,
    max_prompt_chars: usize,
}

impl Planner {
    pub fn new(
        provider: Arc<dyn PlannerProvider>,
        max_retries: u32,
        max_prompt_chars: usize,
    ) -> Self {
        Self {
            provider,
            max_retries,
            max_prompt_chars,
        }
    }

    pub async fn plan(&self, prompt: &str) -> Result<StructuredOperation, PlannerError> {
        let sanitized = sanitize_prompt(prompt, self.max_prompt_chars)?;
        let composed = format!("{PLANNER_SYSTEM_PROMPT}\nUser request:\n{sanitized}\nJSON:");
        let raw = self.generate_with_backoff(&composed).await?;

        let parsed: Value = serde_json::from_str(&raw)
            .map_err(|_| PlannerError::Output("LLM output is not valid JSON.".into()))?;
        if !parsed.is_object() {
            return Err(PlannerError::Output(
                "LLM output must be a JSON object.".into(),
            ));
        }

        StructuredOperation::validate(&parsed).map_err(|err| PlannerError::Output(err.message))
    }

    /// Call the provider, retrying transport failures with exponential
    /// backoff (200ms, doubling). Malformed output is a contract violation
    /// and fails immediately.
    async fn generate_with_backoff(&self, prompt: &str) -> Result<String, PlannerError> {
        let attempts = self.max_retries + 1;
        let mut delay = INITIAL_BACKOFF;

        for attempt in 1..=attempts {
            match self.provider.generate(prompt).await {
                Ok(raw) => return Ok(raw),
                Err(ProviderFailure::Output(message)) => {
                    warn!(%message, "llm.provider_output_malformed");
                    return Err(PlannerError::Output(message));
                }
                Err(ProviderFailure::Transport(message)) => {
                    warn!(attempt, attempts, %message, "llm.provider_transport_failure");
                    if attempt == attempts {
                        return Err(PlannerError::Unavailable);
                    }
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }

        Err(PlannerError::Unavailable)
    }
}

fn sanitize_prompt(raw: &str, max_chars: usize) -> Result<String, PlannerError> {
    let prompt = raw.trim();
    if prompt.is_empty() {
        return Err(PlannerError::Input("Prompt is empty.".into()));
    }
    if prompt.chars().count() > max_chars {
        return Err(PlannerError::Input(format!(
            "Prompt exceeds max length of {max_chars} characters."
        )));
    }
    if prompt
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\t' | '\r'))
    {
        return Err(PlannerError::Input(
            "Prompt contains unsupported control characters.".into(),
        ));
    }
    Ok(prompt.to_string())
}
