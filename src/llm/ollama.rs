//! Ollama Planner Provider
//!
//! Single-shot `/api/generate` call with `format: "json"` and temperature 0.
//! Retry policy lives in the planner, not here.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use super::provider::{PlannerProvider, ProviderFailure};

pub struct OllamaPlanner {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaPlanner {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderFailure> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ProviderFailure::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl PlannerProvider for OllamaPlanner {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderFailure> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": { "temperature": 0 },
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderFailure::Transport(err.to_string()))?
            .error_for_status()
            .map_err(|err| ProviderFailure::Transport(err.to_string()))?;

        let envelope: serde_json::Value = response
            .json()
            .await
            .map_err(|err| ProviderFailure::Output(format!("Ollama envelope unreadable: {err}")))?;

        envelope
            .get("response")
            .and_then(|value| value.as_str())
            .map(|text| text.to_string())
            .ok_or_else(|| {
                ProviderFailure::Output("Ollama response missing string field 'response'.".into())
            })
    }
}
