//! Single-shot LLM prompt/response client. Grounded on the teacher's
//! `llm_router_agent` subprocess, folded in-process since nothing in the
//! specification requires the LLM call to live in a separate binary.

use once_cell::sync::Lazy;
use reqwest::Client;
use shared_types::LlmConfig;
use std::time::Duration;
use thiserror::Error;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build reqwest client")
});

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("llm returned an unexpected response shape: {0}")]
    Shape(String),
    #[error("llm call timed out after {0:?}")]
    Timeout(Duration),
}

pub struct LlmClient {
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        LlmClient { config }
    }

    /// Single primitive: generate text from a prompt. A failure here is
    /// always degradable by the caller, never fatal on its own.
    pub async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://openrouter.ai/api/v1");
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let mut request = HTTP_CLIENT
            .post(format!("{base_url}/chat/completions"))
            .header("HTTP-Referer", "https://localhost")
            .header("X-Title", "oncall-engine")
            .json(&body);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| LlmError::Timeout(timeout))??;

        let value: serde_json::Value = response.json().await?;

        value["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::Shape(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_defaults() {
        let client = LlmClient::new(LlmConfig::default());
        assert_eq!(client.config.provider, "openrouter");
    }
}
