//! Documentation adapter (Obsidian/Confluence-shaped page API). Grounded
//! on the teacher's obsidian_agent, folded in-process and required by the
//! specification to degrade gracefully when the backend is unreachable
//! rather than failing the incident.

use super::{BackendAdapter, Capabilities};
use crate::errors::AdapterError;
use crate::executor::compute_backoff_ms;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde_json::{json, Value};
use shared_types::{ActionResult, AdapterEndpointConfig, ContextEntry, Payload};
use std::time::Duration;
use tokio::time::timeout;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build reqwest client")
});

const MAX_ATTEMPTS: u8 = 3;
const BASE_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_MS: u64 = 2_000;

pub struct DocumentationAdapter {
    config: AdapterEndpointConfig,
}

impl DocumentationAdapter {
    pub fn new(config: AdapterEndpointConfig) -> Self {
        DocumentationAdapter { config }
    }

    fn mock_payload(reason: &str) -> ContextEntry {
        ContextEntry::Payload(Payload(json!({ "mock": true, "reason": reason })))
    }
}

#[async_trait]
impl BackendAdapter for DocumentationAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.config.endpoint.is_some()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            context_kinds: vec!["search".to_string(), "get_page".to_string()],
            action_kinds: vec!["create_page".to_string(), "append_blocks".to_string()],
            features: vec!["tolerates_offline".to_string()],
        }
    }

    async fn fetch_context(&self, kind: &str, params: Value, deadline: Duration) -> ContextEntry {
        let Some(endpoint) = self.config.endpoint.as_deref() else {
            return Self::mock_payload("documentation backend not configured");
        };

        let path = match kind {
            "search" => format!("/search?q={}", params.get("query").and_then(Value::as_str).unwrap_or("")),
            "get_page" => format!("/pages/{}", params.get("page").and_then(Value::as_str).unwrap_or("")),
            other => format!("/{other}"),
        };

        let mut attempt = 1u8;
        loop {
            let mut request = HTTP_CLIENT.get(format!("{endpoint}{path}"));
            if let Some(token) = &self.config.credential_handle {
                request = request.bearer_auth(token);
            }

            match timeout(deadline, request.send()).await {
                Ok(Ok(response)) if response.status().is_success() => {
                    return match response.json::<Value>().await {
                        Ok(value) => ContextEntry::Payload(Payload(value)),
                        Err(_) => Self::mock_payload("documentation backend returned an unreadable body"),
                    };
                }
                Ok(Ok(response)) => {
                    return Self::mock_payload(&format!("documentation backend returned {}", response.status()))
                }
                Ok(Err(_)) | Err(_) if attempt < MAX_ATTEMPTS => {
                    let backoff = compute_backoff_ms(BASE_BACKOFF_MS, MAX_BACKOFF_MS, attempt);
                    tracing::warn!(attempt, "documentation fetch failed, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Ok(Err(_)) | Err(_) => return Self::mock_payload("documentation backend unreachable"),
            }
        }
    }

    async fn execute_action(&self, kind: &str, params: Value, dry_run: bool) -> Result<ActionResult, AdapterError> {
        if dry_run {
            return Ok(ActionResult {
                output_type: "dry_run".to_string(),
                data: format!("would call {kind} with {params}"),
                metadata: None,
            });
        }

        let Some(endpoint) = self.config.endpoint.as_deref() else {
            return Ok(ActionResult {
                output_type: "mock".to_string(),
                data: "documentation backend not configured; action skipped".to_string(),
                metadata: Some(json!({ "mock": true })),
            });
        };

        let path = match kind {
            "create_page" => "/pages",
            "append_blocks" => "/blocks",
            other => return Err(AdapterError::UnsupportedAction(other.to_string())),
        };

        let mut attempt = 1u8;
        loop {
            let mut request = HTTP_CLIENT.post(format!("{endpoint}{path}")).json(&params);
            if let Some(token) = &self.config.credential_handle {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    return Ok(ActionResult {
                        output_type: "json".to_string(),
                        data: response.text().await.unwrap_or_default(),
                        metadata: None,
                    });
                }
                Ok(response) => {
                    return Ok(ActionResult {
                        output_type: "mock".to_string(),
                        data: format!("documentation backend returned {}; action treated as a no-op", response.status()),
                        metadata: Some(json!({ "mock": true })),
                    });
                }
                Err(_) if attempt < MAX_ATTEMPTS => {
                    let backoff = compute_backoff_ms(BASE_BACKOFF_MS, MAX_BACKOFF_MS, attempt);
                    tracing::warn!(attempt, "documentation action failed, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(_) => {
                    return Ok(ActionResult {
                        output_type: "mock".to_string(),
                        data: "documentation backend unreachable; action treated as a no-op".to_string(),
                        metadata: Some(json!({ "mock": true })),
                    });
                }
            }
        }
    }
}
