//! Pager adapter (PagerDuty/Opsgenie-shaped incident API). Write-only by
//! design: there is nothing to gather context on, only actions to take.

use super::{BackendAdapter, Capabilities};
use crate::errors::AdapterError;
use crate::executor::compute_backoff_ms;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde_json::Value;
use shared_types::{ActionResult, AdapterEndpointConfig, ContextEntry};
use std::time::Duration;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build reqwest client")
});

const MAX_ATTEMPTS: u8 = 3;
const BASE_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_MS: u64 = 2_000;

pub struct PagerAdapter {
    config: AdapterEndpointConfig,
}

impl PagerAdapter {
    pub fn new(config: AdapterEndpointConfig) -> Self {
        PagerAdapter { config }
    }
}

#[async_trait]
impl BackendAdapter for PagerAdapter {
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
            context_kinds: vec![],
            action_kinds: ["acknowledge", "resolve", "add_note", "trigger_event"]
                .into_iter()
                .map(String::from)
                .collect(),
            features: vec!["write_only".to_string()],
        }
    }

    async fn fetch_context(&self, kind: &str, _params: Value, _deadline: Duration) -> ContextEntry {
        ContextEntry::Error(format!("pager adapter has no context kind {kind}"))
    }

    async fn execute_action(&self, kind: &str, params: Value, dry_run: bool) -> Result<ActionResult, AdapterError> {
        if dry_run {
            return Ok(ActionResult {
                output_type: "dry_run".to_string(),
                data: format!("would call {kind} with {params}"),
                metadata: None,
            });
        }

        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .ok_or(AdapterError::NotConfigured("pager adapter"))?;

        let path = match kind {
            "acknowledge" => "/acknowledge",
            "resolve" => "/resolve",
            "add_note" => "/notes",
            "trigger_event" => "/events",
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
                Ok(response) if attempt < MAX_ATTEMPTS && response.status().is_server_error() => {
                    let backoff = compute_backoff_ms(BASE_BACKOFF_MS, MAX_BACKOFF_MS, attempt);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Ok(response) => return Err(AdapterError::BackendStatus(response.status())),
                Err(err) if attempt < MAX_ATTEMPTS => {
                    let backoff = compute_backoff_ms(BASE_BACKOFF_MS, MAX_BACKOFF_MS, attempt);
                    tracing::warn!(attempt, error = %err, "pager action failed, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(err) => return Err(AdapterError::Request(err)),
            }
        }
    }
}
