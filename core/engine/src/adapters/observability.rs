//! Observability adapter (Prometheus/Grafana-shaped query API). Read-only
//! by the specification's own design.

use super::{BackendAdapter, Capabilities};
use crate::errors::AdapterError;
use crate::executor::compute_backoff_ms;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde_json::Value;
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

pub struct ObservabilityAdapter {
    config: AdapterEndpointConfig,
}

impl ObservabilityAdapter {
    pub fn new(config: AdapterEndpointConfig) -> Self {
        ObservabilityAdapter { config }
    }
}

#[async_trait]
impl BackendAdapter for ObservabilityAdapter {
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
            context_kinds: ["dashboards", "metrics_query", "alerts", "datasources"]
                .into_iter()
                .map(String::from)
                .collect(),
            action_kinds: vec![],
            features: vec!["read_only".to_string()],
        }
    }

    async fn fetch_context(&self, kind: &str, params: Value, deadline: Duration) -> ContextEntry {
        let Some(endpoint) = self.config.endpoint.as_deref() else {
            return ContextEntry::Error("observability adapter has no endpoint configured".to_string());
        };

        let path = match kind {
            "dashboards" => "/dashboards".to_string(),
            "metrics_query" => format!(
                "/query?q={}",
                params.get("query").and_then(Value::as_str).unwrap_or("")
            ),
            "alerts" => "/alerts".to_string(),
            "datasources" => "/datasources".to_string(),
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
                        Err(err) => ContextEntry::Error(err.to_string()),
                    };
                }
                Ok(Ok(response)) if attempt < MAX_ATTEMPTS && response.status().is_server_error() => {
                    let backoff = compute_backoff_ms(BASE_BACKOFF_MS, MAX_BACKOFF_MS, attempt);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Ok(Ok(response)) => {
                    return ContextEntry::Error(format!("observability backend returned {}", response.status()))
                }
                Ok(Err(err)) if attempt < MAX_ATTEMPTS => {
                    let backoff = compute_backoff_ms(BASE_BACKOFF_MS, MAX_BACKOFF_MS, attempt);
                    tracing::warn!(attempt, error = %err, "observability fetch failed, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Ok(Err(err)) => return ContextEntry::Error(err.to_string()),
                Err(_) => return ContextEntry::Error("context fetch deadline exceeded".to_string()),
            }
        }
    }

    async fn execute_action(&self, kind: &str, _params: Value, _dry_run: bool) -> Result<ActionResult, AdapterError> {
        Err(AdapterError::UnsupportedAction(format!(
            "observability adapter is read-only; rejected action {kind}"
        )))
    }
}
