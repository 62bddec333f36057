//! Source-hosting adapter (GitHub/GitLab-shaped REST API). Read-heavy
//! capabilities plus two low-risk write actions.

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

pub struct SourceHostingAdapter {
    config: AdapterEndpointConfig,
}

impl SourceHostingAdapter {
    pub fn new(config: AdapterEndpointConfig) -> Self {
        SourceHostingAdapter { config }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder, AdapterError> {
        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .ok_or(AdapterError::NotConfigured("source hosting adapter"))?;
        let mut builder = HTTP_CLIENT.request(method, format!("{endpoint}{path}"));
        if let Some(token) = &self.config.credential_handle {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }
}

#[async_trait]
impl BackendAdapter for SourceHostingAdapter {
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
            context_kinds: [
                "repo_info",
                "commits_since",
                "open_issues",
                "pull_requests",
                "workflow_runs",
                "file_contents",
                "code_search",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            action_kinds: ["create_issue", "add_comment"].into_iter().map(String::from).collect(),
            features: vec!["rest".to_string()],
        }
    }

    async fn fetch_context(&self, kind: &str, params: Value, deadline: Duration) -> ContextEntry {
        let path = match kind {
            "repo_info" => "/repo".to_string(),
            "commits_since" => "/commits".to_string(),
            "open_issues" => "/issues".to_string(),
            "pull_requests" => "/pulls".to_string(),
            "workflow_runs" => "/actions/runs".to_string(),
            "file_contents" => format!(
                "/contents/{}",
                params.get("path").and_then(Value::as_str).unwrap_or("")
            ),
            "code_search" => "/search/code".to_string(),
            other => format!("/{other}"),
        };

        let mut attempt = 1u8;
        loop {
            let request = match self.request(reqwest::Method::GET, &path) {
                Ok(r) => r,
                Err(err) => return ContextEntry::Error(err.to_string()),
            };

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
                Ok(Ok(response)) => return ContextEntry::Error(format!("source hosting returned {}", response.status())),
                Ok(Err(err)) if attempt < MAX_ATTEMPTS => {
                    let backoff = compute_backoff_ms(BASE_BACKOFF_MS, MAX_BACKOFF_MS, attempt);
                    tracing::warn!(attempt, error = %err, "source hosting fetch failed, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Ok(Err(err)) => return ContextEntry::Error(err.to_string()),
                Err(_) => return ContextEntry::Error("context fetch deadline exceeded".to_string()),
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

        let path = match kind {
            "create_issue" => "/issues",
            "add_comment" => "/comments",
            other => return Err(AdapterError::UnsupportedAction(other.to_string())),
        };

        let mut attempt = 1u8;
        loop {
            let request = self.request(reqwest::Method::POST, path)?.json(&params);
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    let body = response.text().await.unwrap_or_default();
                    return Ok(ActionResult {
                        output_type: "json".to_string(),
                        data: body,
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
                    tracing::warn!(attempt, error = %err, "source hosting action failed, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(err) => return Err(AdapterError::Request(err)),
            }
        }
    }
}
