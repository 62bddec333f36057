//! Kubernetes adapter: talks to the `kubernetes_mcp_adapter` child process
//! over a single stdin/stdout JSON exchange per call. Grounded on the
//! teacher's agent subprocess dispatch, generalized with the retry/backoff
//! policy the specification requires for transient I/O errors.

use super::{BackendAdapter, Capabilities};
use crate::errors::AdapterError;
use crate::executor::compute_backoff_ms;
use async_trait::async_trait;
use serde_json::{json, Value};
use shared_types::{ActionRequest, ActionResponse, ActionResult, ContextEntry, Payload, API_VERSION_CURRENT};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use uuid::Uuid;

const MAX_ATTEMPTS: u8 = 3;
const BASE_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 8_000;

/// Actions the adapter itself refuses unless destructive operations are
/// explicitly enabled, independent of whatever CommandGate decides.
const DESTRUCTIVE_ACTIONS: &[&str] = &["delete_resource"];

pub struct KubernetesAdapter {
    binary_path: PathBuf,
    destructive_enabled: bool,
    call_timeout: Duration,
}

impl KubernetesAdapter {
    pub fn new(binary_path: PathBuf, destructive_enabled: bool, call_timeout: Duration) -> Self {
        KubernetesAdapter {
            binary_path,
            destructive_enabled,
            call_timeout,
        }
    }

    async fn call(&self, action: &str, payload: Value) -> Result<ActionResponse, String> {
        let mut attempt = 1u8;
        loop {
            let request = ActionRequest {
                request_id: Uuid::new_v4(),
                api_version: Some(API_VERSION_CURRENT),
                action: action.to_string(),
                context: "kubernetes".to_string(),
                correlation_id: None,
                payload: Payload(payload.clone()),
            };

            match self.spawn_once(&request).await {
                Ok(response) => return Ok(response),
                Err(err) if attempt < MAX_ATTEMPTS => {
                    let backoff = compute_backoff_ms(BASE_BACKOFF_MS, MAX_BACKOFF_MS, attempt);
                    tracing::warn!(attempt, error = %err, "kubernetes adapter call failed, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn spawn_once(&self, request: &ActionRequest) -> Result<ActionResponse, String> {
        let request_json = serde_json::to_string(request).map_err(|e| e.to_string())?;
        let mut child = Command::new(&self.binary_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| format!("failed to spawn kubernetes adapter: {e}"))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request_json.as_bytes())
                .await
                .map_err(|e| e.to_string())?;
        }

        let output = timeout(self.call_timeout, child.wait_with_output())
            .await
            .map_err(|_| "kubernetes adapter call timed out".to_string())?
            .map_err(|e| e.to_string())?;

        if !output.status.success() {
            return Err(format!("kubernetes adapter exited with {:?}", output.status));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(&stdout).map_err(|e| format!("invalid adapter response: {e}"))
    }
}

#[async_trait]
impl BackendAdapter for KubernetesAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.binary_path.exists()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            context_kinds: ["pods", "services", "deployments", "events", "logs", "metrics"]
                .into_iter()
                .map(String::from)
                .collect(),
            action_kinds: [
                "restart_pod",
                "scale_deployment",
                "rollback_deployment",
                "patch_resource",
                "delete_resource",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            features: vec!["subprocess_mcp".to_string()],
        }
    }

    async fn fetch_context(&self, kind: &str, params: Value, deadline: Duration) -> ContextEntry {
        let action = match kind {
            "pods" => "get_pods",
            "logs" => "get_logs",
            "events" => "get_events",
            "deployments" | "metrics" | "services" => "get_deployment",
            other => other,
        };

        match timeout(deadline, self.call(action, params)).await {
            Ok(Ok(response)) if response.status == "success" => {
                let data = response.result.map(|r| json!(r.data)).unwrap_or(Value::Null);
                ContextEntry::Payload(Payload(data))
            }
            Ok(Ok(response)) => ContextEntry::Error(
                response
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "adapter reported an error".to_string()),
            ),
            Ok(Err(err)) => ContextEntry::Error(err),
            Err(_) => ContextEntry::Error("context fetch deadline exceeded".to_string()),
        }
    }

    async fn execute_action(&self, kind: &str, params: Value, dry_run: bool) -> Result<ActionResult, AdapterError> {
        if DESTRUCTIVE_ACTIONS.contains(&kind) && !self.destructive_enabled && !dry_run {
            return Err(AdapterError::DestructiveDisabled);
        }

        let mut payload = params;
        if let Value::Object(map) = &mut payload {
            map.insert("dry_run".to_string(), json!(dry_run));
        }

        if dry_run {
            return Ok(ActionResult {
                output_type: "dry_run".to_string(),
                data: format!("would execute {kind} with {payload}"),
                metadata: None,
            });
        }

        let response = self.call(kind, payload).await.map_err(AdapterError::Subprocess)?;
        response.result.ok_or_else(|| {
            AdapterError::Subprocess(
                response
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "adapter returned no result".to_string()),
            )
        })
    }
}
