//! Kubernetes backend adapter: a subprocess speaking the shared
//! request/response JSON contract over stdin/stdout, one line each way.
//! Grounded on the teacher's git_agent binary (same stdio contract, same
//! request/response shapes) with git plumbing replaced by kube-rs calls.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Event as K8sEvent, Pod};
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams};
use kube::Client;
use serde_json::{json, Value};
use shared_types::{ActionError, ActionRequest, ActionResponse, ActionResult};
use std::io::{self, Read};

#[tokio::main]
async fn main() {
    platform::init_tracing("kubernetes_mcp_adapter").expect("failed to init tracing");

    let mut buffer = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut buffer) {
        eprintln!("failed to read request from stdin: {e}");
        return;
    }

    let request: ActionRequest = match serde_json::from_str(&buffer) {
        Ok(req) => req,
        Err(e) => {
            eprintln!("failed to parse ActionRequest: {e}");
            return;
        }
    };

    let response = match Client::try_default().await {
        Ok(client) => handle_request(client, request).await,
        Err(e) => error_response(&request, 503, format!("failed to connect to cluster: {e}")),
    };

    match serde_json::to_string(&response) {
        Ok(json) => print!("{json}"),
        Err(e) => eprintln!("failed to serialize response: {e}"),
    }
}

fn namespace_of(request: &ActionRequest) -> String {
    request
        .payload
        .0
        .get("namespace")
        .and_then(Value::as_str)
        .unwrap_or("default")
        .to_string()
}

fn string_param(request: &ActionRequest, key: &str) -> Option<String> {
    request
        .payload
        .0
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

async fn handle_request(client: Client, request: ActionRequest) -> ActionResponse {
    let namespace = namespace_of(&request);
    let result = match request.action.as_str() {
        "get_pods" => get_pods(client, &namespace, &request).await,
        "get_logs" => get_logs(client, &namespace, &request).await,
        "get_events" => get_events(client, &namespace, &request).await,
        "get_deployment" => get_deployment(client, &namespace, &request).await,
        "restart_pod" => restart_pod(client, &namespace, &request).await,
        "scale_deployment" => scale_deployment(client, &namespace, &request).await,
        "rollback_deployment" => rollback_deployment(client, &namespace, &request).await,
        "patch_resource" => patch_deployment(client, &namespace, &request).await,
        "delete_resource" => delete_pod(client, &namespace, &request).await,
        other => Err(format!("unknown action: {other}")),
    };

    match result {
        Ok(result) => ActionResponse {
            request_id: request.request_id,
            api_version: request.api_version,
            status: "success".to_string(),
            code: 0,
            result: Some(result),
            error: None,
            correlation_id: request.correlation_id,
        },
        Err(message) => error_response(&request, 500, message),
    }
}

fn error_response(request: &ActionRequest, code: u16, message: String) -> ActionResponse {
    ActionResponse {
        request_id: request.request_id,
        api_version: request.api_version,
        status: "error".to_string(),
        code,
        result: None,
        error: Some(ActionError {
            code,
            message: message.clone(),
            detail: message,
            raw_output: None,
        }),
        correlation_id: request.correlation_id,
    }
}

fn text_result(data: String) -> ActionResult {
    ActionResult {
        output_type: "text".to_string(),
        data,
        metadata: None,
    }
}

fn json_result(value: Value) -> ActionResult {
    ActionResult {
        output_type: "json".to_string(),
        data: value.to_string(),
        metadata: None,
    }
}

async fn get_pods(client: Client, namespace: &str, request: &ActionRequest) -> Result<ActionResult, String> {
    let api: Api<Pod> = Api::namespaced(client, namespace);
    let label_selector = string_param(request, "label_selector");
    let mut params = ListParams::default();
    if let Some(selector) = &label_selector {
        params = params.labels(selector);
    }
    let pods = api.list(&params).await.map_err(|e| e.to_string())?;
    let summary: Vec<Value> = pods
        .items
        .iter()
        .map(|pod| {
            let phase = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_default();
            let restarts: i32 = pod
                .status
                .as_ref()
                .and_then(|s| s.container_statuses.as_ref())
                .map(|cs| cs.iter().map(|c| c.restart_count).sum())
                .unwrap_or(0);
            json!({
                "name": pod.metadata.name,
                "phase": phase,
                "restart_count": restarts,
            })
        })
        .collect();
    Ok(json_result(json!(summary)))
}

async fn get_logs(client: Client, namespace: &str, request: &ActionRequest) -> Result<ActionResult, String> {
    let pod_name = string_param(request, "pod_name").ok_or("pod_name is required")?;
    let api: Api<Pod> = Api::namespaced(client, namespace);
    let tail_lines = request
        .payload
        .0
        .get("tail_lines")
        .and_then(Value::as_i64);
    let params = LogParams {
        tail_lines,
        ..Default::default()
    };
    let logs = api.logs(&pod_name, &params).await.map_err(|e| e.to_string())?;
    Ok(text_result(logs))
}

async fn get_events(client: Client, namespace: &str, request: &ActionRequest) -> Result<ActionResult, String> {
    let api: Api<K8sEvent> = Api::namespaced(client, namespace);
    let field_selector = string_param(request, "involved_object")
        .map(|name| format!("involvedObject.name={name}"));
    let mut params = ListParams::default();
    if let Some(selector) = &field_selector {
        params = params.fields(selector);
    }
    let events = api.list(&params).await.map_err(|e| e.to_string())?;
    let summary: Vec<Value> = events
        .items
        .iter()
        .map(|e| {
            json!({
                "reason": e.reason,
                "message": e.message,
                "type": e.type_,
                "count": e.count,
            })
        })
        .collect();
    Ok(json_result(json!(summary)))
}

async fn get_deployment(
    client: Client,
    namespace: &str,
    request: &ActionRequest,
) -> Result<ActionResult, String> {
    let name = string_param(request, "deployment").ok_or("deployment is required")?;
    let api: Api<Deployment> = Api::namespaced(client, namespace);
    let deployment = api.get(&name).await.map_err(|e| e.to_string())?;
    let status = deployment.status.unwrap_or_default();
    let unhealthy = status.unavailable_replicas.unwrap_or(0) > 0;
    Ok(json_result(json!({
        "name": name,
        "replicas": status.replicas.unwrap_or(0),
        "ready_replicas": status.ready_replicas.unwrap_or(0),
        "unavailable_replicas": status.unavailable_replicas.unwrap_or(0),
        "unhealthy": unhealthy,
    })))
}

async fn restart_pod(client: Client, namespace: &str, request: &ActionRequest) -> Result<ActionResult, String> {
    let pod_name = string_param(request, "pod_name").ok_or("pod_name is required")?;
    let api: Api<Pod> = Api::namespaced(client, namespace);
    api.delete(&pod_name, &DeleteParams::default())
        .await
        .map_err(|e| e.to_string())?;
    Ok(text_result(format!("deleted pod {pod_name} for controller-managed restart")))
}

async fn scale_deployment(
    client: Client,
    namespace: &str,
    request: &ActionRequest,
) -> Result<ActionResult, String> {
    let name = string_param(request, "deployment").ok_or("deployment is required")?;
    let replicas = request
        .payload
        .0
        .get("replicas")
        .and_then(Value::as_i64)
        .ok_or("replicas is required")?;
    let api: Api<Deployment> = Api::namespaced(client, namespace);
    let patch = json!({ "spec": { "replicas": replicas } });
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| e.to_string())?;
    Ok(text_result(format!("scaled {name} to {replicas} replicas")))
}

/// Rolls back a deployment to its previous revision by restoring the pod
/// template stored in the `kubectl.kubernetes.io/last-applied-template`
/// annotation the planner requires the caller to have captured. This is a
/// simplification of `kubectl rollout undo`, which walks ReplicaSet history
/// that is not exposed as a single API call.
async fn rollback_deployment(
    client: Client,
    namespace: &str,
    request: &ActionRequest,
) -> Result<ActionResult, String> {
    let name = string_param(request, "deployment").ok_or("deployment is required")?;
    let previous_template = request
        .payload
        .0
        .get("previous_template")
        .cloned()
        .ok_or("previous_template is required to roll back without querying ReplicaSet history")?;
    let api: Api<Deployment> = Api::namespaced(client, namespace);
    let patch = json!({ "spec": { "template": previous_template } });
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| e.to_string())?;
    Ok(text_result(format!("rolled back {name} to the stored previous template")))
}

async fn patch_deployment(
    client: Client,
    namespace: &str,
    request: &ActionRequest,
) -> Result<ActionResult, String> {
    let name = string_param(request, "deployment").ok_or("deployment is required")?;
    let patch_body = request
        .payload
        .0
        .get("patch")
        .cloned()
        .ok_or("patch is required")?;
    let api: Api<Deployment> = Api::namespaced(client, namespace);
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch_body))
        .await
        .map_err(|e| e.to_string())?;
    Ok(text_result(format!("patched deployment {name}")))
}

async fn delete_pod(client: Client, namespace: &str, request: &ActionRequest) -> Result<ActionResult, String> {
    let pod_name = string_param(request, "pod_name").ok_or("pod_name is required")?;
    let api: Api<Pod> = Api::namespaced(client, namespace);
    api.delete(&pod_name, &DeleteParams::default())
        .await
        .map_err(|e| e.to_string())?;
    Ok(text_result(format!("deleted pod {pod_name}")))
}
