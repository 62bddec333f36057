//! ResolutionPlanner: given an alert, its classified kind, and the
//! gathered context, produces an ordered list of candidate remediation
//! actions. Grounded on the original agent's per-kind resolver strategies
//! (pod crash / image pull / resource pressure / service down / deployment
//! failure), generalized into a single deterministic function per kind.

use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::json;
use shared_types::{Alert, AlertKind, ContextBundle, ContextEntry, Payload, ResolutionAction, Risk};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Bounded in-memory record of past planning decisions, process-wide.
/// Grounded on `kubernetes_resolver.py`'s `resolution_history`. Diagnostics
/// only; `plan` never reads this back, so it has no bearing on future
/// decisions.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionHistoryEntry {
    pub alert_kind: AlertKind,
    pub action_kind: String,
    pub confidence: f32,
    pub risk: Risk,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

const RESOLUTION_HISTORY_CAPACITY: usize = 200;

static RESOLUTION_HISTORY: Lazy<Mutex<VecDeque<ResolutionHistoryEntry>>> =
    Lazy::new(|| Mutex::new(VecDeque::with_capacity(RESOLUTION_HISTORY_CAPACITY)));

fn record_resolution_history(kind: AlertKind, actions: &[ResolutionAction]) {
    let mut history = RESOLUTION_HISTORY.lock().expect("resolution history mutex poisoned");
    for action in actions {
        if history.len() >= RESOLUTION_HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(ResolutionHistoryEntry {
            alert_kind: kind,
            action_kind: action.kind.clone(),
            confidence: action.confidence,
            risk: action.risk,
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Snapshot of recent planning decisions across the process, oldest first.
/// Diagnostics only; not consulted by `plan` itself.
pub fn resolution_history() -> Vec<ResolutionHistoryEntry> {
    RESOLUTION_HISTORY
        .lock()
        .expect("resolution history mutex poisoned")
        .iter()
        .cloned()
        .collect()
}

fn action(
    kind: &str,
    description: &str,
    params: HashMap<String, serde_json::Value>,
    confidence: f32,
    risk: Risk,
    estimated_duration: &str,
    rollback_possible: bool,
    preconditions: Vec<&str>,
) -> ResolutionAction {
    ResolutionAction {
        kind: kind.to_string(),
        description: description.to_string(),
        params,
        confidence,
        risk,
        estimated_duration: estimated_duration.to_string(),
        rollback_possible,
        preconditions: preconditions.into_iter().map(str::to_string).collect(),
    }
}

fn context_text(context: &ContextBundle, key: &str) -> Option<String> {
    match context.get(key) {
        Some(ContextEntry::Payload(Payload(value))) => Some(value.to_string().to_lowercase()),
        _ => None,
    }
}

fn restart_count(alert: &Alert) -> u64 {
    alert
        .metadata
        .get("restart_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0)
}

fn replica_count(alert: &Alert) -> u64 {
    alert
        .metadata
        .get("replicas")
        .and_then(|v| v.as_u64())
        .unwrap_or(1)
}

fn pod_params(alert: &Alert) -> HashMap<String, serde_json::Value> {
    let mut params = HashMap::new();
    if let Some(pod_name) = alert.metadata.get("pod_name") {
        params.insert("pod_name".to_string(), pod_name.clone());
    }
    if let Some(namespace) = alert.metadata.get("namespace") {
        params.insert("namespace".to_string(), namespace.clone());
    }
    params
}

fn resolve_pod_crash(alert: &Alert, context: &ContextBundle) -> Vec<ResolutionAction> {
    let mut actions = Vec::new();
    let logs = context_text(context, "logs").unwrap_or_default();
    let description = alert.description.to_lowercase();

    if logs.contains("oom") || description.contains("oom") || description.contains("out of memory")
    {
        actions.push(action(
            "increase_memory_limit",
            "increase the pod's memory limit by 50%",
            pod_params(alert),
            0.8,
            Risk::Low,
            "1m",
            true,
            vec![],
        ));
    }

    if logs.contains("permission denied") || logs.contains("configmap") || logs.contains("secret") {
        actions.push(action(
            "check_configmaps_secrets",
            "verify referenced configmaps and secrets exist and are mounted correctly",
            pod_params(alert),
            0.7,
            Risk::Low,
            "2m",
            false,
            vec![],
        ));
    }

    if restart_count(alert) < 5 {
        actions.push(action(
            "restart_pod",
            "restart the crashing pod",
            pod_params(alert),
            0.6,
            Risk::Low,
            "30s",
            true,
            vec!["managed_by_controller"],
        ));
    } else {
        actions.push(action(
            "manual_investigation",
            "restart count exceeds automatic-remediation threshold; flag for manual review",
            pod_params(alert),
            0.9,
            Risk::Low,
            "n/a",
            false,
            vec![],
        ));
    }

    if logs.contains("connection refused") || logs.contains("timeout") || logs.contains("timed out")
    {
        actions.push(action(
            "check_dependencies",
            "verify downstream service dependencies are reachable",
            pod_params(alert),
            0.7,
            Risk::Low,
            "2m",
            false,
            vec![],
        ));
    }

    actions
}

fn resolve_image_pull(alert: &Alert) -> Vec<ResolutionAction> {
    let mut actions = vec![
        action(
            "verify_image_pull_secret",
            "verify the image pull secret is present and valid",
            pod_params(alert),
            0.7,
            Risk::Low,
            "1m",
            false,
            vec![],
        ),
        action(
            "verify_image_exists",
            "verify the referenced image tag exists in the registry",
            pod_params(alert),
            0.7,
            Risk::Low,
            "1m",
            false,
            vec![],
        ),
    ];

    if alert.description.contains(':') || alert.metadata.contains_key("image_tag") {
        actions.push(action(
            "rollback_image_version",
            "roll back to the last known-good image tag",
            pod_params(alert),
            0.7,
            Risk::Medium,
            "2m",
            true,
            vec![],
        ));
    }

    actions
}

fn resolve_resource_pressure(alert: &Alert, resource: &str) -> Vec<ResolutionAction> {
    let mut actions = Vec::new();
    let mut params = pod_params(alert);

    if replica_count(alert) < 10 {
        let mut scale_params = params.clone();
        scale_params.insert("replicas".to_string(), json!(replica_count(alert) + 2));
        actions.push(action(
            "scale_deployment",
            "scale the deployment out by 2 replicas, capped at 10",
            scale_params,
            0.8,
            Risk::Low,
            "1m",
            true,
            vec![],
        ));
    }

    params.insert("resource".to_string(), json!(resource));
    actions.push(action(
        &format!("increase_{resource}_limits"),
        &format!("increase the {resource} limit by 50%"),
        params.clone(),
        0.7,
        Risk::Medium,
        "1m",
        true,
        vec![],
    ));

    if resource == "memory" {
        actions.push(action(
            "check_memory_leak",
            "inspect memory growth over time for a possible leak",
            params,
            0.5,
            Risk::Low,
            "5m",
            false,
            vec![],
        ));
    }

    actions
}

fn resolve_service_down(alert: &Alert, context: &ContextBundle) -> Vec<ResolutionAction> {
    let endpoint_count = alert
        .metadata
        .get("endpoint_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let has_matching_pods = context_text(context, "pods")
        .map(|text| !text.is_empty() && text != "[]" && text != "{}")
        .unwrap_or(false);

    if endpoint_count == 0 && !has_matching_pods {
        vec![action(
            "deploy_missing_pods",
            "no endpoints and no matching pods; redeploy the workload",
            pod_params(alert),
            0.9,
            Risk::Low,
            "3m",
            false,
            vec![],
        )]
    } else {
        vec![action(
            "fix_pod_issues",
            "one or more pods are not Running; investigate and remediate per-pod",
            pod_params(alert),
            0.8,
            Risk::Low,
            "3m",
            false,
            vec![],
        )]
    }
}

fn resolve_deployment_failed(alert: &Alert, context: &ContextBundle) -> Vec<ResolutionAction> {
    let unhealthy = context_text(context, "deployment")
        .map(|text| text.contains("unhealthy") || text.contains("progressdeadlineexceeded"))
        .unwrap_or(true);

    if unhealthy {
        vec![action(
            "rollback_deployment",
            "roll back to the previous healthy revision",
            pod_params(alert),
            0.9,
            Risk::Low,
            "2m",
            false,
            vec![],
        )]
    } else {
        vec![
            action(
                "check_resource_quotas",
                "verify namespace resource quotas are not blocking the rollout",
                pod_params(alert),
                0.6,
                Risk::Low,
                "2m",
                false,
                vec![],
            ),
            action(
                "progressive_rollout",
                "retry the rollout with a progressive strategy",
                pod_params(alert),
                0.5,
                Risk::Medium,
                "5m",
                true,
                vec![],
            ),
        ]
    }
}

/// Produces an ordered list of `ResolutionAction`s for the given alert,
/// classified kind, and gathered context. Stable-sorted by descending
/// confidence, ties broken by ascending risk then insertion order.
pub fn plan(alert: &Alert, kind: AlertKind, context: &ContextBundle) -> Vec<ResolutionAction> {
    let mut actions = match kind {
        AlertKind::PodCrash | AlertKind::OomKill => resolve_pod_crash(alert, context),
        AlertKind::ImagePull => resolve_image_pull(alert),
        AlertKind::HighMemory => resolve_resource_pressure(alert, "memory"),
        AlertKind::HighCpu => resolve_resource_pressure(alert, "cpu"),
        AlertKind::ServiceDown => resolve_service_down(alert, context),
        AlertKind::DeploymentFailed => resolve_deployment_failed(alert, context),
        AlertKind::NodeIssue | AlertKind::Unknown => Vec::new(),
    };

    // Stable sort keeps insertion order for ties; reverse confidence first,
    // then promote lower risk among equal confidence.
    actions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then(a.risk.cmp(&b.risk))
    });

    record_resolution_history(kind, &actions);

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared_types::Severity;

    fn alert(description: &str, metadata: HashMap<String, serde_json::Value>) -> Alert {
        Alert {
            id: "a1".to_string(),
            severity: Severity::High,
            service: "api".to_string(),
            description: description.to_string(),
            timestamp: Utc::now(),
            metadata,
        }
    }

    #[test]
    fn pod_crash_under_restart_threshold_proposes_restart() {
        let a = alert("Pod api-x is in CrashLoopBackOff", HashMap::new());
        let plan = plan(&a, AlertKind::PodCrash, &ContextBundle::new());
        assert!(plan.iter().any(|p| p.kind == "restart_pod"));
    }

    #[test]
    fn pod_crash_over_restart_threshold_flags_manual_investigation() {
        let mut metadata = HashMap::new();
        metadata.insert("restart_count".to_string(), json!(7));
        let a = alert("Pod api-x is in CrashLoopBackOff", metadata);
        let plan = plan(&a, AlertKind::PodCrash, &ContextBundle::new());
        assert!(plan.iter().any(|p| p.kind == "manual_investigation"));
        assert!(!plan.iter().any(|p| p.kind == "restart_pod"));
    }

    #[test]
    fn plan_is_sorted_by_descending_confidence() {
        let mut metadata = HashMap::new();
        metadata.insert("restart_count".to_string(), json!(1));
        let mut context = ContextBundle::new();
        context.insert(
            "logs".to_string(),
            ContextEntry::Payload(Payload(json!("OOM killed, permission denied on configmap"))),
        );
        let a = alert("Pod api-x is in CrashLoopBackOff", metadata);
        let actions = plan(&a, AlertKind::PodCrash, &context);

        for window in actions.windows(2) {
            assert!(window[0].confidence >= window[1].confidence);
        }
    }

    #[test]
    fn high_memory_scales_when_under_replica_cap() {
        let mut metadata = HashMap::new();
        metadata.insert("replicas".to_string(), json!(3));
        let a = alert("High memory usage detected", metadata);
        let plan = plan(&a, AlertKind::HighMemory, &ContextBundle::new());
        assert!(plan.iter().any(|p| p.kind == "scale_deployment"));
        assert!(plan.iter().any(|p| p.kind == "increase_memory_limits"));
    }

    #[test]
    fn unknown_kind_produces_no_actions() {
        let a = alert("mystery event", HashMap::new());
        assert!(plan(&a, AlertKind::Unknown, &ContextBundle::new()).is_empty());
    }

    #[test]
    fn planning_appends_to_resolution_history() {
        let a = alert("Pod api-x is in CrashLoopBackOff", HashMap::new());
        let produced = plan(&a, AlertKind::PodCrash, &ContextBundle::new());
        assert!(!produced.is_empty());
        let after = resolution_history();
        assert!(after
            .iter()
            .any(|e| e.alert_kind == AlertKind::PodCrash && e.action_kind == "restart_pod"));
    }
}
