//! CommandGate: the single decision point for whether a proposed action is
//! allowed to execute, given the active operating mode.

use crate::approval::{ApprovalRegistry, Decision};
use shared_types::{
    ApprovalRequest, OperatingMode, ResolutionAction, Risk, FORBIDDEN_COMMAND_SUBSTRINGS,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct GateDecision {
    pub execute: bool,
    pub reason: String,
    pub required_approval: Option<ApprovalRequest>,
}

/// Renders the effective command/request text for an action before
/// classification, the way a dashboard preview would show it. Adapters are
/// free to report a more precise string via their own dry-run path; this
/// is the fallback used when only the action kind and params are known.
pub fn effective_command_preview(action: &ResolutionAction) -> String {
    let target = action
        .params
        .get("pod_name")
        .or_else(|| action.params.get("deployment"))
        .or_else(|| action.params.get("resource"))
        .and_then(|v| v.as_str())
        .unwrap_or("<target>");
    let namespace = action
        .params
        .get("namespace")
        .and_then(|v| v.as_str())
        .unwrap_or("default");

    match action.kind.as_str() {
        "restart_pod" => format!("kubectl delete pod {target} -n {namespace}"),
        "scale_deployment" => {
            let replicas = action
                .params
                .get("replicas")
                .map(|v| v.to_string())
                .unwrap_or_else(|| "<n>".to_string());
            format!("kubectl scale deployment {target} -n {namespace} --replicas={replicas}")
        }
        "rollback_deployment" => format!("kubectl rollout undo deployment {target} -n {namespace}"),
        "patch_resource" => format!("kubectl patch {target} -n {namespace}"),
        "delete_resource" => format!("kubectl delete {target} -n {namespace}"),
        other => format!("{other} {target} -n {namespace}"),
    }
}

fn base_risk_from_verb(command: &str) -> Risk {
    let first_word = command.split_whitespace().nth(1).unwrap_or("");
    match first_word {
        "get" | "describe" | "logs" | "top" => Risk::Low,
        "scale" | "rollout" | "patch" => Risk::Medium,
        "delete" | "exec" | "drain" | "cordon" => Risk::High,
        _ => Risk::Medium,
    }
}

fn escalate_if_broad_target(command: &str, risk: Risk) -> Risk {
    let lower = command.to_lowercase();
    if lower.contains("--all") || lower.contains("--all-namespaces") {
        return Risk::High;
    }
    for system_ns in ["kube-system", "kube-public", "kube-node-lease"] {
        if lower.contains(system_ns) {
            return Risk::High;
        }
    }
    if lower.contains(" prod") || lower.contains("-n production") {
        return Risk::High;
    }
    risk
}

pub struct CommandGate {
    approvals: Arc<ApprovalRegistry>,
}

impl CommandGate {
    pub fn new(approvals: Arc<ApprovalRegistry>) -> Self {
        CommandGate { approvals }
    }

    /// Evaluates a proposed command against the forbidden list, a
    /// risk-classification pass, and the active operating mode's policy.
    /// Rule order matches the specification: forbidden check first, then
    /// base risk, then broad-target escalation, then mode policy.
    pub async fn decide(
        &self,
        command: &str,
        action: &ResolutionAction,
        mode: OperatingMode,
        destructive_enabled: bool,
        incident_id: Uuid,
        approval_timeout: Duration,
    ) -> GateDecision {
        let lower = command.to_lowercase();
        if FORBIDDEN_COMMAND_SUBSTRINGS
            .iter()
            .any(|pat| lower.contains(pat))
        {
            return GateDecision {
                execute: false,
                reason: "forbidden".to_string(),
                required_approval: None,
            };
        }

        let risk = escalate_if_broad_target(command, base_risk_from_verb(command));

        match mode {
            OperatingMode::Plan => GateDecision {
                execute: false,
                reason: "plan_mode".to_string(),
                required_approval: None,
            },
            OperatingMode::Auto => {
                let allow = match risk {
                    Risk::Low => true,
                    Risk::Medium => action.confidence >= 0.7,
                    Risk::High => action.confidence >= 0.9 && destructive_enabled,
                };
                GateDecision {
                    execute: allow,
                    reason: if allow {
                        "auto_allowed".to_string()
                    } else {
                        "auto_refused".to_string()
                    },
                    required_approval: None,
                }
            }
            OperatingMode::Approval => {
                if risk == Risk::Low {
                    return GateDecision {
                        execute: true,
                        reason: "approval_mode_low_risk".to_string(),
                        required_approval: None,
                    };
                }

                let (id, decision) = self
                    .approvals
                    .request(incident_id, action.clone(), approval_timeout)
                    .await;
                let request = self
                    .approvals
                    .list_pending()
                    .await
                    .into_iter()
                    .find(|r| r.id == id);

                match decision {
                    Decision::Approved => GateDecision {
                        execute: true,
                        reason: "approved".to_string(),
                        required_approval: request,
                    },
                    Decision::Rejected => GateDecision {
                        execute: false,
                        reason: "rejected".to_string(),
                        required_approval: request,
                    },
                    Decision::Expired => GateDecision {
                        execute: false,
                        reason: "approval_timeout".to_string(),
                        required_approval: request,
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn action(kind: &str, confidence: f32, risk: Risk) -> ResolutionAction {
        ResolutionAction {
            kind: kind.to_string(),
            description: String::new(),
            params: HashMap::new(),
            confidence,
            risk,
            estimated_duration: "30s".to_string(),
            rollback_possible: true,
            preconditions: vec![],
        }
    }

    #[tokio::test]
    async fn forbidden_wins_over_mode() {
        let gate = CommandGate::new(Arc::new(ApprovalRegistry::new()));
        let decision = gate
            .decide(
                "kubectl delete namespace default",
                &action("delete_resource", 0.99, Risk::High),
                OperatingMode::Auto,
                true,
                Uuid::new_v4(),
                Duration::from_secs(1),
            )
            .await;
        assert!(!decision.execute);
        assert_eq!(decision.reason, "forbidden");
    }

    #[tokio::test]
    async fn plan_mode_never_executes() {
        let gate = CommandGate::new(Arc::new(ApprovalRegistry::new()));
        let decision = gate
            .decide(
                "kubectl get pods",
                &action("restart_pod", 0.9, Risk::Low),
                OperatingMode::Plan,
                false,
                Uuid::new_v4(),
                Duration::from_secs(1),
            )
            .await;
        assert!(!decision.execute);
        assert_eq!(decision.reason, "plan_mode");
    }

    #[tokio::test]
    async fn auto_mode_blocks_high_risk_without_destructive_enabled() {
        let gate = CommandGate::new(Arc::new(ApprovalRegistry::new()));
        let decision = gate
            .decide(
                "kubectl delete pod api-x -n default",
                &action("restart_pod", 0.95, Risk::High),
                OperatingMode::Auto,
                false,
                Uuid::new_v4(),
                Duration::from_secs(1),
            )
            .await;
        assert!(!decision.execute);
    }

    #[tokio::test]
    async fn auto_mode_allows_low_risk() {
        let gate = CommandGate::new(Arc::new(ApprovalRegistry::new()));
        let decision = gate
            .decide(
                "kubectl get pods",
                &action("restart_pod", 0.5, Risk::Low),
                OperatingMode::Auto,
                false,
                Uuid::new_v4(),
                Duration::from_secs(1),
            )
            .await;
        assert!(decision.execute);
    }

    #[tokio::test]
    async fn approval_mode_times_out_without_a_decision() {
        let gate = CommandGate::new(Arc::new(ApprovalRegistry::new()));
        let decision = gate
            .decide(
                "kubectl scale deployment web -n default --replicas=3",
                &action("scale_deployment", 0.8, Risk::Medium),
                OperatingMode::Approval,
                false,
                Uuid::new_v4(),
                Duration::from_millis(30),
            )
            .await;
        assert!(!decision.execute);
        assert_eq!(decision.reason, "approval_timeout");
    }

    #[test]
    fn preview_renders_kubectl_style_text() {
        let mut params = HashMap::new();
        params.insert("pod_name".to_string(), serde_json::json!("api-x"));
        params.insert("namespace".to_string(), serde_json::json!("default"));
        let action = ResolutionAction {
            kind: "restart_pod".to_string(),
            description: String::new(),
            params,
            confidence: 0.6,
            risk: Risk::Low,
            estimated_duration: "30s".to_string(),
            rollback_possible: true,
            preconditions: vec![],
        };
        assert_eq!(
            effective_command_preview(&action),
            "kubectl delete pod api-x -n default"
        );
    }
}
