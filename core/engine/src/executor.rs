//! Executor: turns an approved `ResolutionAction` into an `ExecutionRecord`.
//! Grounded on the teacher's agent subprocess dispatch (stdin/stdout JSON,
//! timeout, exponential backoff) generalized to the gate/verify/trace loop
//! the specification describes.

use crate::circuit_breaker::CircuitBreaker;
use crate::errors::AdapterError;
use crate::event_bus::EventBus;
use crate::gate::{effective_command_preview, CommandGate};
use crate::trace_store::TraceStore;
use shared_types::{
    Event, EventLevel, ExecutionRecord, IncidentId, OperatingMode, Payload, ResolutionAction,
    Risk, RiskAssessment, TraceEvent, TraceLevel, TraceStage, VerificationOutcome,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn risk_assessment(action: &ResolutionAction, forbidden: bool, reason: &str) -> RiskAssessment {
    RiskAssessment {
        level: action.risk,
        forbidden,
        reason: reason.to_string(),
        affects_all: false,
    }
}

/// Adapters implement this to perform the actual remediation call and to
/// verify that the system settled afterward.
#[async_trait::async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &ResolutionAction) -> Result<(), AdapterError>;
    async fn verify(&self, action: &ResolutionAction) -> VerificationOutcome;
}

const MAX_FAILURES_PER_PLAN: u8 = 3;

pub struct Executor {
    gate: CommandGate,
    circuit_breaker: Arc<CircuitBreaker>,
    events: Arc<EventBus>,
    trace_store: TraceStore,
}

/// Actions whose effects can actually be verified by re-reading backend
/// state after the fact. Anything outside this set reports `NotApplicable`.
const VERIFIABLE_KINDS: &[&str] = &[
    "restart_pod",
    "scale_deployment",
    "rollback_deployment",
    "deploy_missing_pods",
];

impl Executor {
    pub fn new(
        gate: CommandGate,
        circuit_breaker: Arc<CircuitBreaker>,
        events: Arc<EventBus>,
        trace_store: TraceStore,
    ) -> Self {
        Executor {
            gate,
            circuit_breaker,
            events,
            trace_store,
        }
    }

    fn publish_circuit_open(&self, incident_id: IncidentId) {
        self.events.publish(Event {
            timestamp: chrono::Utc::now(),
            level: EventLevel::Warning,
            message: "circuit breaker opened".to_string(),
            incident_id: Some(incident_id),
            stage: None,
            integration: None,
            action: None,
            progress: None,
            attributes: Default::default(),
        });
    }

    async fn trace_gating(&self, incident_id: IncidentId, action: &ResolutionAction, execute: bool, reason: &str) {
        let mut attributes = HashMap::new();
        attributes.insert("action".to_string(), serde_json::json!(action.kind));
        attributes.insert("execute".to_string(), serde_json::json!(execute));
        attributes.insert("reason".to_string(), serde_json::json!(reason));
        let event = TraceEvent {
            timestamp: chrono::Utc::now(),
            level: TraceLevel::Info,
            stage: TraceStage::Gating,
            message: format!("gating decision for action {}", action.kind),
            attributes,
        };
        if let Err(err) = self.trace_store.append_trace_event(incident_id, event).await {
            tracing::warn!(error = %err, "failed to persist gating trace event");
        }
    }

    async fn trace_verifying(&self, incident_id: IncidentId, action: &ResolutionAction, outcome: &VerificationOutcome) {
        let mut attributes = HashMap::new();
        attributes.insert("action".to_string(), serde_json::json!(action.kind));
        attributes.insert("outcome".to_string(), serde_json::json!(outcome));
        let event = TraceEvent {
            timestamp: chrono::Utc::now(),
            level: TraceLevel::Info,
            stage: TraceStage::Verifying,
            message: format!("verification outcome for action {}", action.kind),
            attributes,
        };
        if let Err(err) = self.trace_store.append_trace_event(incident_id, event).await {
            tracing::warn!(error = %err, "failed to persist verifying trace event");
        }
    }

    /// Executes a resolution plan in order, stopping early after
    /// `MAX_FAILURES_PER_PLAN` executed-and-failed actions.
    pub async fn execute_plan(
        &self,
        incident_id: IncidentId,
        actions: &[ResolutionAction],
        executor: &dyn ActionExecutor,
        mode: OperatingMode,
        destructive_enabled: bool,
        approval_timeout: Duration,
    ) -> Vec<ExecutionRecord> {
        let mut records = Vec::new();
        let mut failures = 0u8;

        for action in actions {
            if failures >= MAX_FAILURES_PER_PLAN {
                let mut attributes = HashMap::new();
                attributes.insert("failures".to_string(), serde_json::json!(failures));
                self.events.publish(Event {
                    timestamp: chrono::Utc::now(),
                    level: EventLevel::Error,
                    message: "too_many_failures".to_string(),
                    incident_id: Some(incident_id),
                    stage: None,
                    integration: None,
                    action: None,
                    progress: None,
                    attributes,
                });
                break;
            }

            let record = self
                .execute_one(incident_id, action, executor, mode, destructive_enabled, approval_timeout)
                .await;

            if record.executed && record.error.is_some() {
                failures += 1;
            }
            records.push(record);
        }

        records
    }

    async fn execute_one(
        &self,
        incident_id: IncidentId,
        action: &ResolutionAction,
        executor: &dyn ActionExecutor,
        mode: OperatingMode,
        destructive_enabled: bool,
        approval_timeout: Duration,
    ) -> ExecutionRecord {
        if self.circuit_breaker.is_open() {
            self.publish_circuit_open(incident_id);
            return ExecutionRecord {
                timestamp: chrono::Utc::now(),
                action: action.clone(),
                risk_assessment: risk_assessment(action, false, "circuit_breaker_open"),
                executed: false,
                skip_reason: Some("circuit_breaker_open".to_string()),
                result: None,
                verification: Some(VerificationOutcome::NotApplicable),
                error: None,
            };
        }

        let command = effective_command_preview(action);
        let decision = self
            .gate
            .decide(
                &command,
                action,
                mode,
                destructive_enabled,
                incident_id,
                approval_timeout,
            )
            .await;

        self.trace_gating(incident_id, action, decision.execute, &decision.reason).await;

        if !decision.execute {
            let forbidden = decision.reason == "forbidden";
            return ExecutionRecord {
                timestamp: chrono::Utc::now(),
                action: action.clone(),
                risk_assessment: risk_assessment(action, forbidden, &decision.reason),
                executed: false,
                skip_reason: Some(decision.reason),
                result: None,
                verification: Some(VerificationOutcome::NotApplicable),
                error: None,
            };
        }

        let outcome = executor.execute(action).await;
        platform::record_counter("executor_actions_executed_total", 1);
        let (executed, error) = match &outcome {
            Ok(()) => (true, None),
            Err(err) => (true, Some(err.to_string())),
        };

        match &outcome {
            Ok(()) => self.circuit_breaker.record_success(),
            Err(_) => {
                if self.circuit_breaker.record_failure() {
                    platform::record_counter("circuit_breaker_opened_total", 1);
                    self.publish_circuit_open(incident_id);
                }
            }
        }

        let verification = if executed && error.is_none() && VERIFIABLE_KINDS.contains(&action.kind.as_str())
        {
            let outcome = executor.verify(action).await;
            self.trace_verifying(incident_id, action, &outcome).await;
            Some(outcome)
        } else {
            Some(VerificationOutcome::NotApplicable)
        };

        self.events.publish(Event {
            timestamp: chrono::Utc::now(),
            level: if error.is_some() {
                EventLevel::Error
            } else {
                EventLevel::Info
            },
            message: format!("executed action {}", action.kind),
            incident_id: Some(incident_id),
            stage: None,
            integration: None,
            action: Some(action.kind.clone()),
            progress: None,
            attributes: Default::default(),
        });

        ExecutionRecord {
            timestamp: chrono::Utc::now(),
            action: action.clone(),
            risk_assessment: risk_assessment(action, false, &decision.reason),
            executed,
            skip_reason: None,
            result: outcome.ok().map(|_| Payload(serde_json::json!("ok"))),
            verification,
            error,
        }
    }
}

/// Backoff schedule for subprocess-backed adapters: doubles per attempt,
/// capped. Grounded on the teacher's agent retry policy.
pub fn compute_backoff_ms(initial_ms: u64, max_ms: u64, attempt: u8) -> u64 {
    let exp = if attempt == 0 { 0 } else { (attempt - 1) as u32 };
    let backoff = initial_ms.saturating_mul(2u64.saturating_pow(exp));
    backoff.min(max_ms)
}
