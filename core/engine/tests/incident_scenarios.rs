//! Cross-module scenarios exercising classifier, planner, gate, executor,
//! and circuit breaker together, the way a single incident actually flows
//! through them.

use engine::adapters::{BackendAdapter, Capabilities};
use engine::circuit_breaker::CircuitBreaker;
use engine::classifier;
use engine::coordinator::{CoordinatorConfig, IncidentCoordinator};
use engine::errors::AdapterError;
use engine::executor::{ActionExecutor, Executor};
use engine::gate::CommandGate;
use engine::llm_client::LlmClient;
use engine::trace_store::TraceStore;
use engine::{approval::ApprovalRegistry, event_bus::EventBus, planner};
use async_trait::async_trait;
use serde_json::Value;
use shared_types::{
    Alert, AlertKind, CircuitBreakerConfig, ContextBundle, ContextEntry, LlmConfig, OperatingMode,
    Payload, ResolutionAction, Severity, TraceStage, VerificationOutcome,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn alert(description: &str) -> Alert {
    Alert {
        id: "a1".to_string(),
        severity: Severity::High,
        service: "api".to_string(),
        description: description.to_string(),
        timestamp: chrono::Utc::now(),
        metadata: Default::default(),
    }
}

struct NoopExecutor;

#[async_trait]
impl ActionExecutor for NoopExecutor {
    async fn execute(&self, _action: &ResolutionAction) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn verify(&self, _action: &ResolutionAction) -> VerificationOutcome {
        VerificationOutcome::Held
    }
}

struct AlwaysFailingExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl ActionExecutor for AlwaysFailingExecutor {
    async fn execute(&self, _action: &ResolutionAction) -> Result<(), AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AdapterError::Subprocess("backend unavailable".to_string()))
    }

    async fn verify(&self, _action: &ResolutionAction) -> VerificationOutcome {
        VerificationOutcome::NotApplicable
    }
}

fn trace_store() -> TraceStore {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.db");
    TraceStore::open(path.to_str().unwrap()).unwrap()
}

fn executor_with(breaker: Arc<CircuitBreaker>) -> (Executor, TraceStore, Arc<EventBus>) {
    let gate = CommandGate::new(Arc::new(ApprovalRegistry::new()));
    let store = trace_store();
    let events = Arc::new(EventBus::new());
    let exec = Executor::new(gate, breaker, events.clone(), store.clone());
    (exec, store, events)
}

// S1 — PLAN mode preview: a CrashLoopBackOff alert classifies to a restart
// plan, but PLAN mode never executes anything.
#[tokio::test]
async fn s1_plan_mode_preview_proposes_restart_but_executes_nothing() {
    let alert = alert("Pod api-x is in CrashLoopBackOff");
    let kind = classifier::classify(&alert.description);
    assert!(matches!(kind, AlertKind::PodCrash));

    let context: ContextBundle = ContextBundle::new();
    let plan = planner::plan(&alert, kind, &context);
    assert!(plan.iter().any(|a| a.kind == "restart_pod"));

    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
    let (exec, store, _events) = executor_with(breaker);
    let executor_impl = NoopExecutor;
    let incident_id = Uuid::new_v4();
    let records = exec
        .execute_plan(
            incident_id,
            &plan,
            &executor_impl,
            OperatingMode::Plan,
            false,
            Duration::from_secs(1),
        )
        .await;

    assert_eq!(records.iter().filter(|r| r.executed).count(), 0);
    assert!(records.iter().all(|r| r.skip_reason.as_deref() == Some("plan_mode")));

    let trace = store.trace_for(incident_id).await.unwrap();
    assert!(trace
        .iter()
        .any(|e| e.stage == TraceStage::Gating && e.attributes.get("reason").and_then(|v| v.as_str()) == Some("plan_mode")));
}

// S3 — forbidden command blocked: a crafted delete-namespace action is
// refused before the executor is ever called, and the record is not an
// execution failure, just a skip.
#[tokio::test]
async fn s3_forbidden_command_is_blocked_without_calling_the_executor() {
    let mut params = std::collections::HashMap::new();
    params.insert("resource".to_string(), serde_json::json!("namespace"));
    params.insert("namespace".to_string(), serde_json::json!("default"));
    let forbidden_action = ResolutionAction {
        kind: "delete_resource".to_string(),
        description: "delete the default namespace".to_string(),
        params,
        confidence: 0.99,
        risk: shared_types::Risk::High,
        estimated_duration: "5s".to_string(),
        rollback_possible: false,
        preconditions: vec![],
    };

    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
    let (exec, _store, _events) = executor_with(breaker);
    let fake = AlwaysFailingExecutor {
        calls: AtomicUsize::new(0),
    };
    let records = exec
        .execute_plan(
            Uuid::new_v4(),
            &[forbidden_action],
            &fake,
            OperatingMode::Auto,
            true,
            Duration::from_secs(1),
        )
        .await;

    assert_eq!(records.len(), 1);
    assert!(!records[0].executed);
    assert!(records[0].risk_assessment.forbidden);
    assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
}

// S5 — circuit opens after repeated failures: five separate incidents,
// each planning one low-risk action that always fails, trip the breaker;
// the sixth incident's action is refused at the breaker without reaching
// the executor at all.
#[tokio::test]
async fn s5_circuit_breaker_opens_after_five_incidents_fail_and_then_refuses() {
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
    let (exec, _store, events) = executor_with(breaker.clone());
    let fake = AlwaysFailingExecutor {
        calls: AtomicUsize::new(0),
    };

    let low_risk_action = ResolutionAction {
        kind: "restart_pod".to_string(),
        description: "restart".to_string(),
        params: Default::default(),
        confidence: 0.9,
        risk: shared_types::Risk::Low,
        estimated_duration: "30s".to_string(),
        rollback_possible: true,
        preconditions: vec![],
    };

    for _ in 0..5 {
        let records = exec
            .execute_plan(
                Uuid::new_v4(),
                &[low_risk_action.clone()],
                &fake,
                OperatingMode::Auto,
                false,
                Duration::from_secs(1),
            )
            .await;
        assert_eq!(records.len(), 1);
        assert!(records[0].error.is_some());
    }

    assert!(breaker.is_open());
    let calls_before_sixth = fake.calls.load(Ordering::SeqCst);
    assert_eq!(calls_before_sixth, 5);

    let records = exec
        .execute_plan(
            Uuid::new_v4(),
            &[low_risk_action],
            &fake,
            OperatingMode::Auto,
            false,
            Duration::from_secs(1),
        )
        .await;
    assert_eq!(records.len(), 1);
    assert!(!records[0].executed);
    assert_eq!(records[0].skip_reason.as_deref(), Some("circuit_breaker_open"));
    assert_eq!(fake.calls.load(Ordering::SeqCst), calls_before_sixth);

    let history = events.replay(None);
    assert!(history.iter().any(|e| e.message == "circuit breaker opened"));
}

// S6 — partial context: one backend answers, one errors; the bundle
// carries both outcomes and the planner still runs against what it has.
struct HealthyAdapter;

#[async_trait]
impl BackendAdapter for HealthyAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        Ok(())
    }
    async fn disconnect(&self) -> Result<(), AdapterError> {
        Ok(())
    }
    async fn health_check(&self) -> bool {
        true
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
    async fn fetch_context(&self, _kind: &str, _params: Value, _deadline: Duration) -> ContextEntry {
        ContextEntry::Payload(Payload(serde_json::json!({"pods": ["api-x"]})))
    }
    async fn execute_action(&self, kind: &str, _params: Value, _dry_run: bool) -> Result<shared_types::ActionResult, AdapterError> {
        Err(AdapterError::UnsupportedAction(format!("not used in this test: {kind}")))
    }
}

struct TimingOutAdapter;

#[async_trait]
impl BackendAdapter for TimingOutAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        Ok(())
    }
    async fn disconnect(&self) -> Result<(), AdapterError> {
        Ok(())
    }
    async fn health_check(&self) -> bool {
        true
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
    async fn fetch_context(&self, _kind: &str, _params: Value, deadline: Duration) -> ContextEntry {
        tokio::time::sleep(deadline + Duration::from_millis(50)).await;
        ContextEntry::Error("unreachable".to_string())
    }
    async fn execute_action(&self, kind: &str, _params: Value, _dry_run: bool) -> Result<shared_types::ActionResult, AdapterError> {
        Err(AdapterError::UnsupportedAction(format!("not used in this test: {kind}")))
    }
}

#[tokio::test]
async fn s6_partial_context_keeps_one_success_and_one_error() {
    let deadline = Duration::from_millis(50);

    let healthy: Arc<dyn BackendAdapter> = Arc::new(HealthyAdapter);
    let timing_out: Arc<dyn BackendAdapter> = Arc::new(TimingOutAdapter);

    let healthy_result = tokio::time::timeout(Duration::from_secs(1), healthy.fetch_context("pods", Value::Null, deadline))
        .await
        .expect("healthy adapter should answer promptly");
    assert!(matches!(healthy_result, ContextEntry::Payload(_)));

    let slow_result = tokio::time::timeout(
        deadline + Duration::from_millis(200),
        timing_out.fetch_context("pods", Value::Null, deadline),
    )
    .await
    .expect("the adapter itself must resolve even though it ran past the deadline");
    assert!(matches!(slow_result, ContextEntry::Error(_)));

    let mut bundle: ContextBundle = ContextBundle::new();
    bundle.insert("kubernetes".to_string(), healthy_result);
    bundle.insert("observability".to_string(), slow_result);

    let errors = bundle.values().filter(|e| matches!(e, ContextEntry::Error(_))).count();
    let successes = bundle.values().filter(|e| matches!(e, ContextEntry::Payload(_))).count();
    assert_eq!(errors, 1);
    assert_eq!(successes, 1);

    // The planner still runs against whatever context made it into the
    // bundle; a partial bundle does not prevent planning.
    let alert = alert("Pod api-x is in CrashLoopBackOff");
    let kind = classifier::classify(&alert.description);
    let plan = planner::plan(&alert, kind, &bundle);
    assert!(!plan.is_empty());
}

fn coordinator_with(
    mode: OperatingMode,
    approval_timeout: Duration,
) -> (IncidentCoordinator, Arc<CircuitBreaker>, TraceStore) {
    let events = Arc::new(EventBus::new());
    let approvals = Arc::new(ApprovalRegistry::new());
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
    let store = trace_store();
    let executor = Executor::new(
        CommandGate::new(approvals),
        breaker.clone(),
        events.clone(),
        store.clone(),
    );
    let llm = LlmClient::new(LlmConfig {
        base_url: Some("http://127.0.0.1:0".to_string()),
        timeout_secs: 1,
        ..LlmConfig::default()
    });
    let coordinator = IncidentCoordinator::new(
        HashMap::new(),
        executor,
        llm,
        events,
        store.clone(),
        CoordinatorConfig {
            mode,
            destructive_enabled: false,
            approval_timeout,
            context_gather_deadline: Duration::from_millis(200),
        },
    );
    (coordinator, breaker, store)
}

// S2 — AUTO low-risk happy path: a crash-loop alert's low-risk restart
// action runs through the full coordinator and succeeds; the breaker
// never trips.
#[tokio::test]
async fn s2_auto_mode_low_risk_action_runs_through_full_coordinator_and_breaker_stays_closed() {
    let (coordinator, breaker, _store) = coordinator_with(OperatingMode::Auto, Duration::from_secs(1));

    let alert = alert("Pod api-x is in CrashLoopBackOff");
    let result = coordinator.handle(alert, &NoopExecutor).await;

    assert!(result.execution_summary.actions_executed > 0);
    assert_eq!(result.execution_summary.actions_failed, 0);
    assert!(!breaker.is_open());
}

// S4 — APPROVAL mode timeout: a medium-risk action gets no approval
// decision before the timeout elapses, and the coordinator's persisted
// trace carries an approval_timeout gating event.
#[tokio::test]
async fn s4_approval_mode_timeout_is_persisted_in_the_coordinator_trace() {
    let (coordinator, _breaker, store) =
        coordinator_with(OperatingMode::Approval, Duration::from_millis(20));

    let mut metadata = HashMap::new();
    metadata.insert("replicas".to_string(), serde_json::json!(10));
    let alert = Alert {
        id: "a2".to_string(),
        severity: Severity::High,
        service: "api".to_string(),
        description: "High memory usage detected".to_string(),
        timestamp: chrono::Utc::now(),
        metadata,
    };

    let result = coordinator.handle(alert, &NoopExecutor).await;

    let trace = store.trace_for(result.trace_id).await.unwrap();
    assert!(trace.iter().any(|e| {
        e.stage == TraceStage::Gating
            && e.attributes.get("reason").and_then(|v| v.as_str()) == Some("approval_timeout")
    }));
}
