//! IncidentCoordinator: orchestrates one incident from ingest to terminal
//! state. Owns the only writer to an incident's IncidentTrace, ContextBundle,
//! plan, and ExecutionRecord list; everything else reads via message
//! passing over the EventBus.

use crate::adapters::BackendAdapter;
use crate::classifier;
use crate::errors::CoordinatorError;
use crate::event_bus::EventBus;
use crate::executor::{ActionExecutor, Executor};
use crate::llm_client::LlmClient;
use crate::planner;
use crate::trace_store::TraceStore;
use serde_json::Value;
use shared_types::{
    Alert, AlertKind, ContextBundle, ContextEntry, Event, EventLevel, ExecutionSummary, HandleResult,
    IncidentId, IncidentStatus, OperatingMode, Payload, TraceEvent, TraceLevel, TraceStage,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

pub struct CoordinatorConfig {
    pub mode: OperatingMode,
    pub destructive_enabled: bool,
    pub approval_timeout: Duration,
    pub context_gather_deadline: Duration,
}

pub struct IncidentCoordinator {
    adapters: HashMap<String, Arc<dyn BackendAdapter>>,
    executor: Executor,
    llm: LlmClient,
    events: Arc<EventBus>,
    trace_store: TraceStore,
    config: CoordinatorConfig,
    in_flight: Mutex<HashSet<String>>,
}

/// One entry per (adapter, context kind, bundle key) to gather for an
/// alert's classified kind. The bundle key is what the planner reads back.
fn context_plan(kind: AlertKind) -> Vec<(&'static str, &'static str, &'static str)> {
    match kind {
        AlertKind::PodCrash | AlertKind::OomKill => vec![
            ("kubernetes", "logs", "logs"),
            ("kubernetes", "pods", "pods"),
        ],
        AlertKind::ImagePull => vec![
            ("kubernetes", "pods", "pods"),
            ("kubernetes", "events", "events"),
        ],
        AlertKind::HighMemory | AlertKind::HighCpu => vec![
            ("kubernetes", "pods", "pods"),
            ("kubernetes", "metrics", "metrics"),
            ("observability", "dashboard_metrics", "metrics_query"),
        ],
        AlertKind::ServiceDown => vec![
            ("kubernetes", "pods", "pods"),
            ("kubernetes", "deployment", "deployments"),
        ],
        AlertKind::DeploymentFailed => vec![
            ("kubernetes", "deployment", "deployments"),
            ("source_hosting", "recent_commits", "commits_since"),
        ],
        AlertKind::NodeIssue => vec![("kubernetes", "events", "events")],
        AlertKind::Unknown => vec![("kubernetes", "pods", "pods")],
    }
}

impl IncidentCoordinator {
    pub fn new(
        adapters: HashMap<String, Arc<dyn BackendAdapter>>,
        executor: Executor,
        llm: LlmClient,
        events: Arc<EventBus>,
        trace_store: TraceStore,
        config: CoordinatorConfig,
    ) -> Self {
        IncidentCoordinator {
            adapters,
            executor,
            llm,
            events,
            trace_store,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    async fn trace(&self, incident_id: IncidentId, stage: TraceStage, message: &str) {
        let event = TraceEvent {
            timestamp: chrono::Utc::now(),
            level: TraceLevel::Info,
            stage,
            message: message.to_string(),
            attributes: Default::default(),
        };
        if let Err(err) = self.trace_store.append_trace_event(incident_id, event).await {
            tracing::warn!(error = %CoordinatorError::from(err), "failed to persist trace event");
        }
        self.events.publish(Event {
            timestamp: chrono::Utc::now(),
            level: EventLevel::Info,
            message: message.to_string(),
            incident_id: Some(incident_id),
            stage: Some(stage),
            integration: None,
            action: None,
            progress: None,
            attributes: Default::default(),
        });
    }

    /// Handles one alert end to end. A second call for the same `alert.id`
    /// while the first hasn't reached a terminal state returns `duplicate`
    /// immediately without side effects.
    pub async fn handle(&self, alert: Alert, executor_impl: &dyn ActionExecutor) -> HandleResult {
        {
            let mut in_flight = self.in_flight.lock().expect("coordinator mutex poisoned");
            if !in_flight.insert(alert.id.clone()) {
                return HandleResult {
                    status: IncidentStatus::Duplicate,
                    trace_id: Uuid::new_v4(),
                    analysis: None,
                    plan: vec![],
                    execution_summary: ExecutionSummary::default(),
                };
            }
        }

        let incident_id = Uuid::new_v4();
        platform::record_counter("incidents_received_total", 1);
        let started = std::time::Instant::now();
        let result = platform::with_correlation_context(
            incident_id,
            "handle_incident",
            self.handle_inner(incident_id, &alert, executor_impl),
        )
        .await;
        platform::record_histogram("incident_duration_seconds", started.elapsed().as_secs_f64());

        match result.status {
            IncidentStatus::AnalyzedAndExecuted => platform::record_counter("incidents_resolved_total", 1),
            IncidentStatus::Failed | IncidentStatus::PartiallyResolved => {
                platform::record_counter("incidents_failed_total", 1)
            }
            _ => {}
        }

        self.in_flight
            .lock()
            .expect("coordinator mutex poisoned")
            .remove(&alert.id);

        result
    }

    async fn handle_inner(
        &self,
        incident_id: IncidentId,
        alert: &Alert,
        executor_impl: &dyn ActionExecutor,
    ) -> HandleResult {
        self.trace(incident_id, TraceStage::Received, "incident received").await;

        self.trace(incident_id, TraceStage::Classifying, "classifying alert").await;
        let kind = classifier::classify(&alert.description);

        self.trace(
            incident_id,
            TraceStage::GatheringContext,
            "gathering context from backend adapters",
        )
        .await;
        let context = self.gather_context(incident_id, alert, kind).await;

        self.trace(incident_id, TraceStage::Analyzing, "consulting llm").await;
        let analysis = self.analyze(incident_id, alert, kind, &context).await;

        self.trace(incident_id, TraceStage::Planning, "planning remediation").await;
        let plan = planner::plan(alert, kind, &context);

        if plan.is_empty() {
            self.trace(incident_id, TraceStage::Complete, "no remediation plan produced").await;
            return HandleResult {
                status: IncidentStatus::Analyzed,
                trace_id: incident_id,
                analysis,
                plan,
                execution_summary: ExecutionSummary::default(),
            };
        }

        self.trace(incident_id, TraceStage::Executing, "executing remediation plan").await;
        let records = self
            .executor
            .execute_plan(
                incident_id,
                &plan,
                executor_impl,
                self.config.mode,
                self.config.destructive_enabled,
                self.config.approval_timeout,
            )
            .await;

        for record in &records {
            if let Err(err) = self
                .trace_store
                .append_execution_record(incident_id, record.clone())
                .await
            {
                tracing::warn!(error = %CoordinatorError::from(err), "failed to persist execution record");
            }
        }

        let summary = ExecutionSummary {
            actions_executed: records.iter().filter(|r| r.executed).count() as u32,
            actions_successful: records.iter().filter(|r| r.executed && r.error.is_none()).count() as u32,
            actions_failed: records.iter().filter(|r| r.executed && r.error.is_some()).count() as u32,
        };

        let status = if summary.actions_executed == 0 {
            IncidentStatus::Analyzed
        } else if summary.actions_failed == 0 {
            IncidentStatus::AnalyzedAndExecuted
        } else if summary.actions_successful > 0 {
            IncidentStatus::PartiallyResolved
        } else {
            IncidentStatus::Failed
        };

        self.trace(incident_id, TraceStage::Complete, &format!("incident resolved as {status:?}"))
            .await;

        HandleResult {
            status,
            trace_id: incident_id,
            analysis,
            plan,
            execution_summary: summary,
        }
    }

    async fn gather_context(&self, incident_id: IncidentId, alert: &Alert, kind: AlertKind) -> ContextBundle {
        let deadline = self.config.context_gather_deadline;
        let params = Value::Object(
            alert
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );

        let fetches = context_plan(kind);
        let mut handles = Vec::new();
        for (adapter_name, bundle_key, fetch_kind) in fetches {
            let Some(adapter) = self.adapters.get(adapter_name).cloned() else {
                continue;
            };
            if !adapter.health_check().await {
                continue;
            }
            let params = params.clone();
            let fetch_kind = fetch_kind.to_string();
            let bundle_key = bundle_key.to_string();
            let span = platform::correlation_span(incident_id, &format!("fetch_context:{adapter_name}"));
            handles.push(async move {
                let started = std::time::Instant::now();
                let entry = adapter.fetch_context(&fetch_kind, params, deadline).await;
                platform::record_histogram("adapter_fetch_duration_seconds", started.elapsed().as_secs_f64());
                if matches!(entry, ContextEntry::Error(_)) {
                    platform::record_counter("adapter_fetch_failures_total", 1);
                }
                (bundle_key, entry)
            }
            .instrument(span));
        }

        let results = futures_util::future::join_all(handles).await;
        results.into_iter().collect()
    }

    async fn analyze(
        &self,
        incident_id: IncidentId,
        alert: &Alert,
        kind: AlertKind,
        context: &ContextBundle,
    ) -> Option<String> {
        let prompt = render_prompt(alert, kind, context);
        let started = std::time::Instant::now();
        let outcome = self.llm.generate(&prompt, 512).await;
        platform::record_histogram("llm_generate_duration_seconds", started.elapsed().as_secs_f64());
        match outcome {
            Ok(text) => Some(text),
            Err(err) => {
                self.trace(
                    incident_id,
                    TraceStage::Analyzing,
                    &format!("analyzing_failed: {err}"),
                )
                .await;
                None
            }
        }
    }
}

fn render_prompt(alert: &Alert, kind: AlertKind, context: &ContextBundle) -> String {
    let mut context_text = String::new();
    for (backend, entry) in context {
        match entry {
            ContextEntry::Payload(Payload(value)) => {
                context_text.push_str(&format!("{backend}: {value}\n"));
            }
            ContextEntry::Error(err) => {
                context_text.push_str(&format!("{backend}: error: {err}\n"));
            }
        }
    }

    format!(
        "Alert {} ({kind}) on service {}: {}\n\nContext:\n{context_text}",
        alert.id, alert.service, alert.description,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalRegistry;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::gate::CommandGate;
    use shared_types::{CircuitBreakerConfig, LlmConfig, Severity, VerificationOutcome};

    struct NoopExecutor;

    #[async_trait::async_trait]
    impl ActionExecutor for NoopExecutor {
        async fn execute(&self, _action: &shared_types::ResolutionAction) -> Result<(), crate::errors::AdapterError> {
            Ok(())
        }

        async fn verify(&self, _action: &shared_types::ResolutionAction) -> VerificationOutcome {
            VerificationOutcome::NotApplicable
        }
    }

    fn coordinator() -> IncidentCoordinator {
        let events = Arc::new(EventBus::new());
        let approvals = Arc::new(ApprovalRegistry::new());
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
        let dir = tempfile::tempdir().unwrap();
        let trace_store = TraceStore::open(dir.path().join("trace.db").to_str().unwrap()).unwrap();
        let executor = Executor::new(CommandGate::new(approvals), breaker, events.clone(), trace_store.clone());
        let llm = LlmClient::new(LlmConfig {
            base_url: Some("http://127.0.0.1:0".to_string()),
            timeout_secs: 1,
            ..LlmConfig::default()
        });
        IncidentCoordinator::new(
            HashMap::new(),
            executor,
            llm,
            events,
            trace_store,
            CoordinatorConfig {
                mode: OperatingMode::Plan,
                destructive_enabled: false,
                approval_timeout: Duration::from_secs(1),
                context_gather_deadline: Duration::from_secs(1),
            },
        )
    }

    fn alert() -> Alert {
        Alert {
            id: "incident-1".to_string(),
            severity: Severity::High,
            service: "api".to_string(),
            description: "mystery event".to_string(),
            timestamp: chrono::Utc::now(),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn unclassifiable_alert_with_no_adapters_is_analyzed_without_execution() {
        let coordinator = coordinator();
        let result = coordinator.handle(alert(), &NoopExecutor).await;
        assert_eq!(result.status, IncidentStatus::Analyzed);
        assert!(result.plan.is_empty());
    }

    #[tokio::test]
    async fn concurrent_handle_for_the_same_alert_id_is_deduplicated() {
        let coordinator = Arc::new(coordinator());
        let first = coordinator.clone();
        let second = coordinator.clone();

        let (a, b) = tokio::join!(
            async move { first.handle(alert(), &NoopExecutor).await },
            async move { second.handle(alert(), &NoopExecutor).await },
        );

        let statuses = [a.status, b.status];
        assert!(statuses.contains(&IncidentStatus::Duplicate));
    }
}
