//! On-call incident-response engine: ingests an alert, gathers context from
//! backend adapters concurrently, consults an LLM for diagnosis, gates
//! proposed remediation through risk/policy/circuit-breaker logic, executes
//! and verifies it, and streams progress over an event bus.

pub mod adapters;
pub mod approval;
pub mod circuit_breaker;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod event_bus;
pub mod executor;
pub mod gate;
pub mod llm_client;
pub mod planner;
pub mod trace_store;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use adapters::documentation::DocumentationAdapter;
use adapters::kubernetes::KubernetesAdapter;
use adapters::observability::ObservabilityAdapter;
use adapters::pager::PagerAdapter;
use adapters::source_hosting::SourceHostingAdapter;
use adapters::BackendAdapter;
use approval::ApprovalRegistry;
use circuit_breaker::CircuitBreaker;
use coordinator::{CoordinatorConfig, IncidentCoordinator};
use event_bus::EventBus;
use executor::Executor;
use gate::CommandGate;
use llm_client::LlmClient;
use shared_types::AppConfig;
use trace_store::TraceStore;

/// Wires together every module from a loaded `AppConfig`. This is the
/// engine's single construction point; callers outside this crate (a CLI, a
/// test harness, a service wrapper) depend only on this and on
/// `IncidentCoordinator::handle`.
pub struct Engine {
    pub coordinator: IncidentCoordinator,
    pub events: Arc<EventBus>,
    pub approvals: Arc<ApprovalRegistry>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub trace_store: TraceStore,
}

pub fn build_engine(app_config: AppConfig, trace_db_path: &str, kubernetes_adapter_binary: PathBuf) -> Engine {
    let events = Arc::new(EventBus::new());
    let approvals = Arc::new(ApprovalRegistry::new());
    let circuit_breaker = Arc::new(CircuitBreaker::new(app_config.circuit_breaker.clone()));
    let trace_store = TraceStore::open(trace_db_path).expect("failed to open trace store");

    let gate = CommandGate::new(approvals.clone());
    let executor = Executor::new(gate, circuit_breaker.clone(), events.clone(), trace_store.clone());
    let llm = LlmClient::new(app_config.llm.clone());

    let mut adapters: HashMap<String, Arc<dyn BackendAdapter>> = HashMap::new();
    adapters.insert(
        "kubernetes".to_string(),
        Arc::new(KubernetesAdapter::new(
            kubernetes_adapter_binary,
            app_config.destructive_enabled,
            Duration::from_secs(30),
        )),
    );
    if let Some(cfg) = &app_config.adapters.source_hosting {
        adapters.insert("source_hosting".to_string(), Arc::new(SourceHostingAdapter::new(cfg.clone())));
    }
    if let Some(cfg) = &app_config.adapters.observability {
        adapters.insert("observability".to_string(), Arc::new(ObservabilityAdapter::new(cfg.clone())));
    }
    if let Some(cfg) = &app_config.adapters.documentation {
        adapters.insert("documentation".to_string(), Arc::new(DocumentationAdapter::new(cfg.clone())));
    }
    if let Some(cfg) = &app_config.adapters.pager {
        adapters.insert("pager".to_string(), Arc::new(PagerAdapter::new(cfg.clone())));
    }

    let coordinator_config = CoordinatorConfig {
        mode: app_config.operating_mode,
        destructive_enabled: app_config.destructive_enabled,
        approval_timeout: Duration::from_secs(app_config.approval_timeout_secs),
        context_gather_deadline: Duration::from_secs(app_config.context_gather_deadline_secs),
    };

    let coordinator = IncidentCoordinator::new(
        adapters,
        executor,
        llm,
        events.clone(),
        trace_store.clone(),
        coordinator_config,
    );

    Engine {
        coordinator,
        events,
        approvals,
        circuit_breaker,
        trace_store,
    }
}
