use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// API version for the subprocess adapter wire contract.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiVersion {
    V0,
    V1,
}

pub const API_VERSION_CURRENT: ApiVersion = ApiVersion::V1;

pub type IncidentId = Uuid;
pub type ApprovalId = Uuid;
pub type CorrelationId = Uuid;

/// Arbitrary structured payload, whose schema depends on the adapter and action.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Payload(pub Value);

impl Payload {
    pub fn empty() -> Self {
        Payload(Value::Object(serde_json::Map::new()))
    }
}

/// Request sent to a subprocess adapter over stdin, one line of JSON per call.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActionRequest {
    pub request_id: Uuid,
    #[serde(default)]
    pub api_version: Option<ApiVersion>,
    pub action: String,
    pub context: String,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    pub payload: Payload,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActionResult {
    pub output_type: String,
    pub data: String,
    pub metadata: Option<Value>,
}

/// Structured error response for adapter invocations.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActionError {
    pub code: u16,
    pub message: String,
    pub detail: String,
    pub raw_output: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActionResponse {
    pub request_id: Uuid,
    #[serde(default)]
    pub api_version: Option<ApiVersion>,
    pub status: String,
    pub code: u16,
    pub result: Option<ActionResult>,
    pub error: Option<ActionError>,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
}

#[derive(Debug, Clone)]
pub enum ToolError {
    IOError(String),
    SerializationError(String),
    DeserializationError(String),
    ExecutionError(String),
    Timeout(String),
    InvalidAgentResponse(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::IOError(msg) => write!(f, "IO error: {}", msg),
            ToolError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            ToolError::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            ToolError::ExecutionError(msg) => write!(f, "Execution error: {}", msg),
            ToolError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ToolError::InvalidAgentResponse(msg) => write!(f, "Invalid agent response: {}", msg),
        }
    }
}

impl std::error::Error for ToolError {}

// --- Incident domain model ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

/// Immutable once accepted by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    pub service: String,
    pub description: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    PodCrash,
    ImagePull,
    HighMemory,
    HighCpu,
    ServiceDown,
    DeploymentFailed,
    NodeIssue,
    OomKill,
    Unknown,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertKind::PodCrash => "pod_crash",
            AlertKind::ImagePull => "image_pull",
            AlertKind::HighMemory => "high_memory",
            AlertKind::HighCpu => "high_cpu",
            AlertKind::ServiceDown => "service_down",
            AlertKind::DeploymentFailed => "deployment_failed",
            AlertKind::NodeIssue => "node_issue",
            AlertKind::OomKill => "oom_kill",
            AlertKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One entry per backend the coordinator attempted for an incident. A
/// missing key means "not attempted"; this enum distinguishes "attempted and
/// succeeded" from "attempted and failed" for a key that is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ContextEntry {
    Payload(Payload),
    Error(String),
}

pub type ContextBundle = HashMap<String, ContextEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionAction {
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub params: HashMap<String, Value>,
    pub confidence: f32,
    pub risk: Risk,
    pub estimated_duration: String,
    pub rollback_possible: bool,
    #[serde(default)]
    pub preconditions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: Risk,
    pub forbidden: bool,
    pub reason: String,
    pub affects_all: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub incident_id: IncidentId,
    pub action_plan: ResolutionAction,
    pub requested_at: chrono::DateTime<chrono::Utc>,
    pub timeout_at: chrono::DateTime<chrono::Utc>,
    pub status: ApprovalStatus,
    #[serde(default)]
    pub comments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Held,
    TimedOut,
    NotApplicable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub action: ResolutionAction,
    pub risk_assessment: RiskAssessment,
    pub executed: bool,
    pub skip_reason: Option<String>,
    pub result: Option<Payload>,
    pub verification: Option<VerificationOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStage {
    Received,
    Classifying,
    GatheringContext,
    Analyzing,
    Planning,
    Gating,
    Executing,
    Verifying,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: TraceLevel,
    pub stage: TraceStage,
    pub message: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperatingMode {
    Plan,
    Approval,
    Auto,
}

impl std::str::FromStr for OperatingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PLAN" => Ok(OperatingMode::Plan),
            "APPROVAL" => Ok(OperatingMode::Approval),
            "AUTO" => Ok(OperatingMode::Auto),
            other => Err(format!("unknown operating mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub opened_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        CircuitBreakerState {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
    Alert,
}

/// One EventBus record. `incident_id`/`stage`/`integration`/`action` are
/// filled in opportunistically by whichever component publishes the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: EventLevel,
    pub message: String,
    pub incident_id: Option<IncidentId>,
    pub stage: Option<TraceStage>,
    pub integration: Option<String>,
    pub action: Option<String>,
    pub progress: Option<f32>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Analyzed,
    AnalyzedAndExecuted,
    PartiallyResolved,
    Failed,
    Duplicate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub actions_executed: u32,
    pub actions_successful: u32,
    pub actions_failed: u32,
}

impl Default for ExecutionSummary {
    fn default() -> Self {
        ExecutionSummary {
            actions_executed: 0,
            actions_successful: 0,
            actions_failed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleResult {
    pub status: IncidentStatus,
    pub trace_id: IncidentId,
    pub analysis: Option<String>,
    pub plan: Vec<ResolutionAction>,
    pub execution_summary: ExecutionSummary,
}

// --- Typed configuration, loaded once at startup and passed by reference
// into every constructor. ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            provider: "openrouter".to_string(),
            model: "google/gemini-2.0-flash-exp:free".to_string(),
            api_key: None,
            base_url: Some("https://openrouter.ai/api/v1".to_string()),
            max_tokens: 2048,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown_secs: 300,
        }
    }
}

/// Opaque endpoint + credential handle for a backend. The credential handle
/// is resolved by an external secret store; this crate never sees a secret
/// value, only the name the store should look up.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdapterEndpointConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub credential_handle: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdaptersConfig {
    #[serde(default)]
    pub kubernetes: Option<AdapterEndpointConfig>,
    #[serde(default)]
    pub source_hosting: Option<AdapterEndpointConfig>,
    #[serde(default)]
    pub observability: Option<AdapterEndpointConfig>,
    #[serde(default)]
    pub documentation: Option<AdapterEndpointConfig>,
    #[serde(default)]
    pub pager: Option<AdapterEndpointConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub operating_mode: OperatingMode,
    pub destructive_enabled: bool,
    pub approval_timeout_secs: u64,
    pub circuit_breaker: CircuitBreakerConfig,
    pub context_gather_deadline_secs: u64,
    pub llm: LlmConfig,
    #[serde(default)]
    pub adapters: AdaptersConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            operating_mode: OperatingMode::Plan,
            destructive_enabled: false,
            approval_timeout_secs: 300,
            circuit_breaker: CircuitBreakerConfig::default(),
            context_gather_deadline_secs: 30,
            llm: LlmConfig::default(),
            adapters: AdaptersConfig::default(),
        }
    }
}

/// Command-text substrings that must never be executed in any mode.
/// Implementations may extend this list but must not shrink it.
pub const FORBIDDEN_COMMAND_SUBSTRINGS: &[&str] = &[
    "delete namespace",
    "delete ns ",
    "delete node",
    "delete pv ",
    "delete persistentvolume",
    "delete pvc ",
    "delete persistentvolumeclaim",
];
