//! Per-concern error enums for the pipeline boundaries that used to return
//! bare `String`s. Grounded on the teacher's `PlatformError`/`LlmError`
//! split (`llm_client.rs`): one enum per concern, `#[from]` where a lower
//! layer's error converts cleanly, a handful of named variants where it
//! doesn't.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0} has no endpoint configured")]
    NotConfigured(&'static str),
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend returned {0}")]
    BackendStatus(reqwest::StatusCode),
    #[error("unsupported action kind: {0}")]
    UnsupportedAction(String),
    #[error("subprocess error: {0}")]
    Subprocess(String),
    #[error("destructive operations disabled at adapter edge")]
    DestructiveDisabled,
}

/// Wraps the failures a coordinator can hit that aren't themselves part of
/// an incident's outcome (trace persistence). `IncidentCoordinator::handle`
/// never propagates this; it's logged and the incident proceeds, since a
/// dropped trace row is an observability gap, not a reason to abort remediation.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to persist trace event: {0}")]
    Trace(#[from] crate::trace_store::TraceStoreError),
}
