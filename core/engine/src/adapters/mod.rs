//! BackendAdapter: the uniform capability-typed wrapper every integration
//! implements. Concrete adapters differ only in which capabilities and
//! action kinds they claim and in how they reach their backend (subprocess
//! for Kubernetes, HTTP for everything else).

use crate::errors::AdapterError;
use async_trait::async_trait;
use serde_json::Value;
use shared_types::{ActionResult, ContextEntry};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub context_kinds: Vec<String>,
    pub action_kinds: Vec<String>,
    pub features: Vec<String>,
}

#[async_trait]
pub trait BackendAdapter: Send + Sync {
    async fn connect(&self) -> Result<(), AdapterError>;
    async fn disconnect(&self) -> Result<(), AdapterError>;
    async fn health_check(&self) -> bool;
    fn capabilities(&self) -> Capabilities;

    /// MUST NOT mutate external state. Bounded by `deadline`. Failures are
    /// reported as `ContextEntry::Error` rather than a `Result`: a failed
    /// fetch is incident data (it gets persisted and shown to the operator),
    /// not a propagated Rust error.
    async fn fetch_context(&self, kind: &str, params: Value, deadline: Duration) -> ContextEntry;

    /// MAY mutate external state unless `dry_run` is set, in which case the
    /// adapter returns the would-be effect without issuing it.
    async fn execute_action(&self, kind: &str, params: Value, dry_run: bool) -> Result<ActionResult, AdapterError>;
}

pub mod documentation;
pub mod kubernetes;
pub mod observability;
pub mod pager;
pub mod source_hosting;
