//! In-process approval registry. Grounded on the original agent's
//! request/approve/reject queue: a pending record per request id, an
//! event the requester awaits, and a one-shot decision.

use chrono::Utc;
use shared_types::{ApprovalId, ApprovalRequest, ApprovalStatus, IncidentId, ResolutionAction};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
    Expired,
}

struct Pending {
    request: ApprovalRequest,
    responder: Option<oneshot::Sender<Decision>>,
}

/// Process-wide singleton tracking pending approval requests. Exactly one
/// waiter per id; `approve`/`reject` are one-shot and idempotent past the
/// first call.
pub struct ApprovalRegistry {
    pending: Mutex<HashMap<ApprovalId, Pending>>,
    retention: Duration,
}

impl ApprovalRegistry {
    pub fn new() -> Self {
        ApprovalRegistry {
            pending: Mutex::new(HashMap::new()),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn with_retention(retention: Duration) -> Self {
        ApprovalRegistry {
            pending: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Registers an approval request and waits (up to `timeout`) for a
    /// decision. Returns `Expired` if no decision arrives in time.
    pub async fn request(
        &self,
        incident_id: IncidentId,
        action_plan: ResolutionAction,
        timeout: Duration,
    ) -> (ApprovalId, Decision) {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let request = ApprovalRequest {
            id,
            incident_id,
            action_plan,
            requested_at: now,
            timeout_at: now + chrono::Duration::from_std(timeout).unwrap_or_default(),
            status: ApprovalStatus::Pending,
            comments: String::new(),
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                id,
                Pending {
                    request,
                    responder: Some(tx),
                },
            );
        }

        let decision = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) | Err(_) => Decision::Expired,
        };

        let mut pending = self.pending.lock().await;
        if let Some(entry) = pending.get_mut(&id) {
            entry.request.status = match decision {
                Decision::Approved => ApprovalStatus::Approved,
                Decision::Rejected => ApprovalStatus::Rejected,
                Decision::Expired => ApprovalStatus::Expired,
            };
            entry.responder = None;
        }

        (id, decision)
    }

    /// Approves a pending request. Subsequent calls for the same id are
    /// no-ops; returns `true` only for the call that actually resolved it.
    pub async fn approve(&self, id: ApprovalId) -> bool {
        self.resolve(id, Decision::Approved).await
    }

    pub async fn reject(&self, id: ApprovalId) -> bool {
        self.resolve(id, Decision::Rejected).await
    }

    async fn resolve(&self, id: ApprovalId, decision: Decision) -> bool {
        let mut pending = self.pending.lock().await;
        let Some(entry) = pending.get_mut(&id) else {
            return false;
        };
        if entry.request.status != ApprovalStatus::Pending {
            return false;
        }
        if let Some(responder) = entry.responder.take() {
            let _ = responder.send(decision);
            true
        } else {
            false
        }
    }

    /// Returns all non-expired pending records.
    pub async fn list_pending(&self) -> Vec<ApprovalRequest> {
        let now = Utc::now();
        let pending = self.pending.lock().await;
        pending
            .values()
            .filter(|p| p.request.status == ApprovalStatus::Pending && p.request.timeout_at > now)
            .map(|p| p.request.clone())
            .collect()
    }

    /// Removes records older than the retention window. Intended to be
    /// called periodically by a background sweeper.
    pub async fn sweep(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::zero());
        let mut pending = self.pending.lock().await;
        pending.retain(|_, p| p.request.requested_at > cutoff);
    }
}

impl Default for ApprovalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedApprovalRegistry = Arc<ApprovalRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Risk;
    use std::collections::HashMap as StdHashMap;

    fn dummy_action() -> ResolutionAction {
        ResolutionAction {
            kind: "restart_pod".to_string(),
            description: "restart crashing pod".to_string(),
            params: StdHashMap::new(),
            confidence: 0.6,
            risk: Risk::Low,
            estimated_duration: "30s".to_string(),
            rollback_possible: true,
            preconditions: vec![],
        }
    }

    #[tokio::test]
    async fn approve_resolves_the_waiter() {
        let registry = Arc::new(ApprovalRegistry::new());
        let incident_id = Uuid::new_v4();

        let registry_clone = registry.clone();
        let waiter = tokio::spawn(async move {
            registry_clone
                .request(incident_id, dummy_action(), Duration::from_secs(5))
                .await
        });

        // Give the waiter a moment to register before approving.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let pending = registry.list_pending().await;
        assert_eq!(pending.len(), 1);
        let id = pending[0].id;
        assert!(registry.approve(id).await);

        let (_, decision) = waiter.await.unwrap();
        assert_eq!(decision, Decision::Approved);
    }

    #[tokio::test]
    async fn second_approve_is_a_no_op() {
        let registry = ApprovalRegistry::new();
        let incident_id = Uuid::new_v4();
        let registry = Arc::new(registry);

        let registry_clone = registry.clone();
        let waiter = tokio::spawn(async move {
            registry_clone
                .request(incident_id, dummy_action(), Duration::from_secs(5))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = registry.list_pending().await[0].id;

        assert!(registry.approve(id).await);
        assert!(!registry.approve(id).await);
        assert!(!registry.reject(id).await);

        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn unresolved_request_expires_on_timeout() {
        let registry = ApprovalRegistry::new();
        let incident_id = Uuid::new_v4();
        let (_, decision) = registry
            .request(incident_id, dummy_action(), Duration::from_millis(50))
            .await;
        assert_eq!(decision, Decision::Expired);
    }
}
