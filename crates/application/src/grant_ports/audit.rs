use async_trait::async_trait;
use tenure_core::AppResult;
use tenure_domain::{GrantAuditAction, GrantId};

/// Append-only record of one grant transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantAuditEvent {
    /// Grant the transition applied to.
    pub grant_id: GrantId,
    /// Owner of the grant.
    pub subject_id: String,
    /// Stable audit action identifier.
    pub action: GrantAuditAction,
    /// Optional free-form detail.
    pub detail: Option<String>,
}

/// Port for persisting grant audit events.
#[async_trait]
pub trait GrantAuditRepository: Send + Sync {
    /// Persists one audit event.
    async fn append_event(&self, event: GrantAuditEvent) -> AppResult<()>;
}
