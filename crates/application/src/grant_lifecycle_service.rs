use std::sync::Arc;

use chrono::{DateTime, Utc};
use tenure_core::{AppError, AppResult, Rejection};
use tenure_domain::{
    ClaimRequest, Decision, Grant, GrantAuditAction, GrantId, GrantWrite, InboundCommand,
    LifecycleEngine, RenewalAnswer, RenewalState, SideEffect,
};
use tracing::{error, info, warn};

use crate::{
    ActionStyle, ChatPlatform, Clock, GrantAuditEvent, GrantAuditRepository, GrantRepository,
    MessageAction, OutgoingMessage, RenewalWakeup, StatusProjector, SubjectWorkQueue,
};

mod claim;
mod effects;
mod removal;
mod renewal;

/// Result of a successful claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOutcome {
    /// Stored grant after the claim.
    pub grant: Grant,
}

/// Result of an explicit removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalOutcome {
    /// Removed grant.
    pub grant_id: GrantId,
    /// Name of the removed role.
    pub role_name: String,
    /// Platform side effects that failed after retries.
    pub side_effect_errors: Vec<String>,
}

/// Result of an answered renewal prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// The grant was extended.
    Renewed {
        /// Renewed grant.
        grant_id: GrantId,
        /// Name of the renewed role.
        role_name: String,
        /// New expiry instant.
        expires_at: DateTime<Utc>,
    },
    /// The grant was deactivated.
    Declined {
        /// Declined grant.
        grant_id: GrantId,
        /// Name of the released role.
        role_name: String,
        /// Platform side effects that failed after retries.
        side_effect_errors: Vec<String>,
    },
}

/// Result of one expiry attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// The grant is awaiting a response and its prompt is recorded.
    Prompted {
        /// Expired grant.
        grant_id: GrantId,
        /// Posted prompt message.
        prompt_id: String,
    },
    /// The prompt could not be posted; the grant went back to `pending`.
    PromptFailed {
        /// Expired grant.
        grant_id: GrantId,
        /// Failure description.
        error: String,
    },
    /// The grant was not an expired pending grant anymore.
    Skipped,
}

/// Result of one renewal-timeout attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// The grant was deactivated.
    Revoked {
        /// Timed-out grant.
        grant_id: GrantId,
        /// Platform side effects that failed after retries.
        side_effect_errors: Vec<String>,
    },
    /// The grant was already resolved or its window has not elapsed.
    Skipped,
}

/// Executes lifecycle decisions against the store and the chat platform.
#[derive(Clone)]
pub struct GrantLifecycleService {
    engine: Arc<LifecycleEngine>,
    repository: Arc<dyn GrantRepository>,
    audit_repository: Arc<dyn GrantAuditRepository>,
    platform: Arc<dyn ChatPlatform>,
    clock: Arc<dyn Clock>,
    work_queue: SubjectWorkQueue,
    notification_channel_id: String,
    status_projector: Option<StatusProjector>,
    renewal_wakeup: Option<RenewalWakeup>,
}

impl GrantLifecycleService {
    /// Creates a lifecycle service posting renewal prompts into
    /// `notification_channel_id`.
    #[must_use]
    pub fn new(
        engine: LifecycleEngine,
        repository: Arc<dyn GrantRepository>,
        audit_repository: Arc<dyn GrantAuditRepository>,
        platform: Arc<dyn ChatPlatform>,
        clock: Arc<dyn Clock>,
        work_queue: SubjectWorkQueue,
        notification_channel_id: impl Into<String>,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            repository,
            audit_repository,
            platform,
            clock,
            work_queue,
            notification_channel_id: notification_channel_id.into(),
            status_projector: None,
            renewal_wakeup: None,
        }
    }

    /// Signals `status_projector` after every state change.
    #[must_use]
    pub fn with_status_projector(mut self, status_projector: StatusProjector) -> Self {
        self.status_projector = Some(status_projector);
        self
    }

    /// Wakes the renewal timer whenever a new renewal deadline is armed.
    #[must_use]
    pub fn with_renewal_wakeup(mut self, renewal_wakeup: RenewalWakeup) -> Self {
        self.renewal_wakeup = Some(renewal_wakeup);
        self
    }
}

/// Outcome of applying one guarded write.
enum WriteResult {
    Stored(Grant),
    Applied,
    Skipped,
}

/// Side effect that kept failing after platform retries.
struct EffectFailure {
    effect: SideEffect,
    error: AppError,
}

/// Side effect results of one decision.
#[derive(Default)]
struct EffectReport {
    failures: Vec<EffectFailure>,
    posted_prompt: Option<String>,
}

impl EffectReport {
    fn error_messages(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|failure| failure.error.to_string())
            .collect()
    }
}
