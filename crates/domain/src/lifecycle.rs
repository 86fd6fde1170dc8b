//! Pure role-lifecycle decisions.
//!
//! The engine never performs I/O and never reads the clock. Each operation
//! inspects the grant snapshot it is given and returns either a rejection or
//! a [`Decision`]: one guarded store write, the platform side effects to run
//! after that write, and the audit action to record.

use chrono::{DateTime, TimeDelta, Utc};
use tenure_core::{AppError, AppResult, Rejection};

use crate::{DeactivationReason, Grant, GrantId, RenewalState, RoleCatalog};

/// Longest role duration or renewal window a policy accepts, in days.
pub const MAX_POLICY_DAYS: i64 = 366;

/// Durations governing every grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantPolicy {
    role_duration: TimeDelta,
    renewal_window: TimeDelta,
}

impl GrantPolicy {
    /// Creates a policy; both durations must be positive and at most
    /// [`MAX_POLICY_DAYS`] long.
    pub fn new(role_duration: TimeDelta, renewal_window: TimeDelta) -> AppResult<Self> {
        let limit = TimeDelta::days(MAX_POLICY_DAYS);
        for (name, duration) in [
            ("role duration", role_duration),
            ("renewal window", renewal_window),
        ] {
            if duration <= TimeDelta::zero() {
                return Err(AppError::Validation(format!(
                    "{name} must be greater than zero"
                )));
            }
            if duration > limit {
                return Err(AppError::Validation(format!(
                    "{name} must not exceed {MAX_POLICY_DAYS} days"
                )));
            }
        }

        Ok(Self {
            role_duration,
            renewal_window,
        })
    }

    /// Returns how long one claim or renewal holds the role.
    #[must_use]
    pub fn role_duration(&self) -> TimeDelta {
        self.role_duration
    }

    /// Returns how long a member has to answer a renewal prompt.
    #[must_use]
    pub fn renewal_window(&self) -> TimeDelta {
        self.renewal_window
    }
}

/// Claim request coming from a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    /// Claiming member.
    pub subject_id: String,
    /// Member display name at claim time.
    pub display_name: String,
    /// Catalog choice key.
    pub choice_key: String,
}

/// Row created by a first claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGrant {
    /// Claiming member.
    pub subject_id: String,
    /// Member display name.
    pub subject_display_name: String,
    /// Granted role identifier.
    pub role_id: String,
    /// Granted role name.
    pub role_name: String,
    /// Claim instant.
    pub created_at: DateTime<Utc>,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

/// Reuse of an inactive row by a new claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimGrant {
    /// Row being reused.
    pub grant_id: GrantId,
    /// Member display name.
    pub subject_display_name: String,
    /// Granted role identifier.
    pub role_id: String,
    /// Granted role name.
    pub role_name: String,
    /// Claim instant.
    pub created_at: DateTime<Utc>,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

/// Guarded deactivation of an active grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeactivateGrant {
    /// Grant being deactivated.
    pub grant_id: GrantId,
    /// State the grant must still be in; `None` accepts any active state.
    pub expected_state: Option<RenewalState>,
    /// State recorded on the inactive row.
    pub final_state: RenewalState,
    /// Reason recorded on the inactive row.
    pub reason: DeactivationReason,
}

/// Store write implied by a decision. Every variant except `Insert` is a
/// compare-and-set that reports whether it applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantWrite {
    /// Insert a first row for the subject.
    Insert(NewGrant),
    /// Reactivate an inactive row.
    Reclaim(ReclaimGrant),
    /// Move an expired pending grant to `awaiting_response`.
    MarkAwaitingResponse {
        /// Grant being marked.
        grant_id: GrantId,
        /// Instant the expiry was observed; guards against unexpired rows.
        observed_at: DateTime<Utc>,
        /// Deadline of the renewal window.
        renewal_due_at: DateTime<Utc>,
    },
    /// Extend an awaiting grant and return it to `pending`.
    ExtendAndReactivate {
        /// Grant being renewed.
        grant_id: GrantId,
        /// New expiry instant.
        expires_at: DateTime<Utc>,
    },
    /// Deactivate an active grant.
    Deactivate(DeactivateGrant),
}

/// Platform side effect to run after the store write applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    /// Give the role to the member. Idempotent on the platform.
    GrantRole {
        /// Member receiving the role.
        subject_id: String,
        /// Role identifier.
        role_id: String,
    },
    /// Take the role from the member.
    RevokeRole {
        /// Member losing the role.
        subject_id: String,
        /// Role identifier.
        role_id: String,
    },
    /// Post the renewal prompt and record its message id.
    PostRenewalPrompt {
        /// Grant the prompt belongs to.
        grant_id: GrantId,
        /// Member being asked.
        subject_id: String,
        /// Role being renewed.
        role_name: String,
    },
    /// Delete an outstanding renewal prompt.
    DeleteRenewalPrompt {
        /// Prompt message id.
        prompt_id: String,
    },
}

/// Audit actions recorded for grant transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantAuditAction {
    /// Role claimed.
    Claimed,
    /// Claim compensated because the external grant failed.
    ClaimAborted,
    /// Role removed by its owner.
    Removed,
    /// Renewal prompt issued.
    RenewalPrompted,
    /// Renewal accepted.
    RenewalConfirmed,
    /// Renewal declined by the owner.
    RenewalDeclined,
    /// Renewal window elapsed without a response.
    RenewalTimedOut,
}

impl GrantAuditAction {
    /// Returns a stable storage value for this action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claimed => "grant.claimed",
            Self::ClaimAborted => "grant.claim_aborted",
            Self::Removed => "grant.removed",
            Self::RenewalPrompted => "grant.renewal_prompted",
            Self::RenewalConfirmed => "grant.renewal_confirmed",
            Self::RenewalDeclined => "grant.renewal_declined",
            Self::RenewalTimedOut => "grant.renewal_timed_out",
        }
    }
}

/// Outcome of one engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Guarded store write.
    pub write: GrantWrite,
    /// Side effects to run once the write applied.
    pub effects: Vec<SideEffect>,
    /// Audit action to record.
    pub audit: GrantAuditAction,
}

/// Stateless role-lifecycle state machine.
#[derive(Debug, Clone)]
pub struct LifecycleEngine {
    policy: GrantPolicy,
    catalog: RoleCatalog,
}

impl LifecycleEngine {
    /// Creates an engine for the given policy and catalog.
    #[must_use]
    pub fn new(policy: GrantPolicy, catalog: RoleCatalog) -> Self {
        Self { policy, catalog }
    }

    /// Returns the configured policy.
    #[must_use]
    pub fn policy(&self) -> GrantPolicy {
        self.policy
    }

    /// Decides a claim given the subject's active row and latest row.
    pub fn claim(
        &self,
        request: &ClaimRequest,
        active: Option<&Grant>,
        latest: Option<&Grant>,
        now: DateTime<Utc>,
    ) -> Result<Decision, Rejection> {
        let choice = self
            .catalog
            .find(request.choice_key.as_str())
            .ok_or_else(|| Rejection::UnknownRoleChoice(request.choice_key.clone()))?;

        if let Some(active) = active.filter(|grant| grant.active) {
            return Err(Rejection::AlreadyActive {
                role_name: active.role_name.clone(),
            });
        }

        let expires_at = now + self.policy.role_duration;
        let write = match latest {
            Some(latest) if latest.active => {
                return Err(Rejection::AlreadyActive {
                    role_name: latest.role_name.clone(),
                });
            }
            Some(latest) => GrantWrite::Reclaim(ReclaimGrant {
                grant_id: latest.id,
                subject_display_name: request.display_name.clone(),
                role_id: choice.role_id().to_owned(),
                role_name: choice.role_name().to_owned(),
                created_at: now,
                expires_at,
            }),
            None => GrantWrite::Insert(NewGrant {
                subject_id: request.subject_id.clone(),
                subject_display_name: request.display_name.clone(),
                role_id: choice.role_id().to_owned(),
                role_name: choice.role_name().to_owned(),
                created_at: now,
                expires_at,
            }),
        };

        Ok(Decision {
            write,
            effects: vec![SideEffect::GrantRole {
                subject_id: request.subject_id.clone(),
                role_id: choice.role_id().to_owned(),
            }],
            audit: GrantAuditAction::Claimed,
        })
    }

    /// Compensates a stored claim whose external grant failed.
    #[must_use]
    pub fn abort_claim(&self, grant_id: GrantId) -> Decision {
        Decision {
            write: GrantWrite::Deactivate(DeactivateGrant {
                grant_id,
                expected_state: Some(RenewalState::Pending),
                final_state: RenewalState::Superseded,
                reason: DeactivationReason::ClaimAborted,
            }),
            effects: Vec::new(),
            audit: GrantAuditAction::ClaimAborted,
        }
    }

    /// Decides an explicit removal of the subject's active grant.
    pub fn remove(&self, active: Option<&Grant>) -> Result<Decision, Rejection> {
        let grant = active
            .filter(|grant| grant.active)
            .ok_or(Rejection::NoActiveGrant)?;

        let mut effects = vec![SideEffect::RevokeRole {
            subject_id: grant.subject_id.clone(),
            role_id: grant.role_id.clone(),
        }];
        effects.extend(delete_prompt(grant));

        Ok(Decision {
            write: GrantWrite::Deactivate(DeactivateGrant {
                grant_id: grant.id,
                expected_state: None,
                final_state: RenewalState::Superseded,
                reason: DeactivationReason::Removed,
            }),
            effects,
            audit: GrantAuditAction::Removed,
        })
    }

    /// Decides an expiry. Returns `None` when the grant is not an expired
    /// pending grant, so repeated expiry is a no-op.
    #[must_use]
    pub fn expire(&self, grant: &Grant, now: DateTime<Utc>) -> Option<Decision> {
        if !grant.is_expired_pending(now) {
            return None;
        }

        Some(Decision {
            write: GrantWrite::MarkAwaitingResponse {
                grant_id: grant.id,
                observed_at: now,
                renewal_due_at: now + self.policy.renewal_window,
            },
            effects: vec![SideEffect::PostRenewalPrompt {
                grant_id: grant.id,
                subject_id: grant.subject_id.clone(),
                role_name: grant.role_name.clone(),
            }],
            audit: GrantAuditAction::RenewalPrompted,
        })
    }

    /// Decides a renewal confirmation by `acting_subject_id`.
    pub fn confirm_renewal(
        &self,
        grant: &Grant,
        acting_subject_id: &str,
    ) -> Result<Decision, Rejection> {
        ensure_answerable(grant, acting_subject_id)?;

        let mut effects = vec![SideEffect::GrantRole {
            subject_id: grant.subject_id.clone(),
            role_id: grant.role_id.clone(),
        }];
        effects.extend(delete_prompt(grant));

        Ok(Decision {
            write: GrantWrite::ExtendAndReactivate {
                grant_id: grant.id,
                expires_at: grant.expires_at + self.policy.role_duration,
            },
            effects,
            audit: GrantAuditAction::RenewalConfirmed,
        })
    }

    /// Decides a renewal decline by `acting_subject_id`.
    pub fn decline_renewal(
        &self,
        grant: &Grant,
        acting_subject_id: &str,
    ) -> Result<Decision, Rejection> {
        ensure_answerable(grant, acting_subject_id)?;

        Ok(revocation(
            grant,
            DeactivationReason::Declined,
            GrantAuditAction::RenewalDeclined,
        ))
    }

    /// Decides a system-initiated renewal timeout. Returns `None` when the
    /// grant was already resolved or its window has not elapsed.
    #[must_use]
    pub fn renewal_timeout(&self, grant: &Grant, now: DateTime<Utc>) -> Option<Decision> {
        grant.is_renewal_overdue(now).then(|| {
            revocation(
                grant,
                DeactivationReason::TimedOut,
                GrantAuditAction::RenewalTimedOut,
            )
        })
    }
}

fn ensure_answerable(grant: &Grant, acting_subject_id: &str) -> Result<(), Rejection> {
    if !grant.is_owned_by(acting_subject_id) {
        return Err(Rejection::NotOwner);
    }

    if !grant.is_awaiting_response() {
        return Err(Rejection::StaleRequest);
    }

    Ok(())
}

fn revocation(grant: &Grant, reason: DeactivationReason, audit: GrantAuditAction) -> Decision {
    let mut effects = vec![SideEffect::RevokeRole {
        subject_id: grant.subject_id.clone(),
        role_id: grant.role_id.clone(),
    }];
    effects.extend(delete_prompt(grant));

    Decision {
        write: GrantWrite::Deactivate(DeactivateGrant {
            grant_id: grant.id,
            expected_state: Some(RenewalState::AwaitingResponse),
            final_state: RenewalState::Rejected,
            reason,
        }),
        effects,
        audit,
    }
}

fn delete_prompt(grant: &Grant) -> Option<SideEffect> {
    grant
        .renewal_prompt_id
        .as_ref()
        .filter(|prompt_id| !prompt_id.is_empty())
        .map(|prompt_id| SideEffect::DeleteRenewalPrompt {
            prompt_id: prompt_id.clone(),
        })
}
