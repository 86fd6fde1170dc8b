use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenure_core::{AppError, AppResult};
use uuid::Uuid;

/// Stable identifier of one grant lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantId(Uuid);

impl GrantId {
    /// Creates a random grant identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a grant identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Parses a transport value into a grant identifier.
    pub fn parse(value: &str) -> AppResult<Self> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|error| AppError::Validation(format!("invalid grant id '{value}': {error}")))
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for GrantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GrantId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Renewal progress of one grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalState {
    /// Role is held and not yet expired.
    Pending,
    /// Role expired and a renewal prompt is outstanding.
    AwaitingResponse,
    /// Renewal was accepted by the owner.
    Confirmed,
    /// Renewal was declined or timed out.
    Rejected,
    /// Grant was removed by its owner or replaced by an aborted claim.
    Superseded,
}

impl RenewalState {
    /// Returns a stable storage value for this state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingResponse => "awaiting_response",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Superseded => "superseded",
        }
    }
}

impl FromStr for RenewalState {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "awaiting_response" => Ok(Self::AwaitingResponse),
            "confirmed" => Ok(Self::Confirmed),
            "rejected" => Ok(Self::Rejected),
            "superseded" => Ok(Self::Superseded),
            _ => Err(AppError::Validation(format!(
                "unknown renewal state '{value}'"
            ))),
        }
    }
}

/// Why a grant stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeactivationReason {
    /// Owner removed the role.
    Removed,
    /// Owner declined the renewal prompt.
    Declined,
    /// Renewal window elapsed without a response.
    TimedOut,
    /// External role grant failed after the claim was stored.
    ClaimAborted,
}

impl DeactivationReason {
    /// Returns a stable storage value for this reason.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Removed => "removed",
            Self::Declined => "declined",
            Self::TimedOut => "timed_out",
            Self::ClaimAborted => "claim_aborted",
        }
    }
}

impl FromStr for DeactivationReason {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "removed" => Ok(Self::Removed),
            "declined" => Ok(Self::Declined),
            "timed_out" => Ok(Self::TimedOut),
            "claim_aborted" => Ok(Self::ClaimAborted),
            _ => Err(AppError::Validation(format!(
                "unknown deactivation reason '{value}'"
            ))),
        }
    }
}

/// A member's time-bounded hold on a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// Stable lineage identifier.
    pub id: GrantId,
    /// Platform identifier of the claiming member.
    pub subject_id: String,
    /// Display name captured at claim time.
    pub subject_display_name: String,
    /// Platform identifier of the granted role.
    pub role_id: String,
    /// Human-readable role name.
    pub role_name: String,
    /// Start of the current claim lineage.
    pub created_at: DateTime<Utc>,
    /// Instant after which the grant needs renewal.
    pub expires_at: DateTime<Utc>,
    /// Whether the role is currently held.
    pub active: bool,
    /// Renewal progress.
    pub renewal_state: RenewalState,
    /// Outstanding renewal prompt message, if any.
    pub renewal_prompt_id: Option<String>,
    /// Deadline of the outstanding renewal window, if any.
    pub renewal_due_at: Option<DateTime<Utc>>,
    /// Why the grant was deactivated, when inactive.
    pub deactivation_reason: Option<DeactivationReason>,
}

impl Grant {
    /// Returns whether the grant is active and waiting for a renewal answer.
    #[must_use]
    pub fn is_awaiting_response(&self) -> bool {
        self.active && self.renewal_state == RenewalState::AwaitingResponse
    }

    /// Returns whether the grant is active, pending and past its expiry at `now`.
    #[must_use]
    pub fn is_expired_pending(&self, now: DateTime<Utc>) -> bool {
        self.active && self.renewal_state == RenewalState::Pending && self.expires_at <= now
    }

    /// Returns whether the grant awaits an answer to a recorded prompt.
    #[must_use]
    pub fn is_renewal_armed(&self) -> bool {
        self.is_awaiting_response() && self.renewal_prompt_id.is_some()
    }

    /// Returns whether the grant awaits an answer but no prompt was recorded.
    #[must_use]
    pub fn is_prompt_missing(&self) -> bool {
        self.is_awaiting_response() && self.renewal_prompt_id.is_none()
    }

    /// Returns whether the renewal window of a recorded prompt has elapsed at `now`.
    #[must_use]
    pub fn is_renewal_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_renewal_armed() && self.renewal_due_at.is_some_and(|due_at| due_at <= now)
    }

    /// Returns whether `subject_id` owns this grant.
    #[must_use]
    pub fn is_owned_by(&self, subject_id: &str) -> bool {
        self.subject_id == subject_id
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::{Duration, TimeZone, Utc};

    use super::{Grant, GrantId, RenewalState};

    fn grant() -> Grant {
        let created_at = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).single().unwrap_or_default();
        Grant {
            id: GrantId::new(),
            subject_id: "100".to_owned(),
            subject_display_name: "alice".to_owned(),
            role_id: "900".to_owned(),
            role_name: "Sandy Shores".to_owned(),
            created_at,
            expires_at: created_at + Duration::minutes(65),
            active: true,
            renewal_state: RenewalState::Pending,
            renewal_prompt_id: None,
            renewal_due_at: None,
            deactivation_reason: None,
        }
    }

    #[test]
    fn renewal_state_parses_storage_values() {
        for state in [
            RenewalState::Pending,
            RenewalState::AwaitingResponse,
            RenewalState::Confirmed,
            RenewalState::Rejected,
            RenewalState::Superseded,
        ] {
            let parsed = RenewalState::from_str(state.as_str());
            assert!(matches!(parsed, Ok(value) if value == state));
        }
        assert!(RenewalState::from_str("waiting_response").is_err());
    }

    #[test]
    fn expiry_is_inclusive_of_the_deadline() {
        let grant = grant();
        assert!(!grant.is_expired_pending(grant.expires_at - Duration::seconds(1)));
        assert!(grant.is_expired_pending(grant.expires_at));
    }

    #[test]
    fn overdue_requires_recorded_prompt_and_deadline() {
        let mut grant = grant();
        let now = grant.expires_at + Duration::minutes(20);
        assert!(!grant.is_renewal_overdue(now));
        assert!(!grant.is_prompt_missing());

        grant.renewal_state = RenewalState::AwaitingResponse;
        grant.renewal_due_at = Some(grant.expires_at + Duration::minutes(10));
        assert!(!grant.is_renewal_overdue(now));
        assert!(grant.is_prompt_missing());

        grant.renewal_prompt_id = Some("prompt-1".to_owned());
        assert!(grant.is_renewal_overdue(now));
        assert!(grant.is_renewal_armed());
        assert!(!grant.is_prompt_missing());

        grant.active = false;
        assert!(!grant.is_renewal_overdue(now));
    }

    #[test]
    fn grant_id_rejects_garbage() {
        assert!(GrantId::parse("not-a-uuid").is_err());
        let id = GrantId::new();
        assert_eq!(GrantId::parse(id.to_string().as_str()).ok(), Some(id));
    }
}
