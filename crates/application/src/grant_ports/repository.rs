use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tenure_core::AppResult;
use tenure_domain::{DeactivateGrant, Grant, GrantId, NewGrant, ReclaimGrant, RenewalState};

/// Durable store of role grants.
///
/// Every call is atomic. Mutations other than `insert_grant` are
/// compare-and-set writes: they return `false` (or `None`) when the row no
/// longer matches the expected state, and callers treat that as "someone else
/// already resolved this grant".
#[async_trait]
pub trait GrantRepository: Send + Sync {
    /// Inserts the first row for a subject.
    ///
    /// Fails with `AppError::Conflict` when the subject already holds an
    /// active grant.
    async fn insert_grant(&self, grant: NewGrant) -> AppResult<Grant>;

    /// Lists active pending grants whose expiry is at or before `now`.
    async fn find_expired_pending(&self, now: DateTime<Utc>) -> AppResult<Vec<Grant>>;

    /// Finds one grant by id.
    async fn find_by_id(&self, grant_id: GrantId) -> AppResult<Option<Grant>>;

    /// Finds the subject's active grant.
    async fn find_active_by_subject(&self, subject_id: &str) -> AppResult<Option<Grant>>;

    /// Finds the subject's most recently created row, active or not.
    async fn find_latest_by_subject(&self, subject_id: &str) -> AppResult<Option<Grant>>;

    /// Moves an active grant from `expected` to `next`.
    ///
    /// Leaving `awaiting_response` clears the prompt id and renewal deadline.
    async fn update_renewal_state(
        &self,
        grant_id: GrantId,
        expected: RenewalState,
        next: RenewalState,
    ) -> AppResult<bool>;

    /// Claims an expired pending grant for prompting.
    ///
    /// Applies only while the grant is active, pending and expired at
    /// `observed_at`, so concurrent scans cannot both claim it.
    async fn mark_awaiting_response(
        &self,
        grant_id: GrantId,
        observed_at: DateTime<Utc>,
        renewal_due_at: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Reactivates an inactive row for a new claim.
    async fn reclaim(&self, reclaim: ReclaimGrant) -> AppResult<Option<Grant>>;

    /// Extends an awaiting grant and returns it to `pending`.
    async fn extend_and_reactivate(
        &self,
        grant_id: GrantId,
        expires_at: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Deactivates an active grant, clearing its prompt and deadline.
    async fn deactivate(&self, request: DeactivateGrant) -> AppResult<bool>;

    /// Records the prompt message of an awaiting grant.
    async fn set_renewal_prompt(&self, grant_id: GrantId, prompt_id: &str) -> AppResult<bool>;

    /// Returns the outstanding prompt message id, if any.
    async fn get_renewal_prompt(&self, grant_id: GrantId) -> AppResult<Option<String>>;

    /// Lists active grants sorted by role name then display name.
    async fn list_active(&self) -> AppResult<Vec<Grant>>;

    /// Lists awaiting grants with a recorded prompt whose renewal deadline is
    /// at or before `now`.
    async fn find_overdue_renewals(&self, now: DateTime<Utc>) -> AppResult<Vec<Grant>>;

    /// Returns the earliest deadline among awaiting grants with a recorded prompt.
    async fn next_renewal_deadline(&self) -> AppResult<Option<DateTime<Utc>>>;

    /// Lists awaiting grants whose prompt id was never recorded.
    async fn find_unprompted_renewals(&self) -> AppResult<Vec<Grant>>;
}
