use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tenure_application::{GrantAuditEvent, GrantAuditRepository, GrantRepository};
use tenure_core::{AppError, AppResult};
use tenure_domain::{
    DeactivateGrant, Grant, GrantId, NewGrant, ReclaimGrant, RenewalState,
};
use tokio::sync::RwLock;


/// In-memory grant repository for local runs and tests.
///
/// A single write lock guards each compare-and-set, matching the atomicity of
/// the conditional updates in PostgreSQL.
#[derive(Debug, Default)]
pub struct InMemoryGrantRepository {
    grants: RwLock<HashMap<GrantId, Grant>>,
}

impl InMemoryGrantRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self {
            grants: RwLock::new(HashMap::new()),
        }
    }

    async fn compare_and_set(
        &self,
        grant_id: GrantId,
        expected: impl FnOnce(&Grant) -> bool,
        apply: impl FnOnce(&mut Grant),
    ) -> bool {
        let mut grants = self.grants.write().await;
        match grants.get_mut(&grant_id) {
            Some(grant) if expected(grant) => {
                apply(grant);
                true
            }
            _ => false,
        }
    }

    async fn filtered(&self, predicate: impl Fn(&Grant) -> bool) -> Vec<Grant> {
        self.grants
            .read()
            .await
            .values()
            .filter(|grant| predicate(grant))
            .cloned()
            .collect()
    }
}

fn clear_renewal(grant: &mut Grant) {
    grant.renewal_prompt_id = None;
    grant.renewal_due_at = None;
}

#[async_trait]
impl GrantRepository for InMemoryGrantRepository {
    async fn insert_grant(&self, grant: NewGrant) -> AppResult<Grant> {
        let mut grants = self.grants.write().await;
        if grants
            .values()
            .any(|existing| existing.active && existing.subject_id == grant.subject_id)
        {
            return Err(AppError::Conflict(
                "subject already holds an active grant".to_owned(),
            ));
        }

        let stored = Grant {
            id: GrantId::new(),
            subject_id: grant.subject_id,
            subject_display_name: grant.subject_display_name,
            role_id: grant.role_id,
            role_name: grant.role_name,
            created_at: grant.created_at,
            expires_at: grant.expires_at,
            active: true,
            renewal_state: RenewalState::Pending,
            renewal_prompt_id: None,
            renewal_due_at: None,
            deactivation_reason: None,
        };
        grants.insert(stored.id, stored.clone());

        Ok(stored)
    }

    async fn find_expired_pending(&self, now: DateTime<Utc>) -> AppResult<Vec<Grant>> {
        let mut expired = self.filtered(|grant| grant.is_expired_pending(now)).await;
        expired.sort_by_key(|grant| grant.expires_at);
        Ok(expired)
    }

    async fn find_by_id(&self, grant_id: GrantId) -> AppResult<Option<Grant>> {
        Ok(self.grants.read().await.get(&grant_id).cloned())
    }

    async fn find_active_by_subject(&self, subject_id: &str) -> AppResult<Option<Grant>> {
        Ok(self
            .grants
            .read()
            .await
            .values()
            .find(|grant| grant.active && grant.is_owned_by(subject_id))
            .cloned())
    }

    async fn find_latest_by_subject(&self, subject_id: &str) -> AppResult<Option<Grant>> {
        Ok(self
            .grants
            .read()
            .await
            .values()
            .filter(|grant| grant.is_owned_by(subject_id))
            .max_by_key(|grant| grant.created_at)
            .cloned())
    }

    async fn update_renewal_state(
        &self,
        grant_id: GrantId,
        expected: RenewalState,
        next: RenewalState,
    ) -> AppResult<bool> {
        Ok(self
            .compare_and_set(
                grant_id,
                |grant| grant.active && grant.renewal_state == expected,
                |grant| {
                    grant.renewal_state = next;
                    if next != RenewalState::AwaitingResponse {
                        clear_renewal(grant);
                    }
                },
            )
            .await)
    }

    async fn mark_awaiting_response(
        &self,
        grant_id: GrantId,
        observed_at: DateTime<Utc>,
        renewal_due_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        Ok(self
            .compare_and_set(
                grant_id,
                |grant| grant.is_expired_pending(observed_at),
                |grant| {
                    grant.renewal_state = RenewalState::AwaitingResponse;
                    grant.renewal_prompt_id = None;
                    grant.renewal_due_at = Some(renewal_due_at);
                },
            )
            .await)
    }

    async fn reclaim(&self, reclaim: ReclaimGrant) -> AppResult<Option<Grant>> {
        let mut grants = self.grants.write().await;
        let Some(subject_id) = grants
            .get(&reclaim.grant_id)
            .filter(|grant| !grant.active)
            .map(|grant| grant.subject_id.clone())
        else {
            return Ok(None);
        };

        if grants
            .values()
            .any(|grant| grant.active && grant.subject_id == subject_id)
        {
            return Err(AppError::Conflict(
                "subject already holds an active grant".to_owned(),
            ));
        }

        let Some(grant) = grants.get_mut(&reclaim.grant_id) else {
            return Ok(None);
        };
        grant.subject_display_name = reclaim.subject_display_name;
        grant.role_id = reclaim.role_id;
        grant.role_name = reclaim.role_name;
        grant.created_at = reclaim.created_at;
        grant.expires_at = reclaim.expires_at;
        grant.active = true;
        grant.renewal_state = RenewalState::Pending;
        grant.deactivation_reason = None;
        clear_renewal(grant);

        Ok(Some(grant.clone()))
    }

    async fn extend_and_reactivate(
        &self,
        grant_id: GrantId,
        expires_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        Ok(self
            .compare_and_set(grant_id, Grant::is_awaiting_response, |grant| {
                grant.expires_at = expires_at;
                grant.renewal_state = RenewalState::Pending;
                clear_renewal(grant);
            })
            .await)
    }

    async fn deactivate(&self, request: DeactivateGrant) -> AppResult<bool> {
        Ok(self
            .compare_and_set(
                request.grant_id,
                |grant| {
                    grant.active
                        && request
                            .expected_state
                            .is_none_or(|expected| grant.renewal_state == expected)
                },
                |grant| {
                    grant.active = false;
                    grant.renewal_state = request.final_state;
                    grant.deactivation_reason = Some(request.reason);
                    clear_renewal(grant);
                },
            )
            .await)
    }

    async fn set_renewal_prompt(&self, grant_id: GrantId, prompt_id: &str) -> AppResult<bool> {
        Ok(self
            .compare_and_set(grant_id, Grant::is_awaiting_response, |grant| {
                grant.renewal_prompt_id = Some(prompt_id.to_owned());
            })
            .await)
    }

    async fn get_renewal_prompt(&self, grant_id: GrantId) -> AppResult<Option<String>> {
        Ok(self
            .grants
            .read()
            .await
            .get(&grant_id)
            .and_then(|grant| grant.renewal_prompt_id.clone()))
    }

    async fn list_active(&self) -> AppResult<Vec<Grant>> {
        let mut active = self.filtered(|grant| grant.active).await;
        active.sort_by(|left, right| {
            left.role_name
                .cmp(&right.role_name)
                .then_with(|| left.subject_display_name.cmp(&right.subject_display_name))
        });
        Ok(active)
    }

    async fn find_overdue_renewals(&self, now: DateTime<Utc>) -> AppResult<Vec<Grant>> {
        let mut overdue = self.filtered(|grant| grant.is_renewal_overdue(now)).await;
        overdue.sort_by_key(|grant| grant.renewal_due_at);
        Ok(overdue)
    }

    async fn next_renewal_deadline(&self) -> AppResult<Option<DateTime<Utc>>> {
        Ok(self
            .grants
            .read()
            .await
            .values()
            .filter(|grant| grant.is_renewal_armed())
            .filter_map(|grant| grant.renewal_due_at)
            .min())
    }

    async fn find_unprompted_renewals(&self) -> AppResult<Vec<Grant>> {
        let mut unprompted = self.filtered(Grant::is_prompt_missing).await;
        unprompted.sort_by_key(|grant| grant.renewal_due_at);
        Ok(unprompted)
    }
}

/// In-memory grant audit log.
#[derive(Debug, Default)]
pub struct InMemoryGrantAuditRepository {
    events: RwLock<Vec<GrantAuditEvent>>,
}

impl InMemoryGrantAuditRepository {
    /// Creates an empty audit log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every recorded event in append order.
    pub async fn events(&self) -> Vec<GrantAuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl GrantAuditRepository for InMemoryGrantAuditRepository {
    async fn append_event(&self, event: GrantAuditEvent) -> AppResult<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}
