use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Mutex;

use tenure_core::{AppError, AppResult};
use tenure_domain::{
    DeactivateGrant, Grant, GrantId, GrantPolicy, LifecycleEngine, NewGrant, ReclaimGrant,
    RenewalState, RoleCatalog,
};

use crate::{
    ChannelMessage, ChatPlatform, Clock, GrantAuditEvent, GrantAuditRepository,
    GrantLifecycleService, GrantRepository, OutgoingMessage, SubjectWorkQueue,
};

pub(crate) const BOT_USER_ID: &str = "bot";
pub(crate) const NOTIFICATION_CHANNEL: &str = "notifications";

pub(crate) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 18, 0, 0)
        .single()
        .unwrap_or_default()
}

pub(crate) fn engine() -> LifecycleEngine {
    let Ok(catalog) =
        RoleCatalog::from_str("sandy=901:Sandy Shores,paleto=902:Paleto Bay")
    else {
        panic!("catalog should parse");
    };
    let Ok(policy) = GrantPolicy::new(Duration::minutes(65), Duration::minutes(10)) else {
        panic!("policy should be valid");
    };

    LifecycleEngine::new(policy, catalog)
}

/// Clock whose instant only moves when a test advances it.
pub(crate) struct FakeClock {
    millis: AtomicI64,
}

impl FakeClock {
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(now.timestamp_millis()),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

#[derive(Default)]
pub(crate) struct FakeGrantRepository {
    pub(crate) grants: Mutex<Vec<Grant>>,
    pub(crate) fail_deactivates: AtomicBool,
    pub(crate) deactivate_attempts: AtomicUsize,
}

impl FakeGrantRepository {
    pub(crate) async fn snapshot(&self, grant_id: GrantId) -> Option<Grant> {
        self.grants
            .lock()
            .await
            .iter()
            .find(|grant| grant.id == grant_id)
            .cloned()
    }

    async fn update<F>(&self, grant_id: GrantId, guard: F, apply: impl FnOnce(&mut Grant)) -> bool
    where
        F: Fn(&Grant) -> bool,
    {
        let mut grants = self.grants.lock().await;
        match grants
            .iter_mut()
            .find(|grant| grant.id == grant_id && guard(grant))
        {
            Some(grant) => {
                apply(grant);
                true
            }
            None => false,
        }
    }
}

fn clear_renewal(grant: &mut Grant) {
    grant.renewal_prompt_id = None;
    grant.renewal_due_at = None;
}

#[async_trait]
impl GrantRepository for FakeGrantRepository {
    async fn insert_grant(&self, grant: NewGrant) -> AppResult<Grant> {
        let mut grants = self.grants.lock().await;
        if grants
            .iter()
            .any(|existing| existing.active && existing.subject_id == grant.subject_id)
        {
            return Err(AppError::Conflict("subject already active".to_owned()));
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
        grants.push(stored.clone());
        Ok(stored)
    }

    async fn find_expired_pending(&self, now: DateTime<Utc>) -> AppResult<Vec<Grant>> {
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .filter(|grant| grant.is_expired_pending(now))
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, grant_id: GrantId) -> AppResult<Option<Grant>> {
        Ok(self.snapshot(grant_id).await)
    }

    async fn find_active_by_subject(&self, subject_id: &str) -> AppResult<Option<Grant>> {
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .find(|grant| grant.active && grant.subject_id == subject_id)
            .cloned())
    }

    async fn find_latest_by_subject(&self, subject_id: &str) -> AppResult<Option<Grant>> {
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .filter(|grant| grant.subject_id == subject_id)
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
            .update(
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
            .update(
                grant_id,
                |grant| grant.is_expired_pending(observed_at),
                |grant| {
                    grant.renewal_state = RenewalState::AwaitingResponse;
                    grant.renewal_due_at = Some(renewal_due_at);
                },
            )
            .await)
    }

    async fn reclaim(&self, reclaim: ReclaimGrant) -> AppResult<Option<Grant>> {
        let applied = self
            .update(
                reclaim.grant_id,
                |grant| !grant.active,
                |grant| {
                    grant.subject_display_name = reclaim.subject_display_name.clone();
                    grant.role_id = reclaim.role_id.clone();
                    grant.role_name = reclaim.role_name.clone();
                    grant.created_at = reclaim.created_at;
                    grant.expires_at = reclaim.expires_at;
                    grant.active = true;
                    grant.renewal_state = RenewalState::Pending;
                    grant.deactivation_reason = None;
                    clear_renewal(grant);
                },
            )
            .await;

        if !applied {
            return Ok(None);
        }
        Ok(self.snapshot(reclaim.grant_id).await)
    }

    async fn extend_and_reactivate(
        &self,
        grant_id: GrantId,
        expires_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        Ok(self
            .update(grant_id, Grant::is_awaiting_response, |grant| {
                grant.expires_at = expires_at;
                grant.renewal_state = RenewalState::Pending;
                clear_renewal(grant);
            })
            .await)
    }

    async fn deactivate(&self, request: DeactivateGrant) -> AppResult<bool> {
        self.deactivate_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_deactivates.load(Ordering::SeqCst) {
            return Err(AppError::Internal("database is read-only".to_owned()));
        }

        Ok(self
            .update(
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
            .update(grant_id, Grant::is_awaiting_response, |grant| {
                grant.renewal_prompt_id = Some(prompt_id.to_owned());
            })
            .await)
    }

    async fn get_renewal_prompt(&self, grant_id: GrantId) -> AppResult<Option<String>> {
        Ok(self
            .snapshot(grant_id)
            .await
            .and_then(|grant| grant.renewal_prompt_id))
    }

    async fn list_active(&self) -> AppResult<Vec<Grant>> {
        let mut active: Vec<Grant> = self
            .grants
            .lock()
            .await
            .iter()
            .filter(|grant| grant.active)
            .cloned()
            .collect();
        active.sort_by(|left, right| {
            left.role_name
                .cmp(&right.role_name)
                .then_with(|| left.subject_display_name.cmp(&right.subject_display_name))
        });
        Ok(active)
    }

    async fn find_overdue_renewals(&self, now: DateTime<Utc>) -> AppResult<Vec<Grant>> {
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .filter(|grant| grant.is_renewal_overdue(now))
            .cloned()
            .collect())
    }

    async fn next_renewal_deadline(&self) -> AppResult<Option<DateTime<Utc>>> {
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .filter(|grant| grant.is_renewal_armed())
            .filter_map(|grant| grant.renewal_due_at)
            .min())
    }

    async fn find_unprompted_renewals(&self) -> AppResult<Vec<Grant>> {
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .filter(|grant| grant.is_prompt_missing())
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct FakeAuditRepository {
    pub(crate) events: Mutex<Vec<GrantAuditEvent>>,
}

#[async_trait]
impl GrantAuditRepository for FakeAuditRepository {
    async fn append_event(&self, event: GrantAuditEvent) -> AppResult<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlatformCall {
    GrantRole { subject_id: String, role_id: String },
    RevokeRole { subject_id: String, role_id: String },
    Post { channel_id: String, message_id: String, message: OutgoingMessage },
    Edit { channel_id: String, message_id: String, content: String },
    Delete { channel_id: String, message_id: String },
}

/// Chat platform double recording every call.
#[derive(Default)]
pub(crate) struct FakePlatform {
    pub(crate) calls: Mutex<Vec<PlatformCall>>,
    pub(crate) history: Mutex<HashMap<String, Vec<ChannelMessage>>>,
    pub(crate) display_names: Mutex<HashMap<String, String>>,
    pub(crate) fail_grants: AtomicBool,
    pub(crate) fail_revokes: AtomicBool,
    pub(crate) fail_posts: AtomicBool,
    pub(crate) fail_edits: AtomicBool,
    next_message_id: AtomicU64,
}

impl FakePlatform {
    pub(crate) async fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().await.clone()
    }

    pub(crate) async fn count(&self, predicate: impl Fn(&PlatformCall) -> bool) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    pub(crate) async fn seed_message(&self, channel_id: &str, message: ChannelMessage) {
        self.history
            .lock()
            .await
            .entry(channel_id.to_owned())
            .or_default()
            .insert(0, message);
    }

    fn failure(flag: &AtomicBool, operation: &str) -> AppResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(AppError::Internal(format!("{operation} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn grant_role(&self, subject_id: &str, role_id: &str) -> AppResult<()> {
        self.calls.lock().await.push(PlatformCall::GrantRole {
            subject_id: subject_id.to_owned(),
            role_id: role_id.to_owned(),
        });
        Self::failure(&self.fail_grants, "grant role")
    }

    async fn revoke_role(&self, subject_id: &str, role_id: &str) -> AppResult<()> {
        self.calls.lock().await.push(PlatformCall::RevokeRole {
            subject_id: subject_id.to_owned(),
            role_id: role_id.to_owned(),
        });
        Self::failure(&self.fail_revokes, "revoke role")
    }

    async fn post_message(&self, channel_id: &str, message: OutgoingMessage) -> AppResult<String> {
        Self::failure(&self.fail_posts, "post message")?;

        let message_id = format!(
            "message-{}",
            self.next_message_id.fetch_add(1, Ordering::SeqCst)
        );
        self.seed_message(
            channel_id,
            ChannelMessage {
                id: message_id.clone(),
                author_id: BOT_USER_ID.to_owned(),
                content: message.content.clone(),
            },
        )
        .await;
        self.calls.lock().await.push(PlatformCall::Post {
            channel_id: channel_id.to_owned(),
            message_id: message_id.clone(),
            message,
        });
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> AppResult<()> {
        Self::failure(&self.fail_edits, "edit message")?;
        self.calls.lock().await.push(PlatformCall::Edit {
            channel_id: channel_id.to_owned(),
            message_id: message_id.to_owned(),
            content: content.to_owned(),
        });
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> AppResult<()> {
        if let Some(messages) = self.history.lock().await.get_mut(channel_id) {
            messages.retain(|message| message.id != message_id);
        }
        self.calls.lock().await.push(PlatformCall::Delete {
            channel_id: channel_id.to_owned(),
            message_id: message_id.to_owned(),
        });
        Ok(())
    }

    async fn lookup_display_name(&self, subject_id: &str) -> AppResult<Option<String>> {
        Ok(self.display_names.lock().await.get(subject_id).cloned())
    }

    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> AppResult<Vec<ChannelMessage>> {
        Ok(self
            .history
            .lock()
            .await
            .get(channel_id)
            .map(|messages| messages.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn current_user_id(&self) -> AppResult<String> {
        Ok(BOT_USER_ID.to_owned())
    }
}

/// Lifecycle service wired to fresh fakes.
pub(crate) struct Harness {
    pub(crate) repository: Arc<FakeGrantRepository>,
    pub(crate) audit: Arc<FakeAuditRepository>,
    pub(crate) platform: Arc<FakePlatform>,
    pub(crate) clock: Arc<FakeClock>,
    pub(crate) service: GrantLifecycleService,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let repository = Arc::new(FakeGrantRepository::default());
        let audit = Arc::new(FakeAuditRepository::default());
        let platform = Arc::new(FakePlatform::default());
        let clock = Arc::new(FakeClock::new(start()));
        let Ok(work_queue) = SubjectWorkQueue::new(4) else {
            panic!("work queue should be created");
        };
        let service = GrantLifecycleService::new(
            engine(),
            repository.clone(),
            audit.clone(),
            platform.clone(),
            clock.clone(),
            work_queue,
            NOTIFICATION_CHANNEL,
        );

        Self {
            repository,
            audit,
            platform,
            clock,
            service,
        }
    }
}
