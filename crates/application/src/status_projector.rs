use std::sync::Arc;

use tenure_core::AppResult;
use tenure_domain::{STATUS_MARKER, StatusLine, render_status};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::{ChatPlatform, GrantRepository, OutgoingMessage};

/// How many recent channel messages are scanned for an existing status message.
pub const STATUS_DISCOVERY_LIMIT: usize = 10;

/// Keeps one channel message in sync with the set of active grants.
///
/// Refreshes are debounced: at most one recomputation runs at a time, and any
/// number of signals arriving while it runs schedule exactly one follow-up.
#[derive(Clone)]
pub struct StatusProjector {
    inner: Arc<ProjectorInner>,
}

struct ProjectorInner {
    repository: Arc<dyn GrantRepository>,
    platform: Arc<dyn ChatPlatform>,
    channel_id: String,
    gate: Mutex<RefreshGate>,
    busy: watch::Sender<bool>,
    message_id: Mutex<Option<String>>,
}

#[derive(Default)]
struct RefreshGate {
    running: bool,
    follow_up: bool,
}

impl StatusProjector {
    /// Creates a projector publishing into `channel_id`.
    #[must_use]
    pub fn new(
        repository: Arc<dyn GrantRepository>,
        platform: Arc<dyn ChatPlatform>,
        channel_id: impl Into<String>,
    ) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            inner: Arc::new(ProjectorInner {
                repository,
                platform,
                channel_id: channel_id.into(),
                gate: Mutex::new(RefreshGate::default()),
                busy,
                message_id: Mutex::new(None),
            }),
        }
    }

    /// Requests a refresh without waiting for it.
    pub async fn signal(&self) {
        {
            let mut gate = self.inner.gate.lock().await;
            if gate.running {
                gate.follow_up = true;
                return;
            }
            gate.running = true;
        }

        self.inner.busy.send_replace(true);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run_refreshes().await });
    }

    /// Waits until no refresh is running or scheduled.
    pub async fn wait_idle(&self) {
        let mut busy = self.inner.busy.subscribe();
        if busy.wait_for(|running| !*running).await.is_err() {
            debug!("status projector dropped while waiting for idle");
        }
    }

    /// Returns the id of the status message, when known.
    pub async fn message_id(&self) -> Option<String> {
        self.inner.message_id.lock().await.clone()
    }

    /// Deletes the status message.
    pub async fn retract(&self) -> AppResult<()> {
        let mut message_id = self.inner.message_id.lock().await;
        if message_id.is_none() {
            *message_id = self.inner.discover().await?;
        }

        if let Some(existing) = message_id.take() {
            self.inner
                .platform
                .delete_message(self.inner.channel_id.as_str(), existing.as_str())
                .await?;
            info!(message_id = %existing, "status message retracted");
        }

        Ok(())
    }
}

impl ProjectorInner {
    async fn run_refreshes(&self) {
        loop {
            if let Err(error) = self.refresh().await {
                warn!(error = %error, "status refresh failed");
            }

            let mut gate = self.gate.lock().await;
            if gate.follow_up {
                gate.follow_up = false;
                continue;
            }

            gate.running = false;
            self.busy.send_replace(false);
            break;
        }
    }

    async fn refresh(&self) -> AppResult<()> {
        let grants = self.repository.list_active().await?;
        let mut lines = Vec::with_capacity(grants.len());
        for grant in grants {
            let display_name = match self
                .platform
                .lookup_display_name(grant.subject_id.as_str())
                .await
            {
                Ok(Some(display_name)) => display_name,
                Ok(None) => grant.subject_display_name,
                Err(error) => {
                    debug!(
                        subject_id = %grant.subject_id,
                        error = %error,
                        "display name lookup failed, using stored name"
                    );
                    grant.subject_display_name
                }
            };

            lines.push(StatusLine {
                display_name,
                role_name: grant.role_name,
            });
        }
        let content = render_status(lines);

        let mut message_id = self.message_id.lock().await;
        if message_id.is_none() {
            *message_id = match self.discover().await {
                Ok(discovered) => discovered,
                Err(error) => {
                    warn!(error = %error, "status message discovery failed");
                    None
                }
            };
        }

        if let Some(existing) = message_id.clone() {
            match self
                .platform
                .edit_message(
                    self.channel_id.as_str(),
                    existing.as_str(),
                    content.as_str(),
                )
                .await
            {
                Ok(()) => return Ok(()),
                Err(error) => {
                    warn!(
                        message_id = %existing,
                        error = %error,
                        "status message edit failed, posting a new one"
                    );
                    *message_id = None;
                }
            }
        }

        let posted = self
            .platform
            .post_message(self.channel_id.as_str(), OutgoingMessage::text(content))
            .await?;
        info!(message_id = %posted, "status message posted");
        *message_id = Some(posted);

        Ok(())
    }

    async fn discover(&self) -> AppResult<Option<String>> {
        let bot_user_id = self.platform.current_user_id().await?;
        let recent = self
            .platform
            .recent_messages(self.channel_id.as_str(), STATUS_DISCOVERY_LIMIT)
            .await?;

        Ok(recent
            .into_iter()
            .find(|message| {
                message.author_id == bot_user_id && message.content.contains(STATUS_MARKER)
            })
            .map(|message| message.id))
    }
}

#[cfg(test)]
mod tests;
