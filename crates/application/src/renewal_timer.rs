use std::sync::Arc;
use std::time::Duration;

use tenure_core::AppResult;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

use crate::{Clock, GrantLifecycleService, GrantRepository, TimeoutOutcome};

/// Wakes the renewal timer when a new deadline is stored.
#[derive(Clone, Default)]
pub struct RenewalWakeup {
    notify: Arc<Notify>,
}

impl RenewalWakeup {
    /// Requests a deadline re-read. Wakeups sent while the timer is busy are kept.
    pub fn arm(&self) {
        self.notify.notify_one();
    }

    async fn armed(&self) {
        self.notify.notified().await;
    }
}

/// Counters reported by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Grants deactivated because their renewal window elapsed.
    pub revoked: u32,
    /// Grants whose timeout failed and stays due.
    pub failed: u32,
}

/// Deadline-driven task revoking grants whose renewal window elapsed.
///
/// Deadlines live in the store, so the timer needs no in-memory schedule and
/// resumes correctly after a restart. A sweep with failures is retried after
/// the fallback interval rather than at the still-overdue deadline.
#[derive(Clone)]
pub struct RenewalTimer {
    lifecycle: GrantLifecycleService,
    repository: Arc<dyn GrantRepository>,
    clock: Arc<dyn Clock>,
    wakeup: RenewalWakeup,
    fallback_interval: Duration,
}

impl RenewalTimer {
    /// Creates a timer that re-checks the store at least every `fallback_interval`.
    #[must_use]
    pub fn new(
        lifecycle: GrantLifecycleService,
        repository: Arc<dyn GrantRepository>,
        clock: Arc<dyn Clock>,
        wakeup: RenewalWakeup,
        fallback_interval: Duration,
    ) -> Self {
        Self {
            lifecycle,
            repository,
            clock,
            wakeup,
            fallback_interval,
        }
    }

    /// Times out every overdue renewal once.
    pub async fn sweep(&self) -> AppResult<SweepReport> {
        let overdue = self
            .repository
            .find_overdue_renewals(self.clock.now())
            .await?;
        let mut report = SweepReport::default();

        for grant in overdue {
            match self.lifecycle.renewal_timeout(&grant).await {
                Ok(TimeoutOutcome::Revoked { .. }) => {
                    report.revoked = report.revoked.saturating_add(1);
                }
                Ok(TimeoutOutcome::Skipped) => {
                    debug!(grant_id = %grant.id, "renewal already resolved");
                }
                Err(error) => {
                    report.failed = report.failed.saturating_add(1);
                    warn!(
                        grant_id = %grant.id,
                        subject_id = %grant.subject_id,
                        error = %error,
                        "renewal timeout failed"
                    );
                }
            }
        }

        Ok(report)
    }

    /// Returns how long to sleep before the next sweep.
    pub async fn next_delay(&self) -> AppResult<Duration> {
        let Some(deadline) = self.repository.next_renewal_deadline().await? else {
            return Ok(self.fallback_interval);
        };

        let until_deadline = (deadline - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        Ok(until_deadline.min(self.fallback_interval))
    }

    /// Runs until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("renewal timer started");

        loop {
            let retry_later = match self.sweep().await {
                Ok(report) => {
                    if report.revoked > 0 || report.failed > 0 {
                        info!(
                            revoked = report.revoked,
                            failed = report.failed,
                            "renewal sweep finished"
                        );
                    }
                    report.failed > 0
                }
                Err(error) => {
                    warn!(error = %error, "renewal sweep failed");
                    true
                }
            };

            let delay = if retry_later {
                self.fallback_interval
            } else {
                match self.next_delay().await {
                    Ok(delay) => delay,
                    Err(error) => {
                        warn!(error = %error, "failed to read next renewal deadline");
                        self.fallback_interval
                    }
                }
            };

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.wakeup.armed() => {
                    debug!("renewal timer woken by a new deadline");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("renewal timer stopped");
    }
}
