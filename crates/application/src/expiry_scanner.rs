use std::sync::Arc;
use std::time::Duration;

use tenure_core::AppResult;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{Clock, ExpireOutcome, GrantLifecycleService, GrantRepository};

/// Counters reported by one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Awaiting grants without a recorded prompt that were returned to `pending`.
    pub recovered: u32,
    /// Grants this scan moved to `awaiting_response`.
    pub claimed: u32,
    /// Grants whose prompt was posted and recorded.
    pub prompted: u32,
    /// Grants that failed and will be retried by a later scan.
    pub failed: u32,
}

/// Periodic scan feeding expire events into the lifecycle service.
#[derive(Clone)]
pub struct ExpiryScanner {
    lifecycle: GrantLifecycleService,
    repository: Arc<dyn GrantRepository>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl ExpiryScanner {
    /// Creates a scanner running every `interval`.
    #[must_use]
    pub fn new(
        lifecycle: GrantLifecycleService,
        repository: Arc<dyn GrantRepository>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            lifecycle,
            repository,
            clock,
            interval,
        }
    }

    /// Runs one scan. Grants are processed independently.
    ///
    /// Awaiting grants whose prompt was never recorded, for example after a
    /// crash between the claim and the prompt, are returned to `pending`
    /// first so this same scan prompts them again.
    pub async fn tick(&self) -> AppResult<ScanReport> {
        let mut report = ScanReport::default();
        for grant in self.repository.find_unprompted_renewals().await? {
            match self.lifecycle.recover_unprompted(&grant).await {
                Ok(true) => report.recovered = report.recovered.saturating_add(1),
                Ok(false) => {}
                Err(error) => {
                    report.failed = report.failed.saturating_add(1);
                    warn!(
                        grant_id = %grant.id,
                        error = %error,
                        "failed to recover unprompted grant"
                    );
                }
            }
        }

        let expired = self
            .repository
            .find_expired_pending(self.clock.now())
            .await?;

        for grant in expired {
            match self.lifecycle.expire(&grant).await {
                Ok(ExpireOutcome::Prompted { .. }) => {
                    report.claimed = report.claimed.saturating_add(1);
                    report.prompted = report.prompted.saturating_add(1);
                }
                Ok(ExpireOutcome::PromptFailed { error, .. }) => {
                    report.claimed = report.claimed.saturating_add(1);
                    report.failed = report.failed.saturating_add(1);
                    warn!(
                        grant_id = %grant.id,
                        error = %error,
                        "renewal prompt will be retried on the next scan"
                    );
                }
                Ok(ExpireOutcome::Skipped) => {
                    debug!(grant_id = %grant.id, "grant already claimed by another scan");
                }
                Err(error) => {
                    report.failed = report.failed.saturating_add(1);
                    warn!(
                        grant_id = %grant.id,
                        subject_id = %grant.subject_id,
                        error = %error,
                        "failed to expire grant"
                    );
                }
            }
        }

        Ok(report)
    }

    /// Runs scans on the configured interval until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_seconds = self.interval.as_secs(),
            "expiry scanner started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) if report.claimed > 0 || report.failed > 0 => info!(
                            recovered = report.recovered,
                            claimed = report.claimed,
                            prompted = report.prompted,
                            failed = report.failed,
                            "expiry scan finished"
                        ),
                        Ok(_) => debug!("expiry scan found nothing to do"),
                        Err(error) => warn!(error = %error, "expiry scan failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("expiry scanner stopped");
    }
}
