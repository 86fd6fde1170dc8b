use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tenure_application::{
    ChatPlatform, Clock, CommandRouter, ExpiryScanner, GrantAuditRepository,
    GrantLifecycleService, GrantRepository, RenewalTimer, RenewalWakeup, RoleMenuService,
    StatusProjector, SubjectWorkQueue,
};
use tenure_core::AppError;
use tenure_domain::LifecycleEngine;

use crate::bot_config::BotConfig;

const RENEWAL_RECHECK_INTERVAL: Duration = Duration::from_secs(300);

/// Adapters the services are wired against.
pub struct BotPorts {
    pub repository: Arc<dyn GrantRepository>,
    pub audit_repository: Arc<dyn GrantAuditRepository>,
    pub platform: Arc<dyn ChatPlatform>,
    pub clock: Arc<dyn Clock>,
}

/// Fully wired application services.
pub struct BotServices {
    pub command_router: CommandRouter,
    pub expiry_scanner: ExpiryScanner,
    pub renewal_timer: RenewalTimer,
    pub status_projector: StatusProjector,
    pub role_menu: RoleMenuService,
}

pub async fn connect_and_migrate(database_url: &str) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))?;

    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    Ok(pool)
}

pub fn build_services(config: &BotConfig, ports: BotPorts) -> Result<BotServices, AppError> {
    let engine = LifecycleEngine::new(config.grant_policy, config.role_catalog.clone());
    let work_queue = SubjectWorkQueue::new(config.work_queue_capacity)?;
    let status_projector = StatusProjector::new(
        ports.repository.clone(),
        ports.platform.clone(),
        config.stats_channel_id.clone(),
    );
    let renewal_wakeup = RenewalWakeup::default();

    let lifecycle = GrantLifecycleService::new(
        engine,
        ports.repository.clone(),
        ports.audit_repository,
        ports.platform.clone(),
        ports.clock.clone(),
        work_queue,
        config.notification_channel_id.clone(),
    )
    .with_status_projector(status_projector.clone())
    .with_renewal_wakeup(renewal_wakeup.clone());

    Ok(BotServices {
        command_router: CommandRouter::new(lifecycle.clone()),
        expiry_scanner: ExpiryScanner::new(
            lifecycle.clone(),
            ports.repository.clone(),
            ports.clock.clone(),
            config.scan_interval,
        ),
        renewal_timer: RenewalTimer::new(
            lifecycle,
            ports.repository,
            ports.clock,
            renewal_wakeup,
            RENEWAL_RECHECK_INTERVAL.min(config.scan_interval),
        ),
        status_projector,
        role_menu: RoleMenuService::new(
            ports.platform,
            config.role_channel_id.clone(),
            config.role_catalog.clone(),
        ),
    })
}
