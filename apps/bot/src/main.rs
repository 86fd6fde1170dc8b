//! Tenure bot composition root.

#![forbid(unsafe_code)]

mod bot_config;
mod bot_router;
mod bot_services;
mod error;
mod interactions;
mod state;

use std::sync::Arc;
use std::time::Duration;

use tenure_core::AppError;
use tenure_infrastructure::{
    DiscordRestPlatform, PostgresGrantAuditRepository, PostgresGrantRepository, SystemClock,
};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::bot_config::{BotConfig, init_tracing, migrate_only, required_env};
use crate::bot_router::build_router;
use crate::bot_services::{BotPorts, build_services, connect_and_migrate};
use crate::interactions::InteractionVerifier;
use crate::state::BotState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    if migrate_only() {
        connect_and_migrate(required_env("DATABASE_URL")?.as_str()).await?;
        info!("database migrations applied successfully");
        return Ok(());
    }

    let config = BotConfig::load()?;
    let verifier = Arc::new(InteractionVerifier::from_hex(
        config.discord_public_key.as_str(),
    )?);
    let pool = connect_and_migrate(config.database_url.as_str()).await?;
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;

    let services = build_services(
        &config,
        BotPorts {
            repository: Arc::new(PostgresGrantRepository::new(pool.clone())),
            audit_repository: Arc::new(PostgresGrantAuditRepository::new(pool)),
            platform: Arc::new(DiscordRestPlatform::new(
                http_client,
                config.discord_api_base_url.clone(),
                config.discord_bot_token.clone(),
                config.guild_id.clone(),
                config.platform_max_attempts,
                config.platform_retry_backoff_ms,
            )),
            clock: Arc::new(SystemClock),
        },
    )?;

    let (shutdown_sender, shutdown_receiver) = watch::channel(false);
    let scanner = services.expiry_scanner.clone();
    let scanner_shutdown = shutdown_receiver.clone();
    let scanner_task = tokio::spawn(async move { scanner.run(scanner_shutdown).await });
    let renewal_timer = services.renewal_timer.clone();
    let renewal_task = tokio::spawn(async move { renewal_timer.run(shutdown_receiver).await });

    services.status_projector.signal().await;
    if let Err(error) = services.role_menu.publish().await {
        warn!(error = %error, "failed to publish role menu");
    }

    let app = build_router(BotState {
        command_router: services.command_router.clone(),
        verifier,
    });
    let address = config.socket_address()?;
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind listener: {error}")))?;

    info!(
        %address,
        guild_id = %config.guild_id,
        roles = config.role_catalog.choices().len(),
        scan_interval_seconds = config.scan_interval.as_secs(),
        "tenure-bot listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| AppError::Internal(format!("bot server error: {error}")))?;

    info!("stopping background tasks");
    if shutdown_sender.send(true).is_err() {
        warn!("background tasks already stopped");
    }
    for (name, task) in [("expiry scanner", scanner_task), ("renewal timer", renewal_task)] {
        if let Err(error) = task.await {
            warn!(task = name, error = %error, "background task ended abnormally");
        }
    }

    if let Err(error) = services.role_menu.withdraw().await {
        warn!(error = %error, "failed to withdraw role menu");
    }
    services.status_projector.wait_idle().await;
    if config.status_cleanup_on_shutdown
        && let Err(error) = services.status_projector.retract().await
    {
        warn!(error = %error, "failed to delete status message");
    }

    info!("tenure-bot stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(error = %error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(error = %error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}
