use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use tenure_core::AppError;
use tenure_domain::{GrantPolicy, RoleCatalog};
use tracing_subscriber::EnvFilter;

const DEFAULT_API_BASE_URL: &str = "https://discord.com/api/v10";

/// Validated runtime configuration of the bot.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub database_url: String,
    pub discord_bot_token: String,
    pub discord_public_key: String,
    pub discord_api_base_url: String,
    pub guild_id: String,
    pub role_channel_id: String,
    pub notification_channel_id: String,
    pub stats_channel_id: String,
    pub role_catalog: RoleCatalog,
    pub grant_policy: GrantPolicy,
    pub scan_interval: Duration,
    pub platform_max_attempts: u8,
    pub platform_retry_backoff_ms: u64,
    pub work_queue_capacity: usize,
    pub status_cleanup_on_shutdown: bool,
    pub bot_host: String,
    pub bot_port: u16,
}

impl BotConfig {
    pub fn load() -> Result<Self, AppError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let required = |name: &str| required_value(&lookup, name);

        let database_url = required("DATABASE_URL")?;
        let role_catalog = RoleCatalog::from_str(required("ROLE_CHOICES")?.as_str())
            .map_err(|error| AppError::Validation(format!("invalid ROLE_CHOICES: {error}")))?;
        let grant_policy = GrantPolicy::new(
            minutes_or(&lookup, "ROLE_DURATION_MINUTES", 65)?,
            minutes_or(&lookup, "RENEWAL_WINDOW_MINUTES", 10)?,
        )?;

        let scan_interval_seconds = parse_or(&lookup, "SCAN_INTERVAL_SECONDS", 3600_u64)?;
        if scan_interval_seconds == 0 {
            return Err(AppError::Validation(
                "SCAN_INTERVAL_SECONDS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            discord_bot_token: required("DISCORD_BOT_TOKEN")?,
            discord_public_key: required("DISCORD_PUBLIC_KEY")?,
            discord_api_base_url: lookup("DISCORD_API_BASE_URL")
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_owned()),
            guild_id: required("GUILD_ID")?,
            role_channel_id: required("ROLE_CHANNEL_ID")?,
            notification_channel_id: required("NOTIFICATION_CHANNEL_ID")?,
            stats_channel_id: required("STATS_CHANNEL_ID")?,
            role_catalog,
            grant_policy,
            scan_interval: Duration::from_secs(scan_interval_seconds),
            platform_max_attempts: parse_or(&lookup, "PLATFORM_MAX_ATTEMPTS", 3_u8)?,
            platform_retry_backoff_ms: parse_or(&lookup, "PLATFORM_RETRY_BACKOFF_MS", 250_u64)?,
            work_queue_capacity: parse_or(&lookup, "WORK_QUEUE_CAPACITY", 64_usize)?,
            status_cleanup_on_shutdown: lookup("STATUS_CLEANUP_ON_SHUTDOWN")
                .unwrap_or_else(|| "false".to_owned())
                .eq_ignore_ascii_case("true"),
            bot_host: lookup("BOT_HOST").unwrap_or_else(|| "127.0.0.1".to_owned()),
            bot_port: parse_or(&lookup, "BOT_PORT", 3002_u16)?,
        })
    }

    pub fn socket_address(&self) -> Result<SocketAddr, AppError> {
        let host = IpAddr::from_str(&self.bot_host).map_err(|error| {
            AppError::Internal(format!("invalid BOT_HOST '{}': {error}", self.bot_host))
        })?;
        Ok(SocketAddr::from((host, self.bot_port)))
    }
}

/// Returns whether the process was started as `tenure-bot migrate`.
pub fn migrate_only() -> bool {
    env::args().nth(1).as_deref() == Some("migrate")
}

pub fn required_env(name: &str) -> Result<String, AppError> {
    required_value(&|name: &str| env::var(name).ok(), name)
}

fn required_value(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String, AppError> {
    let value = lookup(name).ok_or_else(|| AppError::Validation(format!("{name} is required")))?;
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{name} must not be empty")));
    }

    Ok(value)
}

fn minutes_or(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: i64,
) -> Result<TimeDelta, AppError> {
    let minutes = parse_or(lookup, name, default)?;
    TimeDelta::try_minutes(minutes)
        .ok_or_else(|| AppError::Validation(format!("{name} is out of range: {minutes}")))
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name).filter(|value| !value.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|error| AppError::Validation(format!("invalid {name}: {error}"))),
        None => Ok(default),
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
