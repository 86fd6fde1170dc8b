//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod discord_rest_platform;
mod in_memory_grant_repository;
mod postgres_grant_audit_repository;
mod postgres_grant_repository;
mod system_clock;

pub use discord_rest_platform::DiscordRestPlatform;
pub use in_memory_grant_repository::{InMemoryGrantAuditRepository, InMemoryGrantRepository};
pub use postgres_grant_audit_repository::PostgresGrantAuditRepository;
pub use postgres_grant_repository::PostgresGrantRepository;
pub use system_clock::SystemClock;
