use async_trait::async_trait;
use sqlx::PgPool;

use tenure_application::{GrantAuditEvent, GrantAuditRepository};
use tenure_core::{AppError, AppResult};

/// PostgreSQL-backed append-only grant audit repository.
#[derive(Clone)]
pub struct PostgresGrantAuditRepository {
    pool: PgPool,
}

impl PostgresGrantAuditRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GrantAuditRepository for PostgresGrantAuditRepository {
    async fn append_event(&self, event: GrantAuditEvent) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO grant_audit_events (
                grant_id,
                subject_id,
                action,
                detail
            )
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(event.grant_id.as_uuid())
        .bind(event.subject_id)
        .bind(event.action.as_str())
        .bind(event.detail)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to append grant audit event: {error}"))
        })?;

        Ok(())
    }
}
