use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use tenure_application::GrantRepository;
use tenure_core::{AppError, AppResult};
use tenure_domain::{
    DeactivateGrant, DeactivationReason, Grant, GrantId, NewGrant, ReclaimGrant, RenewalState,
};


/// PostgreSQL-backed grant repository.
///
/// Every compare-and-set write is a single conditional `UPDATE`, so the
/// affected row count is the answer to "did this transition win".
#[derive(Clone)]
pub struct PostgresGrantRepository {
    pool: PgPool,
}

impl PostgresGrantRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct GrantRow {
    id: Uuid,
    subject_id: String,
    subject_display_name: String,
    role_id: String,
    role_name: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    active: bool,
    renewal_state: String,
    renewal_prompt_id: Option<String>,
    renewal_due_at: Option<DateTime<Utc>>,
    deactivation_reason: Option<String>,
}

impl TryFrom<GrantRow> for Grant {
    type Error = AppError;

    fn try_from(row: GrantRow) -> Result<Self, Self::Error> {
        let renewal_state = RenewalState::from_str(row.renewal_state.as_str()).map_err(|error| {
            AppError::Internal(format!(
                "failed to decode renewal state for grant '{}': {error}",
                row.id
            ))
        })?;
        let deactivation_reason = row
            .deactivation_reason
            .as_deref()
            .map(DeactivationReason::from_str)
            .transpose()
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to decode deactivation reason for grant '{}': {error}",
                    row.id
                ))
            })?;

        Ok(Self {
            id: GrantId::from_uuid(row.id),
            subject_id: row.subject_id,
            subject_display_name: row.subject_display_name,
            role_id: row.role_id,
            role_name: row.role_name,
            created_at: row.created_at,
            expires_at: row.expires_at,
            active: row.active,
            renewal_state,
            renewal_prompt_id: row.renewal_prompt_id,
            renewal_due_at: row.renewal_due_at,
            deactivation_reason,
        })
    }
}

fn decode_rows(rows: Vec<GrantRow>) -> AppResult<Vec<Grant>> {
    rows.into_iter().map(Grant::try_from).collect()
}

fn active_subject_conflict_or_internal(error: sqlx::Error, operation: &str) -> AppError {
    if let sqlx::Error::Database(ref database_error) = error
        && database_error.code().as_deref() == Some("23505")
    {
        return AppError::Conflict("subject already holds an active grant".to_owned());
    }

    AppError::Internal(format!("failed to {operation}: {error}"))
}

#[async_trait]
impl GrantRepository for PostgresGrantRepository {
    async fn insert_grant(&self, grant: NewGrant) -> AppResult<Grant> {
        let row = sqlx::query_as::<_, GrantRow>(
            r#"
            INSERT INTO role_grants (
                id,
                subject_id,
                subject_display_name,
                role_id,
                role_name,
                created_at,
                expires_at,
                active,
                renewal_state
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, 'pending')
            RETURNING
                id, subject_id, subject_display_name, role_id, role_name, created_at,
                expires_at, active, renewal_state, renewal_prompt_id, renewal_due_at,
                deactivation_reason
            "#,
        )
        .bind(GrantId::new().as_uuid())
        .bind(grant.subject_id)
        .bind(grant.subject_display_name)
        .bind(grant.role_id)
        .bind(grant.role_name)
        .bind(grant.created_at)
        .bind(grant.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| active_subject_conflict_or_internal(error, "insert role grant"))?;

        Grant::try_from(row)
    }

    async fn find_expired_pending(&self, now: DateTime<Utc>) -> AppResult<Vec<Grant>> {
        let rows = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT
                id, subject_id, subject_display_name, role_id, role_name, created_at,
                expires_at, active, renewal_state, renewal_prompt_id, renewal_due_at,
                deactivation_reason
            FROM role_grants
            WHERE active
              AND renewal_state = 'pending'
              AND expires_at <= $1
            ORDER BY expires_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list expired role grants: {error}"))
        })?;

        decode_rows(rows)
    }

    async fn find_by_id(&self, grant_id: GrantId) -> AppResult<Option<Grant>> {
        let row = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT
                id, subject_id, subject_display_name, role_id, role_name, created_at,
                expires_at, active, renewal_state, renewal_prompt_id, renewal_due_at,
                deactivation_reason
            FROM role_grants
            WHERE id = $1
            "#,
        )
        .bind(grant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to find role grant '{grant_id}': {error}"))
        })?;

        row.map(Grant::try_from).transpose()
    }

    async fn find_active_by_subject(&self, subject_id: &str) -> AppResult<Option<Grant>> {
        let row = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT
                id, subject_id, subject_display_name, role_id, role_name, created_at,
                expires_at, active, renewal_state, renewal_prompt_id, renewal_due_at,
                deactivation_reason
            FROM role_grants
            WHERE subject_id = $1
              AND active
            "#,
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to find active role grant: {error}"))
        })?;

        row.map(Grant::try_from).transpose()
    }

    async fn find_latest_by_subject(&self, subject_id: &str) -> AppResult<Option<Grant>> {
        let row = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT
                id, subject_id, subject_display_name, role_id, role_name, created_at,
                expires_at, active, renewal_state, renewal_prompt_id, renewal_due_at,
                deactivation_reason
            FROM role_grants
            WHERE subject_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to find latest role grant: {error}"))
        })?;

        row.map(Grant::try_from).transpose()
    }

    async fn update_renewal_state(
        &self,
        grant_id: GrantId,
        expected: RenewalState,
        next: RenewalState,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE role_grants
            SET renewal_state = $3,
                renewal_prompt_id = CASE WHEN $3 = 'awaiting_response' THEN renewal_prompt_id END,
                renewal_due_at = CASE WHEN $3 = 'awaiting_response' THEN renewal_due_at END,
                updated_at = now()
            WHERE id = $1
              AND active
              AND renewal_state = $2
            "#,
        )
        .bind(grant_id.as_uuid())
        .bind(expected.as_str())
        .bind(next.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to move role grant '{grant_id}' to '{}': {error}",
                next.as_str()
            ))
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_awaiting_response(
        &self,
        grant_id: GrantId,
        observed_at: DateTime<Utc>,
        renewal_due_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            WITH candidate AS (
                SELECT id
                FROM role_grants
                WHERE id = $1
                  AND active
                  AND renewal_state = 'pending'
                  AND expires_at <= $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE role_grants
            SET renewal_state = 'awaiting_response',
                renewal_prompt_id = NULL,
                renewal_due_at = $3,
                updated_at = now()
            FROM candidate
            WHERE role_grants.id = candidate.id
            "#,
        )
        .bind(grant_id.as_uuid())
        .bind(observed_at)
        .bind(renewal_due_at)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to claim role grant '{grant_id}' for renewal: {error}"
            ))
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn reclaim(&self, reclaim: ReclaimGrant) -> AppResult<Option<Grant>> {
        let row = sqlx::query_as::<_, GrantRow>(
            r#"
            UPDATE role_grants
            SET subject_display_name = $2,
                role_id = $3,
                role_name = $4,
                created_at = $5,
                expires_at = $6,
                active = TRUE,
                renewal_state = 'pending',
                renewal_prompt_id = NULL,
                renewal_due_at = NULL,
                deactivation_reason = NULL,
                updated_at = now()
            WHERE id = $1
              AND NOT active
            RETURNING
                id, subject_id, subject_display_name, role_id, role_name, created_at,
                expires_at, active, renewal_state, renewal_prompt_id, renewal_due_at,
                deactivation_reason
            "#,
        )
        .bind(reclaim.grant_id.as_uuid())
        .bind(reclaim.subject_display_name)
        .bind(reclaim.role_id)
        .bind(reclaim.role_name)
        .bind(reclaim.created_at)
        .bind(reclaim.expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| active_subject_conflict_or_internal(error, "reclaim role grant"))?;

        row.map(Grant::try_from).transpose()
    }

    async fn extend_and_reactivate(
        &self,
        grant_id: GrantId,
        expires_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE role_grants
            SET expires_at = $2,
                renewal_state = 'pending',
                renewal_prompt_id = NULL,
                renewal_due_at = NULL,
                updated_at = now()
            WHERE id = $1
              AND active
              AND renewal_state = 'awaiting_response'
            "#,
        )
        .bind(grant_id.as_uuid())
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to renew role grant '{grant_id}': {error}"))
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn deactivate(&self, request: DeactivateGrant) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE role_grants
            SET active = FALSE,
                renewal_state = $3,
                deactivation_reason = $4,
                renewal_prompt_id = NULL,
                renewal_due_at = NULL,
                updated_at = now()
            WHERE id = $1
              AND active
              AND ($2::TEXT IS NULL OR renewal_state = $2)
            "#,
        )
        .bind(request.grant_id.as_uuid())
        .bind(request.expected_state.map(|state| state.as_str()))
        .bind(request.final_state.as_str())
        .bind(request.reason.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to deactivate role grant '{}': {error}",
                request.grant_id
            ))
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_renewal_prompt(&self, grant_id: GrantId, prompt_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE role_grants
            SET renewal_prompt_id = $2,
                updated_at = now()
            WHERE id = $1
              AND active
              AND renewal_state = 'awaiting_response'
            "#,
        )
        .bind(grant_id.as_uuid())
        .bind(prompt_id)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to record renewal prompt for '{grant_id}': {error}"
            ))
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_renewal_prompt(&self, grant_id: GrantId) -> AppResult<Option<String>> {
        let prompt_id = sqlx::query_scalar::<_, Option<String>>(
            r#"
            SELECT renewal_prompt_id
            FROM role_grants
            WHERE id = $1
            "#,
        )
        .bind(grant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to load renewal prompt for '{grant_id}': {error}"
            ))
        })?;

        Ok(prompt_id.flatten())
    }

    async fn list_active(&self) -> AppResult<Vec<Grant>> {
        let rows = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT
                id, subject_id, subject_display_name, role_id, role_name, created_at,
                expires_at, active, renewal_state, renewal_prompt_id, renewal_due_at,
                deactivation_reason
            FROM role_grants
            WHERE active
            ORDER BY role_name ASC, subject_display_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list active role grants: {error}"))
        })?;

        decode_rows(rows)
    }

    async fn find_overdue_renewals(&self, now: DateTime<Utc>) -> AppResult<Vec<Grant>> {
        let rows = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT
                id, subject_id, subject_display_name, role_id, role_name, created_at,
                expires_at, active, renewal_state, renewal_prompt_id, renewal_due_at,
                deactivation_reason
            FROM role_grants
            WHERE active
              AND renewal_state = 'awaiting_response'
              AND renewal_prompt_id IS NOT NULL
              AND renewal_due_at <= $1
            ORDER BY renewal_due_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list overdue renewals: {error}"))
        })?;

        decode_rows(rows)
    }

    async fn next_renewal_deadline(&self) -> AppResult<Option<DateTime<Utc>>> {
        sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"
            SELECT min(renewal_due_at)
            FROM role_grants
            WHERE active
              AND renewal_state = 'awaiting_response'
              AND renewal_prompt_id IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to load next renewal deadline: {error}"))
        })
    }

    async fn find_unprompted_renewals(&self) -> AppResult<Vec<Grant>> {
        let rows = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT
                id, subject_id, subject_display_name, role_id, role_name, created_at,
                expires_at, active, renewal_state, renewal_prompt_id, renewal_due_at,
                deactivation_reason
            FROM role_grants
            WHERE active
              AND renewal_state = 'awaiting_response'
              AND renewal_prompt_id IS NULL
            ORDER BY renewal_due_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list unprompted renewals: {error}"))
        })?;

        decode_rows(rows)
    }
}
