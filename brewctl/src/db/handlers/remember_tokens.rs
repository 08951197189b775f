//! Postgres-backed token store.
//!
//! `consume` relies on a conditional `UPDATE ... RETURNING` so that the
//! database, not the process, arbitrates concurrent rotation attempts: the
//! row transitions revoked exactly once, and only the session that performed
//! that transition sees the subject id back.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{
        errors::Result,
        models::remember_tokens::RememberTokenRecord,
        token_store::{ConsumeOutcome, TokenStore},
    },
    types::{SubjectId, abbrev_uuid},
};

pub struct PostgresTokenStore {
    pool: PgPool,
}

impl PostgresTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PostgresTokenStore {
    #[instrument(skip(self, record), fields(token_id = %abbrev_uuid(&record.id)), err)]
    async fn put(&self, record: RememberTokenRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO remember_tokens (id, subject_id, expires_at, created_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(record.subject_id)
        .bind(record.expires_at)
        .bind(record.created_at)
        .bind(record.revoked_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&token_id)), err)]
    async fn lookup(&self, token_id: Uuid) -> Result<Option<RememberTokenRecord>> {
        let record = sqlx::query_as::<_, RememberTokenRecord>(
            "SELECT id, subject_id, expires_at, created_at, revoked_at FROM remember_tokens WHERE id = $1",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&token_id)), err)]
    async fn consume(&self, token_id: Uuid) -> Result<ConsumeOutcome> {
        // The WHERE clause is the compare in compare-and-revoke: only a live,
        // unexpired row can transition, and Postgres serializes the writers.
        let subject_id = sqlx::query_scalar::<_, SubjectId>(
            r#"
            UPDATE remember_tokens
            SET revoked_at = now()
            WHERE id = $1 AND revoked_at IS NULL AND expires_at > now()
            RETURNING subject_id
            "#,
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(subject_id) = subject_id {
            return Ok(ConsumeOutcome::Consumed { subject_id });
        }

        // Lost the race, or the token never existed / expired. Distinguish so
        // the bridge can log rotation races separately from cold misses.
        let revoked = sqlx::query_scalar::<_, Option<chrono::DateTime<chrono::Utc>>>(
            "SELECT revoked_at FROM remember_tokens WHERE id = $1",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;

        match revoked {
            Some(Some(_)) => Ok(ConsumeOutcome::AlreadyRevoked),
            _ => Ok(ConsumeOutcome::NotFound),
        }
    }

    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&token_id)), err)]
    async fn revoke(&self, token_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE remember_tokens SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(token_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(subject_id = %abbrev_uuid(&subject_id)), err)]
    async fn revoke_all_for_subject(&self, subject_id: SubjectId) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE remember_tokens SET revoked_at = now() WHERE subject_id = $1 AND revoked_at IS NULL",
        )
        .bind(subject_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM remember_tokens WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
