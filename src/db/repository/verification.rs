use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{Verification, VerificationPurpose};
use crate::error::{AppError, AppResult};

pub struct VerificationRepository;

impl VerificationRepository {
    pub async fn create(
        pool: &SqlitePool,
        identifier: &str,
        purpose: VerificationPurpose,
        token_hash: &str,
        expires_at: NaiveDateTime,
    ) -> AppResult<Verification> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, Verification>(
            r#"
            INSERT INTO verifications (id, identifier, purpose, token_hash, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, identifier, purpose, token_hash, expires_at, created_at
            "#,
        )
        .bind(&id)
        .bind(identifier.trim().to_lowercase())
        .bind(purpose.as_str())
        .bind(token_hash)
        .bind(expires_at)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Look up an unexpired token of the given purpose by its digest.
    pub async fn find_active(
        pool: &SqlitePool,
        token_hash: &str,
        purpose: VerificationPurpose,
    ) -> AppResult<Option<Verification>> {
        let now = Utc::now().naive_utc();
        sqlx::query_as::<_, Verification>(
            r#"
            SELECT id, identifier, purpose, token_hash, expires_at, created_at
            FROM verifications
            WHERE token_hash = ? AND purpose = ? AND expires_at > ?
            "#,
        )
        .bind(token_hash)
        .bind(purpose.as_str())
        .bind(now)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM verifications WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    pub async fn delete_for_identifier(
        pool: &SqlitePool,
        identifier: &str,
        purpose: VerificationPurpose,
    ) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM verifications WHERE identifier = ? AND purpose = ?")
            .bind(identifier.trim().to_lowercase())
            .bind(purpose.as_str())
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected())
    }

    pub async fn delete_expired(pool: &SqlitePool) -> AppResult<u64> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query("DELETE FROM verifications WHERE expires_at <= ?")
            .bind(now)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected())
    }
}
