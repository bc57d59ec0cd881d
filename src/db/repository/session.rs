use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateSession, Session};
use crate::error::{AppError, AppResult};

pub struct SessionRepository;

impl SessionRepository {
    pub async fn create(
        pool: &SqlitePool,
        data: CreateSession,
        expires_at: NaiveDateTime,
    ) -> AppResult<Session> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (id, user_id, expires_at, ip_address, user_agent, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, user_id, expires_at, ip_address, user_agent, created_at
            "#,
        )
        .bind(&id)
        .bind(&data.user_id)
        .bind(expires_at)
        .bind(&data.ip_address)
        .bind(&data.user_agent)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Returns the session only while it has not expired.
    pub async fn find_active(pool: &SqlitePool, id: &str) -> AppResult<Option<Session>> {
        let now = Utc::now().naive_utc();
        sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, expires_at, ip_address, user_agent, created_at
            FROM sessions
            WHERE id = ? AND expires_at > ?
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    pub async fn delete_for_user(pool: &SqlitePool, user_id: &str) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected())
    }

    pub async fn delete_expired(pool: &SqlitePool) -> AppResult<u64> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected())
    }
}
