use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::StoredDocument;
use crate::error::{AppError, AppResult};

pub struct KvRepository;

impl KvRepository {
    pub async fn get(pool: &SqlitePool, key: &str) -> AppResult<Option<StoredDocument>> {
        sqlx::query_as::<_, StoredDocument>(
            "SELECT value, revision FROM kv_store WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Write `value` under `key` unless the stored revision is already at least `revision`.
    ///
    /// Returns `false` when the write was rejected as stale.
    pub async fn put_if_newer(
        pool: &SqlitePool,
        key: &str,
        value: &str,
        revision: i64,
    ) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, revision, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                revision = excluded.revision,
                updated_at = excluded.updated_at
            WHERE excluded.revision > kv_store.revision
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(revision)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::init::test_pool;

    #[tokio::test]
    async fn stale_revisions_are_rejected() {
        let pool = test_pool().await;

        assert!(KvRepository::put_if_newer(&pool, "k", "one", 1).await.unwrap());
        assert!(KvRepository::put_if_newer(&pool, "k", "three", 3).await.unwrap());
        assert!(!KvRepository::put_if_newer(&pool, "k", "two", 2).await.unwrap());
        assert!(!KvRepository::put_if_newer(&pool, "k", "three again", 3).await.unwrap());

        let doc = KvRepository::get(&pool, "k").await.unwrap().unwrap();
        assert_eq!(doc.value, "three");
        assert_eq!(doc.revision, 3);
        assert!(KvRepository::get(&pool, "missing").await.unwrap().is_none());
    }
}
