use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// User Repository
// ============================================================================

pub struct UserRepository;

const USER_COLUMNS: &str =
    "id, name, email, email_verified, image, password_hash, created_at, updated_at";

impl UserRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Emails are stored lowercased, so lookups normalize the input the same way.
    pub async fn find_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE email = ?",
            USER_COLUMNS
        ))
        .bind(email.trim().to_lowercase())
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn create(pool: &SqlitePool, data: CreateUser) -> AppResult<User> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, name, email, email_verified, image, password_hash, created_at, updated_at)
            VALUES (?, ?, ?, 0, NULL, ?, ?, ?)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&id)
        .bind(data.name.trim())
        .bind(data.email.trim().to_lowercase())
        .bind(&data.password_hash)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::Conflict("User with this email already exists".to_string())
            }
            other => AppError::Database(other),
        })
    }

    pub async fn mark_email_verified(pool: &SqlitePool, email: &str) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            "UPDATE users SET email_verified = 1, updated_at = ? WHERE email = ?",
        )
        .bind(now)
        .bind(email.trim().to_lowercase())
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn update_password(
        pool: &SqlitePool,
        user_id: &str,
        password_hash: &str,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(now)
            .bind(user_id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    /// Page through users, newest first. `search` matches name or email (case-insensitive).
    pub async fn list_paginated(
        pool: &SqlitePool,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<User>> {
        match search.filter(|s| !s.is_empty()) {
            Some(term) => {
                let pattern = format!("%{}%", term);
                sqlx::query_as::<_, User>(&format!(
                    r#"
                    SELECT {} FROM users
                    WHERE name LIKE ? OR email LIKE ?
                    ORDER BY created_at DESC
                    LIMIT ? OFFSET ?
                    "#,
                    USER_COLUMNS
                ))
                .bind(&pattern)
                .bind(&pattern)
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await
                .map_err(AppError::Database)
            }
            None => sqlx::query_as::<_, User>(&format!(
                "SELECT {} FROM users ORDER BY created_at DESC LIMIT ? OFFSET ?",
                USER_COLUMNS
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database),
        }
    }

    pub async fn count(pool: &SqlitePool, search: Option<&str>) -> AppResult<i64> {
        let count: (i64,) = match search.filter(|s| !s.is_empty()) {
            Some(term) => {
                let pattern = format!("%{}%", term);
                sqlx::query_as("SELECT COUNT(*) FROM users WHERE name LIKE ? OR email LIKE ?")
                    .bind(&pattern)
                    .bind(&pattern)
                    .fetch_one(pool)
                    .await
                    .map_err(AppError::Database)?
            }
            None => sqlx::query_as("SELECT COUNT(*) FROM users")
                .fetch_one(pool)
                .await
                .map_err(AppError::Database)?,
        };
        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::init::test_pool;

    fn new_user(name: &str, email: &str) -> CreateUser {
        CreateUser {
            name: name.to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
        }
    }

    #[tokio::test]
    async fn create_normalizes_email_and_rejects_duplicates() {
        let pool = test_pool().await;

        let user = UserRepository::create(&pool, new_user("Ana", "  Ana@Example.com "))
            .await
            .unwrap();
        assert_eq!(user.email, "ana@example.com");
        assert!(!user.email_verified);

        let found = UserRepository::find_by_email(&pool, "ANA@example.com")
            .await
            .unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id));

        let dup = UserRepository::create(&pool, new_user("Other", "ana@example.com")).await;
        assert!(matches!(dup, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn list_and_count_honour_search() {
        let pool = test_pool().await;
        UserRepository::create(&pool, new_user("Ana", "ana@example.com")).await.unwrap();
        UserRepository::create(&pool, new_user("Bruno", "bruno@example.com")).await.unwrap();
        UserRepository::create(&pool, new_user("Carla", "carla@petcuts.com")).await.unwrap();

        assert_eq!(UserRepository::count(&pool, None).await.unwrap(), 3);
        assert_eq!(UserRepository::count(&pool, Some("example")).await.unwrap(), 2);

        let page = UserRepository::list_paginated(&pool, Some("carla"), 20, 0)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "Carla");

        let page = UserRepository::list_paginated(&pool, None, 2, 2).await.unwrap();
        assert_eq!(page.len(), 1);
    }
}
