//! Refresh token records.
//!
//! Each user has at most one record. Its id is embedded in the refresh
//! token as `token_id`, and deleting the record revokes the token. Access
//! tokens are never stored.
//!
//! Nothing here takes a lock: `create` is delete-then-insert and rotation
//! is read-then-write, so concurrent requests for the same user race and
//! the last write wins.

use sqlx::sqlite::SqlitePool;

/// A stored refresh token record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TokenRecord {
    pub id: String,
    pub user_id: String,
    /// Signed refresh token, NULL until the issuer writes it
    pub token: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Store for refresh token records.
pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace any record for `user_id` with a fresh, empty one.
    /// Returns the new record id.
    pub async fn create(&self, user_id: &str) -> Result<String, sqlx::Error> {
        sqlx::query("DELETE FROM tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO tokens (id, user_id) VALUES (?, ?)")
            .bind(&id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    /// Store the signed refresh token string on a record.
    /// Returns false when the record no longer exists.
    pub async fn set_token(&self, id: &str, token: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE tokens SET token = ?, updated_at = datetime('now') WHERE id = ?")
                .bind(token)
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Get the record belonging to a user.
    pub async fn find_by_user(&self, user_id: &str) -> Result<Option<TokenRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, user_id, token, created_at, updated_at FROM tokens WHERE user_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Get a record by id.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<TokenRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, user_id, token, created_at, updated_at FROM tokens WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Delete a record (revoke).
    pub async fn delete(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tokens WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of records held for a user.
    pub async fn count_by_user(&self, user_id: &str) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tokens WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Delete records not touched for `max_age_days`, and records whose token
    /// was never written (failed issuance) that are older than an hour.
    pub async fn delete_stale(&self, max_age_days: u32) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM tokens
             WHERE updated_at < datetime('now', ?)
                OR (token IS NULL AND created_at < datetime('now', '-1 hour'))",
        )
        .bind(format!("-{} days", max_age_days))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
