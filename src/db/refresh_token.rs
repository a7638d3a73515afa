//! Refresh token storage, one row per (user, device).
//!
//! Only a hash of the signed refresh token is stored, so a database dump does
//! not yield usable sessions. Access tokens are stateless and never stored.

use sqlx::sqlite::SqlitePool;

use crate::password;

/// A stored refresh token.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: i64,
    /// Argon2 hash of the signed refresh token
    pub token: String,
    pub device_id: String,
    pub created_at: String,
    /// Unix seconds
    pub expires_at: i64,
    pub user_id: i64,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at < now as i64
    }

    /// Compare a presented raw token against the stored hash.
    pub fn matches(&self, raw_token: &str) -> Result<bool, password::PasswordError> {
        password::verify(raw_token, &self.token)
    }
}

/// Store for per-device refresh tokens.
pub struct RefreshTokenStore {
    pool: SqlitePool,
}

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Hash `raw_token` and insert it, replacing any existing token for the
    /// same (user, device) pair.
    pub async fn upsert(
        &self,
        user_id: i64,
        device_id: &str,
        raw_token: &str,
        expires_at: u64,
    ) -> Result<(), sqlx::Error> {
        let hashed = password::hash(raw_token).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query(
            "INSERT INTO refresh_tokens (token, device_id, expires_at, user_id) VALUES (?, ?, ?, ?)
             ON CONFLICT(device_id, user_id) DO UPDATE SET token = excluded.token, expires_at = excluded.expires_at",
        )
        .bind(&hashed)
        .bind(device_id)
        .bind(expires_at as i64)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get the token stored for a (user, device) pair.
    pub async fn find(
        &self,
        user_id: i64,
        device_id: &str,
    ) -> Result<Option<RefreshTokenRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, token, device_id, created_at, expires_at, user_id FROM refresh_tokens WHERE user_id = ? AND device_id = ?",
        )
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Delete the token for a (user, device) pair (revoke).
    pub async fn delete(&self, user_id: i64, device_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ? AND device_id = ?")
            .bind(user_id)
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List all refresh tokens for a user, newest first.
    pub async fn list_by_user(&self, user_id: i64) -> Result<Vec<RefreshTokenRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, token, device_id, created_at, expires_at, user_id FROM refresh_tokens WHERE user_id = ? ORDER BY id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Delete all tokens for a user (logout everywhere).
    pub async fn delete_all_by_user(&self, user_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete all tokens that expired before `now` (Unix seconds).
    pub async fn delete_expired(&self, now: u64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < ?")
            .bind(now as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
