/// Refresh token store
///
/// One opaque refresh token per account. `create` deletes the account's
/// prior tokens and inserts the new one inside a single transaction;
/// that delete-then-insert is the single-session enforcement point.
use crate::{
    config::ServerConfig,
    db::models::RefreshToken,
    error::{OpsError, OpsResult},
};
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Refresh token store service
pub struct RefreshTokenStore {
    db: SqlitePool,
    config: Arc<ServerConfig>,
}

impl RefreshTokenStore {
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>) -> Self {
        Self { db, config }
    }

    /// Create a fresh token for the account, replacing any prior ones.
    ///
    /// Delete and insert run in one transaction so no window exists in
    /// which two tokens are live for the same account under concurrent
    /// refresh calls.
    pub async fn create(&self, email: &str) -> OpsResult<RefreshToken> {
        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at =
            now + Duration::seconds(self.config.authentication.refresh_token_ttl_secs);

        let mut tx = self.db.begin().await.map_err(OpsError::Database)?;

        sqlx::query("DELETE FROM refresh_token WHERE email = ?1")
            .bind(email)
            .execute(&mut *tx)
            .await
            .map_err(OpsError::Database)?;

        sqlx::query(
            "INSERT INTO refresh_token (token, email, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&token)
        .bind(email)
        .bind(now)
        .bind(expires_at)
        .execute(&mut *tx)
        .await
        .map_err(OpsError::Database)?;

        tx.commit().await.map_err(OpsError::Database)?;

        tracing::debug!(email, expires_at = %expires_at, "Refresh token rotated");

        Ok(RefreshToken {
            token,
            email: email.to_string(),
            created_at: now,
            expires_at,
        })
    }

    /// Look up a token by its opaque value
    pub async fn find_by_token(&self, token: &str) -> OpsResult<Option<RefreshToken>> {
        let record = sqlx::query_as::<_, RefreshToken>(
            "SELECT token, email, created_at, expires_at FROM refresh_token WHERE token = ?1",
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await
        .map_err(OpsError::Database)?;

        Ok(record)
    }

    /// Fail with `TokenExpired` and delete the row if the token has aged
    /// out; otherwise return it unchanged.
    pub async fn verify_expiration(&self, token: RefreshToken) -> OpsResult<RefreshToken> {
        if token.expires_at < Utc::now() {
            tracing::warn!(email = %token.email, "Refresh token expired; deleting");
            self.delete_by_token(&token.token).await?;
            return Err(OpsError::TokenExpired);
        }

        Ok(token)
    }

    /// Delete a token by value. Returns whether a row was removed, so the
    /// orchestrator's compare-and-delete can detect a token consumed by a
    /// concurrent refresh. Deleting an absent token is not an error.
    pub async fn delete_by_token(&self, token: &str) -> OpsResult<bool> {
        let result = sqlx::query("DELETE FROM refresh_token WHERE token = ?1")
            .bind(token)
            .execute(&self.db)
            .await
            .map_err(OpsError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete all tokens held by an account
    pub async fn delete_by_email(&self, email: &str) -> OpsResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_token WHERE email = ?1")
            .bind(email)
            .execute(&self.db)
            .await
            .map_err(OpsError::Database)?;

        Ok(result.rows_affected())
    }
}
