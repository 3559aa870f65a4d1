/// Credential store implementation using runtime queries
use crate::{
    config::ServerConfig,
    db::models::Account,
    error::{OpsError, OpsResult},
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

/// Fields for a new account record. The password arrives in the clear
/// and is hashed here.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub username: String,
    pub password: String,
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub tenant_id: String,
}

/// Credential store service
pub struct AccountManager {
    db: SqlitePool,
    config: Arc<ServerConfig>,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>) -> Self {
        Self { db, config }
    }

    /// Find account by email
    pub async fn find_by_email(&self, email: &str) -> OpsResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, email, username, password_hash, full_name, phone_number,
                    enabled, locked, failed_logins, tenant_id, created_at
             FROM account WHERE email = ?1",
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .map_err(OpsError::Database)?;

        Ok(account)
    }

    /// Find account by username
    pub async fn find_by_username(&self, username: &str) -> OpsResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, email, username, password_hash, full_name, phone_number,
                    enabled, locked, failed_logins, tenant_id, created_at
             FROM account WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await
        .map_err(OpsError::Database)?;

        Ok(account)
    }

    /// Check whether either identifier is already taken
    pub async fn exists_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> OpsResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM account WHERE email = ?1 OR username = ?2",
        )
        .bind(email)
        .bind(username)
        .fetch_one(&self.db)
        .await
        .map_err(OpsError::Database)?;

        Ok(count > 0)
    }

    /// Insert a new account on the caller's connection. Registration runs
    /// tenant and account creation inside one transaction, so the
    /// connection is supplied rather than taken from the pool.
    pub async fn create_account(
        &self,
        conn: &mut SqliteConnection,
        new_account: NewAccount,
    ) -> OpsResult<Account> {
        let password_hash = self.hash_password(&new_account.password)?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO account (id, email, username, password_hash, full_name, phone_number,
                                  enabled, locked, failed_logins, tenant_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&id)
        .bind(&new_account.email)
        .bind(&new_account.username)
        .bind(&password_hash)
        .bind(&new_account.full_name)
        .bind(&new_account.phone_number)
        .bind(true)
        .bind(false)
        .bind(0i64)
        .bind(&new_account.tenant_id)
        .bind(now)
        .execute(conn)
        .await
        .map_err(|e| match &e {
            // A duplicate that raced past the pre-check still surfaces
            // as a registration conflict, not a server fault.
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                OpsError::DuplicateRegistration
            }
            _ => OpsError::Database(e),
        })?;

        Ok(Account {
            id,
            email: new_account.email,
            username: new_account.username,
            password_hash,
            full_name: new_account.full_name,
            phone_number: new_account.phone_number,
            enabled: true,
            locked: false,
            failed_logins: 0,
            tenant_id: new_account.tenant_id,
            created_at: now,
        })
    }

    /// Link a role to an account on the caller's connection
    pub async fn assign_role(
        &self,
        conn: &mut SqliteConnection,
        account_id: &str,
        role_id: &str,
    ) -> OpsResult<()> {
        sqlx::query("INSERT INTO account_role (account_id, role_id) VALUES (?1, ?2)")
            .bind(account_id)
            .bind(role_id)
            .execute(conn)
            .await
            .map_err(OpsError::Database)?;

        Ok(())
    }

    /// Hash a password with Argon2id
    pub fn hash_password(&self, password: &str) -> OpsResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| OpsError::Internal(format!("Password hashing failed: {}", e)))
    }

    /// Verify a password against a stored hash
    pub fn verify_password(&self, password: &str, password_hash: &str) -> OpsResult<bool> {
        let parsed = PasswordHash::new(password_hash)
            .map_err(|e| OpsError::Internal(format!("Stored password hash invalid: {}", e)))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    /// Record a failed login attempt. The account locks once the
    /// configured threshold is reached. The increment runs in SQL so
    /// concurrent failures on a stale in-memory row cannot lose counts.
    pub async fn record_login_failure(&self, account: &Account) -> OpsResult<()> {
        let (attempts, locked): (i64, bool) = sqlx::query_as(
            "UPDATE account
             SET failed_logins = failed_logins + 1,
                 locked = locked OR failed_logins + 1 >= ?1
             WHERE id = ?2
             RETURNING failed_logins, locked",
        )
        .bind(self.config.authentication.max_failed_logins)
        .bind(&account.id)
        .fetch_one(&self.db)
        .await
        .map_err(OpsError::Database)?;

        if locked && !account.locked {
            tracing::warn!(
                email = %account.email,
                attempts,
                "Account locked after repeated failed logins"
            );
        }

        Ok(())
    }

    /// Reset the failed-login counter after a successful login
    pub async fn reset_login_failures(&self, account: &Account) -> OpsResult<()> {
        if account.failed_logins == 0 {
            return Ok(());
        }

        sqlx::query("UPDATE account SET failed_logins = 0 WHERE id = ?1")
            .bind(&account.id)
            .execute(&self.db)
            .await
            .map_err(OpsError::Database)?;

        Ok(())
    }
}
