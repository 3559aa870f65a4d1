/// Authentication orchestrator
use crate::{
    account::{AccountManager, NewAccount},
    auth::{AuthResponse, LoginRequest, RefreshRequest, RegisterRequest, UserAuthoritiesResponse},
    authority::AuthorityResolver,
    db::models::Account,
    error::{OpsError, OpsResult},
    mailer::Mailer,
    rbac::RbacManager,
    subscription::SubscriptionManager,
    tenant::TenantManager,
    token::{refresh::RefreshTokenStore, TokenIssuer},
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Name of the role granted to every newly registered account
pub const DEFAULT_ROLE: &str = "ROLE_USER";

/// Authentication orchestrator service
pub struct AuthService {
    db: SqlitePool,
    accounts: Arc<AccountManager>,
    tenants: Arc<TenantManager>,
    subscriptions: Arc<SubscriptionManager>,
    authority: Arc<AuthorityResolver>,
    rbac: Arc<RbacManager>,
    tokens: Arc<TokenIssuer>,
    refresh_tokens: Arc<RefreshTokenStore>,
    mailer: Arc<Mailer>,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: SqlitePool,
        accounts: Arc<AccountManager>,
        tenants: Arc<TenantManager>,
        subscriptions: Arc<SubscriptionManager>,
        authority: Arc<AuthorityResolver>,
        rbac: Arc<RbacManager>,
        tokens: Arc<TokenIssuer>,
        refresh_tokens: Arc<RefreshTokenStore>,
        mailer: Arc<Mailer>,
    ) -> Self {
        Self {
            db,
            accounts,
            tenants,
            subscriptions,
            authority,
            rbac,
            tokens,
            refresh_tokens,
            mailer,
        }
    }

    /// Register a new account and tenant, start a trial, issue tokens.
    ///
    /// Tenant, account, and role link are created in one transaction and
    /// roll back together. Trial creation afterwards is best-effort:
    /// failure is logged and registration still succeeds.
    pub async fn register(&self, request: RegisterRequest) -> OpsResult<AuthResponse> {
        tracing::info!(email = %request.email, tenant = %request.tenant_name, "Registration started");

        if self
            .accounts
            .exists_by_email_or_username(&request.email, &request.username)
            .await?
        {
            tracing::warn!(email = %request.email, "Registration rejected: identifier in use");
            return Err(OpsError::DuplicateRegistration);
        }

        // Default role missing means bootstrap provisioning did not run
        let default_role = self
            .rbac
            .find_role_by_name(DEFAULT_ROLE)
            .await?
            .ok_or_else(|| {
                tracing::error!(role = DEFAULT_ROLE, "Default role missing; cannot register");
                OpsError::Internal("Default user role is not provisioned".to_string())
            })?;

        let mut tx = self.db.begin().await.map_err(OpsError::Database)?;

        let tenant = self
            .tenants
            .create_tenant(&mut tx, &request.tenant_name)
            .await?;

        let account = self
            .accounts
            .create_account(
                &mut tx,
                NewAccount {
                    email: request.email.clone(),
                    username: request.username.clone(),
                    password: request.password.clone(),
                    full_name: request.full_name.clone(),
                    phone_number: request.phone_number.clone(),
                    tenant_id: tenant.id.clone(),
                },
            )
            .await?;

        self.accounts
            .assign_role(&mut tx, &account.id, &default_role.id)
            .await?;

        tx.commit().await.map_err(OpsError::Database)?;

        tracing::info!(
            email = %account.email,
            tenant_id = %tenant.id,
            "Account and tenant created"
        );

        // Soft-fail: a tenant without entitlement can still log in, it
        // just has no feature access until an operator intervenes.
        if let Err(e) = self.subscriptions.start_trial(&tenant.id).await {
            tracing::error!(
                tenant_id = %tenant.id,
                error = %e,
                "Trial subscription could not be started; registration continues"
            );
        }

        // Welcome mail is fire-and-forget relative to this transaction
        let mailer = Arc::clone(&self.mailer);
        let to = account.email.clone();
        let full_name = account.full_name.clone();
        let tenant_name = tenant.name.clone();
        tokio::spawn(async move {
            if let Err(e) = mailer
                .send_welcome_email(&to, full_name.as_deref(), &tenant_name)
                .await
            {
                tracing::warn!(email = %to, error = %e, "Welcome email failed");
            }
        });

        let response = self.issue_token_pair(&account).await?;
        tracing::info!(email = %account.email, "Registration completed");
        Ok(response)
    }

    /// Verify credentials and issue a token pair.
    ///
    /// Unknown account and wrong password produce the same error; lock
    /// and disable flags surface as their own kinds once the password is
    /// known good.
    pub async fn login(&self, request: LoginRequest) -> OpsResult<AuthResponse> {
        tracing::info!(email = %request.email, "Login attempt");

        let Some(account) = self.accounts.find_by_email(&request.email).await? else {
            tracing::warn!(email = %request.email, "Login failed: unknown account");
            return Err(OpsError::BadCredentials);
        };

        if !self
            .accounts
            .verify_password(&request.password, &account.password_hash)?
        {
            tracing::warn!(email = %request.email, "Login failed: wrong password");
            self.accounts.record_login_failure(&account).await?;
            return Err(OpsError::BadCredentials);
        }

        if account.locked {
            tracing::warn!(email = %request.email, "Login rejected: account locked");
            return Err(OpsError::AccountLocked);
        }

        if !account.enabled {
            tracing::warn!(email = %request.email, "Login rejected: account disabled");
            return Err(OpsError::AccountDisabled);
        }

        self.accounts.reset_login_failures(&account).await?;

        let response = self.issue_token_pair(&account).await?;
        tracing::info!(email = %account.email, "Login succeeded");
        Ok(response)
    }

    /// Rotate a refresh token: single use, delete before reissue.
    ///
    /// Two concurrent calls with the same token race on the
    /// compare-and-delete; exactly one wins and the other observes
    /// `TokenNotFound`.
    pub async fn refresh(&self, request: RefreshRequest) -> OpsResult<AuthResponse> {
        tracing::debug!("Refresh token request received");

        let token = self
            .refresh_tokens
            .find_by_token(&request.refresh_token)
            .await?
            .ok_or_else(|| {
                tracing::warn!("Refresh rejected: token not found");
                OpsError::TokenNotFound
            })?;

        let token = self.refresh_tokens.verify_expiration(token).await?;

        let account = self
            .accounts
            .find_by_email(&token.email)
            .await?
            .ok_or_else(|| {
                tracing::error!(email = %token.email, "Refresh token references a missing account");
                OpsError::Internal("Refresh token owner no longer exists".to_string())
            })?;

        // Compare-and-delete: zero rows means a concurrent refresh
        // already consumed this token.
        if !self
            .refresh_tokens
            .delete_by_token(&token.token)
            .await?
        {
            tracing::warn!(email = %token.email, "Refresh lost race: token already consumed");
            return Err(OpsError::TokenNotFound);
        }

        let response = self.issue_token_pair(&account).await?;
        tracing::info!(email = %account.email, "Refresh completed");
        Ok(response)
    }

    /// Delete the presented refresh token. Idempotent: logging out with
    /// an absent token is not an error. The access token is not
    /// invalidated server-side and expires by TTL.
    pub async fn logout(&self, refresh_token: &str) -> OpsResult<()> {
        let deleted = self.refresh_tokens.delete_by_token(refresh_token).await?;
        tracing::info!(deleted, "Logout processed");
        Ok(())
    }

    /// Authorities of the given principal, freshly resolved from storage
    pub async fn user_authorities(&self, account: &Account) -> OpsResult<UserAuthoritiesResponse> {
        let bundle = self.authority.resolve(account).await?;

        Ok(UserAuthoritiesResponse {
            user_id: account.id.clone(),
            email: account.email.clone(),
            full_name: account.full_name.clone(),
            roles: bundle.role_names.into_iter().collect(),
            permissions: bundle.permission_codes.into_iter().collect(),
        })
    }

    /// Resolve authority and mint the access/refresh pair. Resolution
    /// runs on every issuance so entitlement staleness stays bounded by
    /// the token lifetime.
    async fn issue_token_pair(&self, account: &Account) -> OpsResult<AuthResponse> {
        let bundle = self.authority.resolve(account).await?;
        tracing::debug!(
            email = %account.email,
            tenant = %bundle.tenant_name,
            plan = bundle.plan_name.as_deref().unwrap_or("none"),
            "Authority resolved for token issuance"
        );

        let access = self.tokens.issue_access_token(account)?;
        let refresh = self.refresh_tokens.create(&account.email).await?;

        Ok(AuthResponse {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_at: access.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bootstrap,
        config::{
            AuthConfig, LoggingConfig, ServerConfig, ServiceConfig, StorageConfig,
            SubscriptionConfig,
        },
        context::AppContext,
        db,
    };
    use chrono::{Duration, Utc};
    use sqlx::sqlite::SqlitePoolOptions;

    fn test_config() -> ServerConfig {
        ServerConfig {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 0,
                version: "test".to_string(),
            },
            storage: StorageConfig {
                data_directory: ".".into(),
                database: ":memory:".into(),
            },
            authentication: AuthConfig {
                jwt_secret: "0123456789abcdef0123456789abcdef".to_string(),
                access_token_ttl_secs: 3600,
                refresh_token_ttl_secs: 7200,
                max_failed_logins: 5,
            },
            subscription: SubscriptionConfig {
                trial_plan_name: "FREE_TRIAL_PLAN".to_string(),
                trial_days: 14,
            },
            email: None,
            logging: LoggingConfig {
                level: "debug".to_string(),
            },
        }
    }

    async fn test_context() -> AppContext {
        // Single connection so the whole test sees one in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();

        let ctx = AppContext::with_pool(test_config(), pool).unwrap();
        bootstrap::provision(&ctx).await.unwrap();
        ctx
    }

    /// File-backed context for tests that need true pool concurrency
    async fn test_context_on_disk(dir: &tempfile::TempDir) -> AppContext {
        let path = dir.path().join("opsdesk.sqlite");
        let pool = db::create_pool(&path, db::DatabaseOptions::default())
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();

        let ctx = AppContext::with_pool(test_config(), pool).unwrap();
        bootstrap::provision(&ctx).await.unwrap();
        ctx
    }

    fn register_request(email: &str, username: &str, tenant: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            username: username.to_string(),
            password: "correct-horse-battery".to_string(),
            full_name: Some("Alice Example".to_string()),
            phone_number: None,
            tenant_name: tenant.to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_issues_tokens_and_trial() {
        let ctx = test_context().await;

        let response = ctx
            .auth_service
            .register(register_request("alice@example.com", "alice", "Acme"))
            .await
            .unwrap();

        assert_eq!(response.token_type, "Bearer");
        assert!(!response.access_token.is_empty());
        assert!(!response.refresh_token.is_empty());
        assert!(response.expires_at > Utc::now());

        let account = ctx
            .account_manager
            .find_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();

        let entitlement = ctx
            .subscription_manager
            .current_active_subscription(&account.tenant_id)
            .await
            .unwrap()
            .expect("trial should be live right after registration");
        assert!(entitlement.grants_feature("CORE_DASHBOARD"));
        assert!(entitlement.grants_feature("API_ACCESS"));
        assert!(!entitlement.grants_feature("PREMIUM_REPORTS"));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let ctx = test_context().await;

        ctx.auth_service
            .register(register_request("bob@example.com", "bob", "Acme"))
            .await
            .unwrap();

        // Same email, different tenant name: still rejected, and no
        // second tenant row appears.
        let err = ctx
            .auth_service
            .register(register_request("bob@example.com", "bob2", "Globex"))
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::DuplicateRegistration));

        let err = ctx
            .auth_service
            .register(register_request("other@example.com", "bob", "Globex"))
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::DuplicateRegistration));

        let tenants: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tenant")
            .fetch_one(&ctx.db)
            .await
            .unwrap();
        assert_eq!(tenants, 1);
    }

    #[tokio::test]
    async fn test_registration_transaction_rolls_back_on_conflict() {
        let ctx = test_context().await;

        ctx.auth_service
            .register(register_request("kate@example.com", "kate", "Acme"))
            .await
            .unwrap();

        // The race where the uniqueness check passes but the account
        // insert then collides: the conflict surfaces as a duplicate
        // registration, and the tenant created in the same transaction
        // must roll back with it.
        let mut tx = ctx.db.begin().await.unwrap();
        let tenant = ctx
            .tenant_manager
            .create_tenant(&mut tx, "Globex")
            .await
            .unwrap();
        let err = ctx
            .account_manager
            .create_account(
                &mut tx,
                NewAccount {
                    email: "kate@example.com".to_string(),
                    username: "kate2".to_string(),
                    password: "correct-horse-battery".to_string(),
                    full_name: None,
                    phone_number: None,
                    tenant_id: tenant.id,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::DuplicateRegistration));
        drop(tx);

        let tenants: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tenant")
            .fetch_one(&ctx.db)
            .await
            .unwrap();
        assert_eq!(tenants, 1);
        let accounts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM account")
            .fetch_one(&ctx.db)
            .await
            .unwrap();
        assert_eq!(accounts, 1);
    }

    #[tokio::test]
    async fn test_unknown_account_and_wrong_password_look_alike() {
        let ctx = test_context().await;

        ctx.auth_service
            .register(register_request("carol@example.com", "carol", "Acme"))
            .await
            .unwrap();

        let wrong_password = ctx
            .auth_service
            .login(LoginRequest {
                email: "carol@example.com".to_string(),
                password: "not-the-password".to_string(),
            })
            .await
            .unwrap_err();

        let unknown_account = ctx
            .auth_service
            .login(LoginRequest {
                email: "nobody@example.com".to_string(),
                password: "whatever-password".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(wrong_password, OpsError::BadCredentials));
        assert!(matches!(unknown_account, OpsError::BadCredentials));
    }

    #[tokio::test]
    async fn test_account_locks_after_failed_logins() {
        let ctx = test_context().await;

        ctx.auth_service
            .register(register_request("dave@example.com", "dave", "Acme"))
            .await
            .unwrap();

        for _ in 0..5 {
            let err = ctx
                .auth_service
                .login(LoginRequest {
                    email: "dave@example.com".to_string(),
                    password: "bad-password-here".to_string(),
                })
                .await
                .unwrap_err();
            assert!(matches!(err, OpsError::BadCredentials));
        }

        // Correct password no longer helps once the lock has tripped
        let err = ctx
            .auth_service
            .login(LoginRequest {
                email: "dave@example.com".to_string(),
                password: "correct-horse-battery".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::AccountLocked));
    }

    #[tokio::test]
    async fn test_refresh_rotates_token_single_use() {
        let ctx = test_context().await;

        let initial = ctx
            .auth_service
            .register(register_request("erin@example.com", "erin", "Acme"))
            .await
            .unwrap();

        let rotated = ctx
            .auth_service
            .refresh(RefreshRequest {
                refresh_token: initial.refresh_token.clone(),
            })
            .await
            .unwrap();
        assert_ne!(rotated.refresh_token, initial.refresh_token);

        // The consumed value is gone; replaying it fails
        let err = ctx
            .auth_service
            .refresh(RefreshRequest {
                refresh_token: initial.refresh_token,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::TokenNotFound));

        // The rotated value still works
        ctx.auth_service
            .refresh(RefreshRequest {
                refresh_token: rotated.refresh_token,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context_on_disk(&dir).await;

        let initial = ctx
            .auth_service
            .register(register_request("leo@example.com", "leo", "Acme"))
            .await
            .unwrap();

        // Two simultaneous refreshes of one token: the compare-and-delete
        // lets exactly one through and the other observes absence.
        let (first, second) = tokio::join!(
            ctx.auth_service.refresh(RefreshRequest {
                refresh_token: initial.refresh_token.clone(),
            }),
            ctx.auth_service.refresh(RefreshRequest {
                refresh_token: initial.refresh_token.clone(),
            }),
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(OpsError::TokenNotFound))));

        let rows: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM refresh_token WHERE email = ?1")
                .bind("leo@example.com")
                .fetch_one(&ctx.db)
                .await
                .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_single_refresh_row_per_account() {
        let ctx = test_context().await;

        ctx.auth_service
            .register(register_request("frank@example.com", "frank", "Acme"))
            .await
            .unwrap();

        for _ in 0..3 {
            ctx.auth_service
                .login(LoginRequest {
                    email: "frank@example.com".to_string(),
                    password: "correct-horse-battery".to_string(),
                })
                .await
                .unwrap();
        }

        let rows: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM refresh_token WHERE email = ?1")
                .bind("frank@example.com")
                .fetch_one(&ctx.db)
                .await
                .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_expired_refresh_token_is_deleted_on_use() {
        let ctx = test_context().await;

        ctx.auth_service
            .register(register_request("grace@example.com", "grace", "Acme"))
            .await
            .unwrap();

        let stale = "11111111-2222-3333-4444-555555555555";
        sqlx::query(
            "INSERT INTO refresh_token (token, email, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(stale)
        .bind("grace@example.com")
        .bind(Utc::now() - Duration::hours(2))
        .bind(Utc::now() - Duration::hours(1))
        .execute(&ctx.db)
        .await
        .unwrap();

        let err = ctx
            .auth_service
            .refresh(RefreshRequest {
                refresh_token: stale.to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::TokenExpired));

        // The expired row was removed, so a retry reports absence
        let err = ctx
            .auth_service
            .refresh(RefreshRequest {
                refresh_token: stale.to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::TokenNotFound));
    }

    #[tokio::test]
    async fn test_stale_trial_grants_no_access() {
        let ctx = test_context().await;

        ctx.auth_service
            .register(register_request("heidi@example.com", "heidi", "Acme"))
            .await
            .unwrap();

        let account = ctx
            .account_manager
            .find_by_email("heidi@example.com")
            .await
            .unwrap()
            .unwrap();

        sqlx::query("UPDATE subscription SET trial_end_date = ?1 WHERE tenant_id = ?2")
            .bind(Utc::now() - Duration::days(1))
            .bind(&account.tenant_id)
            .execute(&ctx.db)
            .await
            .unwrap();

        let entitlement = ctx
            .subscription_manager
            .current_active_subscription(&account.tenant_id)
            .await
            .unwrap();
        assert!(entitlement.is_none());

        // The read did not mutate the row; expiry is a separate write
        let status: String =
            sqlx::query_scalar("SELECT status FROM subscription WHERE tenant_id = ?1")
                .bind(&account.tenant_id)
                .fetch_one(&ctx.db)
                .await
                .unwrap();
        assert_eq!(status, "TRIAL");

        // A lapsed subscription also means no feature grants via the
        // authority bundle.
        let bundle = ctx.authority_resolver.resolve(&account).await.unwrap();
        assert!(bundle.plan_name.is_none());
        assert!(!bundle.has_feature("CORE_DASHBOARD"));
        assert!(bundle.has_role("ROLE_USER"));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let ctx = test_context().await;

        let response = ctx
            .auth_service
            .register(register_request("ivan@example.com", "ivan", "Acme"))
            .await
            .unwrap();

        ctx.auth_service
            .logout(&response.refresh_token)
            .await
            .unwrap();
        // Second logout with the same (now absent) token still succeeds
        ctx.auth_service
            .logout(&response.refresh_token)
            .await
            .unwrap();

        let err = ctx
            .auth_service
            .refresh(RefreshRequest {
                refresh_token: response.refresh_token,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::TokenNotFound));
    }

    #[tokio::test]
    async fn test_authorities_flatten_across_roles() {
        let ctx = test_context().await;

        ctx.auth_service
            .register(register_request("judy@example.com", "judy", "Acme"))
            .await
            .unwrap();
        let account = ctx
            .account_manager
            .find_by_email("judy@example.com")
            .await
            .unwrap()
            .unwrap();

        // Two extra roles sharing one permission: the flattened set
        // must contain it once.
        let auditor = ctx
            .rbac_manager
            .create_role("ROLE_AUDITOR", "Read-only auditor")
            .await
            .unwrap();
        let reporter = ctx
            .rbac_manager
            .create_role("ROLE_REPORTER", "Report viewer")
            .await
            .unwrap();
        let view_reports = ctx
            .rbac_manager
            .create_permission("VIEW_REPORTS", "Read reporting data")
            .await
            .unwrap();
        ctx.rbac_manager
            .grant_permission(&auditor.id, &view_reports.id)
            .await
            .unwrap();
        ctx.rbac_manager
            .grant_permission(&reporter.id, &view_reports.id)
            .await
            .unwrap();

        let mut conn = ctx.db.acquire().await.unwrap();
        ctx.account_manager
            .assign_role(&mut conn, &account.id, &auditor.id)
            .await
            .unwrap();
        ctx.account_manager
            .assign_role(&mut conn, &account.id, &reporter.id)
            .await
            .unwrap();
        drop(conn);

        let authorities = ctx
            .auth_service
            .user_authorities(&account)
            .await
            .unwrap();
        assert_eq!(
            authorities.roles,
            vec![
                "ROLE_AUDITOR".to_string(),
                "ROLE_REPORTER".to_string(),
                "ROLE_USER".to_string()
            ]
        );
        assert_eq!(
            authorities
                .permissions
                .iter()
                .filter(|p| *p == "VIEW_REPORTS")
                .count(),
            1
        );
    }
}
