/// Application context and dependency injection
use crate::{
    account::AccountManager,
    auth::AuthService,
    authority::AuthorityResolver,
    config::ServerConfig,
    db,
    error::OpsResult,
    mailer::Mailer,
    rbac::RbacManager,
    subscription::SubscriptionManager,
    tenant::TenantManager,
    token::{refresh::RefreshTokenStore, TokenIssuer},
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub account_manager: Arc<AccountManager>,
    pub tenant_manager: Arc<TenantManager>,
    pub subscription_manager: Arc<SubscriptionManager>,
    pub authority_resolver: Arc<AuthorityResolver>,
    pub rbac_manager: Arc<RbacManager>,
    pub token_issuer: Arc<TokenIssuer>,
    pub refresh_token_store: Arc<RefreshTokenStore>,
    pub auth_service: Arc<AuthService>,
    pub mailer: Arc<Mailer>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> OpsResult<Self> {
        // Validate configuration; a bad signing key must fail startup
        config.validate()?;

        let pool = db::create_pool(&config.storage.database, db::DatabaseOptions::default())
            .await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        Self::with_pool(config, pool)
    }

    /// Assemble services over an existing pool (tests use an in-memory
    /// database through this path).
    pub fn with_pool(config: ServerConfig, pool: SqlitePool) -> OpsResult<Self> {
        let config = Arc::new(config);

        let account_manager = Arc::new(AccountManager::new(pool.clone(), Arc::clone(&config)));
        let tenant_manager = Arc::new(TenantManager::new(pool.clone()));
        let subscription_manager = Arc::new(SubscriptionManager::new(
            pool.clone(),
            Arc::clone(&config),
        ));
        let authority_resolver = Arc::new(AuthorityResolver::new(
            pool.clone(),
            Arc::clone(&tenant_manager),
            Arc::clone(&subscription_manager),
        ));
        let rbac_manager = Arc::new(RbacManager::new(pool.clone()));
        let token_issuer = Arc::new(TokenIssuer::new(Arc::clone(&config)));
        let refresh_token_store = Arc::new(RefreshTokenStore::new(
            pool.clone(),
            Arc::clone(&config),
        ));
        let mailer = Arc::new(Mailer::new(config.email.clone())?);

        let auth_service = Arc::new(AuthService::new(
            pool.clone(),
            Arc::clone(&account_manager),
            Arc::clone(&tenant_manager),
            Arc::clone(&subscription_manager),
            Arc::clone(&authority_resolver),
            Arc::clone(&rbac_manager),
            Arc::clone(&token_issuer),
            Arc::clone(&refresh_token_store),
            Arc::clone(&mailer),
        ));

        Ok(Self {
            config,
            db: pool,
            account_manager,
            tenant_manager,
            subscription_manager,
            authority_resolver,
            rbac_manager,
            token_issuer,
            refresh_token_store,
            auth_service,
            mailer,
        })
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
