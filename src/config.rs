/// Configuration management for the Opsdesk back office
use crate::error::{OpsError, OpsResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub subscription: SubscriptionConfig,
    pub email: Option<EmailConfig>,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Symmetric signing key for access tokens. Process-wide, read-only
    /// after startup.
    pub jwt_secret: String,
    /// Access token lifetime in seconds
    pub access_token_ttl_secs: i64,
    /// Refresh token lifetime in seconds
    pub refresh_token_ttl_secs: i64,
    /// Failed login attempts before the account locks
    pub max_failed_logins: i64,
}

/// Subscription / entitlement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Plan name granted to newly registered tenants
    pub trial_plan_name: String,
    /// Trial length in days
    pub trial_days: i64,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> OpsResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("OPSDESK_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("OPSDESK_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| OpsError::Validation("Invalid port number".to_string()))?;
        let version = env::var("OPSDESK_VERSION").unwrap_or_else(|_| "0.1.0".to_string());

        let data_directory: PathBuf = env::var("OPSDESK_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("OPSDESK_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("opsdesk.sqlite"));

        let jwt_secret = env::var("OPSDESK_JWT_SECRET")
            .map_err(|_| OpsError::Validation("JWT secret required".to_string()))?;
        let access_token_ttl_secs = env::var("OPSDESK_ACCESS_TOKEN_TTL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .unwrap_or(3600);
        let refresh_token_ttl_secs = env::var("OPSDESK_REFRESH_TOKEN_TTL_SECS")
            .unwrap_or_else(|_| "604800".to_string())
            .parse()
            .unwrap_or(604_800);
        let max_failed_logins = env::var("OPSDESK_MAX_FAILED_LOGINS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);

        let trial_plan_name = env::var("OPSDESK_TRIAL_PLAN_NAME")
            .unwrap_or_else(|_| "FREE_TRIAL_PLAN".to_string());
        let trial_days = env::var("OPSDESK_TRIAL_DAYS")
            .unwrap_or_else(|_| "14".to_string())
            .parse()
            .unwrap_or(14);

        let email = if let Ok(smtp_url) = env::var("OPSDESK_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("OPSDESK_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| format!("noreply@{}", hostname)),
            })
        } else {
            None
        };

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                database,
            },
            authentication: AuthConfig {
                jwt_secret,
                access_token_ttl_secs,
                refresh_token_ttl_secs,
                max_failed_logins,
            },
            subscription: SubscriptionConfig {
                trial_plan_name,
                trial_days,
            },
            email,
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration. Signing-key misconfiguration is a fatal
    /// startup error, not a per-request one.
    pub fn validate(&self) -> OpsResult<()> {
        if self.service.hostname.is_empty() {
            return Err(OpsError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(OpsError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.authentication.access_token_ttl_secs <= 0
            || self.authentication.refresh_token_ttl_secs <= 0
        {
            return Err(OpsError::Validation(
                "Token TTLs must be positive".to_string(),
            ));
        }

        if self.subscription.trial_days <= 0 {
            return Err(OpsError::Validation(
                "Trial length must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
