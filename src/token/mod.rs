/// Token issuance and verification
///
/// Access tokens are short-lived HS256 JWTs carrying only identity
/// (subject = email, uid = account id) and timing claims. Validity is
/// checked purely by signature and expiry with no store lookup; fine
/// grained authority is re-resolved from storage per protected-resource
/// check rather than trusted from token contents.

pub mod refresh;

use crate::{
    config::ServerConfig,
    db::models::Account,
    error::{OpsError, OpsResult},
};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Access token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Account email
    pub sub: String,
    /// Account id
    pub uid: String,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly minted access token and its expiry
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Token issuer service
pub struct TokenIssuer {
    config: Arc<ServerConfig>,
}

impl TokenIssuer {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }

    /// Mint a signed access token for the account
    pub fn issue_access_token(&self, account: &Account) -> OpsResult<IssuedAccessToken> {
        let now = Utc::now().timestamp();
        let exp = now + self.config.authentication.access_token_ttl_secs;

        let claims = AccessClaims {
            sub: account.email.clone(),
            uid: account.id.clone(),
            iat: now,
            exp,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.authentication.jwt_secret.as_bytes()),
        )
        .map_err(|e| OpsError::Internal(format!("Failed to sign access token: {}", e)))?;

        let expires_at = Utc
            .timestamp_opt(exp, 0)
            .single()
            .ok_or_else(|| OpsError::Internal("Access token expiry out of range".to_string()))?;

        Ok(IssuedAccessToken { token, expires_at })
    }

    /// Verify signature and expiry, returning the embedded claims
    pub fn decode_access_token(&self, token: &str) -> OpsResult<AccessClaims> {
        let decoding_key =
            DecodingKey::from_secret(self.config.authentication.jwt_secret.as_bytes());
        let validation = Validation::new(Algorithm::HS256);

        decode::<AccessClaims>(token, &decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Access token verification failed: {}", e);
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        OpsError::Authentication("Access token has expired".to_string())
                    }
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        OpsError::Authentication("Invalid token signature".to_string())
                    }
                    _ => OpsError::Authentication(format!("Invalid access token: {}", e)),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AuthConfig, LoggingConfig, ServiceConfig, StorageConfig, SubscriptionConfig,
    };

    fn issuer_with_ttl(ttl: i64) -> TokenIssuer {
        TokenIssuer::new(Arc::new(ServerConfig {
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
                access_token_ttl_secs: ttl,
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
        }))
    }

    fn account() -> Account {
        Account {
            id: "acc-1".to_string(),
            email: "alice@example.com".to_string(),
            username: "alice".to_string(),
            password_hash: "unused".to_string(),
            full_name: Some("Alice".to_string()),
            phone_number: None,
            enabled: true,
            locked: false,
            failed_logins: 0,
            tenant_id: "tenant-1".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn issued_token_round_trips() {
        let issuer = issuer_with_ttl(3600);
        let issued = issuer.issue_access_token(&account()).unwrap();

        let claims = issuer.decode_access_token(&issued.token).unwrap();
        assert_eq!(claims.sub, "alice@example.com");
        assert_eq!(claims.uid, "acc-1");
        assert_eq!(claims.exp, issued.expires_at.timestamp());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let issuer = issuer_with_ttl(3600);
        let issued = issuer.issue_access_token(&account()).unwrap();

        let mut tampered = issued.token.clone();
        tampered.push('x');
        assert!(issuer.decode_access_token(&tampered).is_err());
    }

    #[test]
    fn token_from_other_key_is_rejected() {
        let issuer = issuer_with_ttl(3600);
        let other = TokenIssuer::new(Arc::new({
            let mut config = (*issuer_with_ttl(3600).config).clone();
            config.authentication.jwt_secret =
                "ffffffffffffffffffffffffffffffff".to_string();
            config
        }));

        let issued = other.issue_access_token(&account()).unwrap();
        assert!(issuer.decode_access_token(&issued.token).is_err());
    }
}
