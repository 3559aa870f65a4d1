/// Authentication extractor
///
/// Validates the bearer access token by signature and expiry, then
/// re-resolves the principal's account and authority from storage.
/// Authority is never trusted from token contents.
use crate::{
    api::middleware::extract_bearer_token,
    authority::AuthorityBundle,
    context::AppContext,
    db::models::Account,
    error::OpsError,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Authenticated request context
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub account: Account,
    pub authority: AuthorityBundle,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = OpsError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| OpsError::Authentication("Missing authorization header".to_string()))?;

        let claims = state.token_issuer.decode_access_token(&token)?;

        let account = state
            .account_manager
            .find_by_email(&claims.sub)
            .await?
            .ok_or_else(|| {
                tracing::warn!(email = %claims.sub, "Valid token for a missing account");
                OpsError::Authentication("Account no longer exists".to_string())
            })?;

        if account.locked {
            return Err(OpsError::AccountLocked);
        }
        if !account.enabled {
            return Err(OpsError::AccountDisabled);
        }

        let authority = state.authority_resolver.resolve(&account).await?;

        Ok(AuthContext { account, authority })
    }
}
