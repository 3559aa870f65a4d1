/// Authority resolution
///
/// Computes an authenticated principal's effective authority: role names,
/// the deduplicated union of permission codes granted through those
/// roles, and the tenant's current subscription entitlement. Recomputed
/// on every authentication event; deliberately never cached, since
/// subscription state can change between logins. The staleness window of
/// any downstream consumer is therefore bounded by the access-token TTL.
use crate::{
    db::models::{Account, SubscriptionStatus},
    error::{OpsError, OpsResult},
    subscription::SubscriptionManager,
    tenant::TenantManager,
};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Immutable authority bundle for one principal, valid at resolution time
#[derive(Debug, Clone)]
pub struct AuthorityBundle {
    pub role_names: BTreeSet<String>,
    pub permission_codes: BTreeSet<String>,
    pub tenant_id: String,
    pub tenant_name: String,
    pub subscription_status: Option<SubscriptionStatus>,
    pub plan_name: Option<String>,
    pub features: BTreeSet<String>,
}

impl AuthorityBundle {
    pub fn has_role(&self, name: &str) -> bool {
        self.role_names.contains(name)
    }

    pub fn has_permission(&self, code: &str) -> bool {
        self.permission_codes.contains(code)
    }

    pub fn has_feature(&self, code: &str) -> bool {
        self.features.contains(code)
    }
}

/// Authority resolver service
pub struct AuthorityResolver {
    db: SqlitePool,
    tenants: Arc<TenantManager>,
    subscriptions: Arc<SubscriptionManager>,
}

impl AuthorityResolver {
    pub fn new(
        db: SqlitePool,
        tenants: Arc<TenantManager>,
        subscriptions: Arc<SubscriptionManager>,
    ) -> Self {
        Self {
            db,
            tenants,
            subscriptions,
        }
    }

    /// Resolve the account's effective authority from storage
    pub async fn resolve(&self, account: &Account) -> OpsResult<AuthorityBundle> {
        let (role_names, permission_codes) = self.load_authorities(&account.id).await?;

        if role_names.is_empty() {
            tracing::warn!(email = %account.email, "Account has no roles; it will hold no authority");
        }

        // An account without a tenant is an unrecoverable integrity error
        let tenant = self
            .tenants
            .find_by_id(&account.tenant_id)
            .await?
            .ok_or_else(|| {
                tracing::error!(
                    email = %account.email,
                    tenant_id = %account.tenant_id,
                    "Account references a missing tenant"
                );
                OpsError::Internal("Account is not linked to a tenant".to_string())
            })?;

        let entitlement = self
            .subscriptions
            .current_active_subscription(&tenant.id)
            .await?;

        let (subscription_status, plan_name, features) = match entitlement {
            Some(active) => (
                Some(active.subscription.status),
                active.plan_name,
                active.features,
            ),
            None => (None, None, BTreeSet::new()),
        };

        tracing::debug!(
            email = %account.email,
            roles = role_names.len(),
            permissions = permission_codes.len(),
            features = features.len(),
            "Resolved authority bundle"
        );

        Ok(AuthorityBundle {
            role_names,
            permission_codes,
            tenant_id: tenant.id,
            tenant_name: tenant.name,
            subscription_status,
            plan_name,
            features,
        })
    }

    /// Role names and the flattened, deduplicated permission codes
    async fn load_authorities(
        &self,
        account_id: &str,
    ) -> OpsResult<(BTreeSet<String>, BTreeSet<String>)> {
        let role_names: Vec<String> = sqlx::query_scalar(
            "SELECT r.name FROM role r
             JOIN account_role ar ON ar.role_id = r.id
             WHERE ar.account_id = ?1",
        )
        .bind(account_id)
        .fetch_all(&self.db)
        .await
        .map_err(OpsError::Database)?;

        let rows = sqlx::query(
            "SELECT DISTINCT p.code FROM permission p
             JOIN role_permission rp ON rp.permission_id = p.id
             JOIN account_role ar ON ar.role_id = rp.role_id
             WHERE ar.account_id = ?1",
        )
        .bind(account_id)
        .fetch_all(&self.db)
        .await
        .map_err(OpsError::Database)?;

        let permission_codes = rows
            .into_iter()
            .map(|row| row.try_get::<String, _>("code"))
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok((role_names.into_iter().collect(), permission_codes))
    }
}
