/// Subscription gate implementation
use crate::{
    config::ServerConfig,
    db::models::{Plan, Subscription, SubscriptionStatus},
    error::{OpsError, OpsResult},
};
use chrono::{DateTime, Duration, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// A tenant's currently usable subscription, resolved by the gate:
/// the stored row plus its plan's name and feature codes.
#[derive(Debug, Clone)]
pub struct ActiveEntitlement {
    pub subscription: Subscription,
    pub plan_name: Option<String>,
    pub features: BTreeSet<String>,
}

impl ActiveEntitlement {
    /// Feature grant check: active access, plan present, feature listed
    pub fn grants_feature(&self, code: &str) -> bool {
        self.subscription.has_active_access(Utc::now())
            && self.plan_name.is_some()
            && self.features.contains(code)
    }
}

/// Subscription gate service
pub struct SubscriptionManager {
    db: SqlitePool,
    config: Arc<ServerConfig>,
}

impl SubscriptionManager {
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>) -> Self {
        Self { db, config }
    }

    /// Start a free trial for a newly provisioned tenant.
    ///
    /// Resolves the configured trial plan by name (its absence is a
    /// bootstrap/configuration error). If the tenant already has a live
    /// subscription, that one is returned and no new row is created.
    pub async fn start_trial(&self, tenant_id: &str) -> OpsResult<Subscription> {
        let plan = self
            .find_plan_by_name(&self.config.subscription.trial_plan_name)
            .await?
            .ok_or_else(|| {
                tracing::error!(
                    plan = %self.config.subscription.trial_plan_name,
                    "Trial plan missing; bootstrap provisioning did not run"
                );
                OpsError::ResourceCreation("Trial plan is not provisioned".to_string())
            })?;

        if let Some(existing) = self.latest_live_subscription(tenant_id).await? {
            tracing::warn!(
                tenant_id,
                status = existing.status.as_str(),
                "Tenant already has a live subscription; not starting a new trial"
            );
            return Ok(existing);
        }

        let now = Utc::now();
        let trial_days = plan.trial_days.unwrap_or(self.config.subscription.trial_days);
        let trial_end = now + Duration::days(trial_days);
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO subscription (id, tenant_id, plan_id, status, start_date, end_date, trial_end_date, created_at)
             VALUES (?1, ?2, ?3, ?4, NULL, NULL, ?5, ?6)",
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(&plan.id)
        .bind(SubscriptionStatus::Trial.as_str())
        .bind(trial_end)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(|e| {
            tracing::error!(tenant_id, error = %e, "Failed to persist trial subscription");
            OpsError::ResourceCreation("Could not start trial subscription".to_string())
        })?;

        tracing::info!(tenant_id, trial_end = %trial_end, "Trial subscription started");

        Ok(Subscription {
            id,
            tenant_id: tenant_id.to_string(),
            plan_id: Some(plan.id),
            status: SubscriptionStatus::Trial,
            start_date: None,
            end_date: None,
            trial_end_date: Some(trial_end),
            created_at: now,
        })
    }

    /// The tenant's current entitlement, if any.
    ///
    /// Finds the newest live-status row and re-validates it by date. A
    /// stale row (status still TRIAL/ACTIVE but past its dates) reports
    /// no access for this read without being mutated; `mark_expired`
    /// performs the actual transition so the hot read path never needs a
    /// write transaction.
    pub async fn current_active_subscription(
        &self,
        tenant_id: &str,
    ) -> OpsResult<Option<ActiveEntitlement>> {
        let Some(subscription) = self.latest_live_subscription(tenant_id).await? else {
            return Ok(None);
        };

        if !subscription.has_active_access(Utc::now()) {
            tracing::debug!(
                tenant_id,
                status = subscription.status.as_str(),
                "Live-status subscription found but dates have lapsed"
            );
            return Ok(None);
        }

        let (plan_name, features) = match &subscription.plan_id {
            Some(plan_id) => {
                let plan = self.find_plan_by_id(plan_id).await?;
                let features = match &plan {
                    Some(p) => self.plan_features(&p.id).await?,
                    None => BTreeSet::new(),
                };
                (plan.map(|p| p.display_name), features)
            }
            None => (None, BTreeSet::new()),
        };

        Ok(Some(ActiveEntitlement {
            subscription,
            plan_name,
            features,
        }))
    }

    /// Transition a lapsed TRIAL/ACTIVE row to EXPIRED.
    ///
    /// Terminal rows and rows whose dates have not lapsed are returned
    /// unchanged. This is the write half of the read/write split above,
    /// invoked on demand rather than by a scheduled sweep.
    pub async fn mark_expired(&self, subscription: Subscription) -> OpsResult<Subscription> {
        let now = Utc::now();

        let lapsed = match subscription.status {
            SubscriptionStatus::Trial => subscription
                .trial_end_date
                .map(|end| end < now)
                .unwrap_or(false),
            SubscriptionStatus::Active => {
                subscription.end_date.map(|end| end < now).unwrap_or(false)
            }
            _ => false,
        };

        if !lapsed {
            return Ok(subscription);
        }

        self.transition(subscription, SubscriptionStatus::Expired, now)
            .await
    }

    /// Administrative activation (trial upgrade or past-due recovery)
    pub async fn activate(
        &self,
        subscription: Subscription,
        end_date: Option<DateTime<Utc>>,
    ) -> OpsResult<Subscription> {
        let now = Utc::now();
        let mut updated = self
            .transition(subscription, SubscriptionStatus::Active, now)
            .await?;

        sqlx::query("UPDATE subscription SET start_date = ?1, end_date = ?2 WHERE id = ?3")
            .bind(now)
            .bind(end_date)
            .bind(&updated.id)
            .execute(&self.db)
            .await
            .map_err(OpsError::Database)?;

        updated.start_date = Some(now);
        updated.end_date = end_date;
        Ok(updated)
    }

    /// Administrative cancellation
    pub async fn cancel(&self, subscription: Subscription) -> OpsResult<Subscription> {
        self.transition(subscription, SubscriptionStatus::Cancelled, Utc::now())
            .await
    }

    /// Flag a payment failure on an active subscription
    pub async fn mark_past_due(&self, subscription: Subscription) -> OpsResult<Subscription> {
        self.transition(subscription, SubscriptionStatus::PastDue, Utc::now())
            .await
    }

    /// Apply a validated state-machine transition
    async fn transition(
        &self,
        mut subscription: Subscription,
        next: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> OpsResult<Subscription> {
        if !subscription.status.can_transition_to(next) {
            return Err(OpsError::Validation(format!(
                "Subscription cannot move from {} to {}",
                subscription.status.as_str(),
                next.as_str()
            )));
        }

        sqlx::query("UPDATE subscription SET status = ?1 WHERE id = ?2")
            .bind(next.as_str())
            .bind(&subscription.id)
            .execute(&self.db)
            .await
            .map_err(OpsError::Database)?;

        tracing::info!(
            subscription_id = %subscription.id,
            tenant_id = %subscription.tenant_id,
            from = subscription.status.as_str(),
            to = next.as_str(),
            at = %now,
            "Subscription status transition"
        );

        subscription.status = next;
        Ok(subscription)
    }

    /// Newest subscription row in a live status for the tenant
    async fn latest_live_subscription(&self, tenant_id: &str) -> OpsResult<Option<Subscription>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, plan_id, status, start_date, end_date, trial_end_date, created_at
             FROM subscription
             WHERE tenant_id = ?1 AND status IN ('TRIAL', 'ACTIVE', 'PAST_DUE')
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await
        .map_err(OpsError::Database)?;

        row.map(map_subscription).transpose()
    }

    /// Resolve a plan by its unique name (catalog lookup collaborator)
    pub async fn find_plan_by_name(&self, name: &str) -> OpsResult<Option<Plan>> {
        let plan = sqlx::query_as::<_, Plan>(
            "SELECT id, name, display_name, trial_days, status FROM plan WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.db)
        .await
        .map_err(OpsError::Database)?;

        Ok(plan)
    }

    async fn find_plan_by_id(&self, plan_id: &str) -> OpsResult<Option<Plan>> {
        let plan = sqlx::query_as::<_, Plan>(
            "SELECT id, name, display_name, trial_days, status FROM plan WHERE id = ?1",
        )
        .bind(plan_id)
        .fetch_optional(&self.db)
        .await
        .map_err(OpsError::Database)?;

        Ok(plan)
    }

    /// Feature codes granted by a plan
    pub async fn plan_features(&self, plan_id: &str) -> OpsResult<BTreeSet<String>> {
        let codes: Vec<String> =
            sqlx::query_scalar("SELECT feature_code FROM plan_feature WHERE plan_id = ?1")
                .bind(plan_id)
                .fetch_all(&self.db)
                .await
                .map_err(OpsError::Database)?;

        Ok(codes.into_iter().collect())
    }
}

/// Map a subscription row, rejecting unknown stored statuses
fn map_subscription(row: SqliteRow) -> OpsResult<Subscription> {
    let status_raw: String = row.try_get("status")?;
    let status = SubscriptionStatus::parse(&status_raw).ok_or_else(|| {
        OpsError::Internal(format!("Unknown subscription status in store: {}", status_raw))
    })?;

    Ok(Subscription {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        plan_id: row.try_get("plan_id")?,
        status,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        trial_end_date: row.try_get("trial_end_date")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AuthConfig, LoggingConfig, ServiceConfig, StorageConfig, SubscriptionConfig,
    };
    use sqlx::sqlite::SqlitePoolOptions;

    fn test_config() -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
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
        })
    }

    async fn test_manager() -> SubscriptionManager {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::run_migrations(&pool).await.unwrap();

        sqlx::query("INSERT INTO tenant (id, name, status, created_at) VALUES ('t1', 'Acme', 'ACTIVE', ?1)")
            .bind(Utc::now())
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO plan (id, name, display_name, trial_days, status)
             VALUES ('p1', 'FREE_TRIAL_PLAN', 'Free Trial', 14, 'ACTIVE')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO plan_feature (plan_id, feature_code) VALUES ('p1', 'CORE_DASHBOARD')")
            .execute(&pool)
            .await
            .unwrap();

        SubscriptionManager::new(pool, test_config())
    }

    #[tokio::test]
    async fn trial_starts_live_and_grants_plan_features() {
        let manager = test_manager().await;

        let subscription = manager.start_trial("t1").await.unwrap();
        assert_eq!(subscription.status, SubscriptionStatus::Trial);
        assert!(subscription.trial_end_date.unwrap() > Utc::now());

        let entitlement = manager
            .current_active_subscription("t1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entitlement.plan_name.as_deref(), Some("Free Trial"));
        assert!(entitlement.grants_feature("CORE_DASHBOARD"));
        assert!(!entitlement.grants_feature("PREMIUM_REPORTS"));
    }

    #[tokio::test]
    async fn second_trial_returns_the_existing_live_row() {
        let manager = test_manager().await;

        let first = manager.start_trial("t1").await.unwrap();
        let second = manager.start_trial("t1").await.unwrap();
        assert_eq!(second.id, first.id);

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscription")
            .fetch_one(&manager.db)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn trial_upgrades_then_cancels() {
        let manager = test_manager().await;

        let trial = manager.start_trial("t1").await.unwrap();
        let active = manager
            .activate(trial, Some(Utc::now() + Duration::days(30)))
            .await
            .unwrap();
        assert_eq!(active.status, SubscriptionStatus::Active);
        assert!(manager
            .current_active_subscription("t1")
            .await
            .unwrap()
            .is_some());

        let cancelled = manager.cancel(active).await.unwrap();
        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
        assert!(manager
            .current_active_subscription("t1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn terminal_states_reject_transitions() {
        let manager = test_manager().await;

        let trial = manager.start_trial("t1").await.unwrap();
        let cancelled = manager.cancel(trial).await.unwrap();

        let err = manager.activate(cancelled, None).await.unwrap_err();
        assert!(matches!(err, OpsError::Validation(_)));
    }

    #[tokio::test]
    async fn mark_expired_transitions_only_lapsed_rows() {
        let manager = test_manager().await;

        let trial = manager.start_trial("t1").await.unwrap();

        // Dates still in the future: no transition happens
        let unchanged = manager.mark_expired(trial).await.unwrap();
        assert_eq!(unchanged.status, SubscriptionStatus::Trial);

        sqlx::query("UPDATE subscription SET trial_end_date = ?1 WHERE id = ?2")
            .bind(Utc::now() - Duration::days(1))
            .bind(&unchanged.id)
            .execute(&manager.db)
            .await
            .unwrap();

        let lapsed = manager
            .latest_live_subscription("t1")
            .await
            .unwrap()
            .unwrap();
        let expired = manager.mark_expired(lapsed).await.unwrap();
        assert_eq!(expired.status, SubscriptionStatus::Expired);

        assert!(manager
            .current_active_subscription("t1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn past_due_suspends_access_until_recovery() {
        let manager = test_manager().await;

        let trial = manager.start_trial("t1").await.unwrap();
        let active = manager.activate(trial, None).await.unwrap();
        let past_due = manager.mark_past_due(active).await.unwrap();
        assert_eq!(past_due.status, SubscriptionStatus::PastDue);

        // The row stays live-status but grants no access while past due
        assert!(manager
            .current_active_subscription("t1")
            .await
            .unwrap()
            .is_none());

        let recovered = manager.activate(past_due, None).await.unwrap();
        assert_eq!(recovered.status, SubscriptionStatus::Active);
        assert!(manager
            .current_active_subscription("t1")
            .await
            .unwrap()
            .is_some());
    }
}
