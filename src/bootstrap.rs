/// Startup provisioning
///
/// Idempotent ensure-exists seeding keyed by unique name: the default
/// and admin roles, their baseline permissions, and the free-trial plan.
/// Invoked once from main; no handle to this data is retained afterward.
use crate::{context::AppContext, error::{OpsError, OpsResult}};
use uuid::Uuid;

/// Baseline permissions granted to the admin role
const ADMIN_PERMISSIONS: &[(&str, &str)] = &[
    ("MANAGE_ROLES", "Create, update, and delete roles"),
    ("MANAGE_PERMISSIONS", "Create, update, and delete permissions"),
    ("MANAGE_TENANTS", "Administer tenant records"),
    ("MANAGE_SUBSCRIPTIONS", "Administer tenant subscriptions"),
];

/// Feature codes on the default trial plan
const TRIAL_FEATURES: &[&str] = &["CORE_DASHBOARD", "API_ACCESS"];

/// Provision roles, permissions, and the trial plan
pub async fn provision(ctx: &AppContext) -> OpsResult<()> {
    tracing::info!("Running startup provisioning");

    let _user_role = ctx
        .rbac_manager
        .ensure_role("ROLE_USER", "Standard user role")
        .await?;

    let admin_role = ctx
        .rbac_manager
        .ensure_role("ROLE_ADMIN", "Administrator role")
        .await?;

    for (code, description) in ADMIN_PERMISSIONS {
        let permission = ctx.rbac_manager.ensure_permission(code, description).await?;
        ctx.rbac_manager
            .grant_permission(&admin_role.id, &permission.id)
            .await?;
    }

    ensure_trial_plan(ctx).await?;

    tracing::info!("Startup provisioning complete");
    Ok(())
}

/// Ensure the configured trial plan exists with its feature codes
async fn ensure_trial_plan(ctx: &AppContext) -> OpsResult<()> {
    let name = &ctx.config.subscription.trial_plan_name;

    let existing = ctx.subscription_manager.find_plan_by_name(name).await?;
    let plan_id = match existing {
        Some(plan) => plan.id,
        None => {
            tracing::info!(plan = %name, "Provisioning trial plan");
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO plan (id, name, display_name, trial_days, status)
                 VALUES (?1, ?2, ?3, ?4, 'ACTIVE')",
            )
            .bind(&id)
            .bind(name)
            .bind("Free Trial")
            .bind(ctx.config.subscription.trial_days)
            .execute(&ctx.db)
            .await
            .map_err(OpsError::Database)?;
            id
        }
    };

    for feature in TRIAL_FEATURES {
        sqlx::query(
            "INSERT OR IGNORE INTO plan_feature (plan_id, feature_code) VALUES (?1, ?2)",
        )
        .bind(&plan_id)
        .bind(feature)
        .execute(&ctx.db)
        .await
        .map_err(OpsError::Database)?;
    }

    Ok(())
}
