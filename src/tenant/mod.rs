/// Tenant provisioning
///
/// The registration flow treats tenant creation as a collaborator with a
/// narrow interface: create a record, get back id and name. Tenant names
/// are not unique; every registration provisions a fresh tenant.
use crate::{
    db::models::{Tenant, TenantStatus},
    error::{OpsError, OpsResult},
};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Tenant provisioning service
pub struct TenantManager {
    db: SqlitePool,
}

impl TenantManager {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert a new active tenant on the caller's connection (the
    /// registration transaction spans tenant and account creation).
    pub async fn create_tenant(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
    ) -> OpsResult<Tenant> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query("INSERT INTO tenant (id, name, status, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&id)
            .bind(name)
            .bind(TenantStatus::Active.as_str())
            .bind(now)
            .execute(conn)
            .await
            .map_err(OpsError::Database)?;

        Ok(Tenant {
            id,
            name: name.to_string(),
            status: TenantStatus::Active.as_str().to_string(),
            created_at: now,
        })
    }

    /// Fetch a tenant by id. An account referencing a missing tenant is a
    /// data-integrity error surfaced by the caller.
    pub async fn find_by_id(&self, tenant_id: &str) -> OpsResult<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>(
            "SELECT id, name, status, created_at FROM tenant WHERE id = ?1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await
        .map_err(OpsError::Database)?;

        Ok(tenant)
    }
}
