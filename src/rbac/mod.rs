/// Role and permission administration
///
/// Roles and permissions are shared, reference-counted resources: both
/// carry a referential delete guard, and the ensure-exists operations
/// back the idempotent bootstrap provisioning at startup.
use crate::{
    db::models::{Permission, Role},
    error::{OpsError, OpsResult},
};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Role/permission administration service
pub struct RbacManager {
    db: SqlitePool,
}

impl RbacManager {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Find a role by its unique name
    pub async fn find_role_by_name(&self, name: &str) -> OpsResult<Option<Role>> {
        let role =
            sqlx::query_as::<_, Role>("SELECT id, name, description FROM role WHERE name = ?1")
                .bind(name)
                .fetch_optional(&self.db)
                .await
                .map_err(OpsError::Database)?;

        Ok(role)
    }

    /// Find a permission by its unique code
    pub async fn find_permission_by_code(&self, code: &str) -> OpsResult<Option<Permission>> {
        let permission = sqlx::query_as::<_, Permission>(
            "SELECT id, code, description FROM permission WHERE code = ?1",
        )
        .bind(code)
        .fetch_optional(&self.db)
        .await
        .map_err(OpsError::Database)?;

        Ok(permission)
    }

    /// Create a role; the name must be unused
    pub async fn create_role(&self, name: &str, description: &str) -> OpsResult<Role> {
        let id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO role (id, name, description) VALUES (?1, ?2, ?3)")
            .bind(&id)
            .bind(name)
            .bind(description)
            .execute(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(name, error = %e, "Failed to create role");
                OpsError::ResourceCreation(format!("Could not create role {}", name))
            })?;

        Ok(Role {
            id,
            name: name.to_string(),
            description: Some(description.to_string()),
        })
    }

    /// Create a permission; the code must be unused
    pub async fn create_permission(&self, code: &str, description: &str) -> OpsResult<Permission> {
        let id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO permission (id, code, description) VALUES (?1, ?2, ?3)")
            .bind(&id)
            .bind(code)
            .bind(description)
            .execute(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(code, error = %e, "Failed to create permission");
                OpsError::ResourceCreation(format!("Could not create permission {}", code))
            })?;

        Ok(Permission {
            id,
            code: code.to_string(),
            description: Some(description.to_string()),
        })
    }

    /// Ensure-exists by unique name; returns the existing or created role
    pub async fn ensure_role(&self, name: &str, description: &str) -> OpsResult<Role> {
        if let Some(role) = self.find_role_by_name(name).await? {
            return Ok(role);
        }

        tracing::info!(name, "Provisioning role");
        self.create_role(name, description).await
    }

    /// Ensure-exists by unique code
    pub async fn ensure_permission(&self, code: &str, description: &str) -> OpsResult<Permission> {
        if let Some(permission) = self.find_permission_by_code(code).await? {
            return Ok(permission);
        }

        tracing::info!(code, "Provisioning permission");
        self.create_permission(code, description).await
    }

    /// Grant a permission to a role (idempotent)
    pub async fn grant_permission(&self, role_id: &str, permission_id: &str) -> OpsResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO role_permission (role_id, permission_id) VALUES (?1, ?2)",
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&self.db)
        .await
        .map_err(OpsError::Database)?;

        Ok(())
    }

    /// Delete a role. Fails with `ResourceInUse` while any account still
    /// holds it.
    pub async fn delete_role(&self, role_id: &str) -> OpsResult<()> {
        let assigned: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM account_role WHERE role_id = ?1")
                .bind(role_id)
                .fetch_one(&self.db)
                .await
                .map_err(OpsError::Database)?;

        if assigned > 0 {
            return Err(OpsError::ResourceInUse(format!(
                "Role is assigned to {} account(s)",
                assigned
            )));
        }

        let mut tx = self.db.begin().await.map_err(OpsError::Database)?;

        sqlx::query("DELETE FROM role_permission WHERE role_id = ?1")
            .bind(role_id)
            .execute(&mut *tx)
            .await
            .map_err(OpsError::Database)?;

        let result = sqlx::query("DELETE FROM role WHERE id = ?1")
            .bind(role_id)
            .execute(&mut *tx)
            .await
            .map_err(OpsError::Database)?;

        tx.commit().await.map_err(OpsError::Database)?;

        if result.rows_affected() == 0 {
            return Err(OpsError::NotFound("Role not found".to_string()));
        }

        Ok(())
    }

    /// Delete a permission. Fails with `ResourceInUse` while any role
    /// still grants it.
    pub async fn delete_permission(&self, permission_id: &str) -> OpsResult<()> {
        let granted: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM role_permission WHERE permission_id = ?1")
                .bind(permission_id)
                .fetch_one(&self.db)
                .await
                .map_err(OpsError::Database)?;

        if granted > 0 {
            return Err(OpsError::ResourceInUse(format!(
                "Permission is granted by {} role(s)",
                granted
            )));
        }

        let result = sqlx::query("DELETE FROM permission WHERE id = ?1")
            .bind(permission_id)
            .execute(&self.db)
            .await
            .map_err(OpsError::Database)?;

        if result.rows_affected() == 0 {
            return Err(OpsError::NotFound("Permission not found".to_string()));
        }

        Ok(())
    }
}
