//! Postgres-backed credential store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `InvalidReference` |
//! | Database (other) | any other | `Backend` |
//! | PoolClosed, network, decode | N/A | `Backend` |
//!
//! Multi-statement mutations run in one transaction; dropping the transaction
//! on an early `?` return rolls it back.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use nexus_auth::PermissionRecord;
use nexus_core::{PermissionId, RoleId, TenantId, UserId};

use super::{
    CredentialStore, NewRole, NewUser, RoleChange, RoleRecord, RoleUpdate, StoreError, StoreResult,
    UserRecord, UserUpdate,
};

const USER_COLUMNS: &str = "id, tenant_id, email, password_hash, first_name, last_name, is_active, \
                            last_login_at, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, tenant_id, name, description, created_at, updated_at";
const PERMISSION_COLUMNS: &str = "p.id, p.name, p.description, p.module, p.action, p.resource";

#[derive(Debug, Clone)]
pub struct PostgresCredentialStore {
    pool: Arc<PgPool>,
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn find_user(&self, user_id: UserId) -> StoreResult<Option<UserRecord>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self, email), err)]
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(email)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user_by_email", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_users(&self, tenant_id: Option<TenantId>) -> StoreResult<Vec<UserRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE ($1::uuid IS NULL OR tenant_id = $1) \
             ORDER BY created_at DESC"
        ))
        .bind(tenant_id.map(Uuid::from))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_users", e))?;
        rows.iter().map(user_from_row).collect()
    }

    #[instrument(skip(self, user), fields(tenant_id = %user.tenant_id), err)]
    async fn create_user(&self, user: NewUser, initial_role: Option<RoleId>) -> StoreResult<UserRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("create_user", e))?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (id, tenant_id, email, password_hash, first_name, last_name, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::from(UserId::new()))
        .bind(user.tenant_id.as_uuid())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create_user", e))?;
        let created = user_from_row(&row)?;

        if let Some(role_id) = initial_role {
            sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)")
                .bind(created.id.as_uuid())
                .bind(role_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("create_user.assign_role", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("create_user.commit", e))?;
        Ok(created)
    }

    #[instrument(skip(self, update), fields(user_id = %user_id), err)]
    async fn update_user(&self, user_id: UserId, update: UserUpdate) -> StoreResult<UserRecord> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE users
            SET first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                is_active = COALESCE($4, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id.as_uuid())
        .bind(update.first_name)
        .bind(update.last_name)
        .bind(update.is_active)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?
        .ok_or(StoreError::NotFound("user"))?;
        user_from_row(&row)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn delete_user(&self, user_id: UserId) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;

        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_user.user_roles", e))?;

        let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?
            .rows_affected();
        if deleted == 0 {
            return Err(StoreError::NotFound("user"));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("delete_user.commit", e))
    }

    async fn record_login(&self, user_id: UserId) -> StoreResult<()> {
        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(user_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_login", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn roles_for_user(&self, user_id: UserId) -> StoreResult<Vec<RoleRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.tenant_id, r.name, r.description, r.created_at, r.updated_at
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.name ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("roles_for_user", e))?;
        rows.iter().map(role_from_row).collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn permissions_for_user(&self, user_id: UserId) -> StoreResult<Vec<PermissionRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PERMISSION_COLUMNS}
            FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            JOIN user_roles ur ON ur.role_id = rp.role_id
            WHERE ur.user_id = $1
            ORDER BY p.module, p.action, p.resource
            "#
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("permissions_for_user", e))?;
        rows.iter().map(permission_from_row).collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id, role_id = %role_id), err)]
    async fn assign_role(&self, user_id: UserId, role_id: RoleId) -> StoreResult<()> {
        sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)")
            .bind(user_id.as_uuid())
            .bind(role_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| match map_sqlx_error("assign_role", e) {
                StoreError::Conflict(_) => StoreError::Conflict("User already has this role".to_string()),
                other => other,
            })?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id, role_id = %role_id), err)]
    async fn remove_role(&self, user_id: UserId, role_id: RoleId) -> StoreResult<()> {
        let removed = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id.as_uuid())
            .bind(role_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("remove_role", e))?
            .rows_affected();
        if removed == 0 {
            return Err(StoreError::NotFound("role assignment"));
        }
        Ok(())
    }

    async fn list_roles(&self, tenant_id: TenantId) -> StoreResult<Vec<RoleRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE tenant_id = $1 ORDER BY name ASC"
        ))
        .bind(tenant_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_roles", e))?;
        rows.iter().map(role_from_row).collect()
    }

    async fn find_role(&self, tenant_id: TenantId, role_id: RoleId) -> StoreResult<Option<RoleRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(role_id.as_uuid())
        .bind(tenant_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_role", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn find_role_by_name(&self, tenant_id: TenantId, name: &str) -> StoreResult<Option<RoleRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE tenant_id = $1 AND name = $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(name)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_role_by_name", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn role_permissions(&self, role_id: RoleId) -> StoreResult<Vec<PermissionRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PERMISSION_COLUMNS}
            FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            WHERE rp.role_id = $1
            ORDER BY p.module, p.action, p.resource
            "#
        ))
        .bind(role_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("role_permissions", e))?;
        rows.iter().map(permission_from_row).collect()
    }

    #[instrument(skip(self, role), fields(tenant_id = %role.tenant_id, name = %role.name), err)]
    async fn create_role(&self, role: NewRole) -> StoreResult<RoleRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("create_role", e))?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO roles (id, tenant_id, name, description)
            VALUES ($1, $2, $3, $4)
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(RoleId::new()))
        .bind(role.tenant_id.as_uuid())
        .bind(&role.name)
        .bind(&role.description)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match map_sqlx_error("create_role", e) {
            StoreError::Conflict(_) => StoreError::Conflict("Role with this name already exists".to_string()),
            other => other,
        })?;
        let created = role_from_row(&row)?;

        grant_permissions(&mut tx, created.id, &role.permission_ids).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("create_role.commit", e))?;
        Ok(created)
    }

    #[instrument(skip(self, update), fields(tenant_id = %tenant_id, role_id = %role_id), err)]
    async fn update_role(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
        update: RoleUpdate,
    ) -> StoreResult<RoleChange> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("update_role", e))?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE roles
            SET name = COALESCE($3, name),
                description = COALESCE($4, description),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(role_id.as_uuid())
        .bind(tenant_id.as_uuid())
        .bind(update.name)
        .bind(update.description)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| match map_sqlx_error("update_role", e) {
            StoreError::Conflict(_) => StoreError::Conflict("Role with this name already exists".to_string()),
            other => other,
        })?
        .ok_or(StoreError::NotFound("role"))?;
        let role = role_from_row(&row)?;

        if let Some(permission_ids) = update.permission_ids {
            sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
                .bind(role_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("update_role.clear_permissions", e))?;
            grant_permissions(&mut tx, role_id, &permission_ids).await?;
        }

        let holders: Vec<Uuid> = sqlx::query_scalar("SELECT user_id FROM user_roles WHERE role_id = $1")
            .bind(role_id.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_role.holders", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("update_role.commit", e))?;

        Ok(RoleChange {
            role,
            holders: holders.into_iter().map(UserId::from_uuid).collect(),
        })
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, role_id = %role_id), err)]
    async fn delete_role(&self, tenant_id: TenantId, role_id: RoleId) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;

        // Lock the role row so a concurrent assignment cannot slip in between
        // the holder count and the delete.
        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM roles WHERE id = $1 AND tenant_id = $2 FOR UPDATE")
                .bind(role_id.as_uuid())
                .bind(tenant_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("delete_role.lock", e))?;
        if exists.is_none() {
            return Err(StoreError::NotFound("role"));
        }

        let holders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_roles WHERE role_id = $1")
            .bind(role_id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role.count", e))?;
        if holders > 0 {
            return Err(StoreError::RoleInUse {
                holders: u64::try_from(holders).unwrap_or(u64::MAX),
            });
        }

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role.permissions", e))?;
        sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(role_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("delete_role.commit", e))
    }

    async fn list_permissions(&self) -> StoreResult<Vec<PermissionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions p ORDER BY p.module, p.action, p.resource"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_permissions", e))?;
        rows.iter().map(permission_from_row).collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }
}

async fn grant_permissions(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    role_id: RoleId,
    permission_ids: &[PermissionId],
) -> StoreResult<()> {
    for permission_id in permission_ids {
        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(role_id.as_uuid())
        .bind(permission_id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| match map_sqlx_error("grant_permissions", e) {
            StoreError::InvalidReference(_) => {
                StoreError::InvalidReference(format!("unknown permission {permission_id}"))
            }
            other => other,
        })?;
    }
    Ok(())
}

fn user_from_row(row: &PgRow) -> StoreResult<UserRecord> {
    let decode = |e| map_sqlx_error("decode user", e);
    Ok(UserRecord {
        id: UserId::from_uuid(row.try_get("id").map_err(decode)?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(decode)?),
        email: row.try_get("email").map_err(decode)?,
        password_hash: row.try_get("password_hash").map_err(decode)?,
        first_name: row.try_get("first_name").map_err(decode)?,
        last_name: row.try_get("last_name").map_err(decode)?,
        is_active: row.try_get("is_active").map_err(decode)?,
        last_login_at: row.try_get("last_login_at").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn role_from_row(row: &PgRow) -> StoreResult<RoleRecord> {
    let decode = |e| map_sqlx_error("decode role", e);
    Ok(RoleRecord {
        id: RoleId::from_uuid(row.try_get("id").map_err(decode)?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn permission_from_row(row: &PgRow) -> StoreResult<PermissionRecord> {
    let decode = |e| map_sqlx_error("decode permission", e);
    Ok(PermissionRecord {
        id: PermissionId::from_uuid(row.try_get("id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        module: row.try_get("module").map_err(decode)?,
        action: row.try_get("action").map_err(decode)?,
        resource: row.try_get("resource").map_err(decode)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::InvalidReference(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
