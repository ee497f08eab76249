use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use nexus_auth::{MembershipStatus, Role, TenantMembership};
use nexus_core::{TenantId, UserId};

use super::TenantMembershipStore;
use crate::credential_store::StoreError;

/// Reads `tenant_users` from the tenant service's database.
#[derive(Debug, Clone)]
pub struct PostgresMembershipStore {
    pool: Arc<PgPool>,
}

impl PostgresMembershipStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl TenantMembershipStore for PostgresMembershipStore {
    #[instrument(skip(self), fields(tenant_id = %tenant_id, user_id = %user_id), err)]
    async fn find_membership(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<TenantMembership>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, user_id, role, status
            FROM tenant_users
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| StoreError::Backend(format!("find_membership: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let decode = |e: sqlx::Error| StoreError::Backend(format!("decode membership: {e}"));
        let status: String = row.try_get("status").map_err(decode)?;
        let role: String = row.try_get("role").map_err(decode)?;
        Ok(Some(TenantMembership {
            tenant_id: TenantId::from_uuid(row.try_get::<Uuid, _>("tenant_id").map_err(decode)?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id").map_err(decode)?),
            role: Role::new(role),
            status: status
                .parse::<MembershipStatus>()
                .map_err(|e| StoreError::Backend(e.to_string()))?,
        }))
    }
}
