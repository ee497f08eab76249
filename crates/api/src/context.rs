use serde::Serialize;
use uuid::Uuid;

use nexus_auth::{Permission, PrincipalId, Role};
use nexus_core::TenantId;

/// Tenant context for a request, produced by the tenant-binding stage.
///
/// Request-scoped and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    tenant_id: TenantId,
    user_id: PrincipalId,
    user_role: Role,
    permissions: Vec<Permission>,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId, user_id: PrincipalId, user_role: Role, permissions: Vec<Permission>) -> Self {
        Self {
            tenant_id,
            user_id,
            user_role,
            permissions,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn user_id(&self) -> &PrincipalId {
        &self.user_id
    }

    /// Role of the caller within this tenant.
    pub fn user_role(&self) -> &Role {
        &self.user_role
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }
}

/// Correlation id of the current request (`x-request-id`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequestId(pub Uuid);
