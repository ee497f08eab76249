use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

use nexus_auth::{Principal, Role};
use nexus_core::TenantId;
use nexus_infra::TenantMembershipStore;

use crate::context::TenantContext;
use crate::errors::ApiError;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Tenant-binding stage.
///
/// The signed tenant claim is trusted as the caller's home tenant. Any other
/// tenant, including one named in `X-Tenant-ID`, requires an active membership
/// record; without a membership store only the home tenant is reachable.
#[derive(Clone)]
pub struct TenantBinding {
    memberships: Option<Arc<dyn TenantMembershipStore>>,
}

impl TenantBinding {
    pub fn claim_only() -> Self {
        Self { memberships: None }
    }

    pub fn verified(store: Arc<dyn TenantMembershipStore>) -> Self {
        Self {
            memberships: Some(store),
        }
    }

    pub async fn resolve(&self, principal: &Principal, header: Option<&str>) -> Result<TenantContext, ApiError> {
        let requested = match header.map(str::trim).filter(|h| !h.is_empty()) {
            Some(raw) => raw
                .parse::<TenantId>()
                .map_err(|_| ApiError::validation("Invalid X-Tenant-ID header"))?,
            None => principal.tenant_id.ok_or(ApiError::TenantContextRequired)?,
        };

        if let (Some(store), Some(user_id)) = (&self.memberships, principal.id.user_id()) {
            let membership = store.find_membership(requested, user_id).await.map_err(|e| {
                ApiError::internal(format!("tenant membership lookup failed: {e}"))
            })?;
            if let Some(m) = membership.filter(|m| m.is_active()) {
                debug!(tenant_id = %requested, role = %m.role, "tenant bound via membership");
                return Ok(self.context(requested, principal, m.role));
            }
        }

        if principal.tenant_id == Some(requested) {
            return Ok(self.context(requested, principal, principal.home_role()));
        }

        warn!(
            tenant_id = %requested,
            principal = %principal.id,
            "tenant access denied: no membership"
        );
        Err(ApiError::TenantAccessDenied { tenant_id: requested })
    }

    fn context(&self, tenant_id: TenantId, principal: &Principal, role: Role) -> TenantContext {
        TenantContext::new(tenant_id, principal.id.clone(), role, principal.permissions.clone())
    }
}

/// Runs after [`authenticate`](super::authenticate); attaches a [`TenantContext`].
pub async fn bind_tenant(
    State(binding): State<TenantBinding>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = req
        .extensions()
        .get::<Principal>()
        .cloned()
        .ok_or(ApiError::AccessTokenRequired)?;
    let header = req
        .headers()
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let ctx = binding.resolve(&principal, header.as_deref()).await?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}
