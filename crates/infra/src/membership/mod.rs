//! Tenant membership lookup (`tenant_users`).
//!
//! Used by the tenant-binding stage to decide whether a caller may act in a
//! tenant other than the one their token was issued for, and with which role.

mod in_memory;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use nexus_auth::TenantMembership;
use nexus_core::{TenantId, UserId};

use crate::credential_store::StoreError;

pub use in_memory::InMemoryMembershipStore;
pub use postgres::PostgresMembershipStore;

#[async_trait]
pub trait TenantMembershipStore: Send + Sync {
    /// Returns the membership regardless of status; callers check `is_active`.
    async fn find_membership(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<TenantMembership>, StoreError>;
}

#[async_trait]
impl<S> TenantMembershipStore for Arc<S>
where
    S: TenantMembershipStore + ?Sized,
{
    async fn find_membership(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<TenantMembership>, StoreError> {
        (**self).find_membership(tenant_id, user_id).await
    }
}
