use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use nexus_auth::TenantMembership;
use nexus_core::{TenantId, UserId};

use super::TenantMembershipStore;
use crate::credential_store::StoreError;

#[derive(Debug, Default)]
pub struct InMemoryMembershipStore {
    inner: RwLock<HashMap<(TenantId, UserId), TenantMembership>>,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, membership: TenantMembership) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((membership.tenant_id, membership.user_id), membership);
        }
    }
}

#[async_trait]
impl TenantMembershipStore for InMemoryMembershipStore {
    async fn find_membership(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<TenantMembership>, StoreError> {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::Backend("membership lock poisoned".to_string()))?;
        Ok(map.get(&(tenant_id, user_id)).cloned())
    }
}
