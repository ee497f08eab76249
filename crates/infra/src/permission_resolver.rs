//! Effective-permission resolution with a read-through cache.
//!
//! ```text
//! access_profile(user) ── cache hit ──────────────────────────────▶ profile
//!        │
//!        └─ miss / cache error ─▶ credential store ─▶ compute ─▶ cache (best effort) ─▶ profile
//!
//! invalidate(user) ─▶ DEL perms:user:<id>  (errors swallowed)
//! ```
//!
//! A cached profile is served as-is until its TTL runs out. Every mutation
//! that changes a user's grants must call [`PermissionResolver::invalidate`]
//! for that user before it reports success.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use nexus_auth::AccessProfile;
use nexus_core::UserId;

use crate::cache::Cache;
use crate::credential_store::{CredentialStore, StoreError};

pub const PROFILE_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn CredentialStore>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn CredentialStore>, cache: Arc<dyn Cache>) -> Self {
        Self {
            store,
            cache,
            ttl: PROFILE_CACHE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn cache_key(user_id: UserId) -> String {
        format!("perms:user:{user_id}")
    }

    /// Roles and deduplicated permissions of `user_id`.
    ///
    /// Only credential-store failures surface; the cache is consulted and
    /// populated on a best-effort basis.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn access_profile(&self, user_id: UserId) -> Result<AccessProfile, StoreError> {
        if let Some(profile) = self.cached_profile(user_id).await {
            debug!("permission cache hit");
            return Ok(profile);
        }

        let profile = self.compute(user_id).await?;

        match serde_json::to_string(&profile) {
            Ok(json) => {
                if let Err(e) = self
                    .cache
                    .set_with_ttl(&Self::cache_key(user_id), &json, self.ttl)
                    .await
                {
                    debug!(error = %e, "permission cache write failed");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize access profile"),
        }

        Ok(profile)
    }

    /// Resolve straight from the credential store, ignoring the cache.
    pub async fn fresh_profile(&self, user_id: UserId) -> Result<AccessProfile, StoreError> {
        self.compute(user_id).await
    }

    /// The cached profile, if one is present and readable.
    pub async fn cached_profile(&self, user_id: UserId) -> Option<AccessProfile> {
        let raw = match self.cache.get(&Self::cache_key(user_id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                debug!(error = %e, "permission cache read failed, resolving from store");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(error = %e, "discarding unreadable cached access profile");
                None
            }
        }
    }

    /// Drop the cached profile. Idempotent; failures are logged and swallowed.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn invalidate(&self, user_id: UserId) {
        if let Err(e) = self.cache.delete(&Self::cache_key(user_id)).await {
            warn!(error = %e, "permission cache invalidation failed");
        }
    }

    pub async fn invalidate_all<I>(&self, user_ids: I)
    where
        I: IntoIterator<Item = UserId>,
    {
        for user_id in user_ids {
            self.invalidate(user_id).await;
        }
    }

    async fn compute(&self, user_id: UserId) -> Result<AccessProfile, StoreError> {
        let roles = self.store.roles_for_user(user_id).await?;
        let permissions = self.store.permissions_for_user(user_id).await?;
        Ok(AccessProfile::from_rows(
            roles.into_iter().map(|r| r.name),
            permissions,
        ))
    }
}

impl core::fmt::Debug for PermissionResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PermissionResolver")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
