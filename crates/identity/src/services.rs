//! Service handles shared by every identity handler.
//!
//! Everything is constructed by the process entry point (or a test) and
//! handed to the router; nothing here is a global.

use std::sync::Arc;
use std::time::Duration;

use nexus_api::ApiError;
use nexus_auth::{
    AccessProfile, IssuedToken, PasswordHasher, PrincipalId, TokenKind, TokenService, TokenSubject,
};
use nexus_core::UserId;
use nexus_infra::{Cache, CacheError, CredentialStore, Environment, PermissionResolver, UserRecord};

pub struct IdentityServices {
    pub store: Arc<dyn CredentialStore>,
    pub cache: Arc<dyn Cache>,
    pub resolver: PermissionResolver,
    pub tokens: Arc<TokenService>,
    pub hasher: PasswordHasher,
    pub environment: Environment,
}

impl IdentityServices {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn Cache>,
        tokens: Arc<TokenService>,
        hasher: PasswordHasher,
        profile_ttl: Duration,
        environment: Environment,
    ) -> Self {
        let resolver = PermissionResolver::new(store.clone(), cache.clone()).with_ttl(profile_ttl);
        Self {
            store,
            cache,
            resolver,
            tokens,
            hasher,
            environment,
        }
    }

    /// bcrypt on the blocking pool.
    pub async fn hash_password(&self, plain: String) -> Result<String, ApiError> {
        let hasher = self.hasher;
        tokio::task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .map_err(|e| ApiError::internal(format!("password hashing task failed: {e}")))?
            .map_err(|e| ApiError::internal(e.to_string()))
    }

    pub async fn verify_password(&self, plain: String, hash: String) -> bool {
        let hasher = self.hasher;
        tokio::task::spawn_blocking(move || hasher.verify(&plain, &hash))
            .await
            .unwrap_or(false)
    }

    /// Sign a user token embedding `profile`.
    pub fn issue_user_token(&self, user: &UserRecord, profile: &AccessProfile) -> Result<IssuedToken, ApiError> {
        let subject = TokenSubject {
            id: PrincipalId::User(user.id),
            tenant_id: Some(user.tenant_id),
            email: user.email.clone(),
            roles: profile.roles.clone(),
            permissions: profile.permission_strings.clone(),
        };
        Ok(self.tokens.issue(subject, TokenKind::User)?)
    }

    /// The stored user if it still exists and is active.
    pub async fn active_user(&self, user_id: UserId) -> Result<Option<UserRecord>, ApiError> {
        Ok(self
            .store
            .find_user(user_id)
            .await?
            .filter(|u| u.is_active))
    }

    /// `"up"`, `"down"` or `"disabled"` when no cache is configured.
    pub async fn cache_status(&self) -> &'static str {
        match self.cache.ping().await {
            Ok(()) => "up",
            Err(CacheError::Unavailable) => "disabled",
            Err(_) => "down",
        }
    }
}

impl core::fmt::Debug for IdentityServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdentityServices")
            .field("resolver", &self.resolver)
            .field("tokens", &self.tokens)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}
