use std::sync::Arc;
use std::time::Instant;

use nexus_api::middleware::TenantBinding;
use nexus_auth::TokenService;
use nexus_infra::{Cache, CacheError, Environment, InMemoryCache, RateLimiter};
use tracing::warn;

use crate::config::GatewayConfig;
use crate::proxy::{ProxyClient, ProxyError};

/// Everything the gateway's handlers and middleware share, built once in `main`.
pub struct GatewayServices {
    pub config: GatewayConfig,
    pub proxy: ProxyClient,
    /// Verifies caller tokens and signs the gateway's own debug tokens.
    pub tokens: Arc<TokenService>,
    pub limiter: RateLimiter,
    pub tenants: TenantBinding,
    cache: Arc<dyn Cache>,
    /// Counters live in this process only; budgets are per instance.
    local_cache: bool,
    started_at: Instant,
}

/// Counter store to use when Redis cannot be reached at startup.
///
/// Rate limits must be shared between instances, so outside development and
/// test the connection error is returned and the gateway refuses to start.
pub fn local_cache_fallback(environment: Environment, err: CacheError) -> Result<InMemoryCache, CacheError> {
    if !environment.allows_dev_defaults() {
        return Err(err);
    }
    warn!(error = %err, %environment, "redis unavailable; rate limits are per instance");
    Ok(InMemoryCache::new())
}

impl GatewayServices {
    pub fn new(config: GatewayConfig, cache: Arc<dyn Cache>, tenants: TenantBinding) -> Result<Self, ProxyError> {
        let proxy = ProxyClient::new(config.services.clone(), config.proxy_timeout)?;
        Ok(Self {
            tokens: Arc::new(TokenService::new(config.token.clone())),
            limiter: RateLimiter::new(cache.clone()),
            proxy,
            tenants,
            cache,
            config,
            local_cache: false,
            started_at: Instant::now(),
        })
    }

    /// Mark the cache as the in-process fallback from [`local_cache_fallback`].
    pub fn with_local_cache(mut self) -> Self {
        self.local_cache = true;
        self
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub async fn cache_status(&self) -> &'static str {
        if self.local_cache {
            return "local";
        }
        match self.cache.ping().await {
            Ok(()) => "up",
            Err(CacheError::Unavailable) => "disabled",
            Err(_) => "down",
        }
    }
}

impl core::fmt::Debug for GatewayServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GatewayServices")
            .field("config", &self.config)
            .field("proxy", &self.proxy)
            .field("limiter", &self.limiter)
            .field("local_cache", &self.local_cache)
            .finish_non_exhaustive()
    }
}
