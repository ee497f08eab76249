//! Fixed-window request budgets backed by the shared cache.
//!
//! Counters live in the cache (Redis in deployments) so every gateway
//! instance draws from the same budget. Increments are atomic; there is no
//! read-modify-write.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::cache::Cache;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RateLimitRule {
    pub window: Duration,
    pub max_requests: u64,
}

impl RateLimitRule {
    pub fn new(window: Duration, max_requests: u64) -> Self {
        Self {
            window,
            max_requests,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u64 },
    Limited { retry_after_secs: u64 },
}

#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn Cache>,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// Count one request from `client` against `rule` within `scope`.
    pub async fn check(&self, scope: &str, client: &str, rule: RateLimitRule) -> RateDecision {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.check_at(scope, client, rule, now).await
    }

    /// Like [`check`](Self::check) at a fixed clock; a failing cache lets the request through.
    pub async fn check_at(&self, scope: &str, client: &str, rule: RateLimitRule, now_secs: u64) -> RateDecision {
        let window_secs = rule.window.as_secs().max(1);
        let window_index = now_secs / window_secs;
        let key = format!("ratelimit:{scope}:{client}:{window_index}");

        match self.cache.increment(&key, Duration::from_secs(window_secs)).await {
            Ok(count) if count > rule.max_requests => RateDecision::Limited {
                retry_after_secs: ((window_index + 1) * window_secs).saturating_sub(now_secs).max(1),
            },
            Ok(count) => RateDecision::Allowed {
                remaining: rule.max_requests - count,
            },
            Err(e) => {
                warn!(error = %e, scope, "rate limit counter unavailable, allowing request");
                RateDecision::Allowed {
                    remaining: rule.max_requests,
                }
            }
        }
    }
}

impl core::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DisabledCache, InMemoryCache};

    #[tokio::test]
    async fn budget_is_per_client_and_window() {
        let limiter = RateLimiter::new(Arc::new(InMemoryCache::new()));
        let rule = RateLimitRule::new(Duration::from_secs(900), 2);
        let now = 9_000;

        assert_eq!(
            limiter.check_at("auth", "10.0.0.1", rule, now).await,
            RateDecision::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.check_at("auth", "10.0.0.1", rule, now + 1).await,
            RateDecision::Allowed { remaining: 0 }
        );
        assert_eq!(
            limiter.check_at("auth", "10.0.0.1", rule, now + 100).await,
            RateDecision::Limited { retry_after_secs: 800 }
        );
        assert!(matches!(
            limiter.check_at("auth", "10.0.0.2", rule, now + 100).await,
            RateDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_at("auth", "10.0.0.1", rule, now + 900).await,
            RateDecision::Allowed { .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_requests_never_exceed_budget() {
        let limiter = RateLimiter::new(Arc::new(InMemoryCache::new()));
        let rule = RateLimitRule::new(Duration::from_secs(60), 10);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.check_at("default", "burst", rule, 120).await
            }));
        }
        let mut allowed = 0;
        for h in handles {
            if matches!(h.await.unwrap(), RateDecision::Allowed { .. }) {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }

    #[tokio::test]
    async fn failing_counter_fails_open() {
        let limiter = RateLimiter::new(Arc::new(DisabledCache));
        let rule = RateLimitRule::new(Duration::from_secs(60), 0);
        assert!(matches!(
            limiter.check_at("default", "x", rule, 0).await,
            RateDecision::Allowed { .. }
        ));
    }
}
