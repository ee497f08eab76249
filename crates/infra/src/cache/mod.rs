//! Key/value cache seam.
//!
//! Callers treat every [`CacheError`] as a miss: the cache is an optimization
//! and never the source of truth.

mod in_memory;
mod redis_cache;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use in_memory::InMemoryCache;
pub use redis_cache::RedisCache;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache is not configured")]
    Unavailable,
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Atomically increment a counter, returning the new value. The expiry is
    /// set by the increment that creates the key and never extended.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Cache used when no backend is reachable: every operation fails, so every
/// read falls through to the credential store.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCache;

#[async_trait]
impl Cache for DisabledCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable)
    }

    async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable)
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable)
    }

    async fn increment(&self, _key: &str, _ttl: Duration) -> Result<u64, CacheError> {
        Err(CacheError::Unavailable)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Err(CacheError::Unavailable)
    }
}
