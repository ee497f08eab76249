use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{Cache, CacheError};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local cache with TTLs, for tests and single-instance development.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    inner: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .map(|map| map.values().filter(|e| e.expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_map<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> Result<T, CacheError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| CacheError::Backend("cache lock poisoned".to_string()))?;
        let now = Instant::now();
        map.retain(|_, e| e.expires_at > now);
        Ok(f(&mut map))
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.with_map(|map| map.get(key).map(|e| e.value.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.with_map(|map| {
            map.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: Instant::now() + ttl,
                },
            );
        })
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.with_map(|map| {
            map.remove(key);
        })
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, CacheError> {
        self.with_map(|map| {
            let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
                value: "0".to_string(),
                expires_at: Instant::now() + ttl,
            });
            let next = entry.value.parse::<u64>().unwrap_or(0).saturating_add(1);
            entry.value = next.to_string();
            next
        })
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
