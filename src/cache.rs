//! Small in-memory TTL cache and token-bucket rate limiter backing the
//! Modrinth client, so repeated searches/project lookups within a session
//! don't re-hit the network.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct CacheEntry {
    data: String,
    expires_at: Instant,
}

#[derive(Clone, Copy)]
pub enum CacheTtl {
    Medium, // 15 minutes — search, version listings
    Long,   // 1 hour — project/version by id, rarely changes within a session
}

impl CacheTtl {
    fn duration(self) -> Duration {
        match self {
            CacheTtl::Medium => Duration::from_secs(15 * 60),
            CacheTtl::Long => Duration::from_secs(60 * 60),
        }
    }
}

pub struct ApiCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    max_entries: usize,
}

impl ApiCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_entries,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        serde_json::from_str(&entry.data).ok()
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: CacheTtl) {
        let Ok(data) = serde_json::to_string(value) else {
            return;
        };
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries {
            let now = Instant::now();
            entries.retain(|_, e| e.expires_at > now);
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                expires_at: Instant::now() + ttl.duration(),
            },
        );
    }

    pub async fn get_or_fetch_throttled<T, F, Fut>(
        &self,
        key: &str,
        ttl: CacheTtl,
        limiter: &RateLimiter,
        fetch: F,
    ) -> beacon_core::Result<T>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = beacon_core::Result<T>>,
    {
        if let Some(cached) = self.get::<T>(key).await {
            return Ok(cached);
        }
        limiter.wait().await;
        let data = fetch().await?;
        self.set(key, &data, ttl).await;
        Ok(data)
    }
}

/// Token-bucket rate limiter so Modrinth's published rate limits are
/// respected regardless of how many concurrent commands are in flight.
pub struct RateLimiter {
    max_tokens: f64,
    refill_rate: f64,
    state: Arc<RwLock<(f64, Instant)>>,
}

impl RateLimiter {
    pub fn new(max_tokens: f64, requests_per_second: f64) -> Self {
        Self {
            max_tokens,
            refill_rate: requests_per_second,
            state: Arc::new(RwLock::new((max_tokens, Instant::now()))),
        }
    }

    async fn acquire(&self) -> Option<Duration> {
        let mut state = self.state.write().await;
        let (tokens, last_refill) = *state;
        let now = Instant::now();
        let elapsed = now.duration_since(last_refill).as_secs_f64();
        let refilled = (tokens + elapsed * self.refill_rate).min(self.max_tokens);

        if refilled >= 1.0 {
            *state = (refilled - 1.0, now);
            None
        } else {
            *state = (refilled, now);
            Some(Duration::from_secs_f64((1.0 - refilled) / self.refill_rate))
        }
    }

    pub async fn wait(&self) {
        while let Some(wait) = self.acquire().await {
            tokio::time::sleep(wait).await;
        }
    }
}

static MODRINTH_CACHE: std::sync::OnceLock<ApiCache> = std::sync::OnceLock::new();
static MODRINTH_LIMITER: std::sync::OnceLock<RateLimiter> = std::sync::OnceLock::new();

pub fn modrinth_cache() -> &'static ApiCache {
    MODRINTH_CACHE.get_or_init(|| ApiCache::new(500))
}

/// Modrinth publishes a 300 req/min limit; stay comfortably under it.
pub fn modrinth_limiter() -> &'static RateLimiter {
    MODRINTH_LIMITER.get_or_init(|| RateLimiter::new(10.0, 5.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_round_trips() {
        let cache = ApiCache::new(10);
        cache.set("k", &"v".to_string(), CacheTtl::Medium).await;
        let got: Option<String> = cache.get("k").await;
        assert_eq!(got, Some("v".to_string()));
    }

    #[tokio::test]
    async fn cache_miss_returns_none() {
        let cache = ApiCache::new(10);
        let got: Option<String> = cache.get("missing").await;
        assert_eq!(got, None);
    }
}
