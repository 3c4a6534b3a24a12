use async_trait::async_trait;
use log::trace;
use redis::AsyncCommands;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Scoped cache for derived display configuration. Keyed by `(scope, key)`
/// with a TTL; always passed as a dependency, never a hidden static.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, scope: &str, key: &str) -> Option<Value>;
    async fn put(&self, scope: &str, key: &str, value: Value, ttl: Duration);
    async fn invalidate_scope(&self, scope: &str);
}

fn cache_key(prefix: &str, scope: &str, key: &str) -> String {
    format!("{prefix}:{scope}:{key}")
}

pub struct RedisCache {
    client: Arc<redis::Client>,
    key_prefix: String,
}

impl RedisCache {
    pub fn new(client: Arc<redis::Client>, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, scope: &str, key: &str) -> Option<Value> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .ok()?;
        let raw: Option<String> = conn
            .get(cache_key(&self.key_prefix, scope, key))
            .await
            .ok()?;
        raw.and_then(|s| serde_json::from_str(&s).ok())
    }

    async fn put(&self, scope: &str, key: &str, value: Value, ttl: Duration) {
        let Ok(mut conn) = self.client.get_multiplexed_async_connection().await else {
            return;
        };
        let full_key = cache_key(&self.key_prefix, scope, key);
        let _: Result<(), _> = conn
            .set_ex(&full_key, value.to_string(), ttl.as_secs())
            .await;
        trace!("cached {full_key} for {}s", ttl.as_secs());
    }

    async fn invalidate_scope(&self, scope: &str) {
        let Ok(mut conn) = self.client.get_multiplexed_async_connection().await else {
            return;
        };
        let pattern = format!("{}:{}:*", self.key_prefix, scope);
        if let Ok(keys) = conn.keys::<_, Vec<String>>(pattern).await {
            for key in keys {
                let _: Result<(), _> = conn.del(&key).await;
            }
        }
    }
}

/// Process-local fallback used when no Redis is configured, and in tests.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (Value, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, scope: &str, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        let (value, expires_at) = entries.get(&cache_key("cache", scope, key))?;
        if Instant::now() >= *expires_at {
            return None;
        }
        Some(value.clone())
    }

    async fn put(&self, scope: &str, key: &str, value: Value, ttl: Duration) {
        self.entries.write().await.insert(
            cache_key("cache", scope, key),
            (value, Instant::now() + ttl),
        );
    }

    async fn invalidate_scope(&self, scope: &str) {
        let prefix = format!("cache:{scope}:");
        self.entries
            .write()
            .await
            .retain(|k, _| !k.starts_with(&prefix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_cache_round_trip_and_scope_invalidation() {
        let cache = MemoryCache::new();
        cache
            .put("agent-1", "display", json!({"title": "Desk"}), Duration::from_secs(60))
            .await;
        cache
            .put("agent-2", "display", json!({"title": "Other"}), Duration::from_secs(60))
            .await;

        assert_eq!(
            cache.get("agent-1", "display").await,
            Some(json!({"title": "Desk"}))
        );

        cache.invalidate_scope("agent-1").await;
        assert!(cache.get("agent-1", "display").await.is_none());
        assert!(cache.get("agent-2", "display").await.is_some());
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let cache = MemoryCache::new();
        cache
            .put("s", "k", json!(1), Duration::from_secs(0))
            .await;
        assert!(cache.get("s", "k").await.is_none());
    }
}
