//! Translation cache backends with TTL.
//!
//! Key: blake3 hash of (text | source language | sorted target languages | tone), hex
//! encoded. Expired entries read as misses; nothing is evicted before its TTL except by
//! the in-memory LRU capacity bound.

use super::ApiTranslation;
use crate::error::CacheError;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;

/// Compute the cache key for a translation request.
///
/// Target order does not matter; every other component does.
pub fn cache_key(
    text: &str,
    source_language: &str,
    target_languages: &[String],
    tone: Option<&str>,
) -> String {
    let mut targets: Vec<&str> = target_languages.iter().map(String::as_str).collect();
    targets.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    hasher.update(&(text.len() as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    hasher.update(b"|");
    hasher.update(source_language.as_bytes());
    hasher.update(b"|");
    hasher.update(targets.join(",").as_bytes());
    hasher.update(b"|");
    hasher.update(tone.unwrap_or("").as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[async_trait]
pub trait TranslationCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<ApiTranslation>, CacheError>;

    async fn set(&self, key: &str, value: &ApiTranslation, ttl: Duration) -> Result<(), CacheError>;
}

struct CacheEntry {
    value: ApiTranslation,
    expires_at: Instant,
}

/// Process-local LRU cache. Used when no Redis is configured and in tests.
pub struct MemoryCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[async_trait]
impl TranslationCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<ApiTranslation>, CacheError> {
        let mut cache = self.inner.lock();
        if let Some(entry) = cache.get(key) {
            if Instant::now() < entry.expires_at {
                return Ok(Some(entry.value.clone()));
            }
            // Expired
            cache.pop(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &ApiTranslation, ttl: Duration) -> Result<(), CacheError> {
        self.inner.lock().put(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

/// Redis-backed cache shared by all dispatcher replicas. Expiry is delegated to
/// Redis (`SET ... EX`).
#[derive(Clone)]
pub struct RedisCache {
    redis: ConnectionManager,
    key_prefix: String,
}

impl RedisCache {
    pub fn new(redis: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl TranslationCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<ApiTranslation>, CacheError> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(self.full_key(key)).await?;
        match raw {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &ApiTranslation, ttl: Duration) -> Result<(), CacheError> {
        let serialized = serde_json::to_string(value)?;
        let mut conn = self.redis.clone();
        redis::cmd("SET")
            .arg(self.full_key(key))
            .arg(serialized)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}
