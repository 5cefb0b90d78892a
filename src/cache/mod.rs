//! Query result cache with TTL and tag-based invalidation.
//!
//! Backends implement [`CacheStore`] and report failures as [`CacheError`].
//! Callers use the [`Cache`] facade, which never fails: a broken backend is
//! logged and behaves like an empty cache.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::error::DbError;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Failures reported by a cache backend.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cache value could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache backend error: {0}")]
    Backend(String),
}

impl From<::redis::RedisError> for CacheError {
    fn from(err: ::redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            CacheError::Unavailable(err.to_string())
        } else {
            CacheError::Backend(err.to_string())
        }
    }
}

impl From<CacheError> for DbError {
    fn from(err: CacheError) -> Self {
        DbError::cache(err.to_string())
    }
}

/// Backend contract. Values are JSON documents.
///
/// `ttl = None` stores the entry without expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, CacheError>;

    async fn set(
        &self,
        key: &str,
        value: JsonValue,
        ttl: Option<Duration>,
        tags: &[String],
    ) -> Result<(), CacheError>;

    async fn has(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove `key` and its tag memberships. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    /// Remove every key tagged with `tag`, then the tag itself.
    /// Returns the number of keys removed.
    async fn invalidate_tag(&self, tag: &str) -> Result<usize, CacheError>;

    fn backend_name(&self) -> &'static str;
}

/// Best-effort cache used by the query builder.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    default_ttl: Option<Duration>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            default_ttl: None,
        }
    }

    /// An in-process cache.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// TTL applied when a call passes none.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Store `value` under `key`. A zero TTL stores nothing.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        tags: &[String],
    ) -> bool {
        let ttl = ttl.or(self.default_ttl);
        if ttl.is_some_and(|t| t.is_zero()) {
            debug!(key = %key, "Zero TTL, not caching");
            return true;
        }
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode cache value");
                return false;
            }
        };
        match self.store.set(key, value, ttl, tags).await {
            Ok(()) => {
                debug!(key = %key, ttl = ?ttl, tags = ?tags, "Cache set");
                true
            }
            Err(e) => {
                self.degraded("set", key, &e);
                false
            }
        }
    }

    /// Fetch and decode `key`. Backend and decode failures count as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                self.degraded("get", key, &e);
                return None;
            }
        };
        let Some(raw) = raw else {
            debug!(key = %key, backend = self.store.backend_name(), "Cache miss");
            return None;
        };
        match serde_json::from_value(raw) {
            Ok(value) => {
                debug!(key = %key, backend = self.store.backend_name(), "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cached value has an unexpected shape, ignoring");
                None
            }
        }
    }

    pub async fn has(&self, key: &str) -> bool {
        self.store.has(key).await.unwrap_or_else(|e| {
            self.degraded("has", key, &e);
            false
        })
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.store.delete(key).await.unwrap_or_else(|e| {
            self.degraded("delete", key, &e);
            false
        })
    }

    pub async fn clear(&self) -> bool {
        match self.store.clear().await {
            Ok(()) => {
                info!(backend = self.store.backend_name(), "Cache cleared");
                true
            }
            Err(e) => {
                self.degraded("clear", "*", &e);
                false
            }
        }
    }

    /// Drop every entry tagged with `tag`.
    pub async fn invalidate_by_tag(&self, tag: &str) -> bool {
        match self.store.invalidate_tag(tag).await {
            Ok(removed) => {
                info!(tag = %tag, removed, backend = self.store.backend_name(), "Cache tag invalidated");
                true
            }
            Err(e) => {
                warn!(tag = %tag, error = %e, "Cache tag invalidation failed");
                false
            }
        }
    }

    /// Return the cached value for `key`, or run `producer` once, cache its
    /// result and return it. Producer errors are returned and nothing is cached.
    pub async fn remember<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        tags: &[String],
        producer: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            return Ok(hit);
        }
        let value = producer().await?;
        self.set(key, &value, ttl, tags).await;
        Ok(value)
    }

    fn degraded(&self, op: &'static str, key: &str, err: &CacheError) {
        warn!(
            op,
            key = %key,
            backend = self.store.backend_name(),
            error = %err,
            "Cache backend error, treating as miss"
        );
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.store.backend_name())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}
