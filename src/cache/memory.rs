//! In-process cache backend.

use super::{CacheError, CacheStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;

/// One stored value. Replaced as a whole on every `set`.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: JsonValue,
    pub expires_at: Option<DateTime<Utc>>,
    pub tags: HashSet<String>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, CacheEntry>,
    /// tag -> keys carrying it; mirrors `CacheEntry::tags`
    tags: HashMap<String, HashSet<String>>,
}

impl MemoryState {
    /// Remove `key` and unlink it from every tag it carried.
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        for tag in &entry.tags {
            if let Some(keys) = self.tags.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
        Some(entry)
    }

    /// Evict `key` if it has expired. Returns true when a live entry remains.
    fn check_live(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        match self.entries.get(key) {
            None => false,
            Some(entry) if entry.is_expired(now) => {
                self.remove(key);
                false
            }
            Some(_) => true,
        }
    }
}

/// Map-backed cache with a reverse tag index.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until they are touched.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of tags that still reference at least one key.
    pub async fn tag_count(&self) -> usize {
        self.state.read().await.tags.len()
    }

    /// Evict every expired entry now. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, CacheError> {
        let now = Utc::now();
        {
            let state = self.state.read().await;
            match state.entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        self.state.write().await.check_live(key, now);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: JsonValue,
        ttl: Option<Duration>,
        tags: &[String],
    ) -> Result<(), CacheError> {
        let expires_at = match ttl {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|e| CacheError::Backend(format!("TTL out of range: {e}")))?;
                Some(Utc::now() + ttl)
            }
            None => None,
        };
        let tags: HashSet<String> = tags.iter().cloned().collect();

        let mut state = self.state.write().await;
        state.remove(key);
        for tag in &tags {
            state
                .tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at,
                tags,
            },
        );
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.state.write().await.check_live(key, Utc::now()))
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.state.write().await.remove(key).is_some())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.tags.clear();
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<usize, CacheError> {
        let mut state = self.state.write().await;
        let Some(keys) = state.tags.remove(tag) else {
            return Ok(0);
        };
        let mut removed = 0;
        for key in &keys {
            if state.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
