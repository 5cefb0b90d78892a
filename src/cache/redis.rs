//! Redis cache backend.
//!
//! Layout under the configured prefix:
//! - `{prefix}:data:{key}` holds the JSON value
//! - `{prefix}:tag:{tag}` is the set of keys carrying `tag`; it expires with
//!   its longest-lived member
//! - `{prefix}:keytags:{key}` is the set of tags on `key`, used to clean up
//!   tag sets on delete
//!
//! Multi-key writes run as MULTI/EXEC pipelines so they apply all or nothing.

use super::{CacheError, CacheStore};
use crate::config::RedisSettings;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, info};

const SCAN_BATCH: usize = 500;

/// Key layout under one prefix.
#[derive(Debug, Clone)]
struct KeySpace {
    prefix: String,
}

impl KeySpace {
    fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn data(&self, key: &str) -> String {
        format!("{}:data:{}", self.prefix, key)
    }

    fn tag(&self, tag: &str) -> String {
        format!("{}:tag:{}", self.prefix, tag)
    }

    fn key_tags(&self, key: &str) -> String {
        format!("{}:keytags:{}", self.prefix, key)
    }
}

/// Cache backend on a shared redis connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    keys: KeySpace,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            keys: KeySpace::new(prefix),
        }
    }

    /// Connect using the cache settings.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, CacheError> {
        let client = Client::open(settings.connection_url())?;
        let conn = ConnectionManager::new(client).await?;
        info!(
            host = %settings.host,
            port = settings.port,
            database = settings.database,
            prefix = %settings.prefix,
            "Connected to redis cache"
        );
        Ok(Self::new(conn, settings.prefix.clone()))
    }

    async fn tags_of(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(self.keys.key_tags(key)).await?)
    }

    /// Remove members of a tag set whose data key no longer exists.
    async fn prune_tag(&self, tag: &str) -> Result<usize, CacheError> {
        let mut conn = self.conn.clone();
        let tag_key = self.keys.tag(tag);
        let members: Vec<String> = conn.smembers(&tag_key).await?;
        if members.is_empty() {
            return Ok(0);
        }

        let mut lookup = redis::pipe();
        for member in &members {
            lookup.exists(self.keys.data(member));
        }
        let alive: Vec<bool> = lookup.query_async(&mut conn).await?;
        let stale: Vec<String> = members
            .into_iter()
            .zip(alive)
            .filter(|(_, alive)| !alive)
            .map(|(member, _)| member)
            .collect();
        if !stale.is_empty() {
            let _: () = conn.srem(&tag_key, stale.clone()).await?;
            debug!(tag = %tag, pruned = stale.len(), "Pruned expired keys from tag set");
        }
        Ok(stale.len())
    }
}

/// Whole seconds for `EX`, rounded up so sub-second TTLs still expire.
fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 { secs + 1 } else { secs.max(1) }
}

/// Reply of `TTL` for a key that does not exist.
const TTL_MISSING: i64 = -2;
/// Reply of `TTL` for a key without expiry.
const TTL_NONE: i64 = -1;

/// Expiry change for a tag set a key is joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagExpiry {
    Keep,
    Persist,
    Extend(u64),
}

/// A tag set lives as long as its longest-lived member. `current` is the
/// set's `TTL` reply before the write.
fn tag_expiry(current: i64, entry_secs: Option<u64>) -> TagExpiry {
    match entry_secs {
        None => TagExpiry::Persist,
        Some(secs) if current == TTL_MISSING => TagExpiry::Extend(secs),
        Some(secs) if current >= 0 && current.unsigned_abs() < secs => TagExpiry::Extend(secs),
        Some(_) => TagExpiry::Keep,
    }
}

fn expire_arg(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

/// The MULTI/EXEC pipeline storing `key`: value, tag memberships with their
/// expiry, and the key's own tag list. `tag_ttls` is parallel to `tags`.
fn entry_pipeline(
    keys: &KeySpace,
    key: &str,
    payload: String,
    entry_secs: Option<u64>,
    previous_tags: &[String],
    tags: &[String],
    tag_ttls: &[i64],
) -> redis::Pipeline {
    let data_key = keys.data(key);
    let key_tags_key = keys.key_tags(key);

    let mut pipe = redis::pipe();
    pipe.atomic();
    match entry_secs {
        Some(secs) => pipe.set_ex(&data_key, payload, secs).ignore(),
        None => pipe.set(&data_key, payload).ignore(),
    };
    for tag in previous_tags.iter().filter(|t| !tags.contains(*t)) {
        pipe.srem(keys.tag(tag), key).ignore();
    }
    pipe.del(&key_tags_key).ignore();
    for (i, tag) in tags.iter().enumerate() {
        let tag_key = keys.tag(tag);
        pipe.sadd(&tag_key, key).ignore();
        let current = tag_ttls.get(i).copied().unwrap_or(TTL_MISSING);
        match tag_expiry(current, entry_secs) {
            TagExpiry::Keep => {}
            TagExpiry::Persist => {
                pipe.persist(&tag_key).ignore();
            }
            TagExpiry::Extend(secs) => {
                pipe.expire(&tag_key, expire_arg(secs)).ignore();
            }
        }
    }
    if !tags.is_empty() {
        pipe.sadd(&key_tags_key, tags.to_vec()).ignore();
        if let Some(secs) = entry_secs {
            pipe.expire(&key_tags_key, expire_arg(secs)).ignore();
        }
    }
    pipe
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.keys.data(key)).await?;
        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(CacheError::from)
    }

    async fn set(
        &self,
        key: &str,
        value: JsonValue,
        ttl: Option<Duration>,
        tags: &[String],
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(&value)?;
        let previous_tags = self.tags_of(key).await?;
        let entry_secs = ttl.map(ttl_secs);
        let mut conn = self.conn.clone();

        let tag_ttls: Vec<i64> = if tags.is_empty() {
            Vec::new()
        } else {
            let mut lookup = redis::pipe();
            for tag in tags {
                lookup.ttl(self.keys.tag(tag));
            }
            lookup.query_async(&mut conn).await?
        };
        // Sets without expiry never drop expired members on their own.
        for (tag, current) in tags.iter().zip(&tag_ttls) {
            if *current == TTL_NONE {
                self.prune_tag(tag).await?;
            }
        }

        let pipe = entry_pipeline(
            &self.keys,
            key,
            payload,
            entry_secs,
            &previous_tags,
            tags,
            &tag_ttls,
        );
        let _: () = pipe.query_async(&mut conn).await?;
        debug!(key = %key, tags = tags.len(), "Stored cache entry in redis");
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(self.keys.data(key)).await?)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let tags = self.tags_of(key).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(self.keys.data(key));
        pipe.del(self.keys.key_tags(key)).ignore();
        for tag in &tags {
            pipe.srem(self.keys.tag(tag), key).ignore();
        }

        let mut conn = self.conn.clone();
        let (deleted,): (u64,) = pipe.query_async(&mut conn).await?;
        Ok(deleted > 0)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:*", self.keys.prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0usize;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                removed += keys.len();
                let _: () = conn.del(keys).await?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        debug!(prefix = %self.keys.prefix, removed, "Cleared redis cache");
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<usize, CacheError> {
        let mut conn = self.conn.clone();
        let tag_key = self.keys.tag(tag);
        let keys: Vec<String> = conn.smembers(&tag_key).await?;
        if keys.is_empty() {
            let _: () = conn.del(&tag_key).await?;
            return Ok(0);
        }

        // Other tags of the doomed keys still list them; collect those too.
        let mut lookup = redis::pipe();
        for key in &keys {
            lookup.smembers(self.keys.key_tags(key));
        }
        let other_tags: Vec<Vec<String>> = lookup.query_async(&mut conn).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, key_tags) in keys.iter().zip(&other_tags) {
            pipe.del(self.keys.data(key)).ignore();
            pipe.del(self.keys.key_tags(key)).ignore();
            for other in key_tags.iter().filter(|t| t.as_str() != tag) {
                pipe.srem(self.keys.tag(other), key).ignore();
            }
        }
        pipe.del(&tag_key).ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(keys.len())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.keys.prefix)
            .finish_non_exhaustive()
    }
}
