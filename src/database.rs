//! Application-level entry point.
//!
//! A [`Database`] owns the connection manager, the optional cache, the
//! table-to-tag registry and the anonymizer. It is cheap to clone and every
//! [`QueryBuilder`] carries one, so there is no global state.

use crate::anonymize::{Anonymizer, MaskingAnonymizer};
use crate::cache::{Cache, RedisStore};
use crate::config::{CacheBackendKind, Settings};
use crate::db::{ConnectionManager, TransactionCoordinator};
use crate::error::{DbError, DbResult};
use crate::query::QueryBuilder;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Database {
    manager: ConnectionManager,
    cache: Option<Cache>,
    /// table -> tags invalidated when the table is written
    table_tags: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
    anonymizer: Arc<dyn Anonymizer>,
    default_connection: Option<String>,
}

impl Database {
    /// A context without cache, using the built-in anonymizer.
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            cache: None,
            table_tags: Arc::new(RwLock::new(HashMap::new())),
            anonymizer: Arc::new(MaskingAnonymizer::new()),
            default_connection: None,
        }
    }

    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_anonymizer(mut self, anonymizer: Arc<dyn Anonymizer>) -> Self {
        self.anonymizer = anonymizer;
        self
    }

    /// Connection used by [`Database::table`].
    pub fn with_default_connection(mut self, name: impl Into<String>) -> Self {
        self.default_connection = Some(name.into());
        self
    }

    /// Register every connection and build the configured cache.
    ///
    /// An unreachable redis is logged and the context runs without a cache.
    pub async fn from_settings(settings: &Settings) -> DbResult<Self> {
        settings.validate().map_err(DbError::config)?;

        let manager = ConnectionManager::new();
        for connection in &settings.connections {
            manager.register(connection.clone()).await?;
        }

        let cache = match settings.cache.backend {
            CacheBackendKind::None => None,
            CacheBackendKind::Memory => Some(Cache::memory()),
            CacheBackendKind::Redis => {
                let redis = settings
                    .cache
                    .redis
                    .as_ref()
                    .ok_or_else(|| DbError::config("cache backend 'redis' requires a 'redis' section"))?;
                match RedisStore::connect(redis).await {
                    Ok(store) => Some(Cache::new(Arc::new(store))),
                    Err(e) => {
                        warn!(error = %e, "Redis cache unavailable, continuing without cache");
                        None
                    }
                }
            }
        };
        let cache = cache.map(|cache| match settings.cache.default_ttl() {
            Some(ttl) => cache.with_default_ttl(ttl),
            None => cache,
        });

        let mut db = Self::new(manager);
        db.cache = cache;
        db.default_connection = settings.default_connection_name().map(str::to_string);
        for (table, tags) in &settings.cache.table_tags {
            db.register_table_tags(table, tags).await;
        }
        info!(
            connections = settings.connections.len(),
            cache = db.cache.as_ref().map(|c| c.store().backend_name()).unwrap_or("none"),
            "Database context ready"
        );
        Ok(db)
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn cache(&self) -> Option<&Cache> {
        self.cache.as_ref()
    }

    pub fn anonymizer(&self) -> &Arc<dyn Anonymizer> {
        &self.anonymizer
    }

    pub fn default_connection(&self) -> Option<&str> {
        self.default_connection.as_deref()
    }

    /// A builder on the default connection.
    pub fn table(&self, table: &str) -> QueryBuilder {
        match &self.default_connection {
            Some(name) => QueryBuilder::new(self.clone(), name.clone(), table),
            None => {
                let mut builder = QueryBuilder::new(self.clone(), String::new(), table);
                builder
                    .state_mut()
                    .record_error("No default connection configured");
                builder
            }
        }
    }

    /// A builder on a named connection.
    pub fn query(&self, connection: &str, table: &str) -> QueryBuilder {
        QueryBuilder::new(self.clone(), connection, table)
    }

    /// Transaction control on the WRITE handle of `connection`.
    pub async fn coordinator(&self, connection: &str) -> DbResult<TransactionCoordinator> {
        let handle = self.manager.get_connection(connection, true).await?;
        Ok(TransactionCoordinator::new(handle))
    }

    /// Run `callback` in a transaction on the default connection.
    pub async fn transaction<F, Fut, T>(&self, callback: F) -> DbResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let name = self
            .default_connection
            .clone()
            .ok_or_else(|| DbError::config("No default connection configured"))?;
        self.transaction_on(&name, callback).await
    }

    /// Run `callback` in a transaction on `connection`.
    pub async fn transaction_on<F, Fut, T>(&self, connection: &str, callback: F) -> DbResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        self.coordinator(connection).await?.transaction(callback).await
    }

    /// Invalidate `tags` whenever `table` is written.
    pub async fn register_table_tags<S: AsRef<str>>(&self, table: &str, tags: &[S]) {
        if tags.is_empty() {
            return;
        }
        let mut registry = self.table_tags.write().await;
        let entry = registry.entry(table.to_string()).or_default();
        for tag in tags {
            entry.insert(tag.as_ref().to_string());
        }
    }

    pub async fn table_tags(&self, table: &str) -> Vec<String> {
        self.table_tags
            .read()
            .await
            .get(table)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Tag every cached read of `table` carries, so a write invalidates it
    /// even when no tags were configured or registered in this process.
    pub fn table_tag(table: &str) -> String {
        format!("table:{table}")
    }

    /// Drop every cache entry tagged for `table`. Called after successful writes.
    pub(crate) async fn invalidate_table(&self, table: &str) {
        let Some(cache) = &self.cache else {
            return;
        };
        let mut tags = self.table_tags(table).await;
        tags.push(Self::table_tag(table));
        debug!(table = %table, tags = tags.len(), "Invalidating cached reads of table");
        for tag in &tags {
            cache.invalidate_by_tag(tag).await;
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("manager", &self.manager)
            .field("cache", &self.cache)
            .field("default_connection", &self.default_connection)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_table_without_default_connection_fails_on_execution() {
        let db = Database::new(ConnectionManager::new());
        let err = db.table("users").get().await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_table_tag_registry_deduplicates() {
        let db = Database::new(ConnectionManager::new());
        db.register_table_tags("products", &["products", "catalog"]).await;
        db.register_table_tags("products", &["products"]).await;
        assert_eq!(db.table_tags("products").await, vec!["catalog", "products"]);
        assert!(db.table_tags("users").await.is_empty());
    }

    #[test]
    fn test_table_tag() {
        assert_eq!(Database::table_tag("products"), "table:products");
    }

    #[tokio::test]
    async fn test_from_settings_registers_connections_and_tags() {
        let settings = Settings::from_json(
            r#"{
                "connections": [{
                    "name": "main",
                    "driver": "sqlite",
                    "database": "/tmp/unused.db",
                    "servers": [{"name": "local", "host": "", "role": "primary"}]
                }],
                "cache": {"backend": "memory", "table_tags": {"products": ["products"]}}
            }"#,
        )
        .unwrap();
        let db = Database::from_settings(&settings).await.unwrap();
        assert_eq!(db.default_connection(), Some("main"));
        assert!(db.manager().exists("main").await);
        assert!(db.cache().is_some());
        assert_eq!(db.table_tags("products").await, vec!["products"]);
    }
}
