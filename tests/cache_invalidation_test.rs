//! Integration tests for cached reads and write-triggered invalidation.

use async_trait::async_trait;
use querykit::cache::{Cache, CacheError, CacheStore, MemoryStore, RedisStore};
use querykit::config::RedisSettings;
use querykit::db::ConnectionManager;
use querykit::models::{ConnectionConfig, DatabaseType, QueryParam, Server, ServerRole};
use querykit::Database;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn setup_with(cache: Cache) -> (Database, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shop.db");
    let manager = ConnectionManager::new();
    manager
        .register(ConnectionConfig::new(
            "main",
            DatabaseType::SQLite,
            path.to_string_lossy(),
            vec![Server::new("local", "", ServerRole::Primary)],
        ))
        .await
        .unwrap();
    let db = Database::new(manager)
        .with_default_connection("main")
        .with_cache(cache);

    let handle = db.manager().get_connection("main", true).await.unwrap();
    handle
        .execute_raw("CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        .await
        .unwrap();
    handle
        .execute_raw("INSERT INTO products (name) VALUES ('Lamp'), ('Desk')")
        .await
        .unwrap();
    (db, dir)
}

async fn setup() -> (Database, TempDir) {
    setup_with(Cache::memory()).await
}

/// Write behind the builder's back, so no invalidation happens.
async fn sneak_insert(db: &Database, name: &str) {
    db.manager()
        .get_connection("main", true)
        .await
        .unwrap()
        .execute("INSERT INTO products (name) VALUES (?)", &[QueryParam::from(name)])
        .await
        .unwrap();
}

fn cached_products(db: &Database) -> querykit::QueryBuilder {
    db.table("products")
        .cache(Some(Duration::from_secs(60)))
        .cache_tags(["products"])
        .order_by("id")
}

#[tokio::test]
async fn test_cached_read_is_served_from_cache() {
    let (db, _dir) = setup().await;

    assert_eq!(cached_products(&db).get().await.unwrap().len(), 2);
    sneak_insert(&db, "Chair").await;

    // Still the cached result.
    assert_eq!(cached_products(&db).get().await.unwrap().len(), 2);
    // An uncached read sees the new row.
    assert_eq!(db.table("products").get().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_insert_invalidates_tagged_reads() {
    let (db, _dir) = setup().await;

    let before = cached_products(&db).get().await.unwrap();
    assert_eq!(before.len(), 2);

    db.table("products").insert([("name", "Shelf")]).await.unwrap();

    let after = cached_products(&db).get().await.unwrap();
    assert_eq!(after.len(), 3);
    assert_eq!(after[2]["name"], json!("Shelf"));
}

#[tokio::test]
async fn test_update_and_delete_invalidate() {
    let (db, _dir) = setup().await;

    cached_products(&db).get().await.unwrap();
    db.table("products")
        .where_("name", "=", "Lamp")
        .update([("name", "Floor lamp")])
        .await
        .unwrap();
    let rows = cached_products(&db).get().await.unwrap();
    assert_eq!(rows[0]["name"], json!("Floor lamp"));

    db.table("products").where_("id", "=", 1).delete().await.unwrap();
    assert_eq!(cached_products(&db).get().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_write_does_not_invalidate() {
    let (db, _dir) = setup().await;
    let cache = db.cache().unwrap().clone();

    let query = cached_products(&db).cache_key("products:all");
    query.get().await.unwrap();
    assert!(cache.has("products:all").await);

    // NOT NULL violation
    let failed = db.table("products").insert([("name", QueryParam::Null)]).await;
    assert!(failed.is_err());
    assert!(cache.has("products:all").await);

    db.table("products").insert([("name", "Rug")]).await.unwrap();
    assert!(!cache.has("products:all").await);
}

#[tokio::test]
async fn test_configured_table_tags_are_invalidated() {
    let (db, _dir) = setup().await;
    db.register_table_tags("products", &["catalog"]).await;

    let query = db
        .table("products")
        .cache(None)
        .cache_key("catalog:names")
        .cache_tags(["catalog"]);
    query.pluck("name").await.unwrap();
    let cache = db.cache().unwrap();
    assert!(cache.has("catalog:names:pluck:name").await);

    db.table("products").insert([("name", "Bench")]).await.unwrap();
    assert!(!cache.has("catalog:names:pluck:name").await);
}

#[tokio::test]
async fn test_derived_reads_do_not_share_explicit_key() {
    let (db, _dir) = setup().await;
    let query = cached_products(&db).cache_key("products:page");

    assert_eq!(query.count().await.unwrap(), 2);
    assert_eq!(query.get().await.unwrap().len(), 2);
    assert!(query.first().await.unwrap().is_some());

    let cache = db.cache().unwrap();
    for key in ["products:page", "products:page:count", "products:page:first"] {
        assert!(cache.has(key).await, "missing {key}");
    }
}

#[tokio::test]
async fn test_cursor_pages_do_not_share_explicit_key() {
    let (db, _dir) = setup().await;
    let query = cached_products(&db).cache_key("products:feed");

    let first = query.cursor_paginate("id", None, 1, false).await.unwrap();
    assert_eq!(first.data[0]["name"], json!("Lamp"));
    let cursor = first.next_cursor.map(QueryParam::from);
    let second = query.cursor_paginate("id", cursor.clone(), 1, false).await.unwrap();
    assert_eq!(second.data[0]["name"], json!("Desk"));

    // Served again from cache, still the right page.
    let again = query.cursor_paginate("id", cursor, 1, false).await.unwrap();
    assert_eq!(again.data, second.data);
    let cache = db.cache().unwrap();
    assert!(cache.has("products:feed:cursor:id:asc:1:start").await);
    assert!(cache.has("products:feed:cursor:id:asc:1:1").await);
}

#[tokio::test]
async fn test_untagged_cached_read_is_invalidated_by_write() {
    let (db, _dir) = setup().await;
    let query = db.table("products").cache(Some(Duration::from_secs(60)));

    assert_eq!(query.count().await.unwrap(), 2);
    db.table("products").insert([("name", "Vase")]).await.unwrap();
    assert_eq!(query.count().await.unwrap(), 3);

    db.table("products").where_("name", "=", "Vase").delete().await.unwrap();
    assert_eq!(query.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_write_invalidates_entries_cached_by_another_context() {
    let cache = Cache::memory();
    let (db, _dir) = setup_with(cache.clone()).await;
    let query = db.table("products").cache(None).cache_key("products:shared");
    assert_eq!(query.get().await.unwrap().len(), 2);

    // A fresh context on the same cache knows no registered tags.
    let restarted = Database::new(db.manager().clone())
        .with_default_connection("main")
        .with_cache(cache.clone());
    assert!(restarted.table_tags("products").await.is_empty());
    restarted.table("products").insert([("name", "Clock")]).await.unwrap();

    assert!(!cache.has("products:shared").await);
    assert_eq!(query.get().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_write_to_joined_table_invalidates_join_read() {
    let (db, _dir) = setup().await;
    db.manager()
        .get_connection("main", true)
        .await
        .unwrap()
        .execute_raw("CREATE TABLE stock (product_id INTEGER NOT NULL, qty INTEGER NOT NULL)")
        .await
        .unwrap();
    let query = db
        .table("products p")
        .join("stock s", "s.product_id", "=", "p.id")
        .cache(Some(Duration::from_secs(60)));

    assert!(query.get().await.unwrap().is_empty());
    db.table("stock")
        .insert([("product_id", 1), ("qty", 4)])
        .await
        .unwrap();
    assert_eq!(query.get().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reads_inside_transaction_bypass_cache() {
    let (db, _dir) = setup().await;
    let query = cached_products(&db).cache_key("products:tx");

    let tx = db.coordinator("main").await.unwrap();
    tx.begin().await.unwrap();
    sneak_insert(&db, "Stool").await;
    assert_eq!(query.get().await.unwrap().len(), 3);
    assert!(!db.cache().unwrap().has("products:tx").await);
    tx.rollback().await.unwrap();

    assert_eq!(query.get().await.unwrap().len(), 2);
    assert!(db.cache().unwrap().has("products:tx").await);
}

#[tokio::test]
async fn test_invalidate_by_tag_clears_every_tagged_key() {
    let store = Arc::new(MemoryStore::new());
    let cache = Cache::new(store.clone());
    let tags = vec!["products".to_string()];
    for key in ["a", "b", "c"] {
        assert!(cache.set(key, &json!(key), None, &tags).await);
    }
    cache.set("untagged", &json!(1), None, &[]).await;

    assert!(cache.invalidate_by_tag("products").await);
    for key in ["a", "b", "c"] {
        assert!(!cache.has(key).await);
    }
    assert!(cache.has("untagged").await);
    assert_eq!(store.tag_count().await, 0);
}

/// A backend whose every call fails.
struct UnreachableStore;

#[async_trait]
impl CacheStore for UnreachableStore {
    async fn get(&self, _key: &str) -> Result<Option<JsonValue>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn set(
        &self,
        _key: &str,
        _value: JsonValue,
        _ttl: Option<Duration>,
        _tags: &[String],
    ) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn has(&self, _key: &str) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn invalidate_tag(&self, _tag: &str) -> Result<usize, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    fn backend_name(&self) -> &'static str {
        "unreachable"
    }
}

#[tokio::test]
async fn test_unreachable_cache_never_fails_reads_or_writes() {
    let (db, _dir) = setup_with(Cache::new(Arc::new(UnreachableStore))).await;

    assert_eq!(cached_products(&db).get().await.unwrap().len(), 2);
    db.table("products").insert([("name", "Mat")]).await.unwrap();
    assert_eq!(cached_products(&db).get().await.unwrap().len(), 3);
}

#[tokio::test]
#[ignore = "requires a redis server at QUERYKIT_TEST_REDIS_URL or redis://127.0.0.1:6379"]
async fn test_redis_store_tags_and_delete() {
    let settings = RedisSettings {
        url: Some(
            std::env::var("QUERYKIT_TEST_REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string()),
        ),
        prefix: "querykit-test".to_string(),
        ..RedisSettings::default()
    };
    let store = RedisStore::connect(&settings).await.unwrap();
    store.clear().await.unwrap();
    let tags = vec!["products".to_string(), "catalog".to_string()];

    store.set("p1", json!([1]), Some(Duration::from_secs(30)), &tags).await.unwrap();
    store.set("p2", json!([2]), None, &tags[..1]).await.unwrap();
    assert_eq!(store.get("p1").await.unwrap(), Some(json!([1])));

    assert!(store.delete("p1").await.unwrap());
    assert!(!store.has("p1").await.unwrap());

    assert_eq!(store.invalidate_tag("products").await.unwrap(), 1);
    assert!(!store.has("p2").await.unwrap());
    assert_eq!(store.invalidate_tag("catalog").await.unwrap(), 0);
    store.clear().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a redis server at QUERYKIT_TEST_REDIS_URL or redis://127.0.0.1:6379"]
async fn test_redis_tag_sets_do_not_outlive_entries() {
    let settings = RedisSettings {
        url: Some(
            std::env::var("QUERYKIT_TEST_REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string()),
        ),
        prefix: "querykit-expiry".to_string(),
        ..RedisSettings::default()
    };
    let store = RedisStore::connect(&settings).await.unwrap();
    store.clear().await.unwrap();
    let tags = vec!["feed".to_string()];

    store.set("short", json!(1), Some(Duration::from_secs(1)), &tags).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2100)).await;
    // The tag set expired together with its only member.
    assert_eq!(store.invalidate_tag("feed").await.unwrap(), 0);

    // A persistent set drops members whose entries expired.
    store.set("pinned", json!(2), None, &tags).await.unwrap();
    store.set("brief", json!(3), Some(Duration::from_secs(1)), &tags).await.unwrap();
    store.delete("pinned").await.unwrap();
    tokio::time::sleep(Duration::from_millis(2100)).await;
    store.set("fresh", json!(4), None, &tags).await.unwrap();
    assert_eq!(store.invalidate_tag("feed").await.unwrap(), 1);
    store.clear().await.unwrap();
}
