//! Integration tests for transactions and savepoints on SQLite.

use querykit::db::ConnectionManager;
use querykit::error::{DbError, DbResult};
use querykit::models::{ConnectionConfig, DatabaseType, Server, ServerRole};
use querykit::Database;
use std::path::Path;
use tempfile::TempDir;

fn sqlite_config(name: &str, path: &Path) -> ConnectionConfig {
    ConnectionConfig::new(
        name,
        DatabaseType::SQLite,
        path.to_string_lossy(),
        vec![Server::new("local", "", ServerRole::Primary)],
    )
}

/// Two logical connections on the same file: `main` for the code under test
/// and `observer` for reads from outside its transaction.
async fn setup() -> (Database, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bank.db");
    let manager = ConnectionManager::new();
    manager.register(sqlite_config("main", &path)).await.unwrap();
    manager.register(sqlite_config("observer", &path)).await.unwrap();
    let db = Database::new(manager).with_default_connection("main");

    db.manager()
        .get_connection("main", true)
        .await
        .unwrap()
        .execute_raw("CREATE TABLE accounts (id INTEGER PRIMARY KEY, owner TEXT NOT NULL)")
        .await
        .unwrap();
    (db, dir)
}

async fn observed_count(db: &Database) -> u64 {
    db.query("observer", "accounts").count().await.unwrap()
}

#[tokio::test]
async fn test_rollback_to_savepoint_keeps_outer_transaction() {
    let (db, _dir) = setup().await;
    let tx = db.table("accounts").transactions().await.unwrap();

    assert!(tx.begin().await.unwrap());
    db.table("accounts").insert([("owner", "alice")]).await.unwrap();

    tx.savepoint("sp1").await.unwrap();
    db.table("accounts").insert([("owner", "bob")]).await.unwrap();
    assert_eq!(db.table("accounts").count().await.unwrap(), 2);

    tx.rollback_to_savepoint("sp1").await.unwrap();
    assert!(tx.in_transaction());
    assert_eq!(db.table("accounts").count().await.unwrap(), 1);

    // No new begin needed.
    assert!(tx.commit().await.unwrap());
    assert!(!tx.in_transaction());

    let owners = db.table("accounts").pluck("owner").await.unwrap();
    assert_eq!(owners, vec![serde_json::json!("alice")]);
    assert_eq!(observed_count(&db).await, 1);
}

#[tokio::test]
async fn test_release_savepoint() {
    let (db, _dir) = setup().await;
    let tx = db.coordinator("main").await.unwrap();
    tx.begin().await.unwrap();
    tx.savepoint("before_insert").await.unwrap();
    db.table("accounts").insert([("owner", "carol")]).await.unwrap();
    tx.release_savepoint("before_insert").await.unwrap();

    // Released savepoints can no longer be rolled back to.
    let err = tx.rollback_to_savepoint("before_insert").await.unwrap_err();
    assert!(matches!(err, DbError::Transaction { .. }), "got {err:?}");

    assert!(tx.commit().await.unwrap());
    assert_eq!(observed_count(&db).await, 1);
}

#[tokio::test]
async fn test_failed_callback_rolls_back() {
    let (db, _dir) = setup().await;

    let result: DbResult<()> = db
        .transaction(|| async {
            db.table("accounts").insert([("owner", "dave")]).await?;
            db.table("accounts").insert([("owner", "erin")]).await?;
            Err(DbError::internal("transfer rejected"))
        })
        .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("transfer rejected"));
    assert!(!db.manager().in_transaction("main").await.unwrap());
    assert_eq!(db.table("accounts").count().await.unwrap(), 0);
    assert_eq!(observed_count(&db).await, 0);
}

#[tokio::test]
async fn test_successful_callback_commits_and_returns_value() {
    let (db, _dir) = setup().await;

    let id = db
        .transaction(|| async { db.table("accounts").insert([("owner", "frank")]).await })
        .await
        .unwrap();
    assert_eq!(id, Some(1));
    assert_eq!(observed_count(&db).await, 1);
}

#[tokio::test]
async fn test_nested_transaction_uses_outer_boundary() {
    let (db, _dir) = setup().await;

    let result: DbResult<()> = db
        .transaction(|| async {
            db.table("accounts").insert([("owner", "gina")]).await?;
            // The inner call must not commit on its own.
            db.transaction(|| async {
                db.table("accounts").insert([("owner", "hank")]).await?;
                Ok(())
            })
            .await?;
            assert_eq!(observed_count(&db).await, 0);
            Err(DbError::internal("abort after nested work"))
        })
        .await;

    assert!(result.is_err());
    assert_eq!(observed_count(&db).await, 0);
}

#[tokio::test]
async fn test_reads_inside_transaction_see_own_writes() {
    let (db, _dir) = setup().await;
    let tx = db.coordinator("main").await.unwrap();
    tx.begin().await.unwrap();

    db.table("accounts").insert([("owner", "ivy")]).await.unwrap();
    assert_eq!(db.table("accounts").count().await.unwrap(), 1);
    assert_eq!(observed_count(&db).await, 0);

    assert!(tx.rollback().await.unwrap());
    assert_eq!(db.table("accounts").count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_boundary_calls_are_idempotent_safe() {
    let (db, _dir) = setup().await;
    let tx = db.coordinator("main").await.unwrap();

    assert!(!tx.commit().await.unwrap());
    assert!(!tx.rollback().await.unwrap());

    assert!(tx.begin().await.unwrap());
    assert!(!tx.begin().await.unwrap());
    assert!(tx.commit().await.unwrap());
    assert!(!tx.commit().await.unwrap());
}

#[tokio::test]
async fn test_savepoints_require_transaction_and_safe_names() {
    let (db, _dir) = setup().await;
    let tx = db.coordinator("main").await.unwrap();

    let outside = tx.savepoint("sp1").await;
    assert!(matches!(outside, Err(DbError::Transaction { .. })));

    tx.begin().await.unwrap();
    // Sanitized to `sp1DROPTABLEaccounts`
    tx.savepoint("sp1; DROP TABLE accounts").await.unwrap();
    tx.rollback_to_savepoint("sp1; DROP TABLE accounts").await.unwrap();

    let empty = tx.savepoint("--;").await;
    assert!(matches!(empty, Err(DbError::Transaction { .. })));
    tx.commit().await.unwrap();

    // The table survived.
    assert_eq!(db.table("accounts").count().await.unwrap(), 0);
}
