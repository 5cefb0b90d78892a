//! Integration tests for the query builder against SQLite.
//!
//! Tests verify that:
//! - Conditions, groups, joins and aggregates compile and return the right rows
//! - Values are always bound, never interpolated
//! - Writes report ids and affected rows
//! - Building mistakes surface as InvalidInput at execution

use querykit::db::ConnectionManager;
use querykit::error::DbError;
use querykit::models::{ConnectionConfig, DatabaseType, QueryParam, Server, ServerRole};
use querykit::{Database, FieldSpecs};
use serde_json::json;
use tempfile::TempDir;

/// Create a SQLite database with a seeded `products` table.
async fn setup() -> (Database, TempDir) {
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
    let db = Database::new(manager).with_default_connection("main");

    let handle = db.manager().get_connection("main", true).await.unwrap();
    handle
        .execute_raw(
            "CREATE TABLE products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                price INTEGER NOT NULL,
                category TEXT,
                deleted_at TEXT
            )",
        )
        .await
        .unwrap();
    handle
        .execute_raw("CREATE TABLE reviews (product_id INTEGER NOT NULL, stars INTEGER NOT NULL)")
        .await
        .unwrap();

    let seed = [
        ("Keyboard", 50, Some("hardware")),
        ("Mouse", 20, Some("hardware")),
        ("Monitor", 200, Some("hardware")),
        ("IDE License", 90, Some("software")),
        ("Sticker", 2, None),
    ];
    for (name, price, category) in seed {
        db.table("products")
            .insert([
                ("name", QueryParam::from(name)),
                ("price", QueryParam::from(price)),
                ("category", QueryParam::from(category)),
            ])
            .await
            .unwrap();
    }
    (db, dir)
}

fn names(rows: &[querykit::models::Row]) -> Vec<String> {
    rows.iter()
        .map(|r| r["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_insert_returns_new_id() {
    let (db, _dir) = setup().await;
    let id = db
        .table("products")
        .insert([("name", QueryParam::from("Cable")), ("price", QueryParam::from(5))])
        .await
        .unwrap();
    assert_eq!(id, Some(6));

    let row = db.table("products").where_("id", "=", 6).first().await.unwrap().unwrap();
    assert_eq!(row["name"], json!("Cable"));
    assert_eq!(row["category"], json!(null));
}

#[tokio::test]
async fn test_where_conditions_and_ordering() {
    let (db, _dir) = setup().await;

    let rows = db
        .table("products")
        .where_("category", "=", "hardware")
        .where_("price", ">=", 50)
        .order_by_desc("price")
        .get()
        .await
        .unwrap();
    assert_eq!(names(&rows), vec!["Monitor", "Keyboard"]);

    let rows = db
        .table("products")
        .where_("price", "<", 10)
        .or_where("name", "like", "Mo%")
        .order_by("id")
        .get()
        .await
        .unwrap();
    assert_eq!(names(&rows), vec!["Mouse", "Monitor", "Sticker"]);
}

#[tokio::test]
async fn test_nested_groups() {
    let (db, _dir) = setup().await;
    // category = hardware AND (price < 30 OR price > 100)
    let rows = db
        .table("products")
        .where_("category", "=", "hardware")
        .where_group(|q| q.where_("price", "<", 30).or_where("price", ">", 100))
        .order_by("id")
        .get()
        .await
        .unwrap();
    assert_eq!(names(&rows), vec!["Mouse", "Monitor"]);
}

#[tokio::test]
async fn test_special_operators() {
    let (db, _dir) = setup().await;

    let rows = db
        .table("products")
        .where_in("name", ["Mouse", "Sticker"])
        .order_by("id")
        .get()
        .await
        .unwrap();
    assert_eq!(names(&rows), vec!["Mouse", "Sticker"]);

    let between = db.table("products").where_between("price", 20, 90).count().await.unwrap();
    assert_eq!(between, 3);

    let not_between = db
        .table("products")
        .where_not_between("price", 20, 90)
        .count()
        .await
        .unwrap();
    assert_eq!(not_between, 2);

    assert_eq!(db.table("products").where_null("category").count().await.unwrap(), 1);
    assert_eq!(db.table("products").where_not_null("category").count().await.unwrap(), 4);
    // `= NULL` becomes IS NULL
    assert_eq!(
        db.table("products")
            .where_("category", "=", QueryParam::Null)
            .count()
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_empty_in_lists() {
    let (db, _dir) = setup().await;
    let none = db
        .table("products")
        .where_in("id", Vec::<i64>::new())
        .get()
        .await
        .unwrap();
    assert!(none.is_empty());

    let all = db
        .table("products")
        .where_not_in("id", Vec::<i64>::new())
        .count()
        .await
        .unwrap();
    assert_eq!(all, 5);
}

#[tokio::test]
async fn test_values_are_bound_not_interpolated() {
    let (db, _dir) = setup().await;
    let hostile = "x'); DROP TABLE products; --";
    db.table("products")
        .insert([("name", QueryParam::from(hostile)), ("price", QueryParam::from(1))])
        .await
        .unwrap();

    let row = db.table("products").where_("name", "=", hostile).first().await.unwrap();
    assert_eq!(row.unwrap()["name"], json!(hostile));
    assert_eq!(db.table("products").count().await.unwrap(), 6);
}

#[tokio::test]
async fn test_select_pluck_exists() {
    let (db, _dir) = setup().await;

    let rows = db
        .table("products")
        .select(["name", "price AS cost"])
        .where_("id", "=", 1)
        .get()
        .await
        .unwrap();
    assert_eq!(rows[0].len(), 2);
    assert_eq!(rows[0]["cost"], json!(50));

    let prices = db
        .table("products")
        .where_("category", "=", "hardware")
        .order_by("price")
        .pluck("price")
        .await
        .unwrap();
    assert_eq!(prices, vec![json!(20), json!(50), json!(200)]);

    assert!(db.table("products").where_("price", ">", 100).exists().await.unwrap());
    assert!(!db.table("products").where_("price", ">", 1000).exists().await.unwrap());
}

#[tokio::test]
async fn test_group_by_having_and_grouped_count() {
    let (db, _dir) = setup().await;
    let query = db
        .table("products")
        .select(["category", "COUNT(*) AS total"])
        .where_not_null("category")
        .group_by(["category"])
        .having("COUNT(*)", ">", 1)
        .order_by("category");

    let rows = query.get().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["category"], json!("hardware"));
    assert_eq!(rows[0]["total"], json!(3));

    // Counting a grouped query counts groups.
    let grouped = db
        .table("products")
        .select(["category"])
        .where_not_null("category")
        .group_by(["category"]);
    assert_eq!(grouped.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_join() {
    let (db, _dir) = setup().await;
    for (product_id, stars) in [(1, 5), (1, 4), (3, 2)] {
        db.table("reviews")
            .insert([("product_id", product_id), ("stars", stars)])
            .await
            .unwrap();
    }

    let rows = db
        .table("products p")
        .join("reviews r", "r.product_id", "=", "p.id")
        .select(["p.name", "r.stars"])
        .where_("r.stars", ">=", 4)
        .order_by_desc("r.stars")
        .get()
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], json!("Keyboard"));
    assert_eq!(rows[0]["stars"], json!(5));

    let unreviewed = db
        .table("products")
        .left_join("reviews", "reviews.product_id", "=", "products.id")
        .where_null("reviews.product_id")
        .count()
        .await
        .unwrap();
    assert_eq!(unreviewed, 3);
}

#[tokio::test]
async fn test_update_and_delete_report_affected_rows() {
    let (db, _dir) = setup().await;
    let updated = db
        .table("products")
        .where_("category", "=", "hardware")
        .update([("price", 1)])
        .await
        .unwrap();
    assert_eq!(updated, 3);
    assert_eq!(db.table("products").where_("price", "=", 1).count().await.unwrap(), 3);

    let deleted = db.table("products").where_("price", "=", 1).delete().await.unwrap();
    assert_eq!(deleted, 3);
    assert_eq!(db.table("products").count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_invalid_identifiers_are_rejected_before_execution() {
    let (db, _dir) = setup().await;

    let bad_column = db.table("products").where_("name; DROP TABLE products", "=", 1).get().await;
    assert!(matches!(bad_column, Err(DbError::InvalidInput { .. })));

    let bad_operator = db.table("products").where_("name", "== 1 OR", "x").get().await;
    assert!(matches!(bad_operator, Err(DbError::InvalidInput { .. })));

    let bad_table = db.table("products--").count().await;
    assert!(matches!(bad_table, Err(DbError::InvalidInput { .. })));

    let bad_insert = db.table("products").insert([("products.name", "x")]).await;
    assert!(matches!(bad_insert, Err(DbError::InvalidInput { .. })));

    // Nothing ran: the table is intact.
    assert_eq!(db.table("products").count().await.unwrap(), 5);
}

#[tokio::test]
async fn test_driver_errors_surface_as_query_errors() {
    let (db, _dir) = setup().await;
    let err = db.table("missing_table").get().await.unwrap_err();
    assert!(matches!(err, DbError::Query { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_anonymize_transforms_returned_rows_only() {
    let (db, _dir) = setup().await;
    let specs: FieldSpecs =
        serde_json::from_value(json!({"name": {"strategy": "mask", "options": {"visible": 2}}}))
            .unwrap();

    let masked = db
        .table("products")
        .where_("id", "=", 1)
        .anonymize(specs)
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(masked["name"], json!("******rd"));
    assert_eq!(masked["price"], json!(50));

    let stored = db.table("products").where_("id", "=", 1).first().await.unwrap().unwrap();
    assert_eq!(stored["name"], json!("Keyboard"));
}

#[tokio::test]
async fn test_builder_clone_is_independent() {
    let (db, _dir) = setup().await;
    let base = db.table("products").where_("category", "=", "hardware");
    let cheap = base.clone().where_("price", "<", 30);

    assert_eq!(base.count().await.unwrap(), 3);
    assert_eq!(cheap.count().await.unwrap(), 1);
}
