//! querykit library
//!
//! Data-access core for applications talking to SQL databases (SQLite,
//! PostgreSQL, MySQL): logical connections over several physical servers
//! with load balancing, transactions and savepoints, a fluent query builder,
//! pagination, and query result caching with tag-based invalidation.

pub mod anonymize;
pub mod cache;
pub mod config;
pub mod database;
pub mod db;
pub mod error;
pub mod models;
pub mod query;

pub use anonymize::{Anonymizer, FieldSpec, FieldSpecs, MaskingAnonymizer};
pub use cache::{Cache, CacheError, CacheStore, MemoryStore, RedisStore};
pub use config::Settings;
pub use database::Database;
pub use db::{ConnectionHandle, ConnectionManager, TransactionCoordinator};
pub use error::{DbError, DbResult};
pub use query::{PaginationEngine, QueryBuilder};
