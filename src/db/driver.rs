//! Physical database access.
//!
//! [`Driver`] opens one connection to one server; [`DriverConnection`] runs
//! statements on it. The connection manager only talks to these traits, so a
//! scripted driver can stand in for a real database in tests.

use crate::db::params::{mysql_query, postgres_query, sqlite_query};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionConfig, DatabaseType, ExecOutcome, QueryParam, Row, Server};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Connection, Executor};
use std::time::Duration;
use tracing::debug;

/// Opens physical connections.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn connect(
        &self,
        config: &ConnectionConfig,
        server: &Server,
    ) -> DbResult<Box<dyn DriverConnection>>;
}

/// One open physical connection.
///
/// With an empty parameter list statements go through the simple query
/// protocol, which is what transaction control statements need.
#[async_trait]
pub trait DriverConnection: Send {
    async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>>;

    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<ExecOutcome>;

    /// Run a statement with no parameters, e.g. `BEGIN` or `SAVEPOINT sp1`.
    async fn execute_raw(&mut self, sql: &str) -> DbResult<()> {
        self.execute(sql, &[]).await.map(|_| ())
    }

    async fn close(self: Box<Self>) -> DbResult<()>;
}

/// Driver backed by sqlx single connections.
#[derive(Debug, Clone, Default)]
pub struct SqlxDriver {
    sqlite_busy_timeout: Option<Duration>,
}

impl SqlxDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long SQLite waits on a locked database file before failing.
    pub fn with_sqlite_busy_timeout(mut self, timeout: Duration) -> Self {
        self.sqlite_busy_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Driver for SqlxDriver {
    async fn connect(
        &self,
        config: &ConnectionConfig,
        server: &Server,
    ) -> DbResult<Box<dyn DriverConnection>> {
        let db_type = config.driver;
        let map_err = |e: sqlx::Error| {
            DbError::connection(
                format!("Failed to connect to server '{}': {}", server.name, e),
                connection_suggestion(db_type, &e),
            )
        };

        let conn = match db_type {
            DatabaseType::MySQL => {
                let mut options = MySqlConnectOptions::new()
                    .host(&server.host)
                    .database(&config.database)
                    .charset("utf8mb4");
                if let Some(port) = server.port.or(db_type.default_port()) {
                    options = options.port(port);
                }
                if let Some(user) = &server.username {
                    options = options.username(user);
                }
                if let Some(password) = &server.password {
                    options = options.password(password);
                }
                DbConnection::MySql(MySqlConnection::connect_with(&options).await.map_err(map_err)?)
            }
            DatabaseType::PostgreSQL => {
                let mut options = PgConnectOptions::new()
                    .host(&server.host)
                    .database(&config.database);
                if let Some(port) = server.port.or(db_type.default_port()) {
                    options = options.port(port);
                }
                if let Some(user) = &server.username {
                    options = options.username(user);
                }
                if let Some(password) = &server.password {
                    options = options.password(password);
                }
                DbConnection::Postgres(PgConnection::connect_with(&options).await.map_err(map_err)?)
            }
            DatabaseType::SQLite => {
                let mut options = SqliteConnectOptions::new()
                    .filename(&config.database)
                    .create_if_missing(true);
                if let Some(timeout) = self.sqlite_busy_timeout {
                    options = options.busy_timeout(timeout);
                }
                DbConnection::SQLite(SqliteConnection::connect_with(&options).await.map_err(map_err)?)
            }
        };

        debug!(
            connection = %config.name,
            server = %server.name,
            db_type = %db_type,
            "Opened physical connection"
        );
        Ok(Box::new(conn))
    }
}

/// Database-specific connection (avoids the Any driver's type limitations).
#[derive(Debug)]
pub enum DbConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

impl DbConnection {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbConnection::MySql(_) => DatabaseType::MySQL,
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

#[async_trait]
impl DriverConnection for DbConnection {
    async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        let rows = match self {
            DbConnection::MySql(conn) => {
                let rows = if params.is_empty() {
                    conn.fetch_all(sql).await?
                } else {
                    mysql_query(sql, params).fetch_all(&mut *conn).await?
                };
                rows.iter().map(RowToJson::to_row).collect()
            }
            DbConnection::Postgres(conn) => {
                let rows = if params.is_empty() {
                    conn.fetch_all(sql).await?
                } else {
                    postgres_query(sql, params).fetch_all(&mut *conn).await?
                };
                rows.iter().map(RowToJson::to_row).collect()
            }
            DbConnection::SQLite(conn) => {
                let rows = if params.is_empty() {
                    conn.fetch_all(sql).await?
                } else {
                    sqlite_query(sql, params).fetch_all(&mut *conn).await?
                };
                rows.iter().map(RowToJson::to_row).collect()
            }
        };
        Ok(rows)
    }

    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<ExecOutcome> {
        let outcome = match self {
            DbConnection::MySql(conn) => {
                let result = if params.is_empty() {
                    conn.execute(sql).await?
                } else {
                    mysql_query(sql, params).execute(&mut *conn).await?
                };
                ExecOutcome {
                    rows_affected: result.rows_affected(),
                    last_insert_id: i64::try_from(result.last_insert_id())
                        .ok()
                        .filter(|id| *id > 0),
                }
            }
            DbConnection::Postgres(conn) => {
                let result = if params.is_empty() {
                    conn.execute(sql).await?
                } else {
                    postgres_query(sql, params).execute(&mut *conn).await?
                };
                ExecOutcome {
                    rows_affected: result.rows_affected(),
                    last_insert_id: None,
                }
            }
            DbConnection::SQLite(conn) => {
                let result = if params.is_empty() {
                    conn.execute(sql).await?
                } else {
                    sqlite_query(sql, params).execute(&mut *conn).await?
                };
                ExecOutcome {
                    rows_affected: result.rows_affected(),
                    last_insert_id: Some(result.last_insert_rowid()).filter(|id| *id > 0),
                }
            }
        };
        Ok(outcome)
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        match *self {
            DbConnection::MySql(conn) => conn.close().await?,
            DbConnection::Postgres(conn) => conn.close().await?,
            DbConnection::SQLite(conn) => conn.close().await?,
        }
        Ok(())
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }
    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the server username and password".to_string();
    }
    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }
    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match db_type {
        DatabaseType::SQLite => "Verify the database file path is writable".to_string(),
        _ => "Verify the server host and port".to_string(),
    }
}
