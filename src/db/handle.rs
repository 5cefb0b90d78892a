//! A live physical connection bound to one server and one access mode.

use crate::db::driver::DriverConnection;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionMode, DatabaseType, ExecOutcome, QueryParam, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Shared handle to one open physical connection.
///
/// Statements on the same handle are serialized. The manager keeps at most one
/// handle per (connection, server, mode) and hands out clones of its `Arc`.
pub struct ConnectionHandle {
    connection: String,
    server: String,
    server_index: usize,
    mode: ConnectionMode,
    db_type: DatabaseType,
    inner: Mutex<Option<Box<dyn DriverConnection>>>,
    in_transaction: AtomicBool,
    closed: AtomicBool,
}

impl ConnectionHandle {
    pub(crate) fn new(
        connection: impl Into<String>,
        server: impl Into<String>,
        server_index: usize,
        mode: ConnectionMode,
        db_type: DatabaseType,
        conn: Box<dyn DriverConnection>,
    ) -> Self {
        Self {
            connection: connection.into(),
            server: server.into(),
            server_index,
            mode,
            db_type,
            inner: Mutex::new(Some(conn)),
            in_transaction: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Logical connection name.
    pub fn connection_name(&self) -> &str {
        &self.connection
    }

    pub fn server_name(&self) -> &str {
        &self.server
    }

    pub(crate) fn server_index(&self) -> usize {
        self.server_index
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }

    /// Flip the transaction flag from `current` to `new`; false when it was not `current`.
    pub(crate) fn swap_transaction_state(&self, current: bool, new: bool) -> bool {
        self.in_transaction
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Run a row-returning statement.
    pub async fn fetch_all(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        debug!(
            connection = %self.connection,
            server = %self.server,
            sql = %sql,
            params = params.len(),
            "Fetching rows"
        );
        let mut guard = self.inner.lock().await;
        let conn = guard.as_mut().ok_or_else(|| self.closed_error())?;
        conn.fetch_all(sql, params).await
    }

    /// Run a statement that returns no rows.
    pub async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<ExecOutcome> {
        debug!(
            connection = %self.connection,
            server = %self.server,
            sql = %sql,
            params = params.len(),
            "Executing statement"
        );
        let mut guard = self.inner.lock().await;
        let conn = guard.as_mut().ok_or_else(|| self.closed_error())?;
        conn.execute(sql, params).await
    }

    /// Run a parameterless control statement.
    pub async fn execute_raw(&self, sql: &str) -> DbResult<()> {
        debug!(
            connection = %self.connection,
            server = %self.server,
            sql = %sql,
            "Executing control statement"
        );
        let mut guard = self.inner.lock().await;
        let conn = guard.as_mut().ok_or_else(|| self.closed_error())?;
        conn.execute_raw(sql).await
    }

    /// Close the physical connection. Further statements fail.
    ///
    /// Returns false when the handle was already closed.
    pub(crate) async fn close(&self) -> bool {
        self.closed.store(true, Ordering::Release);
        let conn = self.inner.lock().await.take();
        let Some(conn) = conn else {
            return false;
        };
        if self.in_transaction.swap(false, Ordering::AcqRel) {
            warn!(
                connection = %self.connection,
                server = %self.server,
                "Closing handle with an open transaction; the server rolls it back"
            );
        }
        if let Err(e) = conn.close().await {
            warn!(
                connection = %self.connection,
                server = %self.server,
                error = %e,
                "Error while closing connection"
            );
        }
        true
    }

    fn closed_error(&self) -> DbError {
        DbError::connection(
            format!(
                "Handle to server '{}' of connection '{}' is closed",
                self.server, self.connection
            ),
            "Request a new handle from the connection manager",
        )
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("connection", &self.connection)
            .field("server", &self.server)
            .field("mode", &self.mode)
            .field("db_type", &self.db_type)
            .field("in_transaction", &self.in_transaction())
            .field("closed", &self.is_closed())
            .finish()
    }
}
