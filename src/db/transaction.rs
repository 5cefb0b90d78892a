//! Transaction boundaries and savepoints on a borrowed handle.
//!
//! The coordinator never owns the handle; it flips the handle's transaction
//! flag and issues the control statements. Only the outermost
//! [`TransactionCoordinator::transaction`] call owns BEGIN and COMMIT.

use crate::db::handle::ConnectionHandle;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Begin, commit, rollback and savepoints for one handle.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    handle: Arc<ConnectionHandle>,
}

impl TransactionCoordinator {
    /// Wrap a handle, normally one obtained in WRITE mode.
    pub fn new(handle: Arc<ConnectionHandle>) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    pub fn in_transaction(&self) -> bool {
        self.handle.in_transaction()
    }

    /// Start a transaction. Returns false, without touching the server, when
    /// one is already active.
    pub async fn begin(&self) -> DbResult<bool> {
        if !self.handle.swap_transaction_state(false, true) {
            warn!(
                connection = %self.handle.connection_name(),
                "Transaction already active, begin ignored"
            );
            return Ok(false);
        }

        let sql = match self.handle.db_type() {
            DatabaseType::MySQL => "START TRANSACTION",
            DatabaseType::PostgreSQL | DatabaseType::SQLite => "BEGIN",
        };
        if let Err(e) = self.handle.execute_raw(sql).await {
            self.handle.swap_transaction_state(true, false);
            return Err(self.wrap(e));
        }

        info!(
            connection = %self.handle.connection_name(),
            server = %self.handle.server_name(),
            "Transaction started"
        );
        Ok(true)
    }

    /// Commit the active transaction. Returns false when there is none.
    pub async fn commit(&self) -> DbResult<bool> {
        if !self.handle.in_transaction() {
            warn!(
                connection = %self.handle.connection_name(),
                "No active transaction to commit"
            );
            return Ok(false);
        }
        self.handle
            .execute_raw("COMMIT")
            .await
            .map_err(|e| self.wrap(e))?;
        self.handle.swap_transaction_state(true, false);

        info!(
            connection = %self.handle.connection_name(),
            server = %self.handle.server_name(),
            "Transaction committed"
        );
        Ok(true)
    }

    /// Roll back the active transaction. Returns false when there is none.
    pub async fn rollback(&self) -> DbResult<bool> {
        if !self.handle.in_transaction() {
            warn!(
                connection = %self.handle.connection_name(),
                "No active transaction to roll back"
            );
            return Ok(false);
        }
        self.handle
            .execute_raw("ROLLBACK")
            .await
            .map_err(|e| self.wrap(e))?;
        self.handle.swap_transaction_state(true, false);

        info!(
            connection = %self.handle.connection_name(),
            server = %self.handle.server_name(),
            "Transaction rolled back"
        );
        Ok(true)
    }

    pub async fn savepoint(&self, name: &str) -> DbResult<()> {
        let name = self.savepoint_name(name)?;
        self.control(&format!("SAVEPOINT {name}"), "Savepoint created", &name)
            .await
    }

    pub async fn rollback_to_savepoint(&self, name: &str) -> DbResult<()> {
        let name = self.savepoint_name(name)?;
        self.control(
            &format!("ROLLBACK TO SAVEPOINT {name}"),
            "Rolled back to savepoint",
            &name,
        )
        .await
    }

    pub async fn release_savepoint(&self, name: &str) -> DbResult<()> {
        let name = self.savepoint_name(name)?;
        self.control(
            &format!("RELEASE SAVEPOINT {name}"),
            "Savepoint released",
            &name,
        )
        .await
    }

    /// Run `callback` inside a transaction.
    ///
    /// Nested calls run the callback directly and leave the boundary to the
    /// outermost call. On error the transaction is rolled back and the
    /// callback's error is returned.
    pub async fn transaction<F, Fut, T>(&self, callback: F) -> DbResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        if self.in_transaction() || !self.begin().await? {
            return callback().await;
        }

        match callback().await {
            Ok(value) => {
                if let Err(e) = self.commit().await {
                    self.rollback_after_error(&e).await;
                    return Err(e);
                }
                Ok(value)
            }
            Err(e) => {
                self.rollback_after_error(&e).await;
                Err(e)
            }
        }
    }

    async fn rollback_after_error(&self, cause: &DbError) {
        if let Err(rollback_err) = self.rollback().await {
            error!(
                connection = %self.handle.connection_name(),
                cause = %cause,
                error = %rollback_err,
                "Rollback failed"
            );
        }
    }

    async fn control(&self, sql: &str, message: &'static str, savepoint: &str) -> DbResult<()> {
        if !self.handle.in_transaction() {
            return Err(DbError::transaction(
                format!("'{sql}' requires an active transaction"),
                self.handle.connection_name(),
            ));
        }
        self.handle
            .execute_raw(sql)
            .await
            .map_err(|e| self.wrap(e))?;
        info!(
            connection = %self.handle.connection_name(),
            savepoint = %savepoint,
            "{}",
            message
        );
        Ok(())
    }

    fn savepoint_name(&self, name: &str) -> DbResult<String> {
        let sanitized = sanitize_savepoint_name(name);
        if sanitized.is_empty() {
            return Err(DbError::transaction(
                format!("Invalid savepoint name: {name:?}"),
                self.handle.connection_name(),
            ));
        }
        Ok(sanitized)
    }

    fn wrap(&self, err: DbError) -> DbError {
        err.into_transaction(self.handle.connection_name())
    }
}

/// Keep only `[A-Za-z0-9_]`.
pub fn sanitize_savepoint_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}
