//! Logical connection registry and server selection.
//!
//! Each registered name owns its configuration, its balancer and the handles
//! opened so far. Handles are opened lazily on first use and reused after that.

use crate::db::balancer::LoadBalancer;
use crate::db::driver::{Driver, SqlxDriver};
use crate::db::handle::ConnectionHandle;
use crate::error::{DbError, DbResult};
use crate::models::{
    BalanceStrategy, ConnectionConfig, ConnectionMode, DatabaseType, ServerRole,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Connection information returned by `list_connections` (no secrets exposed).
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub name: String,
    pub driver: DatabaseType,
    pub database: String,
    pub strategy: BalanceStrategy,
    pub default_mode: ConnectionMode,
    pub servers: Vec<String>,
    pub open_handles: usize,
}

/// Handles are per (server, mode) rather than per server, so a READ handle is
/// never the one holding an open transaction. A primary serving both modes
/// therefore holds two physical connections and counts twice for
/// least-connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct HandleKey {
    server: usize,
    mode: ConnectionMode,
}

struct ConnectionEntry {
    config: ConnectionConfig,
    balancer: LoadBalancer,
    handles: HashMap<HandleKey, Arc<ConnectionHandle>>,
}

impl ConnectionEntry {
    /// Server indices eligible for `mode`, in registration order.
    fn eligible(&self, mode: ConnectionMode) -> Vec<usize> {
        let by_role = |accept: &dyn Fn(ServerRole) -> bool| -> Vec<usize> {
            self.config
                .servers
                .iter()
                .enumerate()
                .filter(|(_, s)| accept(s.role))
                .map(|(i, _)| i)
                .collect()
        };
        let eligible = by_role(&|role| mode.accepts(role));
        if eligible.is_empty() && mode == ConnectionMode::Read {
            return by_role(&|role| role == ServerRole::Primary);
        }
        eligible
    }

    fn transaction_handle(&self) -> Option<Arc<ConnectionHandle>> {
        self.handles
            .values()
            .find(|h| h.in_transaction() && !h.is_closed())
            .cloned()
    }
}

/// Owns every logical connection and the physical handles behind them.
#[derive(Clone)]
pub struct ConnectionManager {
    driver: Arc<dyn Driver>,
    connections: Arc<RwLock<HashMap<String, ConnectionEntry>>>,
}

impl ConnectionManager {
    /// Create a manager backed by sqlx.
    pub fn new() -> Self {
        Self::with_driver(Arc::new(SqlxDriver::new()))
    }

    pub fn with_driver(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a logical connection. Nothing is opened until first use.
    pub async fn register(&self, config: ConnectionConfig) -> DbResult<()> {
        config
            .validate()
            .map_err(|e| DbError::config(e.to_string()))?;

        let mut connections = self.connections.write().await;
        if connections.contains_key(&config.name) {
            return Err(DbError::connection(
                format!("Connection '{}' already exists", config.name),
                "Disconnect first or use a different connection name",
            ));
        }

        info!(
            connection = %config.name,
            db_type = %config.driver,
            servers = config.servers.len(),
            strategy = ?config.strategy,
            default_mode = %config.default_mode,
            "Registered connection"
        );
        let balancer = LoadBalancer::new(config.strategy, config.servers.len());
        connections.insert(
            config.name.clone(),
            ConnectionEntry {
                config,
                balancer,
                handles: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Resolve `name` to a physical handle.
    ///
    /// The mode is WRITE when `force_write` is set and the configured default
    /// mode otherwise. While a handle of this connection is inside a
    /// transaction, WRITE requests get that handle.
    pub async fn get_connection(
        &self,
        name: &str,
        force_write: bool,
    ) -> DbResult<Arc<ConnectionHandle>> {
        let (mode, candidates) = {
            let connections = self.connections.read().await;
            let entry = connections
                .get(name)
                .ok_or_else(|| DbError::connection_not_found(name))?;

            let mode = if force_write {
                ConnectionMode::Write
            } else {
                entry.config.default_mode
            };

            if mode == ConnectionMode::Write {
                if let Some(handle) = entry.transaction_handle() {
                    debug!(
                        connection = %name,
                        server = %handle.server_name(),
                        "Reusing handle inside transaction"
                    );
                    return Ok(handle);
                }
            }

            let eligible = entry.eligible(mode);
            if eligible.is_empty() {
                return Err(DbError::connection(
                    format!("No eligible server for {} mode on connection '{}'", mode, name),
                    "Add a server with a matching role",
                ));
            }
            (mode, entry.balancer.candidates(mode, &eligible))
        };

        let mut last_error = None;
        for server in candidates {
            match self.open_or_reuse(name, server, mode).await {
                Ok(handle) => return Ok(handle),
                Err(e @ DbError::ConnectionNotFound { .. }) => return Err(e),
                Err(e) => {
                    warn!(
                        connection = %name,
                        server_index = server,
                        mode = %mode,
                        error = %e,
                        "Server unavailable, trying next candidate"
                    );
                    last_error = Some(e);
                }
            }
        }

        let detail = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no candidates".to_string());
        Err(DbError::connection(
            format!(
                "All {} servers of connection '{}' failed: {}",
                mode, name, detail
            ),
            "Check that at least one server for this mode is reachable",
        ))
    }

    /// Return the open handle for (name, server, mode), opening it if needed.
    async fn open_or_reuse(
        &self,
        name: &str,
        server: usize,
        mode: ConnectionMode,
    ) -> DbResult<Arc<ConnectionHandle>> {
        let key = HandleKey { server, mode };
        let (config, server_config) = {
            let connections = self.connections.read().await;
            let entry = connections
                .get(name)
                .ok_or_else(|| DbError::connection_not_found(name))?;
            if let Some(handle) = entry.handles.get(&key).filter(|h| !h.is_closed()) {
                return Ok(Arc::clone(handle));
            }
            let server_config = entry
                .config
                .servers
                .get(server)
                .cloned()
                .ok_or_else(|| DbError::internal(format!("Server index {server} out of range")))?;
            (entry.config.clone(), server_config)
        };

        let conn = self.driver.connect(&config, &server_config).await?;
        let handle = Arc::new(ConnectionHandle::new(
            name,
            &server_config.name,
            server,
            mode,
            config.driver,
            conn,
        ));

        // Re-check after async work to prevent TOCTOU race
        let outcome = {
            let mut connections = self.connections.write().await;
            match connections.get_mut(name) {
                None => Err(DbError::connection_not_found(name)),
                Some(entry) => match entry.handles.get(&key).filter(|h| !h.is_closed()) {
                    Some(existing) => Ok(Arc::clone(existing)),
                    None => {
                        if let Some(stale) = entry.handles.insert(key, Arc::clone(&handle)) {
                            entry.balancer.record_close(stale.server_index());
                        }
                        entry.balancer.record_open(server);
                        Ok(Arc::clone(&handle))
                    }
                },
            }
        };

        match outcome {
            Ok(winner) if Arc::ptr_eq(&winner, &handle) => {
                info!(
                    connection = %name,
                    server = %server_config.name,
                    mode = %mode,
                    "Connected"
                );
                Ok(winner)
            }
            other => {
                // Lost the race or the connection vanished; close ours outside the lock.
                handle.close().await;
                other
            }
        }
    }

    /// True when any handle of `name` is inside a transaction.
    pub async fn in_transaction(&self, name: &str) -> DbResult<bool> {
        let connections = self.connections.read().await;
        let entry = connections
            .get(name)
            .ok_or_else(|| DbError::connection_not_found(name))?;
        Ok(entry.transaction_handle().is_some())
    }

    pub async fn db_type(&self, name: &str) -> DbResult<DatabaseType> {
        let connections = self.connections.read().await;
        connections
            .get(name)
            .map(|entry| entry.config.driver)
            .ok_or_else(|| DbError::connection_not_found(name))
    }

    /// Get the configuration for a connection.
    pub async fn config(&self, name: &str) -> DbResult<ConnectionConfig> {
        let connections = self.connections.read().await;
        connections
            .get(name)
            .map(|entry| entry.config.clone())
            .ok_or_else(|| DbError::connection_not_found(name))
    }

    /// Check if a connection is registered.
    pub async fn exists(&self, name: &str) -> bool {
        self.connections.read().await.contains_key(name)
    }

    /// List all registered connections, sorted by name.
    pub async fn list_connections(&self) -> Vec<ConnectionSummary> {
        let connections = self.connections.read().await;
        let mut summaries: Vec<ConnectionSummary> = connections
            .values()
            .map(|entry| ConnectionSummary {
                name: entry.config.name.clone(),
                driver: entry.config.driver,
                database: entry.config.database.clone(),
                strategy: entry.balancer.strategy(),
                default_mode: entry.config.default_mode,
                servers: entry.config.servers.iter().map(|s| s.name.clone()).collect(),
                open_handles: entry.handles.values().filter(|h| !h.is_closed()).count(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Number of open handles per server name.
    pub async fn open_handles(&self, name: &str) -> DbResult<HashMap<String, usize>> {
        let connections = self.connections.read().await;
        let entry = connections
            .get(name)
            .ok_or_else(|| DbError::connection_not_found(name))?;
        let mut counts: HashMap<String, usize> = entry
            .config
            .servers
            .iter()
            .map(|s| (s.name.clone(), 0))
            .collect();
        for handle in entry.handles.values().filter(|h| !h.is_closed()) {
            *counts.entry(handle.server_name().to_string()).or_default() += 1;
        }
        Ok(counts)
    }

    /// Close every handle to one server of `name`; the connection stays registered.
    ///
    /// Returns the number of handles closed.
    pub async fn close_server(&self, name: &str, server: &str) -> DbResult<usize> {
        let closing: Vec<Arc<ConnectionHandle>> = {
            let mut connections = self.connections.write().await;
            let entry = connections
                .get_mut(name)
                .ok_or_else(|| DbError::connection_not_found(name))?;
            let keys: Vec<HandleKey> = entry
                .handles
                .iter()
                .filter(|(_, h)| h.server_name() == server)
                .map(|(k, _)| *k)
                .collect();
            let mut closing = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(handle) = entry.handles.remove(&key) {
                    entry.balancer.record_close(handle.server_index());
                    closing.push(handle);
                }
            }
            closing
        };

        let mut closed = 0;
        for handle in closing {
            if handle.close().await {
                closed += 1;
            }
        }
        info!(connection = %name, server = %server, closed, "Closed server handles");
        Ok(closed)
    }

    /// Close all handles of `name` and unregister it.
    pub async fn disconnect(&self, name: &str) -> DbResult<()> {
        let entry = self
            .connections
            .write()
            .await
            .remove(name)
            .ok_or_else(|| DbError::connection_not_found(name))?;
        Self::close_entry(name, entry).await;
        Ok(())
    }

    /// Close all connections and clear the registry.
    pub async fn close_all(&self) {
        let drained: Vec<(String, ConnectionEntry)> =
            self.connections.write().await.drain().collect();
        for (name, entry) in drained {
            Self::close_entry(&name, entry).await;
        }
        info!("All connections closed");
    }

    async fn close_entry(name: &str, entry: ConnectionEntry) {
        info!(connection = %name, handles = entry.handles.len(), "Closing connection");
        for handle in entry.handles.into_values() {
            entry.balancer.record_close(handle.server_index());
            handle.close().await;
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager").finish_non_exhaustive()
    }
}
