//! Connection-related data models.
//!
//! A logical connection is a named configuration backed by one or more physical
//! servers. These types are immutable once registered with the
//! [`ConnectionManager`](crate::db::ConnectionManager).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[serde(alias = "postgres", alias = "pgsql")]
    PostgreSQL,
    /// Includes MariaDB
    #[serde(alias = "mariadb")]
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL => Some(3306),
            Self::SQLite => None,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Role a physical server plays inside its logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerRole {
    Primary,
    Read,
    Write,
}

/// Access mode requested when resolving a logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    #[default]
    Read,
    Write,
}

impl ConnectionMode {
    /// Whether a server with `role` directly serves this mode.
    ///
    /// Primaries take writes. Reads fall back to primaries only when no
    /// read-role server exists, which is decided by the caller.
    pub fn accepts(&self, role: ServerRole) -> bool {
        match self {
            Self::Read => role == ServerRole::Read,
            Self::Write => matches!(role, ServerRole::Write | ServerRole::Primary),
        }
    }
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Load-balancing strategy for choosing among eligible servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    #[default]
    RoundRobin,
    Random,
    LeastConnections,
}

/// One physical database server.
#[derive(Clone, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    /// Host name; ignored for SQLite where the connection's database is a file path.
    #[serde(default)]
    pub host: String,
    /// Defaults to the driver's standard port.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    /// Contains sensitive data - never log
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub role: ServerRole,
}

impl Server {
    pub fn new(name: impl Into<String>, host: impl Into<String>, role: ServerRole) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: None,
            username: None,
            password: None,
            role,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("role", &self.role)
            .finish()
    }
}

/// Configuration for a logical connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub name: String,
    pub driver: DatabaseType,
    /// Database name, or the database file path for SQLite.
    pub database: String,
    pub servers: Vec<Server>,
    #[serde(default, rename = "load_balancing")]
    pub strategy: BalanceStrategy,
    #[serde(default)]
    pub default_mode: ConnectionMode,
}

impl ConnectionConfig {
    /// Create a new configuration with round-robin balancing and READ default mode.
    pub fn new(
        name: impl Into<String>,
        driver: DatabaseType,
        database: impl Into<String>,
        servers: Vec<Server>,
    ) -> Self {
        Self {
            name: name.into(),
            driver,
            database: database.into(),
            servers,
            strategy: BalanceStrategy::default(),
            default_mode: ConnectionMode::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: BalanceStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_default_mode(mut self, mode: ConnectionMode) -> Self {
        self.default_mode = mode;
        self
    }

    /// Validate names and the server list.
    pub fn validate(&self) -> Result<(), ConnectionConfigError> {
        validate_name(&self.name)?;
        if self.database.is_empty() {
            return Err(ConnectionConfigError::EmptyDatabase(self.name.clone()));
        }
        if self.servers.is_empty() {
            return Err(ConnectionConfigError::NoServers(self.name.clone()));
        }
        let mut seen = HashSet::new();
        for server in &self.servers {
            validate_name(&server.name)?;
            if !seen.insert(server.name.as_str()) {
                return Err(ConnectionConfigError::DuplicateServer(server.name.clone()));
            }
            if self.driver != DatabaseType::SQLite && server.host.is_empty() {
                return Err(ConnectionConfigError::MissingHost(server.name.clone()));
            }
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), ConnectionConfigError> {
    if name.is_empty() {
        return Err(ConnectionConfigError::EmptyName);
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConnectionConfigError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Errors that can occur when validating a connection configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionConfigError {
    #[error("Connection or server name cannot be empty")]
    EmptyName,

    #[error("Name contains invalid characters: {0}")]
    InvalidName(String),

    #[error("Connection '{0}' has no database configured")]
    EmptyDatabase(String),

    #[error("Connection '{0}' has no servers")]
    NoServers(String),

    #[error("Server name '{0}' is used more than once")]
    DuplicateServer(String),

    #[error("Server '{0}' has no host")]
    MissingHost(String),
}
