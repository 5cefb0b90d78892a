//! Configuration handling for querykit.
//!
//! Connections and the cache backend are described in a JSON settings file;
//! the binary's own switches come from CLI arguments and environment variables.

use crate::error::{DbError, DbResult};
use crate::models::ConnectionConfig;
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_REDIS_HOST: &str = "127.0.0.1";
pub const DEFAULT_REDIS_PORT: u16 = 6379;
pub const DEFAULT_CACHE_PREFIX: &str = "querykit";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_PER_PAGE: u64 = 15;

/// Everything needed to build a [`Database`](crate::Database).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Connection used by `Database::table`; defaults to the first one listed.
    #[serde(default)]
    pub default_connection: Option<String>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub cache: CacheSettings,
}

impl Settings {
    /// Load settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DbError::config(format!("Cannot read settings file {}: {}", path.display(), e))
        })?;
        let settings = Self::from_json(&raw)?;
        Ok(settings)
    }

    /// Parse and validate settings from a JSON document.
    pub fn from_json(raw: &str) -> DbResult<Self> {
        let settings: Settings = serde_json::from_str(raw)
            .map_err(|e| DbError::config(format!("Invalid settings: {}", e)))?;
        settings.validate().map_err(DbError::config)?;
        Ok(settings)
    }

    /// Name of the default connection, if any connection is configured.
    pub fn default_connection_name(&self) -> Option<&str> {
        self.default_connection
            .as_deref()
            .or_else(|| self.connections.first().map(|c| c.name.as_str()))
    }

    /// Validate settings and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        let mut names = HashSet::new();
        for connection in &self.connections {
            connection
                .validate()
                .map_err(|e| format!("connection '{}': {}", connection.name, e))?;
            if !names.insert(connection.name.as_str()) {
                return Err(format!("connection '{}' is defined twice", connection.name));
            }
        }
        if let Some(default) = &self.default_connection {
            if !names.contains(default.as_str()) {
                return Err(format!("default_connection '{}' is not defined", default));
            }
        }
        self.cache.validate()
    }
}

/// Which cache backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// No cache; cache directives on queries are ignored.
    None,
    #[default]
    Memory,
    Redis,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub backend: CacheBackendKind,
    /// Applied to cache directives that carry no TTL. `0` disables expiry.
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,
    #[serde(default)]
    pub redis: Option<RedisSettings>,
    /// Tags invalidated whenever the table is written, e.g. `{"products": ["products"]}`.
    #[serde(default)]
    pub table_tags: HashMap<String, Vec<String>>,
}

fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            default_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            redis: None,
            table_tags: HashMap::new(),
        }
    }
}

impl CacheSettings {
    /// Get the default TTL, `None` when expiry is disabled.
    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_secs > 0).then(|| Duration::from_secs(self.default_ttl_secs))
    }

    /// Validate cache settings and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.backend == CacheBackendKind::Redis {
            let redis = self
                .redis
                .as_ref()
                .ok_or_else(|| "cache backend 'redis' requires a 'redis' section".to_string())?;
            redis.validate()?;
        }
        for (table, tags) in &self.table_tags {
            if tags.iter().any(|t| t.is_empty()) {
                return Err(format!("table '{}' has an empty cache tag", table));
            }
        }
        Ok(())
    }
}

/// Redis connection settings for the remote cache backend.
#[derive(Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Full `redis://` URL; overrides host, port, credentials and database.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    /// Contains sensitive data - never log
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Logical database index.
    #[serde(default)]
    pub database: i64,
    #[serde(default = "default_cache_prefix")]
    pub prefix: String,
}

fn default_redis_host() -> String {
    DEFAULT_REDIS_HOST.to_string()
}

fn default_redis_port() -> u16 {
    DEFAULT_REDIS_PORT
}

fn default_cache_prefix() -> String {
    DEFAULT_CACHE_PREFIX.to_string()
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: None,
            host: default_redis_host(),
            port: DEFAULT_REDIS_PORT,
            username: None,
            password: None,
            database: 0,
            prefix: default_cache_prefix(),
        }
    }
}

impl RedisSettings {
    /// Build the connection URL, percent-encoding credentials.
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let base = format!("redis://{}:{}/{}", self.host, self.port, self.database);
        let Ok(mut url) = Url::parse(&base) else {
            return base;
        };
        if let Some(user) = &self.username {
            let _ = url.set_username(user);
        }
        if let Some(password) = &self.password {
            let _ = url.set_password(Some(password));
        }
        url.to_string()
    }

    /// Validate redis settings and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(url) = &self.url {
            let parsed = Url::parse(url).map_err(|e| format!("invalid redis url: {}", e))?;
            if !matches!(parsed.scheme(), "redis" | "rediss") {
                return Err(format!("unsupported redis url scheme '{}'", parsed.scheme()));
            }
        } else if self.host.is_empty() {
            return Err("redis host cannot be empty".to_string());
        }
        if self.database < 0 {
            return Err("redis database index cannot be negative".to_string());
        }
        if self.prefix.is_empty() || self.prefix.contains(char::is_whitespace) {
            return Err("redis prefix must be non-empty and contain no whitespace".to_string());
        }
        Ok(())
    }
}

impl std::fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSettings")
            .field("url", &self.url.as_ref().map(|_| "****"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("database", &self.database)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Pretty,
    Compact,
}

/// Command-line configuration for the querykit binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "querykit",
    about = "Inspect and query databases described by a querykit settings file",
    version,
    author
)]
pub struct Config {
    /// Path to the JSON settings file
    #[arg(short, long, value_name = "FILE", env = "QUERYKIT_CONFIG")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "QUERYKIT_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "QUERYKIT_JSON_LOGS")]
    pub json_logs: bool,

    /// Enable logging output (disabled by default to keep stdout clean for results)
    #[arg(long, env = "QUERYKIT_ENABLE_LOGS")]
    pub enable_logs: bool,

    /// Result formatting
    #[arg(long, value_enum, default_value = "pretty", env = "QUERYKIT_OUTPUT")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List configured connections
    Connections,

    /// Count the rows of a table
    Count {
        table: String,
        /// Connection name (defaults to the settings' default connection)
        #[arg(long)]
        connection: Option<String>,
    },

    /// Fetch one page of a table with offset pagination
    Page {
        table: String,
        #[arg(long, default_value_t = 1)]
        page: u64,
        #[arg(long, default_value_t = DEFAULT_PER_PAGE)]
        per_page: u64,
        #[arg(long)]
        order_by: Option<String>,
        #[arg(long)]
        connection: Option<String>,
    },

    /// Fetch one page of a table with cursor pagination
    Cursor {
        table: String,
        /// Totally ordered column to paginate on
        #[arg(long, default_value = "id")]
        column: String,
        /// Cursor value returned by the previous call
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long, default_value_t = DEFAULT_PER_PAGE)]
        per_page: u64,
        #[arg(long)]
        desc: bool,
        #[arg(long)]
        connection: Option<String>,
    },
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
