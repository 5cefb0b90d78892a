//! Data models for querykit.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod pagination;
pub mod query;

// Re-export commonly used types
pub use connection::{
    BalanceStrategy, ConnectionConfig, ConnectionConfigError, ConnectionMode, DatabaseType, Server,
    ServerRole,
};
pub use pagination::{CursorPaginationResult, PaginationResult, SimplePaginationResult};
pub use query::{ExecOutcome, QueryParam, Row};
