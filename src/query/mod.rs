//! Query building, compilation and pagination.
//!
//! - [`QueryBuilder`] accumulates a [`QueryState`] and executes it
//! - [`Grammar`] compiles a state to dialect SQL with bound parameters
//! - [`PaginationEngine`] runs paged reads on clones of a builder

pub mod builder;
pub mod grammar;
pub mod identifier;
pub mod pagination;
pub mod state;

pub use builder::QueryBuilder;
pub use grammar::{CompiledQuery, Grammar};
pub use pagination::PaginationEngine;
pub use state::{CacheDirective, Operator, QueryState};
