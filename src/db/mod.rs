//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Physical drivers over sqlx single connections
//! - Load balancing across the servers of a logical connection
//! - The connection manager that owns every handle
//! - Transaction and savepoint control
//! - Parameter binding and row decoding

pub mod balancer;
pub mod driver;
pub mod handle;
pub mod manager;
pub mod params;
pub mod transaction;
pub mod types;

pub use crate::models::DatabaseType;
pub use balancer::LoadBalancer;
pub use driver::{DbConnection, Driver, DriverConnection, SqlxDriver};
pub use handle::ConnectionHandle;
pub use manager::{ConnectionManager, ConnectionSummary};
pub use transaction::{TransactionCoordinator, sanitize_savepoint_name};
