//! SQLite storage layer.
//!
//! `SqliteStore` implements every repository trait on top of a WAL-mode
//! database with split read/write connection pools.

pub mod execution;
pub mod pool;
pub mod store;
pub mod trigger;
pub mod workflow;

pub use pool::{default_database_url, DatabasePool};
pub use store::SqliteStore;
