//! SQLite backend: a bb8 pool of rusqlite connections exposed as [`ConnPool`](crate::conn::ConnPool).
//!
//! rusqlite is synchronous, so every statement runs on the blocking thread pool
//! while the async side races it against the caller's [`QueryContext`](crate::context::QueryContext).

pub mod config;
pub mod connection;
pub mod params;
pub mod pool;
pub mod query;
pub mod transaction;

pub use config::{SqliteManager, SqliteOptions, SqliteOptionsBuilder};
pub use connection::SqliteHandle;
pub use pool::SqlitePool;
pub use transaction::SqliteTx;
