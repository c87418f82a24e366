use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bb8::ManageConnection;

use super::connection::{SqliteHandle, run_blocking};
use super::pool::SqlitePool;
use crate::context::QueryContext;
use crate::error::SqlPreloadError;

/// Options for configuring a `SQLite` pool.
///
/// Defaults: 8 connections, 5s busy timeout, WAL on, 30s checkout timeout.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub db_path: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub wal: bool,
    pub connection_timeout: Duration,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
            wal: true,
            connection_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    fn validate(&self) -> Result<(), SqlPreloadError> {
        if self.db_path.is_empty() {
            return Err(SqlPreloadError::ConfigError("SQLite path is empty".into()));
        }
        if self.max_connections == 0 {
            return Err(SqlPreloadError::ConfigError(
                "SQLite pool needs at least one connection".into(),
            ));
        }
        Ok(())
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.opts.max_connections = max_connections;
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.opts.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.opts.wal = wal;
        self
    }

    #[must_use]
    pub fn connection_timeout(mut self, connection_timeout: Duration) -> Self {
        self.opts.connection_timeout = connection_timeout;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Build the pool.
    ///
    /// # Errors
    ///
    /// Returns `SqlPreloadError` if the options are invalid or the smoke test fails.
    pub async fn build(self) -> Result<SqlitePool, SqlPreloadError> {
        SqlitePool::new(self.finish()).await
    }
}

/// bb8 manager for rusqlite connections.
pub struct SqliteManager {
    opts: SqliteOptions,
}

impl SqliteManager {
    /// # Errors
    /// `ConfigError` for an empty path or a zero-sized pool.
    pub fn new(opts: SqliteOptions) -> Result<Self, SqlPreloadError> {
        opts.validate()?;
        Ok(Self { opts })
    }

    #[must_use]
    pub fn options(&self) -> &SqliteOptions {
        &self.opts
    }
}

impl ManageConnection for SqliteManager {
    type Connection = Arc<SqliteHandle>;
    type Error = SqlPreloadError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let opts = self.opts.clone();
        async move {
            let handle = tokio::task::spawn_blocking(move || SqliteHandle::open(&opts))
                .await
                .map_err(|e| {
                    SqlPreloadError::ConnectionError(format!("sqlite open join error: {e}"))
                })??;
            Ok(Arc::new(handle))
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let handle = Arc::clone(conn);
        async move {
            run_blocking(&handle, &QueryContext::new(), |guard| {
                if !guard.is_autocommit() {
                    return Err(SqlPreloadError::ConnectionError(
                        "sqlite connection returned with an open transaction".into(),
                    ));
                }
                guard
                    .query_row("SELECT 1", [], |_| Ok(()))
                    .map_err(SqlPreloadError::SqliteError)
            })
            .await
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_broken()
    }
}
