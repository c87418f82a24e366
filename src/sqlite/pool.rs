use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bb8::Pool;

use super::config::{SqliteManager, SqliteOptions, SqliteOptionsBuilder};
use super::connection::run_blocking;
use super::params::Params;
use super::query::{build_result_set, describe, execute_dml};
use super::transaction::SqliteTx;
use crate::conn::{ConnPool, Pinger, PreparedStatement, TxBeginner, TxOptions};
use crate::context::QueryContext;
use crate::error::SqlPreloadError;
use crate::results::{ExecResult, ResultSet};
use crate::types::RowValues;

/// Pooled `SQLite` handle. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct SqlitePool {
    pool: Pool<SqliteManager>,
}

impl SqlitePool {
    #[must_use]
    pub fn builder(db_path: impl Into<String>) -> SqliteOptionsBuilder {
        SqliteOptionsBuilder::new(db_path)
    }

    /// Create the pool and check one connection out as a smoke test.
    ///
    /// # Errors
    /// `ConfigError` for bad options, otherwise the connect error.
    pub async fn new(opts: SqliteOptions) -> Result<Self, SqlPreloadError> {
        let max_connections = opts.max_connections;
        let connection_timeout = opts.connection_timeout;
        let manager = SqliteManager::new(opts)?;
        let pool = Pool::builder()
            .max_size(max_connections)
            .connection_timeout(connection_timeout)
            .build(manager)
            .await?;

        let this = Self { pool };
        this.ping_inner(&QueryContext::new()).await?;
        Ok(this)
    }

    #[must_use]
    pub fn inner(&self) -> &Pool<SqliteManager> {
        &self.pool
    }

    /// Run several `;`-separated statements (DDL, fixtures) on one connection.
    ///
    /// # Errors
    /// Checkout or driver error.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), SqlPreloadError> {
        let ctx = QueryContext::new();
        let conn = self.pool.get().await?;
        let sql = sql.to_owned();
        tracing::debug!(len = sql.len(), "sqlite batch");
        run_blocking(&conn, &ctx, move |guard| {
            guard.execute_batch(&sql).map_err(SqlPreloadError::SqliteError)
        })
        .await
    }

    async fn ping_inner(&self, ctx: &QueryContext) -> Result<(), SqlPreloadError> {
        let conn = ctx
            .run(async { self.pool.get().await.map_err(SqlPreloadError::from) })
            .await?;
        run_blocking(&conn, ctx, |guard| {
            guard
                .query_row("SELECT 1", [], |_| Ok(()))
                .map_err(SqlPreloadError::SqliteError)
        })
        .await
    }
}

impl fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlitePool")
            .field("state", &self.pool.state())
            .finish()
    }
}

#[async_trait]
impl ConnPool for SqlitePool {
    async fn prepare(
        &self,
        ctx: &QueryContext,
        sql: &str,
    ) -> Result<PreparedStatement, SqlPreloadError> {
        let conn = ctx
            .run(async { self.pool.get().await.map_err(SqlPreloadError::from) })
            .await?;
        let sql = sql.to_owned();
        run_blocking(&conn, ctx, move |guard| describe(guard, &sql)).await
    }

    async fn exec(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecResult, SqlPreloadError> {
        tracing::debug!(sql, params = params.len(), "sqlite exec");
        let conn = ctx
            .run(async { self.pool.get().await.map_err(SqlPreloadError::from) })
            .await?;
        let sql = sql.to_owned();
        let params = Params::convert(params);
        run_blocking(&conn, ctx, move |guard| execute_dml(guard, &sql, &params)).await
    }

    async fn query(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlPreloadError> {
        tracing::debug!(sql, params = params.len(), "sqlite query");
        let conn = ctx
            .run(async { self.pool.get().await.map_err(SqlPreloadError::from) })
            .await?;
        let sql = sql.to_owned();
        let params = Params::convert(params);
        run_blocking(&conn, ctx, move |guard| build_result_set(guard, &sql, &params)).await
    }

    fn as_tx_beginner(&self) -> Option<&dyn TxBeginner> {
        Some(self)
    }

    fn as_pinger(&self) -> Option<&dyn Pinger> {
        Some(self)
    }
}

#[async_trait]
impl TxBeginner for SqlitePool {
    async fn begin_tx(
        &self,
        ctx: &QueryContext,
        opts: &TxOptions,
    ) -> Result<Arc<dyn ConnPool>, SqlPreloadError> {
        let conn = ctx
            .run(async { self.pool.get_owned().await.map_err(SqlPreloadError::from) })
            .await?;
        let begin = opts.mode.begin_sql();
        run_blocking(&conn, ctx, move |guard| {
            guard.execute_batch(begin).map_err(SqlPreloadError::SqliteError)
        })
        .await?;
        tracing::info!(mode = ?opts.mode, "sqlite transaction started");
        Ok(Arc::new(SqliteTx::new(conn)))
    }
}

#[async_trait]
impl Pinger for SqlitePool {
    async fn ping(&self, ctx: &QueryContext) -> Result<(), SqlPreloadError> {
        self.ping_inner(ctx).await
    }
}
