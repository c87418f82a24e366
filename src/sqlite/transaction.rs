use std::sync::Arc;

use async_trait::async_trait;
use bb8::PooledConnection;
use tokio::sync::Mutex;

use super::config::SqliteManager;
use super::connection::{SqliteHandle, rollback_with_busy_retries, run_blocking};
use super::params::Params;
use super::query::{build_result_set, describe, execute_dml};
use crate::conn::{ConnPool, Pinger, PreparedStatement, TxCommitter};
use crate::context::QueryContext;
use crate::error::SqlPreloadError;
use crate::results::{ExecResult, ResultSet};
use crate::types::RowValues;

type OwnedConn = PooledConnection<'static, SqliteManager>;

/// Transaction handle that owns one pooled `SQLite` connection until it finishes.
///
/// Dropping it unfinished spawns a best-effort rollback on the current runtime.
pub struct SqliteTx {
    conn: Mutex<Option<OwnedConn>>,
}

impl SqliteTx {
    pub(crate) fn new(conn: OwnedConn) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    /// Clone of the connection handle, or `TransactionClosed`.
    async fn handle(&self) -> Result<Arc<SqliteHandle>, SqlPreloadError> {
        let guard = self.conn.lock().await;
        guard
            .as_ref()
            .map(|conn| Arc::clone(&**conn))
            .ok_or(SqlPreloadError::TransactionClosed)
    }
}

#[async_trait]
impl ConnPool for SqliteTx {
    async fn prepare(
        &self,
        ctx: &QueryContext,
        sql: &str,
    ) -> Result<PreparedStatement, SqlPreloadError> {
        let handle = self.handle().await?;
        let sql = sql.to_owned();
        run_blocking(&handle, ctx, move |guard| describe(guard, &sql)).await
    }

    async fn exec(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecResult, SqlPreloadError> {
        tracing::debug!(sql, params = params.len(), "sqlite tx exec");
        let handle = self.handle().await?;
        let sql = sql.to_owned();
        let params = Params::convert(params);
        run_blocking(&handle, ctx, move |guard| execute_dml(guard, &sql, &params)).await
    }

    async fn query(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlPreloadError> {
        tracing::debug!(sql, params = params.len(), "sqlite tx query");
        let handle = self.handle().await?;
        let sql = sql.to_owned();
        let params = Params::convert(params);
        run_blocking(&handle, ctx, move |guard| build_result_set(guard, &sql, &params)).await
    }

    fn as_tx_committer(&self) -> Option<&dyn TxCommitter> {
        Some(self)
    }

    fn as_pinger(&self) -> Option<&dyn Pinger> {
        Some(self)
    }
}

#[async_trait]
impl TxCommitter for SqliteTx {
    async fn commit(&self) -> Result<(), SqlPreloadError> {
        let mut guard = self.conn.lock().await;
        let handle = guard
            .as_ref()
            .map(|conn| Arc::clone(&**conn))
            .ok_or(SqlPreloadError::TransactionClosed)?;
        run_blocking(&handle, &QueryContext::new(), |conn| {
            conn.execute_batch("COMMIT")
                .map_err(SqlPreloadError::SqliteError)
        })
        .await?;
        // connection goes back to the pool
        guard.take();
        tracing::info!("sqlite transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), SqlPreloadError> {
        let conn = self
            .conn
            .lock()
            .await
            .take()
            .ok_or(SqlPreloadError::TransactionClosed)?;
        let handle = Arc::clone(&*conn);
        let result = run_blocking(&handle, &QueryContext::new(), rollback_with_busy_retries).await;
        if let Err(err) = &result {
            tracing::warn!(error = %err, "sqlite rollback failed; retiring connection");
            handle.mark_broken();
        } else {
            tracing::info!("sqlite transaction rolled back");
        }
        drop(conn);
        result
    }
}

#[async_trait]
impl Pinger for SqliteTx {
    async fn ping(&self, ctx: &QueryContext) -> Result<(), SqlPreloadError> {
        let handle = self.handle().await?;
        run_blocking(&handle, ctx, |guard| {
            guard
                .query_row("SELECT 1", [], |_| Ok(()))
                .map_err(SqlPreloadError::SqliteError)
        })
        .await
    }
}

impl Drop for SqliteTx {
    fn drop(&mut self) {
        let Some(conn) = self.conn.get_mut().take() else {
            return;
        };
        let handle = Arc::clone(&*conn);
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                tracing::warn!("sqlite transaction dropped unfinished; rolling back");
                rt.spawn(async move {
                    let result =
                        run_blocking(&handle, &QueryContext::new(), rollback_with_busy_retries)
                            .await;
                    if result.is_err() {
                        handle.mark_broken();
                    }
                    drop(conn);
                });
            }
            Err(_) => {
                handle.mark_broken();
            }
        }
    }
}
