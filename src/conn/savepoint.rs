use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::traits::{ConnPool, Pinger, PreparedStatement, TxCommitter};
use crate::context::QueryContext;
use crate::dialect::Dialect;
use crate::error::SqlPreloadError;
use crate::results::{ExecResult, ResultSet};
use crate::types::RowValues;

/// Nested transaction bound to a savepoint on its parent transaction.
pub struct SavepointTx {
    parent: Arc<dyn ConnPool>,
    name: String,
    dialect: Arc<dyn Dialect>,
    closed: AtomicBool,
}

impl SavepointTx {
    /// Issue `SAVEPOINT name` on `parent` and return the nested handle.
    ///
    /// # Errors
    /// Whatever the parent returns for the `SAVEPOINT` statement.
    pub async fn open(
        parent: Arc<dyn ConnPool>,
        dialect: Arc<dyn Dialect>,
        name: String,
        ctx: &QueryContext,
    ) -> Result<Self, SqlPreloadError> {
        parent.exec(ctx, &dialect.savepoint(&name), &[]).await?;
        tracing::info!(savepoint = %name, "savepoint opened");
        Ok(Self {
            parent,
            name,
            dialect,
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_open(&self) -> Result<(), SqlPreloadError> {
        if self.closed.load(Ordering::Acquire) {
            Err(SqlPreloadError::TransactionClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConnPool for SavepointTx {
    async fn prepare(
        &self,
        ctx: &QueryContext,
        sql: &str,
    ) -> Result<PreparedStatement, SqlPreloadError> {
        self.ensure_open()?;
        self.parent.prepare(ctx, sql).await
    }

    async fn exec(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecResult, SqlPreloadError> {
        self.ensure_open()?;
        self.parent.exec(ctx, sql, params).await
    }

    async fn query(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlPreloadError> {
        self.ensure_open()?;
        self.parent.query(ctx, sql, params).await
    }

    fn as_tx_committer(&self) -> Option<&dyn TxCommitter> {
        Some(self)
    }

    fn as_pinger(&self) -> Option<&dyn Pinger> {
        self.parent.as_pinger()
    }
}

#[async_trait]
impl TxCommitter for SavepointTx {
    async fn commit(&self) -> Result<(), SqlPreloadError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SqlPreloadError::TransactionClosed);
        }
        let ctx = QueryContext::new();
        self.parent
            .exec(&ctx, &self.dialect.release_savepoint(&self.name), &[])
            .await?;
        tracing::info!(savepoint = %self.name, "savepoint released");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), SqlPreloadError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SqlPreloadError::TransactionClosed);
        }
        let ctx = QueryContext::new();
        self.parent
            .exec(&ctx, &self.dialect.rollback_to_savepoint(&self.name), &[])
            .await?;
        self.parent
            .exec(&ctx, &self.dialect.release_savepoint(&self.name), &[])
            .await?;
        tracing::info!(savepoint = %self.name, "savepoint rolled back");
        Ok(())
    }
}
