use std::sync::Arc;

use async_trait::async_trait;

use crate::context::QueryContext;
use crate::error::SqlPreloadError;
use crate::results::{CustomDbRow, ExecResult, ResultSet};
use crate::types::RowValues;

/// Statement metadata returned by [`ConnPool::prepare`].
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub sql: Arc<str>,
    pub column_names: Vec<String>,
    pub param_count: usize,
}

/// Minimal statement interface every handle provides.
#[async_trait]
pub trait ConnPool: Send + Sync {
    /// Compile `sql` without running it.
    ///
    /// # Errors
    /// Driver error for invalid SQL, or a context error.
    async fn prepare(
        &self,
        ctx: &QueryContext,
        sql: &str,
    ) -> Result<PreparedStatement, SqlPreloadError>;

    /// Run a statement that returns no rows.
    ///
    /// # Errors
    /// Driver error, or `Cancelled` / `DeadlineExceeded`.
    async fn exec(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecResult, SqlPreloadError>;

    /// Run a statement and collect every row.
    ///
    /// # Errors
    /// Driver error, or `Cancelled` / `DeadlineExceeded`.
    async fn query(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlPreloadError>;

    /// First row of `query`, if any.
    ///
    /// # Errors
    /// Same as [`ConnPool::query`].
    async fn query_row(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Option<CustomDbRow>, SqlPreloadError> {
        Ok(self.query(ctx, sql, params).await?.into_first())
    }

    fn as_tx_beginner(&self) -> Option<&dyn TxBeginner> {
        None
    }

    fn as_tx_committer(&self) -> Option<&dyn TxCommitter> {
        None
    }

    fn as_pinger(&self) -> Option<&dyn Pinger> {
        None
    }
}

/// SQLite `BEGIN` flavour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxMode {
    #[default]
    Deferred,
    Immediate,
    Exclusive,
}

impl TxMode {
    #[must_use]
    pub fn begin_sql(self) -> &'static str {
        match self {
            TxMode::Deferred => "BEGIN",
            TxMode::Immediate => "BEGIN IMMEDIATE",
            TxMode::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TxOptions {
    pub mode: TxMode,
}

impl TxOptions {
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            mode: TxMode::Immediate,
        }
    }
}

#[async_trait]
pub trait TxBeginner: Send + Sync {
    /// Open a transaction and return the handle that owns it.
    ///
    /// # Errors
    /// Pool checkout or `BEGIN` failure.
    async fn begin_tx(
        &self,
        ctx: &QueryContext,
        opts: &TxOptions,
    ) -> Result<Arc<dyn ConnPool>, SqlPreloadError>;
}

/// A handle that is a transaction.
///
/// Calling either method a second time yields [`SqlPreloadError::TransactionClosed`].
#[async_trait]
pub trait TxCommitter: Send + Sync {
    async fn commit(&self) -> Result<(), SqlPreloadError>;
    async fn rollback(&self) -> Result<(), SqlPreloadError>;
}

#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, ctx: &QueryContext) -> Result<(), SqlPreloadError>;
}

/// Whether `conn` can commit and roll back.
#[must_use]
pub fn is_tx_committer(conn: &dyn ConnPool) -> bool {
    conn.as_tx_committer().is_some()
}
