//! Statement-recording wrapper around any [`ConnPool`].
//!
//! Every statement that reaches the inner handle is appended to a shared log,
//! including statements issued inside transactions the wrapper begins. Statements
//! registered with [`RecordingConnPool::fail_on`] are answered with an error
//! without touching the database and are not logged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::conn::{ConnPool, Pinger, PreparedStatement, TxBeginner, TxCommitter, TxOptions};
use crate::context::QueryContext;
use crate::error::SqlPreloadError;
use crate::results::{ExecResult, ResultSet};
use crate::types::RowValues;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Ordered list of SQL strings seen by a recorder.
#[derive(Debug, Clone, Default)]
pub struct StatementLog(Arc<Mutex<Vec<String>>>);

impl StatementLog {
    fn push(&self, sql: &str) {
        lock(&self.0).push(sql.to_owned());
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    pub fn clear(&self) {
        lock(&self.0).clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when some logged statement contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        lock(&self.0).iter().any(|sql| sql.contains(needle))
    }
}

#[derive(Debug, Clone, Default)]
struct Faults(Arc<Mutex<HashMap<String, String>>>);

impl Faults {
    fn check(&self, sql: &str) -> Result<(), SqlPreloadError> {
        match lock(&self.0).get(sql) {
            Some(message) => {
                tracing::debug!(sql, "injected failure");
                Err(SqlPreloadError::ExecutionError(message.clone()))
            }
            None => Ok(()),
        }
    }
}

/// Recording, fault-injecting wrapper.
#[derive(Clone)]
pub struct RecordingConnPool {
    inner: Arc<dyn ConnPool>,
    log: StatementLog,
    faults: Faults,
}

impl RecordingConnPool {
    #[must_use]
    pub fn new(inner: Arc<dyn ConnPool>) -> Self {
        Self {
            inner,
            log: StatementLog::default(),
            faults: Faults::default(),
        }
    }

    /// Answer `sql` (exact text) with `ExecutionError(message)` from now on.
    #[must_use]
    pub fn fail_on(self, sql: impl Into<String>, message: impl Into<String>) -> Self {
        self.inject_failure(sql, message);
        self
    }

    pub fn inject_failure(&self, sql: impl Into<String>, message: impl Into<String>) {
        lock(&self.faults.0).insert(sql.into(), message.into());
    }

    pub fn clear_failures(&self) {
        lock(&self.faults.0).clear();
    }

    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.log.snapshot()
    }

    #[must_use]
    pub fn log(&self) -> &StatementLog {
        &self.log
    }
}

#[async_trait]
impl ConnPool for RecordingConnPool {
    async fn prepare(
        &self,
        ctx: &QueryContext,
        sql: &str,
    ) -> Result<PreparedStatement, SqlPreloadError> {
        self.log.push(sql);
        self.inner.prepare(ctx, sql).await
    }

    async fn exec(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecResult, SqlPreloadError> {
        self.faults.check(sql)?;
        self.log.push(sql);
        self.inner.exec(ctx, sql, params).await
    }

    async fn query(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlPreloadError> {
        self.faults.check(sql)?;
        self.log.push(sql);
        self.inner.query(ctx, sql, params).await
    }

    fn as_tx_beginner(&self) -> Option<&dyn TxBeginner> {
        self.inner.as_tx_beginner().map(|_| self as &dyn TxBeginner)
    }

    fn as_pinger(&self) -> Option<&dyn Pinger> {
        self.inner.as_pinger()
    }
}

#[async_trait]
impl TxBeginner for RecordingConnPool {
    async fn begin_tx(
        &self,
        ctx: &QueryContext,
        opts: &TxOptions,
    ) -> Result<Arc<dyn ConnPool>, SqlPreloadError> {
        let beginner = self.inner.as_tx_beginner().ok_or_else(|| {
            SqlPreloadError::InvalidTransaction("wrapped handle cannot begin".into())
        })?;
        let tx = beginner.begin_tx(ctx, opts).await?;
        Ok(Arc::new(RecordingTx {
            inner: tx,
            log: self.log.clone(),
            faults: self.faults.clone(),
        }))
    }
}

/// Transaction begun through a [`RecordingConnPool`]; logs into the same log.
pub struct RecordingTx {
    inner: Arc<dyn ConnPool>,
    log: StatementLog,
    faults: Faults,
}

#[async_trait]
impl ConnPool for RecordingTx {
    async fn prepare(
        &self,
        ctx: &QueryContext,
        sql: &str,
    ) -> Result<PreparedStatement, SqlPreloadError> {
        self.log.push(sql);
        self.inner.prepare(ctx, sql).await
    }

    async fn exec(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecResult, SqlPreloadError> {
        self.faults.check(sql)?;
        self.log.push(sql);
        self.inner.exec(ctx, sql, params).await
    }

    async fn query(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlPreloadError> {
        self.faults.check(sql)?;
        self.log.push(sql);
        self.inner.query(ctx, sql, params).await
    }

    // commit/rollback are forwarded without exposing the inner transaction
    fn as_tx_committer(&self) -> Option<&dyn TxCommitter> {
        self.inner.as_tx_committer()
    }

    fn as_pinger(&self) -> Option<&dyn Pinger> {
        self.inner.as_pinger()
    }
}
