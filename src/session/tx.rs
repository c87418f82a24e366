use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::{Session, StatementState};
use crate::conn::{ConnPool, SavepointTx, TxCommitter, TxOptions};
use crate::error::SqlPreloadError;

impl Session {
    /// Start a transaction (or a savepoint when already inside one).
    ///
    /// # Errors
    /// `InvalidTransaction` when the handle can do neither; driver failure.
    pub async fn begin(&self) -> Result<Session, SqlPreloadError> {
        self.begin_with(TxOptions::default()).await
    }

    /// # Errors
    /// Same as [`begin`](Self::begin).
    pub async fn begin_with(&self, opts: TxOptions) -> Result<Session, SqlPreloadError> {
        let conn: Arc<dyn ConnPool> = if self.conn.as_tx_committer().is_some() {
            let n = self.shared.savepoints.fetch_add(1, Ordering::Relaxed) + 1;
            let savepoint = SavepointTx::open(
                Arc::clone(&self.conn),
                Arc::clone(&self.shared.dialect),
                format!("sp_{n}"),
                &self.ctx,
            )
            .await?;
            Arc::new(savepoint)
        } else if let Some(beginner) = self.conn.as_tx_beginner() {
            beginner.begin_tx(&self.ctx, &opts).await?
        } else {
            return Err(SqlPreloadError::InvalidTransaction(
                "connection handle cannot begin a transaction".into(),
            ));
        };

        let mut tx = self.clone();
        tx.conn = conn;
        if tx.flags.new_db {
            tx.statement = StatementState::default();
        }
        Ok(tx)
    }

    fn committer(&self) -> Result<&dyn TxCommitter, SqlPreloadError> {
        self.conn.as_tx_committer().ok_or_else(|| {
            SqlPreloadError::InvalidTransaction("session is not bound to a transaction".into())
        })
    }

    /// # Errors
    /// `InvalidTransaction` outside a transaction, `TransactionClosed` when
    /// already finished, or the driver's commit error.
    pub async fn commit(&self) -> Result<(), SqlPreloadError> {
        self.committer()?.commit().await
    }

    /// # Errors
    /// `InvalidTransaction` outside a transaction; `TransactionClosed` (benign)
    /// when already finished; the driver's rollback error.
    pub async fn rollback(&self) -> Result<(), SqlPreloadError> {
        self.committer()?.rollback().await
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// A failed rollback is logged; the closure's error is what the caller gets.
    ///
    /// # Errors
    /// Begin or commit failure, or the closure's error.
    pub async fn transaction<F, Fut, T>(&self, f: F) -> Result<T, SqlPreloadError>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, SqlPreloadError>>,
    {
        let tx = self.begin().await?;
        match f(tx.clone()).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await
                    && !rollback_err.is_benign()
                {
                    tracing::warn!(error = %rollback_err, "rollback after failed transaction body failed");
                }
                Err(err)
            }
        }
    }
}
