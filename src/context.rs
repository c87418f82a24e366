use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SqlPreloadError;

/// Cancellation scope carried by a session and passed to every handle call.
///
/// Cloning shares the token: cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl QueryContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Tighten the deadline; an earlier existing deadline is kept.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Child context: cancelled with this one, but cancelling it leaves the parent alone.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail fast when the context is already done.
    ///
    /// # Errors
    /// `Cancelled` or `DeadlineExceeded`.
    pub fn check(&self) -> Result<(), SqlPreloadError> {
        if self.cancel.is_cancelled() {
            return Err(SqlPreloadError::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(SqlPreloadError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolves with the reason once the context is done; pending forever otherwise.
    pub async fn done(&self) -> SqlPreloadError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = self.cancel.cancelled() => SqlPreloadError::Cancelled,
                () = tokio::time::sleep_until(deadline) => SqlPreloadError::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                SqlPreloadError::Cancelled
            }
        }
    }

    /// Race `fut` against this context.
    ///
    /// # Errors
    /// The future's own error, or the context error if it finishes first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, SqlPreloadError>
    where
        F: Future<Output = Result<T, SqlPreloadError>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            res = fut => res,
        }
    }
}
