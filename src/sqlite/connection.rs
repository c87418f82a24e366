use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rusqlite::InterruptHandle;
use tokio::sync::Mutex;

use super::config::SqliteOptions;
use crate::context::QueryContext;
use crate::error::SqlPreloadError;

const ROLLBACK_BUSY_RETRIES: &[Duration] = &[
    Duration::from_millis(10),
    Duration::from_millis(25),
    Duration::from_millis(50),
];

/// One rusqlite connection plus the bits needed to interrupt and retire it.
pub struct SqliteHandle {
    conn: Mutex<rusqlite::Connection>,
    interrupt: InterruptHandle,
    broken: AtomicBool,
}

impl SqliteHandle {
    /// Open a connection and apply pragmas from `opts`. Blocking.
    ///
    /// # Errors
    /// Driver error while opening or configuring the file.
    pub fn open(opts: &SqliteOptions) -> Result<Self, SqlPreloadError> {
        let conn = rusqlite::Connection::open(&opts.db_path)?;
        conn.busy_timeout(opts.busy_timeout)?;
        if opts.wal {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        let interrupt = conn.get_interrupt_handle();
        tracing::debug!(path = %opts.db_path, wal = opts.wal, "sqlite connection opened");
        Ok(Self {
            conn: Mutex::new(conn),
            interrupt,
            broken: AtomicBool::new(false),
        })
    }

    /// Retire this connection; the pool drops it instead of reusing it.
    pub fn mark_broken(&self) {
        self.broken.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    pub(crate) fn interrupt(&self) {
        self.interrupt.interrupt();
    }
}

impl fmt::Debug for SqliteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteHandle")
            .field("broken", &self.is_broken())
            .finish_non_exhaustive()
    }
}

/// Run `func` against the connection on the blocking pool, racing `ctx`.
///
/// When the context finishes first the running statement is interrupted and
/// the handle is retired: the abandoned task may still change connection state.
pub(crate) async fn run_blocking<F, R>(
    handle: &Arc<SqliteHandle>,
    ctx: &QueryContext,
    func: F,
) -> Result<R, SqlPreloadError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqlPreloadError> + Send + 'static,
    R: Send + 'static,
{
    ctx.check()?;
    let worker = Arc::clone(handle);
    let task_ctx = ctx.clone();
    let task = tokio::task::spawn_blocking(move || {
        let mut guard = worker.conn.blocking_lock();
        task_ctx.check()?;
        func(&mut guard)
    });

    tokio::select! {
        joined = task => joined.map_err(|e| {
            SqlPreloadError::ExecutionError(format!("sqlite spawn_blocking join error: {e}"))
        })?,
        err = ctx.done() => {
            handle.interrupt();
            handle.mark_broken();
            tracing::debug!(error = %err, "sqlite task abandoned; connection retired");
            Err(err)
        }
    }
}

/// `ROLLBACK`, retrying briefly while the database reports busy. Blocking.
pub(crate) fn rollback_with_busy_retries(
    conn: &mut rusqlite::Connection,
) -> Result<(), SqlPreloadError> {
    if conn.is_autocommit() {
        // nothing open; SQLite already rolled back
        return Ok(());
    }

    for (idx, delay) in ROLLBACK_BUSY_RETRIES.iter().copied().enumerate() {
        match conn.execute_batch("ROLLBACK") {
            Ok(()) => return Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::DatabaseBusy
                    && idx + 1 < ROLLBACK_BUSY_RETRIES.len() =>
            {
                thread::sleep(delay);
            }
            Err(e) => return Err(SqlPreloadError::SqliteError(e)),
        }
    }

    Err(SqlPreloadError::ExecutionError(
        "rollback retries exhausted".into(),
    ))
}
