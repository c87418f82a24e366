use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqlPreloadError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error(transparent)]
    DecodeError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    /// A single-row fetch (`first`, `take`) matched nothing.
    #[error("record not found")]
    RecordNotFound,

    #[error("unsupported relation `{name}` on model `{model}`")]
    UnknownAssociation { model: String, name: String },

    #[error("model `{0}` has no schema")]
    UnknownModel(String),

    /// Failure while loading one association path; `source` is the original error.
    #[error("preload `{path}` failed: {source}")]
    Preload {
        path: String,
        statement: Option<String>,
        source: Box<SqlPreloadError>,
    },

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("transaction has already been committed or rolled back")]
    TransactionClosed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),
}

impl SqlPreloadError {
    /// The innermost error once preload context has been peeled off.
    #[must_use]
    pub fn root_cause(&self) -> &SqlPreloadError {
        let mut current = self;
        while let SqlPreloadError::Preload { source, .. } = current {
            current = source;
        }
        current
    }

    /// True only for "no record matched", never for a failed statement.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), SqlPreloadError::RecordNotFound)
    }

    /// Redundant commit/rollback on an already finished transaction.
    ///
    /// Callers may ignore these; the transaction is closed either way.
    #[must_use]
    pub fn is_benign(&self) -> bool {
        matches!(self.root_cause(), SqlPreloadError::TransactionClosed)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.root_cause(),
            SqlPreloadError::Cancelled | SqlPreloadError::DeadlineExceeded
        )
    }

    /// Association path that was being loaded when the error happened, if any.
    #[must_use]
    pub fn preload_path(&self) -> Option<&str> {
        match self {
            SqlPreloadError::Preload { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Statement that failed during preload, if the failure came from the driver.
    #[must_use]
    pub fn failed_statement(&self) -> Option<&str> {
        match self {
            SqlPreloadError::Preload { statement, .. } => statement.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn in_preload(self, path: &str, statement: Option<&str>) -> Self {
        SqlPreloadError::Preload {
            path: path.to_owned(),
            statement: statement.map(str::to_owned),
            source: Box::new(self),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<bb8::RunError<SqlPreloadError>> for SqlPreloadError {
    fn from(err: bb8::RunError<SqlPreloadError>) -> Self {
        match err {
            bb8::RunError::User(inner) => inner,
            bb8::RunError::TimedOut => {
                SqlPreloadError::ConnectionError("SQLite pool checkout timed out".into())
            }
        }
    }
}
