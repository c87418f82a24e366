//! Convenient imports for common functionality.

pub use crate::conn::{
    ConnHandle, ConnPool, Pinger, SavepointTx, TxBeginner, TxCommitter, TxMode, TxOptions,
    is_tx_committer,
};
pub use crate::context::QueryContext;
pub use crate::dialect::{Dialect, SqliteDialect};
pub use crate::error::SqlPreloadError;
pub use crate::preload::{ASSOCIATIONS, PreloadCondition, PreloadDirective, PreloadScope};
pub use crate::record::{Record, Related};
pub use crate::recorder::{RecordingConnPool, StatementLog};
pub use crate::results::{CustomDbRow, ExecResult, ResultSet};
pub use crate::schema::{
    Association, AssociationKind, ColumnType, JoinTable, Model, Schema, SchemaBuilder,
};
pub use crate::session::{Fetched, Session, SessionConfig, SessionFlags};
pub use crate::statement::Condition;
pub use crate::types::{JoinKey, RowValues};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteOptions, SqliteOptionsBuilder, SqlitePool, SqliteTx};
