//! Connection handles.
//!
//! Everything a session talks to is an `Arc<dyn ConnPool>`: a pool, a live
//! transaction, a savepoint, or a caller-supplied wrapper around any of those.
//! Optional capabilities (beginning, committing, pinging) are advertised through
//! accessor methods so wrappers can forward them without exposing the inner type.

mod savepoint;
mod traits;

pub use savepoint::SavepointTx;
pub use traits::{
    ConnPool, Pinger, PreparedStatement, TxBeginner, TxCommitter, TxMode, TxOptions,
    is_tx_committer,
};

/// Shared handle type held by sessions.
pub type ConnHandle = std::sync::Arc<dyn ConnPool>;
