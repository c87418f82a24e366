//! Swappable connection handles and nested association preloading.
//!
//! A [`Session`] talks to an `Arc<dyn ConnPool>` that may be a pool, a live
//! transaction, a savepoint, or any caller-supplied wrapper. On top of that the
//! preload engine loads has-one, has-many, belongs-to and many-to-many
//! associations across any depth, one batched statement per association.
//!
//! ```rust,no_run
//! use sql_preload::prelude::*;
//! # use serde::{Deserialize, Serialize};
//! # #[derive(Serialize, Deserialize)] struct User { id: i64, name: String, pets: Vec<Pet> }
//! # #[derive(Serialize, Deserialize)] struct Pet { id: i64, user_id: i64 }
//! # impl Model for User {
//! #     fn schema() -> Schema {
//! #         Schema::builder("User", "users")
//! #             .column("name", ColumnType::Text)
//! #             .has_many::<Pet>("pets", "user_id")
//! #             .build()
//! #     }
//! # }
//! # impl Model for Pet {
//! #     fn schema() -> Schema {
//! #         Schema::builder("Pet", "pets").column("user_id", ColumnType::Integer).build()
//! #     }
//! # }
//! # async fn demo() -> Result<(), SqlPreloadError> {
//! let db = Session::connect_sqlite(SqliteOptions::new("app.db")).await?;
//! let users: Vec<User> = db.preload("pets").find().await?;
//! # let _ = users;
//! # Ok(())
//! # }
//! ```

pub mod conn;
pub mod context;
pub mod dialect;
pub mod error;
pub mod preload;
pub mod prelude;
pub mod record;
pub mod recorder;
pub mod results;
pub mod schema;
pub mod session;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod statement;
pub mod types;

pub use conn::{ConnHandle, ConnPool, TxBeginner, TxCommitter, TxOptions, is_tx_committer};
pub use context::QueryContext;
pub use error::SqlPreloadError;
pub use preload::{ASSOCIATIONS, PreloadCondition, PreloadScope};
pub use record::{Record, Related};
pub use results::{CustomDbRow, ExecResult, ResultSet};
pub use schema::{Model, Schema};
pub use session::{Session, SessionConfig};
pub use types::RowValues;
