//! Sessions: the caller-facing entry point.
//!
//! A [`Session`] is a cheap, cloneable value holding a connection handle, flags,
//! accumulated statement state and a [`QueryContext`]. Every builder method
//! returns a new session; terminal operations never mutate the receiver.

mod tx;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::conn::{ConnPool, is_tx_committer};
use crate::context::QueryContext;
use crate::dialect::{Dialect, SqliteDialect};
use crate::error::SqlPreloadError;
use crate::preload::{
    PreloadCondition, PreloadDirective, PreloadExecutor, PreloadScope, resolve,
};
use crate::record::Record;
use crate::results::{ExecResult, ResultSet};
use crate::schema::{Model, Registry, Schema};
use crate::statement::{
    ColumnRef, Condition, SelectStatement, delete_sql, insert_sql, update_sql, upsert_sql,
};
use crate::types::RowValues;

struct Shared {
    registry: Registry,
    dialect: Arc<dyn Dialect>,
    savepoints: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionFlags {
    /// Derived sessions (and transactions begun from them) start without
    /// inherited conditions.
    pub new_db: bool,
    /// Ignore soft-delete scopes for the root query and every preload.
    pub unscoped: bool,
}

/// Options for [`Session::session`].
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub new_db: bool,
    pub context: Option<QueryContext>,
}

#[derive(Debug, Clone, Default)]
struct StatementState {
    conditions: Vec<Condition>,
    order: Vec<String>,
    limit: Option<usize>,
    select: Option<String>,
    preloads: Vec<PreloadDirective>,
}

/// Root records plus the preload error, if any, that cut the pass short.
#[derive(Debug)]
pub struct Fetched {
    pub records: Vec<Record>,
    pub preload_error: Option<SqlPreloadError>,
}

impl Fetched {
    /// # Errors
    /// The preload error, discarding partial results.
    pub fn into_result(self) -> Result<Vec<Record>, SqlPreloadError> {
        match self.preload_error {
            Some(err) => Err(err),
            None => Ok(self.records),
        }
    }
}

#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
    conn: Arc<dyn ConnPool>,
    flags: SessionFlags,
    statement: StatementState,
    ctx: QueryContext,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("dialect", &self.shared.dialect.name())
            .field("flags", &self.flags)
            .field("in_transaction", &self.is_in_transaction())
            .field("preloads", &self.statement.preloads.len())
            .finish_non_exhaustive()
    }
}

pub struct SessionBuilder {
    conn: Arc<dyn ConnPool>,
    dialect: Arc<dyn Dialect>,
    ctx: QueryContext,
}

impl SessionBuilder {
    #[must_use]
    pub fn dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
        self.dialect = dialect;
        self
    }

    #[must_use]
    pub fn context(mut self, ctx: QueryContext) -> Self {
        self.ctx = ctx;
        self
    }

    #[must_use]
    pub fn build(self) -> Session {
        Session {
            shared: Arc::new(Shared {
                registry: Registry::new(),
                dialect: self.dialect,
                savepoints: AtomicUsize::new(0),
            }),
            conn: self.conn,
            flags: SessionFlags::default(),
            statement: StatementState::default(),
            ctx: self.ctx,
        }
    }
}

impl Session {
    /// Root session over `conn` with the SQLite dialect.
    #[must_use]
    pub fn open(conn: Arc<dyn ConnPool>) -> Self {
        Self::builder(conn).build()
    }

    #[must_use]
    pub fn builder(conn: Arc<dyn ConnPool>) -> SessionBuilder {
        SessionBuilder {
            conn,
            dialect: Arc::new(SqliteDialect),
            ctx: QueryContext::new(),
        }
    }

    /// Open a `SQLite` pool and wrap it in a root session.
    ///
    /// # Errors
    /// Pool configuration or connection failure.
    #[cfg(feature = "sqlite")]
    pub async fn connect_sqlite(
        opts: crate::sqlite::SqliteOptions,
    ) -> Result<Self, SqlPreloadError> {
        let pool = crate::sqlite::SqlitePool::new(opts).await?;
        Ok(Self::open(Arc::new(pool)))
    }

    #[must_use]
    pub fn conn(&self) -> &Arc<dyn ConnPool> {
        &self.conn
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        self.shared.dialect.as_ref()
    }

    #[must_use]
    pub fn context(&self) -> &QueryContext {
        &self.ctx
    }

    #[must_use]
    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        is_tx_committer(self.conn.as_ref())
    }

    #[must_use]
    pub fn schema_of<M: Model>(&self) -> Arc<Schema> {
        self.shared.registry.schema_of::<M>()
    }

    fn derive(&self, f: impl FnOnce(&mut Session)) -> Session {
        let mut next = self.clone();
        f(&mut next);
        next
    }

    // ---- builders -------------------------------------------------------

    /// Raw `WHERE` term with `?` placeholders.
    #[must_use]
    pub fn filter(&self, sql: &str, params: &[RowValues]) -> Session {
        self.derive(|s| {
            s.statement
                .conditions
                .push(Condition::raw(sql, params.to_vec()));
        })
    }

    #[must_use]
    pub fn eq(&self, column: &str, value: impl Into<RowValues>) -> Session {
        let cond = Condition::eq(column, value);
        self.derive(|s| s.statement.conditions.push(cond))
    }

    #[must_use]
    pub fn is_in(&self, column: &str, values: Vec<RowValues>) -> Session {
        let cond = Condition::is_in(ColumnRef::new(column), values);
        self.derive(|s| s.statement.conditions.push(cond))
    }

    /// Raw `ORDER BY` term.
    #[must_use]
    pub fn order(&self, term: &str) -> Session {
        self.derive(|s| s.statement.order.push(term.to_owned()))
    }

    #[must_use]
    pub fn limit(&self, limit: usize) -> Session {
        self.derive(|s| s.statement.limit = Some(limit))
    }

    /// Raw select list for the root query.
    #[must_use]
    pub fn select(&self, columns: &str) -> Session {
        self.derive(|s| s.statement.select = Some(columns.to_owned()))
    }

    /// Preload a dotted association path. `"*"` segments expand to every association.
    #[must_use]
    pub fn preload(&self, path: &str) -> Session {
        self.preload_with(path, Vec::new())
    }

    #[must_use]
    pub fn preload_with(&self, path: &str, conditions: Vec<PreloadCondition>) -> Session {
        let directive = PreloadDirective::with_conditions(path, conditions);
        self.derive(|s| s.statement.preloads.push(directive))
    }

    #[must_use]
    pub fn preload_scope<F>(&self, path: &str, scope: F) -> Session
    where
        F: Fn(PreloadScope) -> PreloadScope + Send + Sync + 'static,
    {
        self.preload_with(path, vec![PreloadCondition::scope(scope)])
    }

    /// Drop soft-delete scoping (and make `delete` permanent).
    #[must_use]
    pub fn unscoped(&self) -> Session {
        self.derive(|s| s.flags.unscoped = true)
    }

    #[must_use]
    pub fn session(&self, config: SessionConfig) -> Session {
        self.derive(|s| {
            if config.new_db {
                s.flags.new_db = true;
                s.statement = StatementState::default();
            }
            if let Some(ctx) = config.context {
                s.ctx = ctx;
            }
        })
    }

    #[must_use]
    pub fn with_context(&self, ctx: QueryContext) -> Session {
        self.derive(|s| s.ctx = ctx)
    }

    // ---- reads ----------------------------------------------------------

    /// Root query plus preloads, keeping partial results on preload failure.
    ///
    /// # Errors
    /// Resolution errors (before any statement) and root query errors.
    pub async fn fetch<M: Model>(&self) -> Result<Fetched, SqlPreloadError> {
        self.fetch_with::<M>(false, self.statement.limit).await
    }

    async fn fetch_with<M: Model>(
        &self,
        order_by_key: bool,
        limit: Option<usize>,
    ) -> Result<Fetched, SqlPreloadError> {
        let schema = self.schema_of::<M>();
        let plan = resolve(&self.shared.registry, &schema, &self.statement.preloads)?;
        let dialect = self.dialect();

        let mut stmt = SelectStatement::new(&schema.table)
            .columns(self.statement.select.as_deref())
            .filters(self.statement.conditions.iter().cloned());
        if !self.flags.unscoped {
            stmt = stmt.soft_delete(schema.soft_delete.as_deref());
        }
        for term in &self.statement.order {
            stmt = stmt.order(term);
        }
        if order_by_key {
            stmt = stmt.order(&dialect.qualify(&schema.table, &schema.primary_key));
        }
        let (sql, params) = stmt.limit(limit).build(dialect);

        let rows = self.conn.query(&self.ctx, &sql, &params).await?;
        let mut records: Vec<Record> = rows
            .results
            .iter()
            .map(|row| Record::from_row(Arc::clone(&schema), row))
            .collect();

        let preload_error = PreloadExecutor::new(self.conn.as_ref(), dialect, &self.ctx)
            .unscoped(self.flags.unscoped)
            .run(&plan, &mut records)
            .await
            .err();
        if let Some(err) = &preload_error {
            tracing::warn!(model = %schema.name, error = %err, "preload failed; returning partial graph");
        }
        Ok(Fetched {
            records,
            preload_error,
        })
    }

    /// # Errors
    /// Resolution, root query, preload or decode failure.
    pub async fn find_records<M: Model>(&self) -> Result<Vec<Record>, SqlPreloadError> {
        self.fetch::<M>().await?.into_result()
    }

    /// # Errors
    /// Resolution, root query, preload or decode failure.
    pub async fn find<M: Model>(&self) -> Result<Vec<M>, SqlPreloadError> {
        let mut out = Vec::new();
        self.find_into(&mut out).await?;
        Ok(out)
    }

    /// Like [`find`](Self::find), but `out` receives the partial graph even
    /// when a preload fails.
    ///
    /// # Errors
    /// Same as [`find`](Self::find).
    pub async fn find_into<M: Model>(&self, out: &mut Vec<M>) -> Result<(), SqlPreloadError> {
        let fetched = self.fetch::<M>().await?;
        *out = fetched
            .records
            .iter()
            .map(Record::decode::<M>)
            .collect::<Result<_, _>>()?;
        fetched.preload_error.map_or(Ok(()), Err)
    }

    /// First row by primary key.
    ///
    /// # Errors
    /// `RecordNotFound` when nothing matches, otherwise as [`find`](Self::find).
    pub async fn first<M: Model>(&self) -> Result<M, SqlPreloadError> {
        let fetched = self.fetch_with::<M>(true, Some(1)).await?;
        single(fetched)
    }

    /// # Errors
    /// `RecordNotFound` (leaving `out` untouched) or a preload error after
    /// `out` has been filled with what did load.
    pub async fn first_into<M: Model>(&self, out: &mut M) -> Result<(), SqlPreloadError> {
        let fetched = self.fetch_with::<M>(true, Some(1)).await?;
        single_into(fetched, out)
    }

    /// One row, no ordering.
    ///
    /// # Errors
    /// Same as [`first`](Self::first).
    pub async fn take<M: Model>(&self) -> Result<M, SqlPreloadError> {
        let fetched = self.fetch_with::<M>(false, Some(1)).await?;
        single(fetched)
    }

    /// # Errors
    /// Same as [`first_into`](Self::first_into).
    pub async fn take_into<M: Model>(&self, out: &mut M) -> Result<(), SqlPreloadError> {
        let fetched = self.fetch_with::<M>(false, Some(1)).await?;
        single_into(fetched, out)
    }

    /// First row of `M` decoded into another shape, such as a struct that
    /// flattens `M` and adds extra selected columns.
    ///
    /// # Errors
    /// Same as [`first`](Self::first).
    pub async fn first_as<M: Model, T: DeserializeOwned>(&self) -> Result<T, SqlPreloadError> {
        let fetched = self.fetch_with::<M>(true, Some(1)).await?;
        single(fetched)
    }

    /// # Errors
    /// Same as [`find`](Self::find).
    pub async fn find_as<M: Model, T: DeserializeOwned>(&self) -> Result<Vec<T>, SqlPreloadError> {
        self.fetch::<M>()
            .await?
            .into_result()?
            .iter()
            .map(Record::decode::<T>)
            .collect()
    }

    // ---- writes ---------------------------------------------------------

    /// Insert `model`, filling timestamps and an auto-increment key back in.
    ///
    /// # Errors
    /// Encoding or driver failure.
    pub async fn create<M: Model>(&self, model: &mut M) -> Result<ExecResult, SqlPreloadError> {
        let schema = self.schema_of::<M>();
        let mut record = Record::from_model(Arc::clone(&schema), model)?;
        let now = RowValues::Timestamp(Utc::now().naive_utc());
        for column in [schema.created_at.as_deref(), schema.updated_at.as_deref()]
            .into_iter()
            .flatten()
        {
            if record.get(column).is_none_or(RowValues::is_null) {
                record.set(column, now.clone());
            }
        }
        let result = self.insert_record(&schema, &record, false).await?;
        if record.primary_key().is_none_or(RowValues::is_zero)
            && let Some(id) = result.last_insert_id
        {
            record.set(&schema.primary_key, RowValues::Int(id));
        }
        write_back(model, &record)?;
        Ok(result)
    }

    /// Update by primary key. Inserts when the key is unset; upserts when no
    /// live row matched, which revives a soft-deleted row.
    ///
    /// # Errors
    /// Encoding or driver failure.
    pub async fn save<M: Model>(&self, model: &mut M) -> Result<ExecResult, SqlPreloadError> {
        let schema = self.schema_of::<M>();
        let mut record = Record::from_model(Arc::clone(&schema), model)?;
        let Some(key) = record.primary_key().filter(|k| !k.is_zero()).cloned() else {
            return self.create(model).await;
        };

        let now = RowValues::Timestamp(Utc::now().naive_utc());
        if let Some(column) = schema.updated_at.as_deref() {
            record.set(column, now.clone());
        }
        if let Some(column) = schema.created_at.as_deref()
            && record.get(column).is_none_or(RowValues::is_null)
        {
            record.set(column, now);
        }

        let (columns, mut params): (Vec<&str>, Vec<RowValues>) = record
            .values()
            .iter()
            .filter(|(name, _)| *name != schema.primary_key)
            .map(|(name, value)| (name.as_str(), value.clone()))
            .unzip();
        params.push(key);
        let soft = if self.flags.unscoped {
            None
        } else {
            schema.soft_delete.as_deref()
        };
        let sql = update_sql(self.dialect(), &schema.table, &columns, &schema.primary_key, soft);
        let result = self.conn.exec(&self.ctx, &sql, &params).await?;

        // no live row: the key is free, or held by a soft-deleted row
        let result = if result.rows_affected == 0 {
            self.insert_record(&schema, &record, true).await?
        } else {
            result
        };
        write_back(model, &record)?;
        Ok(result)
    }

    /// Soft delete when the model has a soft-delete column (and the session is
    /// scoped), hard delete otherwise.
    ///
    /// # Errors
    /// `ParameterError` when the model has no key; driver failure.
    pub async fn delete<M: Model>(&self, model: &M) -> Result<ExecResult, SqlPreloadError> {
        let schema = self.schema_of::<M>();
        let record = Record::from_model(Arc::clone(&schema), model)?;
        let key = record
            .primary_key()
            .filter(|k| !k.is_zero())
            .cloned()
            .ok_or_else(|| {
                SqlPreloadError::ParameterError(format!(
                    "cannot delete `{}` without a primary key",
                    schema.name
                ))
            })?;
        let soft = if self.flags.unscoped {
            None
        } else {
            schema.soft_delete.as_deref()
        };
        let sql = delete_sql(self.dialect(), &schema.table, &schema.primary_key, soft);
        let params = match soft {
            Some(_) => vec![RowValues::Timestamp(Utc::now().naive_utc()), key],
            None => vec![key],
        };
        self.conn.exec(&self.ctx, &sql, &params).await
    }

    async fn insert_record(
        &self,
        schema: &Schema,
        record: &Record,
        upsert: bool,
    ) -> Result<ExecResult, SqlPreloadError> {
        let (columns, params): (Vec<&str>, Vec<RowValues>) = record
            .values()
            .iter()
            .filter(|(name, value)| *name != schema.primary_key || !value.is_zero())
            .map(|(name, value)| (name.as_str(), value.clone()))
            .unzip();
        let sql = if upsert {
            upsert_sql(self.dialect(), &schema.table, &columns, &schema.primary_key)
        } else {
            insert_sql(self.dialect(), &schema.table, &columns)
        };
        self.conn.exec(&self.ctx, &sql, &params).await
    }

    // ---- raw ------------------------------------------------------------

    /// # Errors
    /// Driver failure.
    pub async fn exec(&self, sql: &str, params: &[RowValues]) -> Result<ExecResult, SqlPreloadError> {
        self.conn.exec(&self.ctx, sql, params).await
    }

    /// # Errors
    /// Driver failure.
    pub async fn raw_query(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlPreloadError> {
        self.conn.query(&self.ctx, sql, params).await
    }

    /// # Errors
    /// `Unimplemented` when the handle cannot ping; driver failure otherwise.
    pub async fn ping(&self) -> Result<(), SqlPreloadError> {
        match self.conn.as_pinger() {
            Some(pinger) => pinger.ping(&self.ctx).await,
            None => Err(SqlPreloadError::Unimplemented(
                "connection handle does not support ping".into(),
            )),
        }
    }
}

fn single<T: DeserializeOwned>(fetched: Fetched) -> Result<T, SqlPreloadError> {
    let first = fetched
        .records
        .first()
        .ok_or(SqlPreloadError::RecordNotFound)?;
    if let Some(err) = fetched.preload_error {
        return Err(err);
    }
    first.decode()
}

fn single_into<T: DeserializeOwned>(fetched: Fetched, out: &mut T) -> Result<(), SqlPreloadError> {
    let first = fetched
        .records
        .first()
        .ok_or(SqlPreloadError::RecordNotFound)?;
    *out = first.decode()?;
    fetched.preload_error.map_or(Ok(()), Err)
}

/// Copy column values from `record` into `model`, keeping its other fields.
fn write_back<M: Model>(model: &mut M, record: &Record) -> Result<(), SqlPreloadError> {
    let mut json = serde_json::to_value(&*model)?;
    if let JsonValue::Object(map) = &mut json {
        for (name, value) in record.values() {
            if map.contains_key(name) {
                map.insert(name.clone(), value.to_json());
            }
        }
    }
    *model = serde_json::from_value(json)?;
    Ok(())
}
