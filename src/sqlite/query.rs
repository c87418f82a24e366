use std::sync::Arc;

use rusqlite::types::Value;

use super::params::Params;
use crate::conn::PreparedStatement;
use crate::error::SqlPreloadError;
use crate::results::{ExecResult, ResultSet};
use crate::types::RowValues;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
///
/// Returns `SqlPreloadError` if the value cannot be read.
pub fn sqlite_extract_value_sync(
    row: &rusqlite::Row,
    idx: usize,
) -> Result<RowValues, SqlPreloadError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

/// Run `sql` and collect its rows. Blocking.
///
/// # Errors
/// Driver error from prepare, bind or step.
pub fn build_result_set(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &Params,
) -> Result<ResultSet, SqlPreloadError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(Arc::new(column_names));

    let mut rows_iter = stmt.query(&params.as_refs()[..])?;
    while let Some(row) = rows_iter.next()? {
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(sqlite_extract_value_sync(row, i)?);
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}

/// Run a DML statement. Blocking.
///
/// # Errors
/// Driver error, including `ExecuteReturnedResults` for row-returning SQL.
pub fn execute_dml(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &Params,
) -> Result<ExecResult, SqlPreloadError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows_affected = stmt.execute(&params.as_refs()[..])?;
    let is_insert = sql
        .trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("insert"));
    Ok(ExecResult {
        rows_affected,
        last_insert_id: is_insert.then(|| conn.last_insert_rowid()),
    })
}

/// Compile `sql` and report its shape. Blocking.
///
/// # Errors
/// Driver error for invalid SQL.
pub fn describe(conn: &rusqlite::Connection, sql: &str) -> Result<PreparedStatement, SqlPreloadError> {
    let stmt = conn.prepare_cached(sql)?;
    Ok(PreparedStatement {
        sql: Arc::from(sql),
        column_names: stmt
            .column_names()
            .iter()
            .map(std::string::ToString::to_string)
            .collect(),
        param_count: stmt.parameter_count(),
    })
}
