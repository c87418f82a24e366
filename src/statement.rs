//! Just enough SQL building for sessions and the preload executor.

use crate::dialect::Dialect;
use crate::types::RowValues;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
}

impl ColumnRef {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            table: None,
            name: name.to_owned(),
        }
    }

    #[must_use]
    pub fn qualified(table: &str, name: &str) -> Self {
        Self {
            table: Some(table.to_owned()),
            name: name.to_owned(),
        }
    }

    fn render(&self, dialect: &dyn Dialect) -> String {
        match &self.table {
            Some(table) => dialect.qualify(table, &self.name),
            None => dialect.quote(&self.name),
        }
    }
}

/// One `WHERE` term.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Caller SQL with `?` placeholders.
    Raw { sql: String, params: Vec<RowValues> },
    Eq { column: ColumnRef, value: RowValues },
    /// Renders `= ?` for one value and `IN (NULL)` (matches nothing) for none.
    In { column: ColumnRef, values: Vec<RowValues> },
}

impl Condition {
    #[must_use]
    pub fn raw(sql: &str, params: Vec<RowValues>) -> Self {
        Condition::Raw {
            sql: sql.to_owned(),
            params,
        }
    }

    #[must_use]
    pub fn eq(column: &str, value: impl Into<RowValues>) -> Self {
        Condition::Eq {
            column: ColumnRef::new(column),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn is_in(column: ColumnRef, values: Vec<RowValues>) -> Self {
        Condition::In { column, values }
    }

    fn render(
        &self,
        dialect: &dyn Dialect,
        wrap_raw: bool,
        out: &mut String,
        params: &mut Vec<RowValues>,
    ) {
        match self {
            Condition::Raw { sql, params: p } => {
                if wrap_raw && has_connective(sql) {
                    out.push('(');
                    out.push_str(sql);
                    out.push(')');
                } else {
                    out.push_str(sql);
                }
                params.extend(p.iter().cloned());
            }
            Condition::Eq { column, value } => {
                out.push_str(&column.render(dialect));
                if value.is_null() {
                    out.push_str(" IS NULL");
                } else {
                    out.push_str(" = ");
                    out.push_str(&dialect.bind_var(params.len() + 1));
                    params.push(value.clone());
                }
            }
            Condition::In { column, values } => {
                out.push_str(&column.render(dialect));
                match values.as_slice() {
                    [] => out.push_str(" IN (NULL)"),
                    [single] => {
                        out.push_str(" = ");
                        out.push_str(&dialect.bind_var(params.len() + 1));
                        params.push(single.clone());
                    }
                    many => {
                        out.push_str(" IN (");
                        for (i, v) in many.iter().enumerate() {
                            if i > 0 {
                                out.push(',');
                            }
                            out.push_str(&dialect.bind_var(params.len() + 1));
                            params.push(v.clone());
                        }
                        out.push(')');
                    }
                }
            }
        }
    }
}

/// True when `sql` contains `AND` / `OR` as a word, whatever surrounds it.
fn has_connective(sql: &str) -> bool {
    sql.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|word| word.eq_ignore_ascii_case("or") || word.eq_ignore_ascii_case("and"))
}

fn render_where(
    dialect: &dyn Dialect,
    conditions: &[Condition],
    soft_delete: Option<&ColumnRef>,
    out: &mut String,
    params: &mut Vec<RowValues>,
) {
    let total = conditions.len() + usize::from(soft_delete.is_some());
    if total == 0 {
        return;
    }
    out.push_str(" WHERE ");
    for (i, cond) in conditions.iter().enumerate() {
        if i > 0 {
            out.push_str(" AND ");
        }
        cond.render(dialect, total > 1, out, params);
    }
    if let Some(column) = soft_delete {
        if !conditions.is_empty() {
            out.push_str(" AND ");
        }
        out.push_str(&column.render(dialect));
        out.push_str(" IS NULL");
    }
}

/// `SELECT` against one table.
#[derive(Debug, Clone, Default)]
pub struct SelectStatement {
    table: String,
    alias: Option<String>,
    select: Option<String>,
    conditions: Vec<Condition>,
    soft_delete: Option<String>,
    order: Vec<String>,
    limit: Option<usize>,
}

impl SelectStatement {
    #[must_use]
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_owned(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn alias(mut self, alias: Option<&str>) -> Self {
        self.alias = alias.map(str::to_owned);
        self
    }

    /// Raw select list; `*` when unset.
    #[must_use]
    pub fn columns(mut self, select: Option<&str>) -> Self {
        self.select = select.map(str::to_owned);
        self
    }

    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn filters(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    /// Add `<table>.<column> IS NULL` after the other conditions.
    #[must_use]
    pub fn soft_delete(mut self, column: Option<&str>) -> Self {
        self.soft_delete = column.map(str::to_owned);
        self
    }

    /// Raw `ORDER BY` term.
    #[must_use]
    pub fn order(mut self, term: &str) -> Self {
        self.order.push(term.to_owned());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Name rows are qualified with: the alias when set, the table otherwise.
    #[must_use]
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    #[must_use]
    pub fn build(&self, dialect: &dyn Dialect) -> (String, Vec<RowValues>) {
        let mut sql = String::with_capacity(64);
        let mut params = Vec::new();
        sql.push_str("SELECT ");
        sql.push_str(self.select.as_deref().unwrap_or("*"));
        sql.push_str(" FROM ");
        sql.push_str(&dialect.quote(&self.table));
        if let Some(alias) = &self.alias {
            sql.push_str(" AS ");
            sql.push_str(&dialect.quote(alias));
        }
        let soft = self
            .soft_delete
            .as_deref()
            .map(|c| ColumnRef::qualified(self.qualifier(), c));
        render_where(dialect, &self.conditions, soft.as_ref(), &mut sql, &mut params);
        if !self.order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order.join(","));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        (sql, params)
    }
}

fn bind_list(dialect: &dyn Dialect, start: usize, count: usize) -> String {
    (0..count)
        .map(|i| dialect.bind_var(start + i))
        .collect::<Vec<_>>()
        .join(",")
}

/// `INSERT INTO t (a,b) VALUES (?,?)`.
#[must_use]
pub fn insert_sql(dialect: &dyn Dialect, table: &str, columns: &[&str]) -> String {
    let cols = columns
        .iter()
        .map(|c| dialect.quote(c))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "INSERT INTO {} ({cols}) VALUES ({})",
        dialect.quote(table),
        bind_list(dialect, 1, columns.len())
    )
}

/// `INSERT ... ON CONFLICT (pk) DO UPDATE SET a=excluded.a,...`; every non-key
/// column is overwritten when the key already exists.
#[must_use]
pub fn upsert_sql(dialect: &dyn Dialect, table: &str, columns: &[&str], primary_key: &str) -> String {
    let insert = insert_sql(dialect, table, columns);
    let sets = columns
        .iter()
        .filter(|c| **c != primary_key)
        .map(|c| format!("{}=excluded.{}", dialect.quote(c), dialect.quote(c)))
        .collect::<Vec<_>>()
        .join(",");
    if sets.is_empty() {
        format!("{insert} ON CONFLICT ({}) DO NOTHING", dialect.quote(primary_key))
    } else {
        format!(
            "{insert} ON CONFLICT ({}) DO UPDATE SET {sets}",
            dialect.quote(primary_key)
        )
    }
}

/// `UPDATE t SET a=?,b=? WHERE [t.deleted_at IS NULL AND] pk = ?`; key bound last.
#[must_use]
pub fn update_sql(
    dialect: &dyn Dialect,
    table: &str,
    columns: &[&str],
    primary_key: &str,
    soft_delete: Option<&str>,
) -> String {
    let sets = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}={}", dialect.quote(c), dialect.bind_var(i + 1)))
        .collect::<Vec<_>>()
        .join(",");
    let scope = soft_delete
        .map(|c| format!("{} IS NULL AND ", dialect.qualify(table, c)))
        .unwrap_or_default();
    format!(
        "UPDATE {} SET {sets} WHERE {scope}{} = {}",
        dialect.quote(table),
        dialect.quote(primary_key),
        dialect.bind_var(columns.len() + 1)
    )
}

/// Soft delete when `soft_delete` is set, hard `DELETE` otherwise; key is the only bind.
#[must_use]
pub fn delete_sql(
    dialect: &dyn Dialect,
    table: &str,
    primary_key: &str,
    soft_delete: Option<&str>,
) -> String {
    match soft_delete {
        Some(column) => format!(
            "UPDATE {} SET {}={} WHERE {} = {} AND {} IS NULL",
            dialect.quote(table),
            dialect.quote(column),
            dialect.bind_var(1),
            dialect.qualify(table, primary_key),
            dialect.bind_var(2),
            dialect.qualify(table, column),
        ),
        None => format!(
            "DELETE FROM {} WHERE {} = {}",
            dialect.quote(table),
            dialect.qualify(table, primary_key),
            dialect.bind_var(1)
        ),
    }
}
