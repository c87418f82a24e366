use std::fmt::Debug;

/// SQL surface the statement builder and transaction manager need from a backend.
pub trait Dialect: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Quote a single identifier.
    fn quote(&self, ident: &str) -> String;

    /// Placeholder for the `n`th (1-based) bind argument.
    fn bind_var(&self, n: usize) -> String;

    /// `table.column`, both quoted.
    fn qualify(&self, table: &str, column: &str) -> String {
        format!("{}.{}", self.quote(table), self.quote(column))
    }

    fn savepoint(&self, name: &str) -> String {
        format!("SAVEPOINT {}", self.quote(name))
    }

    fn release_savepoint(&self, name: &str) -> String {
        format!("RELEASE SAVEPOINT {}", self.quote(name))
    }

    fn rollback_to_savepoint(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {}", self.quote(name))
    }
}

/// Backtick quoting and `?` placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote(&self, ident: &str) -> String {
        if ident == "*" {
            return ident.to_owned();
        }
        format!("`{}`", ident.replace('`', "``"))
    }

    fn bind_var(&self, _n: usize) -> String {
        "?".to_owned()
    }
}
