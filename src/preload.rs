//! Nested association preloading.
//!
//! Directives name dotted association paths (`"Pets.Toy"`), optionally with
//! conditions for the last segment. [`resolver`] turns them into a
//! [`PreloadPlan`] before anything runs; [`executor`] then loads the plan
//! level by level with one batched statement per association.

pub mod executor;
pub mod resolver;

use std::fmt;
use std::sync::Arc;

pub use executor::PreloadExecutor;
pub use resolver::{PlanNode, PreloadPlan, resolve};

use crate::statement::Condition;
use crate::types::RowValues;

/// Wildcard segment: every direct association of the model at that depth.
pub const ASSOCIATIONS: &str = "*";

/// Query adjustments a scope callback may apply to one association load.
#[derive(Debug, Clone, Default)]
pub struct PreloadScope {
    pub(crate) alias: Option<String>,
    pub(crate) select: Option<String>,
    pub(crate) conditions: Vec<Condition>,
    pub(crate) order: Vec<String>,
    pub(crate) unscoped: bool,
}

impl PreloadScope {
    /// Load from `table AS alias`; key and soft-delete filters use the alias.
    #[must_use]
    pub fn table_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_owned());
        self
    }

    /// Raw select list such as `a.*`.
    #[must_use]
    pub fn select(mut self, columns: &str) -> Self {
        self.select = Some(columns.to_owned());
        self
    }

    #[must_use]
    pub fn filter(mut self, sql: &str, params: &[RowValues]) -> Self {
        self.conditions.push(Condition::raw(sql, params.to_vec()));
        self
    }

    #[must_use]
    pub fn eq(mut self, column: &str, value: impl Into<RowValues>) -> Self {
        self.conditions.push(Condition::eq(column, value));
        self
    }

    #[must_use]
    pub fn order(mut self, term: &str) -> Self {
        self.order.push(term.to_owned());
        self
    }

    /// Include soft-deleted rows.
    #[must_use]
    pub fn unscoped(mut self) -> Self {
        self.unscoped = true;
        self
    }

    #[must_use]
    pub fn is_unscoped(&self) -> bool {
        self.unscoped
    }
}

pub type ScopeFn = Arc<dyn Fn(PreloadScope) -> PreloadScope + Send + Sync>;

/// Condition attached to the last segment of a preload path.
#[derive(Clone)]
pub enum PreloadCondition {
    Where(Condition),
    Scope(ScopeFn),
}

impl PreloadCondition {
    #[must_use]
    pub fn raw(sql: &str, params: &[RowValues]) -> Self {
        PreloadCondition::Where(Condition::raw(sql, params.to_vec()))
    }

    #[must_use]
    pub fn eq(column: &str, value: impl Into<RowValues>) -> Self {
        PreloadCondition::Where(Condition::eq(column, value))
    }

    #[must_use]
    pub fn scope<F>(f: F) -> Self
    where
        F: Fn(PreloadScope) -> PreloadScope + Send + Sync + 'static,
    {
        PreloadCondition::Scope(Arc::new(f))
    }
}

impl fmt::Debug for PreloadCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreloadCondition::Where(cond) => f.debug_tuple("Where").field(cond).finish(),
            PreloadCondition::Scope(_) => f.write_str("Scope(..)"),
        }
    }
}

/// One `preload(path, conditions)` request.
#[derive(Debug, Clone)]
pub struct PreloadDirective {
    pub path: String,
    pub conditions: Vec<PreloadCondition>,
}

impl PreloadDirective {
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_owned(),
            conditions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_conditions(path: &str, conditions: Vec<PreloadCondition>) -> Self {
        Self {
            path: path.to_owned(),
            conditions,
        }
    }
}

/// Fold `conditions` into the scope a single association load runs with.
pub(crate) fn effective_scope(conditions: &[PreloadCondition], unscoped: bool) -> PreloadScope {
    conditions.iter().fold(
        PreloadScope {
            unscoped,
            ..PreloadScope::default()
        },
        |scope, cond| match cond {
            PreloadCondition::Where(c) => {
                let mut scope = scope;
                scope.conditions.push(c.clone());
                scope
            }
            PreloadCondition::Scope(f) => f(scope),
        },
    )
}
