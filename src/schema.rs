//! Explicit model descriptions.
//!
//! A [`Model`] describes its table, columns and associations once through a
//! [`SchemaBuilder`]; the [`Registry`] caches the result per type so the
//! resolver and the wildcard expansion never rebuild it.

mod association;
mod registry;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use association::{Association, AssociationKind, JoinTable, Polymorphic, TargetRef};
pub use registry::Registry;

/// Storage class of a column; drives row → record normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Bool,
    Timestamp,
    Json,
    Blob,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

/// A type persisted in one table.
///
/// Field names of the serde representation are the column names; each
/// association appears as a field named after the association.
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn schema() -> Schema;
}

#[derive(Debug, Clone)]
pub struct Schema {
    pub name: String,
    pub table: String,
    pub primary_key: String,
    pub columns: Vec<Column>,
    pub soft_delete: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub associations: Vec<Association>,
}

impl Schema {
    #[must_use]
    pub fn builder(name: impl Into<String>, table: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name, table)
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    #[must_use]
    pub fn association(&self, name: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.name == name)
    }

    #[must_use]
    pub fn primary_key_type(&self) -> ColumnType {
        self.column(&self.primary_key)
            .map_or(ColumnType::Integer, |c| c.ty)
    }
}

pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    /// Starts with an integer `id` primary key.
    #[must_use]
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: Schema {
                name: name.into(),
                table: table.into(),
                primary_key: "id".to_owned(),
                columns: vec![Column {
                    name: "id".to_owned(),
                    ty: ColumnType::Integer,
                }],
                soft_delete: None,
                created_at: None,
                updated_at: None,
                associations: Vec::new(),
            },
        }
    }

    /// Replace the default `id` key.
    #[must_use]
    pub fn primary_key(mut self, name: &str, ty: ColumnType) -> Self {
        let old = std::mem::replace(&mut self.schema.primary_key, name.to_owned());
        self.schema.columns.retain(|c| c.name != old);
        self.schema.columns.insert(
            0,
            Column {
                name: name.to_owned(),
                ty,
            },
        );
        self
    }

    #[must_use]
    pub fn column(mut self, name: &str, ty: ColumnType) -> Self {
        self.schema.columns.retain(|c| c.name != name);
        self.schema.columns.push(Column {
            name: name.to_owned(),
            ty,
        });
        self
    }

    /// `created_at` / `updated_at`, filled on insert and update.
    #[must_use]
    pub fn timestamps(mut self) -> Self {
        self = self
            .column("created_at", ColumnType::Timestamp)
            .column("updated_at", ColumnType::Timestamp);
        self.schema.created_at = Some("created_at".to_owned());
        self.schema.updated_at = Some("updated_at".to_owned());
        self
    }

    /// `deleted_at` soft-delete column plus the matching default scope.
    #[must_use]
    pub fn soft_delete(mut self) -> Self {
        self = self.column("deleted_at", ColumnType::Timestamp);
        self.schema.soft_delete = Some("deleted_at".to_owned());
        self
    }

    /// Target row holds `foreign_key` pointing at this model's key.
    #[must_use]
    pub fn has_one<T: Model>(self, name: &str, foreign_key: &str) -> Self {
        self.association(Association::new::<T>(
            name,
            AssociationKind::HasOne,
            foreign_key,
        ))
    }

    #[must_use]
    pub fn has_many<T: Model>(self, name: &str, foreign_key: &str) -> Self {
        self.association(Association::new::<T>(
            name,
            AssociationKind::HasMany,
            foreign_key,
        ))
    }

    /// Target rows carry `{prefix}_id` and `{prefix}_type = type_value`.
    #[must_use]
    pub fn has_one_polymorphic<T: Model>(self, name: &str, prefix: &str, type_value: &str) -> Self {
        self.association(
            Association::new::<T>(name, AssociationKind::HasOne, &format!("{prefix}_id"))
                .polymorphic(&format!("{prefix}_type"), type_value),
        )
    }

    #[must_use]
    pub fn has_many_polymorphic<T: Model>(
        self,
        name: &str,
        prefix: &str,
        type_value: &str,
    ) -> Self {
        self.association(
            Association::new::<T>(name, AssociationKind::HasMany, &format!("{prefix}_id"))
                .polymorphic(&format!("{prefix}_type"), type_value),
        )
    }

    /// This model's row holds `foreign_key` pointing at the target's key.
    #[must_use]
    pub fn belongs_to<T: Model>(self, name: &str, foreign_key: &str) -> Self {
        self.association(Association::new::<T>(
            name,
            AssociationKind::BelongsTo,
            foreign_key,
        ))
    }

    #[must_use]
    pub fn many_to_many<T: Model>(self, name: &str, join: JoinTable) -> Self {
        let assoc = Association::new::<T>(name, AssociationKind::ManyToMany, &join.target_column)
            .through(join);
        self.association(assoc)
    }

    /// Declare a fully customised association. Redeclaring a name replaces it.
    #[must_use]
    pub fn association(mut self, assoc: Association) -> Self {
        self.schema.associations.retain(|a| a.name != assoc.name);
        self.schema.associations.push(assoc);
        self
    }

    #[must_use]
    pub fn build(self) -> Schema {
        self.schema
    }
}
