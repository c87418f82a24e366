use std::any::TypeId;
use std::fmt;

use super::{Model, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    HasOne,
    HasMany,
    BelongsTo,
    ManyToMany,
}

impl AssociationKind {
    /// Collection slots hold `Many`, the others hold `One`.
    #[must_use]
    pub fn is_collection(self) -> bool {
        matches!(self, AssociationKind::HasMany | AssociationKind::ManyToMany)
    }
}

/// Lazily built reference to the target model's schema.
#[derive(Clone, Copy)]
pub struct TargetRef {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub(crate) build: fn() -> Schema,
}

impl TargetRef {
    #[must_use]
    pub fn of<T: Model>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            build: T::schema,
        }
    }
}

impl fmt::Debug for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polymorphic {
    pub type_column: String,
    pub type_value: String,
}

/// Link table of a many-to-many association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub table: String,
    /// Column holding the owner's key.
    pub owner_column: String,
    /// Column holding the target's key.
    pub target_column: String,
}

impl JoinTable {
    #[must_use]
    pub fn new(table: &str, owner_column: &str, target_column: &str) -> Self {
        Self {
            table: table.to_owned(),
            owner_column: owner_column.to_owned(),
            target_column: target_column.to_owned(),
        }
    }
}

/// One declared association.
///
/// `foreign_key` lives on the target for has-one/has-many, on the owner for
/// belongs-to, and in the join table for many-to-many. `references` names the
/// column the foreign key points at and defaults to the referenced side's
/// primary key.
#[derive(Debug, Clone)]
pub struct Association {
    pub name: String,
    pub kind: AssociationKind,
    pub target: TargetRef,
    pub foreign_key: String,
    pub references: Option<String>,
    pub polymorphic: Option<Polymorphic>,
    pub join: Option<JoinTable>,
}

impl Association {
    #[must_use]
    pub fn new<T: Model>(name: &str, kind: AssociationKind, foreign_key: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            target: TargetRef::of::<T>(),
            foreign_key: foreign_key.to_owned(),
            references: None,
            polymorphic: None,
            join: None,
        }
    }

    #[must_use]
    pub fn references(mut self, column: &str) -> Self {
        self.references = Some(column.to_owned());
        self
    }

    #[must_use]
    pub fn polymorphic(mut self, type_column: &str, type_value: &str) -> Self {
        self.polymorphic = Some(Polymorphic {
            type_column: type_column.to_owned(),
            type_value: type_value.to_owned(),
        });
        self
    }

    #[must_use]
    pub fn through(mut self, join: JoinTable) -> Self {
        self.foreign_key = join.owner_column.clone();
        self.join = Some(join);
        self
    }

    /// Column on the owner whose values select the targets.
    #[must_use]
    pub fn owner_key<'a>(&'a self, owner: &'a Schema) -> &'a str {
        match self.kind {
            AssociationKind::BelongsTo => &self.foreign_key,
            AssociationKind::HasOne | AssociationKind::HasMany | AssociationKind::ManyToMany => {
                self.references.as_deref().unwrap_or(&owner.primary_key)
            }
        }
    }

    /// Column on the target matched against the owner key (or the join table's
    /// target column for many-to-many).
    #[must_use]
    pub fn target_key<'a>(&'a self, target: &'a Schema) -> &'a str {
        match self.kind {
            AssociationKind::HasOne | AssociationKind::HasMany => &self.foreign_key,
            AssociationKind::BelongsTo => self.references.as_deref().unwrap_or(&target.primary_key),
            AssociationKind::ManyToMany => &target.primary_key,
        }
    }
}
