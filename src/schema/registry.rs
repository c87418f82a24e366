use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{Model, Schema, TargetRef};

/// Per-type schema cache shared by every session derived from one root.
#[derive(Debug, Default)]
pub struct Registry {
    schemas: RwLock<HashMap<TypeId, Arc<Schema>>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn schema_of<M: Model>(&self) -> Arc<Schema> {
        self.get_or_build(TypeId::of::<M>(), M::schema)
    }

    #[must_use]
    pub fn resolve(&self, target: &TargetRef) -> Arc<Schema> {
        self.get_or_build(target.type_id, target.build)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_or_build(&self, type_id: TypeId, build: fn() -> Schema) -> Arc<Schema> {
        if let Some(schema) = self
            .schemas
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&type_id)
        {
            return Arc::clone(schema);
        }

        let built = Arc::new(build());
        let mut guard = self
            .schemas
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // another task may have won the race; keep the first one
        Arc::clone(guard.entry(type_id).or_insert(built))
    }
}
