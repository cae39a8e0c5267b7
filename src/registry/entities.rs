//! Entity Registry collaborator.
//!
//! The engine never decides which entities exist. Callers inject an
//! implementation to reject edges to unknown entities and to enumerate the
//! entities that rule evaluation, orphan detection and coverage consider.

use std::collections::BTreeMap;
use std::sync::RwLock;

use uuid::Uuid;

use crate::model::{EntityRef, Scope};

pub trait EntityRegistry: Send + Sync {
    fn exists(&self, entity: &EntityRef) -> bool;

    /// Known entities of a type within scope. Registries that cannot
    /// enumerate return nothing, and only edge endpoints are considered.
    fn entities_of_type(&self, _entity_type: &str, _scope: Scope) -> Vec<EntityRef> {
        Vec::new()
    }
}

impl<F> EntityRegistry for F
where
    F: Fn(&EntityRef) -> bool + Send + Sync,
{
    fn exists(&self, entity: &EntityRef) -> bool {
        self(entity)
    }
}

/// Thread-safe registry backed by a map of entity -> owning project.
#[derive(Debug, Default)]
pub struct InMemoryEntityRegistry {
    entities: RwLock<BTreeMap<EntityRef, Option<Uuid>>>,
}

impl InMemoryEntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity: EntityRef, project_id: Option<Uuid>) {
        self.entities
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(entity, project_id);
    }

    pub fn remove(&self, entity: &EntityRef) -> bool {
        self.entities
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(entity)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entities.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EntityRegistry for InMemoryEntityRegistry {
    fn exists(&self, entity: &EntityRef) -> bool {
        self.entities
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(entity)
    }

    fn entities_of_type(&self, entity_type: &str, scope: Scope) -> Vec<EntityRef> {
        self.entities
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(entity, project)| {
                entity.entity_type == entity_type
                    && (scope.project_id.is_none() || **project == scope.project_id)
            })
            .map(|(entity, _)| entity.clone())
            .collect()
    }
}
