use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque pointer to a domain object: a type tag plus identifier.
///
/// The engine never dereferences entity attributes; equality and ordering
/// are structural (type first, then id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: Uuid,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: Uuid) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}
