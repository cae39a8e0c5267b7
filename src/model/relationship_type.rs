use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered kind of edge and the entity-type pairs it may connect.
///
/// Source and target sets are explicit enumerations; there is no taxonomy or
/// wildcard matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipType {
    pub type_code: String,
    pub display_name: String,
    pub category: String,
    pub valid_source_types: BTreeSet<String>,
    pub valid_target_types: BTreeSet<String>,
    pub default_strength: f64,
    pub default_bidirectional: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl RelationshipType {
    /// Build an active type with strength 1.0 and no bidirectional default.
    pub fn new<S, T>(type_code: &str, display_name: &str, category: &str, sources: S, targets: T) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            type_code: type_code.to_string(),
            display_name: display_name.to_string(),
            category: category.to_string(),
            valid_source_types: sources.into_iter().map(Into::into).collect(),
            valid_target_types: targets.into_iter().map(Into::into).collect(),
            default_strength: 1.0,
            default_bidirectional: false,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_default_strength(mut self, strength: f64) -> Self {
        self.default_strength = strength;
        self
    }

    pub fn bidirectional(mut self) -> Self {
        self.default_bidirectional = true;
        self
    }

    pub fn allows_source(&self, entity_type: &str) -> bool {
        self.valid_source_types.contains(entity_type)
    }

    pub fn allows_target(&self, entity_type: &str) -> bool {
        self.valid_target_types.contains(entity_type)
    }
}
