//! Value types shared by every engine component.

mod edge;
mod entity;
mod relationship_type;
mod rule;
mod violation;

pub use edge::{Direction, Edge, EdgeMatch, EdgePatch, EdgeStatus, NewEdge, SourceKind};
pub use entity::EntityRef;
pub use relationship_type::RelationshipType;
pub use rule::{
    CardinalityConfig, ConditionalConfig, ForbiddenConfig, NewRule, RequiredConfig, RuleConfig,
    RuleType, Severity, ValidationRule,
};
pub use violation::{Finding, Violation, ViolationKind, ViolationStatus};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The slice of the graph an operation looks at.
///
/// `project_id = None` means every edge regardless of project, not only
/// global (project-less) edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub project_id: Option<Uuid>,
}

impl Scope {
    pub fn all() -> Self {
        Self { project_id: None }
    }

    pub fn project(project_id: Uuid) -> Self {
        Self {
            project_id: Some(project_id),
        }
    }

    /// SQL parameter value for `(?N IS NULL OR project_id = ?N)` filters.
    pub(crate) fn project_param(&self) -> Option<String> {
        self.project_id.map(|p| p.to_string())
    }
}
