use std::fmt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::model::EntityRef;

/// Main error type for the relationship graph engine
#[derive(Error, Debug)]
pub enum RelgraphError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization of metadata or rule configuration
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Relationship type is unknown or has been deactivated
    #[error("Invalid relationship type: {0}")]
    InvalidRelationshipType(String),

    /// Entity type is not permitted on one side of a relationship type
    #[error("Type mismatch: {relationship_type} does not allow {side} entity type '{entity_type}'")]
    TypeMismatch {
        relationship_type: String,
        side: EdgeSide,
        entity_type: String,
    },

    /// An active edge with the same (project, source, target, type) key already exists
    #[error("Duplicate edge: {source_ref} -[{relationship_type}]-> {target_ref}")]
    DuplicateEdge {
        source_ref: EntityRef,
        target_ref: EntityRef,
        relationship_type: String,
    },

    /// The injected entity registry does not know this entity
    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityRef),

    /// Attempt to change source, target or relationship type of an edge
    #[error("Immutable field: '{0}' cannot be changed after creation")]
    ImmutableField(String),

    /// Edge, relationship type, rule or violation lookup miss
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Batch create rejected; carries every offending item
    #[error("Batch validation failed: {} invalid item(s)", .0.len())]
    BatchValidation(Vec<BatchItemError>),

    /// Hard delete refused while open violations still reference the edge
    #[error("Edge {edge_id} is referenced by {count} open violation(s)")]
    OpenViolations { edge_id: Uuid, count: usize },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Blocking database task failed to complete
    #[error("Task error: {0}")]
    Task(String),
}

impl RelgraphError {
    /// Convenience constructor for lookup misses.
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        RelgraphError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Errors that reconciliation callers should treat as "already present".
    pub fn is_benign(&self) -> bool {
        matches!(self, RelgraphError::DuplicateEdge { .. })
    }

    /// Rejection category for a single edge, used in batch reports.
    pub fn rejection_kind(&self) -> RejectionKind {
        match self {
            RelgraphError::InvalidRelationshipType(_) => RejectionKind::InvalidRelationshipType,
            RelgraphError::TypeMismatch { .. } => RejectionKind::TypeMismatch,
            RelgraphError::DuplicateEdge { .. } => RejectionKind::DuplicateEdge,
            RelgraphError::UnknownEntity(_) => RejectionKind::UnknownEntity,
            _ => RejectionKind::InvalidInput,
        }
    }
}

/// Which end of an edge a type check failed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeSide {
    Source,
    Target,
}

impl fmt::Display for EdgeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeSide::Source => f.write_str("source"),
            EdgeSide::Target => f.write_str("target"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    InvalidRelationshipType,
    TypeMismatch,
    DuplicateEdge,
    UnknownEntity,
    InvalidInput,
}

/// One rejected item of a batch create.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItemError {
    /// Position of the item in the submitted batch.
    pub index: usize,
    pub kind: RejectionKind,
    pub reason: String,
}

impl BatchItemError {
    pub fn from_error(index: usize, err: &RelgraphError) -> Self {
        Self {
            index,
            kind: err.rejection_kind(),
            reason: err.to_string(),
        }
    }
}

/// Convenient Result type using RelgraphError
pub type Result<T> = std::result::Result<T, RelgraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelgraphError::Config("Test error".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Test error"));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let err: RelgraphError = rusqlite_err.into();
        assert!(matches!(err, RelgraphError::Database(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RelgraphError = io_err.into();
        assert!(matches!(err, RelgraphError::Io(_)));
    }

    #[test]
    fn test_duplicate_edge_is_benign() {
        let err = RelgraphError::DuplicateEdge {
            source_ref: EntityRef::new("detail", Uuid::nil()),
            target_ref: EntityRef::new("material", Uuid::nil()),
            relationship_type: "USES".to_string(),
        };
        assert!(err.is_benign());
        assert_eq!(err.rejection_kind(), RejectionKind::DuplicateEdge);
        assert!(!RelgraphError::ImmutableField("source".into()).is_benign());
    }

    #[test]
    fn test_batch_error_counts_items() {
        let items = vec![
            BatchItemError::from_error(0, &RelgraphError::InvalidRelationshipType("X".into())),
            BatchItemError::from_error(3, &RelgraphError::InvalidInput("strength".into())),
        ];
        let err = RelgraphError::BatchValidation(items);
        assert!(err.to_string().contains("2 invalid item(s)"));
    }

    #[test]
    fn test_type_mismatch_message_names_side() {
        let err = RelgraphError::TypeMismatch {
            relationship_type: "USES".into(),
            side: EdgeSide::Target,
            entity_type: "drawing".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("target"));
        assert!(msg.contains("drawing"));
    }
}
