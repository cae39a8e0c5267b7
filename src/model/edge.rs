use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::EntityRef;

/// How an edge came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Manual,
    Auto,
    Ai,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Manual => "manual",
            SourceKind::Auto => "auto",
            SourceKind::Ai => "ai",
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(SourceKind::Manual),
            "auto" => Ok(SourceKind::Auto),
            "ai" => Ok(SourceKind::Ai),
            other => Err(format!("unknown source kind '{}'", other)),
        }
    }
}

/// Lifecycle status of an edge, independent of the soft-delete flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeStatus {
    #[default]
    Active,
    Superseded,
    Retracted,
}

impl EdgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeStatus::Active => "active",
            EdgeStatus::Superseded => "superseded",
            EdgeStatus::Retracted => "retracted",
        }
    }
}

impl FromStr for EdgeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EdgeStatus::Active),
            "superseded" => Ok(EdgeStatus::Superseded),
            "retracted" => Ok(EdgeStatus::Retracted),
            other => Err(format!("unknown edge status '{}'", other)),
        }
    }
}

/// Which incident edges of an entity to consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
    Both,
}

impl Direction {
    pub fn includes_outgoing(&self) -> bool {
        matches!(self, Direction::Outgoing | Direction::Both)
    }

    pub fn includes_incoming(&self) -> bool {
        matches!(self, Direction::Incoming | Direction::Both)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
            Direction::Both => "both",
        };
        f.write_str(s)
    }
}

/// A stored edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub edge_id: Uuid,
    pub project_id: Option<Uuid>,
    pub source: EntityRef,
    pub target: EntityRef,
    pub relationship_type: String,
    pub strength: f64,
    pub is_bidirectional: bool,
    pub metadata: Map<String, Value>,
    pub created_by: Option<String>,
    pub source_kind: SourceKind,
    pub confidence: f64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub status: EdgeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creation payload for an edge.
///
/// `strength` and `is_bidirectional` fall back to the relationship type's
/// defaults when left unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEdge {
    #[serde(default)]
    pub project_id: Option<Uuid>,
    pub source: EntityRef,
    pub target: EntityRef,
    pub relationship_type: String,
    #[serde(default)]
    pub strength: Option<f64>,
    #[serde(default)]
    pub is_bidirectional: Option<bool>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub source_kind: SourceKind,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
}

fn default_confidence() -> f64 {
    1.0
}

impl NewEdge {
    pub fn new(source: EntityRef, relationship_type: impl Into<String>, target: EntityRef) -> Self {
        Self {
            project_id: None,
            source,
            target,
            relationship_type: relationship_type.into(),
            strength: None,
            is_bidirectional: None,
            metadata: Map::new(),
            created_by: None,
            source_kind: SourceKind::Manual,
            confidence: default_confidence(),
            valid_from: None,
            valid_to: None,
        }
    }

    pub fn in_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn with_bidirectional(mut self, bidirectional: bool) -> Self {
        self.is_bidirectional = Some(bidirectional);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn created_by(mut self, who: impl Into<String>) -> Self {
        self.created_by = Some(who.into());
        self
    }

    pub fn with_source_kind(mut self, kind: SourceKind, confidence: f64) -> Self {
        self.source_kind = kind;
        self.confidence = confidence;
        self
    }
}

/// Partial update of an edge's mutable fields.
///
/// `source`, `target` and `relationship_type` exist only so that attempts to
/// change them (e.g. from a deserialized request body) can be rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgePatch {
    #[serde(default)]
    pub strength: Option<f64>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    /// `Some(None)` clears the end of validity; an explicit `null` in a
    /// request body deserializes to it.
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub status: Option<EdgeStatus>,
    #[serde(default)]
    pub source: Option<EntityRef>,
    #[serde(default)]
    pub target: Option<EntityRef>,
    #[serde(default)]
    pub relationship_type: Option<String>,
}

// A present field (even `null`) is `Some`; an absent one falls back to the default.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// An edge returned by `query_edges`, tagged with the side the anchor entity
/// was on. `direction` is `None` when the query had no entity anchor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeMatch {
    pub edge: Edge,
    pub direction: Option<Direction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_strings_round_trip() {
        for kind in [SourceKind::Manual, SourceKind::Auto, SourceKind::Ai] {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        for status in [EdgeStatus::Active, EdgeStatus::Superseded, EdgeStatus::Retracted] {
            assert_eq!(status.as_str().parse::<EdgeStatus>().unwrap(), status);
        }
        assert!("deleted".parse::<EdgeStatus>().is_err());
    }

    #[test]
    fn test_new_edge_deserializes_with_defaults() {
        let json = r#"{
            "source": {"entity_type": "detail", "entity_id": "00000000-0000-0000-0000-000000000001"},
            "target": {"entity_type": "material", "entity_id": "00000000-0000-0000-0000-000000000002"},
            "relationship_type": "USES"
        }"#;
        let spec: NewEdge = serde_json::from_str(json).unwrap();
        assert_eq!(spec.confidence, 1.0);
        assert_eq!(spec.source_kind, SourceKind::Manual);
        assert!(spec.strength.is_none());
        assert!(spec.metadata.is_empty());
    }

    #[test]
    fn test_patch_null_valid_to_clears() {
        let absent: EdgePatch = serde_json::from_str(r#"{"strength": 0.5}"#).unwrap();
        assert_eq!(absent.valid_to, None);

        let null: EdgePatch = serde_json::from_str(r#"{"valid_to": null}"#).unwrap();
        assert_eq!(null.valid_to, Some(None));

        let set: EdgePatch = serde_json::from_str(r#"{"valid_to": "2026-01-01T00:00:00Z"}"#).unwrap();
        assert!(matches!(set.valid_to, Some(Some(_))));
    }

    #[test]
    fn test_direction_flags() {
        assert!(Direction::Both.includes_outgoing() && Direction::Both.includes_incoming());
        assert!(!Direction::Outgoing.includes_incoming());
        assert!(!Direction::Incoming.includes_outgoing());
    }
}
