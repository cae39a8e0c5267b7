use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EntityRef, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationStatus {
    #[default]
    Open,
    Resolved,
}

impl ViolationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationStatus::Open => "open",
            ViolationStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for ViolationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ViolationStatus::Open),
            "resolved" => Ok(ViolationStatus::Resolved),
            other => Err(format!("unknown violation status '{}'", other)),
        }
    }
}

/// What a rule found wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    BelowMinCount,
    AboveMaxCount,
    MissingRequired,
    ForbiddenEdge,
    ConditionalMissing,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::BelowMinCount => "below_min_count",
            ViolationKind::AboveMaxCount => "above_max_count",
            ViolationKind::MissingRequired => "missing_required",
            ViolationKind::ForbiddenEdge => "forbidden_edge",
            ViolationKind::ConditionalMissing => "conditional_missing",
        }
    }
}

impl FromStr for ViolationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "below_min_count" => Ok(ViolationKind::BelowMinCount),
            "above_max_count" => Ok(ViolationKind::AboveMaxCount),
            "missing_required" => Ok(ViolationKind::MissingRequired),
            "forbidden_edge" => Ok(ViolationKind::ForbiddenEdge),
            "conditional_missing" => Ok(ViolationKind::ConditionalMissing),
            other => Err(format!("unknown violation type '{}'", other)),
        }
    }
}

/// A rule failure found by an evaluation pass, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub rule_id: Uuid,
    pub edge_id: Option<Uuid>,
    pub entity: EntityRef,
    pub violation_type: ViolationKind,
    pub message: String,
    pub severity: Severity,
}

/// A persisted rule failure. Rows are never deleted; resolution is the only
/// mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub violation_id: Uuid,
    pub project_id: Option<Uuid>,
    pub rule_id: Uuid,
    pub edge_id: Option<Uuid>,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub violation_type: ViolationKind,
    pub message: String,
    pub severity: Severity,
    pub status: ViolationStatus,
    pub resolution_notes: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Violation {
    pub fn entity(&self) -> EntityRef {
        EntityRef::new(self.entity_type.clone(), self.entity_id)
    }

    pub fn is_open(&self) -> bool {
        self.status == ViolationStatus::Open
    }
}
