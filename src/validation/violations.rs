use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use uuid::Uuid;

use crate::db::codec;
use crate::error::{RelgraphError, Result};
use crate::model::{EntityRef, Finding, Scope, Violation, ViolationStatus};

const VIOLATION_COLUMNS: &str = "violation_id, project_id, rule_id, edge_id, entity_type, entity_id, \
     violation_type, message, severity, status, resolution_notes, resolved_by, resolved_at, created_at";

/// Filter for listing violations. Unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViolationFilter {
    pub project_id: Option<Uuid>,
    pub rule_id: Option<Uuid>,
    pub entity: Option<EntityRef>,
    pub status: Option<ViolationStatus>,
    pub limit: Option<usize>,
}

impl ViolationFilter {
    pub fn open() -> Self {
        Self {
            status: Some(ViolationStatus::Open),
            ..Self::default()
        }
    }

    pub fn in_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn for_rule(mut self, rule_id: Uuid) -> Self {
        self.rule_id = Some(rule_id);
        self
    }

    pub fn for_entity(mut self, entity: EntityRef) -> Self {
        self.entity = Some(entity);
        self
    }
}

fn row_to_violation(row: &Row<'_>) -> rusqlite::Result<Violation> {
    Ok(Violation {
        violation_id: codec::get_uuid(row, 0)?,
        project_id: codec::get_opt_uuid(row, 1)?,
        rule_id: codec::get_uuid(row, 2)?,
        edge_id: codec::get_opt_uuid(row, 3)?,
        entity_type: row.get(4)?,
        entity_id: codec::get_uuid(row, 5)?,
        violation_type: codec::get_parsed(row, 6)?,
        message: row.get(7)?,
        severity: codec::get_parsed(row, 8)?,
        status: codec::get_parsed(row, 9)?,
        resolution_notes: row.get(10)?,
        resolved_by: row.get(11)?,
        resolved_at: codec::get_opt_ts(row, 12)?,
        created_at: codec::get_ts(row, 13)?,
    })
}

pub(crate) fn load_violation(conn: &Connection, violation_id: Uuid) -> Result<Option<Violation>> {
    let violation = conn
        .query_row(
            &format!("SELECT {} FROM violations WHERE violation_id = ?1", VIOLATION_COLUMNS),
            params![violation_id.to_string()],
            row_to_violation,
        )
        .optional()?;
    Ok(violation)
}

fn open_duplicate_exists(tx: &Transaction<'_>, project_id: Option<Uuid>, finding: &Finding) -> Result<bool> {
    let mut stmt = tx.prepare_cached(
        "SELECT 1 FROM violations \
         WHERE status = 'open' AND rule_id = ?1 AND entity_type = ?2 AND entity_id = ?3 AND edge_id IS ?4 \
           AND project_id IS ?5 AND violation_type = ?6",
    )?;
    let exists = stmt.exists(params![
        finding.rule_id.to_string(),
        finding.entity.entity_type,
        finding.entity.entity_id.to_string(),
        finding.edge_id.map(|e| e.to_string()),
        project_id.map(|p| p.to_string()),
        finding.violation_type.as_str(),
    ])?;
    Ok(exists)
}

/// Record findings, skipping any that match an open violation of the same
/// project, rule, entity, edge and kind. Returns only the rows written.
pub(crate) fn persist_findings(tx: &Transaction<'_>, project_id: Option<Uuid>, findings: Vec<Finding>) -> Result<Vec<Violation>> {
    let mut written = Vec::new();
    for finding in findings {
        if open_duplicate_exists(tx, project_id, &finding)? {
            continue;
        }
        let violation = Violation {
            violation_id: Uuid::new_v4(),
            project_id,
            rule_id: finding.rule_id,
            edge_id: finding.edge_id,
            entity_type: finding.entity.entity_type,
            entity_id: finding.entity.entity_id,
            violation_type: finding.violation_type,
            message: finding.message,
            severity: finding.severity,
            status: ViolationStatus::Open,
            resolution_notes: None,
            resolved_by: None,
            resolved_at: None,
            created_at: codec::now(),
        };
        tx.execute(
            &format!(
                "INSERT INTO violations ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                VIOLATION_COLUMNS
            ),
            params![
                violation.violation_id.to_string(),
                violation.project_id.map(|p| p.to_string()),
                violation.rule_id.to_string(),
                violation.edge_id.map(|e| e.to_string()),
                violation.entity_type,
                violation.entity_id.to_string(),
                violation.violation_type.as_str(),
                violation.message,
                violation.severity.as_str(),
                violation.status.as_str(),
                violation.resolution_notes,
                violation.resolved_by,
                violation.resolved_at.as_ref().map(codec::ts),
                codec::ts(&violation.created_at),
            ],
        )?;
        written.push(violation);
    }
    Ok(written)
}

/// Close an open violation. Resolved violations stay resolved.
pub(crate) fn resolve(tx: &Transaction<'_>, violation_id: Uuid, notes: Option<String>, resolved_by: Option<String>) -> Result<Violation> {
    let mut violation =
        load_violation(tx, violation_id)?.ok_or_else(|| RelgraphError::not_found("violation", violation_id))?;
    if !violation.is_open() {
        return Err(RelgraphError::InvalidInput(format!(
            "violation {} is already resolved",
            violation_id
        )));
    }
    violation.status = ViolationStatus::Resolved;
    violation.resolution_notes = notes;
    violation.resolved_by = resolved_by;
    violation.resolved_at = Some(codec::now());

    tx.execute(
        "UPDATE violations SET status = ?1, resolution_notes = ?2, resolved_by = ?3, resolved_at = ?4 \
         WHERE violation_id = ?5",
        params![
            violation.status.as_str(),
            violation.resolution_notes,
            violation.resolved_by,
            violation.resolved_at.as_ref().map(codec::ts),
            violation_id.to_string(),
        ],
    )?;
    Ok(violation)
}

pub(crate) fn list(conn: &Connection, filter: &ViolationFilter) -> Result<Vec<Violation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM violations \
         WHERE (?1 IS NULL OR project_id = ?1) \
           AND (?2 IS NULL OR rule_id = ?2) \
           AND (?3 IS NULL OR (entity_type = ?3 AND entity_id = ?4)) \
           AND (?5 IS NULL OR status = ?5) \
         ORDER BY created_at, rowid \
         LIMIT ?6",
        VIOLATION_COLUMNS
    ))?;
    let rows = stmt.query_map(
        params![
            filter.project_id.map(|p| p.to_string()),
            filter.rule_id.map(|r| r.to_string()),
            filter.entity.as_ref().map(|e| e.entity_type.clone()),
            filter.entity.as_ref().map(|e| e.entity_id.to_string()),
            filter.status.map(|s| s.as_str()),
            filter.limit.map(|l| l as i64).unwrap_or(-1),
        ],
        row_to_violation,
    )?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub(crate) fn count_open(conn: &Connection, scope: Scope) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM violations WHERE status = 'open' AND (?1 IS NULL OR project_id = ?1)",
        params![scope.project_param()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}
