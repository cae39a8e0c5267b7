use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::codec;
use crate::error::{RelgraphError, Result};
use crate::model::{Scope, ValidationRule};

pub(crate) const RULE_COLUMNS: &str = "rule_id, project_id, name, rule_type, source_entity_type, \
     target_entity_type, relationship_type, rule_config, severity, is_active, created_at";

pub(crate) fn row_to_rule(row: &Row<'_>) -> rusqlite::Result<ValidationRule> {
    let rule = ValidationRule {
        rule_id: codec::get_uuid(row, 0)?,
        project_id: codec::get_opt_uuid(row, 1)?,
        name: row.get(2)?,
        source_entity_type: row.get(4)?,
        target_entity_type: row.get(5)?,
        relationship_type: row.get(6)?,
        config: codec::get_json(row, 7)?,
        severity: codec::get_parsed(row, 8)?,
        is_active: row.get(9)?,
        created_at: codec::get_ts(row, 10)?,
    };
    let column: String = row.get(3)?;
    if column != rule.rule_type().as_str() {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("rule_config is tagged {} but rule_type is {}", rule.rule_type(), column).into(),
        ));
    }
    Ok(rule)
}

pub(crate) fn insert_rule(conn: &Connection, rule: &ValidationRule) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO validation_rules ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            RULE_COLUMNS
        ),
        params![
            rule.rule_id.to_string(),
            rule.project_id.map(|p| p.to_string()),
            rule.name,
            rule.rule_type().as_str(),
            rule.source_entity_type,
            rule.target_entity_type,
            rule.relationship_type,
            serde_json::to_string(&rule.config)?,
            rule.severity.as_str(),
            rule.is_active,
            codec::ts(&rule.created_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn load_rule(conn: &Connection, rule_id: Uuid) -> Result<Option<ValidationRule>> {
    let rule = conn
        .query_row(
            &format!("SELECT {} FROM validation_rules WHERE rule_id = ?1", RULE_COLUMNS),
            params![rule_id.to_string()],
            row_to_rule,
        )
        .optional()?;
    Ok(rule)
}

fn is_malformed(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..)
    )
}

/// Rules matching a WHERE clause over `?1` (project) and `?2` (active only).
/// Rows that fail to parse are logged and skipped.
fn load_rules_where(conn: &Connection, clause: &str, project: Option<String>, active_only: bool) -> Result<Vec<ValidationRule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM validation_rules WHERE {} AND (?2 = 0 OR is_active = 1) ORDER BY created_at, rowid",
        RULE_COLUMNS, clause
    ))?;
    let rows = stmt.query_map(params![project, active_only], row_to_rule)?;
    let mut out = Vec::new();
    for row in rows {
        match row {
            Ok(rule) => out.push(rule),
            Err(e) if is_malformed(&e) => log::warn!("Skipping malformed validation rule: {}", e),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(out)
}

/// Every rule visible in a scope: a project's own rules plus global ones,
/// or every rule for `Scope::all()`.
pub(crate) fn list_rules(conn: &Connection, scope: Scope, active_only: bool) -> Result<Vec<ValidationRule>> {
    load_rules_where(
        conn,
        "(?1 IS NULL OR project_id = ?1 OR project_id IS NULL)",
        scope.project_param(),
        active_only,
    )
}

/// Active rules that apply when evaluating a scope. A project sees its own
/// rules plus global ones; the global scope sees global rules only.
pub(crate) fn applicable_rules(conn: &Connection, scope: Scope) -> Result<Vec<ValidationRule>> {
    load_rules_where(
        conn,
        "(project_id IS NULL OR project_id = ?1)",
        scope.project_param(),
        true,
    )
}

pub(crate) fn set_rule_active(conn: &Connection, rule_id: Uuid, active: bool) -> Result<()> {
    let changed = conn.execute(
        "UPDATE validation_rules SET is_active = ?1 WHERE rule_id = ?2",
        params![active, rule_id.to_string()],
    )?;
    if changed == 0 {
        return Err(RelgraphError::not_found("validation rule", rule_id));
    }
    Ok(())
}
