//! Degree queries: hubs, most connected entities and orphans.

use std::collections::BTreeSet;

use rusqlite::{params, Connection};

use crate::db::codec;
use crate::error::Result;
use crate::model::{EntityRef, Scope};

const DEGREE_SQL: &str = "SELECT entity_type, entity_id, COUNT(*) AS degree FROM ( \
         SELECT source_entity_type AS entity_type, source_entity_id AS entity_id FROM edges \
         WHERE is_active = 1 AND (?1 IS NULL OR project_id = ?1) \
         UNION ALL \
         SELECT target_entity_type, target_entity_id FROM edges \
         WHERE is_active = 1 AND (?1 IS NULL OR project_id = ?1) \
     ) GROUP BY entity_type, entity_id \
     HAVING COUNT(*) >= ?2 \
     ORDER BY degree DESC, entity_id ASC, entity_type ASC \
     LIMIT ?3";

/// In+out degree over active edges, highest first, ties by entity id.
/// A self-loop counts twice.
pub(crate) fn degrees(
    conn: &Connection,
    scope: Scope,
    min_degree: usize,
    limit: Option<usize>,
) -> Result<Vec<(EntityRef, usize)>> {
    let mut stmt = conn.prepare_cached(DEGREE_SQL)?;
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let rows = stmt.query_map(params![scope.project_param(), min_degree as i64, limit], |row| {
        let entity = EntityRef::new(row.get::<_, String>(0)?, codec::get_uuid(row, 1)?);
        let degree: i64 = row.get(2)?;
        Ok((entity, degree as usize))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Endpoints of every edge in scope, active or not, of one entity type.
fn edge_endpoints(conn: &Connection, scope: Scope, entity_type: &str) -> Result<BTreeSet<EntityRef>> {
    let mut stmt = conn.prepare_cached(
        "SELECT source_entity_id FROM edges \
         WHERE source_entity_type = ?2 AND (?1 IS NULL OR project_id = ?1) \
         UNION \
         SELECT target_entity_id FROM edges \
         WHERE target_entity_type = ?2 AND (?1 IS NULL OR project_id = ?1)",
    )?;
    let rows = stmt.query_map(params![scope.project_param(), entity_type], |row| codec::get_uuid(row, 0))?;
    let mut out = BTreeSet::new();
    for row in rows {
        out.insert(EntityRef::new(entity_type, row?));
    }
    Ok(out)
}

/// Entities of one type touched by at least one active edge in scope.
fn connected_of_type(conn: &Connection, scope: Scope, entity_type: &str) -> Result<BTreeSet<EntityRef>> {
    let mut stmt = conn.prepare_cached(
        "SELECT source_entity_id FROM edges \
         WHERE is_active = 1 AND source_entity_type = ?2 AND (?1 IS NULL OR project_id = ?1) \
         UNION \
         SELECT target_entity_id FROM edges \
         WHERE is_active = 1 AND target_entity_type = ?2 AND (?1 IS NULL OR project_id = ?1)",
    )?;
    let rows = stmt.query_map(params![scope.project_param(), entity_type], |row| codec::get_uuid(row, 0))?;
    let mut out = BTreeSet::new();
    for row in rows {
        out.insert(EntityRef::new(entity_type, row?));
    }
    Ok(out)
}

/// Known entities of a type with no active edge in scope.
pub(crate) fn orphans(
    conn: &Connection,
    scope: Scope,
    entity_type: &str,
    registered: impl IntoIterator<Item = EntityRef>,
) -> Result<Vec<EntityRef>> {
    let mut known = edge_endpoints(conn, scope, entity_type)?;
    known.extend(registered.into_iter().filter(|e| e.entity_type == entity_type));
    let connected = connected_of_type(conn, scope, entity_type)?;
    Ok(known.difference(&connected).cloned().collect())
}
