//! Edge row mapping and the write-side checks shared by single and batch creates.

use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::codec;
use crate::error::{RelgraphError, Result};
use crate::model::{Edge, EdgeStatus, EntityRef, NewEdge};
use crate::registry::{check_edge_types, load_type};

pub(crate) const EDGE_COLUMNS: &str = "edge_id, project_id, source_entity_type, source_entity_id, \
     target_entity_type, target_entity_id, relationship_type, strength, is_bidirectional, metadata, \
     created_by, source_kind, confidence, valid_from, valid_to, is_active, status, created_at, updated_at";

/// Number of columns in `EDGE_COLUMNS`; extra selected columns start here.
pub(crate) const EDGE_COLUMN_COUNT: usize = 19;

pub(crate) fn row_to_edge(row: &Row<'_>) -> rusqlite::Result<Edge> {
    Ok(Edge {
        edge_id: codec::get_uuid(row, 0)?,
        project_id: codec::get_opt_uuid(row, 1)?,
        source: EntityRef::new(row.get::<_, String>(2)?, codec::get_uuid(row, 3)?),
        target: EntityRef::new(row.get::<_, String>(4)?, codec::get_uuid(row, 5)?),
        relationship_type: row.get(6)?,
        strength: row.get(7)?,
        is_bidirectional: row.get(8)?,
        metadata: codec::get_json(row, 9)?,
        created_by: row.get(10)?,
        source_kind: codec::get_parsed(row, 11)?,
        confidence: row.get(12)?,
        valid_from: codec::get_ts(row, 13)?,
        valid_to: codec::get_opt_ts(row, 14)?,
        is_active: row.get(15)?,
        status: codec::get_parsed(row, 16)?,
        created_at: codec::get_ts(row, 17)?,
        updated_at: codec::get_ts(row, 18)?,
    })
}

pub(crate) fn load_edge(conn: &Connection, edge_id: Uuid) -> Result<Option<Edge>> {
    let edge = conn
        .query_row(
            &format!("SELECT {} FROM edges WHERE edge_id = ?1", EDGE_COLUMNS),
            params![edge_id.to_string()],
            row_to_edge,
        )
        .optional()?;
    Ok(edge)
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RelgraphError::InvalidInput(format!("{} {} is outside [0, 1]", name, value)))
    }
}

/// Validate a creation payload against the registry and materialize the edge.
///
/// Resolves type defaults and assigns the id and timestamps; nothing is written.
pub(crate) fn prepare_edge(conn: &Connection, new: NewEdge) -> Result<Edge> {
    let ty = load_type(conn, &new.relationship_type)?
        .ok_or_else(|| RelgraphError::InvalidRelationshipType(new.relationship_type.clone()))?;
    check_edge_types(&ty, &new.source.entity_type, &new.target.entity_type)?;

    let strength = new.strength.unwrap_or(ty.default_strength);
    check_unit_interval("strength", strength)?;
    check_unit_interval("confidence", new.confidence)?;

    let now = codec::now();
    let valid_from = new.valid_from.map(codec::truncate).unwrap_or(now);
    let valid_to = new.valid_to.map(codec::truncate);
    if let Some(end) = valid_to {
        if end < valid_from {
            return Err(RelgraphError::InvalidInput(
                "valid_to precedes valid_from".to_string(),
            ));
        }
    }

    Ok(Edge {
        edge_id: Uuid::new_v4(),
        project_id: new.project_id,
        source: new.source,
        target: new.target,
        relationship_type: new.relationship_type,
        strength,
        is_bidirectional: new.is_bidirectional.unwrap_or(ty.default_bidirectional),
        metadata: new.metadata,
        created_by: new.created_by,
        source_kind: new.source_kind,
        confidence: new.confidence,
        valid_from,
        valid_to,
        is_active: true,
        status: EdgeStatus::Active,
        created_at: now,
        updated_at: now,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

pub(crate) fn duplicate_error(edge: &Edge) -> RelgraphError {
    RelgraphError::DuplicateEdge {
        source_ref: edge.source.clone(),
        target_ref: edge.target.clone(),
        relationship_type: edge.relationship_type.clone(),
    }
}

/// Insert a prepared edge. The partial unique index decides duplicates.
pub(crate) fn insert_edge(conn: &Connection, edge: &Edge) -> Result<()> {
    let metadata = serde_json::to_string(&edge.metadata)?;
    let result = conn.execute(
        &format!(
            "INSERT INTO edges ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            EDGE_COLUMNS
        ),
        params![
            edge.edge_id.to_string(),
            edge.project_id.map(|p| p.to_string()),
            edge.source.entity_type,
            edge.source.entity_id.to_string(),
            edge.target.entity_type,
            edge.target.entity_id.to_string(),
            edge.relationship_type,
            edge.strength,
            edge.is_bidirectional,
            metadata,
            edge.created_by,
            edge.source_kind.as_str(),
            edge.confidence,
            codec::ts(&edge.valid_from),
            edge.valid_to.as_ref().map(codec::ts),
            edge.is_active,
            edge.status.as_str(),
            codec::ts(&edge.created_at),
            codec::ts(&edge.updated_at),
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(duplicate_error(edge)),
        Err(e) => Err(RelgraphError::Database(e)),
    }
}

/// Whether an active edge with the same uniqueness key is already stored.
pub(crate) fn active_duplicate_exists(conn: &Connection, edge: &Edge) -> Result<bool> {
    let mut stmt = conn.prepare_cached(
        "SELECT 1 FROM edges \
         WHERE is_active = 1 \
           AND COALESCE(project_id, '') = COALESCE(?1, '') \
           AND source_entity_type = ?2 AND source_entity_id = ?3 \
           AND target_entity_type = ?4 AND target_entity_id = ?5 \
           AND relationship_type = ?6",
    )?;
    let exists = stmt.exists(params![
        edge.project_id.map(|p| p.to_string()),
        edge.source.entity_type,
        edge.source.entity_id.to_string(),
        edge.target.entity_type,
        edge.target.entity_id.to_string(),
        edge.relationship_type,
    ])?;
    Ok(exists)
}

/// Uniqueness key among active edges.
pub(crate) type EdgeKey = (Option<Uuid>, EntityRef, EntityRef, String);

pub(crate) fn edge_key(edge: &Edge) -> EdgeKey {
    (
        edge.project_id,
        edge.source.clone(),
        edge.target.clone(),
        edge.relationship_type.clone(),
    )
}
