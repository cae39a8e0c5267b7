//! Neighbor lookup shared by the traversal algorithms.

use std::collections::HashMap;

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::model::{Direction, Edge, EntityRef, Scope};
use crate::store::rows::{row_to_edge, EDGE_COLUMNS};

/// One step away from a node along an active edge.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Hop {
    pub edge: Edge,
    pub neighbor: EntityRef,
    /// Outgoing when the edge was followed source -> target.
    pub direction: Direction,
}

pub(crate) trait Adjacency {
    /// Active edges touching `node`, oldest first. A self-loop is listed once.
    fn incident(&mut self, node: &EntityRef) -> Result<Vec<Edge>>;
}

/// Edges leaving `node` under the following rule: forward when the direction
/// admits outgoing, backward when it admits incoming, and either way when the
/// edge is bidirectional.
pub(crate) fn hops<A: Adjacency + ?Sized>(
    adj: &mut A,
    node: &EntityRef,
    direction: Direction,
    relationship_type: Option<&str>,
) -> Result<Vec<Hop>> {
    let mut out = Vec::new();
    for edge in adj.incident(node)? {
        if relationship_type.is_some_and(|t| t != edge.relationship_type) {
            continue;
        }
        let forward = edge.source == *node && (direction.includes_outgoing() || edge.is_bidirectional);
        let backward = edge.target == *node && (direction.includes_incoming() || edge.is_bidirectional);
        if forward {
            out.push(Hop {
                neighbor: edge.target.clone(),
                direction: Direction::Outgoing,
                edge: edge.clone(),
            });
        }
        if backward {
            out.push(Hop {
                neighbor: edge.source.clone(),
                direction: Direction::Incoming,
                edge,
            });
        }
    }
    Ok(out)
}

/// Adjacency read from the `edges` table, memoized for one request.
pub(crate) struct SqlAdjacency<'c> {
    conn: &'c Connection,
    project: Option<String>,
    memo: HashMap<EntityRef, Vec<Edge>>,
}

impl<'c> SqlAdjacency<'c> {
    pub fn new(conn: &'c Connection, scope: Scope) -> Self {
        Self {
            conn,
            project: scope.project_param(),
            memo: HashMap::new(),
        }
    }
}

impl Adjacency for SqlAdjacency<'_> {
    fn incident(&mut self, node: &EntityRef) -> Result<Vec<Edge>> {
        if let Some(edges) = self.memo.get(node) {
            return Ok(edges.clone());
        }
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {} FROM edges \
             WHERE is_active = 1 AND (?1 IS NULL OR project_id = ?1) \
               AND ((source_entity_type = ?2 AND source_entity_id = ?3) \
                 OR (target_entity_type = ?2 AND target_entity_id = ?3)) \
             ORDER BY created_at, rowid",
            EDGE_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![self.project, node.entity_type, node.entity_id.to_string()],
            row_to_edge,
        )?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        self.memo.insert(node.clone(), edges.clone());
        Ok(edges)
    }
}

/// Every active edge in scope, oldest first.
pub(crate) fn scope_edges(conn: &Connection, scope: Scope) -> Result<Vec<Edge>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM edges WHERE is_active = 1 AND (?1 IS NULL OR project_id = ?1) ORDER BY created_at, rowid",
        EDGE_COLUMNS
    ))?;
    let rows = stmt.query_map(params![scope.project_param()], row_to_edge)?;
    let mut edges = Vec::new();
    for row in rows {
        edges.push(row?);
    }
    Ok(edges)
}

/// In-memory adjacency over a fixed edge list.
#[cfg(test)]
pub(crate) struct EdgeListAdjacency(pub Vec<Edge>);

#[cfg(test)]
impl Adjacency for EdgeListAdjacency {
    fn incident(&mut self, node: &EntityRef) -> Result<Vec<Edge>> {
        Ok(self
            .0
            .iter()
            .filter(|e| e.is_active && (e.source == *node || e.target == *node))
            .cloned()
            .collect())
    }
}
