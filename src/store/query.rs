use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::db::codec;
use crate::error::Result;
use crate::model::{Direction, EdgeMatch, EntityRef};

use super::rows::{row_to_edge, EDGE_COLUMNS, EDGE_COLUMN_COUNT};
use super::EdgeStore;

/// Filter for `EdgeStore::query_edges`. Unset fields do not constrain.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeFilter {
    pub project_id: Option<Uuid>,
    /// Anchor entity; `direction` says which end it must be.
    pub entity: Option<EntityRef>,
    pub direction: Direction,
    pub relationship_type: Option<String>,
    pub active_only: bool,
    pub created_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl Default for EdgeFilter {
    fn default() -> Self {
        Self {
            project_id: None,
            entity: None,
            direction: Direction::Outgoing,
            relationship_type: None,
            active_only: true,
            created_after: None,
            limit: None,
        }
    }
}

impl EdgeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_entity(entity: EntityRef, direction: Direction) -> Self {
        Self {
            entity: Some(entity),
            direction,
            ..Self::default()
        }
    }

    pub fn in_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn of_type(mut self, relationship_type: impl Into<String>) -> Self {
        self.relationship_type = Some(relationship_type.into());
        self
    }

    pub fn include_inactive(mut self) -> Self {
        self.active_only = false;
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

const COMMON_PREDICATES: &str = "(?1 IS NULL OR project_id = ?1) \
     AND (?4 IS NULL OR relationship_type = ?4) \
     AND (?5 = 0 OR is_active = 1) \
     AND (?6 IS NULL OR created_at > ?6)";

fn branch(endpoint: Option<&str>, tag: Option<Direction>) -> String {
    let tag = match tag {
        Some(d) => format!("'{}'", d),
        None => "NULL".to_string(),
    };
    let anchor = match endpoint {
        Some(end) => format!(" AND {end}_entity_type = ?2 AND {end}_entity_id = ?3"),
        None => String::new(),
    };
    format!(
        "SELECT {}, {} AS dir, rowid AS seq FROM edges WHERE {}{}",
        EDGE_COLUMNS, tag, COMMON_PREDICATES, anchor
    )
}

fn build_sql(filter: &EdgeFilter) -> String {
    let body = match (&filter.entity, filter.direction) {
        (None, _) => branch(None, None),
        (Some(_), Direction::Outgoing) => branch(Some("source"), Some(Direction::Outgoing)),
        (Some(_), Direction::Incoming) => branch(Some("target"), Some(Direction::Incoming)),
        (Some(_), Direction::Both) => format!(
            "{} UNION ALL {}",
            branch(Some("source"), Some(Direction::Outgoing)),
            branch(Some("target"), Some(Direction::Incoming))
        ),
    };
    // 'outgoing' sorts after 'incoming', so DESC lists the outgoing copy of a self-loop first
    format!("{} ORDER BY created_at, seq, dir DESC LIMIT ?7", body)
}

impl EdgeStore {
    /// Edges matching a filter, oldest first.
    ///
    /// With an anchor entity each match carries the direction it was found
    /// in; `Both` is the union, so a self-loop is returned twice.
    pub async fn query_edges(&self, filter: EdgeFilter) -> Result<Vec<EdgeMatch>> {
        self.db
            .with_connection(move |conn| {
                let sql = build_sql(&filter);
                let mut stmt = conn.prepare(&sql)?;
                let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
                let rows = stmt.query_map(
                    params![
                        filter.project_id.map(|p| p.to_string()),
                        filter.entity.as_ref().map(|e| e.entity_type.clone()),
                        filter.entity.as_ref().map(|e| e.entity_id.to_string()),
                        filter.relationship_type,
                        filter.active_only,
                        filter.created_after.as_ref().map(codec::ts),
                        limit,
                    ],
                    |row| {
                        let edge = row_to_edge(row)?;
                        let dir: Option<String> = row.get(EDGE_COLUMN_COUNT)?;
                        let direction = match dir.as_deref() {
                            Some("outgoing") => Some(Direction::Outgoing),
                            Some("incoming") => Some(Direction::Incoming),
                            _ => None,
                        };
                        Ok(EdgeMatch { edge, direction })
                    },
                )?;

                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }
}
