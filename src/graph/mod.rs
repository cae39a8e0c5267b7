//! Graph queries over active edges: traversal, paths, cycles and degree.
//!
//! Every query loads what it needs inside one blocking database task;
//! nothing is kept in memory between calls. Unset depth and node bounds take
//! the configured defaults; requested bounds above the limits are clamped.

mod adjacency;
mod cycles;
mod degree;
mod paths;
mod traversal;

pub(crate) use adjacency::scope_edges;

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::config::TraversalConfig;
use crate::db::Db;
use crate::error::Result;
use crate::model::{Direction, Edge, EntityRef, Scope};
use crate::registry::EntityRegistry;

use adjacency::SqlAdjacency;

/// An entity reached from a traversal root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedEntity {
    pub entity: EntityRef,
    pub hop_distance: usize,
    /// Type of the edge the entity was first reached through.
    pub relationship_type: String,
    pub edge_id: Uuid,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubgraphNode {
    pub entity: EntityRef,
    pub hop_distance: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subgraph {
    pub root: EntityRef,
    /// Root first, then breadth-first discovery order.
    pub nodes: Vec<SubgraphNode>,
    pub edges: Vec<Edge>,
    /// Set when `max_nodes` forced entities to be dropped.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathStep {
    pub edge_id: Uuid,
    pub relationship_type: String,
    pub from: EntityRef,
    pub to: EntityRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphPath {
    pub nodes: Vec<EntityRef>,
    pub steps: Vec<PathStep>,
}

impl GraphPath {
    pub(crate) fn trivial(node: EntityRef) -> Self {
        Self {
            nodes: vec![node],
            steps: Vec::new(),
        }
    }

    pub(crate) fn from_steps(source: EntityRef, steps: Vec<PathStep>) -> Self {
        let mut nodes = Vec::with_capacity(steps.len() + 1);
        nodes.push(source);
        nodes.extend(steps.iter().map(|s| s.to.clone()));
        Self { nodes, steps }
    }

    /// Number of edges on the path.
    pub fn hop_count(&self) -> usize {
        self.steps.len()
    }
}

/// A directed cycle, starting at its smallest entity.
/// `edge_ids[i]` leads from `nodes[i]` to the next node around the ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cycle {
    pub nodes: Vec<EntityRef>,
    pub edge_ids: Vec<Uuid>,
}

#[derive(Clone)]
pub struct GraphQueryEngine {
    db: Db,
    limits: TraversalConfig,
    entities: Option<Arc<dyn EntityRegistry>>,
}

impl std::fmt::Debug for GraphQueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQueryEngine")
            .field("db", &self.db)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl GraphQueryEngine {
    pub fn new(db: Db, limits: TraversalConfig) -> Self {
        Self {
            db,
            limits,
            entities: None,
        }
    }

    pub fn with_entity_registry(mut self, registry: Arc<dyn EntityRegistry>) -> Self {
        self.entities = Some(registry);
        self
    }

    pub fn limits(&self) -> &TraversalConfig {
        &self.limits
    }

    pub async fn get_related_entities(
        &self,
        entity: &EntityRef,
        relationship_type: Option<&str>,
        direction: Direction,
        max_depth: Option<usize>,
        scope: Scope,
    ) -> Result<Vec<RelatedEntity>> {
        let root = entity.clone();
        let rel = relationship_type.map(str::to_string);
        let depth = self.limits.clamp_depth(max_depth);
        self.db
            .with_connection(move |conn| {
                let mut adj = SqlAdjacency::new(conn, scope);
                traversal::related_entities(&mut adj, &root, rel.as_deref(), direction, depth)
            })
            .await
    }

    pub async fn get_subgraph(
        &self,
        entity: &EntityRef,
        depth: Option<usize>,
        max_nodes: Option<usize>,
        scope: Scope,
    ) -> Result<Subgraph> {
        let root = entity.clone();
        let depth = self.limits.clamp_depth(depth);
        let max_nodes = self.limits.clamp_nodes(max_nodes);
        let subgraph = self
            .db
            .with_connection(move |conn| {
                let mut adj = SqlAdjacency::new(conn, scope);
                traversal::subgraph(&mut adj, &root, depth, max_nodes)
            })
            .await?;
        if subgraph.truncated {
            log::warn!(
                "Subgraph around {} truncated at {} nodes",
                subgraph.root,
                subgraph.nodes.len()
            );
        }
        Ok(subgraph)
    }

    pub async fn find_shortest_path(
        &self,
        source: &EntityRef,
        target: &EntityRef,
        max_depth: Option<usize>,
        scope: Scope,
    ) -> Result<Option<GraphPath>> {
        let (source, target) = (source.clone(), target.clone());
        let depth = self.limits.clamp_depth(max_depth);
        self.db
            .with_connection(move |conn| {
                let mut adj = SqlAdjacency::new(conn, scope);
                paths::shortest_path(&mut adj, &source, &target, depth)
            })
            .await
    }

    pub async fn find_all_paths(
        &self,
        source: &EntityRef,
        target: &EntityRef,
        max_depth: Option<usize>,
        scope: Scope,
    ) -> Result<Vec<GraphPath>> {
        let (source, target) = (source.clone(), target.clone());
        let depth = self.limits.clamp_depth(max_depth);
        let max_paths = self.limits.max_paths;
        let (found, capped) = self
            .db
            .with_connection(move |conn| {
                let mut adj = SqlAdjacency::new(conn, scope);
                paths::all_paths(&mut adj, &source, &target, depth, max_paths)
            })
            .await?;
        if capped {
            log::warn!("Path enumeration stopped at {} paths", found.len());
        }
        Ok(found)
    }

    pub async fn detect_cycles(&self, scope: Scope) -> Result<Vec<Cycle>> {
        let max_cycles = self.limits.max_cycles;
        let (found, capped) = self
            .db
            .with_connection(move |conn| {
                let edges = scope_edges(conn, scope)?;
                Ok(cycles::find_cycles(&edges, max_cycles))
            })
            .await?;
        if capped {
            log::warn!("Cycle detection stopped at {} cycles", found.len());
        }
        Ok(found)
    }

    /// Known entities of `entity_type` with no active edge in scope.
    ///
    /// Known means enumerated by the entity registry or appearing as the
    /// endpoint of any edge in scope, active or not.
    pub async fn find_orphans(&self, entity_type: &str, scope: Scope) -> Result<Vec<EntityRef>> {
        let ty = entity_type.to_string();
        let registered = self
            .entities
            .as_ref()
            .map(|r| r.entities_of_type(entity_type, scope))
            .unwrap_or_default();
        self.db
            .with_connection(move |conn| degree::orphans(conn, scope, &ty, registered))
            .await
    }

    pub async fn find_most_connected(&self, scope: Scope, top_k: usize) -> Result<Vec<(EntityRef, usize)>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.db
            .with_connection(move |conn| degree::degrees(conn, scope, 1, Some(top_k)))
            .await
    }

    /// Every entity with at least `min_degree` active edges.
    pub async fn find_hubs(&self, scope: Scope, min_degree: usize) -> Result<Vec<(EntityRef, usize)>> {
        let min_degree = min_degree.max(1);
        self.db
            .with_connection(move |conn| degree::degrees(conn, scope, min_degree, None))
            .await
    }
}
