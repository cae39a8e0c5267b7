//! Breadth-first expansion: related entities and subgraphs.

use std::collections::{HashSet, VecDeque};

use uuid::Uuid;

use crate::error::Result;
use crate::model::{Direction, EntityRef};

use super::adjacency::{hops, Adjacency};
use super::{RelatedEntity, Subgraph, SubgraphNode};

/// Entities reachable from `root` within `max_depth` hops.
///
/// Each entity is reported once, at its minimal hop distance, with the edge
/// it was first reached through.
pub(crate) fn related_entities<A: Adjacency + ?Sized>(
    adj: &mut A,
    root: &EntityRef,
    relationship_type: Option<&str>,
    direction: Direction,
    max_depth: usize,
) -> Result<Vec<RelatedEntity>> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    let mut result = Vec::new();

    visited.insert(root.clone());
    queue.push_back((root.clone(), 0usize));

    while let Some((entity, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for hop in hops(adj, &entity, direction, relationship_type)? {
            if !visited.insert(hop.neighbor.clone()) {
                continue;
            }
            queue.push_back((hop.neighbor.clone(), depth + 1));
            result.push(RelatedEntity {
                entity: hop.neighbor,
                hop_distance: depth + 1,
                relationship_type: hop.edge.relationship_type,
                edge_id: hop.edge.edge_id,
                direction: hop.direction,
            });
        }
    }

    Ok(result)
}

/// Neighborhood of `root` in both directions.
///
/// Expansion is level by level; within a level, hops are taken in edge
/// creation order across the whole frontier. Once `max_nodes` entities are
/// kept, further entities are dropped and the result is marked truncated;
/// edges are kept only when both ends are kept.
pub(crate) fn subgraph<A: Adjacency + ?Sized>(
    adj: &mut A,
    root: &EntityRef,
    depth: usize,
    max_nodes: usize,
) -> Result<Subgraph> {
    let max_nodes = max_nodes.max(1);
    let mut kept: HashSet<EntityRef> = HashSet::from([root.clone()]);
    let mut nodes = vec![SubgraphNode {
        entity: root.clone(),
        hop_distance: 0,
    }];

    let mut frontier = vec![root.clone()];
    let mut seen_edges: HashSet<Uuid> = HashSet::new();
    let mut edges = Vec::new();
    let mut truncated = false;

    for level in 1..=depth {
        if frontier.is_empty() {
            break;
        }
        let mut level_hops = Vec::new();
        for entity in &frontier {
            level_hops.extend(hops(adj, entity, Direction::Both, None)?);
        }
        // stable: equal timestamps keep per-node creation order
        level_hops.sort_by(|a, b| a.edge.created_at.cmp(&b.edge.created_at));

        let mut next = Vec::new();
        for hop in level_hops {
            if seen_edges.insert(hop.edge.edge_id) {
                edges.push(hop.edge);
            }
            if kept.contains(&hop.neighbor) {
                continue;
            }
            if kept.len() >= max_nodes {
                truncated = true;
                continue;
            }
            kept.insert(hop.neighbor.clone());
            nodes.push(SubgraphNode {
                entity: hop.neighbor.clone(),
                hop_distance: level,
            });
            next.push(hop.neighbor);
        }
        frontier = next;
    }

    edges.retain(|e| kept.contains(&e.source) && kept.contains(&e.target));

    Ok(Subgraph {
        root: root.clone(),
        nodes,
        edges,
        truncated,
    })
}
