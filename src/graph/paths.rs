use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::Result;
use crate::model::{Direction, EntityRef};

use super::adjacency::{hops, Adjacency, Hop};
use super::{GraphPath, PathStep};

fn step(from: &EntityRef, hop: &Hop) -> PathStep {
    PathStep {
        edge_id: hop.edge.edge_id,
        relationship_type: hop.edge.relationship_type.clone(),
        from: from.clone(),
        to: hop.neighbor.clone(),
    }
}

/// Breadth-first search along outgoing (and bidirectional) edges.
/// The first path discovered wins.
pub(crate) fn shortest_path<A: Adjacency + ?Sized>(
    adj: &mut A,
    source: &EntityRef,
    target: &EntityRef,
    max_depth: usize,
) -> Result<Option<GraphPath>> {
    if source == target {
        return Ok(Some(GraphPath::trivial(source.clone())));
    }

    let mut parent: HashMap<EntityRef, PathStep> = HashMap::new();
    let mut visited = HashSet::from([source.clone()]);
    let mut queue = VecDeque::from([(source.clone(), 0usize)]);

    while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for hop in hops(adj, &node, Direction::Outgoing, None)? {
            if !visited.insert(hop.neighbor.clone()) {
                continue;
            }
            parent.insert(hop.neighbor.clone(), step(&node, &hop));
            if hop.neighbor == *target {
                return Ok(Some(unwind(&parent, source, target)));
            }
            queue.push_back((hop.neighbor, depth + 1));
        }
    }

    Ok(None)
}

fn unwind(parent: &HashMap<EntityRef, PathStep>, source: &EntityRef, target: &EntityRef) -> GraphPath {
    let mut steps = Vec::new();
    let mut cursor = target;
    while cursor != source {
        match parent.get(cursor) {
            Some(s) => {
                steps.push(s.clone());
                cursor = &s.from;
            }
            None => break,
        }
    }
    steps.reverse();
    GraphPath::from_steps(source.clone(), steps)
}

/// Every simple path from `source` to `target` of at most `max_depth` edges.
///
/// Depth-first with an explicit stack; a node may appear once per path.
/// Returns the paths and whether the `max_paths` cap cut the search short.
pub(crate) fn all_paths<A: Adjacency + ?Sized>(
    adj: &mut A,
    source: &EntityRef,
    target: &EntityRef,
    max_depth: usize,
    max_paths: usize,
) -> Result<(Vec<GraphPath>, bool)> {
    if source == target {
        return Ok((vec![GraphPath::trivial(source.clone())], false));
    }
    if max_depth == 0 || max_paths == 0 {
        return Ok((Vec::new(), false));
    }

    let mut paths = Vec::new();
    let mut on_path = HashSet::from([source.clone()]);
    let mut trail = vec![source.clone()];
    let mut steps: Vec<PathStep> = Vec::new();
    let mut frames: Vec<(Vec<Hop>, usize)> = vec![(hops(adj, source, Direction::Outgoing, None)?, 0)];

    while let Some(frame) = frames.last_mut() {
        if frame.1 >= frame.0.len() {
            frames.pop();
            if let Some(done) = trail.pop() {
                on_path.remove(&done);
            }
            steps.pop();
            continue;
        }
        let hop = frame.0[frame.1].clone();
        frame.1 += 1;

        if on_path.contains(&hop.neighbor) {
            continue;
        }
        let from = trail.last().cloned().unwrap_or_else(|| source.clone());

        if hop.neighbor == *target {
            let mut found = steps.clone();
            found.push(step(&from, &hop));
            paths.push(GraphPath::from_steps(source.clone(), found));
            if paths.len() >= max_paths {
                return Ok((paths, true));
            }
            continue;
        }
        if steps.len() + 1 >= max_depth {
            continue;
        }

        steps.push(step(&from, &hop));
        on_path.insert(hop.neighbor.clone());
        trail.push(hop.neighbor.clone());
        frames.push((hops(adj, &hop.neighbor, Direction::Outgoing, None)?, 0));
    }

    Ok((paths, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::adjacency::fixtures::{bidi, edge, node};
    use crate::graph::adjacency::EdgeListAdjacency;

    fn diamond() -> EdgeListAdjacency {
        // 1 -> 2 -> 4, 1 -> 3 -> 4, 2 -> 3, 4 -> 5
        EdgeListAdjacency(vec![edge(1, 2), edge(1, 3), edge(2, 4), edge(3, 4), edge(2, 3), edge(4, 5)])
    }

    #[test]
    fn test_shortest_is_minimal() {
        let mut adj = diamond();
        let path = shortest_path(&mut adj, &node(1), &node(5), 5).unwrap().unwrap();
        assert_eq!(path.hop_count(), 3);
        assert_eq!(path.nodes, vec![node(1), node(2), node(4), node(5)]);
        assert_eq!(path.steps[0].from, node(1));
        assert_eq!(path.steps[2].to, node(5));
    }

    #[test]
    fn test_shortest_respects_depth_and_direction() {
        let mut adj = diamond();
        assert!(shortest_path(&mut adj, &node(1), &node(5), 2).unwrap().is_none());
        assert!(shortest_path(&mut adj, &node(5), &node(1), 10).unwrap().is_none());
    }

    #[test]
    fn test_shortest_same_node_and_bidirectional() {
        let mut adj = EdgeListAdjacency(vec![bidi(1, 2)]);
        let zero = shortest_path(&mut adj, &node(1), &node(1), 3).unwrap().unwrap();
        assert_eq!(zero.hop_count(), 0);
        assert_eq!(zero.nodes, vec![node(1)]);

        let back = shortest_path(&mut adj, &node(2), &node(1), 3).unwrap().unwrap();
        assert_eq!(back.hop_count(), 1);
    }

    #[test]
    fn test_all_paths_enumerated() {
        let mut adj = diamond();
        let (paths, capped) = all_paths(&mut adj, &node(1), &node(4), 5, 100).unwrap();
        assert!(!capped);
        let mut lens: Vec<_> = paths.iter().map(|p| p.hop_count()).collect();
        lens.sort();
        // 1-2-4, 1-3-4, 1-2-3-4
        assert_eq!(lens, vec![2, 2, 3]);
        for p in &paths {
            assert_eq!(p.nodes.first(), Some(&node(1)));
            assert_eq!(p.nodes.last(), Some(&node(4)));
            let unique: HashSet<_> = p.nodes.iter().collect();
            assert_eq!(unique.len(), p.nodes.len());
        }
    }

    #[test]
    fn test_all_paths_depth_bound_and_cap() {
        let mut adj = diamond();
        let (paths, _) = all_paths(&mut adj, &node(1), &node(4), 2, 100).unwrap();
        assert_eq!(paths.len(), 2);

        let (paths, capped) = all_paths(&mut adj, &node(1), &node(4), 5, 1).unwrap();
        assert_eq!(paths.len(), 1);
        assert!(capped);
    }

    #[test]
    fn test_all_paths_with_cycle_terminates() {
        let mut adj = EdgeListAdjacency(vec![edge(1, 2), edge(2, 1), edge(2, 3)]);
        let (paths, _) = all_paths(&mut adj, &node(1), &node(3), 10, 100).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].nodes, vec![node(1), node(2), node(3)]);
    }
}
