use std::collections::{BTreeSet, HashMap, HashSet};

use uuid::Uuid;

use crate::model::{Edge, EntityRef};

use super::Cycle;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Cycles over directed source -> target edges.
///
/// Depth-first with an explicit stack and global visit markers: every back
/// edge to a node still on the stack closes one cycle. Bidirectional flags
/// are ignored. Start nodes and neighbors are visited in a fixed order so the
/// output is deterministic. Returns the cycles and whether `max_cycles` cut
/// the search short.
pub(crate) fn find_cycles(edges: &[Edge], max_cycles: usize) -> (Vec<Cycle>, bool) {
    let nodes: Vec<EntityRef> = edges
        .iter()
        .flat_map(|e| [e.source.clone(), e.target.clone()])
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let index: HashMap<&EntityRef, usize> = nodes.iter().enumerate().map(|(i, n)| (n, i)).collect();

    let mut out: Vec<Vec<(usize, Uuid)>> = vec![Vec::new(); nodes.len()];
    for e in edges {
        if let (Some(&s), Some(&t)) = (index.get(&e.source), index.get(&e.target)) {
            out[s].push((t, e.edge_id));
        }
    }

    let mut mark = vec![Mark::Unvisited; nodes.len()];
    let mut seen: HashSet<Vec<usize>> = HashSet::new();
    let mut cycles = Vec::new();

    for start in 0..nodes.len() {
        if mark[start] != Mark::Unvisited {
            continue;
        }
        mark[start] = Mark::OnStack;
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        // via[i] is the edge from stack[i] to stack[i + 1]
        let mut via: Vec<Uuid> = Vec::new();

        while let Some(&(node, next)) = stack.last() {
            if next >= out[node].len() {
                mark[node] = Mark::Done;
                stack.pop();
                via.pop();
                continue;
            }
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            let (succ, edge_id) = out[node][next];

            match mark[succ] {
                Mark::Unvisited => {
                    mark[succ] = Mark::OnStack;
                    via.push(edge_id);
                    stack.push((succ, 0));
                }
                Mark::OnStack => {
                    let Some(pos) = stack.iter().position(|&(n, _)| n == succ) else {
                        continue;
                    };
                    let ring: Vec<usize> = stack[pos..].iter().map(|&(n, _)| n).collect();
                    let mut ring_edges: Vec<Uuid> = via[pos..].to_vec();
                    ring_edges.push(edge_id);

                    let (ring, ring_edges) = normalize(ring, ring_edges);
                    if seen.insert(ring.clone()) {
                        cycles.push(Cycle {
                            nodes: ring.iter().map(|&i| nodes[i].clone()).collect(),
                            edge_ids: ring_edges,
                        });
                        if cycles.len() >= max_cycles {
                            return (cycles, true);
                        }
                    }
                }
                Mark::Done => {}
            }
        }
    }

    (cycles, false)
}

/// Rotate so the smallest node comes first, keeping edges aligned.
fn normalize(mut ring: Vec<usize>, mut ring_edges: Vec<Uuid>) -> (Vec<usize>, Vec<Uuid>) {
    let pivot = ring
        .iter()
        .enumerate()
        .min_by_key(|&(_, n)| *n)
        .map(|(i, _)| i)
        .unwrap_or(0);
    ring.rotate_left(pivot);
    ring_edges.rotate_left(pivot);
    (ring, ring_edges)
}
