/// The ordering module computes the order in which parents are processed: every playlist comes after
/// all playlists that flow into it, so tracks travel up a chain of any length within one run.
///
/// The order is computed over strongly connected components. On an acyclic graph each component is
/// a single playlist. If cycle edges were kept, a cycle is processed as a unit with its members in
/// id order.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::common::PlaylistId;
use crate::cycles::strongly_connected_components;
use crate::graph::FlowGraph;

/// Kahn's algorithm over the condensation. Among ready components the one with the smallest id
/// goes first.
pub fn propagation_order(graph: &FlowGraph) -> Vec<PlaylistId> {
    let components = strongly_connected_components(graph);
    let mut component_of: HashMap<&str, usize> = HashMap::new();
    for (i, members) in components.iter().enumerate() {
        for m in members {
            component_of.insert(m.as_str(), i);
        }
    }

    // Edges run child component -> parent component.
    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); components.len()];
    let mut in_degree = vec![0usize; components.len()];
    for edge in graph.edges() {
        let (Some(&from), Some(&to)) = (component_of.get(edge.child.as_str()), component_of.get(edge.parent.as_str())) else {
            continue;
        };
        if from != to && successors[from].insert(to) {
            in_degree[to] += 1;
        }
    }

    // Components are sorted internally, so the first member is the smallest id.
    let key = |i: usize| (components[i].first().cloned().unwrap_or_default(), i);
    let mut ready: BTreeSet<(PlaylistId, usize)> =
        (0..components.len()).filter(|&i| in_degree[i] == 0).map(key).collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some((_, i)) = ready.pop_first() {
        order.extend(components[i].iter().cloned());
        for &next in &successors[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(key(next));
            }
        }
    }

    debug!("propagation order over {} playlists in {} components", order.len(), components.len());
    order
}
