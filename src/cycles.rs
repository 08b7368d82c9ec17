/// The cycles module finds strongly connected components of the flow graph (Tarjan's algorithm) and
/// removes every edge inside a component with more than one member. Cycle edges carry no useful
/// direction: propagating along them would shuffle the same tracks back and forth on every run.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::{info, warn};

use crate::common::PlaylistId;
use crate::graph::{FlowEdge, FlowGraph};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleDiagnostic {
    /// Sorted member ids.
    pub members: Vec<PlaylistId>,
    /// Every edge between members, sorted by (child, parent).
    pub edges: Vec<FlowEdge>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub cycles: Vec<CycleDiagnostic>,
    /// Nodes that had edges before removal and have none after.
    pub isolated: Vec<PlaylistId>,
}

impl CycleReport {
    pub fn skipped_edge_count(&self) -> usize {
        self.cycles.iter().map(|c| c.edges.len()).sum()
    }
}

const UNVISITED: usize = usize::MAX;

/// All strongly connected components, each sorted by id. Components come out in reverse
/// topological order of the condensation (parents before the children that flow into them).
pub fn strongly_connected_components(graph: &FlowGraph) -> Vec<Vec<PlaylistId>> {
    let ids: Vec<&PlaylistId> = graph.nodes().collect();
    let index_of: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
    let adjacency: Vec<Vec<usize>> = ids
        .iter()
        .map(|id| graph.parents_of(id).filter_map(|p| index_of.get(p.as_str()).copied()).collect())
        .collect();

    let n = ids.len();
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut next_index = 0;
    let mut components = Vec::new();

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next_index;
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;
        // (node, next neighbor to visit)
        let mut call_stack: Vec<(usize, usize)> = vec![(root, 0)];

        while let Some(frame) = call_stack.last_mut() {
            let v = frame.0;
            if frame.1 < adjacency[v].len() {
                let w = adjacency[v][frame.1];
                frame.1 += 1;
                if index[w] == UNVISITED {
                    index[w] = next_index;
                    lowlink[w] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    call_stack.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
                continue;
            }

            call_stack.pop();
            if let Some(&(caller, _)) = call_stack.last() {
                lowlink[caller] = lowlink[caller].min(lowlink[v]);
            }
            if lowlink[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(ids[w].clone());
                    if w == v {
                        break;
                    }
                }
                component.sort();
                components.push(component);
            }
        }
    }

    components
}

/// Diagnostics for every component with more than one member, sorted by first member.
pub fn find_cycles(graph: &FlowGraph) -> Vec<CycleDiagnostic> {
    let mut cycles: Vec<CycleDiagnostic> = strongly_connected_components(graph)
        .into_iter()
        .filter(|c| c.len() > 1)
        .map(|members| {
            let member_set: BTreeSet<&str> = members.iter().map(|m| m.as_str()).collect();
            let mut edges = Vec::new();
            for child in &members {
                for parent in graph.parents_of(child) {
                    if !member_set.contains(parent.as_str()) {
                        continue;
                    }
                    if let Some(edge) = graph.edge(child, parent) {
                        edges.push(edge.clone());
                    }
                }
            }
            CycleDiagnostic { members, edges }
        })
        .collect();
    cycles.sort_by(|a, b| a.members.cmp(&b.members));
    cycles
}

/// Remove all cycle edges from `graph`, leaving it acyclic.
pub fn remove_cycles(graph: &mut FlowGraph) -> CycleReport {
    let cycles = find_cycles(graph);
    let mut isolated = BTreeSet::new();
    for cycle in &cycles {
        warn!("skipping cycle of {} playlists ({} edges): {}", cycle.members.len(), cycle.edges.len(), cycle.members.join(", "));
        for edge in &cycle.edges {
            graph.remove_edge(&edge.child, &edge.parent);
        }
        for member in &cycle.members {
            if !graph.has_edges(member) {
                isolated.insert(member.clone());
            }
        }
    }
    if !isolated.is_empty() {
        info!("{} playlists have no remaining flow edges after cycle removal", isolated.len());
    }
    CycleReport { cycles, isolated: isolated.into_iter().collect() }
}

pub fn is_acyclic(graph: &FlowGraph) -> bool {
    strongly_connected_components(graph).iter().all(|c| c.len() == 1)
}
