/// The graph module turns extracted signals into the flow graph: a directed edge child → parent for
/// every pair where the child's trailing signals share a token with the parent's leading signals.
///
/// Nodes and adjacency are keyed by playlist id in ordered maps, so iteration is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::common::{PlaylistDescriptor, PlaylistId};
use crate::signals::SignalSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowEdge {
    pub child: PlaylistId,
    pub parent: PlaylistId,
    pub matched_token: String,
}

/// Name filters restricting which playlists may act as children (sources) and parents (targets).
/// An empty filter list admits every playlist.
#[derive(Debug, Clone, Default)]
pub struct InclusionFilters {
    pub sources: Vec<Regex>,
    pub targets: Vec<Regex>,
}

impl InclusionFilters {
    pub fn new(sources: Vec<Regex>, targets: Vec<Regex>) -> Self {
        Self { sources, targets }
    }

    pub fn allows_source(&self, name: &str) -> bool {
        self.sources.is_empty() || self.sources.iter().any(|r| r.is_match(name))
    }

    pub fn allows_target(&self, name: &str) -> bool {
        self.targets.is_empty() || self.targets.iter().any(|r| r.is_match(name))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    nodes: BTreeSet<PlaylistId>,
    edges: BTreeMap<(PlaylistId, PlaylistId), FlowEdge>,
    // child -> parents
    parents: BTreeMap<PlaylistId, BTreeSet<PlaylistId>>,
    // parent -> children
    children: BTreeMap<PlaylistId, BTreeSet<PlaylistId>>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: impl Into<PlaylistId>) {
        self.nodes.insert(id.into());
    }

    /// Insert an edge, adding its endpoints as nodes. Self-loops and repeated (child, parent) pairs
    /// are rejected; the first edge for a pair keeps its matched token.
    pub fn add_edge(&mut self, edge: FlowEdge) -> bool {
        if edge.child == edge.parent {
            return false;
        }
        let key = (edge.child.clone(), edge.parent.clone());
        if self.edges.contains_key(&key) {
            return false;
        }
        self.nodes.insert(edge.child.clone());
        self.nodes.insert(edge.parent.clone());
        self.parents.entry(edge.child.clone()).or_default().insert(edge.parent.clone());
        self.children.entry(edge.parent.clone()).or_default().insert(edge.child.clone());
        self.edges.insert(key, edge);
        true
    }

    pub fn remove_edge(&mut self, child: &str, parent: &str) -> Option<FlowEdge> {
        let edge = self.edges.remove(&(child.to_string(), parent.to_string()))?;
        if let Some(ps) = self.parents.get_mut(child) {
            ps.remove(parent);
            if ps.is_empty() {
                self.parents.remove(child);
            }
        }
        if let Some(cs) = self.children.get_mut(parent) {
            cs.remove(child);
            if cs.is_empty() {
                self.children.remove(parent);
            }
        }
        Some(edge)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PlaylistId> {
        self.nodes.iter()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Edges sorted by (child, parent).
    pub fn edges(&self) -> impl Iterator<Item = &FlowEdge> {
        self.edges.values()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge(&self, child: &str, parent: &str) -> Option<&FlowEdge> {
        self.edges.get(&(child.to_string(), parent.to_string()))
    }

    pub fn parents_of(&self, id: &str) -> impl Iterator<Item = &PlaylistId> {
        self.parents.get(id).into_iter().flatten()
    }

    pub fn children_of(&self, id: &str) -> impl Iterator<Item = &PlaylistId> {
        self.children.get(id).into_iter().flatten()
    }

    pub fn has_edges(&self, id: &str) -> bool {
        self.parents.contains_key(id) || self.children.contains_key(id)
    }
}

/// Build the flow graph over every playlist that carries a signal.
pub fn build_flow_graph<'a, I>(playlists: I, filters: &InclusionFilters) -> FlowGraph
where
    I: IntoIterator<Item = (&'a PlaylistDescriptor, &'a SignalSet)>,
{
    let playlists: Vec<(&PlaylistDescriptor, &SignalSet)> =
        playlists.into_iter().filter(|(_, s)| !s.is_empty()).collect();

    let mut graph = FlowGraph::new();
    // token -> playlists leading with it
    let mut leading_index: BTreeMap<&str, Vec<&PlaylistDescriptor>> = BTreeMap::new();
    for (playlist, signals) in &playlists {
        graph.add_node(playlist.id.clone());
        if !filters.allows_target(&playlist.name) {
            continue;
        }
        for token in &signals.leading {
            leading_index.entry(token.as_str()).or_default().push(*playlist);
        }
    }

    for (child, signals) in &playlists {
        if !filters.allows_source(&child.name) {
            continue;
        }
        // Trailing tokens are visited in name order, so the first match per parent wins.
        for token in &signals.trailing {
            for parent in leading_index.get(token.as_str()).into_iter().flatten() {
                let added = graph.add_edge(FlowEdge {
                    child: child.id.clone(),
                    parent: parent.id.clone(),
                    matched_token: token.clone(),
                });
                if added {
                    debug!("flow edge {:?} -> {:?} via {}", child.name, parent.name, token);
                }
            }
        }
    }

    graph
}
