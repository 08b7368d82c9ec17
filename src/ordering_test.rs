use crate::graph::{FlowEdge, FlowGraph};
use crate::ordering::*;

fn graph(edges: &[(&str, &str)]) -> FlowGraph {
    let mut g = FlowGraph::new();
    for (child, parent) in edges {
        g.add_edge(FlowEdge { child: child.to_string(), parent: parent.to_string(), matched_token: "🎵".to_string() });
    }
    g
}

fn position(order: &[String], id: &str) -> usize {
    order.iter().position(|x| x == id).unwrap()
}

#[test]
fn test_chain() {
    // c -> b -> a, ids chosen so that alphabetical order would be wrong.
    let g = graph(&[("c", "b"), ("b", "a")]);
    assert_eq!(propagation_order(&g), vec!["c", "b", "a"]);
}

#[test]
fn test_every_child_before_its_parent() {
    let g = graph(&[
        ("leaf1", "mid"),
        ("leaf2", "mid"),
        ("leaf2", "top"),
        ("mid", "top"),
        ("mid", "other"),
        ("z", "a"),
    ]);
    let order = propagation_order(&g);
    assert_eq!(order.len(), g.node_count());
    for edge in g.edges() {
        assert!(position(&order, &edge.child) < position(&order, &edge.parent), "{:?}", edge);
    }
}

#[test]
fn test_ties_break_by_id() {
    let g = graph(&[("b", "p"), ("a", "p"), ("c", "q")]);
    assert_eq!(propagation_order(&g), vec!["a", "b", "c", "p", "q"]);
}

#[test]
fn test_isolated_nodes_are_included() {
    let mut g = graph(&[("a", "b")]);
    g.add_node("lonely");
    let order = propagation_order(&g);
    assert_eq!(order, vec!["a", "b", "lonely"]);
}

#[test]
fn test_kept_cycle_is_processed_once_as_a_unit() {
    let g = graph(&[("x", "b"), ("a", "b"), ("b", "a"), ("a", "y")]);
    let order = propagation_order(&g);
    assert_eq!(order, vec!["x", "a", "b", "y"]);
}

#[test]
fn test_empty_graph() {
    assert!(propagation_order(&FlowGraph::new()).is_empty());
}
