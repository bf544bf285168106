// Graph utilities for DAG validation
//
// Pure functions transforming workflow structure into forms useful for
// validation algorithms. All iteration is keyed off `workflow.nodes`
// order so results are deterministic for a given workflow value.

use std::collections::HashMap;

use crate::workflow::Workflow;

/// node id -> outgoing edge ids
pub type AdjacencyList = HashMap<String, Vec<String>>;
/// node id -> incoming edge ids
pub type ReverseAdjacencyList = HashMap<String, Vec<String>>;
/// node id -> count of incoming edges
pub type InDegreeMap = HashMap<String, usize>;

/// Build adjacency list from workflow edges. O(V + E).
pub fn build_adjacency_list(workflow: &Workflow) -> AdjacencyList {
    let mut adj: AdjacencyList = workflow
        .nodes
        .iter()
        .map(|n| (n.id.clone(), Vec::new()))
        .collect();

    for edge in &workflow.edges {
        if let Some(outgoing) = adj.get_mut(&edge.source) {
            outgoing.push(edge.id.clone());
        }
    }

    adj
}

/// Build reverse adjacency list from workflow edges. O(V + E).
pub fn build_reverse_adjacency_list(workflow: &Workflow) -> ReverseAdjacencyList {
    let mut rev: ReverseAdjacencyList = workflow
        .nodes
        .iter()
        .map(|n| (n.id.clone(), Vec::new()))
        .collect();

    for edge in &workflow.edges {
        if let Some(incoming) = rev.get_mut(&edge.target) {
            incoming.push(edge.id.clone());
        }
    }

    rev
}

/// Compute in-degree for each node. O(V + E).
pub fn compute_in_degrees(workflow: &Workflow) -> InDegreeMap {
    let mut degrees: InDegreeMap = workflow
        .nodes
        .iter()
        .map(|n| (n.id.clone(), 0))
        .collect();

    for edge in &workflow.edges {
        if let Some(degree) = degrees.get_mut(&edge.target) {
            *degree += 1;
        }
    }

    degrees
}

/// Find entry nodes (no incoming edges), in node declaration order.
pub fn find_entry_nodes(workflow: &Workflow) -> Vec<String> {
    let in_degrees = compute_in_degrees(workflow);

    workflow
        .nodes
        .iter()
        .filter(|n| in_degrees.get(&n.id).copied().unwrap_or(0) == 0)
        .map(|n| n.id.clone())
        .collect()
}

/// Find exit nodes (no outgoing edges), in node declaration order.
pub fn find_exit_nodes(workflow: &Workflow) -> Vec<String> {
    let adj = build_adjacency_list(workflow);

    workflow
        .nodes
        .iter()
        .filter(|n| adj.get(&n.id).map(|out| out.is_empty()).unwrap_or(true))
        .map(|n| n.id.clone())
        .collect()
}
