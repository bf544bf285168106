// Topological sort for DAG execution ordering
//
// Kahn's algorithm, which also serves as independent cycle detection.
// The ready queue is seeded in node declaration order, so the result is
// deterministic for a given workflow value.

use std::collections::{HashMap, VecDeque};

use super::graph::{build_adjacency_list, compute_in_degrees};
use crate::error::{EngineError, Result};
use crate::workflow::Workflow;

/// Kahn's algorithm. Returns nodes in execution order (all dependencies
/// before dependents), or None if the graph contains a cycle. O(V + E).
pub fn topological_sort(workflow: &Workflow) -> Option<Vec<String>> {
    if workflow.nodes.is_empty() {
        return Some(Vec::new());
    }

    let adj = build_adjacency_list(workflow);
    let edge_map = workflow.edge_map();
    let mut in_degrees = compute_in_degrees(workflow);

    // Seed with entry nodes, in declaration order
    let mut queue: VecDeque<String> = workflow
        .nodes
        .iter()
        .filter(|n| in_degrees.get(&n.id).copied().unwrap_or(0) == 0)
        .map(|n| n.id.clone())
        .collect();

    let mut order = Vec::with_capacity(workflow.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        for edge_id in adj.get(&node_id).into_iter().flatten() {
            let Some(edge) = edge_map.get(edge_id.as_str()) else {
                continue;
            };

            if let Some(degree) = in_degrees.get_mut(&edge.target) {
                *degree -= 1;
                // Target becomes ready when all dependencies processed
                if *degree == 0 {
                    queue.push_back(edge.target.clone());
                }
            }
        }
        order.push(node_id);
    }

    // If not all nodes were emitted, the graph has a cycle
    if order.len() != workflow.nodes.len() {
        return None;
    }

    Some(order)
}

/// Get execution order, assuming the workflow is already validated.
pub fn get_execution_order(workflow: &Workflow) -> Result<Vec<String>> {
    topological_sort(workflow).ok_or_else(|| {
        EngineError::Internal(anyhow::anyhow!(
            "cannot compute execution order: cycle detected"
        ))
    })
}

/// Group nodes by execution level.
///
/// Nodes at the same level can run in parallel. Level 0 = entry nodes;
/// level N = nodes whose deepest dependency is at level N-1. O(V + E).
pub fn compute_execution_levels(workflow: &Workflow) -> HashMap<String, usize> {
    let adj = build_adjacency_list(workflow);
    let edge_map = workflow.edge_map();
    let mut in_degrees = compute_in_degrees(workflow);

    let mut levels: HashMap<String, usize> = HashMap::new();
    let mut queue: VecDeque<String> = VecDeque::new();

    for node in &workflow.nodes {
        if in_degrees.get(&node.id).copied().unwrap_or(0) == 0 {
            levels.insert(node.id.clone(), 0);
            queue.push_back(node.id.clone());
        }
    }

    while let Some(node_id) = queue.pop_front() {
        let current_level = levels.get(&node_id).copied().unwrap_or(0);

        for edge_id in adj.get(&node_id).into_iter().flatten() {
            let Some(edge) = edge_map.get(edge_id.as_str()) else {
                continue;
            };

            let existing = levels.get(&edge.target).copied().unwrap_or(0);
            levels.insert(edge.target.clone(), existing.max(current_level + 1));

            if let Some(degree) = in_degrees.get_mut(&edge.target) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(edge.target.clone());
                }
            }
        }
    }

    levels
}
