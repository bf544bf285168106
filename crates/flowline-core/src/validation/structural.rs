// Structural validators for the DAG invariants
//
// Each validator is a pure function returning a ValidationResult.

use std::collections::{HashMap, HashSet, VecDeque};

use super::graph::{
    build_adjacency_list, build_reverse_adjacency_list, find_entry_nodes, find_exit_nodes,
};
use super::{ValidationError, ValidationErrorCode, ValidationResult};
use crate::workflow::Workflow;

/// Every edge must reference existing nodes.
pub fn validate_edge_references(workflow: &Workflow) -> ValidationResult {
    let node_ids: HashSet<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut errors = Vec::new();

    for edge in &workflow.edges {
        if !node_ids.contains(edge.source.as_str()) {
            errors.push(
                ValidationError::new(
                    ValidationErrorCode::InvalidEdgeReference,
                    format!("Edge references non-existent source node: {}", edge.source),
                )
                .with_nodes(vec![edge.source.clone()])
                .with_edges(vec![edge.id.clone()]),
            );
        }

        if !node_ids.contains(edge.target.as_str()) {
            errors.push(
                ValidationError::new(
                    ValidationErrorCode::InvalidEdgeReference,
                    format!("Edge references non-existent target node: {}", edge.target),
                )
                .with_nodes(vec![edge.target.clone()])
                .with_edges(vec![edge.id.clone()]),
            );
        }
    }

    if errors.is_empty() {
        ValidationResult::success(None)
    } else {
        ValidationResult::failure(errors)
    }
}

/// No duplicate edges between the same (source, source_port, target, target_port).
pub fn validate_no_duplicate_edges(workflow: &Workflow) -> ValidationResult {
    let mut seen: HashMap<String, &str> = HashMap::new();
    let mut errors = Vec::new();

    for edge in &workflow.edges {
        let key = format!(
            "{}:{}->{}:{}",
            edge.source, edge.source_port, edge.target, edge.target_port
        );

        match seen.get(key.as_str()) {
            Some(existing) => {
                errors.push(
                    ValidationError::new(
                        ValidationErrorCode::DuplicateEdge,
                        "Duplicate edge between same ports",
                    )
                    .with_edges(vec![existing.to_string(), edge.id.clone()]),
                );
            }
            None => {
                seen.insert(key, edge.id.as_str());
            }
        }
    }

    if errors.is_empty() {
        ValidationResult::success(None)
    } else {
        ValidationResult::failure(errors)
    }
}

/// Workflow must have at least one entry node.
pub fn validate_has_entry_node(workflow: &Workflow) -> ValidationResult {
    if workflow.nodes.is_empty() {
        return ValidationResult::failure(vec![ValidationError::new(
            ValidationErrorCode::NoEntryNode,
            "Workflow has no nodes",
        )]);
    }

    if find_entry_nodes(workflow).is_empty() {
        return ValidationResult::failure(vec![ValidationError::new(
            ValidationErrorCode::NoEntryNode,
            "Workflow has no entry nodes (all nodes have incoming edges)",
        )]);
    }

    ValidationResult::success(None)
}

/// Detect cycles using iterative DFS with three-color marking.
///
/// 0 = unvisited, 1 = visiting (on the current DFS path), 2 = done.
pub fn validate_no_cycles(workflow: &Workflow) -> ValidationResult {
    let adj = build_adjacency_list(workflow);
    let edge_map = workflow.edge_map();

    let mut state: HashMap<String, u8> =
        workflow.nodes.iter().map(|n| (n.id.clone(), 0)).collect();

    for node in &workflow.nodes {
        if state.get(&node.id).copied().unwrap_or(0) != 0 {
            continue;
        }

        // (node id, next outgoing edge index)
        let mut stack: Vec<(String, usize)> = vec![(node.id.clone(), 0)];
        state.insert(node.id.clone(), 1);

        loop {
            let (current, idx) = match stack.last_mut() {
                Some(frame) => {
                    let current = frame.0.clone();
                    let idx = frame.1;
                    frame.1 += 1;
                    (current, idx)
                }
                None => break,
            };

            let edge_id = adj.get(&current).and_then(|edges| edges.get(idx)).cloned();

            match edge_id {
                None => {
                    // All outgoing edges explored
                    state.insert(current, 2);
                    stack.pop();
                }
                Some(edge_id) => {
                    let Some(edge) = edge_map.get(edge_id.as_str()) else {
                        continue;
                    };

                    match state.get(&edge.target).copied().unwrap_or(0) {
                        // Back edge: every node on the DFS path participates
                        1 => {
                            let cycle_nodes: Vec<String> =
                                stack.iter().map(|(id, _)| id.clone()).collect();
                            return ValidationResult::failure(vec![ValidationError::new(
                                ValidationErrorCode::CycleDetected,
                                "Workflow contains a cycle",
                            )
                            .with_nodes(cycle_nodes)]);
                        }
                        0 => {
                            state.insert(edge.target.clone(), 1);
                            stack.push((edge.target.clone(), 0));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    ValidationResult::success(None)
}

/// No orphan nodes: every node must be reachable from an entry node or
/// able to reach an exit node.
///
/// Uses bidirectional BFS: forward from entries, backward from exits.
pub fn validate_no_orphans(workflow: &Workflow) -> ValidationResult {
    let entries = find_entry_nodes(workflow);
    let exits = find_exit_nodes(workflow);
    let adj = build_adjacency_list(workflow);
    let rev_adj = build_reverse_adjacency_list(workflow);
    let edge_map = workflow.edge_map();

    let mut reachable_from_entry: HashSet<String> = HashSet::new();
    let mut forward: VecDeque<String> = entries.into_iter().collect();

    while let Some(node_id) = forward.pop_front() {
        if !reachable_from_entry.insert(node_id.clone()) {
            continue;
        }
        for edge_id in adj.get(&node_id).into_iter().flatten() {
            if let Some(edge) = edge_map.get(edge_id.as_str()) {
                forward.push_back(edge.target.clone());
            }
        }
    }

    let mut reaches_exit: HashSet<String> = HashSet::new();
    let mut backward: VecDeque<String> = exits.into_iter().collect();

    while let Some(node_id) = backward.pop_front() {
        if !reaches_exit.insert(node_id.clone()) {
            continue;
        }
        for edge_id in rev_adj.get(&node_id).into_iter().flatten() {
            if let Some(edge) = edge_map.get(edge_id.as_str()) {
                backward.push_back(edge.source.clone());
            }
        }
    }

    let orphans: Vec<String> = workflow
        .nodes
        .iter()
        .filter(|n| !reachable_from_entry.contains(&n.id) && !reaches_exit.contains(&n.id))
        .map(|n| n.id.clone())
        .collect();

    if orphans.is_empty() {
        ValidationResult::success(None)
    } else {
        ValidationResult::failure(vec![ValidationError::new(
            ValidationErrorCode::OrphanNode,
            format!("Found {} orphan node(s) not connected to workflow", orphans.len()),
        )
        .with_nodes(orphans)])
    }
}
