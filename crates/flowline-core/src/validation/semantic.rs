// Semantic validators: type compatibility and required inputs
//
// Both require an agent registry for port schema lookup.

use std::collections::HashSet;

use super::graph::build_reverse_adjacency_list;
use super::{ValidationError, ValidationErrorCode, ValidationResult};
use crate::agent::{types_compatible, AgentRegistry};
use crate::workflow::Workflow;

/// Source output type must match target input type on every edge.
pub fn validate_type_compatibility(
    workflow: &Workflow,
    registry: &AgentRegistry,
) -> ValidationResult {
    let node_map = workflow.node_map();
    let mut errors = Vec::new();

    for edge in &workflow.edges {
        let (Some(source_node), Some(target_node)) = (
            node_map.get(edge.source.as_str()),
            node_map.get(edge.target.as_str()),
        ) else {
            // Missing nodes are caught by structural validation
            continue;
        };

        // Input/output nodes have dynamic types; only typed agents checked
        let (Some(source_agent_id), Some(target_agent_id)) = (
            source_node.config.agent_id.as_deref(),
            target_node.config.agent_id.as_deref(),
        ) else {
            continue;
        };

        let (Some(source_agent), Some(target_agent)) =
            (registry.get(source_agent_id), registry.get(target_agent_id))
        else {
            errors.push(
                ValidationError::new(
                    ValidationErrorCode::TypeMismatch,
                    "Unknown agent definition referenced",
                )
                .with_nodes(vec![edge.source.clone(), edge.target.clone()])
                .with_edges(vec![edge.id.clone()]),
            );
            continue;
        };

        let Some(source_port) = source_agent.output_port(&edge.source_port) else {
            errors.push(
                ValidationError::new(
                    ValidationErrorCode::TypeMismatch,
                    format!("Source node has no output port: {}", edge.source_port),
                )
                .with_nodes(vec![edge.source.clone()])
                .with_edges(vec![edge.id.clone()]),
            );
            continue;
        };

        let Some(target_port) = target_agent.input_port(&edge.target_port) else {
            errors.push(
                ValidationError::new(
                    ValidationErrorCode::TypeMismatch,
                    format!("Target node has no input port: {}", edge.target_port),
                )
                .with_nodes(vec![edge.target.clone()])
                .with_edges(vec![edge.id.clone()]),
            );
            continue;
        };

        if !types_compatible(source_port.data_type, target_port.data_type) {
            errors.push(
                ValidationError::new(
                    ValidationErrorCode::TypeMismatch,
                    format!(
                        "Type mismatch: {:?} -> {:?}",
                        source_port.data_type, target_port.data_type
                    ),
                )
                .with_nodes(vec![edge.source.clone(), edge.target.clone()])
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

/// All required input ports of a node must have incoming edges.
pub fn validate_required_inputs(workflow: &Workflow, registry: &AgentRegistry) -> ValidationResult {
    let rev_adj = build_reverse_adjacency_list(workflow);
    let edge_map = workflow.edge_map();
    let mut errors = Vec::new();

    for node in &workflow.nodes {
        let Some(agent_id) = node.config.agent_id.as_deref() else {
            continue;
        };

        // Unknown agents are caught by type compatibility validation
        let Some(agent) = registry.get(agent_id) else {
            continue;
        };

        let connected_ports: HashSet<&str> = rev_adj
            .get(&node.id)
            .into_iter()
            .flatten()
            .filter_map(|edge_id| edge_map.get(edge_id.as_str()))
            .map(|edge| edge.target_port.as_str())
            .collect();

        let missing_ports: Vec<&str> = agent
            .input_ports
            .iter()
            .filter(|port| port.required && !connected_ports.contains(port.name.as_str()))
            .map(|port| port.name.as_str())
            .collect();

        if !missing_ports.is_empty() {
            errors.push(
                ValidationError::new(
                    ValidationErrorCode::MissingRequiredInput,
                    format!("Missing required inputs: {}", missing_ports.join(", ")),
                )
                .with_nodes(vec![node.id.clone()]),
            );
        }
    }

    if errors.is_empty() {
        ValidationResult::success(None)
    } else {
        ValidationResult::failure(errors)
    }
}
