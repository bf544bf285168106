// DAG validation
//
// Structural checks run in a fixed order so later checks may assume
// earlier invariants; a cycle check is meaningless until edge endpoints
// are known to exist.

mod graph;
mod semantic;
mod structural;
mod topological;
mod validator;

pub use graph::{
    build_adjacency_list, build_reverse_adjacency_list, compute_in_degrees, find_entry_nodes,
    find_exit_nodes,
};
pub use semantic::{validate_required_inputs, validate_type_compatibility};
pub use structural::{
    validate_edge_references, validate_has_entry_node, validate_no_cycles,
    validate_no_duplicate_edges, validate_no_orphans,
};
pub use topological::{compute_execution_levels, get_execution_order, topological_sort};
pub use validator::{validate_workflow, validate_workflow_full, validate_workflow_structure};

use serde::{Deserialize, Serialize};

use crate::agent::AgentRegistry;

/// Categories of validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ValidationErrorCode {
    // Structural
    CycleDetected,
    InvalidEdgeReference,
    DuplicateEdge,
    NoEntryNode,
    OrphanNode,

    // Semantic
    TypeMismatch,
    MissingRequiredInput,
}

/// A single validation error with context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ValidationError {
    pub code: ValidationErrorCode,
    pub message: String,
    /// Affected node(s)
    #[serde(default)]
    pub node_ids: Vec<String>,
    /// Affected edge(s)
    #[serde(default)]
    pub edge_ids: Vec<String>,
}

impl ValidationError {
    pub fn new(code: ValidationErrorCode, message: impl Into<String>) -> Self {
        ValidationError {
            code,
            message: message.into(),
            node_ids: Vec::new(),
            edge_ids: Vec::new(),
        }
    }

    pub fn with_nodes(mut self, node_ids: Vec<String>) -> Self {
        self.node_ids = node_ids;
        self
    }

    pub fn with_edges(mut self, edge_ids: Vec<String>) -> Self {
        self.edge_ids = edge_ids;
        self
    }
}

/// Result of validating a workflow.
///
/// If `valid` is true, `errors` is empty and `execution_order` holds a
/// topological ordering of the nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<ValidationError>,
    pub execution_order: Option<Vec<String>>,
}

impl ValidationResult {
    pub fn success(execution_order: Option<Vec<String>>) -> Self {
        ValidationResult {
            valid: true,
            errors: Vec::new(),
            execution_order,
        }
    }

    pub fn failure(errors: Vec<ValidationError>) -> Self {
        ValidationResult {
            valid: false,
            errors,
            execution_order: None,
        }
    }
}

/// Options for workflow validation
#[derive(Default)]
pub struct ValidateOptions<'a> {
    /// Agent registry for semantic validation. If None, semantic checks are skipped.
    pub agent_registry: Option<&'a AgentRegistry>,
    /// Stop at the first failing check instead of collecting all errors
    pub fail_fast: bool,
}
