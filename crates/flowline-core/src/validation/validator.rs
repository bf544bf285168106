// Composed DAG validator
//
// Check order is fixed: edge references, duplicate edges, entry node,
// acyclicity, orphans, then (with a registry) type compatibility and
// required inputs. Later checks assume earlier invariants hold.

use super::semantic::{validate_required_inputs, validate_type_compatibility};
use super::structural::{
    validate_edge_references, validate_has_entry_node, validate_no_cycles,
    validate_no_duplicate_edges, validate_no_orphans,
};
use super::topological::topological_sort;
use super::{ValidateOptions, ValidationError, ValidationErrorCode, ValidationResult};
use crate::agent::AgentRegistry;
use crate::workflow::Workflow;

/// Validate a workflow against all invariants.
///
/// Collects errors from every check unless `fail_fast` is set, in which
/// case the first failing check short-circuits.
pub fn validate_workflow(workflow: &Workflow, options: ValidateOptions<'_>) -> ValidationResult {
    let mut all_errors: Vec<ValidationError> = Vec::new();

    let structural_checks = [
        validate_edge_references,
        validate_no_duplicate_edges,
        validate_has_entry_node,
        validate_no_cycles,
        validate_no_orphans,
    ];

    for check in structural_checks {
        let result = check(workflow);
        if !result.valid {
            all_errors.extend(result.errors);
            if options.fail_fast {
                return ValidationResult::failure(all_errors);
            }
        }
    }

    if let Some(registry) = options.agent_registry {
        let result = validate_type_compatibility(workflow, registry);
        if !result.valid {
            all_errors.extend(result.errors);
            if options.fail_fast {
                return ValidationResult::failure(all_errors);
            }
        }

        let result = validate_required_inputs(workflow, registry);
        if !result.valid {
            all_errors.extend(result.errors);
            if options.fail_fast {
                return ValidationResult::failure(all_errors);
            }
        }
    }

    if !all_errors.is_empty() {
        return ValidationResult::failure(all_errors);
    }

    // All checks passed; the sort can only fail on a cycle, which the
    // cycle check above already ruled out.
    match topological_sort(workflow) {
        Some(order) => ValidationResult::success(Some(order)),
        None => ValidationResult::failure(vec![ValidationError::new(
            ValidationErrorCode::CycleDetected,
            "Workflow contains a cycle",
        )]),
    }
}

/// Quick structural-only validation. Use for fast feedback during editing.
pub fn validate_workflow_structure(workflow: &Workflow) -> ValidationResult {
    validate_workflow(workflow, ValidateOptions::default())
}

/// Full validation including semantics. Use before execution.
pub fn validate_workflow_full(workflow: &Workflow, registry: &AgentRegistry) -> ValidationResult {
    validate_workflow(
        workflow,
        ValidateOptions {
            agent_registry: Some(registry),
            fail_fast: false,
        },
    )
}
