// Execution HTTP routes: trigger, inspect, cancel, resume

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use flowline_core::{
    EngineError, Execution, ExecutionStatus, JsonMap, NodeStatus, NodeType, Workflow,
    WorkflowStatus,
};
use flowline_engine::{JobQueue, Orchestrator};
use flowline_storage::{compute_downstream_nodes, ExecutionStore, WorkflowStore};

use crate::auth::{AuthContext, Role};
use crate::error::ApiError;

/// App state for execution routes
#[derive(Clone)]
pub struct AppState {
    pub workflows: Arc<WorkflowStore>,
    pub executions: Arc<ExecutionStore>,
    pub queue: Arc<JobQueue>,
    pub orchestrator: Arc<Orchestrator>,
}

/// Request to execute a workflow
#[derive(Debug, Deserialize, ToSchema)]
pub struct ExecuteWorkflowRequest {
    #[serde(default)]
    #[schema(value_type = Object)]
    pub inputs: JsonMap,
}

/// Request to resume a failed execution from a node
#[derive(Debug, Deserialize, ToSchema)]
pub struct ResumeExecutionRequest {
    pub node_id: String,
}

/// Query parameters for listing executions
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListExecutionsParams {
    pub workflow_id: String,
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub cursor: Option<String>,
}

fn default_limit() -> usize {
    20
}

/// 202 response for an accepted execution
#[derive(Debug, Serialize, ToSchema)]
pub struct ExecutionTriggerResponse {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub workflow_id: String,
    pub created_at: DateTime<Utc>,
}

/// 202 response for an accepted cancellation
#[derive(Debug, Serialize, ToSchema)]
pub struct ExecutionCancelResponse {
    pub id: String,
    pub status: ExecutionStatus,
}

/// Response for an accepted resume
#[derive(Debug, Serialize, ToSchema)]
pub struct ExecutionResumeResponse {
    pub execution_id: String,
    pub parent_execution_id: String,
    pub resumed_from_node_id: String,
    pub skipped_nodes: Vec<String>,
    pub rerun_nodes: Vec<String>,
}

/// Paginated execution listing
#[derive(Debug, Serialize, ToSchema)]
pub struct ExecutionListResponse {
    pub items: Vec<ExecutionSummary>,
    pub next_cursor: Option<String>,
}

/// Compact execution representation for listings
#[derive(Debug, Serialize, ToSchema)]
pub struct ExecutionSummary {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A synthesized log line from node-state timestamps
#[derive(Debug, Serialize, ToSchema)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub level: String,
    pub message: String,
}

/// Execution log listing
#[derive(Debug, Serialize, ToSchema)]
pub struct ExecutionLogsResponse {
    pub items: Vec<LogEntry>,
    pub next_cursor: Option<String>,
}

/// Query parameters for execution logs
#[derive(Debug, Deserialize, ToSchema)]
pub struct ExecutionLogsParams {
    pub node_id: Option<String>,
    pub level: Option<String>,
    #[serde(default = "default_log_limit")]
    pub limit: usize,
}

fn default_log_limit() -> usize {
    100
}

/// Create execution routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/workflows/:workflow_id/execute", post(execute_workflow))
        .route("/v1/executions", get(list_executions))
        .route("/v1/executions/:execution_id", get(get_execution))
        .route("/v1/executions/:execution_id/cancel", post(cancel_execution))
        .route("/v1/executions/:execution_id/resume", post(resume_execution))
        .route("/v1/executions/:execution_id/logs", get(get_execution_logs))
        .with_state(state)
}

/// Reject execution when an input node declares required keys the
/// caller did not supply.
fn check_required_inputs(workflow: &Workflow, inputs: &JsonMap) -> Result<(), ApiError> {
    for node in &workflow.nodes {
        if node.node_type != NodeType::Input {
            continue;
        }
        let Some(required) = node.config.parameters.get("required").and_then(|v| v.as_array())
        else {
            continue;
        };

        let missing: Vec<&str> = required
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|key| !inputs.contains_key(*key))
            .collect();

        if !missing.is_empty() {
            return Err(ApiError::missing_inputs(format!(
                "Missing required inputs: {}",
                missing.join(", ")
            )));
        }
    }
    Ok(())
}

/// POST /v1/workflows/{workflow_id}/execute - Trigger execution
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/execute",
    params(("workflow_id" = String, Path, description = "Workflow ID")),
    request_body = ExecuteWorkflowRequest,
    responses(
        (status = 202, description = "Execution accepted", body = ExecutionTriggerResponse),
        (status = 400, description = "Workflow invalid or archived, or inputs missing"),
        (status = 404, description = "Not found")
    ),
    tag = "executions"
)]
pub async fn execute_workflow(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(workflow_id): Path<String>,
    Json(req): Json<ExecuteWorkflowRequest>,
) -> Result<(StatusCode, Json<ExecutionTriggerResponse>), ApiError> {
    auth.require(Role::Member)?;

    let workflow = state.workflows.get(&workflow_id, &auth.tenant_id).await?;
    if workflow.status == WorkflowStatus::Archived {
        return Err(EngineError::WorkflowArchived(workflow_id).into());
    }

    check_required_inputs(&workflow, &req.inputs)?;

    let execution = state
        .executions
        .create(&workflow, req.inputs, &auth.user_id, &auth.tenant_id)
        .await;

    if let Err(e) = state.orchestrator.start_execution(&workflow, &execution).await {
        // Validation failures flip the execution to failed before
        // surfacing to the caller
        state
            .executions
            .update_status(&execution.id, ExecutionStatus::Failed)
            .await
            .ok();
        return Err(e.into());
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(ExecutionTriggerResponse {
            execution_id: execution.id,
            status: ExecutionStatus::Running,
            workflow_id,
            created_at: execution.created_at,
        }),
    ))
}

/// GET /v1/executions/{execution_id} - Execution status and node states
#[utoipa::path(
    get,
    path = "/v1/executions/{execution_id}",
    params(("execution_id" = String, Path, description = "Execution ID")),
    responses(
        (status = 200, description = "Execution", body = Execution),
        (status = 404, description = "Not found")
    ),
    tag = "executions"
)]
pub async fn get_execution(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(execution_id): Path<String>,
) -> Result<Json<Execution>, ApiError> {
    auth.require(Role::Viewer)?;

    let execution = state.executions.get(&execution_id, &auth.tenant_id).await?;
    Ok(Json(execution))
}

/// GET /v1/executions - List executions for a workflow
#[utoipa::path(
    get,
    path = "/v1/executions",
    params(
        ("workflow_id" = String, Query, description = "Workflow to list executions for"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("limit" = Option<usize>, Query, description = "Max results (default 20)"),
        ("cursor" = Option<String>, Query, description = "Id of the last element of the previous page")
    ),
    responses(
        (status = 200, description = "Execution page", body = ExecutionListResponse),
        (status = 400, description = "Invalid cursor")
    ),
    tag = "executions"
)]
pub async fn list_executions(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<ListExecutionsParams>,
) -> Result<Json<ExecutionListResponse>, ApiError> {
    auth.require(Role::Viewer)?;

    // Verify the workflow belongs to the tenant
    state
        .workflows
        .get(&params.workflow_id, &auth.tenant_id)
        .await?;

    let status = match params.status.as_deref() {
        Some(s) => Some(ExecutionStatus::from_str(s).map_err(|e| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                crate::error::ErrorCode::ValidationError,
                e,
            )
        })?),
        None => None,
    };

    let (executions, next_cursor) = state
        .executions
        .list_by_workflow(
            &params.workflow_id,
            &auth.tenant_id,
            status,
            params.limit.clamp(1, 100),
            params.cursor.as_deref(),
        )
        .await?;

    let items = executions
        .into_iter()
        .map(|e| ExecutionSummary {
            id: e.id,
            workflow_id: e.workflow_id,
            status: e.status,
            created_at: e.created_at,
            completed_at: e.completed_at,
        })
        .collect();

    Ok(Json(ExecutionListResponse { items, next_cursor }))
}

/// POST /v1/executions/{execution_id}/cancel - Cancel an execution
///
/// Pending jobs are dropped; a running node completes its current
/// attempt. Order matters: cancel queue jobs, mark the execution
/// cancelled, sweep unstarted nodes to skipped, then notify the
/// orchestrator.
#[utoipa::path(
    post,
    path = "/v1/executions/{execution_id}/cancel",
    params(("execution_id" = String, Path, description = "Execution ID")),
    responses(
        (status = 202, description = "Cancellation accepted", body = ExecutionCancelResponse),
        (status = 404, description = "Not found")
    ),
    tag = "executions"
)]
pub async fn cancel_execution(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(execution_id): Path<String>,
) -> Result<(StatusCode, Json<ExecutionCancelResponse>), ApiError> {
    auth.require(Role::Member)?;

    let execution = state.executions.get(&execution_id, &auth.tenant_id).await?;

    if execution.status.is_terminal() {
        return Ok((
            StatusCode::ACCEPTED,
            Json(ExecutionCancelResponse {
                id: execution.id,
                status: execution.status,
            }),
        ));
    }

    state.queue.cancel_execution(&execution_id).await;

    let updated = state.executions.cancel(&execution_id, &auth.tenant_id).await?;

    for node_state in &execution.node_states {
        if matches!(node_state.status, NodeStatus::Pending | NodeStatus::Queued) {
            state
                .executions
                .update_node_state(
                    &execution_id,
                    &node_state.node_id,
                    NodeStatus::Skipped,
                    None,
                    Some("Cancelled by user".to_string()),
                    None,
                )
                .await
                .ok();
        }
    }

    state.orchestrator.cancel_execution(&execution_id).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(ExecutionCancelResponse {
            id: updated.id,
            status: updated.status,
        }),
    ))
}

/// POST /v1/executions/{execution_id}/resume - Resume a failed
/// execution from a node
#[utoipa::path(
    post,
    path = "/v1/executions/{execution_id}/resume",
    params(("execution_id" = String, Path, description = "Parent execution ID")),
    request_body = ResumeExecutionRequest,
    responses(
        (status = 202, description = "Resume accepted", body = ExecutionResumeResponse),
        (status = 400, description = "Resume not allowed"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Workflow version changed since the parent ran")
    ),
    tag = "executions"
)]
pub async fn resume_execution(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(execution_id): Path<String>,
    Json(req): Json<ResumeExecutionRequest>,
) -> Result<(StatusCode, Json<ExecutionResumeResponse>), ApiError> {
    auth.require(Role::Member)?;

    let parent = state.executions.get(&execution_id, &auth.tenant_id).await?;

    if parent.status != ExecutionStatus::Failed {
        return Err(ApiError::resume_not_allowed(format!(
            "Only failed executions can be resumed (status is {})",
            parent.status.as_str()
        )));
    }

    let workflow = state
        .workflows
        .get(&parent.workflow_id, &auth.tenant_id)
        .await?;

    if workflow.meta.version != parent.workflow_version {
        return Err(EngineError::VersionConflict {
            expected: parent.workflow_version,
            actual: workflow.meta.version,
        }
        .into());
    }

    if !workflow.nodes.iter().any(|n| n.id == req.node_id) {
        return Err(ApiError::resume_not_allowed(format!(
            "Node not in workflow: {}",
            req.node_id
        )));
    }

    let (skipped, rerun) = compute_downstream_nodes(&workflow, &req.node_id);

    // Every node outside the rerun set must have completed in the
    // parent, otherwise the resumed graph would start from a hole
    let parent_states = parent.node_state_map();
    for node_id in &skipped {
        let completed = parent_states
            .get(node_id.as_str())
            .map(|s| s.status == NodeStatus::Completed)
            .unwrap_or(false);
        if !completed {
            return Err(ApiError::resume_not_allowed(format!(
                "Upstream node {node_id} did not complete in the parent execution"
            )));
        }
    }

    let resumed = state
        .executions
        .create_resumed(
            &parent,
            &workflow,
            &req.node_id,
            &auth.user_id,
            &auth.tenant_id,
            &skipped,
            &rerun,
        )
        .await;

    state
        .orchestrator
        .start_execution(&workflow, &resumed)
        .await
        .map_err(ApiError::from)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ExecutionResumeResponse {
            execution_id: resumed.id,
            parent_execution_id: execution_id,
            resumed_from_node_id: req.node_id,
            skipped_nodes: skipped,
            rerun_nodes: rerun,
        }),
    ))
}

/// GET /v1/executions/{execution_id}/logs - Synthesized execution logs
#[utoipa::path(
    get,
    path = "/v1/executions/{execution_id}/logs",
    params(
        ("execution_id" = String, Path, description = "Execution ID"),
        ("node_id" = Option<String>, Query, description = "Filter by node"),
        ("level" = Option<String>, Query, description = "Filter by level"),
        ("limit" = Option<usize>, Query, description = "Max results (default 100)")
    ),
    responses(
        (status = 200, description = "Log entries", body = ExecutionLogsResponse),
        (status = 404, description = "Not found")
    ),
    tag = "executions"
)]
pub async fn get_execution_logs(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(execution_id): Path<String>,
    Query(params): Query<ExecutionLogsParams>,
) -> Result<Json<ExecutionLogsResponse>, ApiError> {
    auth.require(Role::Viewer)?;

    let execution = state.executions.get(&execution_id, &auth.tenant_id).await?;

    let mut logs: Vec<LogEntry> = Vec::new();

    for node_state in &execution.node_states {
        if let Some(node_id) = &params.node_id {
            if &node_state.node_id != node_id {
                continue;
            }
        }

        if let Some(started_at) = node_state.started_at {
            logs.push(LogEntry {
                timestamp: started_at,
                node_id: node_state.node_id.clone(),
                level: "info".to_string(),
                message: "Node started execution".to_string(),
            });
        }

        if let Some(completed_at) = node_state.completed_at {
            let entry = match node_state.status {
                NodeStatus::Completed => Some(("info", "Node completed successfully".to_string())),
                NodeStatus::Failed => Some((
                    "error",
                    format!(
                        "Node failed: {}",
                        node_state.error.as_deref().unwrap_or("unknown error")
                    ),
                )),
                NodeStatus::Skipped => Some((
                    "warn",
                    format!(
                        "Node skipped: {}",
                        node_state.error.as_deref().unwrap_or("upstream failure")
                    ),
                )),
                _ => None,
            };

            if let Some((level, message)) = entry {
                logs.push(LogEntry {
                    timestamp: completed_at,
                    node_id: node_state.node_id.clone(),
                    level: level.to_string(),
                    message,
                });
            }
        }
    }

    if let Some(level) = &params.level {
        logs.retain(|l| &l.level == level);
    }

    logs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    logs.truncate(params.limit.clamp(1, 500));

    Ok(Json(ExecutionLogsResponse {
        items: logs,
        next_cursor: None,
    }))
}
