// Workflow CRUD and validation HTTP routes

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use flowline_core::validation::validate_workflow_structure;
use flowline_core::{
    Edge, Node, ValidationError, ValidationResult, Workflow, WorkflowStatus,
};
use flowline_storage::WorkflowStore;

use crate::auth::{AuthContext, Role};
use crate::error::ApiError;

/// App state for workflow routes
#[derive(Clone)]
pub struct AppState {
    pub workflows: Arc<WorkflowStore>,
}

/// Request to create a workflow
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateWorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Request to update a workflow (optimistic concurrency via version)
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateWorkflowRequest {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Version the client last saw; mismatch is a conflict
    pub version: u32,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Request to validate a workflow payload without persisting
#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidatePayloadRequest {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Query parameters for listing workflows
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListWorkflowsParams {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub cursor: Option<String>,
}

fn default_limit() -> usize {
    20
}

/// Workflow plus any validation errors from the write
#[derive(Debug, serde::Serialize, ToSchema)]
pub struct WorkflowResponse {
    #[serde(flatten)]
    pub workflow: Workflow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<ValidationError>>,
}

/// Paginated workflow listing
#[derive(Debug, serde::Serialize, ToSchema)]
pub struct WorkflowListResponse {
    pub items: Vec<Workflow>,
    pub next_cursor: Option<String>,
}

/// Create workflow routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/workflows", get(list_workflows).post(create_workflow))
        .route(
            "/v1/workflows/:workflow_id",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/v1/workflows/validate", post(validate_payload))
        .route("/v1/workflows/:workflow_id/validate", post(validate_persisted))
        .with_state(state)
}

/// POST /v1/workflows - Create a workflow
#[utoipa::path(
    post,
    path = "/v1/workflows",
    request_body = CreateWorkflowRequest,
    responses(
        (status = 201, description = "Workflow created", body = WorkflowResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    tag = "workflows"
)]
pub async fn create_workflow(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowResponse>), ApiError> {
    auth.require(Role::Member)?;

    let (workflow, errors) = state
        .workflows
        .create(
            req.name,
            req.description,
            req.nodes,
            req.edges,
            &auth.user_id,
            &auth.tenant_id,
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(WorkflowResponse {
            workflow,
            validation_errors: errors,
        }),
    ))
}

/// GET /v1/workflows - List workflows
#[utoipa::path(
    get,
    path = "/v1/workflows",
    params(
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("limit" = Option<usize>, Query, description = "Max results (default 20)"),
        ("cursor" = Option<String>, Query, description = "Id of the last element of the previous page")
    ),
    responses(
        (status = 200, description = "Workflow page", body = WorkflowListResponse),
        (status = 400, description = "Invalid cursor")
    ),
    tag = "workflows"
)]
pub async fn list_workflows(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<ListWorkflowsParams>,
) -> Result<Json<WorkflowListResponse>, ApiError> {
    auth.require(Role::Viewer)?;

    let status = match params.status.as_deref() {
        Some(s) => Some(WorkflowStatus::from_str(s).map_err(|e| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                crate::error::ErrorCode::ValidationError,
                e,
            )
        })?),
        None => None,
    };

    let (items, next_cursor) = state
        .workflows
        .list(
            &auth.tenant_id,
            status,
            params.limit.clamp(1, 100),
            params.cursor.as_deref(),
        )
        .await?;

    Ok(Json(WorkflowListResponse { items, next_cursor }))
}

/// GET /v1/workflows/{workflow_id} - Get a workflow
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}",
    params(("workflow_id" = String, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Workflow", body = Workflow),
        (status = 404, description = "Not found")
    ),
    tag = "workflows"
)]
pub async fn get_workflow(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(workflow_id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    auth.require(Role::Viewer)?;

    let workflow = state.workflows.get(&workflow_id, &auth.tenant_id).await?;
    Ok(Json(workflow))
}

/// PUT /v1/workflows/{workflow_id} - Update a workflow
#[utoipa::path(
    put,
    path = "/v1/workflows/{workflow_id}",
    params(("workflow_id" = String, Path, description = "Workflow ID")),
    request_body = UpdateWorkflowRequest,
    responses(
        (status = 200, description = "Updated workflow", body = WorkflowResponse),
        (status = 404, description = "Not found"),
        (status = 409, description = "Version conflict")
    ),
    tag = "workflows"
)]
pub async fn update_workflow(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(workflow_id): Path<String>,
    Json(req): Json<UpdateWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    auth.require(Role::Member)?;

    let (workflow, errors) = state
        .workflows
        .update(
            &workflow_id,
            &auth.tenant_id,
            req.nodes,
            req.edges,
            req.version,
            req.name,
            req.description,
        )
        .await?;

    Ok(Json(WorkflowResponse {
        workflow,
        validation_errors: errors,
    }))
}

/// DELETE /v1/workflows/{workflow_id} - Archive a workflow
#[utoipa::path(
    delete,
    path = "/v1/workflows/{workflow_id}",
    params(("workflow_id" = String, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Archived workflow", body = Workflow),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not found")
    ),
    tag = "workflows"
)]
pub async fn delete_workflow(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(workflow_id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    auth.require(Role::Admin)?;

    let workflow = state.workflows.archive(&workflow_id, &auth.tenant_id).await?;
    Ok(Json(workflow))
}

/// POST /v1/workflows/validate - Validate a payload without saving
#[utoipa::path(
    post,
    path = "/v1/workflows/validate",
    request_body = ValidatePayloadRequest,
    responses((status = 200, description = "Validation result", body = ValidationResult)),
    tag = "validation"
)]
pub async fn validate_payload(
    auth: AuthContext,
    Json(req): Json<ValidatePayloadRequest>,
) -> Result<Json<ValidationResult>, ApiError> {
    auth.require(Role::Viewer)?;

    // Temporary workflow value; never persisted
    let now = chrono::Utc::now();
    let workflow = Workflow {
        id: "payload-validation".to_string(),
        tenant_id: auth.tenant_id.clone(),
        status: WorkflowStatus::Draft,
        meta: flowline_core::WorkflowMeta {
            name: "validation".to_string(),
            description: String::new(),
            created_at: now,
            updated_at: now,
            owner_id: auth.user_id.clone(),
            version: 1,
        },
        nodes: req.nodes,
        edges: req.edges,
    };

    Ok(Json(validate_workflow_structure(&workflow)))
}

/// POST /v1/workflows/{workflow_id}/validate - Validate a persisted
/// workflow and update its stored status
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/validate",
    params(("workflow_id" = String, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Validation result", body = ValidationResult),
        (status = 400, description = "Workflow archived"),
        (status = 404, description = "Not found")
    ),
    tag = "validation"
)]
pub async fn validate_persisted(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(workflow_id): Path<String>,
) -> Result<Json<ValidationResult>, ApiError> {
    auth.require(Role::Viewer)?;

    let workflow = state.workflows.get(&workflow_id, &auth.tenant_id).await?;
    if workflow.status == WorkflowStatus::Archived {
        return Err(flowline_core::EngineError::WorkflowArchived(workflow_id).into());
    }

    let result = validate_workflow_structure(&workflow);
    state
        .workflows
        .set_validation_status(&workflow_id, result.valid, result.errors.clone())
        .await?;

    Ok(Json(result))
}
