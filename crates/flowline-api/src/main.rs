// Flowline API server

mod auth;
mod config;
mod error;
mod executions;
mod hub;
mod workflows;
mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use flowline_core::EventBus;
use flowline_engine::{EngineConfig, JobQueue, NodeRuntime, Orchestrator};
use flowline_storage::{ExecutionStore, ResultCache, WorkflowStore};

use crate::auth::AuthSettings;
use crate::config::ApiConfig;
use crate::hub::SubscriptionHub;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    pending_jobs: usize,
}

/// State for the health endpoint
#[derive(Clone)]
struct HealthState {
    queue: Arc<JobQueue>,
}

async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        pending_jobs: state.queue.pending_count().await,
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        workflows::create_workflow,
        workflows::list_workflows,
        workflows::get_workflow,
        workflows::update_workflow,
        workflows::delete_workflow,
        workflows::validate_payload,
        workflows::validate_persisted,
        executions::execute_workflow,
        executions::get_execution,
        executions::list_executions,
        executions::cancel_execution,
        executions::resume_execution,
        executions::get_execution_logs,
    ),
    components(
        schemas(
            flowline_core::Workflow,
            flowline_core::WorkflowMeta,
            flowline_core::WorkflowStatus,
            flowline_core::Node,
            flowline_core::NodeType,
            flowline_core::NodeConfig,
            flowline_core::NodePosition,
            flowline_core::Edge,
            flowline_core::Execution,
            flowline_core::ExecutionStatus,
            flowline_core::NodeState,
            flowline_core::NodeStatus,
            flowline_core::ValidationError,
            flowline_core::ValidationErrorCode,
            flowline_core::ValidationResult,
            workflows::CreateWorkflowRequest,
            workflows::UpdateWorkflowRequest,
            workflows::ValidatePayloadRequest,
            workflows::WorkflowResponse,
            workflows::WorkflowListResponse,
            executions::ExecuteWorkflowRequest,
            executions::ResumeExecutionRequest,
            executions::ExecutionTriggerResponse,
            executions::ExecutionCancelResponse,
            executions::ExecutionResumeResponse,
            executions::ExecutionListResponse,
            executions::ExecutionSummary,
            executions::LogEntry,
            executions::ExecutionLogsResponse,
            error::ErrorCode,
            error::ErrorDetail,
            error::ErrorBody,
        )
    ),
    tags(
        (name = "workflows", description = "Workflow management endpoints"),
        (name = "validation", description = "Workflow validation endpoints"),
        (name = "executions", description = "Execution endpoints")
    ),
    info(
        title = "Flowline API",
        version = "0.2.0",
        description = "Multi-tenant workflow execution engine",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowline_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("flowline-api starting...");

    let api_config = ApiConfig::from_env();
    let engine_config = EngineConfig::from_env();
    tracing::info!(
        max_retries = engine_config.max_retries,
        retry_backoff_ms = engine_config.retry_backoff_ms,
        "Engine configured"
    );

    // Build the engine
    let workflows = Arc::new(WorkflowStore::new());
    let executions = Arc::new(ExecutionStore::new());
    let cache = Arc::new(ResultCache::new());
    let events = EventBus::new();
    let queue = JobQueue::new("node-execution");

    let orchestrator = Orchestrator::new(
        queue.clone(),
        executions.clone(),
        workflows.clone(),
        events.clone(),
        engine_config,
    );
    let runtime = NodeRuntime::new(cache.clone(), events.clone());
    orchestrator
        .initialize(runtime)
        .await
        .context("Failed to initialize orchestrator")?;

    // Streaming hub subscribes globally and relays to sessions
    let hub = SubscriptionHub::new(executions.clone());
    orchestrator.set_tenant_registry(hub.clone()).await;
    hub.start(&events);

    // Create module-specific states
    let workflows_state = workflows::AppState {
        workflows: workflows.clone(),
    };
    let executions_state = executions::AppState {
        workflows: workflows.clone(),
        executions: executions.clone(),
        queue: queue.clone(),
        orchestrator: orchestrator.clone(),
    };
    let ws_state = ws::AppState { hub: hub.clone() };
    let health_state = HealthState {
        queue: queue.clone(),
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health).with_state(health_state))
        .merge(workflows::routes(workflows_state))
        .merge(executions::routes(executions_state))
        .merge(ws::routes(ws_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(Extension(AuthSettings::new(api_config.jwt_secret.clone())))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(&api_config.bind_addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", api_config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
