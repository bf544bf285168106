// Execution orchestrator
//
// Responsible for:
// - Generating execution plans from validated workflows
// - Dispatching jobs to the queue
// - Consuming job completions and dispatching newly-ready dependents
// - Failure propagation (skipping descendants of failed nodes)
// - Resume of failed executions from a node
//
// The orchestrator and the execution store are mutated only from the
// start path and the completion handler, and the queue serializes
// completions with the worker loop, so node-state reads during the
// "all deps complete?" test cannot race a concurrent writer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use flowline_core::events::{
    execution_cancelled, execution_completed, execution_failed, execution_started, node_completed,
    node_failed, node_output_reused, node_queued, node_skipped, resume_complete, resume_start,
};
use flowline_core::validation::{find_entry_nodes, find_exit_nodes, get_execution_order,
    validate_workflow_structure};
use flowline_core::{
    EngineError, EventBus, Execution, ExecutionPlan, ExecutionStatus, JobResult, JobStatus,
    JsonMap, NodeJob, NodeStatus, Result, Workflow,
};
use flowline_storage::{ExecutionStore, WorkflowStore};

use crate::config::EngineConfig;
use crate::queue::{CompletionHandler, JobQueue};
use crate::runtime::NodeRuntime;

/// Side channel used to authorize streaming subscriptions before the
/// first event of an execution arrives. Implemented by the hub.
pub trait ExecutionTenantRegistry: Send + Sync {
    fn register_execution_tenant(&self, execution_id: &str, tenant_id: &str);
}

/// Coordinates workflow execution
pub struct Orchestrator {
    queue: Arc<JobQueue>,
    executions: Arc<ExecutionStore>,
    workflows: Arc<WorkflowStore>,
    events: Arc<EventBus>,
    config: EngineConfig,
    /// In-flight execution plans
    plans: Mutex<HashMap<String, ExecutionPlan>>,
    /// Wall-clock start per in-flight execution
    start_times: Mutex<HashMap<String, Instant>>,
    tenant_registry: RwLock<Option<Arc<dyn ExecutionTenantRegistry>>>,
    initialized: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        queue: Arc<JobQueue>,
        executions: Arc<ExecutionStore>,
        workflows: Arc<WorkflowStore>,
        events: Arc<EventBus>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Orchestrator {
            queue,
            executions,
            workflows,
            events,
            config,
            plans: Mutex::new(HashMap::new()),
            start_times: Mutex::new(HashMap::new()),
            tenant_registry: RwLock::new(None),
            initialized: AtomicBool::new(false),
        })
    }

    /// Initialize once per process: install the node runtime as the
    /// queue processor, register the completion handler, start the
    /// worker.
    pub async fn initialize(self: &Arc<Self>, runtime: NodeRuntime) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.queue.set_processor(Arc::new(runtime)).await;
        self.queue
            .on_completed(Arc::clone(self) as Arc<dyn CompletionHandler>)
            .await;
        self.queue.start_worker().await?;

        info!("Orchestrator initialized");
        Ok(())
    }

    /// Shut down the queue worker
    pub async fn shutdown(&self) {
        self.queue.stop_worker().await;
        self.initialized.store(false, Ordering::SeqCst);
    }

    /// Install the hub (or other registry) notified of execution tenants
    pub async fn set_tenant_registry(&self, registry: Arc<dyn ExecutionTenantRegistry>) {
        *self.tenant_registry.write().await = Some(registry);
    }

    /// Generate and remember the execution plan for a workflow
    pub async fn generate_plan(
        &self,
        workflow: &Workflow,
        execution_id: &str,
    ) -> Result<ExecutionPlan> {
        let execution_order = get_execution_order(workflow)?;

        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for node in &workflow.nodes {
            dependencies.insert(node.id.clone(), Vec::new());
            dependents.insert(node.id.clone(), Vec::new());
        }
        for edge in &workflow.edges {
            if let Some(parents) = dependencies.get_mut(&edge.target) {
                parents.push(edge.source.clone());
            }
            if let Some(children) = dependents.get_mut(&edge.source) {
                children.push(edge.target.clone());
            }
        }

        let plan = ExecutionPlan {
            execution_id: execution_id.to_string(),
            workflow_id: workflow.id.clone(),
            execution_order,
            dependencies,
            dependents,
            entry_nodes: find_entry_nodes(workflow),
            exit_nodes: find_exit_nodes(workflow),
        };

        self.plans
            .lock()
            .await
            .insert(execution_id.to_string(), plan.clone());

        Ok(plan)
    }

    /// Plan for an in-flight execution
    pub async fn get_plan(&self, execution_id: &str) -> Option<ExecutionPlan> {
        self.plans.lock().await.get(execution_id).cloned()
    }

    /// Start executing a workflow.
    ///
    /// Validates, plans, transitions to running, and enqueues entry
    /// nodes. Resumed executions are delegated to
    /// `start_resumed_execution`.
    pub async fn start_execution(
        &self,
        workflow: &Workflow,
        execution: &Execution,
    ) -> Result<ExecutionPlan> {
        if execution.parent_execution_id.is_some() {
            return self.start_resumed_execution(workflow, execution).await;
        }

        let validation = validate_workflow_structure(workflow);
        if !validation.valid {
            return Err(EngineError::WorkflowInvalid(validation.errors));
        }

        let plan = self.generate_plan(workflow, &execution.id).await?;

        self.start_times
            .lock()
            .await
            .insert(execution.id.clone(), Instant::now());

        self.register_tenant(&execution.id, &execution.tenant_id).await;

        self.executions
            .update_status(&execution.id, ExecutionStatus::Running)
            .await?;

        info!(
            execution_id = %execution.id,
            workflow_id = %workflow.id,
            node_count = workflow.nodes.len(),
            "Execution started"
        );
        self.events.emit(execution_started(
            &execution.id,
            &workflow.id,
            workflow.nodes.len(),
        ));

        for node_id in plan.entry_nodes.clone() {
            // Entry nodes receive the caller's inputs verbatim
            let inputs = execution.inputs.clone();
            self.enqueue_node(workflow, execution, &node_id, inputs).await?;
        }

        Ok(plan)
    }

    /// Start a resumed execution.
    ///
    /// Pre-completed nodes contribute their outputs without running
    /// again; only pending nodes whose dependencies are all completed
    /// are enqueued.
    pub async fn start_resumed_execution(
        &self,
        workflow: &Workflow,
        execution: &Execution,
    ) -> Result<ExecutionPlan> {
        // Same DAG structure, no re-validation
        let plan = self.generate_plan(workflow, &execution.id).await?;

        self.start_times
            .lock()
            .await
            .insert(execution.id.clone(), Instant::now());

        self.register_tenant(&execution.id, &execution.tenant_id).await;

        self.executions
            .update_status(&execution.id, ExecutionStatus::Running)
            .await?;

        self.events.emit(execution_started(
            &execution.id,
            &workflow.id,
            workflow.nodes.len(),
        ));

        let state_map = execution.node_state_map();
        let completed: Vec<&str> = state_map
            .values()
            .filter(|s| s.status == NodeStatus::Completed)
            .map(|s| s.node_id.as_str())
            .collect();
        let pending_count = state_map
            .values()
            .filter(|s| s.status == NodeStatus::Pending)
            .count();

        let parent_id = execution.parent_execution_id.as_deref().unwrap_or("");
        let from_node = execution.resumed_from_node_id.as_deref().unwrap_or("");

        info!(
            execution_id = %execution.id,
            parent_execution_id = %parent_id,
            resumed_from = %from_node,
            skipped = completed.len(),
            rerun = pending_count,
            "Resumed execution started"
        );
        self.events.emit(resume_start(
            &execution.id,
            parent_id,
            from_node,
            completed.len(),
            pending_count,
        ));

        // Reused outputs, in plan order for a deterministic stream
        for node_id in &plan.execution_order {
            if completed.contains(&node_id.as_str()) {
                self.events
                    .emit(node_output_reused(&execution.id, node_id, parent_id));
            }
        }

        let resume_entries = Self::find_resume_entry_nodes(&plan, execution);
        if resume_entries.is_empty() {
            // Nothing left to run
            self.check_execution_complete(&execution.id).await;
            return Ok(plan);
        }

        for node_id in resume_entries {
            let inputs = self.resolve_node_inputs(&execution.id, &plan, &node_id).await;
            self.enqueue_node(workflow, execution, &node_id, inputs).await?;
        }

        Ok(plan)
    }

    /// Pending nodes whose dependencies are all completed, in plan order
    fn find_resume_entry_nodes(plan: &ExecutionPlan, execution: &Execution) -> Vec<String> {
        let state_map = execution.node_state_map();

        plan.execution_order
            .iter()
            .filter(|node_id| {
                state_map
                    .get(node_id.as_str())
                    .map(|s| s.status == NodeStatus::Pending)
                    .unwrap_or(false)
            })
            .filter(|node_id| {
                plan.dependencies
                    .get(node_id.as_str())
                    .map(|deps| {
                        deps.iter().all(|dep| {
                            state_map
                                .get(dep.as_str())
                                .map(|s| s.status == NodeStatus::Completed)
                                .unwrap_or(false)
                        })
                    })
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    /// Cancel bookkeeping: emit the event and evict in-memory state.
    /// Persisting the cancelled status and sweeping pending nodes is
    /// the caller's job, before notifying the orchestrator.
    pub async fn cancel_execution(&self, execution_id: &str) {
        info!(execution_id = %execution_id, "Execution cancelled");
        self.events.emit(execution_cancelled(execution_id));
        self.cleanup_execution(execution_id).await;
    }

    async fn register_tenant(&self, execution_id: &str, tenant_id: &str) {
        if let Some(registry) = self.tenant_registry.read().await.as_ref() {
            registry.register_execution_tenant(execution_id, tenant_id);
        }
    }

    /// Build a job, mark the node queued, emit NODE_QUEUED, enqueue
    async fn enqueue_node(
        &self,
        workflow: &Workflow,
        execution: &Execution,
        node_id: &str,
        inputs: JsonMap,
    ) -> Result<()> {
        let node_map = workflow.node_map();
        let Some(node) = node_map.get(node_id) else {
            warn!(node_id = %node_id, "Node missing from workflow, not enqueued");
            return Ok(());
        };

        let job = NodeJob {
            id: Uuid::now_v7().to_string(),
            tenant_id: execution.tenant_id.clone(),
            execution_id: execution.id.clone(),
            workflow_id: workflow.id.clone(),
            node_id: node_id.to_string(),
            node_type: node.node_type.as_str().to_string(),
            agent_id: node.config.agent_id.clone(),
            node_config: node.config.parameters.clone(),
            inputs,
            status: JobStatus::Pending,
            max_retries: self.config.max_retries,
            retry_count: 0,
            retry_backoff_ms: self.config.retry_backoff_ms,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
        };

        self.executions
            .update_node_state(&execution.id, node_id, NodeStatus::Queued, None, None, None)
            .await?;
        self.events.emit(node_queued(&execution.id, node_id));
        self.queue.add(job).await;

        Ok(())
    }

    /// Inputs for a node: `{ parent_node_id: parent_output }`
    async fn resolve_node_inputs(
        &self,
        execution_id: &str,
        plan: &ExecutionPlan,
        node_id: &str,
    ) -> JsonMap {
        let mut inputs = JsonMap::new();

        for parent_id in plan.dependencies.get(node_id).into_iter().flatten() {
            if let Some(output) = self
                .executions
                .get_node_output(execution_id, parent_id)
                .await
            {
                inputs.insert(parent_id.clone(), output);
            }
        }

        inputs
    }

    /// Dispatch dependents of a completed node whose dependencies are
    /// now all completed. A failed dependency never enables its
    /// dependents; those were already skipped.
    async fn dispatch_dependents(&self, execution_id: &str, completed_node_id: &str) {
        let Some(plan) = self.get_plan(execution_id).await else {
            return;
        };
        let Some(execution) = self.executions.get_internal(execution_id).await else {
            return;
        };
        let Ok(workflow) = self
            .workflows
            .get(&execution.workflow_id, &execution.tenant_id)
            .await
        else {
            return;
        };

        // Parallel edges between the same node pair would list the
        // dependent twice; it must only be admitted once
        let mut seen = HashSet::new();
        let mut dependent_ids = plan
            .dependents
            .get(completed_node_id)
            .cloned()
            .unwrap_or_default();
        dependent_ids.retain(|id| seen.insert(id.clone()));

        for dep_id in dependent_ids {
            let state_map = execution.node_state_map();

            let is_pending = state_map
                .get(dep_id.as_str())
                .map(|s| s.status == NodeStatus::Pending)
                .unwrap_or(false);
            if !is_pending {
                continue;
            }

            let all_deps_complete = plan
                .dependencies
                .get(&dep_id)
                .map(|deps| {
                    deps.iter().all(|d| {
                        state_map
                            .get(d.as_str())
                            .map(|s| s.status == NodeStatus::Completed)
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(true);
            if !all_deps_complete {
                continue;
            }

            let inputs = self.resolve_node_inputs(execution_id, &plan, &dep_id).await;
            if let Err(e) = self.enqueue_node(&workflow, &execution, &dep_id, inputs).await {
                warn!(
                    execution_id = %execution_id,
                    node_id = %dep_id,
                    error = %e,
                    "Failed to enqueue dependent node"
                );
            }
        }
    }

    /// BFS through plan.dependents marking every descendant skipped
    async fn skip_descendants(&self, execution_id: &str, failed_node_id: &str) {
        let Some(plan) = self.get_plan(execution_id).await else {
            return;
        };

        let mut to_skip: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = plan
            .dependents
            .get(failed_node_id)
            .cloned()
            .unwrap_or_default()
            .into();

        while let Some(node_id) = queue.pop_front() {
            if !to_skip.insert(node_id.clone()) {
                continue;
            }
            if let Some(children) = plan.dependents.get(&node_id) {
                queue.extend(children.iter().cloned());
            }
        }

        // Plan order keeps the skip events deterministic
        for node_id in &plan.execution_order {
            if !to_skip.contains(node_id) {
                continue;
            }

            let reason = format!("Skipped due to upstream failure: {failed_node_id}");
            if let Err(e) = self
                .executions
                .update_node_state(
                    execution_id,
                    node_id,
                    NodeStatus::Skipped,
                    None,
                    Some(reason.clone()),
                    None,
                )
                .await
            {
                warn!(execution_id = %execution_id, node_id = %node_id, error = %e, "Failed to skip node");
            }
            self.events.emit(node_skipped(execution_id, node_id, reason));
        }
    }

    /// Persist the aggregate status if the execution just finished.
    /// Terminal statuses (including cancelled) are never overwritten.
    async fn check_execution_complete(&self, execution_id: &str) {
        let Ok(aggregate) = self.executions.compute_aggregate_status(execution_id).await else {
            return;
        };
        let Some(current) = self.executions.get_internal(execution_id).await else {
            return;
        };

        if current.status.is_terminal() || current.status == aggregate {
            return;
        }
        if aggregate == ExecutionStatus::Running {
            return;
        }

        if let Err(e) = self.executions.update_status(execution_id, aggregate).await {
            warn!(execution_id = %execution_id, error = %e, "Failed to persist terminal status");
            return;
        }

        let duration_ms = self.duration_ms(execution_id).await;
        let is_resumed = current.parent_execution_id.is_some();

        match aggregate {
            ExecutionStatus::Completed => {
                info!(execution_id = %execution_id, duration_ms, "Execution completed");
                self.events.emit(execution_completed(execution_id, duration_ms));
                if is_resumed {
                    self.events
                        .emit(resume_complete(execution_id, "completed", duration_ms));
                }
            }
            ExecutionStatus::Failed => {
                warn!(execution_id = %execution_id, duration_ms, "Execution failed");
                self.events
                    .emit(execution_failed(execution_id, "One or more nodes failed"));
                if is_resumed {
                    self.events
                        .emit(resume_complete(execution_id, "failed", duration_ms));
                }
            }
            _ => return,
        }

        self.cleanup_execution(execution_id).await;
    }

    async fn duration_ms(&self, execution_id: &str) -> u64 {
        self.start_times
            .lock()
            .await
            .get(execution_id)
            .map(|start| start.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    async fn cleanup_execution(&self, execution_id: &str) {
        self.plans.lock().await.remove(execution_id);
        self.start_times.lock().await.remove(execution_id);
    }
}

#[async_trait]
impl CompletionHandler for Orchestrator {
    async fn on_job_completed(&self, result: JobResult) {
        let retry_count = self
            .queue
            .get_job(&result.job_id)
            .await
            .map(|j| j.retry_count);

        if result.success {
            if let Err(e) = self
                .executions
                .update_node_state(
                    &result.execution_id,
                    &result.node_id,
                    NodeStatus::Completed,
                    result.output.clone(),
                    None,
                    retry_count,
                )
                .await
            {
                warn!(execution_id = %result.execution_id, error = %e, "Failed to record node completion");
            }

            let output_summary = result
                .output
                .as_ref()
                .and_then(|o| o.get("result"))
                .and_then(|r| r.as_str())
                .map(|s| s.chars().take(100).collect::<String>());

            self.events.emit(node_completed(
                &result.execution_id,
                &result.node_id,
                result.duration_ms,
                output_summary,
                result.cached,
            ));

            self.dispatch_dependents(&result.execution_id, &result.node_id)
                .await;
        } else {
            let error = result.error.clone().unwrap_or_else(|| "Unknown error".to_string());

            if let Err(e) = self
                .executions
                .update_node_state(
                    &result.execution_id,
                    &result.node_id,
                    NodeStatus::Failed,
                    None,
                    Some(error.clone()),
                    retry_count,
                )
                .await
            {
                warn!(execution_id = %result.execution_id, error = %e, "Failed to record node failure");
            }

            self.events.emit(node_failed(
                &result.execution_id,
                &result.node_id,
                error,
                retry_count.unwrap_or(0),
                false,
            ));

            self.skip_descendants(&result.execution_id, &result.node_id)
                .await;
        }

        self.check_execution_complete(&result.execution_id).await;
    }
}
