// Execution store: executions and their per-node states
//
// Custodian of execution records. All tenant-facing reads return
// not-found on a tenant mismatch; missing and forbidden are not
// distinguished. Internal update paths (orchestrator, worker
// completions) operate by id under the single-writer discipline.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use flowline_core::{
    EngineError, Execution, ExecutionStatus, JsonMap, NodeState, NodeStatus, Result, Workflow,
};

use crate::workflow_store::paginate;

/// Execution management service, in-memory
#[derive(Default)]
pub struct ExecutionStore {
    inner: RwLock<HashMap<String, Execution>>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        ExecutionStore::default()
    }

    /// Create a new execution with every node state pending
    pub async fn create(
        &self,
        workflow: &Workflow,
        inputs: JsonMap,
        triggered_by: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Execution {
        let execution = Execution {
            id: Uuid::now_v7().to_string(),
            tenant_id: tenant_id.into(),
            workflow_id: workflow.id.clone(),
            status: ExecutionStatus::Pending,
            workflow_version: workflow.meta.version,
            triggered_by: triggered_by.into(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            node_states: workflow
                .nodes
                .iter()
                .map(|n| NodeState::pending(&n.id))
                .collect(),
            inputs,
            parent_execution_id: None,
            resumed_from_node_id: None,
        };

        let mut inner = self.inner.write().await;
        inner.insert(execution.id.clone(), execution.clone());

        execution
    }

    /// Create an execution resuming a failed parent.
    ///
    /// Nodes in `skipped_nodes` copy the parent's completed state;
    /// nodes in `rerun_nodes` start pending. Inputs are inherited.
    pub async fn create_resumed(
        &self,
        parent: &Execution,
        workflow: &Workflow,
        from_node_id: &str,
        triggered_by: impl Into<String>,
        tenant_id: impl Into<String>,
        skipped_nodes: &[String],
        rerun_nodes: &[String],
    ) -> Execution {
        let rerun: HashSet<&str> = rerun_nodes.iter().map(|s| s.as_str()).collect();
        let skipped: HashSet<&str> = skipped_nodes.iter().map(|s| s.as_str()).collect();
        let parent_states = parent.node_state_map();

        let node_states = workflow
            .nodes
            .iter()
            .map(|node| {
                if rerun.contains(node.id.as_str()) {
                    return NodeState::pending(&node.id);
                }
                if skipped.contains(node.id.as_str()) {
                    if let Some(state) = parent_states.get(node.id.as_str()) {
                        return (*state).clone();
                    }
                }
                NodeState::pending(&node.id)
            })
            .collect();

        let execution = Execution {
            id: Uuid::now_v7().to_string(),
            tenant_id: tenant_id.into(),
            workflow_id: workflow.id.clone(),
            status: ExecutionStatus::Pending,
            workflow_version: parent.workflow_version,
            triggered_by: triggered_by.into(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            node_states,
            inputs: parent.inputs.clone(),
            parent_execution_id: Some(parent.id.clone()),
            resumed_from_node_id: Some(from_node_id.to_string()),
        };

        let mut inner = self.inner.write().await;
        inner.insert(execution.id.clone(), execution.clone());

        execution
    }

    /// Get an execution by id. Wrong tenant reads as not found.
    pub async fn get(&self, execution_id: &str, tenant_id: &str) -> Result<Execution> {
        let inner = self.inner.read().await;
        inner
            .get(execution_id)
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| EngineError::execution_not_found(execution_id))
    }

    /// Get an execution without a tenant check (internal paths only)
    pub async fn get_internal(&self, execution_id: &str) -> Option<Execution> {
        let inner = self.inner.read().await;
        inner.get(execution_id).cloned()
    }

    /// Tenant that owns an execution
    pub async fn tenant_id(&self, execution_id: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner.get(execution_id).map(|e| e.tenant_id.clone())
    }

    /// List executions for a workflow, newest first, cursor-paginated
    pub async fn list_by_workflow(
        &self,
        workflow_id: &str,
        tenant_id: &str,
        status: Option<ExecutionStatus>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<Execution>, Option<String>)> {
        let inner = self.inner.read().await;

        let mut executions: Vec<Execution> = inner
            .values()
            .filter(|e| e.workflow_id == workflow_id && e.tenant_id == tenant_id)
            .filter(|e| status.map(|s| e.status == s).unwrap_or(true))
            .cloned()
            .collect();

        // UUIDv7 ids are time-ordered, breaking ties between equal timestamps
        executions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        paginate(executions, limit, cursor, |e| &e.id)
    }

    /// Update execution status (internal, no tenant check).
    ///
    /// Sets started_at on the first transition to running and
    /// completed_at on any terminal transition.
    pub async fn update_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
    ) -> Result<Execution> {
        let mut inner = self.inner.write().await;
        let execution = inner
            .get_mut(execution_id)
            .ok_or_else(|| EngineError::execution_not_found(execution_id))?;

        let now = Utc::now();
        if status == ExecutionStatus::Running && execution.started_at.is_none() {
            execution.started_at = Some(now);
        }
        if status.is_terminal() {
            execution.completed_at = Some(now);
        }
        execution.status = status;

        Ok(execution.clone())
    }

    /// Update a single node's state (internal, no tenant check)
    pub async fn update_node_state(
        &self,
        execution_id: &str,
        node_id: &str,
        status: NodeStatus,
        output: Option<Value>,
        error: Option<String>,
        retry_count: Option<u32>,
    ) -> Result<Execution> {
        let mut inner = self.inner.write().await;
        let execution = inner
            .get_mut(execution_id)
            .ok_or_else(|| EngineError::execution_not_found(execution_id))?;

        let now = Utc::now();
        if let Some(state) = execution
            .node_states
            .iter_mut()
            .find(|s| s.node_id == node_id)
        {
            if status == NodeStatus::Running && state.started_at.is_none() {
                state.started_at = Some(now);
            }
            if status.is_terminal() {
                state.completed_at = Some(now);
            }
            state.status = status;
            if let Some(output) = output {
                state.output = Some(output);
            }
            if error.is_some() {
                state.error = error;
            }
            if let Some(retry_count) = retry_count {
                state.retry_count = retry_count;
            }
        }

        Ok(execution.clone())
    }

    /// Cancel an execution. Only pending or running executions change.
    pub async fn cancel(&self, execution_id: &str, tenant_id: &str) -> Result<Execution> {
        let execution = self.get(execution_id, tenant_id).await?;

        if execution.status.is_terminal() {
            return Ok(execution);
        }

        self.update_status(execution_id, ExecutionStatus::Cancelled)
            .await
    }

    /// Compute the aggregate status from node states.
    ///
    /// running while any node is running/pending/queued, else failed if
    /// any node failed, else completed. Note that a freshly created
    /// execution computes as running; callers set pending/running
    /// explicitly at the lifecycle edges.
    pub async fn compute_aggregate_status(&self, execution_id: &str) -> Result<ExecutionStatus> {
        let inner = self.inner.read().await;
        let execution = inner
            .get(execution_id)
            .ok_or_else(|| EngineError::execution_not_found(execution_id))?;

        let mut has_failed = false;
        let mut has_live = false;

        for state in &execution.node_states {
            match state.status {
                NodeStatus::Failed => has_failed = true,
                NodeStatus::Pending | NodeStatus::Queued | NodeStatus::Running => has_live = true,
                _ => {}
            }
        }

        if has_live {
            Ok(ExecutionStatus::Running)
        } else if has_failed {
            Ok(ExecutionStatus::Failed)
        } else {
            Ok(ExecutionStatus::Completed)
        }
    }

    /// Output of a node, if it has one
    pub async fn get_node_output(&self, execution_id: &str, node_id: &str) -> Option<Value> {
        let inner = self.inner.read().await;
        inner
            .get(execution_id)?
            .node_states
            .iter()
            .find(|s| s.node_id == node_id)?
            .output
            .clone()
    }
}

/// Partition a workflow's nodes for a resume from `start_node_id`.
///
/// Returns `(skipped, rerun)` where rerun is the start node plus every
/// node reachable from it via edges (BFS), and skipped is the rest.
pub fn compute_downstream_nodes(
    workflow: &Workflow,
    start_node_id: &str,
) -> (Vec<String>, Vec<String>) {
    let mut rerun: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(start_node_id);

    while let Some(node_id) = queue.pop_front() {
        if !rerun.insert(node_id.to_string()) {
            continue;
        }
        for edge in &workflow.edges {
            if edge.source == node_id {
                queue.push_back(&edge.target);
            }
        }
    }

    let mut skipped = Vec::new();
    let mut rerun_ordered = Vec::new();
    for node in &workflow.nodes {
        if rerun.contains(&node.id) {
            rerun_ordered.push(node.id.clone());
        } else {
            skipped.push(node.id.clone());
        }
    }

    (skipped, rerun_ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::{Edge, Node, NodeConfig, NodePosition, NodeType, WorkflowMeta, WorkflowStatus};

    fn node(id: &str, node_type: NodeType) -> Node {
        Node {
            id: id.to_string(),
            node_type,
            label: id.to_string(),
            position: NodePosition::default(),
            config: NodeConfig::default(),
        }
    }

    fn edge(id: &str, source: &str, target: &str) -> Edge {
        Edge {
            id: id.to_string(),
            source: source.to_string(),
            source_port: "output".to_string(),
            target: target.to_string(),
            target_port: "input".to_string(),
        }
    }

    fn linear_workflow() -> Workflow {
        let now = Utc::now();
        Workflow {
            id: "wf-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            status: WorkflowStatus::Valid,
            meta: WorkflowMeta {
                name: "wf".to_string(),
                description: String::new(),
                created_at: now,
                updated_at: now,
                owner_id: "user-1".to_string(),
                version: 1,
            },
            nodes: vec![
                node("a", NodeType::Input),
                node("b", NodeType::Agent),
                node("c", NodeType::Output),
            ],
            edges: vec![edge("e1", "a", "b"), edge("e2", "b", "c")],
        }
    }

    #[tokio::test]
    async fn test_create_seeds_all_nodes_pending() {
        let store = ExecutionStore::new();
        let workflow = linear_workflow();

        let execution = store
            .create(&workflow, JsonMap::new(), "user-1", "tenant-1")
            .await;

        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert_eq!(execution.node_states.len(), 3);
        assert!(execution
            .node_states
            .iter()
            .all(|s| s.status == NodeStatus::Pending));
    }

    #[tokio::test]
    async fn test_get_wrong_tenant_is_not_found() {
        let store = ExecutionStore::new();
        let workflow = linear_workflow();
        let execution = store
            .create(&workflow, JsonMap::new(), "user-1", "tenant-1")
            .await;

        assert!(store.get(&execution.id, "tenant-1").await.is_ok());
        assert!(matches!(
            store.get(&execution.id, "tenant-2").await,
            Err(EngineError::ExecutionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_status_timestamps() {
        let store = ExecutionStore::new();
        let workflow = linear_workflow();
        let execution = store
            .create(&workflow, JsonMap::new(), "user-1", "tenant-1")
            .await;

        let running = store
            .update_status(&execution.id, ExecutionStatus::Running)
            .await
            .expect("update");
        assert!(running.started_at.is_some());
        assert!(running.completed_at.is_none());

        let done = store
            .update_status(&execution.id, ExecutionStatus::Completed)
            .await
            .expect("update");
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_aggregate_status_partitions() {
        let store = ExecutionStore::new();
        let workflow = linear_workflow();
        let execution = store
            .create(&workflow, JsonMap::new(), "user-1", "tenant-1")
            .await;

        // All pending computes as running (documented aliasing)
        assert_eq!(
            store.compute_aggregate_status(&execution.id).await.expect("status"),
            ExecutionStatus::Running
        );

        for node_id in ["a", "b"] {
            store
                .update_node_state(
                    &execution.id,
                    node_id,
                    NodeStatus::Completed,
                    Some(serde_json::json!({})),
                    None,
                    None,
                )
                .await
                .expect("update");
        }
        store
            .update_node_state(&execution.id, "c", NodeStatus::Failed, None, Some("boom".into()), None)
            .await
            .expect("update");

        assert_eq!(
            store.compute_aggregate_status(&execution.id).await.expect("status"),
            ExecutionStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_compute_downstream_partition() {
        let workflow = linear_workflow();

        let (skipped, rerun) = compute_downstream_nodes(&workflow, "b");

        assert_eq!(skipped, vec!["a".to_string()]);
        assert_eq!(rerun, vec!["b".to_string(), "c".to_string()]);

        // skipped ∪ rerun covers every node exactly once
        let mut all: Vec<String> = skipped.iter().chain(rerun.iter()).cloned().collect();
        all.sort();
        assert_eq!(all, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_create_resumed_copies_completed_state() {
        let store = ExecutionStore::new();
        let workflow = linear_workflow();
        let parent = store
            .create(&workflow, JsonMap::new(), "user-1", "tenant-1")
            .await;

        store
            .update_node_state(
                &parent.id,
                "a",
                NodeStatus::Completed,
                Some(serde_json::json!({"data": "x"})),
                None,
                None,
            )
            .await
            .expect("update");
        store
            .update_node_state(&parent.id, "b", NodeStatus::Failed, None, Some("boom".into()), None)
            .await
            .expect("update");
        store
            .update_node_state(&parent.id, "c", NodeStatus::Skipped, None, None, None)
            .await
            .expect("update");

        let parent = store.get(&parent.id, "tenant-1").await.expect("get");
        let (skipped, rerun) = compute_downstream_nodes(&workflow, "b");
        let resumed = store
            .create_resumed(&parent, &workflow, "b", "user-1", "tenant-1", &skipped, &rerun)
            .await;

        assert_eq!(resumed.parent_execution_id.as_deref(), Some(parent.id.as_str()));
        assert_eq!(resumed.resumed_from_node_id.as_deref(), Some("b"));

        let states = resumed.node_state_map();
        assert_eq!(states["a"].status, NodeStatus::Completed);
        assert_eq!(states["a"].output, Some(serde_json::json!({"data": "x"})));
        assert_eq!(states["b"].status, NodeStatus::Pending);
        assert_eq!(states["c"].status, NodeStatus::Pending);
    }

    #[tokio::test]
    async fn test_list_by_workflow_filters_status() {
        let store = ExecutionStore::new();
        let workflow = linear_workflow();

        let e1 = store.create(&workflow, JsonMap::new(), "u", "tenant-1").await;
        let _e2 = store.create(&workflow, JsonMap::new(), "u", "tenant-1").await;
        store
            .update_status(&e1.id, ExecutionStatus::Failed)
            .await
            .expect("update");

        let (failed, _) = store
            .list_by_workflow("wf-1", "tenant-1", Some(ExecutionStatus::Failed), 10, None)
            .await
            .expect("list");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, e1.id);

        let (all, _) = store
            .list_by_workflow("wf-1", "tenant-1", None, 10, None)
            .await
            .expect("list");
        assert_eq!(all.len(), 2);
    }
}
