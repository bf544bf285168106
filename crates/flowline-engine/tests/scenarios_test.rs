// End-to-end execution scenarios driven through the full engine:
// store -> orchestrator -> queue -> runtime -> events.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use flowline_core::{
    Edge, EventBus, EventSubscription, EventType, ExecutionStatus, JsonMap, Node, NodeConfig,
    NodeJob, NodePosition, NodeStatus, NodeType, Workflow,
};
use flowline_engine::{
    EngineConfig, ExecutorRegistry, FailingExecutor, JobQueue, MockToolExecutor, NodeExecutor,
    Orchestrator, PassthroughExecutor, NodeRuntime,
};
use flowline_storage::{compute_downstream_nodes, ExecutionStore, ResultCache, WorkflowStore};

struct Harness {
    workflows: Arc<WorkflowStore>,
    executions: Arc<ExecutionStore>,
    #[allow(dead_code)]
    cache: Arc<ResultCache>,
    events: Arc<EventBus>,
    queue: Arc<JobQueue>,
    orchestrator: Arc<Orchestrator>,
}

async fn harness_with(config: EngineConfig, registry: ExecutorRegistry) -> Harness {
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
        config,
    );
    let runtime = NodeRuntime::with_executors(cache.clone(), events.clone(), registry);
    orchestrator.initialize(runtime).await.expect("initialize");

    Harness {
        workflows,
        executions,
        cache,
        events,
        queue,
        orchestrator,
    }
}

async fn harness() -> Harness {
    harness_with(
        EngineConfig {
            max_retries: 2,
            retry_backoff_ms: 1,
        },
        ExecutorRegistry::with_defaults(),
    )
    .await
}

fn node(id: &str, node_type: NodeType, agent_id: Option<&str>) -> Node {
    Node {
        id: id.to_string(),
        node_type,
        label: id.to_string(),
        position: NodePosition::default(),
        config: NodeConfig {
            agent_id: agent_id.map(|s| s.to_string()),
            tool_id: None,
            parameters: JsonMap::new(),
        },
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

/// A (input) -> B (agent gpt-4) -> C (output)
fn linear_nodes() -> (Vec<Node>, Vec<Edge>) {
    (
        vec![
            node("A", NodeType::Input, None),
            node("B", NodeType::Agent, Some("gpt-4")),
            node("C", NodeType::Output, None),
        ],
        vec![edge("e1", "A", "B"), edge("e2", "B", "C")],
    )
}

fn inputs_hi() -> JsonMap {
    let mut inputs = JsonMap::new();
    inputs.insert("message".to_string(), json!("hi"));
    inputs
}

async fn create_workflow(h: &Harness, tenant: &str) -> Workflow {
    let (nodes, edges) = linear_nodes();
    let (workflow, errors) = h
        .workflows
        .create("linear", "", nodes, edges, "user-1", tenant)
        .await;
    assert!(errors.is_none(), "workflow should validate");
    workflow
}

async fn wait_terminal(h: &Harness, execution_id: &str, tenant: &str) -> flowline_core::Execution {
    for _ in 0..500 {
        let execution = h.executions.get(execution_id, tenant).await.expect("get");
        if execution.status.is_terminal() {
            return execution;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {execution_id} did not reach a terminal status");
}

/// Drain every event currently buffered on the subscription
fn drain(sub: &mut EventSubscription) -> Vec<flowline_core::ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = sub.receiver.try_recv() {
        events.push(event);
    }
    events
}

/// Keep only the lifecycle events (drop logs and cache notices)
fn lifecycle(events: &[flowline_core::ExecutionEvent]) -> Vec<(EventType, Option<String>)> {
    events
        .iter()
        .filter(|e| {
            !matches!(
                e.event_type,
                EventType::LogEmitted | EventType::NodeCacheHit | EventType::NodeOutputReused
            )
        })
        .map(|e| {
            (
                e.event_type,
                e.payload.get("nodeId").and_then(Value::as_str).map(String::from),
            )
        })
        .collect()
}

/// Fails the first `failures` invocations, then succeeds
struct FlakyAgent {
    remaining: AtomicU32,
}

#[async_trait]
impl NodeExecutor for FlakyAgent {
    async fn run(&self, job: &NodeJob) -> anyhow::Result<Value> {
        if self.remaining.load(Ordering::SeqCst) > 0 {
            self.remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(anyhow::anyhow!("agent backend unavailable"));
        }
        Ok(json!({
            "type": "agent",
            "node_id": job.node_id,
            "result": "recovered",
        }))
    }
}

/// Sleeps long enough for a cancel to land mid-run
struct SlowAgent;

#[async_trait]
impl NodeExecutor for SlowAgent {
    async fn run(&self, job: &NodeJob) -> anyhow::Result<Value> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(json!({"type": "agent", "node_id": job.node_id, "result": "slow"}))
    }
}

// Scenario 1: linear happy path with the exact event order
#[tokio::test]
async fn test_linear_happy_path() {
    let h = harness().await;
    let workflow = create_workflow(&h, "tenant-x").await;
    let mut sub = h.events.subscribe_all();

    let execution = h
        .executions
        .create(&workflow, inputs_hi(), "user-1", "tenant-x")
        .await;
    h.orchestrator
        .start_execution(&workflow, &execution)
        .await
        .expect("start");

    let done = wait_terminal(&h, &execution.id, "tenant-x").await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert!(done
        .node_states
        .iter()
        .all(|s| s.status == NodeStatus::Completed));

    let events = drain(&mut sub);
    let sequence = lifecycle(&events);
    let expected: Vec<(EventType, Option<String>)> = vec![
        (EventType::ExecutionStarted, None),
        (EventType::NodeQueued, Some("A".into())),
        (EventType::NodeRunning, Some("A".into())),
        (EventType::NodeCompleted, Some("A".into())),
        (EventType::NodeQueued, Some("B".into())),
        (EventType::NodeRunning, Some("B".into())),
        (EventType::NodeCompleted, Some("B".into())),
        (EventType::NodeQueued, Some("C".into())),
        (EventType::NodeRunning, Some("C".into())),
        (EventType::NodeCompleted, Some("C".into())),
        (EventType::ExecutionCompleted, None),
    ];
    assert_eq!(sequence, expected);

    h.orchestrator.shutdown().await;
}

// Scenario 2: second identical run serves B from the cache
#[tokio::test]
async fn test_cache_hit_replay() {
    let h = harness().await;
    let workflow = create_workflow(&h, "tenant-x").await;

    let first = h
        .executions
        .create(&workflow, inputs_hi(), "user-1", "tenant-x")
        .await;
    h.orchestrator
        .start_execution(&workflow, &first)
        .await
        .expect("start");
    wait_terminal(&h, &first.id, "tenant-x").await;

    let mut sub = h.events.subscribe_all();
    let second = h
        .executions
        .create(&workflow, inputs_hi(), "user-1", "tenant-x")
        .await;
    h.orchestrator
        .start_execution(&workflow, &second)
        .await
        .expect("start");
    let done = wait_terminal(&h, &second.id, "tenant-x").await;
    assert_eq!(done.status, ExecutionStatus::Completed);

    let events = drain(&mut sub);

    let cache_hits: Vec<&str> = events
        .iter()
        .filter(|e| e.event_type == EventType::NodeCacheHit)
        .filter_map(|e| e.payload.get("nodeId").and_then(Value::as_str))
        .collect();
    assert_eq!(cache_hits, vec!["B"], "only the agent node hits the cache");

    let b_completed = events
        .iter()
        .find(|e| {
            e.event_type == EventType::NodeCompleted
                && e.payload.get("nodeId").and_then(Value::as_str) == Some("B")
        })
        .expect("B completion event");
    assert_eq!(b_completed.payload["cached"], json!(true));
    assert_eq!(b_completed.payload["durationMs"], json!(0));

    h.orchestrator.shutdown().await;
}

// Scenario 3: identical inputs in another tenant must not hit the cache
#[tokio::test]
async fn test_cross_tenant_cache_isolation() {
    let h = harness().await;

    let wf_x = create_workflow(&h, "tenant-x").await;
    let exec_x = h
        .executions
        .create(&wf_x, inputs_hi(), "user-x", "tenant-x")
        .await;
    h.orchestrator
        .start_execution(&wf_x, &exec_x)
        .await
        .expect("start");
    wait_terminal(&h, &exec_x.id, "tenant-x").await;

    let mut sub = h.events.subscribe_all();
    let wf_y = create_workflow(&h, "tenant-y").await;
    let exec_y = h
        .executions
        .create(&wf_y, inputs_hi(), "user-y", "tenant-y")
        .await;
    h.orchestrator
        .start_execution(&wf_y, &exec_y)
        .await
        .expect("start");
    let done = wait_terminal(&h, &exec_y.id, "tenant-y").await;
    assert_eq!(done.status, ExecutionStatus::Completed);

    let events = drain(&mut sub);
    assert!(
        events
            .iter()
            .all(|e| e.event_type != EventType::NodeCacheHit),
        "tenant Y must not see tenant X's cache entries"
    );

    h.orchestrator.shutdown().await;
}

// Scenario 4: a persistently failing node skips its descendants
#[tokio::test]
async fn test_failure_propagation() {
    let mut registry = ExecutorRegistry::new();
    registry.register("input", Arc::new(PassthroughExecutor::input()));
    registry.register("output", Arc::new(PassthroughExecutor::output()));
    registry.register("tool", Arc::new(MockToolExecutor));
    registry.register("agent", Arc::new(FailingExecutor::new("agent always fails")));

    let h = harness_with(
        EngineConfig {
            max_retries: 2,
            retry_backoff_ms: 1,
        },
        registry,
    )
    .await;

    let workflow = create_workflow(&h, "tenant-x").await;
    let mut sub = h.events.subscribe_all();

    let execution = h
        .executions
        .create(&workflow, inputs_hi(), "user-1", "tenant-x")
        .await;
    h.orchestrator
        .start_execution(&workflow, &execution)
        .await
        .expect("start");

    let done = wait_terminal(&h, &execution.id, "tenant-x").await;
    assert_eq!(done.status, ExecutionStatus::Failed);

    let states = done.node_state_map();
    assert_eq!(states["A"].status, NodeStatus::Completed);
    assert_eq!(states["B"].status, NodeStatus::Failed);
    assert_eq!(states["B"].retry_count, 2, "retry budget exhausted");
    assert_eq!(states["C"].status, NodeStatus::Skipped);

    let events = drain(&mut sub);

    let b_failed = events
        .iter()
        .find(|e| e.event_type == EventType::NodeFailed)
        .expect("NODE_FAILED event");
    assert_eq!(b_failed.payload["nodeId"], json!("B"));
    assert_eq!(b_failed.payload["retryCount"], json!(2));

    let c_skipped = events
        .iter()
        .find(|e| e.event_type == EventType::NodeSkipped)
        .expect("NODE_SKIPPED event");
    assert_eq!(c_skipped.payload["nodeId"], json!("C"));
    assert!(c_skipped.payload["reason"]
        .as_str()
        .expect("reason")
        .contains("upstream failure"));

    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::ExecutionFailed));

    h.orchestrator.shutdown().await;
}

// Scenario 5: resume re-runs the failed node and its descendants only
#[tokio::test]
async fn test_resume_after_failure() {
    let mut registry = ExecutorRegistry::new();
    registry.register("input", Arc::new(PassthroughExecutor::input()));
    registry.register("output", Arc::new(PassthroughExecutor::output()));
    registry.register("tool", Arc::new(MockToolExecutor));
    registry.register(
        "agent",
        Arc::new(FlakyAgent {
            remaining: AtomicU32::new(1),
        }),
    );

    let h = harness_with(
        EngineConfig {
            max_retries: 0,
            retry_backoff_ms: 1,
        },
        registry,
    )
    .await;

    let workflow = create_workflow(&h, "tenant-x").await;
    let parent = h
        .executions
        .create(&workflow, inputs_hi(), "user-1", "tenant-x")
        .await;
    h.orchestrator
        .start_execution(&workflow, &parent)
        .await
        .expect("start");
    let parent = wait_terminal(&h, &parent.id, "tenant-x").await;
    assert_eq!(parent.status, ExecutionStatus::Failed);

    // Resume from the failed node
    let (skipped, rerun) = compute_downstream_nodes(&workflow, "B");
    assert_eq!(skipped, vec!["A".to_string()]);
    assert_eq!(rerun, vec!["B".to_string(), "C".to_string()]);

    let mut sub = h.events.subscribe_all();
    let resumed = h
        .executions
        .create_resumed(&parent, &workflow, "B", "user-1", "tenant-x", &skipped, &rerun)
        .await;
    h.orchestrator
        .start_execution(&workflow, &resumed)
        .await
        .expect("resume");

    let done = wait_terminal(&h, &resumed.id, "tenant-x").await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.parent_execution_id.as_deref(), Some(parent.id.as_str()));

    let events = drain(&mut sub);

    let resume_started = events
        .iter()
        .find(|e| e.event_type == EventType::ResumeStart)
        .expect("RESUME_START event");
    assert_eq!(resume_started.payload["skippedCount"], json!(1));
    assert_eq!(resume_started.payload["rerunCount"], json!(2));
    assert_eq!(
        resume_started.payload["parentExecutionId"],
        json!(parent.id)
    );

    let reused = events
        .iter()
        .find(|e| e.event_type == EventType::NodeOutputReused)
        .expect("NODE_OUTPUT_REUSED event");
    assert_eq!(reused.payload["nodeId"], json!("A"));
    assert_eq!(reused.payload["sourceExecutionId"], json!(parent.id));

    // A never re-queues; B and C do
    let queued: Vec<&str> = events
        .iter()
        .filter(|e| e.event_type == EventType::NodeQueued)
        .filter_map(|e| e.payload.get("nodeId").and_then(Value::as_str))
        .collect();
    assert_eq!(queued, vec!["B", "C"]);

    let finished = events
        .iter()
        .find(|e| e.event_type == EventType::ResumeComplete)
        .expect("RESUME_COMPLETE event");
    assert_eq!(finished.payload["status"], json!("completed"));

    h.orchestrator.shutdown().await;
}

// Scenario 6: cancelling mid-run skips unstarted nodes and never
// dispatches dependents of the node that finishes naturally
#[tokio::test]
async fn test_cancellation_mid_run() {
    let mut registry = ExecutorRegistry::new();
    registry.register("input", Arc::new(SlowAgent));
    registry.register("output", Arc::new(PassthroughExecutor::output()));
    registry.register("tool", Arc::new(MockToolExecutor));
    registry.register("agent", Arc::new(SlowAgent));

    let h = harness_with(
        EngineConfig {
            max_retries: 0,
            retry_backoff_ms: 1,
        },
        registry,
    )
    .await;

    let workflow = create_workflow(&h, "tenant-x").await;
    let mut sub = h.events.subscribe_all();

    let execution = h
        .executions
        .create(&workflow, inputs_hi(), "user-1", "tenant-x")
        .await;
    h.orchestrator
        .start_execution(&workflow, &execution)
        .await
        .expect("start");

    // Wait until A's job is actually running on the worker
    for _ in 0..200 {
        let jobs = h.queue.jobs_by_execution(&execution.id).await;
        if jobs
            .iter()
            .any(|j| j.status == flowline_core::JobStatus::Running)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Caller's cancel order: queue jobs, execution status, sweep
    // pending/queued nodes, then notify the orchestrator
    h.queue.cancel_execution(&execution.id).await;
    h.executions
        .cancel(&execution.id, "tenant-x")
        .await
        .expect("cancel");
    let current = h.executions.get(&execution.id, "tenant-x").await.expect("get");
    for state in &current.node_states {
        if matches!(state.status, NodeStatus::Pending | NodeStatus::Queued) {
            h.executions
                .update_node_state(
                    &execution.id,
                    &state.node_id,
                    NodeStatus::Skipped,
                    None,
                    Some("Cancelled by user".to_string()),
                    None,
                )
                .await
                .expect("skip");
        }
    }
    h.orchestrator.cancel_execution(&execution.id).await;

    // Let A finish its attempt naturally
    h.queue.drain().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let done = h.executions.get(&execution.id, "tenant-x").await.expect("get");
    assert_eq!(done.status, ExecutionStatus::Cancelled, "terminal status sticks");

    let states = done.node_state_map();
    assert_eq!(states["B"].status, NodeStatus::Skipped);
    assert_eq!(states["C"].status, NodeStatus::Skipped);

    let events = drain(&mut sub);
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::ExecutionCancelled));

    // B was never dispatched after cancellation
    let queued: Vec<&str> = events
        .iter()
        .filter(|e| e.event_type == EventType::NodeQueued)
        .filter_map(|e| e.payload.get("nodeId").and_then(Value::as_str))
        .collect();
    assert_eq!(queued, vec!["A"]);

    h.orchestrator.shutdown().await;
}

// Executing an invalid workflow is refused before any node runs
#[tokio::test]
async fn test_invalid_workflow_refused() {
    let h = harness().await;

    let nodes = vec![
        node("start", NodeType::Input, None),
        node("a", NodeType::Agent, None),
        node("b", NodeType::Agent, None),
    ];
    let edges = vec![
        edge("e0", "start", "a"),
        edge("e1", "a", "b"),
        edge("e2", "b", "a"),
    ];
    let (workflow, errors) = h
        .workflows
        .create("cyclic", "", nodes, edges, "user-1", "tenant-x")
        .await;
    assert!(errors.is_some());

    let execution = h
        .executions
        .create(&workflow, JsonMap::new(), "user-1", "tenant-x")
        .await;

    let err = h
        .orchestrator
        .start_execution(&workflow, &execution)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        flowline_core::EngineError::WorkflowInvalid(_)
    ));

    h.orchestrator.shutdown().await;
}
