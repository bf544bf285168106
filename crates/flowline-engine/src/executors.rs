// Node executors
//
// The seam between the engine and concrete agent/tool backends. The
// runtime dispatches on node type through a registry, so real backends
// can be dropped in without touching the engine. The built-in
// executors are deterministic stand-ins used by tests and local
// development.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};

use flowline_core::NodeJob;

/// Executes the concrete work of one node type
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn run(&self, job: &NodeJob) -> anyhow::Result<Value>;
}

/// Registry of executors keyed by node type string
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        ExecutorRegistry {
            executors: HashMap::new(),
        }
    }

    /// Registry with the built-in executors for all four node types
    pub fn with_defaults() -> Self {
        let mut registry = ExecutorRegistry::new();
        registry.register("input", Arc::new(PassthroughExecutor::input()));
        registry.register("output", Arc::new(PassthroughExecutor::output()));
        registry.register("agent", Arc::new(MockAgentExecutor));
        registry.register("tool", Arc::new(MockToolExecutor));
        registry
    }

    pub fn register(&mut self, node_type: impl Into<String>, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(node_type.into(), executor);
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(node_type).cloned()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        ExecutorRegistry::with_defaults()
    }
}

/// Input/output nodes pass their resolved inputs through unchanged
pub struct PassthroughExecutor {
    kind: &'static str,
}

impl PassthroughExecutor {
    pub fn input() -> Self {
        PassthroughExecutor { kind: "input" }
    }

    pub fn output() -> Self {
        PassthroughExecutor { kind: "output" }
    }
}

#[async_trait]
impl NodeExecutor for PassthroughExecutor {
    async fn run(&self, job: &NodeJob) -> anyhow::Result<Value> {
        Ok(json!({
            "type": self.kind,
            "node_id": job.node_id,
            "data": job.inputs,
        }))
    }
}

/// Stand-in agent invocation
pub struct MockAgentExecutor;

#[async_trait]
impl NodeExecutor for MockAgentExecutor {
    async fn run(&self, job: &NodeJob) -> anyhow::Result<Value> {
        let agent_id = job.agent_id.as_deref().unwrap_or("unknown");
        let tokens_used = rand::thread_rng().gen_range(50..200);

        Ok(json!({
            "type": "agent",
            "node_id": job.node_id,
            "agent_id": agent_id,
            "result": format!("Mock agent response from {agent_id}"),
            "inputs_received": job.inputs,
            "config": job.node_config,
            "metadata": {
                "model": "mock-model-v1",
                "tokens_used": tokens_used,
            },
        }))
    }
}

/// Stand-in tool invocation
pub struct MockToolExecutor;

#[async_trait]
impl NodeExecutor for MockToolExecutor {
    async fn run(&self, job: &NodeJob) -> anyhow::Result<Value> {
        let tool_id = job
            .node_config
            .get("tool_id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        Ok(json!({
            "type": "tool",
            "node_id": job.node_id,
            "tool_id": tool_id,
            "result": format!("Mock tool output from {tool_id}"),
            "inputs_received": job.inputs,
        }))
    }
}

/// Always fails with a fixed error. Used to exercise retry and failure
/// propagation paths.
pub struct FailingExecutor {
    pub error: String,
}

impl FailingExecutor {
    pub fn new(error: impl Into<String>) -> Self {
        FailingExecutor {
            error: error.into(),
        }
    }
}

#[async_trait]
impl NodeExecutor for FailingExecutor {
    async fn run(&self, _job: &NodeJob) -> anyhow::Result<Value> {
        Err(anyhow::anyhow!("{}", self.error))
    }
}
