// Node runtime: cache-check, execute, cache-write
//
// Cache behavior:
// - Cache checked ONLY on the first attempt (retry_count == 0)
// - Cache written ONLY on success
// - Retries NEVER consult the cache, so a deterministic replay is
//   attempted after a failure
// - Cache failures NEVER break execution

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use flowline_core::events::{log_emitted, node_cache_hit, node_running};
use flowline_core::{EventBus, JobResult, NodeJob, NodeType};
use flowline_storage::{generate_cache_key, CacheKey, ResultCache};

use crate::executors::ExecutorRegistry;
use crate::queue::JobProcessor;

const DEFAULT_AGENT_VERSION: &str = "1.0.0";

/// Runtime for executing node jobs
pub struct NodeRuntime {
    cache: Arc<ResultCache>,
    events: Arc<EventBus>,
    executors: ExecutorRegistry,
    cache_enabled: bool,
}

impl NodeRuntime {
    pub fn new(cache: Arc<ResultCache>, events: Arc<EventBus>) -> Self {
        NodeRuntime {
            cache,
            events,
            executors: ExecutorRegistry::with_defaults(),
            cache_enabled: true,
        }
    }

    pub fn with_executors(
        cache: Arc<ResultCache>,
        events: Arc<EventBus>,
        executors: ExecutorRegistry,
    ) -> Self {
        NodeRuntime {
            cache,
            events,
            executors,
            cache_enabled: true,
        }
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Execute a node job.
    ///
    /// 1. First attempt and cacheable: check the cache
    /// 2. Cache hit: return the cached output immediately, duration 0
    /// 3. Otherwise execute the node
    /// 4. On success, write to the cache
    pub async fn execute(&self, job: &NodeJob) -> JobResult {
        let is_first_attempt = job.retry_count == 0;
        let is_cacheable = self.is_cacheable(job);
        let mut cache_key: Option<CacheKey> = None;

        if self.cache_enabled && is_first_attempt && is_cacheable {
            cache_key = self.generate_key(job);
            if let Some(key) = &cache_key {
                if let Some(hit) = self.check_cache(job, key) {
                    return hit;
                }
            }
        }

        let result = self.execute_node(job).await;

        if self.cache_enabled && result.success && is_cacheable {
            // Key may not exist yet when a retry succeeds
            let key = cache_key.or_else(|| self.generate_key(job));
            if let Some(key) = key {
                self.write_cache(job, &key, &result);
            }
        }

        result
    }

    /// Agent and tool outputs can be cached; input/output and unknown
    /// node types are pass-through. Caching also requires a tenant.
    fn is_cacheable(&self, job: &NodeJob) -> bool {
        if job.tenant_id.is_empty() {
            return false;
        }
        matches!(
            NodeType::from_str(&job.node_type),
            Ok(NodeType::Agent) | Ok(NodeType::Tool)
        )
    }

    fn generate_key(&self, job: &NodeJob) -> Option<CacheKey> {
        let agent_id = job
            .agent_id
            .as_deref()
            .unwrap_or(job.node_type.as_str());
        let agent_version = job
            .node_config
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_AGENT_VERSION);

        generate_cache_key(&job.tenant_id, agent_id, &job.inputs, agent_version)
    }

    /// Check the cache; on a hit emit NODE_CACHE_HIT and return a
    /// zero-duration result carrying the cached output.
    fn check_cache(&self, job: &NodeJob, key: &CacheKey) -> Option<JobResult> {
        let Some(entry) = self.cache.get(key) else {
            self.emit_log(job, "info", "Cache miss - executing node");
            return None;
        };

        self.events.emit(node_cache_hit(
            &job.execution_id,
            &job.node_id,
            entry.duration_ms,
        ));
        self.emit_log(
            job,
            "info",
            format!(
                "Cache hit - returning cached result (originally took {}ms)",
                entry.duration_ms
            ),
        );

        Some(JobResult {
            job_id: job.id.clone(),
            node_id: job.node_id.clone(),
            execution_id: job.execution_id.clone(),
            success: true,
            output: Some(entry.output),
            error: None,
            // Instant return from cache
            duration_ms: 0,
            cached: true,
        })
    }

    /// Write a successful result to the cache. Failures degrade to a
    /// warning log.
    fn write_cache(&self, job: &NodeJob, key: &CacheKey, result: &JobResult) {
        let output = result.output.clone().unwrap_or(serde_json::Value::Null);

        if self.cache.set(key, output, result.duration_ms) {
            self.emit_log(job, "info", "Result cached for future executions");
        } else {
            tracing::warn!(
                job_id = %job.id,
                node_id = %job.node_id,
                "Failed to cache result"
            );
            self.emit_log(job, "warn", "Failed to cache result");
        }
    }

    /// Core execution path, used on cache miss or retry
    async fn execute_node(&self, job: &NodeJob) -> JobResult {
        let start = Utc::now();

        self.events
            .emit(node_running(&job.execution_id, &job.node_id, job.retry_count));

        if job.retry_count > 0 {
            self.emit_log(
                job,
                "info",
                format!("Retrying execution (attempt {})", job.retry_count + 1),
            );
        } else {
            self.emit_log(job, "info", "Starting execution");
        }

        let outcome = match self.executors.get(&job.node_type) {
            Some(executor) => executor.run(job).await,
            None => {
                // Unknown node types execute as a generic passthrough
                self.emit_log(job, "warn", format!("Unknown node type: {}", job.node_type));
                Ok(serde_json::json!({
                    "type": "generic",
                    "node_id": job.node_id,
                    "node_type": job.node_type,
                    "inputs_received": job.inputs,
                    "message": "Executed as generic node",
                }))
            }
        };

        let duration_ms = (Utc::now() - start).num_milliseconds().max(0) as u64;

        match outcome {
            Ok(output) => {
                debug!(
                    node_id = %job.node_id,
                    duration_ms,
                    "Node execution completed"
                );
                self.emit_log(
                    job,
                    "info",
                    format!("Execution completed in {duration_ms}ms"),
                );

                JobResult {
                    job_id: job.id.clone(),
                    node_id: job.node_id.clone(),
                    execution_id: job.execution_id.clone(),
                    success: true,
                    output: Some(output),
                    error: None,
                    duration_ms,
                    cached: false,
                }
            }
            Err(e) => {
                self.emit_log(job, "error", format!("Execution failed: {e}"));

                JobResult {
                    job_id: job.id.clone(),
                    node_id: job.node_id.clone(),
                    execution_id: job.execution_id.clone(),
                    success: false,
                    output: None,
                    error: Some(e.to_string()),
                    duration_ms,
                    cached: false,
                }
            }
        }
    }

    fn emit_log(&self, job: &NodeJob, level: &str, message: impl Into<String>) {
        self.events
            .emit(log_emitted(&job.execution_id, &job.node_id, level, message));
    }
}

#[async_trait]
impl JobProcessor for NodeRuntime {
    async fn process(&self, job: NodeJob) -> anyhow::Result<JobResult> {
        Ok(self.execute(&job).await)
    }
}
