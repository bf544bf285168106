// Job models for the execution queue
//
// A NodeJob snapshots everything needed to run one node independently of
// the execution store, including the tenant for cache isolation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JsonMap;

/// Status of a job in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// A job representing a single attempt lifecycle of one node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NodeJob {
    /// Unique job identifier
    pub id: String,

    // Execution context
    pub tenant_id: String,
    pub execution_id: String,
    pub workflow_id: String,
    pub node_id: String,

    // Node configuration snapshot
    /// Node type as a string so unknown types degrade gracefully
    pub node_type: String,
    pub agent_id: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub node_config: JsonMap,

    /// Already-resolved inputs, keyed by upstream node id
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub inputs: JsonMap,

    // Job metadata
    pub status: JobStatus,

    // Retry configuration
    pub max_retries: u32,
    pub retry_count: u32,
    pub retry_backoff_ms: u64,

    // Timing
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    // Result
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl NodeJob {
    /// Whether the retry budget allows another attempt
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Result of one terminal job attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct JobResult {
    pub job_id: String,
    pub node_id: String,
    pub execution_id: String,
    pub success: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// True when the output was served from the result cache
    pub cached: bool,
}

/// Execution plan derived from a validated workflow.
///
/// Immutable per execution; the orchestrator consults it on every
/// completion to dispatch newly-ready dependents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ExecutionPlan {
    pub execution_id: String,
    pub workflow_id: String,

    /// Topological order of node ids
    pub execution_order: Vec<String>,
    /// node id -> parent node ids
    pub dependencies: HashMap<String, Vec<String>>,
    /// node id -> child node ids
    pub dependents: HashMap<String, Vec<String>>,
    pub entry_nodes: Vec<String>,
    pub exit_nodes: Vec<String>,
}
