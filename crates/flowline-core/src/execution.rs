// Execution domain models

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JsonMap;

/// Overall execution status for the entire workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ExecutionStatus {
    /// Created, not yet started
    Pending,
    /// At least one node is executing
    Running,
    /// All nodes finished successfully
    Completed,
    /// At least one node failed (after retries)
    Failed,
    /// User-initiated cancellation
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Execution status for a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum NodeStatus {
    /// Waiting for dependencies
    Pending,
    /// Dependencies met, in queue
    Queued,
    /// Currently executing
    Running,
    /// Finished successfully
    Completed,
    /// Failed after all retries
    Failed,
    /// Skipped due to upstream failure or cancellation
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Skipped
        )
    }
}

/// Runtime state of a single node during execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NodeState {
    pub node_id: String,
    pub status: NodeStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub output: Option<serde_json::Value>,
}

impl NodeState {
    /// Fresh pending state for a node
    pub fn pending(node_id: impl Into<String>) -> Self {
        NodeState {
            node_id: node_id.into(),
            status: NodeStatus::Pending,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            error: None,
            output: None,
        }
    }
}

/// A single execution run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Execution {
    pub id: String,
    pub tenant_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,

    /// Snapshot of workflow version at execution time
    pub workflow_version: u32,

    /// User who triggered the execution
    pub triggered_by: String,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Per-node execution state
    pub node_states: Vec<NodeState>,

    /// Inputs provided at execution start
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub inputs: JsonMap,

    /// Set when this execution resumes a failed parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from_node_id: Option<String>,
}

impl Execution {
    /// Build a node state lookup map
    pub fn node_state_map(&self) -> HashMap<&str, &NodeState> {
        self.node_states
            .iter()
            .map(|s| (s.node_id.as_str(), s))
            .collect()
    }

    pub fn is_resumed(&self) -> bool {
        self.parent_execution_id.is_some()
    }
}
