// Workflow domain models
//
// A workflow is a versioned DAG of nodes and edges. Nodes and edges are
// immutable snapshots; every mutation produces a new version.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JsonMap;

/// Lifecycle status of a workflow definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum WorkflowStatus {
    /// Being edited, not executable
    Draft,
    /// Passed validation, ready to execute
    Valid,
    /// Failed validation, needs fixes
    Invalid,
    /// Soft-deleted, not executable
    Archived,
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(WorkflowStatus::Draft),
            "valid" => Ok(WorkflowStatus::Valid),
            "invalid" => Ok(WorkflowStatus::Invalid),
            "archived" => Ok(WorkflowStatus::Archived),
            other => Err(format!("unknown workflow status: {other}")),
        }
    }
}

/// The category of node, determining its execution behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum NodeType {
    /// Executes an AI agent
    Agent,
    /// Executes a deterministic tool/function
    Tool,
    /// Workflow entry point (user-provided data)
    Input,
    /// Workflow exit point (final result)
    Output,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Agent => "agent",
            NodeType::Tool => "tool",
            NodeType::Input => "input",
            NodeType::Output => "output",
        }
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(NodeType::Agent),
            "tool" => Ok(NodeType::Tool),
            "input" => Ok(NodeType::Input),
            "output" => Ok(NodeType::Output),
            other => Err(format!("unknown node type: {other}")),
        }
    }
}

/// Visual position on the canvas. Not relevant to execution.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NodePosition {
    pub x: f64,
    pub y: f64,
}

/// Node-specific configuration. Varies by node type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NodeConfig {
    /// Agent referenced by agent nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Tool referenced by tool nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    /// Free-form parameters passed to the executor
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub parameters: JsonMap,
}

/// A single node in the workflow DAG
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Node {
    /// Unique within the workflow
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub position: NodePosition,
    #[serde(default)]
    pub config: NodeConfig,
}

fn default_source_port() -> String {
    "output".to_string()
}

fn default_target_port() -> String {
    "input".to_string()
}

/// A directed edge connecting two nodes in the workflow DAG.
///
/// The (source, source_port, target, target_port) 4-tuple is unique
/// within a workflow; the validator rejects duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Edge {
    pub id: String,
    /// Node producing the data
    pub source: String,
    /// Output port on the source node
    #[serde(default = "default_source_port")]
    pub source_port: String,
    /// Node consuming the data
    pub target: String,
    /// Input port on the target node
    #[serde(default = "default_target_port")]
    pub target_port: String,
}

/// Workflow metadata, separate from graph structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WorkflowMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner_id: String,
    /// Optimistic concurrency control; bumped on every mutation
    pub version: u32,
}

/// A complete workflow definition.
///
/// The nodes and edges form a DAG. Invariants (enforced by the validator):
/// acyclic, all edge references resolve, at least one entry node, no
/// duplicate edges, no orphan nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Workflow {
    pub id: String,
    pub tenant_id: String,
    pub status: WorkflowStatus,
    pub meta: WorkflowMeta,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Workflow {
    /// Build a node lookup map. O(n) construction, O(1) lookup.
    pub fn node_map(&self) -> HashMap<&str, &Node> {
        self.nodes.iter().map(|n| (n.id.as_str(), n)).collect()
    }

    /// Build an edge lookup map. O(n) construction, O(1) lookup.
    pub fn edge_map(&self) -> HashMap<&str, &Edge> {
        self.edges.iter().map(|e| (e.id.as_str(), e)).collect()
    }
}
