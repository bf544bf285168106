// Agent definitions for semantic validation
//
// A typed registry of agent port schemas. When supplied to the validator
// it enables type-compatibility (M1) and required-input (M2) checks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Data types flowing across ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum DataType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

/// Schema of a single input or output port
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PortSchema {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
}

/// Typed definition of an agent, used for edge type checks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentDefinition {
    pub id: String,
    pub version: String,
    pub input_ports: Vec<PortSchema>,
    pub output_ports: Vec<PortSchema>,
}

impl AgentDefinition {
    pub fn input_port(&self, name: &str) -> Option<&PortSchema> {
        self.input_ports.iter().find(|p| p.name == name)
    }

    pub fn output_port(&self, name: &str) -> Option<&PortSchema> {
        self.output_ports.iter().find(|p| p.name == name)
    }
}

/// Registry of agent definitions keyed by agent id
pub type AgentRegistry = HashMap<String, AgentDefinition>;

/// Check if a source type can flow to a target type.
/// Strict equality; coercion rules can extend this.
pub fn types_compatible(source: DataType, target: DataType) -> bool {
    source == target
}
