// Flowline core: domain models, DAG validation, events
//
// Decision: Validation is pure functions over the workflow value (no I/O)
// Decision: The event bus is channel-based so subscribers are ordinary tasks

pub mod agent;
pub mod emitter;
pub mod error;
pub mod events;
pub mod execution;
pub mod job;
pub mod validation;
pub mod workflow;

pub use agent::{AgentDefinition, AgentRegistry, DataType, PortSchema};
pub use emitter::{EventBus, EventSubscription};
pub use error::{EngineError, Result};
pub use events::{EventType, ExecutionEvent};
pub use execution::{Execution, ExecutionStatus, NodeState, NodeStatus};
pub use job::{ExecutionPlan, JobResult, JobStatus, NodeJob};
pub use validation::{
    ValidateOptions, ValidationError, ValidationErrorCode, ValidationResult,
};
pub use workflow::{
    Edge, Node, NodeConfig, NodePosition, NodeType, Workflow, WorkflowMeta, WorkflowStatus,
};

/// JSON object map used for node inputs, outputs, and configuration.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
