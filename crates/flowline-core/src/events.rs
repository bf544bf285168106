// Execution events for streaming
//
// ExecutionEvent is the unit broadcast by the engine and relayed to
// WebSocket subscribers. Payload keys are camelCase because the events
// go to external clients verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Types of real-time events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum EventType {
    // Execution lifecycle
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionCancelled,

    // Node lifecycle
    NodeQueued,
    NodeRunning,
    NodeCompleted,
    NodeFailed,
    NodeSkipped,

    // Cache
    NodeCacheHit,

    // Logging
    LogEmitted,

    // Resume
    ResumeStart,
    NodeOutputReused,
    ResumeComplete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ExecutionStarted => "EXECUTION_STARTED",
            EventType::ExecutionCompleted => "EXECUTION_COMPLETED",
            EventType::ExecutionFailed => "EXECUTION_FAILED",
            EventType::ExecutionCancelled => "EXECUTION_CANCELLED",
            EventType::NodeQueued => "NODE_QUEUED",
            EventType::NodeRunning => "NODE_RUNNING",
            EventType::NodeCompleted => "NODE_COMPLETED",
            EventType::NodeFailed => "NODE_FAILED",
            EventType::NodeSkipped => "NODE_SKIPPED",
            EventType::NodeCacheHit => "NODE_CACHE_HIT",
            EventType::LogEmitted => "LOG_EMITTED",
            EventType::ResumeStart => "RESUME_START",
            EventType::NodeOutputReused => "NODE_OUTPUT_REUSED",
            EventType::ResumeComplete => "RESUME_COMPLETE",
        }
    }
}

/// An event emitted by the execution engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ExecutionEvent {
    pub event_type: EventType,
    pub execution_id: String,
    pub timestamp: DateTime<Utc>,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: Value,
}

impl ExecutionEvent {
    fn new(event_type: EventType, execution_id: impl Into<String>, payload: Value) -> Self {
        ExecutionEvent {
            event_type,
            execution_id: execution_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Convert to the wire message shape sent to subscribers
    pub fn to_message(&self) -> Value {
        json!({
            "event": self.event_type.as_str(),
            "executionId": self.execution_id,
            "timestamp": self.timestamp.to_rfc3339(),
            "payload": self.payload,
        })
    }
}

/// Create an execution started event
pub fn execution_started(
    execution_id: impl Into<String>,
    workflow_id: impl Into<String>,
    node_count: usize,
) -> ExecutionEvent {
    let workflow_id: String = workflow_id.into();
    ExecutionEvent::new(
        EventType::ExecutionStarted,
        execution_id,
        json!({ "workflowId": workflow_id, "nodeCount": node_count }),
    )
}

/// Create an execution completed event
pub fn execution_completed(execution_id: impl Into<String>, duration_ms: u64) -> ExecutionEvent {
    ExecutionEvent::new(
        EventType::ExecutionCompleted,
        execution_id,
        json!({ "durationMs": duration_ms }),
    )
}

/// Create an execution failed event
pub fn execution_failed(
    execution_id: impl Into<String>,
    error: impl Into<String>,
) -> ExecutionEvent {
    let error: String = error.into();
    ExecutionEvent::new(
        EventType::ExecutionFailed,
        execution_id,
        json!({ "error": error }),
    )
}

/// Create an execution cancelled event
pub fn execution_cancelled(execution_id: impl Into<String>) -> ExecutionEvent {
    ExecutionEvent::new(EventType::ExecutionCancelled, execution_id, json!({}))
}

/// Create a node queued event
pub fn node_queued(execution_id: impl Into<String>, node_id: impl Into<String>) -> ExecutionEvent {
    let node_id: String = node_id.into();
    ExecutionEvent::new(
        EventType::NodeQueued,
        execution_id,
        json!({ "nodeId": node_id }),
    )
}

/// Create a node running event
pub fn node_running(
    execution_id: impl Into<String>,
    node_id: impl Into<String>,
    retry_count: u32,
) -> ExecutionEvent {
    let node_id: String = node_id.into();
    ExecutionEvent::new(
        EventType::NodeRunning,
        execution_id,
        json!({ "nodeId": node_id, "retryCount": retry_count }),
    )
}

/// Create a node completed event
pub fn node_completed(
    execution_id: impl Into<String>,
    node_id: impl Into<String>,
    duration_ms: u64,
    output_summary: Option<String>,
    cached: bool,
) -> ExecutionEvent {
    let node_id: String = node_id.into();
    ExecutionEvent::new(
        EventType::NodeCompleted,
        execution_id,
        json!({
            "nodeId": node_id,
            "durationMs": duration_ms,
            "outputSummary": output_summary,
            "cached": cached,
        }),
    )
}

/// Create a node failed event
pub fn node_failed(
    execution_id: impl Into<String>,
    node_id: impl Into<String>,
    error: impl Into<String>,
    retry_count: u32,
    will_retry: bool,
) -> ExecutionEvent {
    let node_id: String = node_id.into();
    let error: String = error.into();
    ExecutionEvent::new(
        EventType::NodeFailed,
        execution_id,
        json!({
            "nodeId": node_id,
            "error": error,
            "retryCount": retry_count,
            "willRetry": will_retry,
        }),
    )
}

/// Create a node skipped event
pub fn node_skipped(
    execution_id: impl Into<String>,
    node_id: impl Into<String>,
    reason: impl Into<String>,
) -> ExecutionEvent {
    let node_id: String = node_id.into();
    let reason: String = reason.into();
    ExecutionEvent::new(
        EventType::NodeSkipped,
        execution_id,
        json!({ "nodeId": node_id, "reason": reason }),
    )
}

/// Create a node cache hit event
pub fn node_cache_hit(
    execution_id: impl Into<String>,
    node_id: impl Into<String>,
    original_duration_ms: u64,
) -> ExecutionEvent {
    let node_id: String = node_id.into();
    ExecutionEvent::new(
        EventType::NodeCacheHit,
        execution_id,
        json!({
            "nodeId": node_id,
            "originalDurationMs": original_duration_ms,
            "message": "Returning cached result",
        }),
    )
}

/// Create a log event. Level is one of "info", "warn", "error".
pub fn log_emitted(
    execution_id: impl Into<String>,
    node_id: impl Into<String>,
    level: &str,
    message: impl Into<String>,
) -> ExecutionEvent {
    let node_id: String = node_id.into();
    let message: String = message.into();
    ExecutionEvent::new(
        EventType::LogEmitted,
        execution_id,
        json!({
            "nodeId": node_id,
            "level": level,
            "message": message,
        }),
    )
}

/// Create a resume start event
pub fn resume_start(
    execution_id: impl Into<String>,
    parent_execution_id: impl Into<String>,
    resumed_from_node_id: impl Into<String>,
    skipped_count: usize,
    rerun_count: usize,
) -> ExecutionEvent {
    let parent_execution_id: String = parent_execution_id.into();
    let resumed_from_node_id: String = resumed_from_node_id.into();
    ExecutionEvent::new(
        EventType::ResumeStart,
        execution_id,
        json!({
            "parentExecutionId": parent_execution_id,
            "resumedFromNodeId": resumed_from_node_id,
            "skippedCount": skipped_count,
            "rerunCount": rerun_count,
        }),
    )
}

/// Create a node output reused event
pub fn node_output_reused(
    execution_id: impl Into<String>,
    node_id: impl Into<String>,
    source_execution_id: impl Into<String>,
) -> ExecutionEvent {
    let node_id: String = node_id.into();
    let source_execution_id: String = source_execution_id.into();
    ExecutionEvent::new(
        EventType::NodeOutputReused,
        execution_id,
        json!({
            "nodeId": node_id,
            "sourceExecutionId": source_execution_id,
        }),
    )
}

/// Create a resume complete event
pub fn resume_complete(
    execution_id: impl Into<String>,
    status: &str,
    duration_ms: u64,
) -> ExecutionEvent {
    ExecutionEvent::new(
        EventType::ResumeComplete,
        execution_id,
        json!({ "status": status, "durationMs": duration_ms }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_to_message_shape() {
        let event = node_completed("exec-1", "node-a", 42, Some("ok".to_string()), false);
        let message = event.to_message();

        assert_eq!(message["event"], "NODE_COMPLETED");
        assert_eq!(message["executionId"], "exec-1");
        assert_eq!(message["payload"]["nodeId"], "node-a");
        assert_eq!(message["payload"]["durationMs"], 42);
        assert_eq!(message["payload"]["cached"], false);
        assert!(message["timestamp"].is_string());
    }

    #[test]
    fn test_event_type_serializes_screaming_snake() {
        let json = serde_json::to_string(&EventType::NodeCacheHit).unwrap();
        assert_eq!(json, "\"NODE_CACHE_HIT\"");
    }
}
