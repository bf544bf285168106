// API error responses
//
// Every failure crosses the wire as { code, message, details[],
// request_id } with a closed code enumeration. The core never
// distinguishes "wrong tenant" from "not found" on the way out.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use flowline_core::{EngineError, ValidationError};

/// Closed enumeration of API error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    WorkflowNotFound,
    ExecutionNotFound,
    WorkflowInvalid,
    WorkflowArchived,
    MissingInputs,
    VersionConflict,
    InvalidCursor,
    ResumeNotAllowed,
    Unauthorized,
    Forbidden,
    InternalError,
}

/// Detailed error information
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorDetail {
    pub field: Option<String>,
    pub message: String,
    #[schema(value_type = Object)]
    pub metadata: Value,
}

/// Structured API error response body
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    pub details: Vec<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// An API error with its HTTP status
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
    pub details: Vec<ErrorDetail>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::UNAUTHORIZED, ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::FORBIDDEN, ErrorCode::Forbidden, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InternalError,
            message,
        )
    }

    pub fn resume_not_allowed(message: impl Into<String>) -> Self {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            ErrorCode::ResumeNotAllowed,
            message,
        )
    }

    pub fn missing_inputs(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, ErrorCode::MissingInputs, message)
    }

    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = details;
        self
    }
}

/// Turn a validation error into a response detail
pub fn validation_detail(error: &ValidationError) -> ErrorDetail {
    ErrorDetail {
        field: None,
        message: error.message.clone(),
        metadata: json!({
            "code": error.code,
            "nodeIds": error.node_ids,
            "edgeIds": error.edge_ids,
        }),
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::WorkflowNotFound(id) => ApiError::new(
                StatusCode::NOT_FOUND,
                ErrorCode::WorkflowNotFound,
                format!("Workflow not found: {id}"),
            ),
            EngineError::ExecutionNotFound(id) => ApiError::new(
                StatusCode::NOT_FOUND,
                ErrorCode::ExecutionNotFound,
                format!("Execution not found: {id}"),
            ),
            EngineError::WorkflowArchived(id) => ApiError::new(
                StatusCode::BAD_REQUEST,
                ErrorCode::WorkflowArchived,
                format!("Workflow is archived: {id}"),
            ),
            EngineError::VersionConflict { expected, actual } => ApiError::new(
                StatusCode::CONFLICT,
                ErrorCode::VersionConflict,
                format!("Version conflict: expected {expected}, found {actual}"),
            ),
            EngineError::WorkflowInvalid(errors) => ApiError::new(
                StatusCode::BAD_REQUEST,
                ErrorCode::WorkflowInvalid,
                "Workflow validation failed",
            )
            .with_details(errors.iter().map(validation_detail).collect()),
            EngineError::InvalidCursor(cursor) => ApiError::new(
                StatusCode::BAD_REQUEST,
                ErrorCode::InvalidCursor,
                format!("Invalid cursor: {cursor}"),
            ),
            EngineError::ResumeNotAllowed(msg) => ApiError::resume_not_allowed(msg),
            EngineError::MissingInputs(msg) => ApiError::missing_inputs(msg),
            EngineError::Queue(msg) => ApiError::internal(msg),
            EngineError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                ApiError::internal("An unexpected error occurred")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code,
            message: self.message,
            details: self.details,
            request_id: Some(Uuid::now_v7().to_string()),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_mapping() {
        let err: ApiError = EngineError::workflow_not_found("wf-1").into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, ErrorCode::WorkflowNotFound);

        let err: ApiError = EngineError::VersionConflict {
            expected: 1,
            actual: 2,
        }
        .into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, ErrorCode::VersionConflict);
    }

    #[test]
    fn test_error_code_wire_format() {
        let json = serde_json::to_string(&ErrorCode::ResumeNotAllowed).unwrap();
        assert_eq!(json, "\"RESUME_NOT_ALLOWED\"");
    }
}
