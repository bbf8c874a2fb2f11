/// Error types for the qcflow daemon
use hyper::StatusCode;
use qcflow_core::{ErrorKind, WorkflowError};
use serde_json::json;
use thiserror::Error;

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Daemon error types
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Missing or invalid credential
    #[error("Authentication error: {0}")]
    AuthError(String),

    /// Malformed request (bad JSON, missing query parameter)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No route matches the request path
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    /// Route exists but not for this method
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Server error
    #[error("Server error: {0}")]
    ServerError(String),

    /// Metrics error
    #[error("Metrics error: {0}")]
    MetricsError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Workflow error, passed through unchanged
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl DaemonError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            DaemonError::AuthError(_) => StatusCode::UNAUTHORIZED,
            DaemonError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DaemonError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            DaemonError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            DaemonError::ConfigError(_)
            | DaemonError::ServerError(_)
            | DaemonError::MetricsError(_)
            | DaemonError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DaemonError::Workflow(e) => match e.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::InvalidTransition => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Timeout | ErrorKind::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
                ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            DaemonError::AuthError(_) => ErrorKind::Unauthenticated.as_str(),
            DaemonError::InvalidRequest(_) => ErrorKind::BadRequest.as_str(),
            DaemonError::RouteNotFound(_) => ErrorKind::NotFound.as_str(),
            DaemonError::MethodNotAllowed(_) => "method_not_allowed",
            DaemonError::ConfigError(_)
            | DaemonError::ServerError(_)
            | DaemonError::MetricsError(_)
            | DaemonError::IoError(_) => ErrorKind::Internal.as_str(),
            DaemonError::Workflow(e) => e.kind().as_str(),
        }
    }

    /// Convert to the JSON error body sent to clients
    pub fn to_http_error(&self) -> serde_json::Value {
        json!({
            "error": self.kind(),
            "message": self.to_string(),
        })
    }
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::InvalidRequest(format!("Invalid JSON: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcflow_core::{Action, Stage};
    use std::time::Duration;

    #[test]
    fn test_workflow_errors_map_to_status() {
        let cases = vec![
            (WorkflowError::NotFound("drawing 1".into()), 404, "not_found"),
            (WorkflowError::Forbidden("nope".into()), 403, "forbidden"),
            (
                WorkflowError::InvalidTransition {
                    stage: Stage::Approved,
                    action: Action::Submit,
                },
                422,
                "invalid_transition",
            ),
            (WorkflowError::Conflict("held".into()), 409, "conflict"),
            (
                WorkflowError::Timeout(Duration::from_secs(5), 1),
                503,
                "timeout",
            ),
            (WorkflowError::ShuttingDown, 503, "shutting_down"),
            (WorkflowError::BadRequest("title".into()), 400, "bad_request"),
        ];

        for (err, status, kind) in cases {
            let err = DaemonError::from(err);
            assert_eq!(err.status_code().as_u16(), status);
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn test_http_error_body() {
        let err = DaemonError::AuthError("missing token".to_string());
        let body = err.to_http_error();
        assert_eq!(body["error"], "unauthenticated");
        assert_eq!(body["message"], "Authentication error: missing token");
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_conflict_and_forbidden_are_distinct() {
        let conflict = DaemonError::from(WorkflowError::Conflict("x".into()));
        let forbidden = DaemonError::from(WorkflowError::Forbidden("x".into()));
        assert_ne!(conflict.kind(), forbidden.kind());
        assert_ne!(conflict.status_code(), forbidden.status_code());
    }
}
