/// Request and response bodies for the HTTP API
use chrono::{DateTime, Utc};
use qcflow_core::{ActorId, DrawingId, DrawingView, ProjectId, WorkflowLogEntry};
use serde::{Deserialize, Serialize};

/// Issued credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub actor_id: ActorId,
}

/// Optional body of a workflow command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Fail with a conflict unless the drawing is still at this version
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Body of `POST /drawings`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDrawingRequest {
    pub project_id: ProjectId,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Response of `GET /drawings`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawingListResponse {
    pub project_id: ProjectId,
    pub count: usize,
    pub drawings: Vec<DrawingView>,
}

/// Response of `GET /drawings/{id}/history`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub drawing_id: DrawingId,
    pub entries: Vec<WorkflowLogEntry>,
}

/// Response of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub timestamp: DateTime<Utc>,
}
