/// Post-commit change notification seam between the workflow and its observers
use crate::model::{Action, ActorId, Drawing, DrawingId, ProjectId, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a drawing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Claimed,
    Submitted,
    Released,
    Rejected,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "drawing_created",
            ChangeKind::Claimed => "drawing_claimed",
            ChangeKind::Submitted => "drawing_submitted",
            ChangeKind::Released => "drawing_released",
            ChangeKind::Rejected => "drawing_rejected",
        }
    }
}

impl From<Action> for ChangeKind {
    fn from(action: Action) -> Self {
        match action {
            Action::Claim => ChangeKind::Claimed,
            Action::Submit => ChangeKind::Submitted,
            Action::Release => ChangeKind::Released,
            Action::Reject => ChangeKind::Rejected,
        }
    }
}

/// A committed change to a drawing.
///
/// Deliberately coarse: observers treat it as "project changed" and re-fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawingChange {
    pub project_id: ProjectId,
    pub drawing_id: DrawingId,
    pub kind: ChangeKind,
    pub stage: Stage,
    pub version: i64,
    pub actor_id: Option<ActorId>,
    pub timestamp: DateTime<Utc>,
}

impl DrawingChange {
    pub fn new(drawing: &Drawing, kind: ChangeKind, actor_id: Option<ActorId>) -> Self {
        DrawingChange {
            project_id: drawing.project_id,
            drawing_id: drawing.id,
            kind,
            stage: drawing.current_stage,
            version: drawing.version,
            actor_id,
            timestamp: drawing.updated_at,
        }
    }
}

/// Receives committed changes. Implementations must not block.
pub trait ChangeNotifier: Send + Sync {
    fn drawing_changed(&self, change: &DrawingChange);
}

/// Notifier that drops every change
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn drawing_changed(&self, _change: &DrawingChange) {}
}
