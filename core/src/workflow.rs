//! Stage transition rules and the engine that commits them.
//!
//! The state machine is declared as data: [`TRANSITIONS`] lists every legal
//! `(stage, action)` edge and [`STAGE_WORKERS`] lists which roles may hold a
//! drawing at each stage. [`plan`] evaluates a command against a snapshot
//! without side effects; [`WorkflowEngine::apply`] commits the planned
//! drawing through the store's conditional update.

use crate::errors::{WorkflowError, WorkflowResult};
use crate::model::{Action, Actor, Drawing, DrawingId, Role, Stage, WorkflowLogEntry};
use crate::store::DrawingStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// What an edge does to the holder and revision besides moving the stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Caller becomes the holder
    Assign,
    /// Holder hands the drawing to the next stage
    Advance,
    /// Holder sends the drawing back for rework; revision + 1
    Rework,
    /// Holder returns the drawing to the pool at its current stage
    Unassign,
}

/// A legal edge of the stage state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: Stage,
    pub action: Action,
    pub to: Stage,
    pub effect: Effect,
}

const fn rule(from: Stage, action: Action, to: Stage, effect: Effect) -> Edge {
    Edge {
        from,
        action,
        to,
        effect,
    }
}

/// Every legal transition. `approved` has no outgoing edges.
pub const TRANSITIONS: &[Edge] = &[
    rule(Stage::Unassigned, Action::Claim, Stage::Unassigned, Effect::Assign),
    rule(Stage::FirstQc, Action::Claim, Stage::FirstQc, Effect::Assign),
    rule(Stage::FinalQc, Action::Claim, Stage::FinalQc, Effect::Assign),
    rule(Stage::Unassigned, Action::Submit, Stage::FirstQc, Effect::Advance),
    rule(Stage::FirstQc, Action::Submit, Stage::FinalQc, Effect::Advance),
    rule(Stage::FinalQc, Action::Submit, Stage::Approved, Effect::Advance),
    rule(Stage::FirstQc, Action::Reject, Stage::Unassigned, Effect::Rework),
    rule(Stage::FinalQc, Action::Reject, Stage::Unassigned, Effect::Rework),
    rule(Stage::Unassigned, Action::Release, Stage::Unassigned, Effect::Unassign),
    rule(Stage::FirstQc, Action::Release, Stage::FirstQc, Effect::Unassign),
    rule(Stage::FinalQc, Action::Release, Stage::FinalQc, Effect::Unassign),
];

/// Roles that may hold a drawing at each stage. Admins may hold any stage.
pub const STAGE_WORKERS: &[(Stage, &[Role])] = &[
    (Stage::Unassigned, &[Role::Drafter]),
    (Stage::FirstQc, &[Role::ShiftLead]),
    (Stage::FinalQc, &[Role::FinalQc]),
];

/// Look up the edge for a command issued at a stage
pub fn find_edge(from: Stage, action: Action) -> Option<&'static Edge> {
    TRANSITIONS
        .iter()
        .find(|edge| edge.from == from && edge.action == action)
}

/// Check whether a role may hold a drawing at the given stage
pub fn may_work(role: Role, stage: Stage) -> bool {
    if role == Role::Admin {
        return find_edge(stage, Action::Claim).is_some();
    }
    STAGE_WORKERS
        .iter()
        .find(|(s, _)| *s == stage)
        .map(|(_, roles)| roles.contains(&role))
        .unwrap_or(false)
}

/// A QC stage is one a holder may reject from
pub fn is_qc_stage(stage: Stage) -> bool {
    find_edge(stage, Action::Reject).is_some()
}

/// Evaluate a command against a snapshot and return the drawing it would commit.
///
/// Pure: the snapshot is not modified and nothing is persisted.
pub fn plan(
    snapshot: &Drawing,
    action: Action,
    actor: &Actor,
    now: DateTime<Utc>,
) -> WorkflowResult<Drawing> {
    let edge = find_edge(snapshot.current_stage, action).ok_or(
        WorkflowError::InvalidTransition {
            stage: snapshot.current_stage,
            action,
        },
    )?;

    if !actor.role.can(action.capability()) {
        return Err(WorkflowError::Forbidden(format!(
            "role {} may not {} drawings",
            actor.role, action
        )));
    }

    let mut next = snapshot.clone();
    match edge.effect {
        Effect::Assign => {
            if let Some(holder) = snapshot.assignee_id {
                return Err(WorkflowError::Conflict(format!(
                    "drawing {} is already claimed by actor {}",
                    snapshot.id, holder
                )));
            }
            if !may_work(actor.role, snapshot.current_stage) {
                return Err(WorkflowError::Forbidden(format!(
                    "role {} may not work stage {}",
                    actor.role, snapshot.current_stage
                )));
            }
            next.assignee_id = Some(actor.id);
        }
        Effect::Advance | Effect::Rework | Effect::Unassign => {
            if !snapshot.is_held_by(actor.id) {
                return Err(WorkflowError::Forbidden(format!(
                    "drawing {} is not assigned to actor {}",
                    snapshot.id, actor.id
                )));
            }
            next.assignee_id = None;
            if edge.effect == Effect::Rework {
                next.revision += 1;
            }
        }
    }

    next.current_stage = edge.to;
    next.version = snapshot.version + 1;
    next.updated_at = now;
    Ok(next)
}

/// Result of a committed transition
#[derive(Debug, Clone)]
pub struct CommittedTransition {
    pub action: Action,
    pub drawing: Drawing,
    pub log: WorkflowLogEntry,
}

/// Workflow engine: validates transitions and commits them with a conditional update
#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn DrawingStore>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn DrawingStore>) -> Self {
        WorkflowEngine { store }
    }

    /// Get the underlying store
    pub fn store(&self) -> &Arc<dyn DrawingStore> {
        &self.store
    }

    /// Load the current committed state of a drawing
    pub async fn load(&self, drawing_id: DrawingId) -> WorkflowResult<Drawing> {
        self.store
            .get_drawing(drawing_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("drawing {}", drawing_id)))
    }

    /// Apply a command to a snapshot and commit it only if the record is
    /// still at the snapshot's version.
    ///
    /// Never retries: a stale snapshot yields `Conflict` and the caller decides.
    pub async fn apply(
        &self,
        snapshot: &Drawing,
        action: Action,
        actor: &Actor,
    ) -> WorkflowResult<CommittedTransition> {
        let next = plan(snapshot, action, actor, Utc::now())?;
        let log = WorkflowLogEntry {
            id: Uuid::new_v4(),
            drawing_id: snapshot.id,
            actor_id: actor.id,
            action,
            from_stage: snapshot.current_stage,
            to_stage: next.current_stage,
            from_version: snapshot.version,
            to_version: next.version,
            timestamp: next.updated_at,
        };

        self.store
            .compare_and_swap(snapshot.version, &next, &log)
            .await?;

        debug!(
            drawing_id = next.id,
            actor_id = actor.id,
            action = %action,
            from = %snapshot.current_stage,
            to = %next.current_stage,
            version = next.version,
            "Transition committed"
        );

        Ok(CommittedTransition {
            action,
            drawing: next,
            log,
        })
    }
}
