//! Per-drawing serialization of workflow mutations.
//!
//! Every mutation of a drawing acquires that drawing's slot, a FIFO async
//! mutex, so operations on one drawing are applied in arrival order while
//! different drawings proceed in parallel. The slot only orders work inside
//! this process; the store's conditional update stays the final arbiter.

use crate::errors::{WorkflowError, WorkflowResult};
use crate::model::{Action, Actor, Capability, Drawing, DrawingId, NewDrawing};
use crate::notify::{ChangeKind, ChangeNotifier, DrawingChange};
use crate::workflow::WorkflowEngine;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

/// Shortest accepted drawing title, in characters
pub const TITLE_MIN_CHARS: usize = 3;
/// Longest accepted drawing title, in characters
pub const TITLE_MAX_CHARS: usize = 100;
/// Longest accepted drawing description, in characters
pub const DESCRIPTION_MAX_CHARS: usize = 500;

/// Arbiter tuning
#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    /// How long a mutation may wait for its drawing's slot
    pub slot_timeout: Duration,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        ArbiterConfig {
            slot_timeout: Duration::from_secs(5),
        }
    }
}

/// Serializes mutations per drawing and publishes committed changes.
pub struct AssignmentArbiter {
    engine: WorkflowEngine,
    notifier: Arc<dyn ChangeNotifier>,
    config: ArbiterConfig,
    slots: DashMap<DrawingId, Arc<Mutex<()>>>,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    drained: Notify,
}

/// Counts a mutation as in flight until dropped
struct InFlight<'a> {
    arbiter: &'a AssignmentArbiter,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.arbiter.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.arbiter.drained.notify_waiters();
        }
    }
}

impl AssignmentArbiter {
    pub fn new(
        engine: WorkflowEngine,
        notifier: Arc<dyn ChangeNotifier>,
        config: ArbiterConfig,
    ) -> Self {
        AssignmentArbiter {
            engine,
            notifier,
            config,
            slots: DashMap::new(),
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    /// Get the workflow engine
    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Apply a command to the latest committed state of a drawing.
    pub async fn execute(
        &self,
        drawing_id: DrawingId,
        action: Action,
        actor: &Actor,
    ) -> WorkflowResult<Drawing> {
        self.execute_expecting(drawing_id, action, actor, None).await
    }

    /// Like [`execute`](Self::execute), but fail with `Conflict` when the
    /// drawing is no longer at `expected_version`.
    pub async fn execute_expecting(
        &self,
        drawing_id: DrawingId,
        action: Action,
        actor: &Actor,
        expected_version: Option<i64>,
    ) -> WorkflowResult<Drawing> {
        let _flight = self.enter()?;

        let slot = self.slot(drawing_id);
        let guard =
            match tokio::time::timeout(self.config.slot_timeout, slot.clone().lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => {
                    drop(slot);
                    self.evict_idle(drawing_id);
                    warn!(drawing_id, action = %action, "Timed out waiting for drawing slot");
                    return Err(WorkflowError::Timeout(self.config.slot_timeout, drawing_id));
                }
            };

        let result = self
            .commit(drawing_id, action, actor, expected_version)
            .await;

        drop(guard);
        drop(slot);
        self.evict_idle(drawing_id);

        match result {
            Ok(drawing) => {
                info!(
                    drawing_id,
                    actor_id = actor.id,
                    action = %action,
                    stage = %drawing.current_stage,
                    version = drawing.version,
                    "Mutation applied"
                );
                self.notifier.drawing_changed(&DrawingChange::new(
                    &drawing,
                    ChangeKind::from(action),
                    Some(actor.id),
                ));
                Ok(drawing)
            }
            Err(e) => {
                debug!(
                    drawing_id,
                    actor_id = actor.id,
                    action = %action,
                    kind = %e.kind(),
                    error = %e,
                    "Mutation rejected"
                );
                Err(e)
            }
        }
    }

    async fn commit(
        &self,
        drawing_id: DrawingId,
        action: Action,
        actor: &Actor,
        expected_version: Option<i64>,
    ) -> WorkflowResult<Drawing> {
        let snapshot = self.engine.load(drawing_id).await?;
        if let Some(expected) = expected_version {
            if expected != snapshot.version {
                return Err(WorkflowError::Conflict(format!(
                    "drawing {} is at version {}, not {}",
                    drawing_id, snapshot.version, expected
                )));
            }
        }
        let committed = self.engine.apply(&snapshot, action, actor).await?;
        Ok(committed.drawing)
    }

    /// Create a drawing at intake. The caller becomes its author.
    pub async fn create_drawing(&self, new: NewDrawing, actor: &Actor) -> WorkflowResult<Drawing> {
        let _flight = self.enter()?;

        if !actor.role.can(Capability::Create) {
            return Err(WorkflowError::Forbidden(format!(
                "role {} may not create drawings",
                actor.role
            )));
        }
        validate_new_drawing(&new)?;

        // Length limits and per-project uniqueness both apply to the trimmed title
        let title = new.title.trim().to_string();
        let drawing = self
            .engine
            .store()
            .insert_drawing(NewDrawing {
                title,
                author_id: Some(actor.id),
                ..new
            })
            .await?;

        info!(
            drawing_id = drawing.id,
            project_id = drawing.project_id,
            actor_id = actor.id,
            "Drawing created"
        );
        self.notifier.drawing_changed(&DrawingChange::new(
            &drawing,
            ChangeKind::Created,
            Some(actor.id),
        ));
        Ok(drawing)
    }

    /// Stop accepting new mutations. In-flight ones run to completion.
    pub fn begin_shutdown(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!(
                in_flight = self.in_flight.load(Ordering::SeqCst),
                "Arbiter stopped accepting mutations"
            );
        }
    }

    /// Wait until no mutation is in flight. Returns false if `limit` elapsed first.
    pub async fn drain(&self, limit: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, wait).await.is_ok()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Number of mutations currently in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of drawings with a live slot
    pub fn active_slots(&self) -> usize {
        self.slots.len()
    }

    fn enter(&self) -> WorkflowResult<InFlight<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let flight = InFlight { arbiter: self };
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(WorkflowError::ShuttingDown);
        }
        Ok(flight)
    }

    fn slot(&self, drawing_id: DrawingId) -> Arc<Mutex<()>> {
        self.slots
            .entry(drawing_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the slot if nobody else holds or waits on it
    fn evict_idle(&self, drawing_id: DrawingId) {
        self.slots
            .remove_if(&drawing_id, |_, slot| Arc::strong_count(slot) == 1);
    }
}

/// Check intake field limits
pub fn validate_new_drawing(new: &NewDrawing) -> WorkflowResult<()> {
    let title_len = new.title.trim().chars().count();
    if !(TITLE_MIN_CHARS..=TITLE_MAX_CHARS).contains(&title_len) {
        return Err(WorkflowError::BadRequest(format!(
            "title must be {} to {} characters",
            TITLE_MIN_CHARS, TITLE_MAX_CHARS
        )));
    }
    if new.description.chars().count() > DESCRIPTION_MAX_CHARS {
        return Err(WorkflowError::BadRequest(format!(
            "description must be at most {} characters",
            DESCRIPTION_MAX_CHARS
        )));
    }
    Ok(())
}
