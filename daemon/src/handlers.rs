/// HTTP API handlers
use crate::auth::{AuthContext, AuthManager};
use crate::errors::{DaemonError, DaemonResult};
use crate::events::{EventHub, Subscription};
use crate::metrics::MetricsCollector;
use crate::types::*;
use chrono::Utc;
use dashmap::DashMap;
use qcflow_core::{
    Action, Actor, ActorId, AssignmentArbiter, Capability, Drawing, DrawingId, DrawingStore,
    NewDrawing, ProjectId, WorkflowError,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// API handlers
pub struct ApiHandlers {
    arbiter: Arc<AssignmentArbiter>,
    store: Arc<dyn DrawingStore>,
    hub: Arc<EventHub>,
    auth: Arc<AuthManager>,
    metrics: Arc<MetricsCollector>,
    /// Actors already recorded in the store, as last seen
    known_actors: DashMap<ActorId, Actor>,
}

impl ApiHandlers {
    pub fn new(
        arbiter: Arc<AssignmentArbiter>,
        hub: Arc<EventHub>,
        auth: Arc<AuthManager>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let store = arbiter.engine().store().clone();
        ApiHandlers {
            arbiter,
            store,
            hub,
            auth,
            metrics,
            known_actors: DashMap::new(),
        }
    }

    /// Verify a credential and record the actor on first sight
    pub async fn authenticate(&self, token: Option<&str>) -> DaemonResult<AuthContext> {
        let ctx = self.auth.authenticate(token)?;

        let known = self
            .known_actors
            .get(&ctx.actor.id)
            .map(|seen| *seen == ctx.actor)
            .unwrap_or(false);
        if !known {
            self.store
                .upsert_actor(&ctx.actor)
                .await
                .map_err(WorkflowError::from)?;
            self.known_actors.insert(ctx.actor.id, ctx.actor.clone());
            debug!(actor_id = ctx.actor.id, role = %ctx.actor.role, "Recorded actor");
        }

        Ok(ctx)
    }

    /// Handle `GET /drawings?project_id=P`
    pub async fn list_drawings(
        &self,
        ctx: &AuthContext,
        project_id: ProjectId,
    ) -> DaemonResult<DrawingListResponse> {
        ctx.require(Capability::View)?;
        ctx.require_project(project_id)?;

        let drawings = self
            .store
            .list_by_project(project_id)
            .await
            .map_err(WorkflowError::from)?;

        Ok(DrawingListResponse {
            project_id,
            count: drawings.len(),
            drawings,
        })
    }

    /// Handle `POST /drawings`
    pub async fn create_drawing(
        &self,
        ctx: &AuthContext,
        request: CreateDrawingRequest,
    ) -> DaemonResult<Drawing> {
        ctx.require_project(request.project_id)?;

        let drawing = self
            .arbiter
            .create_drawing(
                NewDrawing {
                    project_id: request.project_id,
                    title: request.title,
                    description: request.description,
                    author_id: None,
                },
                &ctx.actor,
            )
            .await?;
        Ok(drawing)
    }

    /// Handle `POST /drawings/{id}/{action}`
    pub async fn run_command(
        &self,
        ctx: &AuthContext,
        drawing_id: DrawingId,
        action: Action,
        request: CommandRequest,
    ) -> DaemonResult<Drawing> {
        let started = Instant::now();
        let result = self
            .scoped_command(ctx, drawing_id, action, request.expected_version)
            .await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        self.metrics
            .record_transition(action.as_str(), outcome, started.elapsed().as_secs_f64());

        if let Err(DaemonError::Workflow(WorkflowError::Store(e))) = &result {
            warn!(drawing_id, action = %action, error = %e, "Store failure during command");
        }
        result
    }

    async fn scoped_command(
        &self,
        ctx: &AuthContext,
        drawing_id: DrawingId,
        action: Action,
        expected_version: Option<i64>,
    ) -> DaemonResult<Drawing> {
        let current = self
            .store
            .get_drawing(drawing_id)
            .await
            .map_err(WorkflowError::from)?
            .ok_or_else(|| WorkflowError::NotFound(format!("drawing {}", drawing_id)))?;
        ctx.require_project(current.project_id)?;

        Ok(self
            .arbiter
            .execute_expecting(drawing_id, action, &ctx.actor, expected_version)
            .await?)
    }

    /// Handle `GET /drawings/{id}/history`
    pub async fn history(
        &self,
        ctx: &AuthContext,
        drawing_id: DrawingId,
    ) -> DaemonResult<HistoryResponse> {
        ctx.require(Capability::View)?;
        let drawing = self
            .store
            .get_drawing(drawing_id)
            .await
            .map_err(WorkflowError::from)?
            .ok_or_else(|| WorkflowError::NotFound(format!("drawing {}", drawing_id)))?;
        ctx.require_project(drawing.project_id)?;

        let entries = self
            .store
            .history(drawing_id)
            .await
            .map_err(WorkflowError::from)?;
        Ok(HistoryResponse {
            drawing_id,
            entries,
        })
    }

    /// Handle `GET /events?project_id=P`: register the subscription
    pub fn open_event_stream(
        &self,
        ctx: &AuthContext,
        project_id: ProjectId,
    ) -> DaemonResult<Subscription> {
        ctx.require(Capability::View)?;
        ctx.require_project(project_id)?;
        self.hub.subscribe(project_id, ctx.actor.id)
    }

    /// Handle `GET /health`
    pub fn health(&self) -> HealthResponse {
        let status = if self.arbiter.is_accepting() {
            "ok"
        } else {
            "shutting_down"
        };
        HealthResponse {
            status: status.to_string(),
            version: crate::VERSION.to_string(),
            uptime_secs: self.metrics.uptime_secs(),
            timestamp: Utc::now(),
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn arbiter(&self) -> &Arc<AssignmentArbiter> {
        &self.arbiter
    }
}
