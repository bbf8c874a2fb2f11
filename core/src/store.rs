/// Document record store contract and an in-memory implementation
use crate::errors::{StoreError, StoreResult};
use crate::model::{
    Actor, ActorId, Drawing, DrawingId, DrawingView, NewDrawing, ProjectId, Stage,
    WorkflowLogEntry,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Durable storage of drawings, actors and the workflow log.
///
/// `compare_and_swap` is the correctness backstop of the workflow: it must
/// apply the update and append the log entry atomically, and only if the
/// stored record is still at `expected_version`.
#[async_trait]
pub trait DrawingStore: Send + Sync {
    /// Create a drawing in `unassigned` at revision 1, version 1
    async fn insert_drawing(&self, new: NewDrawing) -> StoreResult<Drawing>;

    /// Get a drawing by ID
    async fn get_drawing(&self, id: DrawingId) -> StoreResult<Option<Drawing>>;

    /// List all drawings of a project with their assignee resolved
    async fn list_by_project(&self, project_id: ProjectId) -> StoreResult<Vec<DrawingView>>;

    /// Conditionally replace the mutable fields of a drawing.
    ///
    /// Fails with `VersionMismatch` if the stored version differs from
    /// `expected_version`, and with `NotFound` if the drawing does not exist.
    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &Drawing,
        entry: &WorkflowLogEntry,
    ) -> StoreResult<()>;

    /// Workflow log of a drawing, oldest first
    async fn history(&self, id: DrawingId) -> StoreResult<Vec<WorkflowLogEntry>>;

    /// Record or refresh an actor
    async fn upsert_actor(&self, actor: &Actor) -> StoreResult<()>;

    /// Get an actor by ID
    async fn get_actor(&self, id: ActorId) -> StoreResult<Option<Actor>>;
}

#[derive(Default)]
struct MemoryState {
    next_id: DrawingId,
    drawings: BTreeMap<DrawingId, Drawing>,
    actors: HashMap<ActorId, Actor>,
    log: Vec<WorkflowLogEntry>,
}

/// In-memory store for tests and embedded use
#[derive(Default)]
pub struct InMemoryDrawingStore {
    state: RwLock<MemoryState>,
}

impl InMemoryDrawingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DrawingStore for InMemoryDrawingStore {
    async fn insert_drawing(&self, new: NewDrawing) -> StoreResult<Drawing> {
        let mut state = self.state.write();

        let duplicate = state
            .drawings
            .values()
            .any(|d| d.project_id == new.project_id && d.title == new.title);
        if duplicate {
            return Err(StoreError::Duplicate(format!(
                "drawing titled '{}' already exists in project {}",
                new.title, new.project_id
            )));
        }

        state.next_id += 1;
        let now = Utc::now();
        let drawing = Drawing {
            id: state.next_id,
            project_id: new.project_id,
            title: new.title,
            description: new.description,
            author_id: new.author_id,
            current_stage: Stage::Unassigned,
            assignee_id: None,
            revision: 1,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        state.drawings.insert(drawing.id, drawing.clone());
        Ok(drawing)
    }

    async fn get_drawing(&self, id: DrawingId) -> StoreResult<Option<Drawing>> {
        Ok(self.state.read().drawings.get(&id).cloned())
    }

    async fn list_by_project(&self, project_id: ProjectId) -> StoreResult<Vec<DrawingView>> {
        let state = self.state.read();
        Ok(state
            .drawings
            .values()
            .filter(|d| d.project_id == project_id)
            .map(|d| DrawingView {
                drawing: d.clone(),
                assignee: d.assignee_id.and_then(|id| state.actors.get(&id).cloned()),
            })
            .collect())
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &Drawing,
        entry: &WorkflowLogEntry,
    ) -> StoreResult<()> {
        let mut state = self.state.write();

        let stored = state
            .drawings
            .get_mut(&next.id)
            .ok_or_else(|| StoreError::NotFound(format!("drawing {}", next.id)))?;

        if stored.version != expected_version {
            return Err(StoreError::VersionMismatch {
                drawing_id: next.id,
                expected: expected_version,
            });
        }

        stored.current_stage = next.current_stage;
        stored.assignee_id = next.assignee_id;
        stored.revision = next.revision;
        stored.version = next.version;
        stored.updated_at = next.updated_at;
        state.log.push(entry.clone());
        Ok(())
    }

    async fn history(&self, id: DrawingId) -> StoreResult<Vec<WorkflowLogEntry>> {
        Ok(self
            .state
            .read()
            .log
            .iter()
            .filter(|entry| entry.drawing_id == id)
            .cloned()
            .collect())
    }

    async fn upsert_actor(&self, actor: &Actor) -> StoreResult<()> {
        self.state.write().actors.insert(actor.id, actor.clone());
        Ok(())
    }

    async fn get_actor(&self, id: ActorId) -> StoreResult<Option<Actor>> {
        Ok(self.state.read().actors.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Role};
    use uuid::Uuid;

    fn new_drawing(project_id: ProjectId, title: &str) -> NewDrawing {
        NewDrawing {
            project_id,
            title: title.to_string(),
            description: "rev A".to_string(),
            author_id: Some(1),
        }
    }

    fn log_for(drawing: &Drawing, from_version: i64) -> WorkflowLogEntry {
        WorkflowLogEntry {
            id: Uuid::new_v4(),
            drawing_id: drawing.id,
            actor_id: 1,
            action: Action::Claim,
            from_stage: Stage::Unassigned,
            to_stage: drawing.current_stage,
            from_version,
            to_version: drawing.version,
            timestamp: drawing.updated_at,
        }
    }

    #[tokio::test]
    async fn test_insert_starts_at_version_one() {
        let store = InMemoryDrawingStore::new();
        let drawing = store.insert_drawing(new_drawing(1, "Valve body")).await.unwrap();

        assert_eq!(drawing.current_stage, Stage::Unassigned);
        assert_eq!(drawing.version, 1);
        assert_eq!(drawing.revision, 1);
        assert!(drawing.assignee_id.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_title_in_project_rejected() {
        let store = InMemoryDrawingStore::new();
        store.insert_drawing(new_drawing(1, "Valve body")).await.unwrap();

        let err = store
            .insert_drawing(new_drawing(1, "Valve body"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));

        // Same title in another project is fine
        assert!(store.insert_drawing(new_drawing(2, "Valve body")).await.is_ok());
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_version() {
        let store = InMemoryDrawingStore::new();
        let drawing = store.insert_drawing(new_drawing(1, "Flange")).await.unwrap();

        let mut next = drawing.clone();
        next.assignee_id = Some(1);
        next.version = 2;
        store
            .compare_and_swap(1, &next, &log_for(&next, 1))
            .await
            .unwrap();

        let mut stale = drawing.clone();
        stale.assignee_id = Some(2);
        stale.version = 2;
        let err = store
            .compare_and_swap(1, &stale, &log_for(&stale, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { expected: 1, .. }));

        let stored = store.get_drawing(drawing.id).await.unwrap().unwrap();
        assert_eq!(stored.assignee_id, Some(1));
        assert_eq!(store.history(drawing.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_resolves_assignee() {
        let store = InMemoryDrawingStore::new();
        store
            .upsert_actor(&Actor::new(1, "alice", Role::Drafter))
            .await
            .unwrap();
        let drawing = store.insert_drawing(new_drawing(1, "Shaft")).await.unwrap();
        store.insert_drawing(new_drawing(2, "Other")).await.unwrap();

        let mut next = drawing.clone();
        next.assignee_id = Some(1);
        next.version = 2;
        store
            .compare_and_swap(1, &next, &log_for(&next, 1))
            .await
            .unwrap();

        let views = store.list_by_project(1).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].assignee.as_ref().map(|a| a.username.as_str()), Some("alice"));
    }
}
