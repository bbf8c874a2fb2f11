//! qcflow core: the drawing review workflow.
//!
//! This crate owns the stage state machine, the per-drawing assignment
//! arbiter, and the storage seam the workflow commits through:
//! - `model`: drawings, stages, roles and actions
//! - `workflow`: table-driven transition rules and the engine that commits them
//! - `arbiter`: per-drawing serialization of mutating commands
//! - `store` / `sqlite_store`: the document record store contract and backends
//! - `notify`: the post-commit change notification seam
pub mod arbiter;
pub mod errors;
pub mod model;
pub mod notify;
pub mod sqlite_store;
pub mod store;
pub mod workflow;

pub use arbiter::{ArbiterConfig, AssignmentArbiter};
pub use errors::{ErrorKind, StoreError, StoreResult, WorkflowError, WorkflowResult};
pub use model::{
    Action, Actor, ActorId, Capability, Drawing, DrawingId, DrawingView, NewDrawing, ProjectId,
    Role, Stage, WorkflowLogEntry,
};
pub use notify::{ChangeKind, ChangeNotifier, DrawingChange, NoopNotifier};
pub use sqlite_store::SqliteDrawingStore;
pub use store::{DrawingStore, InMemoryDrawingStore};
pub use workflow::{CommittedTransition, WorkflowEngine};
