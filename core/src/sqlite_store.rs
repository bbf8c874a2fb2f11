/// SQLite-backed implementation of the DrawingStore trait
/// Conditional updates run inside a transaction together with the workflow log insert
use crate::errors::{StoreError, StoreResult};
use crate::model::{
    Actor, ActorId, Drawing, DrawingId, DrawingView, NewDrawing, ProjectId, Role, Stage,
    WorkflowLogEntry,
};
use crate::store::DrawingStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// SQLite-backed drawing store
pub struct SqliteDrawingStore {
    /// Connection pool to SQLite database
    pool: SqlitePool,

    /// Path to the SQLite database file
    db_path: PathBuf,
}

fn db_err(context: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::DatabaseError(format!("{}: {}", context, e))
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::SerializationError(format!("Invalid timestamp '{}': {}", raw, e)))
}

fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> StoreResult<T> {
    raw.parse::<T>().map_err(StoreError::SerializationError)
}

impl SqliteDrawingStore {
    /// Open (or create) the database at `db_path`
    pub async fn new<P: AsRef<Path>>(db_path: P, max_connections: u32) -> StoreResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let connect_options = SqliteConnectOptions::from_str(db_path.to_string_lossy().as_ref())
            .map_err(db_err("Failed to parse database path"))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(connect_options)
            .await
            .map_err(db_err("Failed to create database pool"))?;

        Ok(SqliteDrawingStore { pool, db_path })
    }

    /// Path of the backing database file
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Apply all pending migrations
    pub async fn initialize(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS migrations (
                version INTEGER PRIMARY KEY NOT NULL,
                name TEXT NOT NULL UNIQUE,
                applied_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            StoreError::MigrationError(format!("Failed to create migrations table: {}", e))
        })?;

        let max_version: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM migrations")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    StoreError::MigrationError(format!("Failed to query migration version: {}", e))
                })?;

        let migrations: Vec<(i64, &str, Vec<&str>)> = vec![
            (
                1,
                "create_actors",
                vec![
                    r#"CREATE TABLE IF NOT EXISTS actors (
                        id INTEGER PRIMARY KEY NOT NULL,
                        username TEXT NOT NULL,
                        role TEXT NOT NULL,
                        updated_at TEXT NOT NULL
                    )"#,
                ],
            ),
            (
                2,
                "create_drawings",
                vec![
                    r#"CREATE TABLE IF NOT EXISTS drawings (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        project_id INTEGER NOT NULL,
                        title TEXT NOT NULL,
                        description TEXT NOT NULL DEFAULT '',
                        author_id INTEGER,
                        current_stage TEXT NOT NULL DEFAULT 'unassigned',
                        assignee_id INTEGER,
                        revision INTEGER NOT NULL DEFAULT 1,
                        version INTEGER NOT NULL DEFAULT 1,
                        created_at TEXT NOT NULL,
                        updated_at TEXT NOT NULL,
                        UNIQUE (project_id, title)
                    )"#,
                    r#"CREATE INDEX IF NOT EXISTS idx_drawings_project ON drawings(project_id)"#,
                    r#"CREATE INDEX IF NOT EXISTS idx_drawings_assignee ON drawings(assignee_id)"#,
                ],
            ),
            (
                3,
                "create_workflow_log",
                vec![
                    r#"CREATE TABLE IF NOT EXISTS workflow_log (
                        id TEXT PRIMARY KEY NOT NULL,
                        drawing_id INTEGER NOT NULL,
                        actor_id INTEGER NOT NULL,
                        action TEXT NOT NULL,
                        from_stage TEXT NOT NULL,
                        to_stage TEXT NOT NULL,
                        from_version INTEGER NOT NULL,
                        to_version INTEGER NOT NULL,
                        timestamp TEXT NOT NULL,
                        FOREIGN KEY (drawing_id) REFERENCES drawings(id) ON DELETE CASCADE
                    )"#,
                    r#"CREATE INDEX IF NOT EXISTS idx_workflow_log_drawing ON workflow_log(drawing_id, to_version)"#,
                ],
            ),
        ];

        for (version, name, statements) in migrations {
            if version <= max_version {
                continue;
            }
            let mut tx = self.pool.begin().await.map_err(|e| {
                StoreError::MigrationError(format!("Failed to begin migration {}: {}", name, e))
            })?;
            for statement in statements {
                sqlx::query(statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        StoreError::MigrationError(format!(
                            "Failed to apply migration {}: {}",
                            name, e
                        ))
                    })?;
            }
            sqlx::query("INSERT INTO migrations (version, name, applied_at) VALUES (?, ?, ?)")
                .bind(version)
                .bind(name)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    StoreError::MigrationError(format!("Failed to record migration {}: {}", name, e))
                })?;
            tx.commit().await.map_err(|e| {
                StoreError::MigrationError(format!("Failed to commit migration {}: {}", name, e))
            })?;
            info!(version, name, "Applied migration");
        }

        Ok(())
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Helper struct for drawing row mapping
#[derive(FromRow)]
struct DrawingRow {
    id: i64,
    project_id: i64,
    title: String,
    description: String,
    author_id: Option<i64>,
    current_stage: String,
    assignee_id: Option<i64>,
    revision: i64,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl DrawingRow {
    fn into_drawing(self) -> StoreResult<Drawing> {
        Ok(Drawing {
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            description: self.description,
            author_id: self.author_id,
            current_stage: parse_enum::<Stage>(&self.current_stage)?,
            assignee_id: self.assignee_id,
            revision: self.revision,
            version: self.version,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

/// Drawing row joined with its assignee
#[derive(FromRow)]
struct DrawingViewRow {
    #[sqlx(flatten)]
    drawing: DrawingRow,
    assignee_username: Option<String>,
    assignee_role: Option<String>,
}

#[derive(FromRow)]
struct ActorRow {
    id: i64,
    username: String,
    role: String,
}

impl ActorRow {
    fn into_actor(self) -> StoreResult<Actor> {
        Ok(Actor {
            id: self.id,
            username: self.username,
            role: parse_enum::<Role>(&self.role)?,
        })
    }
}

#[derive(FromRow)]
struct LogRow {
    id: String,
    drawing_id: i64,
    actor_id: i64,
    action: String,
    from_stage: String,
    to_stage: String,
    from_version: i64,
    to_version: i64,
    timestamp: String,
}

impl LogRow {
    fn into_entry(self) -> StoreResult<WorkflowLogEntry> {
        Ok(WorkflowLogEntry {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| StoreError::SerializationError(format!("Invalid log ID: {}", e)))?,
            drawing_id: self.drawing_id,
            actor_id: self.actor_id,
            action: parse_enum(&self.action)?,
            from_stage: parse_enum(&self.from_stage)?,
            to_stage: parse_enum(&self.to_stage)?,
            from_version: self.from_version,
            to_version: self.to_version,
            timestamp: parse_timestamp(&self.timestamp)?,
        })
    }
}

const DRAWING_COLUMNS: &str = "d.id, d.project_id, d.title, d.description, d.author_id, \
     d.current_stage, d.assignee_id, d.revision, d.version, d.created_at, d.updated_at";

#[async_trait]
impl DrawingStore for SqliteDrawingStore {
    async fn insert_drawing(&self, new: NewDrawing) -> StoreResult<Drawing> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO drawings (project_id, title, description, author_id, current_stage,
                                  assignee_id, revision, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, NULL, 1, 1, ?, ?)
            "#,
        )
        .bind(new.project_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.author_id)
        .bind(Stage::Unassigned.as_str())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(result) => result,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(StoreError::Duplicate(format!(
                    "drawing titled '{}' already exists in project {}",
                    new.title, new.project_id
                )));
            }
            Err(e) => return Err(db_err("Failed to insert drawing")(e)),
        };

        Ok(Drawing {
            id: result.last_insert_rowid(),
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
        })
    }

    async fn get_drawing(&self, id: DrawingId) -> StoreResult<Option<Drawing>> {
        let row = sqlx::query_as::<_, DrawingRow>(&format!(
            "SELECT {} FROM drawings d WHERE d.id = ?",
            DRAWING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to fetch drawing"))?;

        row.map(DrawingRow::into_drawing).transpose()
    }

    async fn list_by_project(&self, project_id: ProjectId) -> StoreResult<Vec<DrawingView>> {
        let rows = sqlx::query_as::<_, DrawingViewRow>(&format!(
            "SELECT {}, a.username AS assignee_username, a.role AS assignee_role \
             FROM drawings d LEFT JOIN actors a ON a.id = d.assignee_id \
             WHERE d.project_id = ? ORDER BY d.id",
            DRAWING_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list drawings"))?;

        rows.into_iter()
            .map(|row| {
                let assignee = match (row.drawing.assignee_id, row.assignee_username, row.assignee_role)
                {
                    (Some(id), Some(username), Some(role)) => Some(Actor {
                        id,
                        username,
                        role: parse_enum(&role)?,
                    }),
                    _ => None,
                };
                Ok(DrawingView {
                    drawing: row.drawing.into_drawing()?,
                    assignee,
                })
            })
            .collect()
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &Drawing,
        entry: &WorkflowLogEntry,
    ) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin transaction"))?;

        let updated = sqlx::query(
            r#"
            UPDATE drawings
            SET current_stage = ?, assignee_id = ?, revision = ?, version = ?, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(next.current_stage.as_str())
        .bind(next.assignee_id)
        .bind(next.revision)
        .bind(next.version)
        .bind(next.updated_at.to_rfc3339())
        .bind(next.id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to update drawing"))?;

        if updated.rows_affected() == 0 {
            let exists: Option<i64> = sqlx::query_scalar("SELECT version FROM drawings WHERE id = ?")
                .bind(next.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err("Failed to check drawing"))?;
            tx.rollback()
                .await
                .map_err(db_err("Failed to roll back transaction"))?;
            return Err(match exists {
                None => StoreError::NotFound(format!("drawing {}", next.id)),
                Some(_) => StoreError::VersionMismatch {
                    drawing_id: next.id,
                    expected: expected_version,
                },
            });
        }

        sqlx::query(
            r#"
            INSERT INTO workflow_log (id, drawing_id, actor_id, action, from_stage, to_stage,
                                      from_version, to_version, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.drawing_id)
        .bind(entry.actor_id)
        .bind(entry.action.as_str())
        .bind(entry.from_stage.as_str())
        .bind(entry.to_stage.as_str())
        .bind(entry.from_version)
        .bind(entry.to_version)
        .bind(entry.timestamp.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to append workflow log"))?;

        tx.commit()
            .await
            .map_err(db_err("Failed to commit transaction"))
    }

    async fn history(&self, id: DrawingId) -> StoreResult<Vec<WorkflowLogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            "SELECT id, drawing_id, actor_id, action, from_stage, to_stage, from_version, \
             to_version, timestamp FROM workflow_log WHERE drawing_id = ? ORDER BY to_version",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to fetch workflow log"))?;

        rows.into_iter().map(LogRow::into_entry).collect()
    }

    async fn upsert_actor(&self, actor: &Actor) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO actors (id, username, role, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET username = excluded.username,
                                          role = excluded.role,
                                          updated_at = excluded.updated_at
            "#,
        )
        .bind(actor.id)
        .bind(&actor.username)
        .bind(actor.role.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to upsert actor"))?;
        Ok(())
    }

    async fn get_actor(&self, id: ActorId) -> StoreResult<Option<Actor>> {
        let row = sqlx::query_as::<_, ActorRow>("SELECT id, username, role FROM actors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to fetch actor"))?;

        row.map(ActorRow::into_actor).transpose()
    }
}
