use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use super::models::*;
use super::ordering::{self, MovePlan, Shift};
use crate::errors::{BoardError, Entity};

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads. One closure holds the connection
/// for its whole duration, so a multi-step move never interleaves with
/// another request.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| BoardError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Used for startup
    /// initialization and test fixtures, never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, BoardDb>> {
        self.inner
            .lock()
            .map_err(|_| BoardError::LockPoisoned.into())
    }
}

/// Which sortable collection a shift targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderScope {
    /// Tasks inside a project, ordered by `order_in_project`.
    Tasks,
    /// Projects inside a board, ordered by `order_in_board`.
    Projects,
}

impl OrderScope {
    fn table(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Projects => "projects",
        }
    }

    fn container_column(self) -> &'static str {
        match self {
            Self::Tasks => "project_id",
            Self::Projects => "board_id",
        }
    }

    fn order_column(self) -> &'static str {
        match self {
            Self::Tasks => "order_in_project",
            Self::Projects => "order_in_board",
        }
    }
}

// ── Input types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
    pub due_date: Option<String>,
    pub member_ids: Vec<i64>,
    /// Explicit slot; appended at the end when `None`.
    pub order_in_board: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
    pub due_date: Option<Option<String>>,
    pub member_ids: Option<Vec<i64>>,
    pub order_in_board: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub due_date: Option<String>,
    pub assignee_id: Option<i64>,
    /// Explicit slot; appended at the end when `None`.
    pub order_in_project: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub due_date: Option<Option<String>>,
    pub assignee_id: Option<Option<i64>>,
    /// Destination project; a different project implies a cross-container move.
    pub project_id: Option<i64>,
    pub order_in_project: Option<i64>,
}

/// Result of a repair pass over one board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeReport {
    pub projects_renumbered: usize,
    pub tasks_renumbered: usize,
}

pub struct BoardDb {
    conn: Connection,
}

const BOARD_COLUMNS: &str = "id, title, description, owner_id, created_at, updated_at";
const PROJECT_COLUMNS: &str =
    "id, title, description, owner_id, board_id, order_in_board, status, due_date, created_at, updated_at";
const TASK_COLUMNS: &str = "id, title, description, status, due_date, project_id, board_id, assignee_id, creator_id, last_modifier_id, order_in_project, created_at, updated_at";

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS boards (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    description TEXT,
                    owner_id INTEGER NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS board_members (
                    board_id INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    PRIMARY KEY (board_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    board_id INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT,
                    owner_id INTEGER NOT NULL REFERENCES users(id),
                    order_in_board INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'active',
                    due_date TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS project_members (
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    PRIMARY KEY (project_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    board_id INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'todo',
                    due_date TEXT,
                    assignee_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    creator_id INTEGER NOT NULL REFERENCES users(id),
                    last_modifier_id INTEGER NOT NULL REFERENCES users(id),
                    order_in_project INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_projects_board_order ON projects(board_id, order_in_board);
                CREATE INDEX IF NOT EXISTS idx_tasks_project_order ON tasks(project_id, order_in_project);
                CREATE INDEX IF NOT EXISTS idx_tasks_board ON tasks(board_id);
                CREATE INDEX IF NOT EXISTS idx_board_members_user ON board_members(user_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Ordering primitives ───────────────────────────────────────────

    fn count_children(&self, scope: OrderScope, container: i64) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?1",
            scope.table(),
            scope.container_column()
        );
        self.conn
            .query_row(&sql, params![container], |row| row.get(0))
            .with_context(|| format!("Failed to count {} in container {}", scope.table(), container))
    }

    /// Bulk `order += delta` over one container's range, skipping `except`.
    fn apply_shift(
        &self,
        scope: OrderScope,
        container: i64,
        shift: &Shift,
        except: Option<i64>,
    ) -> Result<usize> {
        let order = scope.order_column();
        let sql = format!(
            "UPDATE {table} SET {order} = {order} + ?1
             WHERE {container} = ?2 AND {order} >= ?3 AND {order} <= ?4 AND id != ?5",
            table = scope.table(),
            order = order,
            container = scope.container_column(),
        );
        let changed = self
            .conn
            .execute(
                &sql,
                params![
                    shift.delta,
                    container,
                    shift.from,
                    shift.upper(),
                    except.unwrap_or(-1)
                ],
            )
            .with_context(|| format!("Failed to shift {} in container {}", scope.table(), container))?;
        debug!(
            table = scope.table(),
            container,
            from = shift.from,
            to = ?shift.to,
            delta = shift.delta,
            changed,
            "applied order shift"
        );
        Ok(changed)
    }

    /// Apply the sibling shifts of a move plan. The moved row itself is
    /// updated by the caller.
    fn apply_plan(&self, scope: OrderScope, plan: &MovePlan, moved: i64) -> Result<()> {
        match plan {
            MovePlan::Noop => {}
            MovePlan::Within { container, shift } => {
                self.apply_shift(scope, *container, shift, Some(moved))?;
            }
            MovePlan::Across {
                source,
                source_shift,
                dest,
                dest_shift,
            } => {
                self.apply_shift(scope, *source, source_shift, Some(moved))?;
                self.apply_shift(scope, *dest, dest_shift, Some(moved))?;
            }
        }
        Ok(())
    }

    /// Resolve the slot for a newly inserted item, opening a gap if needed.
    /// Explicit indexes are clamped to `0..=len`.
    fn reserve_slot(&self, scope: OrderScope, container: i64, requested: Option<i64>) -> Result<i64> {
        let len = self.count_children(scope, container)?;
        match requested {
            None => Ok(len),
            Some(index) => {
                let index = index.clamp(0, len);
                if index < len {
                    self.apply_shift(scope, container, &ordering::insertion_shift(index), None)?;
                }
                Ok(index)
            }
        }
    }

    /// Close the gap left by a deleted item. Failure leaves a gap that
    /// readers tolerate, so it is logged rather than propagated.
    fn close_gap(&self, scope: OrderScope, container: i64, old: i64) {
        if let Err(e) = self.apply_shift(scope, container, &ordering::removal_shift(old), None) {
            warn!(
                table = scope.table(),
                container,
                order = old,
                error = %e,
                "reindex after delete failed; container left with a gap"
            );
        }
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn create_user(&self, name: &str, email: &str) -> Result<User> {
        if name.trim().is_empty() || email.trim().is_empty() {
            return Err(BoardError::Validation("name and email are required".into()).into());
        }
        let taken: bool = self
            .conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM users WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .context("Failed to check email")?;
        if taken {
            return Err(BoardError::Validation(format!("email {} already registered", email)).into());
        }
        self.conn
            .execute(
                "INSERT INTO users (name, email) VALUES (?1, ?2)",
                params![name, email],
            )
            .context("Failed to insert user")?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, name, email, created_at FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("Failed to query user")
    }

    fn require_user(&self, id: i64) -> Result<User> {
        self.get_user(id)?
            .ok_or_else(|| BoardError::not_found(Entity::User, id).into())
    }

    // ── Boards ────────────────────────────────────────────────────────

    pub fn create_board(
        &self,
        owner_id: i64,
        title: &str,
        description: Option<&str>,
        member_ids: &[i64],
    ) -> Result<Board> {
        require_title(title)?;
        self.require_user(owner_id)?;
        for member in member_ids {
            self.require_user(*member)?;
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        self.conn
            .execute(
                "INSERT INTO boards (title, description, owner_id) VALUES (?1, ?2, ?3)",
                params![title, description, owner_id],
            )
            .context("Failed to insert board")?;
        let id = self.conn.last_insert_rowid();
        for member in member_ids.iter().filter(|m| **m != owner_id) {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO board_members (board_id, user_id) VALUES (?1, ?2)",
                    params![id, member],
                )
                .context("Failed to insert board member")?;
        }
        tx.commit().context("Failed to commit board creation")?;

        info!(board_id = id, owner_id, "board created");
        self.get_board(id)?.context("Board not found after insert")
    }

    pub fn get_board(&self, id: i64) -> Result<Option<Board>> {
        let sql = format!("SELECT {} FROM boards WHERE id = ?1", BOARD_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .optional()
            .context("Failed to query board")?;
        let Some((id, title, description, owner_id, created_at, updated_at)) = row else {
            return Ok(None);
        };
        let members = self
            .member_ids("board_members", "board_id", id)?
            .into_iter()
            .map(Ref::Id)
            .collect();
        let projects = self
            .ordered_ids(OrderScope::Projects, id)?
            .into_iter()
            .map(Ref::Id)
            .collect();
        Ok(Some(Board {
            id,
            title,
            description,
            owner: Ref::Id(owner_id),
            members,
            projects,
            created_at,
            updated_at,
        }))
    }

    /// Boards the user owns or is a member of.
    pub fn list_boards_for_user(&self, user_id: i64) -> Result<Vec<Board>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id FROM boards
                 WHERE owner_id = ?1 OR id IN (SELECT board_id FROM board_members WHERE user_id = ?1)
                 ORDER BY id",
            )
            .context("Failed to prepare list_boards_for_user")?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get::<_, i64>(0))
            .context("Failed to query boards")?
            .collect::<rusqlite::Result<Vec<i64>>>()
            .context("Failed to read board row")?;
        let mut boards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(board) = self.get_board(id)? {
                boards.push(board);
            }
        }
        Ok(boards)
    }

    /// Load a board and check that `user_id` is its owner or a member.
    pub fn require_board_access(&self, board_id: i64, user_id: i64) -> Result<Board> {
        let board = self
            .get_board(board_id)?
            .ok_or(BoardError::not_found(Entity::Board, board_id))?;
        if !board.can_access(user_id) {
            return Err(BoardError::forbidden(user_id, format!("access board {}", board_id)).into());
        }
        Ok(board)
    }

    fn require_board_owner(&self, board_id: i64, user_id: i64, action: &str) -> Result<Board> {
        let board = self.require_board_access(board_id, user_id)?;
        if !board.is_owner(user_id) {
            return Err(BoardError::forbidden(user_id, format!("{} board {}", action, board_id)).into());
        }
        Ok(board)
    }

    pub fn update_board(
        &self,
        id: i64,
        actor: i64,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<Board> {
        self.require_board_access(id, actor)?;
        if let Some(t) = title {
            require_title(t)?;
        }
        self.conn
            .execute(
                "UPDATE boards SET title = COALESCE(?1, title), description = COALESCE(?2, description),
                 updated_at = datetime('now') WHERE id = ?3",
                params![title, description, id],
            )
            .context("Failed to update board")?;
        self.get_board(id)?.context("Board not found after update")
    }

    pub fn delete_board(&self, id: i64, actor: i64) -> Result<()> {
        self.require_board_owner(id, actor, "delete")?;
        self.conn
            .execute("DELETE FROM boards WHERE id = ?1", params![id])
            .context("Failed to delete board")?;
        info!(board_id = id, actor, "board deleted");
        Ok(())
    }

    pub fn add_board_member(&self, board_id: i64, actor: i64, user_id: i64) -> Result<Board> {
        let board = self.require_board_owner(board_id, actor, "manage members of")?;
        self.require_user(user_id)?;
        if board.is_owner(user_id) {
            return Err(BoardError::Validation("the owner is always a member".into()).into());
        }
        self.conn
            .execute(
                "INSERT OR IGNORE INTO board_members (board_id, user_id) VALUES (?1, ?2)",
                params![board_id, user_id],
            )
            .context("Failed to add board member")?;
        self.get_board(board_id)?
            .context("Board not found after member update")
    }

    pub fn remove_board_member(&self, board_id: i64, actor: i64, user_id: i64) -> Result<Board> {
        self.require_board_owner(board_id, actor, "manage members of")?;
        let removed = self
            .conn
            .execute(
                "DELETE FROM board_members WHERE board_id = ?1 AND user_id = ?2",
                params![board_id, user_id],
            )
            .context("Failed to remove board member")?;
        if removed == 0 {
            return Err(BoardError::not_found(Entity::User, user_id).into());
        }
        self.get_board(board_id)?
            .context("Board not found after member update")
    }

    /// Full board tree with users populated.
    pub fn get_board_view(&self, board_id: i64, actor: i64) -> Result<BoardView> {
        let mut board = self.require_board_access(board_id, actor)?;
        let mut users = HashMap::new();
        board.owner = self.populate(&board.owner, &mut users)?;
        board.members = self.populate_all(&board.members, &mut users)?;

        let mut projects = Vec::new();
        for mut project in self.list_projects(board_id)? {
            project.owner = self.populate(&project.owner, &mut users)?;
            project.members = self.populate_all(&project.members, &mut users)?;
            let mut tasks = self.list_tasks(project.id)?;
            for task in &mut tasks {
                task.creator = self.populate(&task.creator, &mut users)?;
                task.last_modifier = self.populate(&task.last_modifier, &mut users)?;
                if let Some(assignee) = &task.assignee {
                    task.assignee = Some(self.populate(assignee, &mut users)?);
                }
            }
            projects.push(ProjectWithTasks { project, tasks });
        }
        Ok(BoardView { board, projects })
    }

    fn populate(&self, user: &UserRef, cache: &mut HashMap<i64, User>) -> Result<UserRef> {
        let id = user.id();
        if !cache.contains_key(&id) {
            match self.get_user(id)? {
                Some(u) => {
                    cache.insert(id, u);
                }
                None => return Ok(Ref::Id(id)),
            }
        }
        Ok(cache
            .get(&id)
            .cloned()
            .map(Ref::Populated)
            .unwrap_or(Ref::Id(id)))
    }

    fn populate_all(&self, users: &[UserRef], cache: &mut HashMap<i64, User>) -> Result<Vec<UserRef>> {
        users.iter().map(|u| self.populate(u, cache)).collect()
    }

    fn member_ids(&self, table: &str, key: &str, id: i64) -> Result<Vec<i64>> {
        let sql = format!("SELECT user_id FROM {} WHERE {} = ?1 ORDER BY user_id", table, key);
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare member_ids")?;
        let ids = stmt
            .query_map(params![id], |row| row.get::<_, i64>(0))
            .context("Failed to query members")?
            .collect::<rusqlite::Result<Vec<i64>>>()
            .context("Failed to read member row")?;
        Ok(ids)
    }

    fn ordered_ids(&self, scope: OrderScope, container: i64) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT id FROM {} WHERE {} = ?1 ORDER BY {}, id",
            scope.table(),
            scope.container_column(),
            scope.order_column()
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare ordered_ids")?;
        let ids = stmt
            .query_map(params![container], |row| row.get::<_, i64>(0))
            .context("Failed to query ordered ids")?
            .collect::<rusqlite::Result<Vec<i64>>>()
            .context("Failed to read id row")?;
        Ok(ids)
    }

    // ── Projects ──────────────────────────────────────────────────────

    pub fn create_project(&self, board_id: i64, owner_id: i64, new: NewProject) -> Result<Project> {
        require_title(&new.title)?;
        require_due_date(new.due_date.as_deref())?;
        let board = self.require_board_access(board_id, owner_id)?;
        for member in &new.member_ids {
            if !board.can_access(*member) {
                return Err(BoardError::Validation(format!(
                    "user {} is not a member of board {}",
                    member, board_id
                ))
                .into());
            }
        }
        let status = new.status.unwrap_or(ProjectStatus::Active);

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let order = self.reserve_slot(OrderScope::Projects, board_id, new.order_in_board)?;
        self.conn
            .execute(
                "INSERT INTO projects (board_id, title, description, owner_id, order_in_board, status, due_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    board_id,
                    new.title,
                    new.description,
                    owner_id,
                    order,
                    status.as_str(),
                    new.due_date
                ],
            )
            .context("Failed to insert project")?;
        let id = self.conn.last_insert_rowid();
        self.replace_project_members(id, owner_id, &new.member_ids)?;
        tx.commit().context("Failed to commit project creation")?;

        info!(project_id = id, board_id, order_in_board = order, "project created");
        self.get_project(id)?.context("Project not found after insert")
    }

    fn replace_project_members(&self, project_id: i64, owner_id: i64, member_ids: &[i64]) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM project_members WHERE project_id = ?1",
                params![project_id],
            )
            .context("Failed to clear project members")?;
        for member in member_ids.iter().filter(|m| **m != owner_id) {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO project_members (project_id, user_id) VALUES (?1, ?2)",
                    params![project_id, member],
                )
                .context("Failed to insert project member")?;
        }
        Ok(())
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let sql = format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], ProjectRow::read)
            .optional()
            .context("Failed to query project")?;
        match row {
            Some(r) => {
                let members = self.member_ids("project_members", "project_id", r.id)?;
                Ok(Some(r.into_project(members)?))
            }
            None => Ok(None),
        }
    }

    /// Projects of a board sorted by `order_in_board` (ties by id).
    pub fn list_projects(&self, board_id: i64) -> Result<Vec<Project>> {
        let sql = format!(
            "SELECT {} FROM projects WHERE board_id = ?1 ORDER BY order_in_board, id",
            PROJECT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map(params![board_id], ProjectRow::read)
            .context("Failed to query projects")?
            .collect::<rusqlite::Result<Vec<ProjectRow>>>()
            .context("Failed to read project row")?;
        let mut projects = Vec::with_capacity(rows.len());
        for r in rows {
            let members = self.member_ids("project_members", "project_id", r.id)?;
            projects.push(r.into_project(members)?);
        }
        Ok(projects)
    }

    /// Load a project and check board access for `user_id`.
    pub fn require_project_access(&self, project_id: i64, user_id: i64) -> Result<(Project, Board)> {
        let project = self
            .get_project(project_id)?
            .ok_or(BoardError::not_found(Entity::Project, project_id))?;
        let board = self.require_board_access(project.board.id(), user_id)?;
        Ok((project, board))
    }

    pub fn update_project(&self, id: i64, actor: i64, update: ProjectUpdate) -> Result<Project> {
        let (project, board) = self.require_project_access(id, actor)?;
        if let Some(t) = &update.title {
            require_title(t)?;
        }
        if let Some(due) = &update.due_date {
            require_due_date(due.as_deref())?;
        }
        if let Some(members) = &update.member_ids {
            if let Some(outsider) = members.iter().find(|m| !board.can_access(**m)) {
                return Err(BoardError::Validation(format!(
                    "user {} is not a member of board {}",
                    outsider,
                    board.id
                ))
                .into());
            }
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let due_date_set = update.due_date.is_some();
        let due_date = update.due_date.clone().flatten();
        self.conn
            .execute(
                "UPDATE projects SET
                    title = COALESCE(?1, title),
                    description = COALESCE(?2, description),
                    status = COALESCE(?3, status),
                    due_date = CASE WHEN ?4 THEN ?5 ELSE due_date END,
                    updated_at = datetime('now')
                 WHERE id = ?6",
                params![
                    update.title,
                    update.description,
                    update.status.as_ref().map(|s| s.as_str()),
                    due_date_set,
                    due_date,
                    id
                ],
            )
            .context("Failed to update project")?;
        if let Some(members) = &update.member_ids {
            self.replace_project_members(id, project.owner.id(), members)?;
        }
        if let Some(order) = update.order_in_board {
            self.relocate_project(&project, order)?;
        }
        tx.commit().context("Failed to commit project update")?;

        self.get_project(id)?.context("Project not found after update")
    }

    /// Move a project to `order` within its board.
    pub fn reorder_project(&self, id: i64, actor: i64, order: i64) -> Result<Project> {
        let (project, _) = self.require_project_access(id, actor)?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        self.relocate_project(&project, order)?;
        tx.commit().context("Failed to commit project reorder")?;
        self.get_project(id)?.context("Project not found after reorder")
    }

    fn relocate_project(&self, project: &Project, order: i64) -> Result<()> {
        let board_id = project.board.id();
        let len = self.count_children(OrderScope::Projects, board_id)?;
        ordering::check_reorder_index(order, len)?;

        let old = project.order_in_board;
        let plan = ordering::plan_move(board_id, old, board_id, order);
        if plan == MovePlan::Noop {
            return Ok(());
        }
        self.apply_plan(OrderScope::Projects, &plan, project.id)?;
        self.conn
            .execute(
                "UPDATE projects SET order_in_board = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![order, project.id],
            )
            .context("Failed to set project order")?;
        info!(project_id = project.id, board_id, from = old, to = order, "project reordered");
        Ok(())
    }

    /// Delete a project (tasks cascade) and close the gap in its board.
    /// Only the project owner or the board owner may delete.
    pub fn delete_project(&self, id: i64, actor: i64) -> Result<Project> {
        let (project, board) = self.require_project_access(id, actor)?;
        if project.owner.id() != actor && !board.is_owner(actor) {
            return Err(BoardError::forbidden(actor, format!("delete project {}", id)).into());
        }
        self.conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])
            .context("Failed to delete project")?;
        self.close_gap(OrderScope::Projects, board.id, project.order_in_board);
        info!(project_id = id, board_id = board.id, "project deleted");
        Ok(project)
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    pub fn create_task(&self, project_id: i64, creator_id: i64, new: NewTask) -> Result<Task> {
        require_title(&new.title)?;
        require_due_date(new.due_date.as_deref())?;
        let (project, board) = self.require_project_access(project_id, creator_id)?;
        if let Some(assignee) = new.assignee_id {
            require_assignable(&board, assignee)?;
        }
        let status = new.status.unwrap_or(TaskStatus::Todo);

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let order = self.reserve_slot(OrderScope::Tasks, project_id, new.order_in_project)?;
        self.conn
            .execute(
                "INSERT INTO tasks (project_id, board_id, title, description, status, due_date,
                                    assignee_id, creator_id, last_modifier_id, order_in_project)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9)",
                params![
                    project_id,
                    project.board.id(),
                    new.title,
                    new.description,
                    status.as_str(),
                    new.due_date,
                    new.assignee_id,
                    creator_id,
                    order
                ],
            )
            .context("Failed to insert task")?;
        let id = self.conn.last_insert_rowid();
        tx.commit().context("Failed to commit task creation")?;

        info!(task_id = id, project_id, order_in_project = order, "task created");
        self.get_task(id)?.context("Task not found after insert")
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], TaskRow::read)
            .optional()
            .context("Failed to query task")?;
        row.map(TaskRow::into_task).transpose()
    }

    /// Tasks of a project sorted by `order_in_project` (ties by id).
    pub fn list_tasks(&self, project_id: i64) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE project_id = ?1 ORDER BY order_in_project, id",
            TASK_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare list_tasks")?;
        let rows = stmt
            .query_map(params![project_id], TaskRow::read)
            .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            let r = row.context("Failed to read task row")?;
            tasks.push(r.into_task()?);
        }
        Ok(tasks)
    }

    /// Load a task and check board access for `user_id`.
    pub fn require_task_access(&self, task_id: i64, user_id: i64) -> Result<(Task, Board)> {
        let task = self
            .get_task(task_id)?
            .ok_or(BoardError::not_found(Entity::Task, task_id))?;
        let board = self.require_board_access(task.board.id(), user_id)?;
        Ok((task, board))
    }

    /// Apply field changes and, when `project_id` or `order_in_project` is
    /// present, the corresponding move, all in one transaction.
    pub fn update_task(&self, id: i64, actor: i64, update: TaskUpdate) -> Result<Task> {
        let (task, board) = self.require_task_access(id, actor)?;
        if let Some(t) = &update.title {
            require_title(t)?;
        }
        if let Some(due) = &update.due_date {
            require_due_date(due.as_deref())?;
        }
        if let Some(Some(assignee)) = update.assignee_id {
            require_assignable(&board, assignee)?;
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let due_date_set = update.due_date.is_some();
        let assignee_set = update.assignee_id.is_some();
        self.conn
            .execute(
                "UPDATE tasks SET
                    title = COALESCE(?1, title),
                    description = COALESCE(?2, description),
                    status = COALESCE(?3, status),
                    due_date = CASE WHEN ?4 THEN ?5 ELSE due_date END,
                    assignee_id = CASE WHEN ?6 THEN ?7 ELSE assignee_id END,
                    last_modifier_id = ?8,
                    updated_at = datetime('now')
                 WHERE id = ?9",
                params![
                    update.title,
                    update.description,
                    update.status.as_ref().map(|s| s.as_str()),
                    due_date_set,
                    update.due_date.clone().flatten(),
                    assignee_set,
                    update.assignee_id.flatten(),
                    actor,
                    id
                ],
            )
            .context("Failed to update task")?;

        if update.project_id.is_some() || update.order_in_project.is_some() {
            let dest = update.project_id.unwrap_or(task.project.id());
            let order = match update.order_in_project {
                Some(order) => order,
                // Project change without an index appends to the destination.
                None if dest != task.project.id() => self.count_children(OrderScope::Tasks, dest)?,
                None => task.order_in_project,
            };
            self.relocate_task(&task, actor, dest, order)?;
        }
        tx.commit().context("Failed to commit task update")?;

        self.get_task(id)?.context("Task not found after update")
    }

    /// Move a task to `order` inside `project_id` (same or another project
    /// on the same board).
    pub fn move_task(&self, id: i64, actor: i64, project_id: i64, order: i64) -> Result<Task> {
        let (task, _) = self.require_task_access(id, actor)?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let moved = self.relocate_task(&task, actor, project_id, order)?;
        tx.commit().context("Failed to commit task move")?;
        if !moved {
            return Ok(task);
        }
        self.get_task(id)?.context("Task not found after move")
    }

    /// Returns false when the move was a no-op and nothing was written.
    fn relocate_task(&self, task: &Task, actor: i64, dest: i64, order: i64) -> Result<bool> {
        let from = task.project.id();
        let old = task.order_in_project;

        let dest_project = self
            .get_project(dest)?
            .ok_or(BoardError::not_found(Entity::Project, dest))?;
        if dest_project.board.id() != task.board.id() {
            return Err(BoardError::CrossBoardMove {
                task_id: task.id,
                from_board: task.board.id(),
                to_board: dest_project.board.id(),
            }
            .into());
        }

        let len = self.count_children(OrderScope::Tasks, dest)?;
        if from == dest {
            ordering::check_reorder_index(order, len)?;
        } else {
            ordering::check_insert_index(order, len)?;
        }

        let plan = ordering::plan_move(from, old, dest, order);
        if plan == MovePlan::Noop {
            debug!(task_id = task.id, "move is a no-op");
            return Ok(false);
        }
        self.apply_plan(OrderScope::Tasks, &plan, task.id)?;
        self.conn
            .execute(
                "UPDATE tasks SET project_id = ?1, order_in_project = ?2, last_modifier_id = ?3,
                 updated_at = datetime('now') WHERE id = ?4",
                params![dest, order, actor, task.id],
            )
            .context("Failed to relocate task")?;
        info!(
            task_id = task.id,
            from_project = from,
            to_project = dest,
            from_order = old,
            to_order = order,
            "task moved"
        );
        Ok(true)
    }

    /// Delete a task and close the gap in its project.
    pub fn delete_task(&self, id: i64, actor: i64) -> Result<Task> {
        let (task, _) = self.require_task_access(id, actor)?;
        self.conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        self.close_gap(OrderScope::Tasks, task.project.id(), task.order_in_project);
        info!(task_id = id, project_id = task.project.id(), "task deleted");
        Ok(task)
    }

    // ── Repair ────────────────────────────────────────────────────────

    /// Rewrite every order in a board to `0..n`, keeping relative order.
    pub fn normalize_board(&self, board_id: i64, actor: i64) -> Result<NormalizeReport> {
        self.require_board_access(board_id, actor)?;
        let mut report = NormalizeReport::default();

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let project_ids = self.ordered_ids(OrderScope::Projects, board_id)?;
        report.projects_renumbered = self.renumber(OrderScope::Projects, &project_ids)?;
        for project_id in &project_ids {
            let task_ids = self.ordered_ids(OrderScope::Tasks, *project_id)?;
            report.tasks_renumbered += self.renumber(OrderScope::Tasks, &task_ids)?;
        }
        tx.commit().context("Failed to commit normalize")?;

        info!(
            board_id,
            projects = report.projects_renumbered,
            tasks = report.tasks_renumbered,
            "board orders normalized"
        );
        Ok(report)
    }

    fn renumber(&self, scope: OrderScope, ids: &[i64]) -> Result<usize> {
        let sql = format!(
            "UPDATE {table} SET {order} = ?1 WHERE id = ?2 AND {order} != ?1",
            table = scope.table(),
            order = scope.order_column()
        );
        let mut changed = 0;
        for (index, id) in ids.iter().enumerate() {
            changed += self
                .conn
                .execute(&sql, params![index as i64, id])
                .context("Failed to renumber row")?;
        }
        Ok(changed)
    }
}

fn require_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(BoardError::Validation("title must not be empty".into()).into());
    }
    Ok(())
}

/// Due dates are `YYYY-MM-DD` or RFC 3339 timestamps.
fn require_due_date(due: Option<&str>) -> Result<()> {
    let Some(due) = due else {
        return Ok(());
    };
    let valid = chrono::NaiveDate::parse_from_str(due, "%Y-%m-%d").is_ok()
        || chrono::DateTime::parse_from_rfc3339(due).is_ok();
    if !valid {
        return Err(BoardError::Validation(format!("invalid due date '{}'", due)).into());
    }
    Ok(())
}

fn require_assignable(board: &Board, user_id: i64) -> Result<()> {
    if !board.can_access(user_id) {
        return Err(BoardError::Validation(format!(
            "assignee {} is not a member of board {}",
            user_id, board.id
        ))
        .into());
    }
    Ok(())
}

struct ProjectRow {
    id: i64,
    title: String,
    description: Option<String>,
    owner_id: i64,
    board_id: i64,
    order_in_board: i64,
    status: String,
    due_date: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ProjectRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            owner_id: row.get(3)?,
            board_id: row.get(4)?,
            order_in_board: row.get(5)?,
            status: row.get(6)?,
            due_date: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_project(self, member_ids: Vec<i64>) -> Result<Project> {
        let status = ProjectStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse project status")?;
        Ok(Project {
            id: self.id,
            title: self.title,
            description: self.description,
            owner: Ref::Id(self.owner_id),
            members: member_ids.into_iter().map(Ref::Id).collect(),
            board: Ref::Id(self.board_id),
            order_in_board: self.order_in_board,
            status,
            due_date: self.due_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct TaskRow {
    id: i64,
    title: String,
    description: Option<String>,
    status: String,
    due_date: Option<String>,
    project_id: i64,
    board_id: i64,
    assignee_id: Option<i64>,
    creator_id: i64,
    last_modifier_id: i64,
    order_in_project: i64,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            status: row.get(3)?,
            due_date: row.get(4)?,
            project_id: row.get(5)?,
            board_id: row.get(6)?,
            assignee_id: row.get(7)?,
            creator_id: row.get(8)?,
            last_modifier_id: row.get(9)?,
            order_in_project: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        let status = TaskStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse task status")?;
        Ok(Task {
            id: self.id,
            title: self.title,
            description: self.description,
            status,
            due_date: self.due_date,
            project: Ref::Id(self.project_id),
            board: Ref::Id(self.board_id),
            assignee: self.assignee_id.map(Ref::Id),
            creator: Ref::Id(self.creator_id),
            last_modifier: Ref::Id(self.last_modifier_id),
            order_in_project: self.order_in_project,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::ordering::is_dense;

    struct Fixture {
        db: BoardDb,
        owner: User,
        board: Board,
    }

    fn fixture() -> Result<Fixture> {
        let db = BoardDb::new_in_memory()?;
        let owner = db.create_user("Ada", "ada@example.com")?;
        let board = db.create_board(owner.id, "Roadmap", None, &[])?;
        Ok(Fixture { db, owner, board })
    }

    fn project(f: &Fixture, title: &str) -> Result<Project> {
        f.db.create_project(
            f.board.id,
            f.owner.id,
            NewProject {
                title: title.to_string(),
                ..Default::default()
            },
        )
    }

    fn task(f: &Fixture, project_id: i64, title: &str) -> Result<Task> {
        f.db.create_task(
            project_id,
            f.owner.id,
            NewTask {
                title: title.to_string(),
                ..Default::default()
            },
        )
    }

    fn titles(db: &BoardDb, project_id: i64) -> Result<Vec<String>> {
        Ok(db.list_tasks(project_id)?.into_iter().map(|t| t.title).collect())
    }

    fn task_orders(db: &BoardDb, project_id: i64) -> Result<Vec<i64>> {
        Ok(db
            .list_tasks(project_id)?
            .into_iter()
            .map(|t| t.order_in_project)
            .collect())
    }

    fn board_error(err: &anyhow::Error) -> &BoardError {
        err.downcast_ref::<BoardError>()
            .expect("expected a BoardError")
    }

    #[test]
    fn test_create_tasks_appends_in_order() -> Result<()> {
        let f = fixture()?;
        let p = project(&f, "Backend")?;
        for t in ["a", "b", "c"] {
            task(&f, p.id, t)?;
        }
        assert_eq!(titles(&f.db, p.id)?, vec!["a", "b", "c"]);
        assert_eq!(task_orders(&f.db, p.id)?, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_create_task_at_explicit_index_opens_gap() -> Result<()> {
        let f = fixture()?;
        let p = project(&f, "Backend")?;
        task(&f, p.id, "a")?;
        task(&f, p.id, "b")?;
        let inserted = f.db.create_task(
            p.id,
            f.owner.id,
            NewTask {
                title: "first".into(),
                order_in_project: Some(0),
                ..Default::default()
            },
        )?;
        assert_eq!(inserted.order_in_project, 0);
        assert_eq!(titles(&f.db, p.id)?, vec!["first", "a", "b"]);
        assert!(is_dense(task_orders(&f.db, p.id)?));

        // Out-of-range explicit index is clamped to the end.
        let last = f.db.create_task(
            p.id,
            f.owner.id,
            NewTask {
                title: "last".into(),
                order_in_project: Some(99),
                ..Default::default()
            },
        )?;
        assert_eq!(last.order_in_project, 3);
        Ok(())
    }

    #[test]
    fn test_move_last_task_to_index_one() -> Result<()> {
        let f = fixture()?;
        let p = project(&f, "Backend")?;
        for t in ["a", "b", "c", "d"] {
            task(&f, p.id, t)?;
        }
        let d = f.db.list_tasks(p.id)?.pop().unwrap();
        let moved = f.db.move_task(d.id, f.owner.id, p.id, 1)?;
        assert_eq!(moved.order_in_project, 1);
        assert_eq!(titles(&f.db, p.id)?, vec!["a", "d", "b", "c"]);
        assert_eq!(task_orders(&f.db, p.id)?, vec![0, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_move_to_same_index_is_noop() -> Result<()> {
        let f = fixture()?;
        let p = project(&f, "Backend")?;
        let a = task(&f, p.id, "a")?;
        task(&f, p.id, "b")?;
        let before = f.db.list_tasks(p.id)?;
        let result = f.db.move_task(a.id, f.owner.id, p.id, 0)?;
        assert_eq!(result, a);
        assert_eq!(f.db.list_tasks(p.id)?, before);
        Ok(())
    }

    #[test]
    fn test_move_round_trip_restores_orders() -> Result<()> {
        let f = fixture()?;
        let p = project(&f, "Backend")?;
        for t in ["a", "b", "c", "d", "e"] {
            task(&f, p.id, t)?;
        }
        let b = f.db.list_tasks(p.id)?[1].clone();
        f.db.move_task(b.id, f.owner.id, p.id, 3)?;
        assert_eq!(titles(&f.db, p.id)?, vec!["a", "c", "d", "b", "e"]);
        f.db.move_task(b.id, f.owner.id, p.id, 1)?;
        assert_eq!(titles(&f.db, p.id)?, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(task_orders(&f.db, p.id)?, vec![0, 1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn test_move_across_projects_conserves_counts() -> Result<()> {
        let f = fixture()?;
        let src = project(&f, "Backend")?;
        let dst = project(&f, "Frontend")?;
        for t in ["a", "b", "c"] {
            task(&f, src.id, t)?;
        }
        for t in ["x", "y"] {
            task(&f, dst.id, t)?;
        }
        let b = f.db.list_tasks(src.id)?[1].clone();

        let moved = f.db.move_task(b.id, f.owner.id, dst.id, 1)?;
        assert_eq!(moved.project.id(), dst.id);
        assert_eq!(moved.order_in_project, 1);
        assert_eq!(titles(&f.db, src.id)?, vec!["a", "c"]);
        assert_eq!(titles(&f.db, dst.id)?, vec!["x", "b", "y"]);
        assert!(is_dense(task_orders(&f.db, src.id)?));
        assert!(is_dense(task_orders(&f.db, dst.id)?));
        Ok(())
    }

    #[test]
    fn test_move_across_to_end_of_empty_project() -> Result<()> {
        let f = fixture()?;
        let src = project(&f, "Backend")?;
        let dst = project(&f, "Empty")?;
        let a = task(&f, src.id, "a")?;
        let moved = f.db.move_task(a.id, f.owner.id, dst.id, 0)?;
        assert_eq!(moved.order_in_project, 0);
        assert!(f.db.list_tasks(src.id)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_move_rejects_out_of_range_index() -> Result<()> {
        let f = fixture()?;
        let p = project(&f, "Backend")?;
        let a = task(&f, p.id, "a")?;
        task(&f, p.id, "b")?;
        let err = f.db.move_task(a.id, f.owner.id, p.id, 2).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::IndexOutOfRange { index: 2, len: 2 }));
        assert_eq!(titles(&f.db, p.id)?, vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn test_move_rejects_cross_board_destination() -> Result<()> {
        let f = fixture()?;
        let p = project(&f, "Backend")?;
        let a = task(&f, p.id, "a")?;
        let other_board = f.db.create_board(f.owner.id, "Other", None, &[])?;
        let foreign = f.db.create_project(
            other_board.id,
            f.owner.id,
            NewProject {
                title: "Foreign".into(),
                ..Default::default()
            },
        )?;

        let err = f.db.move_task(a.id, f.owner.id, foreign.id, 0).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::CrossBoardMove { .. }));

        // The field-update path enforces the same rule.
        let err = f
            .db
            .update_task(
                a.id,
                f.owner.id,
                TaskUpdate {
                    project_id: Some(foreign.id),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::CrossBoardMove { .. }));
        assert_eq!(f.db.get_task(a.id)?.unwrap().project.id(), p.id);
        Ok(())
    }

    #[test]
    fn test_delete_task_closes_gap() -> Result<()> {
        let f = fixture()?;
        let p = project(&f, "Backend")?;
        for t in ["a", "b", "c", "d"] {
            task(&f, p.id, t)?;
        }
        let c = f.db.list_tasks(p.id)?[2].clone();
        f.db.delete_task(c.id, f.owner.id)?;
        assert_eq!(titles(&f.db, p.id)?, vec!["a", "b", "d"]);
        assert_eq!(task_orders(&f.db, p.id)?, vec![0, 1, 2]);
        assert!(f.db.get_task(c.id)?.is_none());
        Ok(())
    }

    #[test]
    fn test_update_task_fields_and_reorder() -> Result<()> {
        let f = fixture()?;
        let p = project(&f, "Backend")?;
        let a = task(&f, p.id, "a")?;
        task(&f, p.id, "b")?;
        let updated = f.db.update_task(
            a.id,
            f.owner.id,
            TaskUpdate {
                title: Some("renamed".into()),
                status: Some(TaskStatus::Done),
                assignee_id: Some(Some(f.owner.id)),
                order_in_project: Some(1),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.status, TaskStatus::Done);
        assert_eq!(updated.assignee.as_ref().map(|a| a.id()), Some(f.owner.id));
        assert_eq!(updated.order_in_project, 1);
        assert_eq!(titles(&f.db, p.id)?, vec!["b", "renamed"]);
        Ok(())
    }

    #[test]
    fn test_update_task_project_without_index_appends() -> Result<()> {
        let f = fixture()?;
        let src = project(&f, "Backend")?;
        let dst = project(&f, "Frontend")?;
        let a = task(&f, src.id, "a")?;
        task(&f, dst.id, "x")?;
        let updated = f.db.update_task(
            a.id,
            f.owner.id,
            TaskUpdate {
                project_id: Some(dst.id),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.order_in_project, 1);
        assert_eq!(titles(&f.db, dst.id)?, vec!["x", "a"]);
        Ok(())
    }

    #[test]
    fn test_failed_update_rolls_back_field_changes() -> Result<()> {
        let f = fixture()?;
        let p = project(&f, "Backend")?;
        let a = task(&f, p.id, "a")?;
        let err = f.db.update_task(
            a.id,
            f.owner.id,
            TaskUpdate {
                title: Some("renamed".into()),
                order_in_project: Some(5),
                ..Default::default()
            },
        );
        assert!(err.is_err());
        assert_eq!(f.db.get_task(a.id)?.unwrap().title, "a");
        Ok(())
    }

    #[test]
    fn test_reorder_projects_in_board() -> Result<()> {
        let f = fixture()?;
        let p0 = project(&f, "one")?;
        project(&f, "two")?;
        project(&f, "three")?;
        f.db.reorder_project(p0.id, f.owner.id, 2)?;
        let order: Vec<String> = f
            .db
            .list_projects(f.board.id)?
            .into_iter()
            .map(|p| p.title)
            .collect();
        assert_eq!(order, vec!["two", "three", "one"]);
        let board = f.db.get_board(f.board.id)?.unwrap();
        assert_eq!(board.projects.last().map(|p| p.id()), Some(p0.id));
        Ok(())
    }

    #[test]
    fn test_delete_project_cascades_and_reindexes() -> Result<()> {
        let f = fixture()?;
        let first = project(&f, "one")?;
        let doomed = project(&f, "two")?;
        let last = project(&f, "three")?;
        let t = task(&f, doomed.id, "gone")?;
        f.db.delete_project(doomed.id, f.owner.id)?;
        assert!(f.db.get_task(t.id)?.is_none());
        assert_eq!(f.db.get_project(first.id)?.unwrap().order_in_board, 0);
        assert_eq!(f.db.get_project(last.id)?.unwrap().order_in_board, 1);
        Ok(())
    }

    #[test]
    fn test_non_member_is_forbidden_and_nothing_changes() -> Result<()> {
        let f = fixture()?;
        let p = project(&f, "Backend")?;
        let a = task(&f, p.id, "a")?;
        task(&f, p.id, "b")?;
        let stranger = f.db.create_user("Eve", "eve@example.com")?;
        let err = f.db.move_task(a.id, stranger.id, p.id, 1).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Forbidden { .. }));
        assert_eq!(titles(&f.db, p.id)?, vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn test_only_owner_manages_membership_and_deletes() -> Result<()> {
        let f = fixture()?;
        let member = f.db.create_user("Bob", "bob@example.com")?;
        let other = f.db.create_user("Cy", "cy@example.com")?;
        let board = f.db.add_board_member(f.board.id, f.owner.id, member.id)?;
        assert!(board.can_access(member.id));

        let err = f.db.add_board_member(f.board.id, member.id, other.id).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Forbidden { .. }));
        let err = f.db.delete_board(f.board.id, member.id).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Forbidden { .. }));

        // Members can still read and update.
        f.db.update_board(f.board.id, member.id, Some("Renamed"), None)?;
        assert_eq!(f.db.list_boards_for_user(member.id)?.len(), 1);

        let board = f.db.remove_board_member(f.board.id, f.owner.id, member.id)?;
        assert!(!board.can_access(member.id));
        f.db.delete_board(f.board.id, f.owner.id)?;
        assert!(f.db.get_board(f.board.id)?.is_none());
        Ok(())
    }

    #[test]
    fn test_board_view_populates_users_and_orders() -> Result<()> {
        let f = fixture()?;
        let second = project(&f, "second")?;
        let first = f.db.create_project(
            f.board.id,
            f.owner.id,
            NewProject {
                title: "first".into(),
                order_in_board: Some(0),
                ..Default::default()
            },
        )?;
        task(&f, second.id, "t")?;
        let view = f.db.get_board_view(f.board.id, f.owner.id)?;
        assert_eq!(view.projects[0].project.id, first.id);
        assert_eq!(view.projects[1].tasks.len(), 1);
        assert_eq!(
            view.board.owner.populated().map(|u| u.name.as_str()),
            Some("Ada")
        );
        assert!(view.projects[1].tasks[0].creator.populated().is_some());
        Ok(())
    }

    #[test]
    fn test_normalize_board_repairs_gaps() -> Result<()> {
        let f = fixture()?;
        let p = project(&f, "Backend")?;
        for t in ["a", "b", "c"] {
            task(&f, p.id, t)?;
        }
        f.db.conn
            .execute("UPDATE tasks SET order_in_project = order_in_project * 10", [])?;
        assert!(!is_dense(task_orders(&f.db, p.id)?));

        let report = f.db.normalize_board(f.board.id, f.owner.id)?;
        assert_eq!(report.tasks_renumbered, 2);
        assert_eq!(report.projects_renumbered, 0);
        assert_eq!(titles(&f.db, p.id)?, vec!["a", "b", "c"]);
        assert!(is_dense(task_orders(&f.db, p.id)?));
        Ok(())
    }

    #[test]
    fn test_density_holds_across_mixed_operations() -> Result<()> {
        let f = fixture()?;
        let p1 = project(&f, "one")?;
        let p2 = project(&f, "two")?;
        let mut ids = Vec::new();
        for i in 0..6 {
            ids.push(task(&f, if i % 2 == 0 { p1.id } else { p2.id }, &format!("t{}", i))?.id);
        }
        f.db.move_task(ids[0], f.owner.id, p2.id, 0)?;
        f.db.delete_task(ids[3], f.owner.id)?;
        f.db.move_task(ids[5], f.owner.id, p1.id, 2)?;
        f.db.move_task(ids[2], f.owner.id, p1.id, 0)?;
        f.db.delete_task(ids[1], f.owner.id)?;
        for p in [p1.id, p2.id] {
            assert!(is_dense(task_orders(&f.db, p)?));
        }
        assert_eq!(
            f.db.list_tasks(p1.id)?.len() + f.db.list_tasks(p2.id)?.len(),
            4
        );
        Ok(())
    }

    #[test]
    fn test_duplicate_email_rejected() -> Result<()> {
        let f = fixture()?;
        let err = f.db.create_user("Other Ada", "ada@example.com").unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Validation(_)));
        Ok(())
    }

    #[test]
    fn test_due_date_formats() -> Result<()> {
        let f = fixture()?;
        let p = project(&f, "Backend")?;
        for due in ["2024-06-30", "2024-06-30T12:00:00Z"] {
            f.db.create_task(
                p.id,
                f.owner.id,
                NewTask {
                    title: "dated".into(),
                    due_date: Some(due.into()),
                    ..Default::default()
                },
            )?;
        }
        let err = f
            .db
            .create_task(
                p.id,
                f.owner.id,
                NewTask {
                    title: "bad".into(),
                    due_date: Some("next tuesday".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Validation(_)));
        assert_eq!(f.db.list_tasks(p.id)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_database_on_disk_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("board.db");
        {
            let db = BoardDb::new(&path)?;
            db.create_user("Ada", "ada@example.com")?;
        }
        let db = BoardDb::new(&path)?;
        assert!(db.get_user(1)?.is_some());
        Ok(())
    }
}
