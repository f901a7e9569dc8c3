//! Optimistic commands: snapshot → apply → commit | rollback.
//!
//! A command is applied to the local [`BoardState`] before its server call is
//! issued. Each command snapshots only the scopes (containers) it touches and
//! remembers their versions right after its own apply. On failure:
//!
//! - versions unchanged: nothing else touched those scopes, so the snapshot
//!   is restored exactly;
//! - versions changed: another command has since mutated the same scope, so
//!   only this command's own delta is undone via its inverse action.
//!
//! Either way the scopes are marked stale, a notice is pushed, and stale
//! scopes are refetched from the server once no in-flight command still
//! touches them.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::api::BoardApi;
use super::store::{Action, BoardState, Scope, Snapshot, apply};
use crate::board::models::BoardView;
use crate::board::ordering::{self, MovePlan};
use crate::errors::{ClientError, Entity};

/// A reordering or removal the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    MoveTask {
        task_id: i64,
        project_id: i64,
        order: i64,
    },
    ReorderProject {
        project_id: i64,
        order: i64,
    },
    DeleteTask {
        task_id: i64,
    },
    DeleteProject {
        project_id: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The command would not change anything; no server call was made.
    Noop,
    Committed { id: Uuid },
}

struct Prepared {
    action: Action,
    scopes: Vec<Scope>,
    snapshot: Snapshot,
    inverse: Vec<Action>,
}

struct InFlight {
    scopes: Vec<Scope>,
    /// Scope versions right after this command's own apply.
    versions: Vec<(Scope, u64)>,
    snapshot: Snapshot,
    inverse: Vec<Action>,
}

struct Inner {
    state: BoardState,
    in_flight: HashMap<Uuid, InFlight>,
}

impl Inner {
    fn dispatch(&mut self, action: &Action) {
        self.state = apply(&self.state, action);
    }

    /// Stale scopes no in-flight command still touches.
    fn ready_scopes(&self) -> Vec<Scope> {
        self.state
            .stale_scopes()
            .into_iter()
            .filter(|s| !self.in_flight.values().any(|f| f.scopes.contains(s)))
            .collect()
    }
}

/// Local board state plus the server it mirrors.
pub struct OptimisticBoard<A> {
    api: A,
    board_id: i64,
    inner: Mutex<Inner>,
}

impl<A: BoardApi> OptimisticBoard<A> {
    pub fn new(api: A, view: BoardView) -> Self {
        let board_id = view.board.id;
        Self {
            api,
            board_id,
            inner: Mutex::new(Inner {
                state: BoardState::from_view(view),
                in_flight: HashMap::new(),
            }),
        }
    }

    /// Fetch the board and build the local tree from it.
    pub async fn load(api: A, board_id: i64) -> Result<Self, ClientError> {
        let view = api.fetch_board(board_id).await?;
        Ok(Self::new(api, view))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn board_id(&self) -> i64 {
        self.board_id
    }

    /// Copy of the current local state.
    pub fn state(&self) -> BoardState {
        self.lock().state.clone()
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn dismiss_notice(&self, id: u64) {
        self.lock().dispatch(&Action::DismissNotice(id));
    }

    /// Apply `command` locally, send it, then commit or roll back.
    pub async fn execute(&self, command: Command) -> Result<Outcome, ClientError> {
        let id = Uuid::new_v4();
        {
            let mut inner = self.lock();
            let Some(prepared) = prepare(&inner.state, &command)? else {
                debug!(?command, "command is a no-op");
                return Ok(Outcome::Noop);
            };
            inner.dispatch(&prepared.action);
            let versions = prepared
                .scopes
                .iter()
                .map(|s| (*s, inner.state.version(*s)))
                .collect();
            inner.in_flight.insert(
                id,
                InFlight {
                    scopes: prepared.scopes,
                    versions,
                    snapshot: prepared.snapshot,
                    inverse: prepared.inverse,
                },
            );
        }
        debug!(%id, ?command, "optimistic command applied");

        match self.send(&command).await {
            Ok(reconcile) => {
                {
                    let mut inner = self.lock();
                    if let Some(action) = reconcile {
                        inner.dispatch(&action);
                    }
                    inner.in_flight.remove(&id);
                }
                debug!(%id, "optimistic command committed");
                self.refresh_stale().await;
                Ok(Outcome::Committed { id })
            }
            Err(e) => {
                self.rollback(id, &command, &e);
                self.refresh_stale().await;
                Err(e)
            }
        }
    }

    async fn send(&self, command: &Command) -> Result<Option<Action>, ClientError> {
        match *command {
            Command::MoveTask {
                task_id,
                project_id,
                order,
            } => {
                let task = self.api.move_task(task_id, project_id, order).await?;
                Ok(Some(Action::ReconcileTask(task)))
            }
            Command::ReorderProject { project_id, order } => {
                let project = self.api.update_project_order(project_id, order).await?;
                Ok(Some(Action::ReconcileProject(project)))
            }
            Command::DeleteTask { task_id } => {
                self.api.delete_task(task_id).await?;
                Ok(None)
            }
            Command::DeleteProject { project_id } => {
                self.api.delete_project(project_id).await?;
                Ok(None)
            }
        }
    }

    fn rollback(&self, id: Uuid, command: &Command, error: &ClientError) {
        let mut inner = self.lock();
        let Some(flight) = inner.in_flight.remove(&id) else {
            return;
        };
        let exact = flight
            .versions
            .iter()
            .all(|(scope, version)| inner.state.version(*scope) == *version);
        if exact {
            inner.dispatch(&Action::Restore(flight.snapshot));
        } else {
            for action in &flight.inverse {
                inner.dispatch(action);
            }
        }
        let mut stale = flight.scopes.clone();
        // A vanished entity may have taken its column with it.
        if error.requires_refetch() && !stale.contains(&Scope::Projects) {
            stale.push(Scope::Projects);
        }
        inner.dispatch(&Action::MarkStale(stale));
        inner.dispatch(&Action::Notify(describe_failure(command, error)));
        warn!(
            %id,
            ?command,
            exact,
            error = %error,
            "optimistic command rolled back"
        );
    }

    /// Refetch stale scopes that no in-flight command touches. Failures are
    /// surfaced as a notice and the scopes stay stale.
    pub async fn refresh_stale(&self) {
        if self.lock().ready_scopes().is_empty() {
            return;
        }
        match self.api.fetch_board(self.board_id).await {
            Ok(view) => {
                let mut inner = self.lock();
                let scopes = inner.ready_scopes();
                if !scopes.is_empty() {
                    info!(board_id = self.board_id, ?scopes, "refetched stale scopes");
                    inner.dispatch(&Action::Refetched { view, scopes });
                }
            }
            Err(e) => {
                warn!(board_id = self.board_id, error = %e, "refetch failed");
                self.lock()
                    .dispatch(&Action::Notify(format!("Could not refresh the board: {}", e)));
            }
        }
    }

    /// Replace the whole local tree from the server.
    pub async fn reload(&self) -> Result<(), ClientError> {
        let view = self.api.fetch_board(self.board_id).await?;
        self.lock().dispatch(&Action::Loaded(view));
        Ok(())
    }
}

fn describe_failure(command: &Command, error: &ClientError) -> String {
    let what = match command {
        Command::MoveTask { .. } => "move the task",
        Command::ReorderProject { .. } => "reorder the project",
        Command::DeleteTask { .. } => "delete the task",
        Command::DeleteProject { .. } => "delete the project",
    };
    format!("Could not {}: {}", what, error)
}

fn invalid(e: crate::errors::BoardError) -> ClientError {
    ClientError::InvalidMove(e.to_string())
}

/// Validate `command` against the local tree and build its action, scopes,
/// snapshot and inverse. `None` means the command is a no-op.
fn prepare(state: &BoardState, command: &Command) -> Result<Option<Prepared>, ClientError> {
    match *command {
        Command::MoveTask {
            task_id,
            project_id,
            order,
        } => {
            let (from, old) = state.locate_task(task_id).ok_or(ClientError::UnknownEntity {
                entity: Entity::Task,
                id: task_id,
            })?;
            let len = state.task_count(project_id).ok_or(ClientError::UnknownEntity {
                entity: Entity::Project,
                id: project_id,
            })?;
            if from == project_id {
                ordering::check_reorder_index(order, len).map_err(invalid)?;
            } else {
                ordering::check_insert_index(order, len).map_err(invalid)?;
            }
            let plan = ordering::plan_move(from, old, project_id, order);
            if plan == MovePlan::Noop {
                return Ok(None);
            }
            let scopes: Vec<Scope> = plan.touched().into_iter().map(Scope::Tasks).collect();
            Ok(Some(Prepared {
                action: Action::MoveTask {
                    task_id,
                    project_id,
                    order,
                },
                snapshot: state.snapshot(&scopes),
                scopes,
                inverse: vec![Action::MoveTask {
                    task_id,
                    project_id: from,
                    order: old,
                }],
            }))
        }
        Command::ReorderProject { project_id, order } => {
            let old = state
                .project(project_id)
                .map(|p| p.project.order_in_board)
                .ok_or(ClientError::UnknownEntity {
                    entity: Entity::Project,
                    id: project_id,
                })?;
            ordering::check_reorder_index(order, state.project_count()).map_err(invalid)?;
            if ordering::reorder_shift(old, order).is_none() {
                return Ok(None);
            }
            let scopes = vec![Scope::Projects];
            Ok(Some(Prepared {
                action: Action::ReorderProject { project_id, order },
                snapshot: state.snapshot(&scopes),
                scopes,
                inverse: vec![Action::ReorderProject {
                    project_id,
                    order: old,
                }],
            }))
        }
        Command::DeleteTask { task_id } => {
            let task = state.task(task_id).cloned().ok_or(ClientError::UnknownEntity {
                entity: Entity::Task,
                id: task_id,
            })?;
            let scopes = vec![Scope::Tasks(task.project.id())];
            let order = task.order_in_project;
            Ok(Some(Prepared {
                action: Action::RemoveTask { task_id },
                snapshot: state.snapshot(&scopes),
                scopes,
                inverse: vec![Action::InsertTask { task, order }],
            }))
        }
        Command::DeleteProject { project_id } => {
            let project = state
                .project(project_id)
                .cloned()
                .ok_or(ClientError::UnknownEntity {
                    entity: Entity::Project,
                    id: project_id,
                })?;
            let scopes = vec![Scope::Projects, Scope::Tasks(project_id)];
            let mut snapshot = state.snapshot(&scopes);
            snapshot.detached.push(project.clone());
            let order = project.project.order_in_board;
            Ok(Some(Prepared {
                action: Action::RemoveProject { project_id },
                snapshot,
                scopes,
                inverse: vec![Action::InsertProject { project, order }],
            }))
        }
    }
}
