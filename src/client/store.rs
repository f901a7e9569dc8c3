//! In-memory board tree driven by a pure reducer.
//!
//! [`apply`] never performs I/O: it takes the current [`BoardState`] and an
//! [`Action`] and returns the next state. Every action that changes the
//! members or order of a container bumps that container's version, which is
//! how the optimistic layer tells whether a snapshot is still safe to restore.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::board::models::{Board, BoardView, Project, ProjectWithTasks, Ref, Task};
use crate::board::ordering::{self, MovePlan};

/// A container whose children carry a dense order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Scope {
    /// The board's project list (`orderInBoard`).
    Projects,
    /// One project's task list (`orderInProject`).
    Tasks(i64),
}

/// A user-visible message, e.g. a rolled-back move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub id: u64,
    pub message: String,
}

/// Saved contents of one scope.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeContents {
    Tasks(Vec<Task>),
    /// `(project id, orderInBoard)` pairs.
    ProjectOrder(Vec<(i64, i64)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeSnapshot {
    pub scope: Scope,
    pub contents: ScopeContents,
}

/// Pre-mutation copy of the scopes an action touches. Projects removed by
/// the action are kept whole so they can be reinserted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub scopes: Vec<ScopeSnapshot>,
    pub detached: Vec<ProjectWithTasks>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Replace the whole tree with a server view.
    Loaded(BoardView),
    /// Replace only `scopes` from a server view.
    Refetched { view: BoardView, scopes: Vec<Scope> },
    MoveTask {
        task_id: i64,
        project_id: i64,
        order: i64,
    },
    ReorderProject {
        project_id: i64,
        order: i64,
    },
    RemoveTask {
        task_id: i64,
    },
    RemoveProject {
        project_id: i64,
    },
    InsertTask {
        task: Task,
        order: i64,
    },
    InsertProject {
        project: ProjectWithTasks,
        order: i64,
    },
    /// Merge server fields into a task, keeping its local placement.
    ReconcileTask(Task),
    /// Merge server fields into a project, keeping its local placement.
    ReconcileProject(Project),
    Restore(Snapshot),
    MarkStale(Vec<Scope>),
    Notify(String),
    DismissNotice(u64),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardState {
    pub board: Option<Board>,
    /// Sorted by `orderInBoard`; each project's tasks sorted by `orderInProject`.
    pub projects: Vec<ProjectWithTasks>,
    versions: HashMap<Scope, u64>,
    stale: BTreeSet<Scope>,
    notices: Vec<Notice>,
    next_notice: u64,
}

impl BoardState {
    pub fn from_view(view: BoardView) -> Self {
        apply(&Self::default(), &Action::Loaded(view))
    }

    pub fn board_id(&self) -> Option<i64> {
        self.board.as_ref().map(|b| b.id)
    }

    pub fn project(&self, id: i64) -> Option<&ProjectWithTasks> {
        self.projects.iter().find(|p| p.project.id == id)
    }

    fn project_mut(&mut self, id: i64) -> Option<&mut ProjectWithTasks> {
        self.projects.iter_mut().find(|p| p.project.id == id)
    }

    pub fn task(&self, id: i64) -> Option<&Task> {
        self.projects
            .iter()
            .flat_map(|p| p.tasks.iter())
            .find(|t| t.id == id)
    }

    /// `(project id, orderInProject)` of a task.
    pub fn locate_task(&self, id: i64) -> Option<(i64, i64)> {
        self.projects.iter().find_map(|p| {
            p.tasks
                .iter()
                .find(|t| t.id == id)
                .map(|t| (p.project.id, t.order_in_project))
        })
    }

    pub fn task_count(&self, project_id: i64) -> Option<i64> {
        self.project(project_id).map(|p| p.tasks.len() as i64)
    }

    pub fn project_count(&self) -> i64 {
        self.projects.len() as i64
    }

    /// Task titles of a project in display order.
    pub fn task_titles(&self, project_id: i64) -> Vec<String> {
        self.project(project_id)
            .map(|p| p.tasks.iter().map(|t| t.title.clone()).collect())
            .unwrap_or_default()
    }

    pub fn version(&self, scope: Scope) -> u64 {
        self.versions.get(&scope).copied().unwrap_or(0)
    }

    pub fn is_stale(&self, scope: Scope) -> bool {
        self.stale.contains(&scope)
    }

    pub fn stale_scopes(&self) -> Vec<Scope> {
        self.stale.iter().copied().collect()
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Copy the given scopes for a later [`Action::Restore`].
    pub fn snapshot(&self, scopes: &[Scope]) -> Snapshot {
        let scopes = scopes
            .iter()
            .filter_map(|scope| match scope {
                Scope::Projects => Some(ScopeSnapshot {
                    scope: *scope,
                    contents: ScopeContents::ProjectOrder(
                        self.projects
                            .iter()
                            .map(|p| (p.project.id, p.project.order_in_board))
                            .collect(),
                    ),
                }),
                Scope::Tasks(id) => self.project(*id).map(|p| ScopeSnapshot {
                    scope: *scope,
                    contents: ScopeContents::Tasks(p.tasks.clone()),
                }),
            })
            .collect();
        Snapshot {
            scopes,
            detached: Vec::new(),
        }
    }

    fn bump(&mut self, scope: Scope) {
        *self.versions.entry(scope).or_insert(0) += 1;
    }

    fn bump_all(&mut self) {
        self.bump(Scope::Projects);
        let ids: Vec<i64> = self.projects.iter().map(|p| p.project.id).collect();
        for id in ids {
            self.bump(Scope::Tasks(id));
        }
    }

    fn sort_projects(&mut self) {
        self.projects
            .sort_by_key(|p| (p.project.order_in_board, p.project.id));
    }
}

fn sort_tasks(tasks: &mut [Task]) {
    tasks.sort_by_key(|t| (t.order_in_project, t.id));
}

/// Normalize populated references to bare ids for the parts the reducer
/// compares, and sort every level.
fn ingest(view: BoardView) -> (Board, Vec<ProjectWithTasks>) {
    let mut projects = view.projects;
    for p in &mut projects {
        sort_tasks(&mut p.tasks);
        for t in &mut p.tasks {
            t.project = Ref::Id(t.project.id());
        }
    }
    projects.sort_by_key(|p| (p.project.order_in_board, p.project.id));
    (view.board, projects)
}

/// Compute the next state. Actions that reference unknown entities return
/// the state unchanged.
pub fn apply(state: &BoardState, action: &Action) -> BoardState {
    let mut next = state.clone();
    match action {
        Action::Loaded(view) => {
            let (board, projects) = ingest(view.clone());
            next.board = Some(board);
            next.projects = projects;
            next.stale.clear();
            next.bump_all();
        }
        Action::Refetched { view, scopes } => refetch_scopes(&mut next, view, scopes),
        Action::MoveTask {
            task_id,
            project_id,
            order,
        } => move_task(&mut next, *task_id, *project_id, *order),
        Action::ReorderProject { project_id, order } => {
            reorder_project(&mut next, *project_id, *order)
        }
        Action::RemoveTask { task_id } => {
            if let Some((project_id, old)) = next.locate_task(*task_id) {
                if let Some(p) = next.project_mut(project_id) {
                    p.tasks.retain(|t| t.id != *task_id);
                    ordering::apply_shift(&mut p.tasks, &ordering::removal_shift(old), |_| false);
                }
                next.bump(Scope::Tasks(project_id));
            }
        }
        Action::RemoveProject { project_id } => {
            if let Some(old) = next.project(*project_id).map(|p| p.project.order_in_board) {
                next.projects.retain(|p| p.project.id != *project_id);
                let shift = ordering::removal_shift(old);
                for p in &mut next.projects {
                    p.project.order_in_board = shift.apply(p.project.order_in_board);
                }
                next.bump(Scope::Projects);
                next.bump(Scope::Tasks(*project_id));
            }
        }
        Action::InsertTask { task, order } => {
            let project_id = task.project.id();
            if next.locate_task(task.id).is_none() {
                if let Some(p) = next.project_mut(project_id) {
                    let order = (*order).clamp(0, p.tasks.len() as i64);
                    ordering::apply_shift(&mut p.tasks, &ordering::insertion_shift(order), |_| false);
                    let mut task = task.clone();
                    task.project = Ref::Id(project_id);
                    task.order_in_project = order;
                    p.tasks.push(task);
                    sort_tasks(&mut p.tasks);
                    next.bump(Scope::Tasks(project_id));
                }
            }
        }
        Action::InsertProject { project, order } => {
            if next.project(project.project.id).is_none() {
                let order = (*order).clamp(0, next.project_count());
                let shift = ordering::insertion_shift(order);
                for p in &mut next.projects {
                    p.project.order_in_board = shift.apply(p.project.order_in_board);
                }
                let mut project = project.clone();
                project.project.order_in_board = order;
                next.projects.push(project);
                next.sort_projects();
                next.bump(Scope::Projects);
            }
        }
        Action::ReconcileTask(server) => {
            if let Some((project_id, _)) = next.locate_task(server.id) {
                if let Some(local) = next
                    .project_mut(project_id)
                    .and_then(|p| p.tasks.iter_mut().find(|t| t.id == server.id))
                {
                    *local = merge_task(local, server.clone());
                }
            }
        }
        Action::ReconcileProject(server) => {
            if let Some(local) = next.project_mut(server.id) {
                local.project = merge_project(&local.project, server.clone());
            }
        }
        Action::Restore(snapshot) => restore(&mut next, snapshot),
        Action::MarkStale(scopes) => next.stale.extend(scopes.iter().copied()),
        Action::Notify(message) => {
            next.next_notice += 1;
            let id = next.next_notice;
            next.notices.push(Notice {
                id,
                message: message.clone(),
            });
        }
        Action::DismissNotice(id) => next.notices.retain(|n| n.id != *id),
    }
    next
}

/// Server fields win, except placement and any reference the local copy
/// already holds populated.
fn merge_task(local: &Task, mut server: Task) -> Task {
    server.project = local.project.clone();
    server.order_in_project = local.order_in_project;
    server.board = local.board.merge(server.board);
    server.creator = local.creator.merge(server.creator);
    server.last_modifier = local.last_modifier.merge(server.last_modifier);
    server.assignee = match (&local.assignee, server.assignee) {
        (Some(mine), Some(theirs)) => Some(mine.merge(theirs)),
        (_, theirs) => theirs,
    };
    server
}

fn merge_project(local: &Project, mut server: Project) -> Project {
    server.order_in_board = local.order_in_board;
    server.owner = local.owner.merge(server.owner);
    server.board = local.board.merge(server.board);
    server.members = server
        .members
        .into_iter()
        .map(|m| match local.members.iter().find(|l| l.id() == m.id()) {
            Some(mine) => mine.merge(m),
            None => m,
        })
        .collect();
    server
}

fn move_task(state: &mut BoardState, task_id: i64, to: i64, order: i64) {
    let Some((from, old)) = state.locate_task(task_id) else {
        return;
    };
    let Some(dest_len) = state.task_count(to) else {
        return;
    };
    let order = if from == to {
        order.clamp(0, (dest_len - 1).max(0))
    } else {
        order.clamp(0, dest_len)
    };

    match ordering::plan_move(from, old, to, order) {
        MovePlan::Noop => {}
        MovePlan::Within { container, shift } => {
            if let Some(p) = state.project_mut(container) {
                ordering::apply_shift(&mut p.tasks, &shift, |t| t.id == task_id);
                if let Some(t) = p.tasks.iter_mut().find(|t| t.id == task_id) {
                    t.order_in_project = order;
                }
                sort_tasks(&mut p.tasks);
            }
            state.bump(Scope::Tasks(container));
        }
        MovePlan::Across {
            source,
            source_shift,
            dest,
            dest_shift,
        } => {
            let Some(src) = state.project_mut(source) else {
                return;
            };
            let Some(pos) = src.tasks.iter().position(|t| t.id == task_id) else {
                return;
            };
            let mut task = src.tasks.remove(pos);
            ordering::apply_shift(&mut src.tasks, &source_shift, |_| false);

            if let Some(dst) = state.project_mut(dest) {
                ordering::apply_shift(&mut dst.tasks, &dest_shift, |_| false);
                task.project = Ref::Id(dest);
                task.order_in_project = order;
                dst.tasks.push(task);
                sort_tasks(&mut dst.tasks);
            }
            state.bump(Scope::Tasks(source));
            state.bump(Scope::Tasks(dest));
        }
    }
}

fn reorder_project(state: &mut BoardState, project_id: i64, order: i64) {
    let Some(old) = state.project(project_id).map(|p| p.project.order_in_board) else {
        return;
    };
    let order = order.clamp(0, (state.project_count() - 1).max(0));
    let Some(shift) = ordering::reorder_shift(old, order) else {
        return;
    };
    for p in &mut state.projects {
        if p.project.id == project_id {
            p.project.order_in_board = order;
        } else {
            p.project.order_in_board = shift.apply(p.project.order_in_board);
        }
    }
    state.sort_projects();
    state.bump(Scope::Projects);
}

fn restore(state: &mut BoardState, snapshot: &Snapshot) {
    for saved in &snapshot.scopes {
        match (&saved.scope, &saved.contents) {
            (Scope::Tasks(project_id), ScopeContents::Tasks(tasks)) => {
                if let Some(p) = state.project_mut(*project_id) {
                    p.tasks = tasks.clone();
                    sort_tasks(&mut p.tasks);
                    state.bump(Scope::Tasks(*project_id));
                }
            }
            (Scope::Projects, ScopeContents::ProjectOrder(orders)) => {
                for detached in &snapshot.detached {
                    if state.project(detached.project.id).is_none() {
                        state.projects.push(detached.clone());
                    }
                }
                for p in &mut state.projects {
                    if let Some((_, order)) = orders.iter().find(|(id, _)| *id == p.project.id) {
                        p.project.order_in_board = *order;
                    }
                }
                state.sort_projects();
                state.bump(Scope::Projects);
            }
            _ => {}
        }
    }
}

fn refetch_scopes(state: &mut BoardState, view: &BoardView, scopes: &[Scope]) {
    let (board, fresh) = ingest(view.clone());
    for scope in scopes {
        match scope {
            Scope::Projects => {
                let tasks_by_project: HashMap<i64, Vec<Task>> = state
                    .projects
                    .drain(..)
                    .map(|p| (p.project.id, p.tasks))
                    .collect();
                // Keep local task lists for projects that still exist; their
                // scopes are refreshed separately when stale.
                state.projects = fresh
                    .iter()
                    .cloned()
                    .map(|mut p| {
                        if let Some(tasks) = tasks_by_project.get(&p.project.id) {
                            p.tasks = tasks.clone();
                        }
                        p
                    })
                    .collect();
                state.board = Some(board.clone());
                state.bump(Scope::Projects);
            }
            Scope::Tasks(project_id) => {
                let server_tasks = fresh
                    .iter()
                    .find(|p| p.project.id == *project_id)
                    .map(|p| p.tasks.clone());
                let Some(server_tasks) = server_tasks else {
                    // Gone on the server: drop the column and close its slot.
                    if let Some(old) = state.project(*project_id).map(|p| p.project.order_in_board) {
                        state.projects.retain(|p| p.project.id != *project_id);
                        let shift = ordering::removal_shift(old);
                        for p in &mut state.projects {
                            p.project.order_in_board = shift.apply(p.project.order_in_board);
                        }
                        state.bump(Scope::Projects);
                        state.bump(Scope::Tasks(*project_id));
                    }
                    state.stale.remove(scope);
                    continue;
                };
                // A task can only live in one project; drop stale copies elsewhere.
                let ids: Vec<i64> = server_tasks.iter().map(|t| t.id).collect();
                let mut touched = Vec::new();
                for p in &mut state.projects {
                    if p.project.id == *project_id {
                        continue;
                    }
                    let before = p.tasks.len();
                    p.tasks.retain(|t| !ids.contains(&t.id));
                    if p.tasks.len() != before {
                        ordering::densify(&mut p.tasks);
                        touched.push(p.project.id);
                    }
                }
                if let Some(p) = state.project_mut(*project_id) {
                    p.tasks = server_tasks;
                }
                state.bump(Scope::Tasks(*project_id));
                for id in touched {
                    state.bump(Scope::Tasks(id));
                }
            }
        }
        state.stale.remove(scope);
    }
}
