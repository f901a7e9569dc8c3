//! Drag gesture interpretation.
//!
//! The controller never mutates the board. While a drag is active each hover
//! sample is turned into a candidate [`Command`]; releasing the pointer hands
//! back the last candidate for the optimistic layer to execute.

use tracing::debug;

use super::optimistic::Command;
use super::store::BoardState;

/// What is being dragged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragItem {
    Task(i64),
    Project(i64),
}

/// What the pointer is currently over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    Task(i64),
    /// A project column, including its empty area.
    Project(i64),
}

/// Decoded pointer events from the gesture layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragEvent {
    Start(DragItem),
    Over(Option<DropTarget>),
    End,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging {
        active: DragItem,
        over: Option<DropTarget>,
        target: Option<Command>,
    },
}

#[derive(Debug, Default)]
pub struct DragController {
    state: DragState,
}

impl DragController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging { .. })
    }

    /// Feed one event. Returns the command to execute when a drag ends on a
    /// resolvable target.
    pub fn handle(&mut self, board: &BoardState, event: DragEvent) -> Option<Command> {
        match event {
            DragEvent::Start(item) => {
                self.start(item);
                None
            }
            DragEvent::Over(over) => {
                self.hover(board, over);
                None
            }
            DragEvent::End => self.end(),
            DragEvent::Cancel => {
                self.cancel();
                None
            }
        }
    }

    /// Begin dragging `item`. A drag already in progress is discarded.
    pub fn start(&mut self, item: DragItem) {
        debug!(?item, "drag started");
        self.state = DragState::Dragging {
            active: item,
            over: None,
            target: None,
        };
    }

    /// Record a hover sample and return the current candidate command.
    ///
    /// Hovering nothing, or something that does not resolve against `board`,
    /// keeps the previous candidate.
    pub fn hover(&mut self, board: &BoardState, over: Option<DropTarget>) -> Option<&Command> {
        let DragState::Dragging {
            active,
            over: current,
            target,
        } = &mut self.state
        else {
            return None;
        };
        *current = over;
        if let Some(next) = over.and_then(|o| resolve(board, *active, o)) {
            *target = Some(next);
        }
        target.as_ref()
    }

    /// Release the pointer: the last candidate, if any, is returned and the
    /// controller goes back to idle.
    pub fn end(&mut self) -> Option<Command> {
        match std::mem::take(&mut self.state) {
            DragState::Dragging { target, .. } => {
                debug!(?target, "drag ended");
                target
            }
            DragState::Idle => None,
        }
    }

    pub fn cancel(&mut self) {
        if self.is_dragging() {
            debug!("drag cancelled");
        }
        self.state = DragState::Idle;
    }
}

/// Map an (item, target) pair onto the command a drop there would issue.
fn resolve(board: &BoardState, active: DragItem, over: DropTarget) -> Option<Command> {
    match (active, over) {
        (DragItem::Task(task_id), DropTarget::Task(other)) => {
            let (project_id, order) = board.locate_task(other)?;
            board.locate_task(task_id)?;
            Some(Command::MoveTask {
                task_id,
                project_id,
                order,
            })
        }
        (DragItem::Task(task_id), DropTarget::Project(project_id)) => {
            let (from, _) = board.locate_task(task_id)?;
            let len = board.task_count(project_id)?;
            // End of the column: last slot when staying, one past it otherwise.
            let order = if from == project_id { len - 1 } else { len };
            Some(Command::MoveTask {
                task_id,
                project_id,
                order,
            })
        }
        (DragItem::Project(project_id), DropTarget::Project(other)) => {
            board.project(project_id)?;
            let order = board.project(other)?.project.order_in_board;
            Some(Command::ReorderProject { project_id, order })
        }
        (DragItem::Project(project_id), DropTarget::Task(task)) => {
            let (other, _) = board.locate_task(task)?;
            resolve(board, DragItem::Project(project_id), DropTarget::Project(other))
        }
    }
}
