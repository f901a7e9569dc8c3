//! Typed error hierarchy for taskboard.
//!
//! Two top-level enums cover the two halves of the crate:
//! - `BoardError`: server-side persistence, ordering and permission failures
//! - `ClientError`: client-side API and reconciliation failures

use thiserror::Error;

/// The kind of entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Board,
    Project,
    Task,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::User => "User",
            Self::Board => "Board",
            Self::Project => "Project",
            Self::Task => "Task",
        })
    }
}

/// Errors from the board server: storage, ordering and access control.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: i64 },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Index {index} out of range for container of {len} items")]
    IndexOutOfRange { index: i64, len: i64 },

    #[error("Task {task_id} belongs to board {from_board}, cannot move to project on board {to_board}")]
    CrossBoardMove {
        task_id: i64,
        from_board: i64,
        to_board: i64,
    },

    #[error("User {user_id} is not allowed to {action}")]
    Forbidden { user_id: i64, action: String },

    #[error("Missing or unknown acting user")]
    Unauthorized,

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl BoardError {
    pub fn not_found(entity: Entity, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn forbidden(user_id: i64, action: impl Into<String>) -> Self {
        Self::Forbidden {
            user_id,
            action: action.into(),
        }
    }
}

impl From<rusqlite::Error> for BoardError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.into())
    }
}

/// Errors from the client core: transport, server rejections, rollbacks.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("{entity} {id} is not in the local board state")]
    UnknownEntity { entity: Entity, id: i64 },

    #[error("Invalid move: {0}")]
    InvalidMove(String),
}

impl ClientError {
    /// Not-found rejections mean the local tree is stale and must be refetched.
    pub fn requires_refetch(&self) -> bool {
        match self {
            Self::Rejected { status, .. } => *status == 404 || *status == 409,
            Self::UnknownEntity { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_error_not_found_carries_entity_and_id() {
        let err = BoardError::not_found(Entity::Task, 42);
        match &err {
            BoardError::NotFound { entity, id } => {
                assert_eq!(*entity, Entity::Task);
                assert_eq!(*id, 42);
            }
            _ => panic!("Expected NotFound"),
        }
        assert_eq!(err.to_string(), "Task 42 not found");
    }

    #[test]
    fn board_error_cross_board_move_mentions_both_boards() {
        let err = BoardError::CrossBoardMove {
            task_id: 7,
            from_board: 1,
            to_board: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("board 1"));
        assert!(msg.contains("board 2"));
    }

    #[test]
    fn rusqlite_error_converts_to_database_variant() {
        let err: BoardError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, BoardError::Database(_)));
    }

    #[test]
    fn client_error_refetch_on_not_found_only() {
        let gone = ClientError::Rejected {
            status: 404,
            message: "Task 1 not found".into(),
        };
        assert!(gone.requires_refetch());
        let bad = ClientError::Rejected {
            status: 400,
            message: "bad index".into(),
        };
        assert!(!bad.requires_refetch());
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&BoardError::Unauthorized);
        assert_std_error(&ClientError::InvalidMove("x".into()));
    }
}
