//! Client-side board synchronization.
//!
//! | Module       | Responsibility                                             |
//! |--------------|------------------------------------------------------------|
//! | `api`        | `BoardApi` trait + `HttpBoardApi` (reqwest)                |
//! | `store`      | `BoardState` tree and the pure `apply` reducer             |
//! | `optimistic` | `OptimisticBoard`: snapshot → apply → commit / rollback    |
//! | `drag`       | `DragController`: pointer gestures → `Command`             |

pub mod api;
pub mod drag;
pub mod optimistic;
pub mod store;
