//! Board server: persistence, ordering and the REST/WebSocket surface.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, ActingUser)       │
//! └──────────┘ WebSocket│         │                                        │
//!                       │         │ DbHandle::call()                       │
//!                       │         v                                        │
//!                       │  db.rs  (BoardDb: CRUD, moves, reindex)          │
//!                       │         │                                        │
//!                       │         │ plan_move() → MovePlan                 │
//!                       │         v                                        │
//!                       │  ordering.rs  (Shift, dense order arithmetic)    │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module     | Responsibility                                           |
//! |------------|----------------------------------------------------------|
//! | `models`   | Shared types: `Board`, `Project`, `Task`, `Ref<T>`       |
//! | `ws`       | `WsMessage` enum + `broadcast_message()` helper          |

pub mod api;
pub mod db;
pub mod models;
pub mod ordering;
pub mod server;
pub mod ws;
