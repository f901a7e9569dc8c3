use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error};

use super::models::{Board, Project, Task};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

/// Change event pushed to every connected client after a mutation commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    TaskCreated {
        task: Task,
    },
    TaskUpdated {
        task: Task,
    },
    TaskMoved {
        task_id: i64,
        from_project_id: i64,
        to_project_id: i64,
        order_in_project: i64,
    },
    TaskDeleted {
        task_id: i64,
        project_id: i64,
    },
    ProjectCreated {
        project: Project,
    },
    ProjectUpdated {
        project: Project,
    },
    ProjectReordered {
        project_id: i64,
        board_id: i64,
        order_in_board: i64,
    },
    ProjectDeleted {
        project_id: i64,
        board_id: i64,
    },
    BoardUpdated {
        board: Board,
    },
    BoardDeleted {
        board_id: i64,
    },
}

// ── WebSocket handler ────────────────────────────────────────────────

/// Upgrade handler bound to a broadcast sender (mounted by the server router).
pub async fn ws_handler(ws: WebSocketUpgrade, tx: broadcast::Sender<String>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, tx))
}

async fn handle_socket(socket: WebSocket, tx: broadcast::Sender<String>) {
    let (sender, receiver) = socket.split();
    let rx = tx.subscribe();
    debug!("websocket client connected");
    run_socket_loop(sender, receiver, rx).await;
    debug!("websocket client disconnected");
}

/// Forward broadcast events to one socket until either side goes away.
///
/// A Ping goes out every [`PING_INTERVAL`]; a client that has not answered
/// within [`PONG_TIMEOUT`] is dropped. Generic over the socket halves so it
/// can be driven without a real upgrade.
async fn run_socket_loop<S, R, E>(mut sender: S, mut receiver: R, mut events: broadcast::Receiver<String>)
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    let mut keepalive = tokio::time::interval(PING_INTERVAL);
    keepalive.tick().await;
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                if pong_deadline.is_some_and(|d| Instant::now() > d) {
                    debug!("websocket pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + PONG_TIMEOUT);
                }
            }

            event = events.recv() => match event {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "websocket client lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Pong(_))) => pong_deadline = None,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast a WsMessage to all connected WebSocket clients.
/// Returns silently even if no clients are connected.
pub fn broadcast_message(tx: &broadcast::Sender<String>, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => {
            error!(error = %e, "failed to serialize WsMessage");
        }
    }
}
