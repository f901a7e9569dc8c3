use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use serde::{Deserialize, Deserializer};
use tokio::sync::broadcast;
use tracing::error;

use super::db::{DbHandle, NewProject, NewTask, ProjectUpdate, TaskUpdate};
use super::models::{ProjectStatus, TaskStatus};
use super::ws::{WsMessage, broadcast_message};
use crate::errors::BoardError;

/// Header carrying the acting user's id.
pub const USER_HEADER: &str = "x-user-id";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<String>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBoardRequest {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<i64>,
}

#[derive(Deserialize)]
pub struct UpdateBoardRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub due_date: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<i64>,
    pub order_in_board: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub due_date: Option<Option<String>>,
    pub member_ids: Option<Vec<i64>>,
    pub order_in_board: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectOrderRequest {
    pub order_in_board: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub due_date: Option<String>,
    pub assignee_id: Option<i64>,
    pub order_in_project: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub due_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub assignee_id: Option<Option<i64>>,
    pub project_id: Option<i64>,
    pub order_in_project: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveTaskRequest {
    pub project_id: i64,
    pub order_in_project: i64,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Unauthorized(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast_ref::<BoardError>() {
            Some(be @ BoardError::NotFound { .. }) => ApiError::NotFound(be.to_string()),
            Some(
                be @ (BoardError::Validation(_)
                | BoardError::IndexOutOfRange { .. }
                | BoardError::CrossBoardMove { .. }),
            ) => ApiError::BadRequest(be.to_string()),
            Some(be @ BoardError::Forbidden { .. }) => ApiError::Forbidden(be.to_string()),
            Some(be @ BoardError::Unauthorized) => ApiError::Unauthorized(be.to_string()),
            _ => {
                error!(error = %format!("{:#}", e), "request failed");
                ApiError::Internal(e.to_string())
            }
        }
    }
}

fn parse_task_status(s: Option<&str>) -> Result<Option<TaskStatus>, ApiError> {
    s.map(TaskStatus::from_str)
        .transpose()
        .map_err(ApiError::BadRequest)
}

fn parse_project_status(s: Option<&str>) -> Result<Option<ProjectStatus>, ApiError> {
    s.map(ProjectStatus::from_str)
        .transpose()
        .map_err(ApiError::BadRequest)
}

// ── Acting user ───────────────────────────────────────────────────────

/// The user a request acts as, taken from the `x-user-id` header and checked
/// against the users table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActingUser(pub i64);

impl FromRequestParts<SharedState> for ActingUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing or invalid {} header", USER_HEADER)))?;
        let user = state.db.call(move |db| db.get_user(id)).await?;
        match user {
            Some(u) => Ok(ActingUser(u.id)),
            None => Err(ApiError::Unauthorized(BoardError::Unauthorized.to_string())),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/users", post(create_user))
        .route("/api/users/{id}", get(get_user))
        .route("/api/boards", get(list_boards).post(create_board))
        .route(
            "/api/boards/{id}",
            get(get_board).patch(update_board).delete(delete_board),
        )
        .route("/api/boards/{id}/members", post(add_member))
        .route(
            "/api/boards/{id}/members/{user_id}",
            delete(remove_member),
        )
        .route("/api/boards/{id}/projects", post(create_project))
        .route("/api/boards/{id}/normalize", post(normalize_board))
        .route(
            "/api/projects/{id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
        .route("/api/projects/{id}/order", patch(update_project_order))
        .route("/api/projects/{id}/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/tasks/{id}/move", patch(move_task))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn create_user(
    State(state): State<SharedState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .call(move |db| db.create_user(&req.name, &req.email))
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(state): State<SharedState>,
    _actor: ActingUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.db.call(move |db| db.get_user(id)).await?;
    match user {
        Some(user) => Ok(Json(user)),
        None => Err(ApiError::NotFound(format!("User {} not found", id))),
    }
}

async fn list_boards(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
) -> Result<impl IntoResponse, ApiError> {
    let boards = state.db.call(move |db| db.list_boards_for_user(actor)).await?;
    Ok(Json(boards))
}

async fn create_board(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Json(req): Json<CreateBoardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .db
        .call(move |db| {
            db.create_board(actor, &req.title, req.description.as_deref(), &req.member_ids)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(board)))
}

async fn get_board(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.db.call(move |db| db.get_board_view(id, actor)).await?;
    Ok(Json(view))
}

async fn update_board(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateBoardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .db
        .call(move |db| db.update_board(id, actor, req.title.as_deref(), req.description.as_deref()))
        .await?;
    broadcast_message(&state.ws_tx, &WsMessage::BoardUpdated { board: board.clone() });
    Ok(Json(board))
}

async fn delete_board(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.call(move |db| db.delete_board(id, actor)).await?;
    broadcast_message(&state.ws_tx, &WsMessage::BoardDeleted { board_id: id });
    Ok(StatusCode::NO_CONTENT)
}

async fn add_member(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path(id): Path<i64>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .db
        .call(move |db| db.add_board_member(id, actor, req.user_id))
        .await?;
    broadcast_message(&state.ws_tx, &WsMessage::BoardUpdated { board: board.clone() });
    Ok(Json(board))
}

async fn remove_member(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path((id, user_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .db
        .call(move |db| db.remove_board_member(id, actor, user_id))
        .await?;
    broadcast_message(&state.ws_tx, &WsMessage::BoardUpdated { board: board.clone() });
    Ok(Json(board))
}

async fn normalize_board(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.db.call(move |db| db.normalize_board(id, actor)).await?;
    Ok(Json(report))
}

async fn create_project(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path(board_id): Path<i64>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = NewProject {
        status: parse_project_status(req.status.as_deref())?,
        title: req.title,
        description: req.description,
        due_date: req.due_date,
        member_ids: req.member_ids,
        order_in_board: req.order_in_board,
    };
    let project = state
        .db
        .call(move |db| db.create_project(board_id, actor, new))
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::ProjectCreated {
            project: project.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let (project, _) = state
        .db
        .call(move |db| db.require_project_access(id, actor))
        .await?;
    Ok(Json(project))
}

async fn update_project(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let update = ProjectUpdate {
        status: parse_project_status(req.status.as_deref())?,
        title: req.title,
        description: req.description,
        due_date: req.due_date,
        member_ids: req.member_ids,
        order_in_board: req.order_in_board,
    };
    let project = state
        .db
        .call(move |db| db.update_project(id, actor, update))
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::ProjectUpdated {
            project: project.clone(),
        },
    );
    Ok(Json(project))
}

async fn update_project_order(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path(id): Path<i64>,
    Json(req): Json<ProjectOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = req.order_in_board;
    let project = state
        .db
        .call(move |db| db.reorder_project(id, actor, order))
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::ProjectReordered {
            project_id: id,
            board_id: project.board.id(),
            order_in_board: project.order_in_board,
        },
    );
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state.db.call(move |db| db.delete_project(id, actor)).await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::ProjectDeleted {
            project_id: id,
            board_id: project.board.id(),
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn list_tasks(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = state
        .db
        .call(move |db| {
            db.require_project_access(project_id, actor)?;
            db.list_tasks(project_id)
        })
        .await?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path(project_id): Path<i64>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = NewTask {
        status: parse_task_status(req.status.as_deref())?,
        title: req.title,
        description: req.description,
        due_date: req.due_date,
        assignee_id: req.assignee_id,
        order_in_project: req.order_in_project,
    };
    let task = state
        .db
        .call(move |db| db.create_task(project_id, actor, new))
        .await?;
    broadcast_message(&state.ws_tx, &WsMessage::TaskCreated { task: task.clone() });
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let (task, _) = state
        .db
        .call(move |db| db.require_task_access(id, actor))
        .await?;
    Ok(Json(task))
}

async fn update_task(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let update = TaskUpdate {
        status: parse_task_status(req.status.as_deref())?,
        title: req.title,
        description: req.description,
        due_date: req.due_date,
        assignee_id: req.assignee_id,
        project_id: req.project_id,
        order_in_project: req.order_in_project,
    };
    let (before, task) = state
        .db
        .call(move |db| {
            let (before, _) = db.require_task_access(id, actor)?;
            let task = db.update_task(id, actor, update)?;
            Ok((before, task))
        })
        .await?;
    if before.project.id() != task.project.id() || before.order_in_project != task.order_in_project
    {
        broadcast_message(
            &state.ws_tx,
            &WsMessage::TaskMoved {
                task_id: id,
                from_project_id: before.project.id(),
                to_project_id: task.project.id(),
                order_in_project: task.order_in_project,
            },
        );
    }
    broadcast_message(&state.ws_tx, &WsMessage::TaskUpdated { task: task.clone() });
    Ok(Json(task))
}

async fn move_task(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path(id): Path<i64>,
    Json(req): Json<MoveTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (project_id, order) = (req.project_id, req.order_in_project);
    let (from_project_id, task) = state
        .db
        .call(move |db| {
            let (before, _) = db.require_task_access(id, actor)?;
            let task = db.move_task(id, actor, project_id, order)?;
            Ok((before.project.id(), task))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::TaskMoved {
            task_id: id,
            from_project_id,
            to_project_id: task.project.id(),
            order_in_project: task.order_in_project,
        },
    );
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<SharedState>,
    ActingUser(actor): ActingUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.db.call(move |db| db.delete_task(id, actor)).await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::TaskDeleted {
            task_id: id,
            project_id: task.project.id(),
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::db::BoardDb;
    use crate::board::models::{BoardView, Task};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        state: SharedState,
    }

    fn test_app() -> TestApp {
        let db = BoardDb::new_in_memory().unwrap();
        let (ws_tx, _) = broadcast::channel(16);
        let state = Arc::new(AppState {
            db: DbHandle::new(db),
            ws_tx,
        });
        TestApp {
            router: api_router().with_state(state.clone()),
            state,
        }
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn request(method: &str, uri: &str, user: Option<i64>, body: Option<serde_json::Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = user {
            builder = builder.header(USER_HEADER, id.to_string());
        }
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    /// Owner, a board, one project with tasks a..d. Returns (owner, board, project, task ids).
    fn seed(app: &TestApp) -> (i64, i64, i64, Vec<i64>) {
        let db = app.state.db.lock_sync().unwrap();
        let owner = db.create_user("Ada", "ada@example.com").unwrap();
        let board = db.create_board(owner.id, "Roadmap", None, &[]).unwrap();
        let project = db
            .create_project(
                board.id,
                owner.id,
                NewProject {
                    title: "Backend".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let tasks = ["a", "b", "c", "d"]
            .iter()
            .map(|t| {
                db.create_task(
                    project.id,
                    owner.id,
                    NewTask {
                        title: t.to_string(),
                        ..Default::default()
                    },
                )
                .unwrap()
                .id
            })
            .collect();
        (owner.id, board.id, project.id, tasks)
    }

    async fn task_titles(app: &TestApp, user: i64, project: i64) -> Vec<String> {
        let resp = app
            .router
            .clone()
            .oneshot(request("GET", &format!("/api/projects/{}/tasks", project), Some(user), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let tasks: Vec<Task> = body_json(resp.into_body()).await;
        tasks.into_iter().map(|t| t.title).collect()
    }

    // 1. Health check
    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();
        let resp = app
            .router
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    // 2. Missing or unknown acting user
    #[tokio::test]
    async fn test_requests_without_known_user_are_unauthorized() {
        let app = test_app();
        let resp = app
            .router
            .clone()
            .oneshot(request("GET", "/api/boards", None, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .router
            .clone()
            .oneshot(request("GET", "/api/boards", Some(999), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = body_json(resp.into_body()).await;
        assert!(body["error"].is_string());
    }

    // 3. Full create flow through the API
    #[tokio::test]
    async fn test_create_user_board_project_task() {
        let app = test_app();

        let resp = app
            .router
            .clone()
            .oneshot(request(
                "POST",
                "/api/users",
                None,
                Some(serde_json::json!({"name": "Ada", "email": "ada@example.com"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let user: serde_json::Value = body_json(resp.into_body()).await;
        let user_id = user["id"].as_i64().unwrap();

        let resp = app
            .router
            .clone()
            .oneshot(request(
                "POST",
                "/api/boards",
                Some(user_id),
                Some(serde_json::json!({"title": "Roadmap"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let board: serde_json::Value = body_json(resp.into_body()).await;
        let board_id = board["id"].as_i64().unwrap();

        let resp = app
            .router
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/boards/{}/projects", board_id),
                Some(user_id),
                Some(serde_json::json!({"title": "Backend", "status": "planned"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let project: serde_json::Value = body_json(resp.into_body()).await;
        assert_eq!(project["orderInBoard"], 0);
        assert_eq!(project["status"], "planned");

        let resp = app
            .router
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/projects/{}/tasks", project["id"]),
                Some(user_id),
                Some(serde_json::json!({"title": "Write docs", "assigneeId": user_id})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let task: serde_json::Value = body_json(resp.into_body()).await;
        assert_eq!(task["orderInProject"], 0);
        assert_eq!(task["status"], "todo");
        assert_eq!(task["assignee"], user_id);

        let resp = app
            .router
            .clone()
            .oneshot(request("GET", &format!("/api/boards/{}", board_id), Some(user_id), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let view: BoardView = body_json(resp.into_body()).await;
        assert_eq!(view.projects.len(), 1);
        assert_eq!(view.projects[0].tasks[0].title, "Write docs");
    }

    // 4. Move within a project
    #[tokio::test]
    async fn test_move_task_within_project() {
        let app = test_app();
        let (owner, _, project, tasks) = seed(&app);
        let mut rx = app.state.ws_tx.subscribe();

        let resp = app
            .router
            .clone()
            .oneshot(request(
                "PATCH",
                &format!("/api/tasks/{}/move", tasks[3]),
                Some(owner),
                Some(serde_json::json!({"projectId": project, "orderInProject": 1})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let moved: Task = body_json(resp.into_body()).await;
        assert_eq!(moved.order_in_project, 1);
        assert_eq!(task_titles(&app, owner, project).await, vec!["a", "d", "b", "c"]);

        let event: WsMessage = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            event,
            WsMessage::TaskMoved {
                task_id: tasks[3],
                from_project_id: project,
                to_project_id: project,
                order_in_project: 1,
            }
        );
    }

    // 5. Bad index
    #[tokio::test]
    async fn test_move_out_of_range_is_bad_request() {
        let app = test_app();
        let (owner, _, project, tasks) = seed(&app);
        let resp = app
            .router
            .clone()
            .oneshot(request(
                "PATCH",
                &format!("/api/tasks/{}/move", tasks[0]),
                Some(owner),
                Some(serde_json::json!({"projectId": project, "orderInProject": 4})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(task_titles(&app, owner, project).await, vec!["a", "b", "c", "d"]);
    }

    // 6. Cross-board moves are rejected on both routes
    #[tokio::test]
    async fn test_cross_board_move_rejected() {
        let app = test_app();
        let (owner, _, _, tasks) = seed(&app);
        let foreign = {
            let db = app.state.db.lock_sync().unwrap();
            let other = db.create_board(owner, "Other", None, &[]).unwrap();
            db.create_project(
                other.id,
                owner,
                NewProject {
                    title: "Foreign".into(),
                    ..Default::default()
                },
            )
            .unwrap()
            .id
        };

        let resp = app
            .router
            .clone()
            .oneshot(request(
                "PATCH",
                &format!("/api/tasks/{}/move", tasks[0]),
                Some(owner),
                Some(serde_json::json!({"projectId": foreign, "orderInProject": 0})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .router
            .clone()
            .oneshot(request(
                "PATCH",
                &format!("/api/tasks/{}", tasks[0]),
                Some(owner),
                Some(serde_json::json!({"projectId": foreign})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    // 7. Non-members are forbidden and nothing changes
    #[tokio::test]
    async fn test_non_member_forbidden() {
        let app = test_app();
        let (owner, board, project, tasks) = seed(&app);
        let stranger = {
            let db = app.state.db.lock_sync().unwrap();
            db.create_user("Eve", "eve@example.com").unwrap().id
        };

        let resp = app
            .router
            .clone()
            .oneshot(request("GET", &format!("/api/boards/{}", board), Some(stranger), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app
            .router
            .clone()
            .oneshot(request(
                "DELETE",
                &format!("/api/tasks/{}", tasks[0]),
                Some(stranger),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(task_titles(&app, owner, project).await, vec!["a", "b", "c", "d"]);
    }

    // 8. Delete reindexes siblings
    #[tokio::test]
    async fn test_delete_task_reindexes() {
        let app = test_app();
        let (owner, _, project, tasks) = seed(&app);
        let resp = app
            .router
            .clone()
            .oneshot(request("DELETE", &format!("/api/tasks/{}", tasks[2]), Some(owner), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = app
            .router
            .clone()
            .oneshot(request("GET", &format!("/api/projects/{}/tasks", project), Some(owner), None))
            .await
            .unwrap();
        let remaining: Vec<Task> = body_json(resp.into_body()).await;
        let orders: Vec<i64> = remaining.iter().map(|t| t.order_in_project).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        assert_eq!(remaining[2].title, "d");

        let resp = app
            .router
            .clone()
            .oneshot(request("GET", &format!("/api/tasks/{}", tasks[2]), Some(owner), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    // 9. Project order endpoint
    #[tokio::test]
    async fn test_update_project_order() {
        let app = test_app();
        let (owner, board, project, _) = seed(&app);
        let second = {
            let db = app.state.db.lock_sync().unwrap();
            db.create_project(
                board,
                owner,
                NewProject {
                    title: "Frontend".into(),
                    ..Default::default()
                },
            )
            .unwrap()
            .id
        };
        let resp = app
            .router
            .clone()
            .oneshot(request(
                "PATCH",
                &format!("/api/projects/{}/order", second),
                Some(owner),
                Some(serde_json::json!({"orderInBoard": 0})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .router
            .clone()
            .oneshot(request("GET", &format!("/api/boards/{}", board), Some(owner), None))
            .await
            .unwrap();
        let view: BoardView = body_json(resp.into_body()).await;
        let ids: Vec<i64> = view.projects.iter().map(|p| p.project.id).collect();
        assert_eq!(ids, vec![second, project]);
    }

    // 10. PATCH task: explicit null clears, absent keeps
    #[tokio::test]
    async fn test_update_task_nullable_fields() {
        let app = test_app();
        let (owner, _, _, tasks) = seed(&app);
        let resp = app
            .router
            .clone()
            .oneshot(request(
                "PATCH",
                &format!("/api/tasks/{}", tasks[0]),
                Some(owner),
                Some(serde_json::json!({"dueDate": "2025-01-31", "assigneeId": owner, "status": "in_progress"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let task: serde_json::Value = body_json(resp.into_body()).await;
        assert_eq!(task["dueDate"], "2025-01-31");
        assert_eq!(task["status"], "in_progress");

        let resp = app
            .router
            .clone()
            .oneshot(request(
                "PATCH",
                &format!("/api/tasks/{}", tasks[0]),
                Some(owner),
                Some(serde_json::json!({"assigneeId": null})),
            ))
            .await
            .unwrap();
        let task: serde_json::Value = body_json(resp.into_body()).await;
        assert!(task["assignee"].is_null());
        assert_eq!(task["dueDate"], "2025-01-31");
    }

    // 11. Invalid status
    #[tokio::test]
    async fn test_invalid_status_is_bad_request() {
        let app = test_app();
        let (owner, _, project, _) = seed(&app);
        let resp = app
            .router
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/projects/{}/tasks", project),
                Some(owner),
                Some(serde_json::json!({"title": "x", "status": "blocked"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    // 12. Members
    #[tokio::test]
    async fn test_member_management() {
        let app = test_app();
        let (owner, board, _, _) = seed(&app);
        let bob = {
            let db = app.state.db.lock_sync().unwrap();
            db.create_user("Bob", "bob@example.com").unwrap().id
        };
        let resp = app
            .router
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/boards/{}/members", board),
                Some(owner),
                Some(serde_json::json!({"userId": bob})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .router
            .clone()
            .oneshot(request("GET", "/api/boards", Some(bob), None))
            .await
            .unwrap();
        let boards: Vec<serde_json::Value> = body_json(resp.into_body()).await;
        assert_eq!(boards.len(), 1);

        let resp = app
            .router
            .clone()
            .oneshot(request("DELETE", &format!("/api/boards/{}", board), Some(bob), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app
            .router
            .clone()
            .oneshot(request(
                "DELETE",
                &format!("/api/boards/{}/members/{}", board, bob),
                Some(owner),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    // 13. Normalize
    #[tokio::test]
    async fn test_normalize_endpoint_reports_nothing_on_dense_board() {
        let app = test_app();
        let (owner, board, _, _) = seed(&app);
        let resp = app
            .router
            .clone()
            .oneshot(request("POST", &format!("/api/boards/{}/normalize", board), Some(owner), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let report: serde_json::Value = body_json(resp.into_body()).await;
        assert_eq!(report["projectsRenumbered"], 0);
        assert_eq!(report["tasksRenumbered"], 0);
    }
}
