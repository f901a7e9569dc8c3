use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::board::api::USER_HEADER;
use crate::board::models::{BoardView, Project, Task};
use crate::errors::ClientError;

/// Server calls issued by the optimistic store.
/// Real implementation: `HttpBoardApi`. Tests use an in-memory double.
#[async_trait]
pub trait BoardApi: Send + Sync {
    async fn fetch_board(&self, board_id: i64) -> Result<BoardView, ClientError>;

    async fn move_task(
        &self,
        task_id: i64,
        project_id: i64,
        order_in_project: i64,
    ) -> Result<Task, ClientError>;

    async fn update_project_order(
        &self,
        project_id: i64,
        order_in_board: i64,
    ) -> Result<Project, ClientError>;

    async fn delete_task(&self, task_id: i64) -> Result<(), ClientError>;

    async fn delete_project(&self, project_id: i64) -> Result<(), ClientError>;
}

/// `BoardApi` over the REST surface, acting as one user.
#[derive(Clone)]
pub struct HttpBoardApi {
    client: Client,
    base_url: String,
    user_id: i64,
}

impl HttpBoardApi {
    pub fn new(base_url: impl Into<String>, user_id: i64) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(USER_HEADER, self.user_id.to_string())
    }

    /// Map non-success statuses onto `ClientError::Rejected`, carrying the
    /// server's `{"error": ...}` message when present.
    async fn check(resp: Response) -> Result<Response, ClientError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["error"].as_str().map(str::to_string))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
        Err(ClientError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ClientError> {
        let resp = Self::check(builder.send().await?).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn empty(builder: RequestBuilder) -> Result<(), ClientError> {
        let resp = Self::check(builder.send().await?).await?;
        if resp.status() != StatusCode::NO_CONTENT {
            debug!(status = %resp.status(), "unexpected success status for delete");
        }
        Ok(())
    }
}

#[async_trait]
impl BoardApi for HttpBoardApi {
    async fn fetch_board(&self, board_id: i64) -> Result<BoardView, ClientError> {
        let req = self.authed(self.client.get(self.url(&format!("/api/boards/{}", board_id))));
        Self::json(req).await
    }

    async fn move_task(
        &self,
        task_id: i64,
        project_id: i64,
        order_in_project: i64,
    ) -> Result<Task, ClientError> {
        let req = self
            .authed(self.client.patch(self.url(&format!("/api/tasks/{}/move", task_id))))
            .json(&json!({"projectId": project_id, "orderInProject": order_in_project}));
        Self::json(req).await
    }

    async fn update_project_order(
        &self,
        project_id: i64,
        order_in_board: i64,
    ) -> Result<Project, ClientError> {
        let req = self
            .authed(
                self.client
                    .patch(self.url(&format!("/api/projects/{}/order", project_id))),
            )
            .json(&json!({"orderInBoard": order_in_board}));
        Self::json(req).await
    }

    async fn delete_task(&self, task_id: i64) -> Result<(), ClientError> {
        let req = self.authed(self.client.delete(self.url(&format!("/api/tasks/{}", task_id))));
        Self::empty(req).await
    }

    async fn delete_project(&self, project_id: i64) -> Result<(), ClientError> {
        let req = self.authed(
            self.client
                .delete(self.url(&format!("/api/projects/{}", project_id))),
        );
        Self::empty(req).await
    }
}
