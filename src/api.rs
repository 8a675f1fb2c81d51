use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::error::{ClientError, Result};
use crate::models::{
    BatchDownloadRequest, BulkImportRequest, BulkImportResult, CreateTaskRequest, DownloadTask,
    PaginatedSearchRequest, PaginatedSearchResult, SearchRequest, SearchResult, TaskStatistics,
    VideoInfo,
};

/// Remote lifecycle actions that leave the task in place on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    Cancel,
    Pause,
    Resume,
    Retry,
}

impl TaskAction {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskAction::Cancel => "cancel",
            TaskAction::Pause => "pause",
            TaskAction::Resume => "resume",
            TaskAction::Retry => "retry",
        }
    }
}

/// The task-creation and lifecycle contract of the backend. The poller, the
/// session actions and the bulk importer only ever talk to the backend through this.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// `GET /api/tasks`
    async fn list_tasks(&self) -> Result<Vec<DownloadTask>>;

    /// `GET /api/tasks/{id}`
    async fn get_task(&self, id: &str) -> Result<DownloadTask>;

    /// `POST /api/download`
    async fn create_task(&self, request: &CreateTaskRequest) -> Result<DownloadTask>;

    /// `POST /api/tasks/{id}/{action}`
    async fn run_action(&self, id: &str, action: TaskAction) -> Result<()>;

    /// `DELETE /api/tasks/{id}`
    async fn delete_task(&self, id: &str) -> Result<()>;

    /// `POST /api/bulk-urls`
    async fn submit_bulk_urls(&self, request: &BulkImportRequest) -> Result<BulkImportResult>;
}

/// REST client for the download backend, rooted at `{server_url}/api`.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    server: Url,
}

impl ApiClient {
    pub fn new(server_url: &str) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            server: Url::parse(server_url)?,
        })
    }

    /// Location of the push channel, `ws(s)://…/api/ws`.
    pub fn websocket_url(&self) -> Result<Url> {
        let mut url = self.endpoint(&["ws"])?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::InvalidUrl(url::ParseError::InvalidDomainCharacter))?;
        Ok(url)
    }

    /// # GET /api/statistics
    pub async fn statistics(&self) -> Result<TaskStatistics> {
        let response = self.http.get(self.endpoint(&["statistics"])?).send().await?;
        read_json(response).await
    }

    /// # GET /api/video-info
    pub async fn video_info(&self, page_url: &str) -> Result<VideoInfo> {
        let response = self
            .http
            .get(self.endpoint(&["video-info"])?)
            .query(&[("url", page_url)])
            .send()
            .await?;
        read_json(response).await
    }

    /// # POST /api/search
    pub async fn search(&self, search_url: &str) -> Result<SearchResult> {
        let body = SearchRequest {
            search_url: search_url.to_string(),
        };
        let response = self.http.post(self.endpoint(&["search"])?).json(&body).send().await?;
        read_json(response).await
    }

    /// # POST /api/search/paginated
    pub async fn search_paginated(&self, request: &PaginatedSearchRequest) -> Result<PaginatedSearchResult> {
        let response = self
            .http
            .post(self.endpoint(&["search", "paginated"])?)
            .json(request)
            .send()
            .await?;
        read_json(response).await
    }

    /// # POST /api/batch-download
    pub async fn batch_download(&self, request: &BatchDownloadRequest) -> Result<BulkImportResult> {
        let response = self
            .http
            .post(self.endpoint(&["batch-download"])?)
            .json(request)
            .send()
            .await?;
        read_json(response).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.server.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl TaskApi for ApiClient {
    async fn list_tasks(&self) -> Result<Vec<DownloadTask>> {
        let response = self.http.get(self.endpoint(&["tasks"])?).send().await?;
        read_json(response).await
    }

    async fn get_task(&self, id: &str) -> Result<DownloadTask> {
        let response = self.http.get(self.endpoint(&["tasks", id])?).send().await?;
        read_json(response).await
    }

    async fn create_task(&self, request: &CreateTaskRequest) -> Result<DownloadTask> {
        let response = self.http.post(self.endpoint(&["download"])?).json(request).send().await?;
        read_json(response).await
    }

    async fn run_action(&self, id: &str, action: TaskAction) -> Result<()> {
        let url = self.endpoint(&["tasks", id, action.as_str()])?;
        check_status(self.http.post(url).send().await?).await?;
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&["tasks", id])?;
        check_status(self.http.delete(url).send().await?).await?;
        Ok(())
    }

    async fn submit_bulk_urls(&self, request: &BulkImportRequest) -> Result<BulkImportResult> {
        let response = self.http.post(self.endpoint(&["bulk-urls"])?).json(request).send().await?;
        read_json(response).await
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = check_status(response).await?.text().await?;
    Ok(serde_json::from_str(&body)?)
}

/// Turns a non-success response into an error, keeping the backend's `detail` message when it sent one.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(220).collect::<String>().trim().to_string());

    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound(message));
    }
    Err(ClientError::Status { status, body: message })
}
