use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

// === Task Models ===

/// Lifecycle state of a download task as reported by the backend.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states never transition again on the backend.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One video download job, exactly as the backend serializes it from `GET /api/tasks`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DownloadTask {
    pub id: String,
    pub title: String,
    pub page_url: String,
    pub video_url: String,
    pub thumbnail_url: String,
    pub resolution: String,
    pub save_dir: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub downloaded_bytes: u64,
    #[serde(default)]
    pub total_bytes: u64,
    /// MB/s, as computed by the backend.
    #[serde(default)]
    pub speed: f64,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub completed_at: Option<NaiveDateTime>,
}

/// A partial update pushed over the live channel for a single task.
/// Only the fields present on the wire are applied by the store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProgressMessage {
    pub task_id: String,
    pub progress: f64,
    #[serde(default, alias = "downloaded")]
    pub downloaded_bytes: Option<u64>,
    #[serde(default, alias = "total")]
    pub total_bytes: Option<u64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

impl ProgressMessage {
    /// Accepts a push payload only if it is progress-shaped: a string `task_id`
    /// and a numeric `progress`. Anything else yields `None`.
    pub fn from_payload(data: &Value) -> Option<Self> {
        let has_id = data.get("task_id").map_or(false, Value::is_string);
        let has_progress = data.get("progress").map_or(false, Value::is_number);
        if !has_id || !has_progress {
            return None;
        }
        serde_json::from_value(data.clone()).ok()
    }
}

/// Backend-wide counters, served by `GET /api/statistics` and pushed as `statistics` envelopes.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TaskStatistics {
    pub total_tasks: u64,
    pub completed: u64,
    pub failed: u64,
    pub downloading: u64,
    pub pending: u64,
    pub total_size_bytes: u64,
    pub downloaded_size_bytes: u64,
    pub average_speed_mbps: f64,
}

// === Push Channel Models ===

/// The raw `{type, data}` frame sent over the push channel.
#[derive(Deserialize, Debug, Clone)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

// === API Request/Response Models ===

/// The JSON body for a `POST /api/download` request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CreateTaskRequest {
    pub page_url: String,
    pub resolution: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl CreateTaskRequest {
    pub fn new(page_url: impl Into<String>, resolution: impl Into<String>) -> Self {
        Self {
            page_url: page_url.into(),
            resolution: resolution.into(),
            video_url: None,
            thumbnail_url: None,
            title: None,
        }
    }

    /// A request for a video found by search, carrying the metadata already scraped
    /// so the backend can skip fetching the page again.
    pub fn for_video(video: &VideoInfo, resolution: impl Into<String>) -> Self {
        let resolution = resolution.into();
        Self {
            page_url: video.url.clone(),
            video_url: video.resolutions.get(&resolution).cloned(),
            thumbnail_url: (!video.thumbnail_url.is_empty()).then(|| video.thumbnail_url.clone()),
            title: Some(video.title.clone()),
            resolution,
        }
    }
}

/// The JSON body for a `POST /api/bulk-urls` request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BulkImportRequest {
    pub urls: Vec<String>,
    pub resolution: String,
}

/// Per-batch outcome returned by `POST /api/bulk-urls` and `POST /api/batch-download`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BulkImportResult {
    #[serde(default)]
    pub task_ids: Vec<String>,
    pub success_count: usize,
    pub failed_count: usize,
    #[serde(default)]
    pub failed_urls: Vec<String>,
}

/// The JSON body for a `POST /api/batch-download` request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BatchDownloadRequest {
    pub videos: Vec<CreateTaskRequest>,
}

// === Discovery Models ===

/// Response of `GET /api/video-info`; `resolutions` maps a label like `720p` to its stream URL.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub title: String,
    pub url: String,
    pub thumbnail_url: String,
    #[serde(default)]
    pub resolutions: HashMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub search_url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub videos: Vec<VideoInfo>,
    pub total: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaginatedSearchRequest {
    pub search_url: String,
    pub start_page: u32,
    pub end_page: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaginatedSearchResult {
    pub videos: Vec<VideoInfo>,
    pub total_pages: u32,
    pub total_videos: usize,
}

/// The backend writes `""` instead of `null` for unset optional fields.
fn empty_string_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_backend_task_with_empty_optionals() {
        let raw = json!({
            "id": "9b1d",
            "title": "Some Title",
            "page_url": "https://site/watch?v=1",
            "video_url": "https://cdn/v.mp4",
            "thumbnail_url": "",
            "resolution": "1080p",
            "status": "downloading",
            "progress": 12.5,
            "downloaded_bytes": 100,
            "total_bytes": 800,
            "speed": 1.5,
            "error_message": "",
            "created_at": "2024-05-01T10:00:00.123456",
            "completed_at": "",
            "save_dir": "downloads/Some Title"
        });

        let task: DownloadTask = serde_json::from_value(raw).unwrap();
        assert_eq!(task.status, TaskStatus::Downloading);
        assert_eq!(task.error_message, None);
        assert_eq!(task.completed_at, None);
        assert_eq!(task.downloaded_bytes, 100);
    }

    #[test]
    fn only_finished_states_are_terminal() {
        let terminal: Vec<TaskStatus> = [
            TaskStatus::Pending,
            TaskStatus::Downloading,
            TaskStatus::Paused,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ]
        .into_iter()
        .filter(|s| s.is_terminal())
        .collect();
        assert_eq!(terminal, vec![TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled]);
    }

    #[test]
    fn decodes_timestamp_without_fraction() {
        let raw = json!({
            "id": "a", "title": "t", "page_url": "p", "video_url": "v",
            "thumbnail_url": "", "resolution": "720p", "save_dir": "d",
            "status": "completed", "error_message": "",
            "created_at": "2024-05-01T10:00:00",
            "completed_at": "2024-05-01T10:05:00"
        });

        let task: DownloadTask = serde_json::from_value(raw).unwrap();
        assert!(task.completed_at.is_some());
        assert_eq!(task.progress, 0.0);
    }

    #[test]
    fn progress_payload_requires_task_id_and_numeric_progress() {
        assert!(ProgressMessage::from_payload(&json!({"task_id": "x", "progress": 3})).is_some());
        assert!(ProgressMessage::from_payload(&json!({"task_id": "x", "progress": "3"})).is_none());
        assert!(ProgressMessage::from_payload(&json!({"progress": 3.0})).is_none());
        assert!(ProgressMessage::from_payload(&json!({"task_id": "x", "status": "pending"})).is_none());
    }

    #[test]
    fn progress_payload_accepts_short_byte_field_names() {
        let msg = ProgressMessage::from_payload(&json!({
            "task_id": "x", "progress": 50.0, "downloaded": 5, "total": 10, "speed": 0.5, "status": "downloading"
        }))
        .unwrap();
        assert_eq!(msg.downloaded_bytes, Some(5));
        assert_eq!(msg.total_bytes, Some(10));
        assert_eq!(msg.status, Some(TaskStatus::Downloading));
    }

    #[test]
    fn progress_payload_with_unknown_status_is_rejected() {
        let msg = ProgressMessage::from_payload(&json!({"task_id": "x", "progress": 1.0, "status": "exploded"}));
        assert!(msg.is_none());
    }

    #[test]
    fn request_for_searched_video_reuses_scraped_metadata() {
        let video = VideoInfo {
            title: "Clip".to_string(),
            url: "https://site/watch?v=7".to_string(),
            thumbnail_url: String::new(),
            resolutions: HashMap::from([("720p".to_string(), "https://cdn/7-720.mp4".to_string())]),
        };

        let request = CreateTaskRequest::for_video(&video, "720p");
        assert_eq!(request.page_url, "https://site/watch?v=7");
        assert_eq!(request.video_url.as_deref(), Some("https://cdn/7-720.mp4"));
        assert_eq!(request.thumbnail_url, None);
        assert_eq!(request.title.as_deref(), Some("Clip"));

        assert_eq!(CreateTaskRequest::for_video(&video, "1080p").video_url, None);
    }

    #[test]
    fn create_request_omits_unset_optionals() {
        let body = serde_json::to_value(CreateTaskRequest::new("https://site/watch?v=1", "720p")).unwrap();
        assert_eq!(body, json!({"page_url": "https://site/watch?v=1", "resolution": "720p"}));
    }
}
