use reqwest::StatusCode;
use thiserror::Error;

// Everything the client library can fail with. Loops (poller, live channel)
// log these and retry; only one-shot calls hand them back to the caller.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("task store is no longer running")]
    StoreClosed,
}

pub type Result<T> = std::result::Result<T, ClientError>;
