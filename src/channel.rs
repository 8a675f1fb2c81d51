//! Live-update push channel.
//!
//! Keeps one websocket open to the backend, hands progress-shaped payloads to a
//! single delta callback and reconnects after a fixed delay whenever the
//! connection drops or goes silent. Nothing is redelivered across a reconnect;
//! the poller is what repairs any gap.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use tokio::time;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{ClientError, Result};
use crate::models::{Envelope, ProgressMessage, TaskStatistics};

/// Text frames received on one connection. The stream ends when the connection closes.
pub type MessageStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<MessageStream>;
}

/// Heartbeat text frames; the backend answers each `ping` with a `pong`.
pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// Connects to the backend's `/api/ws` endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    heartbeat: Option<Duration>,
}

impl WsConnector {
    pub fn new(url: Url) -> Self {
        Self { url, heartbeat: None }
    }

    /// Sends a `ping` text frame every `every` while connected.
    pub fn with_heartbeat(mut self, every: Duration) -> Self {
        self.heartbeat = Some(every);
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<MessageStream> {
        let (socket, _response) = connect_async(self.url.as_str()).await?;
        let (mut sink, stream) = socket.split();

        // The pinger lives exactly as long as the returned stream.
        let alive = CancellationToken::new();
        let guard = alive.clone().drop_guard();
        if let Some(every) = self.heartbeat {
            tokio::spawn(async move {
                let mut ticks = time::interval_at(time::Instant::now() + every, every);
                loop {
                    tokio::select! {
                        _ = alive.cancelled() => break,
                        _ = ticks.tick() => {
                            if let Err(e) = sink.send(Message::Text(PING.into())).await {
                                tracing::debug!("Heartbeat stopped: {}", e);
                                break;
                            }
                        }
                    }
                }
            });
        }

        let frames = stream.filter_map(move |frame| {
            let _held = &guard;
            let item = match frame {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(_) => None,
                Err(e) => Some(Err(ClientError::from(e))),
            };
            async move { item }
        });
        Ok(frames.boxed())
    }
}

/// What a single text frame turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Progress(ProgressMessage),
    Statistics(TaskStatistics),
    /// A well-formed envelope this client does not consume, e.g. `task_update`.
    Ignored(String),
    Malformed,
}

pub fn decode_frame(text: &str) -> Frame {
    if text == PONG {
        return Frame::Ignored(PONG.to_string());
    }

    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(_) => return Frame::Malformed,
    };

    if let Some(progress) = ProgressMessage::from_payload(&envelope.data) {
        return Frame::Progress(progress);
    }

    match envelope.kind.as_str() {
        "statistics" => serde_json::from_value(envelope.data)
            .map(Frame::Statistics)
            .unwrap_or(Frame::Malformed),
        "progress" => Frame::Malformed,
        _ => Frame::Ignored(envelope.kind),
    }
}

type DeltaHandler = Box<dyn Fn(ProgressMessage) + Send + Sync>;
pub type StatisticsHandler = Box<dyn Fn(TaskStatistics) + Send + Sync>;

pub struct LiveChannel<C: ?Sized> {
    connector: Arc<C>,
    reconnect_delay: Duration,
    idle_timeout: Option<Duration>,
    on_delta: DeltaHandler,
    on_statistics: Option<StatisticsHandler>,
}

impl<C: Connector + ?Sized> LiveChannel<C> {
    pub fn new(
        connector: Arc<C>,
        reconnect_delay: Duration,
        on_delta: impl Fn(ProgressMessage) + Send + Sync + 'static,
    ) -> Self {
        Self {
            connector,
            reconnect_delay,
            idle_timeout: None,
            on_delta: Box::new(on_delta),
            on_statistics: None,
        }
    }

    pub fn on_statistics(mut self, handler: impl Fn(TaskStatistics) + Send + Sync + 'static) -> Self {
        self.on_statistics = Some(Box::new(handler));
        self
    }

    /// Drops a connection that delivers nothing, not even a heartbeat reply, for `limit`.
    pub fn idle_timeout(mut self, limit: Duration) -> Self {
        self.idle_timeout = Some(limit);
        self
    }

    /// Connects, drains, and reconnects until `shutdown` fires.
    /// The delay between attempts never grows and the number of attempts is not capped.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.session(attempts) => {}
            }

            tracing::info!("Reconnecting live channel in {:?}", self.reconnect_delay);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = time::sleep(self.reconnect_delay) => {}
            }
        }
        tracing::info!("Live channel stopped after {} connection attempts.", attempts);
    }

    async fn session(&self, attempt: u64) {
        let mut frames = match self.connector.connect().await {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!("Live channel connect attempt {} failed: {}", attempt, e);
                return;
            }
        };
        tracing::info!("Live channel connected (attempt {}).", attempt);

        loop {
            let next = match self.idle_timeout {
                Some(limit) => match time::timeout(limit, frames.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::warn!("Live channel silent for {:?}, dropping it", limit);
                        break;
                    }
                },
                None => frames.next().await,
            };

            match next {
                Some(Ok(text)) => self.dispatch(&text),
                Some(Err(e)) => {
                    tracing::warn!("Live channel error: {}", e);
                    break;
                }
                None => break,
            }
        }
        tracing::info!("Live channel disconnected.");
    }

    fn dispatch(&self, text: &str) {
        match decode_frame(text) {
            Frame::Progress(progress) => (self.on_delta)(progress),
            Frame::Statistics(stats) => {
                if let Some(handler) = &self.on_statistics {
                    handler(stats);
                }
            }
            Frame::Ignored(kind) => tracing::trace!("Ignoring '{}' push message", kind),
            Frame::Malformed => tracing::warn!("Discarding malformed push message: {}", text),
        }
    }
}
