//! The single authoritative in-memory cache of download tasks.
//!
//! [`TaskStore`] itself is a plain owned collection with a narrow mutation API.
//! At runtime it is moved into one tokio task (see [`spawn_store`]) that drains a
//! FIFO queue of [`StoreEvent`]s, so every writer is serialized and the last
//! event to arrive decides what is visible.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{ClientError, Result};
use crate::models::{DownloadTask, ProgressMessage};

/// Point-in-time copy of every cached task, in no particular order.
pub type Snapshot = Arc<Vec<DownloadTask>>;

#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: HashMap<String, DownloadTask>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the whole collection with the result of a full poll.
    pub fn replace_all(&mut self, tasks: Vec<DownloadTask>) {
        self.tasks = tasks.into_iter().map(|task| (task.id.clone(), task)).collect();
    }

    /// Patches a known task with a push delta. Deltas for unknown ids are dropped;
    /// only a full poll or a creation response may introduce a task.
    pub fn apply_delta(&mut self, delta: &ProgressMessage) -> bool {
        match self.tasks.get_mut(&delta.task_id) {
            Some(task) => {
                if task.status.is_terminal() {
                    tracing::debug!(
                        "Progress for task {} arrived after it ended as {}",
                        delta.task_id,
                        task.status
                    );
                }
                *task = merge_progress(task, delta);
                true
            }
            None => {
                tracing::debug!("Dropping progress for unknown task {}", delta.task_id);
                false
            }
        }
    }

    /// Inserts or replaces a task the backend returned directly, e.g. from `POST /download`.
    pub fn upsert(&mut self, task: DownloadTask) {
        self.tasks.insert(task.id.clone(), task);
    }

    /// No-op when the id is absent.
    pub fn remove(&mut self, id: &str) -> Option<DownloadTask> {
        self.tasks.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&DownloadTask> {
        self.tasks.get(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn snapshot(&self) -> Vec<DownloadTask> {
        self.tasks.values().cloned().collect()
    }

    /// Applies one queued event and reports whether the visible state may have changed.
    pub fn apply(&mut self, event: StoreEvent) -> bool {
        match event {
            StoreEvent::ReplaceAll(tasks) => {
                self.replace_all(tasks);
                true
            }
            StoreEvent::Delta(delta) => self.apply_delta(&delta),
            StoreEvent::Upsert(task) => {
                self.upsert(task);
                true
            }
            StoreEvent::Remove(id) => self.remove(&id).is_some(),
            StoreEvent::Barrier(ack) => {
                let _ = ack.send(());
                false
            }
        }
    }
}

/// Returns `task` with only the fields carried by `delta` overwritten.
/// Identity, descriptive fields and timestamps are never touched.
pub fn merge_progress(task: &DownloadTask, delta: &ProgressMessage) -> DownloadTask {
    let mut merged = task.clone();
    merged.progress = delta.progress;
    if let Some(downloaded) = delta.downloaded_bytes {
        merged.downloaded_bytes = downloaded;
    }
    if let Some(total) = delta.total_bytes {
        merged.total_bytes = total;
    }
    if let Some(speed) = delta.speed {
        merged.speed = speed;
    }
    if let Some(status) = delta.status {
        merged.status = status;
    }
    merged
}

/// Writes proposed to the store loop.
#[derive(Debug)]
pub enum StoreEvent {
    ReplaceAll(Vec<DownloadTask>),
    Delta(ProgressMessage),
    Upsert(DownloadTask),
    Remove(String),
    /// Acknowledged once every event queued before it has been applied.
    Barrier(oneshot::Sender<()>),
}

/// Cloneable front door to a running store loop.
#[derive(Clone, Debug)]
pub struct StoreHandle {
    events: mpsc::UnboundedSender<StoreEvent>,
    snapshots: watch::Receiver<Snapshot>,
}

impl StoreHandle {
    pub fn replace_all(&self, tasks: Vec<DownloadTask>) -> Result<()> {
        self.send(StoreEvent::ReplaceAll(tasks))
    }

    pub fn apply_delta(&self, delta: ProgressMessage) -> Result<()> {
        self.send(StoreEvent::Delta(delta))
    }

    pub fn upsert(&self, task: DownloadTask) -> Result<()> {
        self.send(StoreEvent::Upsert(task))
    }

    pub fn remove(&self, id: impl Into<String>) -> Result<()> {
        self.send(StoreEvent::Remove(id.into()))
    }

    /// Waits until everything sent so far through any handle has been applied.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreEvent::Barrier(tx))?;
        rx.await.map_err(|_| ClientError::StoreClosed)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver that wakes whenever the visible task set changes.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    fn send(&self, event: StoreEvent) -> Result<()> {
        self.events.send(event).map_err(|_| ClientError::StoreClosed)
    }
}

/// Moves `store` into its own task. The loop ends, handing the store back, once
/// every [`StoreHandle`] has been dropped.
pub fn spawn_store(store: TaskStore) -> (StoreHandle, JoinHandle<TaskStore>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(store.snapshot()));

    let join = tokio::spawn(run_store(store, events_rx, snapshot_tx));
    let handle = StoreHandle {
        events: events_tx,
        snapshots: snapshot_rx,
    };
    (handle, join)
}

async fn run_store(
    mut store: TaskStore,
    mut events: mpsc::UnboundedReceiver<StoreEvent>,
    snapshots: watch::Sender<Snapshot>,
) -> TaskStore {
    while let Some(event) = events.recv().await {
        if store.apply(event) {
            snapshots.send_replace(Arc::new(store.snapshot()));
        }
    }
    tracing::debug!("Task store loop finished with {} tasks", store.len());
    store
}
