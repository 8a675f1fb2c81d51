use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{TaskAction, TaskApi};
use crate::channel::{Connector, LiveChannel, StatisticsHandler};
use crate::error::Result;
use crate::import::{BulkImportReport, BulkImporter, ImportRules};
use crate::models::{CreateTaskRequest, DownloadTask};
use crate::ordering;
use crate::poller::{self, Poller};
use crate::store::{spawn_store, StoreHandle, TaskStore};

/// One client session: the task store plus the background writers feeding it,
/// and the user actions whose results are routed back into the store.
pub struct Session<A: ?Sized> {
    api: Arc<A>,
    store: StoreHandle,
    importer: BulkImporter<A>,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl<A: TaskApi + ?Sized + 'static> Session<A> {
    /// Spawns an empty store. Nothing polls or listens until the `start_*` calls.
    pub fn new(api: Arc<A>, rules: ImportRules) -> Self {
        let (store, _join) = spawn_store(TaskStore::new());
        Self {
            importer: BulkImporter::new(api.clone(), rules),
            api,
            store,
            shutdown: CancellationToken::new(),
            workers: Vec::new(),
        }
    }

    pub fn start_poller(&mut self, interval: Duration) {
        let poller = Poller::new(self.api.clone(), self.store.clone(), interval);
        self.workers.push(tokio::spawn(poller.run(self.shutdown.clone())));
    }

    pub fn start_channel<C>(
        &mut self,
        connector: Arc<C>,
        reconnect_delay: Duration,
        idle_timeout: Option<Duration>,
        on_statistics: Option<StatisticsHandler>,
    ) where
        C: Connector + ?Sized + 'static,
    {
        let store = self.store.clone();
        let mut channel = LiveChannel::new(connector, reconnect_delay, move |delta| {
            if store.apply_delta(delta).is_err() {
                tracing::debug!("Task store closed; dropping live update");
            }
        });
        if let Some(limit) = idle_timeout {
            channel = channel.idle_timeout(limit);
        }
        if let Some(handler) = on_statistics {
            channel = channel.on_statistics(handler);
        }
        self.workers.push(tokio::spawn(channel.run(self.shutdown.clone())));
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Current tasks in display order.
    pub fn ordered_tasks(&self) -> Vec<DownloadTask> {
        ordering::display_order(&self.store.snapshot())
    }

    /// Runs one poll cycle right now, outside the regular schedule.
    pub async fn refresh(&self) -> Result<usize> {
        poller::reconcile(self.api.as_ref(), &self.store).await
    }

    /// Creates a task and makes it visible immediately, ahead of the next poll.
    pub async fn create(&self, request: &CreateTaskRequest) -> Result<DownloadTask> {
        let task = self.api.create_task(request).await?;
        tracing::info!("Download task created: {} - {}", task.id, task.title);
        self.store.upsert(task.clone())?;
        Ok(task)
    }

    pub async fn cancel(&self, id: &str) -> Result<DownloadTask> {
        self.act(id, TaskAction::Cancel).await
    }

    pub async fn pause(&self, id: &str) -> Result<DownloadTask> {
        self.act(id, TaskAction::Pause).await
    }

    pub async fn resume(&self, id: &str) -> Result<DownloadTask> {
        self.act(id, TaskAction::Resume).await
    }

    pub async fn retry(&self, id: &str) -> Result<DownloadTask> {
        self.act(id, TaskAction::Retry).await
    }

    /// The store only changes once the backend has confirmed the deletion.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.api.delete_task(id).await?;
        tracing::info!("Task {} deleted", id);
        self.store.remove(id)
    }

    pub async fn import_text(&self, text: &str, resolution: &str) -> BulkImportReport {
        self.importer.import_text(text, resolution).await
    }

    pub async fn import_file(&self, path: impl AsRef<Path>, resolution: &str) -> Result<BulkImportReport> {
        self.importer.import_file(path, resolution).await
    }

    /// Stops the poller and the live channel and waits for both to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!("Session worker ended abnormally: {}", e);
            }
        }
    }

    // The action's own response carries no task, so the authoritative state is re-read.
    async fn act(&self, id: &str, action: TaskAction) -> Result<DownloadTask> {
        self.api.run_action(id, action).await?;
        let task = self.api.get_task(id).await?;
        tracing::info!("Task {} {}: now {}", id, action.as_str(), task.status);
        self.store.upsert(task.clone())?;
        Ok(task)
    }
}
