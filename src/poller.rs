use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::TaskApi;
use crate::error::Result;
use crate::store::StoreHandle;

/// `tokio::time::interval` panics on a zero period.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Fetches the full task list once and hands it to the store as a wholesale replacement.
/// A failed fetch leaves the store untouched.
pub async fn reconcile<A: TaskApi + ?Sized>(api: &A, store: &StoreHandle) -> Result<usize> {
    let tasks = api.list_tasks().await?;
    let count = tasks.len();
    store.replace_all(tasks)?;
    Ok(count)
}

/// Periodically fetches the full task list and replaces the store's contents with it.
/// This is the reconciliation backstop for anything the live channel missed.
pub struct Poller<A: ?Sized> {
    api: Arc<A>,
    store: StoreHandle,
    interval: Duration,
}

impl<A: TaskApi + ?Sized> Poller<A> {
    pub fn new(api: Arc<A>, store: StoreHandle, interval: Duration) -> Self {
        Self {
            api,
            store,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn poll_once(&self) -> Result<usize> {
        reconcile(self.api.as_ref(), &self.store).await
    }

    /// Ticks forever until `shutdown` fires. Errors are logged and the next tick retries.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.poll_once().await {
                Ok(count) => tracing::debug!("Poll refreshed {} tasks", count),
                Err(e) => tracing::warn!("Task poll failed, keeping cached state: {}", e),
            }
        }
        tracing::info!("Poller stopped.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockApi;
    use crate::models::{DownloadTask, TaskStatus};
    use crate::store::tests::{delta, task};
    use crate::store::{spawn_store, TaskStore};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use tokio::sync::{oneshot, Mutex};

    #[tokio::test]
    async fn successful_poll_replaces_store() {
        let (store, _join) = spawn_store(TaskStore::new());
        store.upsert(task("stale", TaskStatus::Pending, 1)).unwrap();

        let api = Arc::new(MockApi::with_tasks(vec![task("a", TaskStatus::Downloading, 2)]));
        let poller = Poller::new(api, store.clone(), Duration::from_secs(5));

        assert_eq!(poller.poll_once().await.unwrap(), 1);
        store.flush().await.unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "a");
    }

    #[tokio::test]
    async fn failed_poll_keeps_previous_state() {
        let (store, _join) = spawn_store(TaskStore::new());
        store.replace_all(vec![task("a", TaskStatus::Pending, 1)]).unwrap();

        let api = Arc::new(MockApi::default());
        *api.fail_listing.lock().unwrap() = true;
        let poller = Poller::new(api, store.clone(), Duration::from_secs(5));

        assert!(poller.poll_once().await.is_err());
        store.flush().await.unwrap();
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_polling_on_a_fixed_interval_through_failures() {
        let (store, _join) = spawn_store(TaskStore::new());
        let api = Arc::new(MockApi::default());
        *api.fail_listing.lock().unwrap() = true;

        let shutdown = CancellationToken::new();
        let poller = Poller::new(api.clone(), store.clone(), Duration::from_secs(5));
        let running = tokio::spawn(poller.run(shutdown.clone()));

        // First tick fires immediately, then one every five seconds.
        time::sleep(Duration::from_millis(12_500)).await;
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 3);

        *api.fail_listing.lock().unwrap() = false;
        api.tasks.lock().unwrap().push(task("late", TaskStatus::Pending, 1));
        time::sleep(Duration::from_secs(5)).await;
        store.flush().await.unwrap();
        assert_eq!(store.snapshot().len(), 1);

        shutdown.cancel();
        running.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_raised_to_the_minimum() {
        let (store, _join) = spawn_store(TaskStore::new());
        let api = Arc::new(MockApi::with_tasks(vec![task("a", TaskStatus::Pending, 1)]));

        let poller = Poller::new(api.clone(), store.clone(), Duration::ZERO);
        assert_eq!(poller.interval(), Duration::from_secs(1));

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(poller.run(shutdown.clone()));
        time::sleep(Duration::from_millis(2_500)).await;

        assert_eq!(api.list_calls.load(Ordering::SeqCst), 3);
        store.flush().await.unwrap();
        assert_eq!(store.snapshot().len(), 1);

        shutdown.cancel();
        running.await.unwrap();
    }

    /// Serves one list response only when the test releases it.
    struct GatedApi {
        response: Vec<DownloadTask>,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    #[async_trait]
    impl TaskApi for GatedApi {
        async fn list_tasks(&self) -> Result<Vec<DownloadTask>> {
            if let Some(gate) = self.gate.lock().await.take() {
                let _ = gate.await;
            }
            Ok(self.response.clone())
        }

        async fn get_task(&self, _id: &str) -> Result<DownloadTask> {
            unimplemented!()
        }

        async fn create_task(&self, _request: &crate::models::CreateTaskRequest) -> Result<DownloadTask> {
            unimplemented!()
        }

        async fn run_action(&self, _id: &str, _action: crate::api::TaskAction) -> Result<()> {
            unimplemented!()
        }

        async fn delete_task(&self, _id: &str) -> Result<()> {
            unimplemented!()
        }

        async fn submit_bulk_urls(
            &self,
            _request: &crate::models::BulkImportRequest,
        ) -> Result<crate::models::BulkImportResult> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn poll_resolving_after_delta_reverts_to_older_data() {
        let (store, _join) = spawn_store(TaskStore::new());
        store.replace_all(vec![task("x", TaskStatus::Pending, 1)]).unwrap();

        let (release, gate) = oneshot::channel();
        let api = Arc::new(GatedApi {
            response: vec![task("x", TaskStatus::Pending, 1)],
            gate: Mutex::new(Some(gate)),
        });
        let poller = Poller::new(api, store.clone(), Duration::from_secs(5));

        // The poll is in flight when the delta arrives.
        let in_flight = tokio::spawn(async move { poller.poll_once().await });
        tokio::task::yield_now().await;

        store.apply_delta(delta("x", 80.0)).unwrap();
        store.flush().await.unwrap();
        assert_eq!(store.snapshot()[0].progress, 80.0);

        release.send(()).unwrap();
        in_flight.await.unwrap().unwrap();
        store.flush().await.unwrap();

        let x = store.snapshot()[0].clone();
        assert_eq!(x.progress, 0.0);
        assert_eq!(x.status, TaskStatus::Pending);
    }
}
