//! Application state shared across handlers.

use crate::metrics;
use std::sync::Arc;
use tessera_core::config::AppConfig;
use tessera_core::{KeyResolver, ResolvedImage};
use tessera_origin::OriginClients;
use tessera_storage::ObjectStore;
use tessera_sync::Populator;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

/// Bounded set of fire-and-forget populate jobs.
///
/// A job that finds every slot busy is dropped; the next miss for the same key
/// schedules it again. Shutdown closes the set and waits for running jobs.
#[derive(Clone)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
}

impl BackgroundTasks {
    pub fn new(concurrency: usize) -> Self {
        Self {
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Populate `image` in the background. Returns false when the job was
    /// dropped.
    pub fn spawn_populate(&self, populator: Populator, image: ResolvedImage) -> bool {
        if self.tracker.is_closed() {
            tracing::debug!(key = %image.key, "Shutting down, populate not scheduled");
            return false;
        }
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            metrics::BACKGROUND_JOBS_REJECTED.inc();
            tracing::warn!(key = %image.key, "Background populate slots exhausted, dropping job");
            return false;
        };

        metrics::BACKGROUND_JOBS_ACTIVE.inc();
        self.tracker.spawn(async move {
            let outcome = populator.populate(&image, false).await;
            metrics::record_populate(outcome);
            metrics::BACKGROUND_JOBS_ACTIVE.dec();
            drop(permit);
        });
        true
    }

    /// Stop accepting jobs.
    pub fn close(&self) {
        self.tracker.close();
    }

    /// Wait for every running job. Returns immediately when nothing is
    /// running, even if the set is still open.
    pub async fn wait_idle(&self) {
        if self.tracker.is_closed() {
            self.tracker.wait().await;
            return;
        }
        // TaskTracker::wait only resolves once closed
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Cache store.
    pub storage: Arc<dyn ObjectStore>,
    /// Origin token, metadata and content clients.
    pub origin: OriginClients,
    pub resolver: KeyResolver,
    pub populator: Populator,
    pub background: BackgroundTasks,
}

impl AppState {
    pub fn new(config: AppConfig, storage: Arc<dyn ObjectStore>, origin: OriginClients) -> Self {
        let resolver = KeyResolver::from_config(&config.origin);
        let populator = Populator::new(storage.clone(), origin.fetcher.clone());
        let background = BackgroundTasks::new(config.server.background_concurrency);

        Self {
            config: Arc::new(config),
            storage,
            origin,
            resolver,
            populator,
            background,
        }
    }
}
