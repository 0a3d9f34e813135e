//! Processor lifecycle and mode drivers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinHandle, JoinSet};

use confsync_core::{Config, StoreClient};
use confsync_sync::{SyncError, TemplateResource};

/// Supervisor poll cadence while waiting for a stop request.
const STOP_POLL: Duration = Duration::from_millis(500);

/// Drives every template resource found in the configured conf dir.
///
/// Lifecycle: `IDLE --start--> RUNNING --stop--> STOPPING --drained--> IDLE`.
/// The only cross-task state is the two atomic flags; the stored join
/// handle is the shutdown barrier.
pub struct Processor {
    config: Arc<Config>,
    running: AtomicBool,
    stop_requested: Arc<AtomicBool>,
    shutdown: broadcast::Sender<()>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Processor {
    pub fn new(config: Config) -> Self {
        let (shutdown, _) = broadcast::channel(16);
        Self {
            config: Arc::new(config),
            running: AtomicBool::new(false),
            stop_requested: Arc::new(AtomicBool::new(false)),
            shutdown,
            driver: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start processing with `client`.
    ///
    /// A second call while running is a no-op warning. Mode priority:
    /// onetime, forced interval, forced watch, then the client's watch
    /// capability decides. Onetime runs inline and returns the first
    /// per-resource error after every resource has been attempted; the
    /// other modes spawn a driver task and return immediately.
    pub async fn start(&self, client: Arc<dyn StoreClient>) -> Result<(), SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("processor is already running");
            return Ok(());
        }

        if self.config.onetime {
            tracing::debug!("using onetime mode");
            let result = run_once(&self.config, &client).await;
            self.running.store(false, Ordering::SeqCst);
            return result;
        }

        let watch = if self.config.interval_mode {
            tracing::debug!("using interval mode");
            false
        } else if self.config.watch_mode {
            tracing::debug!("using watch mode");
            true
        } else if client.watch_enabled() {
            tracing::debug!("defaulting to watch mode");
            true
        } else {
            tracing::debug!("defaulting to interval mode");
            false
        };

        let config = self.config.clone();
        let stop = self.stop_requested.clone();
        let shutdown = self.shutdown.clone();
        let handle = if watch {
            tokio::spawn(run_watch(config, client, stop, shutdown))
        } else {
            tokio::spawn(run_interval(config, client, stop, shutdown))
        };
        *self.driver.lock().await = Some(handle);
        Ok(())
    }

    /// Request shutdown, wait for every task to drain, then reset so the
    /// processor can be started again.
    pub async fn stop(&self) {
        if !self.is_running() {
            return;
        }

        self.stop_requested.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(());

        if let Some(handle) = self.driver.lock().await.take() {
            if let Err(err) = handle.await {
                tracing::error!(%err, "driver task panicked");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
        tracing::info!("processor stopped");
    }
}

// ---------------------------------------------------------------------------
// Mode drivers
// ---------------------------------------------------------------------------

async fn run_once(config: &Arc<Config>, client: &Arc<dyn StoreClient>) -> Result<(), SyncError> {
    let mut resources = TemplateResource::load_all(config, client)?;

    let mut first_error = None;
    for resource in &mut resources {
        if let Err(err) = resource.process().await {
            tracing::error!(resource = %resource.name, %err, "resource processing failed");
            config.hooks.fire_error(&resource.name, &err);
            first_error.get_or_insert(err);
        } else {
            tracing::info!(resource = %resource.name, "resource processed");
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn run_interval(
    config: Arc<Config>,
    client: Arc<dyn StoreClient>,
    stop: Arc<AtomicBool>,
    shutdown: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown.subscribe();
    let interval = config.interval();

    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }

        // Resources are rebuilt every cycle so descriptor changes are
        // picked up without a restart.
        let mut resources = match TemplateResource::load_all(&config, &client) {
            Ok(resources) => resources,
            Err(err) => {
                tracing::warn!(%err, "cannot build template resources");
                return;
            }
        };

        for resource in &mut resources {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            if let Err(err) = resource.process().await {
                tracing::error!(resource = %resource.name, %err, "resource processing failed");
                config.hooks.fire_error(&resource.name, &err);
            } else {
                tracing::info!(resource = %resource.name, "resource processed");
            }
        }

        tokio::select! {
            _ = shutdown_rx.recv() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn run_watch(
    config: Arc<Config>,
    client: Arc<dyn StoreClient>,
    stop: Arc<AtomicBool>,
    shutdown: broadcast::Sender<()>,
) {
    let resources = match TemplateResource::load_all(&config, &client) {
        Ok(resources) => resources,
        Err(err) => {
            tracing::warn!(%err, "cannot build template resources");
            return;
        }
    };

    let mut watchers = JoinSet::new();
    for resource in resources {
        watchers.spawn(watch_resource(
            resource,
            config.clone(),
            stop.clone(),
            shutdown.subscribe(),
        ));
    }
    tracing::info!(watchers = watchers.len(), "watch mode started");

    while !stop.load(Ordering::SeqCst) {
        tokio::time::sleep(STOP_POLL).await;
    }
    let _ = shutdown.send(());
    while watchers.join_next().await.is_some() {}
}

/// One long-lived watcher: block on the backend, render, repeat until a
/// stop is requested. A render in flight when the stop arrives completes
/// before the loop exits.
async fn watch_resource(
    mut resource: TemplateResource,
    config: Arc<Config>,
    stop: Arc<AtomicBool>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        if let Err(err) = resource.watch(&mut shutdown_rx).await {
            tracing::error!(resource = %resource.name, %err, "watch failed");
        }

        if let Err(err) = resource.process().await {
            tracing::error!(resource = %resource.name, %err, "resource processing failed");
            config.hooks.fire_error(&resource.name, &err);
        } else {
            tracing::info!(
                resource = %resource.name,
                index = resource.last_index(),
                "resource processed"
            );
        }
    }
    tracing::debug!(resource = %resource.name, "watcher stopped");
}
