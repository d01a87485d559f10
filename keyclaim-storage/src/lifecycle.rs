//! Start/stop hook for the claim store.
//!
//! A host process builds one [`ClaimStoreRuntime`] at startup, calls
//! [`start`](ClaimStoreRuntime::start) once its tokio runtime is up and
//! [`stop`](ClaimStoreRuntime::stop) on shutdown. Between the two the store
//! is open and a sweep task purges expired claims in the background.

use std::sync::Arc;
use std::time::Duration;

use keyclaim_core::{ClaimConfig, ClaimResult, StorageError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::store::ClaimStore;
use crate::sweep::{sweep_task, SweepMetrics, SweepMetricsSnapshot};

struct RunningSweep {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<Arc<SweepMetrics>>,
}

/// Owns the claim store and its background sweep.
pub struct ClaimStoreRuntime {
    store: Arc<ClaimStore>,
    sweep_interval: Duration,
    running: Option<RunningSweep>,
}

impl ClaimStoreRuntime {
    /// Wrap an existing store. The store's configured sweep interval is used.
    pub fn new(store: Arc<ClaimStore>) -> Self {
        let sweep_interval = store.sweep_interval();
        Self {
            store,
            sweep_interval,
            running: None,
        }
    }

    /// Build the backend and store described by `config`.
    pub fn from_config(config: &ClaimConfig) -> ClaimResult<Self> {
        Ok(Self::new(Arc::new(ClaimStore::from_config(config)?)))
    }

    /// Handle to the store for callers.
    pub fn store(&self) -> Arc<ClaimStore> {
        Arc::clone(&self.store)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Open the store and spawn the sweep task on the current tokio runtime.
    ///
    /// Calling `start` on a running runtime does nothing.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` when called outside a tokio
    /// runtime. The store is left closed in that case.
    pub fn start(&mut self) -> ClaimResult<()> {
        if self.running.is_some() {
            tracing::debug!("Claim store runtime already started");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            StorageError::Unavailable {
                reason: format!("no tokio runtime to run the sweep on: {}", e),
            }
        })?;

        self.store.open()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(sweep_task(
            Arc::clone(&self.store),
            self.sweep_interval,
            shutdown_rx,
        ));
        self.running = Some(RunningSweep {
            shutdown_tx,
            handle,
        });

        tracing::info!(
            backend = self.store.backend_name(),
            sweep_interval_secs = self.sweep_interval.as_secs(),
            "Claim store runtime started"
        );
        Ok(())
    }

    /// Stop the sweep, close the store and drop every claim.
    ///
    /// Returns the sweep task's final metrics, or `None` if the runtime was
    /// not running or the task could not be joined.
    pub async fn stop(&mut self) -> ClaimResult<Option<SweepMetricsSnapshot>> {
        let Some(running) = self.running.take() else {
            return Ok(None);
        };

        // The task also exits if the receiver sees the sender dropped.
        let _ = running.shutdown_tx.send(true);

        let snapshot = match running.handle.await {
            Ok(metrics) => Some(metrics.snapshot()),
            Err(e) => {
                tracing::error!(error = %e, "Claim sweep task did not shut down cleanly");
                None
            }
        };

        self.store.close()?;
        tracing::info!("Claim store runtime stopped");
        Ok(snapshot)
    }
}

impl Drop for ClaimStoreRuntime {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            tracing::warn!("Claim store runtime dropped without stop; sweep task signalled");
            let _ = running.shutdown_tx.send(true);
        }
    }
}
