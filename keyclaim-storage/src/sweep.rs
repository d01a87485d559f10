//! Expiry Sweep Background Task
//!
//! Expired claims are already invisible to every operation, since liveness
//! is checked on access. The sweep only reclaims their memory, so a partition
//! nobody touches again does not hold dead records forever.
//!
//! The task runs on a fixed interval until the shutdown channel flips to
//! `true` (or its sender is dropped), and returns its metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::store::ClaimStore;

/// Metrics for the sweep task.
#[derive(Debug, Default)]
pub struct SweepMetrics {
    /// Sweep cycles run, successful or not.
    pub cycles: AtomicU64,
    /// Expired claims removed.
    pub purged: AtomicU64,
    pub errors: AtomicU64,
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SweepMetricsSnapshot {
        SweepMetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepMetricsSnapshot {
    pub cycles: u64,
    pub purged: u64,
    pub errors: u64,
}

/// Background task that periodically purges expired claims from `store`.
///
/// # Arguments
///
/// * `store` - Store to sweep
/// * `every` - Time between sweeps; missed ticks are skipped, not bunched
/// * `shutdown_rx` - Watch receiver for the shutdown signal
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(sweep_task(Arc::clone(&store), Duration::from_secs(60), shutdown_rx));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn sweep_task(
    store: Arc<ClaimStore>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweepMetrics> {
    let metrics = Arc::new(SweepMetrics::new());

    let mut sweep_interval = interval(every);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = every.as_secs(),
        backend = store.backend_name(),
        "Claim sweep task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // A dropped sender means nobody can stop us any more.
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Claim sweep task shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                sweep_once(&store, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        purged = snapshot.purged,
        errors = snapshot.errors,
        "Claim sweep task completed"
    );

    metrics
}

/// Run one sweep cycle.
fn sweep_once(store: &ClaimStore, metrics: &SweepMetrics) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);

    match store.sweep() {
        Ok(purged) => {
            metrics.purged.fetch_add(purged as u64, Ordering::Relaxed);
        }
        Err(e) => {
            // The store already logged the failure.
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(error = %e, "Claim sweep cycle failed");
        }
    }
}
