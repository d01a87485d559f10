//! The claim store facade.
//!
//! [`ClaimStore`] is what callers hold. It resolves the partition, reads the
//! clock once per operation, stamps expiry, delegates the atomic decision to
//! the backend and records the outcome in logs and metrics.
//!
//! A store starts closed. Until [`open`](ClaimStore::open) is called (usually
//! by [`ClaimStoreRuntime::start`](crate::ClaimStoreRuntime::start)) every
//! operation fails with `StorageError::Unavailable`, which callers must treat
//! as "uniqueness not verified".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;

use keyclaim_core::{
    ClaimConfig, ClaimError, ClaimId, ClaimKey, ClaimOutcome, ClaimRecord, ClaimResult,
    ClaimRules, ClaimValue, Clock, ExpiryPolicy, OwnerId, Partition, StorageError, SystemClock,
};

use crate::backend::{open_backend, BackendStats, ClaimBackend};

// ============================================================================
// METRICS
// ============================================================================

/// Counters for claim store activity since the store was built.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    pub claims_created: AtomicU64,
    pub claims_refreshed: AtomicU64,
    pub claims_superseded: AtomicU64,
    /// Claims rejected because another owner held the value.
    pub conflicts: AtomicU64,
    /// Live claims removed by release or release-by-owner.
    pub released: AtomicU64,
    /// Releases rejected because the claim belonged to someone else.
    pub releases_rejected: AtomicU64,
    /// Expired claims removed by sweeps.
    pub expired_purged: AtomicU64,
    /// Operations that could not verify uniqueness.
    pub internal_errors: AtomicU64,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> StoreMetricsSnapshot {
        StoreMetricsSnapshot {
            claims_created: self.claims_created.load(Ordering::Relaxed),
            claims_refreshed: self.claims_refreshed.load(Ordering::Relaxed),
            claims_superseded: self.claims_superseded.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            releases_rejected: self.releases_rejected.load(Ordering::Relaxed),
            expired_purged: self.expired_purged.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of store metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreMetricsSnapshot {
    pub claims_created: u64,
    pub claims_refreshed: u64,
    pub claims_superseded: u64,
    pub conflicts: u64,
    pub released: u64,
    pub releases_rejected: u64,
    pub expired_purged: u64,
    pub internal_errors: u64,
}

// ============================================================================
// STORE
// ============================================================================

/// Process-wide claim store.
///
/// Share it behind an `Arc`; all methods take `&self`.
pub struct ClaimStore {
    backend: Arc<dyn ClaimBackend>,
    clock: Arc<dyn Clock>,
    expiry: ExpiryPolicy,
    rules: ClaimRules,
    default_partition: Partition,
    sweep_interval: Duration,
    /// Operations hold the read side for their whole duration, so `close`
    /// never clears the table underneath an in-flight claim.
    open: RwLock<bool>,
    metrics: StoreMetrics,
}

impl ClaimStore {
    /// Build a closed store over `backend` using the wall clock.
    ///
    /// # Errors
    ///
    /// Returns a config error if `config` does not validate.
    pub fn new(config: &ClaimConfig, backend: Arc<dyn ClaimBackend>) -> ClaimResult<Self> {
        Self::with_clock(config, backend, Arc::new(SystemClock))
    }

    /// Build a closed store with an explicit time source.
    pub fn with_clock(
        config: &ClaimConfig,
        backend: Arc<dyn ClaimBackend>,
        clock: Arc<dyn Clock>,
    ) -> ClaimResult<Self> {
        config.validate()?;

        Ok(Self {
            backend,
            clock,
            expiry: config.expiry_policy()?,
            rules: config.rules(),
            default_partition: config.default_partition.clone(),
            sweep_interval: config.sweep_interval,
            open: RwLock::new(false),
            metrics: StoreMetrics::new(),
        })
    }

    /// Validate `config`, open its backend and build a closed store on it.
    pub fn from_config(config: &ClaimConfig) -> ClaimResult<Self> {
        config.validate()?;
        let backend = open_backend(&config.backend)?;
        Self::new(config, backend)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start accepting operations.
    pub fn open(&self) -> ClaimResult<()> {
        let mut open = self.open.write().map_err(|_| StorageError::LockPoisoned)?;
        if !*open {
            *open = true;
            tracing::info!(
                backend = self.backend.name(),
                ttl_secs = self.expiry.ttl().as_secs(),
                default_partition = %self.default_partition,
                "Claim store opened"
            );
        }
        Ok(())
    }

    /// Stop accepting operations and drop every claim.
    ///
    /// Waits for in-flight operations to finish first.
    pub fn close(&self) -> ClaimResult<()> {
        let mut open = self.open.write().map_err(|_| StorageError::LockPoisoned)?;
        *open = false;
        self.backend
            .clear()
            .map_err(|e| self.internal("close", e))?;
        tracing::info!(backend = self.backend.name(), "Claim store closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open.read().map(|open| *open).unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Claim `value` for `owner` in `partition` (or the default partition).
    ///
    /// # Errors
    ///
    /// - `ClaimError::Conflict` if another owner holds a live claim on the
    ///   value. Nothing is modified.
    /// - A storage error if the store is closed or the backend failed.
    pub fn claim(
        &self,
        id: ClaimId,
        value: ClaimValue,
        owner: OwnerId,
        partition: Option<&Partition>,
    ) -> ClaimResult<ClaimOutcome> {
        let _open = self.gate("claim")?;
        let now = self.clock.now();
        let (claimed_at, expires_at) = self.expiry.stamp(now);

        let key = ClaimKey {
            partition: self.partition(partition).clone(),
            value,
        };
        let record = ClaimRecord {
            id,
            key: key.clone(),
            owner: owner.clone(),
            claimed_at,
            expires_at,
        };

        match self.backend.claim(record, &self.rules, now) {
            Ok(outcome) => {
                let counter = match &outcome {
                    ClaimOutcome::Created => &self.metrics.claims_created,
                    ClaimOutcome::Refreshed => &self.metrics.claims_refreshed,
                    ClaimOutcome::Superseded { .. } => &self.metrics.claims_superseded,
                };
                counter.fetch_add(1, Ordering::Relaxed);

                tracing::debug!(
                    partition = %key.partition,
                    value = %key.value,
                    owner = %owner,
                    outcome = %outcome,
                    expires_at = %expires_at,
                    "Claim granted"
                );
                Ok(outcome)
            }
            Err(e) if e.is_conflict() => {
                self.metrics.conflicts.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    partition = %key.partition,
                    value = %key.value,
                    owner = %owner,
                    "Claim rejected, value held by another owner"
                );
                Err(e)
            }
            Err(e) => Err(self.internal("claim", e)),
        }
    }

    /// Release `owner`'s claim on `value`.
    ///
    /// Returns `Ok(true)` if a live claim was removed and `Ok(false)` if the
    /// value was not (or no longer) claimed.
    ///
    /// # Errors
    ///
    /// - `ClaimError::ClaimedByAnotherOwner` if a different owner (or, with
    ///   id matching, a different claim id) holds the value. The claim stays.
    /// - A storage error if the store is closed or the backend failed.
    pub fn release(
        &self,
        id: &ClaimId,
        value: &ClaimValue,
        owner: &OwnerId,
        partition: Option<&Partition>,
    ) -> ClaimResult<bool> {
        let _open = self.gate("release")?;
        let now = self.clock.now();
        let key = ClaimKey {
            partition: self.partition(partition).clone(),
            value: value.clone(),
        };

        match self.backend.release(&key, id, owner, &self.rules, now) {
            Ok(released) => {
                if released {
                    self.metrics.released.fetch_add(1, Ordering::Relaxed);
                }
                tracing::debug!(
                    partition = %key.partition,
                    value = %key.value,
                    owner = %owner,
                    released,
                    "Claim release"
                );
                Ok(released)
            }
            Err(e @ ClaimError::ClaimedByAnotherOwner { .. }) => {
                self.metrics.releases_rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    partition = %key.partition,
                    value = %key.value,
                    owner = %owner,
                    claim_id = %id,
                    "Release rejected, claim held by another owner"
                );
                Err(e)
            }
            Err(e) => Err(self.internal("release", e)),
        }
    }

    /// Release every claim `owner` holds in `partition`.
    ///
    /// Returns the number of live claims removed; zero is not an error.
    pub fn release_owner(
        &self,
        id: &ClaimId,
        owner: &OwnerId,
        partition: Option<&Partition>,
    ) -> ClaimResult<usize> {
        let _open = self.gate("release_owner")?;
        let now = self.clock.now();
        let partition = self.partition(partition);

        let released = self
            .backend
            .release_owner(partition, id, owner, &self.rules, now)
            .map_err(|e| self.internal("release_owner", e))?;

        self.metrics
            .released
            .fetch_add(released as u64, Ordering::Relaxed);
        tracing::debug!(
            partition = %partition,
            owner = %owner,
            released,
            "Released owner claims"
        );
        Ok(released)
    }

    /// The live claim on `value`, if any.
    pub fn lookup(
        &self,
        value: &ClaimValue,
        partition: Option<&Partition>,
    ) -> ClaimResult<Option<ClaimRecord>> {
        let _open = self.gate("lookup")?;
        let key = ClaimKey {
            partition: self.partition(partition).clone(),
            value: value.clone(),
        };
        self.backend
            .get(&key, self.clock.now())
            .map_err(|e| self.internal("lookup", e))
    }

    /// Live claims `owner` holds in `partition`.
    pub fn held_by(
        &self,
        owner: &OwnerId,
        partition: Option<&Partition>,
    ) -> ClaimResult<Vec<ClaimRecord>> {
        let _open = self.gate("held_by")?;
        self.backend
            .held_by(self.partition(partition), owner, self.clock.now())
            .map_err(|e| self.internal("held_by", e))
    }

    /// Remove every claim that has expired by now. Returns how many went.
    pub fn sweep(&self) -> ClaimResult<usize> {
        let _open = self.gate("sweep")?;
        let purged = self
            .backend
            .purge_expired(self.clock.now())
            .map_err(|e| self.internal("sweep", e))?;

        self.metrics
            .expired_purged
            .fetch_add(purged as u64, Ordering::Relaxed);
        if purged > 0 {
            tracing::debug!(purged, "Purged expired claims");
        } else {
            tracing::trace!("Sweep found no expired claims");
        }
        Ok(purged)
    }

    pub fn stats(&self) -> ClaimResult<BackendStats> {
        let _open = self.gate("stats")?;
        self.backend
            .stats(self.clock.now())
            .map_err(|e| self.internal("stats", e))
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn metrics(&self) -> StoreMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn ttl(&self) -> Duration {
        self.expiry.ttl()
    }

    pub fn default_partition(&self) -> &Partition {
        &self.default_partition
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn partition<'a>(&'a self, partition: Option<&'a Partition>) -> &'a Partition {
        partition.unwrap_or(&self.default_partition)
    }

    /// Read guard proving the store is open for the rest of the operation.
    fn gate(&self, operation: &'static str) -> ClaimResult<RwLockReadGuard<'_, bool>> {
        let open = self
            .open
            .read()
            .map_err(|_| self.internal(operation, StorageError::LockPoisoned.into()))?;
        if !*open {
            return Err(self.internal(
                operation,
                StorageError::Unavailable {
                    reason: "claim store is not open".to_string(),
                }
                .into(),
            ));
        }
        Ok(open)
    }

    /// Record and log a failure that left uniqueness unverified.
    fn internal(&self, operation: &'static str, error: ClaimError) -> ClaimError {
        self.metrics.internal_errors.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            operation,
            backend = self.backend.name(),
            error = %error,
            "Claim store operation failed"
        );
        error
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryClaimBackend;
    use keyclaim_core::ManualClock;

    fn open_store() -> (ClaimStore, ManualClock) {
        let clock = ManualClock::starting_now();
        let store = ClaimStore::with_clock(
            &ClaimConfig::default(),
            Arc::new(InMemoryClaimBackend::new()),
            Arc::new(clock.clone()),
        )
        .unwrap();
        store.open().unwrap();
        (store, clock)
    }

    #[test]
    fn test_store_starts_closed() {
        let store =
            ClaimStore::new(&ClaimConfig::default(), Arc::new(InMemoryClaimBackend::new()))
                .unwrap();
        assert!(!store.is_open());

        let err = store
            .claim(
                ClaimId::new("c1"),
                ClaimValue::new("a@x"),
                OwnerId::new("u1"),
                None,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ClaimError::Storage(StorageError::Unavailable { .. })
        ));
        assert!(err.is_internal());
        assert_eq!(store.metrics().internal_errors, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ClaimConfig {
            ttl: Duration::ZERO,
            ..ClaimConfig::default()
        };
        let result = ClaimStore::new(&config, Arc::new(InMemoryClaimBackend::new()));
        assert!(matches!(result, Err(ClaimError::Config(_))));
    }

    #[test]
    fn test_claim_stamps_expiry_from_clock() {
        let (store, clock) = open_store();
        store
            .claim(
                ClaimId::new("c1"),
                ClaimValue::new("a@x"),
                OwnerId::new("u1"),
                None,
            )
            .unwrap();

        let record = store
            .lookup(&ClaimValue::new("a@x"), None)
            .unwrap()
            .unwrap();
        assert_eq!(record.claimed_at, clock.now());
        assert_eq!(record.expires_at - record.claimed_at, chrono::Duration::hours(1));
        assert_eq!(record.key.partition, Partition::new("default"));
    }

    #[test]
    fn test_explicit_partition_is_separate_from_default() {
        let (store, _clock) = open_store();
        let handles = Partition::new("handles");

        store
            .claim(
                ClaimId::new("c1"),
                ClaimValue::new("bob"),
                OwnerId::new("u1"),
                Some(&handles),
            )
            .unwrap();

        assert!(store
            .lookup(&ClaimValue::new("bob"), None)
            .unwrap()
            .is_none());
        assert!(store
            .lookup(&ClaimValue::new("bob"), Some(&handles))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_metrics_track_outcomes() {
        let (store, _clock) = open_store();
        let value = ClaimValue::new("a@x");

        store
            .claim(ClaimId::new("c1"), value.clone(), OwnerId::new("u1"), None)
            .unwrap();
        store
            .claim(ClaimId::new("c2"), value.clone(), OwnerId::new("u1"), None)
            .unwrap();
        assert!(store
            .claim(ClaimId::new("c3"), value.clone(), OwnerId::new("u2"), None)
            .is_err());
        assert!(store
            .release(&ClaimId::new("c3"), &value, &OwnerId::new("u2"), None)
            .is_err());
        assert!(store
            .release(&ClaimId::new("c2"), &value, &OwnerId::new("u1"), None)
            .unwrap());

        let metrics = store.metrics();
        assert_eq!(metrics.claims_created, 1);
        assert_eq!(metrics.claims_refreshed, 1);
        assert_eq!(metrics.conflicts, 1);
        assert_eq!(metrics.releases_rejected, 1);
        assert_eq!(metrics.released, 1);
        assert_eq!(metrics.internal_errors, 0);
    }

    #[test]
    fn test_sweep_uses_store_clock() {
        let (store, clock) = open_store();
        store
            .claim(
                ClaimId::new("c1"),
                ClaimValue::new("a@x"),
                OwnerId::new("u1"),
                None,
            )
            .unwrap();

        assert_eq!(store.sweep().unwrap(), 0);
        clock.advance(Duration::from_secs(3600));
        assert_eq!(store.sweep().unwrap(), 1);
        assert_eq!(store.metrics().expired_purged, 1);
        assert_eq!(store.stats().unwrap().live_claims, 0);
    }

    #[test]
    fn test_close_drops_claims_and_reopen_starts_empty() {
        let (store, _clock) = open_store();
        store
            .claim(
                ClaimId::new("c1"),
                ClaimValue::new("a@x"),
                OwnerId::new("u1"),
                None,
            )
            .unwrap();

        store.close().unwrap();
        assert!(!store.is_open());
        assert!(store.lookup(&ClaimValue::new("a@x"), None).is_err());

        store.open().unwrap();
        assert!(store
            .lookup(&ClaimValue::new("a@x"), None)
            .unwrap()
            .is_none());
    }
}
