//! Claim backend trait and backend selection.
//!
//! A backend owns the claim records of every partition. Every mutating method
//! must run its read-check-write sequence exclusively with respect to every
//! other operation on the same partition; that is the whole uniqueness
//! guarantee. The decision logic itself lives in [`keyclaim_core::slots`];
//! backends implement [`ClaimSlots`](keyclaim_core::ClaimSlots) and only
//! differ in how they store and lock records.

use std::sync::Arc;

use keyclaim_core::{
    BackendConfig, ClaimId, ClaimKey, ClaimOutcome, ClaimRecord, ClaimResult, ClaimRules,
    OwnerId, Partition, Timestamp,
};

use crate::lmdb_backend::LmdbClaimBackend;
use crate::memory::InMemoryClaimBackend;

/// Point-in-time size of a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Partitions with at least one stored record.
    pub partitions: u64,
    /// Records still live at the time the stats were taken.
    pub live_claims: u64,
}

/// Storage contract for claim tables.
///
/// Methods are synchronous: every operation is a short critical section over
/// one partition, and callers in async contexts can use them directly.
///
/// # Atomicity
///
/// - `claim`, `release` and `release_owner` are atomic per partition.
/// - Operations on different partitions never block each other on a
///   partition-level lock (they may share a shard or a write transaction).
/// - `purge_expired` re-checks expiry under the same exclusion as the
///   mutators, so a claim refreshed concurrently is never removed.
pub trait ClaimBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Install `record` in its partition according to `rules`.
    fn claim(
        &self,
        record: ClaimRecord,
        rules: &ClaimRules,
        now: Timestamp,
    ) -> ClaimResult<ClaimOutcome>;

    /// Release the claim on `key` on behalf of `owner`.
    fn release(
        &self,
        key: &ClaimKey,
        id: &ClaimId,
        owner: &OwnerId,
        rules: &ClaimRules,
        now: Timestamp,
    ) -> ClaimResult<bool>;

    /// Release every claim `owner` holds in `partition`.
    fn release_owner(
        &self,
        partition: &Partition,
        id: &ClaimId,
        owner: &OwnerId,
        rules: &ClaimRules,
        now: Timestamp,
    ) -> ClaimResult<usize>;

    /// The live record for `key`, if any.
    fn get(&self, key: &ClaimKey, now: Timestamp) -> ClaimResult<Option<ClaimRecord>>;

    /// Live records `owner` holds in `partition`.
    fn held_by(
        &self,
        partition: &Partition,
        owner: &OwnerId,
        now: Timestamp,
    ) -> ClaimResult<Vec<ClaimRecord>>;

    /// Remove every record expired at `now`, across all partitions.
    fn purge_expired(&self, now: Timestamp) -> ClaimResult<usize>;

    /// Drop every record.
    fn clear(&self) -> ClaimResult<()>;

    fn stats(&self, now: Timestamp) -> ClaimResult<BackendStats>;
}

/// Open the backend described by `config`.
///
/// # Errors
///
/// Returns a storage error if an LMDB environment cannot be opened, or a
/// config error for an invalid shard count.
pub fn open_backend(config: &BackendConfig) -> ClaimResult<Arc<dyn ClaimBackend>> {
    let backend: Arc<dyn ClaimBackend> = match config {
        BackendConfig::Memory { shards: None } => Arc::new(InMemoryClaimBackend::new()),
        BackendConfig::Memory {
            shards: Some(shards),
        } => Arc::new(InMemoryClaimBackend::with_shards(*shards)?),
        BackendConfig::Lmdb { path, max_size_mb } => {
            Arc::new(LmdbClaimBackend::new(path, *max_size_mb)?)
        }
    };

    tracing::debug!(backend = backend.name(), "Opened claim backend");
    Ok(backend)
}
