//! Sharded in-memory claim backend.
//!
//! Partitions map to [`ClaimTable`]s in a [`DashMap`]. Each operation holds
//! the shard guard for its partition across the whole read-check-write, so
//! two claims on the same partition are serialized while partitions in other
//! shards proceed in parallel.

use dashmap::DashMap;
use keyclaim_core::{
    ClaimId, ClaimKey, ClaimOutcome, ClaimRecord, ClaimResult, ClaimRules, ClaimTable,
    ConfigError, OwnerId, Partition, Timestamp,
};

use crate::backend::{BackendStats, ClaimBackend};

/// In-process claim tables. Claims are lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryClaimBackend {
    partitions: DashMap<Partition, ClaimTable>,
}

impl InMemoryClaimBackend {
    pub fn new() -> Self {
        Self {
            partitions: DashMap::new(),
        }
    }

    /// Create a backend with an explicit shard count.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` unless `shards` is a power of two
    /// greater than one.
    pub fn with_shards(shards: usize) -> ClaimResult<Self> {
        if shards < 2 || !shards.is_power_of_two() {
            return Err(ConfigError::InvalidValue {
                field: "backend.shards".to_string(),
                value: shards.to_string(),
                reason: "shard count must be a power of two greater than one".to_string(),
            }
            .into());
        }
        Ok(Self {
            partitions: DashMap::with_shard_amount(shards),
        })
    }

    /// Drop the partition's table if the last record just left it.
    ///
    /// `remove_if` re-checks under the shard lock, so a claim that lands in
    /// between keeps the table alive.
    fn drop_if_empty(&self, partition: &Partition) {
        self.partitions.remove_if(partition, |_, table| table.is_empty());
    }
}

impl ClaimBackend for InMemoryClaimBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn claim(
        &self,
        record: ClaimRecord,
        rules: &ClaimRules,
        now: Timestamp,
    ) -> ClaimResult<ClaimOutcome> {
        let mut table = self
            .partitions
            .entry(record.key.partition.clone())
            .or_default();
        table.claim(record, rules, now)
    }

    fn release(
        &self,
        key: &ClaimKey,
        id: &ClaimId,
        owner: &OwnerId,
        rules: &ClaimRules,
        now: Timestamp,
    ) -> ClaimResult<bool> {
        let released = {
            let Some(mut table) = self.partitions.get_mut(&key.partition) else {
                return Ok(false);
            };
            table.release(key, id, owner, rules, now)?
        };

        self.drop_if_empty(&key.partition);
        Ok(released)
    }

    fn release_owner(
        &self,
        partition: &Partition,
        id: &ClaimId,
        owner: &OwnerId,
        rules: &ClaimRules,
        now: Timestamp,
    ) -> ClaimResult<usize> {
        let released = {
            let Some(mut table) = self.partitions.get_mut(partition) else {
                return Ok(0);
            };
            table.release_owner(id, owner, rules, now)?
        };

        self.drop_if_empty(partition);
        Ok(released)
    }

    fn get(&self, key: &ClaimKey, now: Timestamp) -> ClaimResult<Option<ClaimRecord>> {
        Ok(self
            .partitions
            .get(&key.partition)
            .and_then(|table| table.get(&key.value, now)))
    }

    fn held_by(
        &self,
        partition: &Partition,
        owner: &OwnerId,
        now: Timestamp,
    ) -> ClaimResult<Vec<ClaimRecord>> {
        Ok(self
            .partitions
            .get(partition)
            .map(|table| table.held_by(owner, now))
            .unwrap_or_default())
    }

    fn purge_expired(&self, now: Timestamp) -> ClaimResult<usize> {
        let mut purged = 0;
        self.partitions.retain(|_, table| {
            purged += table.purge_expired(now);
            !table.is_empty()
        });
        Ok(purged)
    }

    fn clear(&self) -> ClaimResult<()> {
        self.partitions.clear();
        Ok(())
    }

    fn stats(&self, now: Timestamp) -> ClaimResult<BackendStats> {
        let mut stats = BackendStats::default();
        for entry in self.partitions.iter() {
            stats.partitions += 1;
            stats.live_claims += entry.value().live_count(now) as u64;
        }
        Ok(stats)
    }
}

// =============================================================================
// TESTS
// =============================================================================
