//! LMDB-backed claim backend.
//!
//! Uses the heed crate (Rust bindings for LMDB) with two named databases:
//!
//! - `claims`: record key to the JSON-encoded [`ClaimRecord`]
//! - `owners`: owner prefix followed by the record key, to the claimed value
//!
//! Record keys and owner prefixes are SHA-256 digests of the length-prefixed
//! partition followed by the value (or owner). Every key is therefore 32 or
//! 64 bytes long whatever the caller passes, which keeps empty and very long
//! partitions inside LMDB's key size limit. An owner's claims in a partition
//! share one prefix and are found with a prefix scan.
//!
//! # Atomicity
//!
//! LMDB allows a single writer at a time, so every mutation runs as one
//! write transaction of point reads and writes through [`ClaimSlots`]. A
//! rejected claim aborts the transaction and leaves the store untouched.
//!
//! # Lifetime
//!
//! Both databases are cleared when the backend is opened. Claims are runtime
//! state and never survive a restart, even though the environment is on disk.

use std::collections::BTreeSet;
use std::path::Path;

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvFlags, EnvOpenOptions, RoTxn, RwTxn};
use keyclaim_core::{
    lmdb_map_size, slots, ClaimError, ClaimId, ClaimKey, ClaimOutcome, ClaimRecord, ClaimResult,
    ClaimRules, ClaimSlots, ClaimValue, ConfigError, OwnerId, Partition, StorageError, Timestamp,
    MAX_LMDB_MAX_SIZE_MB,
};
use sha2::{Digest, Sha256};

use crate::backend::{BackendStats, ClaimBackend};

/// Error type for LMDB claim operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbClaimError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Invalid map size: {0} MB")]
    MapSize(usize),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbClaimError> for ClaimError {
    fn from(e: LmdbClaimError) -> Self {
        let storage = match e {
            LmdbClaimError::MapSize(max_size_mb) => {
                return ClaimError::Config(ConfigError::InvalidValue {
                    field: "backend.max_size_mb".to_string(),
                    value: max_size_mb.to_string(),
                    reason: format!("max_size_mb must be between 1 and {}", MAX_LMDB_MAX_SIZE_MB),
                });
            }
            LmdbClaimError::EnvOpen(_) | LmdbClaimError::DbOpen(_) | LmdbClaimError::Io(_) => {
                StorageError::Unavailable {
                    reason: e.to_string(),
                }
            }
            LmdbClaimError::Deserialization(_) => StorageError::Corrupted {
                reason: e.to_string(),
            },
            LmdbClaimError::Transaction(_) | LmdbClaimError::Serialization(_) => {
                StorageError::TransactionFailed {
                    reason: e.to_string(),
                }
            }
        };
        ClaimError::Storage(storage)
    }
}

fn txn_error(e: heed::Error) -> LmdbClaimError {
    LmdbClaimError::Transaction(e.to_string())
}

fn decode(bytes: &[u8]) -> Result<ClaimRecord, LmdbClaimError> {
    serde_json::from_slice(bytes).map_err(|e| LmdbClaimError::Deserialization(e.to_string()))
}

fn encode(record: &ClaimRecord) -> Result<Vec<u8>, LmdbClaimError> {
    serde_json::to_vec(record).map_err(|e| LmdbClaimError::Serialization(e.to_string()))
}

/// SHA-256 of the length-prefixed partition followed by `tail`.
fn digest(partition: &Partition, tail: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((partition.as_str().len() as u64).to_be_bytes());
    hasher.update(partition.as_str().as_bytes());
    hasher.update(tail.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

fn record_key(partition: &Partition, value: &ClaimValue) -> [u8; 32] {
    digest(partition, value.as_str())
}

fn owner_prefix(partition: &Partition, owner: &OwnerId) -> [u8; 32] {
    digest(partition, owner.as_str())
}

fn index_key(partition: &Partition, owner: &OwnerId, value: &ClaimValue) -> [u8; 64] {
    let mut key = [0u8; 64];
    key[..32].copy_from_slice(&owner_prefix(partition, owner));
    key[32..].copy_from_slice(&record_key(partition, value));
    key
}

/// Claim backend on an LMDB environment.
///
/// # Example
///
/// ```ignore
/// use keyclaim_storage::LmdbClaimBackend;
///
/// let backend = LmdbClaimBackend::new("/var/lib/keyclaim", 64)?;
/// let store = ClaimStore::new(&config, Arc::new(backend))?;
/// ```
pub struct LmdbClaimBackend {
    env: Env,
    claims: Database<Bytes, Bytes>,
    owners: Database<Bytes, Str>,
}

impl LmdbClaimBackend {
    /// Open (or create) the environment at `path` and clear it.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `max_size_mb` is zero or too large for a map size
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Databases cannot be created or cleared
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbClaimError> {
        let map_size = lmdb_map_size(max_size_mb).ok_or(LmdbClaimError::MapSize(max_size_mb))?;
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per backend and the backend
        // is the only user of the directory. NO_SYNC can lose the last
        // commits on a crash, and the databases are cleared on open anyway.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(2)
                .flags(EnvFlags::NO_SYNC)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbClaimError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;

        let claims: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("claims"))
            .map_err(|e| LmdbClaimError::DbOpen(e.to_string()))?;
        let owners: Database<Bytes, Str> = env
            .create_database(&mut wtxn, Some("owners"))
            .map_err(|e| LmdbClaimError::DbOpen(e.to_string()))?;

        // Claims left over from a previous run are meaningless.
        claims.clear(&mut wtxn).map_err(txn_error)?;
        owners.clear(&mut wtxn).map_err(txn_error)?;

        wtxn.commit().map_err(txn_error)?;

        tracing::debug!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB claim backend");

        Ok(Self {
            env,
            claims,
            owners,
        })
    }

    fn read_record(&self, txn: &RoTxn, key: &[u8]) -> Result<Option<ClaimRecord>, LmdbClaimError> {
        match self.claims.get(txn, key).map_err(txn_error)? {
            Some(bytes) => decode(bytes).map(Some),
            None => Ok(None),
        }
    }

    fn owned_values(
        &self,
        txn: &RoTxn,
        partition: &Partition,
        owner: &OwnerId,
    ) -> Result<Vec<ClaimValue>, LmdbClaimError> {
        let prefix = owner_prefix(partition, owner);
        let iter = self.owners.prefix_iter(txn, &prefix[..]).map_err(txn_error)?;

        let mut values = Vec::new();
        for entry in iter {
            let (_, value) = entry.map_err(txn_error)?;
            values.push(ClaimValue::new(value));
        }
        Ok(values)
    }

    /// Run `f` against the partition's slots inside one write transaction.
    ///
    /// The transaction commits only when `f` succeeds.
    fn with_partition<R>(
        &self,
        partition: &Partition,
        f: impl FnOnce(&mut PartitionSlots<'_, '_>) -> ClaimResult<R>,
    ) -> ClaimResult<R> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;

        // An error here drops `wtxn`, which aborts it.
        let result = f(&mut PartitionSlots {
            backend: self,
            wtxn: &mut wtxn,
            partition,
        })?;

        wtxn.commit().map_err(txn_error)?;
        Ok(result)
    }

    /// Every stored record, expired ones included.
    fn load_all(&self, txn: &RoTxn) -> Result<Vec<ClaimRecord>, LmdbClaimError> {
        let iter = self.claims.iter(txn).map_err(txn_error)?;

        let mut records = Vec::new();
        for entry in iter {
            let (_, bytes) = entry.map_err(txn_error)?;
            records.push(decode(bytes)?);
        }
        Ok(records)
    }

    fn delete_record(&self, wtxn: &mut RwTxn, record: &ClaimRecord) -> Result<(), LmdbClaimError> {
        let partition = &record.key.partition;
        self.claims
            .delete(wtxn, &record_key(partition, &record.key.value)[..])
            .map_err(txn_error)?;
        self.owners
            .delete(wtxn, &index_key(partition, &record.owner, &record.key.value)[..])
            .map_err(txn_error)?;
        Ok(())
    }
}

/// One partition's records inside an open write transaction.
struct PartitionSlots<'a, 'env> {
    backend: &'a LmdbClaimBackend,
    wtxn: &'a mut RwTxn<'env>,
    partition: &'a Partition,
}

impl ClaimSlots for PartitionSlots<'_, '_> {
    fn record(&self, value: &ClaimValue) -> ClaimResult<Option<ClaimRecord>> {
        let key = record_key(self.partition, value);
        Ok(self.backend.read_record(&*self.wtxn, &key)?)
    }

    fn owned_values(&self, owner: &OwnerId) -> ClaimResult<Vec<ClaimValue>> {
        Ok(self.backend.owned_values(&*self.wtxn, self.partition, owner)?)
    }

    fn store(&mut self, record: ClaimRecord) -> ClaimResult<()> {
        let bytes = encode(&record)?;
        let key = record_key(self.partition, &record.key.value);
        self.backend
            .claims
            .put(self.wtxn, &key[..], &bytes)
            .map_err(txn_error)?;

        let index = index_key(self.partition, &record.owner, &record.key.value);
        self.backend
            .owners
            .put(self.wtxn, &index[..], record.key.value.as_str())
            .map_err(txn_error)?;
        Ok(())
    }

    fn discard(&mut self, value: &ClaimValue) -> ClaimResult<()> {
        let key = record_key(self.partition, value);
        if let Some(record) = self.backend.read_record(&*self.wtxn, &key)? {
            self.backend.delete_record(self.wtxn, &record)?;
        }
        Ok(())
    }
}

impl ClaimBackend for LmdbClaimBackend {
    fn name(&self) -> &'static str {
        "lmdb"
    }

    fn claim(
        &self,
        record: ClaimRecord,
        rules: &ClaimRules,
        now: Timestamp,
    ) -> ClaimResult<ClaimOutcome> {
        let partition = record.key.partition.clone();
        self.with_partition(&partition, |partition_slots| {
            slots::claim(partition_slots, record, rules, now)
        })
    }

    fn release(
        &self,
        key: &ClaimKey,
        id: &ClaimId,
        owner: &OwnerId,
        rules: &ClaimRules,
        now: Timestamp,
    ) -> ClaimResult<bool> {
        self.with_partition(&key.partition, |partition_slots| {
            slots::release(partition_slots, key, id, owner, rules, now)
        })
    }

    fn release_owner(
        &self,
        partition: &Partition,
        id: &ClaimId,
        owner: &OwnerId,
        rules: &ClaimRules,
        now: Timestamp,
    ) -> ClaimResult<usize> {
        self.with_partition(partition, |partition_slots| {
            slots::release_owner(partition_slots, id, owner, rules, now)
        })
    }

    fn get(&self, key: &ClaimKey, now: Timestamp) -> ClaimResult<Option<ClaimRecord>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let record = self.read_record(&rtxn, &record_key(&key.partition, &key.value))?;
        Ok(record.filter(|r| r.is_live(now)))
    }

    fn held_by(
        &self,
        partition: &Partition,
        owner: &OwnerId,
        now: Timestamp,
    ) -> ClaimResult<Vec<ClaimRecord>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;

        let mut held = Vec::new();
        for value in self.owned_values(&rtxn, partition, owner)? {
            if let Some(record) = self.read_record(&rtxn, &record_key(partition, &value))? {
                if record.is_live(now) && record.is_held_by(owner) {
                    held.push(record);
                }
            }
        }
        held.sort_by(|a, b| a.key.value.cmp(&b.key.value));
        Ok(held)
    }

    fn purge_expired(&self, now: Timestamp) -> ClaimResult<usize> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;

        let expired: Vec<ClaimRecord> = self
            .load_all(&wtxn)?
            .into_iter()
            .filter(|record| record.is_expired(now))
            .collect();

        for record in &expired {
            self.delete_record(&mut wtxn, record)?;
        }

        wtxn.commit().map_err(txn_error)?;
        Ok(expired.len())
    }

    fn clear(&self) -> ClaimResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.claims.clear(&mut wtxn).map_err(txn_error)?;
        self.owners.clear(&mut wtxn).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    fn stats(&self, now: Timestamp) -> ClaimResult<BackendStats> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let records = self.load_all(&rtxn)?;

        let partitions: BTreeSet<&Partition> = records.iter().map(|r| &r.key.partition).collect();
        Ok(BackendStats {
            partitions: partitions.len() as u64,
            live_claims: records.iter().filter(|r| r.is_live(now)).count() as u64,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
