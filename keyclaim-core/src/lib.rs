//! keyclaim Core - Claim Types and Decision Logic
//!
//! Pure data structures and the per-partition decision logic for short-lived
//! uniqueness claims. Nothing here performs I/O or spawns tasks; the storage
//! crate wraps these types behind a concurrent backend.
//!
//! # Model
//!
//! A claim reserves a `(partition, value)` pair for a single owner until it
//! is released or its time-to-live elapses:
//!
//! ```text
//! Absent ── claim ──→ Claimed ── release ──→ Absent
//!                      │  ↺ refresh / supersede
//!                      └── ttl elapses ──→ Absent
//! ```

pub mod claim;
pub mod clock;
pub mod config;
pub mod error;
pub mod expiry;
pub mod identity;
pub mod slots;
pub mod table;

pub use claim::{ClaimKey, ClaimOutcome, ClaimRecord};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    lmdb_map_size, BackendConfig, ClaimConfig, DEFAULT_LMDB_MAX_SIZE_MB, DEFAULT_PARTITION,
    DEFAULT_SWEEP_INTERVAL_SECS, DEFAULT_TTL_SECS, MAX_LMDB_MAX_SIZE_MB,
};
pub use error::{ClaimError, ClaimResult, ConfigError, StorageError};
pub use expiry::ExpiryPolicy;
pub use identity::{ClaimId, ClaimValue, OwnerId, Partition, Timestamp};
pub use slots::ClaimSlots;
pub use table::{ClaimRules, ClaimTable, ReleaseMatch};
