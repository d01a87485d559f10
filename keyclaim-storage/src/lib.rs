//! keyclaim Storage - Claim Store, Backends and Expiry Sweep
//!
//! Wraps the claim decisions from `keyclaim-core` (see
//! [`keyclaim_core::slots`]) in a concurrent store:
//!
//! - [`ClaimBackend`]: the storage contract, with a sharded in-memory
//!   implementation and an LMDB implementation selected at startup.
//! - [`ClaimStore`]: the caller-facing claim/release API.
//! - [`sweep_task`]: the background task purging expired claims.
//! - [`ClaimStoreRuntime`]: the start/stop hook a host process drives.
//!
//! # Example
//!
//! ```ignore
//! use keyclaim_core::{ClaimConfig, ClaimId, ClaimValue, OwnerId, Partition};
//! use keyclaim_storage::ClaimStoreRuntime;
//!
//! let mut runtime = ClaimStoreRuntime::from_config(&ClaimConfig::from_env())?;
//! runtime.start()?;
//!
//! let store = runtime.store();
//! let signup = Partition::new("signup");
//! store.claim(ClaimId::generate(), ClaimValue::new("a@x"), OwnerId::new("u1"), Some(&signup))?;
//!
//! // On shutdown
//! runtime.stop().await?;
//! ```

pub mod backend;
pub mod lifecycle;
pub mod lmdb_backend;
pub mod memory;
pub mod store;
pub mod sweep;

pub use backend::{open_backend, BackendStats, ClaimBackend};
pub use lifecycle::ClaimStoreRuntime;
pub use lmdb_backend::{LmdbClaimBackend, LmdbClaimError};
pub use memory::InMemoryClaimBackend;
pub use store::{ClaimStore, StoreMetrics, StoreMetricsSnapshot};
pub use sweep::{sweep_task, SweepMetrics, SweepMetricsSnapshot};
