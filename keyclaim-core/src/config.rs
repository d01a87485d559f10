//! Configuration types

use crate::{ClaimResult, ClaimRules, ConfigError, ExpiryPolicy, Partition, ReleaseMatch};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default claim time-to-live (1 hour).
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Partition used when a caller does not name one.
pub const DEFAULT_PARTITION: &str = "default";

/// Default LMDB map size in megabytes.
pub const DEFAULT_LMDB_MAX_SIZE_MB: usize = 64;

/// Largest accepted LMDB map size in megabytes (1 TiB).
pub const MAX_LMDB_MAX_SIZE_MB: usize = 1 << 20;

/// LMDB map size in bytes for `max_size_mb`.
///
/// `None` when the size is zero, above [`MAX_LMDB_MAX_SIZE_MB`], or does not
/// fit in a `usize` on this target.
pub fn lmdb_map_size(max_size_mb: usize) -> Option<usize> {
    if max_size_mb == 0 || max_size_mb > MAX_LMDB_MAX_SIZE_MB {
        return None;
    }
    max_size_mb.checked_mul(1024 * 1024)
}

/// Which claim table implementation backs the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Sharded in-process map. `shards` overrides the shard count.
    Memory { shards: Option<usize> },
    /// LMDB environment at `path`. Cleared on open: claims never outlive
    /// the process that made them.
    Lmdb { path: PathBuf, max_size_mb: usize },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Memory { shards: None }
    }
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Memory { .. } => "memory",
            BackendConfig::Lmdb { .. } => "lmdb",
        }
    }
}

/// Claim store configuration.
///
/// Built once at startup and handed to the store constructor; nothing reads
/// configuration after that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimConfig {
    /// How long a claim lives without being refreshed.
    pub ttl: Duration,
    /// Partition applied when a caller omits one.
    pub default_partition: Partition,
    /// How often the background sweep purges expired claims.
    pub sweep_interval: Duration,
    /// Whether claiming a new value drops the owner's other claims in the
    /// same partition.
    pub supersede: bool,
    /// What a release must match to remove a claim.
    pub release_match: ReleaseMatch,
    pub backend: BackendConfig,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            default_partition: Partition::new(DEFAULT_PARTITION),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            supersede: true,
            release_match: ReleaseMatch::Owner,
            backend: BackendConfig::default(),
        }
    }
}

impl ClaimConfig {
    /// Create ClaimConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `KEYCLAIM_TTL_SECS`: Claim time-to-live (default: 3600)
    /// - `KEYCLAIM_DEFAULT_PARTITION`: Partition for calls without one (default: "default")
    /// - `KEYCLAIM_SWEEP_INTERVAL_SECS`: Expiry sweep interval (default: 60)
    /// - `KEYCLAIM_SUPERSEDE`: Drop an owner's previous claim on a new value (default: true)
    /// - `KEYCLAIM_RELEASE_MATCH`: `owner` or `owner_and_id` (default: owner)
    /// - `KEYCLAIM_BACKEND`: `memory` or `lmdb` (default: memory)
    /// - `KEYCLAIM_MEMORY_SHARDS`: Shard count for the memory backend
    /// - `KEYCLAIM_LMDB_PATH`: LMDB directory, required for the lmdb backend
    /// - `KEYCLAIM_LMDB_MAX_SIZE_MB`: LMDB map size (default: 64)
    ///
    /// Unparseable values fall back to the defaults; call [`validate`](Self::validate)
    /// before use.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let ttl = std::env::var("KEYCLAIM_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.ttl);

        let default_partition = std::env::var("KEYCLAIM_DEFAULT_PARTITION")
            .map(Partition::new)
            .unwrap_or(defaults.default_partition);

        let sweep_interval = std::env::var("KEYCLAIM_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);

        let supersede = std::env::var("KEYCLAIM_SUPERSEDE")
            .ok()
            .map(|s| s.to_lowercase() != "false" && s != "0")
            .unwrap_or(defaults.supersede);

        let release_match = std::env::var("KEYCLAIM_RELEASE_MATCH")
            .ok()
            .and_then(|s| ReleaseMatch::parse(&s))
            .unwrap_or(defaults.release_match);

        let backend = match std::env::var("KEYCLAIM_BACKEND")
            .map(|s| s.to_lowercase())
            .as_deref()
        {
            Ok("lmdb") => BackendConfig::Lmdb {
                path: std::env::var("KEYCLAIM_LMDB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_default(),
                max_size_mb: std::env::var("KEYCLAIM_LMDB_MAX_SIZE_MB")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_LMDB_MAX_SIZE_MB),
            },
            _ => BackendConfig::Memory {
                shards: std::env::var("KEYCLAIM_MEMORY_SHARDS")
                    .ok()
                    .and_then(|s| s.parse().ok()),
            },
        };

        Self {
            ttl,
            default_partition,
            sweep_interval,
            supersede,
            release_match,
            backend,
        }
    }

    /// Create a configuration for development/testing with short timings.
    pub fn development() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - ttl is positive and representable as a timestamp offset
    /// - sweep_interval is positive
    /// - default_partition is non-empty
    /// - memory shard count, if set, is a power of two greater than one
    /// - lmdb path is set and max_size_mb is within 1..=MAX_LMDB_MAX_SIZE_MB
    pub fn validate(&self) -> ClaimResult<()> {
        ExpiryPolicy::new(self.ttl)?;

        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval".to_string(),
                value: format!("{:?}", self.sweep_interval),
                reason: "sweep_interval must be positive".to_string(),
            }
            .into());
        }

        if self.default_partition.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "default_partition".to_string(),
            }
            .into());
        }

        match &self.backend {
            BackendConfig::Memory { shards: Some(shards) } => {
                if *shards < 2 || !shards.is_power_of_two() {
                    return Err(ConfigError::InvalidValue {
                        field: "backend.shards".to_string(),
                        value: shards.to_string(),
                        reason: "shard count must be a power of two greater than one".to_string(),
                    }
                    .into());
                }
            }
            BackendConfig::Memory { shards: None } => {}
            BackendConfig::Lmdb { path, max_size_mb } => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::MissingRequired {
                        field: "backend.path".to_string(),
                    }
                    .into());
                }
                if lmdb_map_size(*max_size_mb).is_none() {
                    return Err(ConfigError::InvalidValue {
                        field: "backend.max_size_mb".to_string(),
                        value: max_size_mb.to_string(),
                        reason: format!(
                            "max_size_mb must be between 1 and {}",
                            MAX_LMDB_MAX_SIZE_MB
                        ),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }

    /// Build the expiry policy for this configuration.
    pub fn expiry_policy(&self) -> ClaimResult<ExpiryPolicy> {
        ExpiryPolicy::new(self.ttl)
    }

    pub fn rules(&self) -> ClaimRules {
        ClaimRules {
            supersede: self.supersede,
            release_match: self.release_match,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
