//! TTL contract for claims.

use crate::{ClaimRecord, ClaimResult, ConfigError, Timestamp};
use std::time::Duration;

/// Computes expiry for new claims and judges liveness of stored ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    ttl: Duration,
    ttl_chrono: chrono::Duration,
}

impl ExpiryPolicy {
    /// Build a policy for the given TTL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the TTL is zero or too large to
    /// be added to a timestamp.
    pub fn new(ttl: Duration) -> ClaimResult<Self> {
        if ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "ttl".to_string(),
                value: format!("{:?}", ttl),
                reason: "ttl must be positive".to_string(),
            }
            .into());
        }
        let ttl_chrono = chrono::Duration::from_std(ttl).map_err(|_| ConfigError::InvalidValue {
            field: "ttl".to_string(),
            value: format!("{:?}", ttl),
            reason: "ttl is out of range".to_string(),
        })?;
        Ok(Self { ttl, ttl_chrono })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Expiry instant for a claim made at `claimed_at`.
    pub fn expires_at(&self, claimed_at: Timestamp) -> Timestamp {
        claimed_at
            .checked_add_signed(self.ttl_chrono)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
    }

    /// `(claimed_at, expires_at)` for a claim made at `now`.
    pub fn stamp(&self, now: Timestamp) -> (Timestamp, Timestamp) {
        (now, self.expires_at(now))
    }

    pub fn is_live(&self, record: &ClaimRecord, now: Timestamp) -> bool {
        record.is_live(now)
    }
}
