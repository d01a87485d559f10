//! Claim keys, records and outcomes.
//!
//! A [`ClaimRecord`] is only ever replaced wholesale; nothing mutates a
//! record in place. Liveness is never cached on the record: every check
//! evaluates `now < expires_at` against the caller's instant.

use crate::{ClaimId, ClaimValue, OwnerId, Partition, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A uniqueness slot: one value inside one partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClaimKey {
    pub partition: Partition,
    pub value: ClaimValue,
}

impl ClaimKey {
    pub fn new(partition: impl Into<Partition>, value: impl Into<ClaimValue>) -> Self {
        Self {
            partition: partition.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.value)
    }
}

/// A claim held by one owner on one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub id: ClaimId,
    pub key: ClaimKey,
    pub owner: OwnerId,
    pub claimed_at: Timestamp,
    pub expires_at: Timestamp,
}

impl ClaimRecord {
    /// Check if the claim is still in force at `now`.
    pub fn is_live(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }

    /// Check if the claim has expired at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        !self.is_live(now)
    }

    /// Calculate remaining duration until expiry.
    pub fn remaining(&self, now: Timestamp) -> Option<Duration> {
        if self.is_live(now) {
            (self.expires_at - now).to_std().ok()
        } else {
            None
        }
    }

    pub fn is_held_by(&self, owner: &OwnerId) -> bool {
        self.owner == *owner
    }
}

/// Successful result of a claim.
///
/// All three variants mean the caller now holds the claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// No live claim existed; a new one was installed.
    Created,
    /// The caller already held the claim; its expiry was pushed out.
    Refreshed,
    /// A new claim was installed after dropping the caller's previous
    /// claims in the same partition.
    Superseded { previous: Vec<ClaimValue> },
}

impl ClaimOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimOutcome::Created => "created",
            ClaimOutcome::Refreshed => "refreshed",
            ClaimOutcome::Superseded { .. } => "superseded",
        }
    }
}

impl fmt::Display for ClaimOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
