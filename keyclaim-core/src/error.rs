//! Error types for claim operations

use crate::ClaimKey;
use thiserror::Error;

/// Storage layer errors.
///
/// Every variant means the claim table could not be read or written, so
/// uniqueness is unverified. Callers must fail safe and never treat one of
/// these as a granted claim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Claim store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Stored claim table is corrupted: {reason}")]
    Corrupted { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for claim operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClaimError {
    /// The value is already claimed by a different owner in this partition.
    #[error("Value {} already claimed in partition {}", .key.value, .key.partition)]
    Conflict { key: ClaimKey },

    /// A release named a claim that belongs to someone else.
    #[error("Claim on {} in partition {} is held by another owner", .key.value, .key.partition)]
    ClaimedByAnotherOwner { key: ClaimKey },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ClaimError {
    /// Whether this is the expected "duplicate value" outcome of a claim.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClaimError::Conflict { .. })
    }

    /// Whether uniqueness could not be verified at all.
    pub fn is_internal(&self) -> bool {
        matches!(self, ClaimError::Storage(_) | ClaimError::Config(_))
    }

    /// The claim key this error is about, if any.
    pub fn key(&self) -> Option<&ClaimKey> {
        match self {
            ClaimError::Conflict { key } | ClaimError::ClaimedByAnotherOwner { key } => Some(key),
            ClaimError::Storage(_) | ClaimError::Config(_) => None,
        }
    }
}

/// Result type alias for claim operations.
pub type ClaimResult<T> = Result<T, ClaimError>;

// =============================================================================
// TESTS
// =============================================================================
