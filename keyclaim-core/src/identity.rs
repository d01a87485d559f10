//! Identity types for claims

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Declares an opaque string identifier.
///
/// Equality, ordering and hashing are those of the underlying string, so two
/// identifiers are the same exactly when their bytes are.
///
/// # Example
/// ```ignore
/// string_id!(
///     /// Doc comment
///     Partition
/// );
/// let p = Partition::new("signup");
/// assert_eq!(p.as_str(), "signup");
/// ```
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier from anything string-like.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the identifier is the empty string.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Consume the identifier and return the owned string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Logical namespace a claim lives in, e.g. a command type.
    ///
    /// Partitions never share claims: the same value may be claimed
    /// independently in every partition.
    Partition
);

string_id!(
    /// The business value being reserved (an email, a slug, an order number).
    ClaimValue
);

string_id!(
    /// Opaque identity of the party holding a claim.
    OwnerId
);

string_id!(
    /// Caller-supplied correlation token for a claim request.
    ///
    /// Not part of the uniqueness key. Checked on release only when the
    /// store is configured with [`crate::ReleaseMatch::OwnerAndId`].
    ClaimId
);

impl ClaimId {
    /// Generate a fresh UUIDv7 correlation id (timestamp-sortable).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}
