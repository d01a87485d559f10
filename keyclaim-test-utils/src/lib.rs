//! keyclaim Test Utilities
//!
//! Shared test infrastructure for the keyclaim workspace:
//! - Proptest generators for identities, configs and operation sequences
//! - Fixtures that build open stores on a manual clock
//! - Custom assertions for claim outcomes and errors

pub use keyclaim_core::{
    BackendConfig, ClaimConfig, ClaimError, ClaimId, ClaimKey, ClaimOutcome, ClaimRecord,
    ClaimResult, ClaimValue, Clock, ManualClock, OwnerId, Partition, ReleaseMatch, StorageError,
    Timestamp,
};
pub use keyclaim_storage::{ClaimStore, InMemoryClaimBackend, LmdbClaimBackend};

use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for claim store inputs.
    //!
    //! Identity pools are deliberately small so generated operation
    //! sequences collide on values and owners often.

    use super::*;
    use proptest::prelude::*;

    /// Generate a partition from a small pool.
    pub fn arb_partition() -> impl Strategy<Value = Partition> {
        prop::sample::select(vec!["signup", "handles", "default"]).prop_map(Partition::new)
    }

    /// Generate a claim value from a small pool.
    pub fn arb_claim_value() -> impl Strategy<Value = ClaimValue> {
        prop::sample::select(vec!["a@x", "b@x", "c@x", "bob", "eve"]).prop_map(ClaimValue::new)
    }

    /// Generate an owner from a small pool.
    pub fn arb_owner_id() -> impl Strategy<Value = OwnerId> {
        (1u8..=4).prop_map(|n| OwnerId::new(format!("u{}", n)))
    }

    pub fn arb_claim_id() -> impl Strategy<Value = ClaimId> {
        (1u16..=6).prop_map(|n| ClaimId::new(format!("c{}", n)))
    }

    /// Generate an arbitrary non-empty value string.
    pub fn arb_any_value() -> impl Strategy<Value = ClaimValue> {
        "[a-zA-Z0-9@._+-]{1,32}".prop_map(ClaimValue::new)
    }

    pub fn arb_release_match() -> impl Strategy<Value = ReleaseMatch> {
        prop_oneof![Just(ReleaseMatch::Owner), Just(ReleaseMatch::OwnerAndId)]
    }

    /// Generate a valid in-memory ClaimConfig.
    pub fn arb_claim_config() -> impl Strategy<Value = ClaimConfig> {
        (
            1u64..3600,
            1u64..600,
            any::<bool>(),
            arb_release_match(),
            prop::option::of(prop::sample::select(vec![2usize, 4, 8, 16, 32])),
        )
            .prop_map(
                |(ttl_secs, sweep_secs, supersede, release_match, shards)| ClaimConfig {
                    ttl: Duration::from_secs(ttl_secs),
                    sweep_interval: Duration::from_secs(sweep_secs),
                    supersede,
                    release_match,
                    backend: BackendConfig::Memory { shards },
                    ..ClaimConfig::default()
                },
            )
    }

    /// One step against a claim store.
    #[derive(Debug, Clone)]
    pub enum ClaimOp {
        Claim {
            id: ClaimId,
            value: ClaimValue,
            owner: OwnerId,
            partition: Partition,
        },
        Release {
            id: ClaimId,
            value: ClaimValue,
            owner: OwnerId,
            partition: Partition,
        },
        ReleaseOwner {
            id: ClaimId,
            owner: OwnerId,
            partition: Partition,
        },
        /// Move the clock forward by this many seconds.
        Advance(u64),
        Sweep,
    }

    pub fn arb_claim_op() -> impl Strategy<Value = ClaimOp> {
        prop_oneof![
            4 => (arb_claim_id(), arb_claim_value(), arb_owner_id(), arb_partition()).prop_map(
                |(id, value, owner, partition)| ClaimOp::Claim {
                    id,
                    value,
                    owner,
                    partition,
                }
            ),
            2 => (arb_claim_id(), arb_claim_value(), arb_owner_id(), arb_partition()).prop_map(
                |(id, value, owner, partition)| ClaimOp::Release {
                    id,
                    value,
                    owner,
                    partition,
                }
            ),
            1 => (arb_claim_id(), arb_owner_id(), arb_partition()).prop_map(
                |(id, owner, partition)| ClaimOp::ReleaseOwner {
                    id,
                    owner,
                    partition,
                }
            ),
            1 => (1u64..120).prop_map(ClaimOp::Advance),
            1 => Just(ClaimOp::Sweep),
        ]
    }

    pub fn arb_claim_ops(max_len: usize) -> impl Strategy<Value = Vec<ClaimOp>> {
        prop::collection::vec(arb_claim_op(), 1..max_len)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built stores and configs for common testing scenarios.

    use super::*;
    use tempfile::TempDir;

    /// A short-TTL in-memory configuration.
    pub fn test_config() -> ClaimConfig {
        ClaimConfig {
            ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(1),
            ..ClaimConfig::default()
        }
    }

    /// Like [`test_config`] but owners may hold several values per partition.
    pub fn accumulating_config() -> ClaimConfig {
        ClaimConfig {
            supersede: false,
            ..test_config()
        }
    }

    /// An open in-memory store on a manual clock.
    pub fn memory_store(config: &ClaimConfig) -> (Arc<ClaimStore>, ManualClock) {
        let clock = ManualClock::starting_now();
        let store = ClaimStore::with_clock(
            config,
            Arc::new(InMemoryClaimBackend::new()),
            Arc::new(clock.clone()),
        )
        .expect("test config should be valid");
        store.open().expect("store should open");
        (Arc::new(store), clock)
    }

    /// An open LMDB store on a manual clock. Keep the `TempDir` alive for the
    /// duration of the test.
    pub fn lmdb_store(config: &ClaimConfig) -> (Arc<ClaimStore>, ManualClock, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend =
            LmdbClaimBackend::new(temp_dir.path(), 16).expect("LMDB backend creation should succeed");
        let clock = ManualClock::starting_now();
        let store = ClaimStore::with_clock(config, Arc::new(backend), Arc::new(clock.clone()))
            .expect("test config should be valid");
        store.open().expect("store should open");
        (Arc::new(store), clock, temp_dir)
    }

    /// Route `tracing` output to the test harness. Safe to call repeatedly.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for claim outcomes and errors.

    use super::*;

    /// Assert that a claim was granted as a fresh claim.
    #[track_caller]
    pub fn assert_created(result: &ClaimResult<ClaimOutcome>) {
        match result {
            Ok(ClaimOutcome::Created) => {}
            other => panic!("Expected Created, got: {:?}", other),
        }
    }

    /// Assert that a claim was granted in any form.
    #[track_caller]
    pub fn assert_granted(result: &ClaimResult<ClaimOutcome>) {
        assert!(result.is_ok(), "Expected a granted claim, got: {:?}", result);
    }

    /// Assert that a claim was rejected as a duplicate of `value`.
    #[track_caller]
    pub fn assert_conflict<T: std::fmt::Debug>(result: &ClaimResult<T>, value: &str) {
        match result {
            Err(ClaimError::Conflict { key }) => {
                assert_eq!(key.value.as_str(), value, "Wrong value in Conflict error");
            }
            other => panic!("Expected Conflict on {}, got: {:?}", value, other),
        }
    }

    /// Assert that a release was rejected because someone else holds the claim.
    #[track_caller]
    pub fn assert_claimed_by_another_owner<T: std::fmt::Debug>(result: &ClaimResult<T>) {
        match result {
            Err(ClaimError::ClaimedByAnotherOwner { .. }) => {}
            other => panic!("Expected ClaimedByAnotherOwner, got: {:?}", other),
        }
    }

    /// Assert that the store could not verify uniqueness.
    #[track_caller]
    pub fn assert_internal<T: std::fmt::Debug>(result: &ClaimResult<T>) {
        match result {
            Err(e) if e.is_internal() => {}
            other => panic!("Expected an internal error, got: {:?}", other),
        }
    }

    /// Assert that the store is closed.
    #[track_caller]
    pub fn assert_unavailable<T: std::fmt::Debug>(result: &ClaimResult<T>) {
        match result {
            Err(ClaimError::Storage(StorageError::Unavailable { .. })) => {}
            other => panic!("Expected Unavailable storage error, got: {:?}", other),
        }
    }

    /// Assert that `value` is held by `owner` in `partition`.
    #[track_caller]
    pub fn assert_held_by(store: &ClaimStore, value: &str, owner: &str, partition: &str) {
        let record = store
            .lookup(&ClaimValue::new(value), Some(&Partition::new(partition)))
            .expect("lookup should succeed");
        match record {
            Some(record) => assert_eq!(
                record.owner.as_str(),
                owner,
                "{} in {} held by the wrong owner",
                value,
                partition
            ),
            None => panic!("Expected {} in {} to be held by {}", value, partition, owner),
        }
    }

    /// Assert that nobody holds `value` in `partition`.
    #[track_caller]
    pub fn assert_unclaimed(store: &ClaimStore, value: &str, partition: &str) {
        let record = store
            .lookup(&ClaimValue::new(value), Some(&Partition::new(partition)))
            .expect("lookup should succeed");
        assert!(
            record.is_none(),
            "Expected {} in {} to be unclaimed, held by {:?}",
            value,
            partition,
            record.map(|r| r.owner)
        );
    }
}
