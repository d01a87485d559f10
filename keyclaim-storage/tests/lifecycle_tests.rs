//! Lifecycle tests: start/stop of the claim store runtime and the
//! background sweep.

use std::sync::Arc;
use std::time::Duration;

use keyclaim_core::{
    BackendConfig, ClaimConfig, ClaimError, ClaimId, ClaimOutcome, ClaimResult, ClaimValue,
    ManualClock, OwnerId,
};
use keyclaim_storage::{ClaimStore, ClaimStoreRuntime, InMemoryClaimBackend};
use keyclaim_test_utils::assertions::{assert_created, assert_unavailable};
use keyclaim_test_utils::fixtures::{init_tracing, test_config};
use tempfile::TempDir;

fn runtime_on_manual_clock(config: &ClaimConfig) -> (ClaimStoreRuntime, ManualClock) {
    let clock = ManualClock::starting_now();
    let store = ClaimStore::with_clock(
        config,
        Arc::new(InMemoryClaimBackend::new()),
        Arc::new(clock.clone()),
    )
    .expect("test config should be valid");
    (ClaimStoreRuntime::new(Arc::new(store)), clock)
}

fn claim(store: &ClaimStore, id: &str, value: &str, owner: &str) -> ClaimResult<ClaimOutcome> {
    store.claim(
        ClaimId::new(id),
        ClaimValue::new(value),
        OwnerId::new(owner),
        None,
    )
}

#[tokio::test]
async fn operations_fail_before_start_and_after_stop() {
    init_tracing();
    let (mut runtime, _clock) = runtime_on_manual_clock(&test_config());
    let store = runtime.store();

    assert_unavailable(&claim(&store, "c1", "a@x", "u1"));

    runtime.start().unwrap();
    assert_created(&claim(&store, "c2", "a@x", "u1"));

    runtime.stop().await.unwrap();
    assert_unavailable(&claim(&store, "c3", "b@x", "u1"));
    assert_unavailable(&store.lookup(&ClaimValue::new("a@x"), None));
}

#[tokio::test]
async fn restart_starts_with_no_claims() {
    let (mut runtime, _clock) = runtime_on_manual_clock(&test_config());
    let store = runtime.store();

    runtime.start().unwrap();
    assert_created(&claim(&store, "c1", "a@x", "u1"));
    runtime.stop().await.unwrap();

    runtime.start().unwrap();
    assert!(store.lookup(&ClaimValue::new("a@x"), None).unwrap().is_none());
    assert_created(&claim(&store, "c2", "a@x", "u2"));
    runtime.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn background_sweep_purges_expired_claims() {
    let config = ClaimConfig {
        ttl: Duration::from_secs(10),
        sweep_interval: Duration::from_secs(5),
        ..test_config()
    };
    let (mut runtime, clock) = runtime_on_manual_clock(&config);
    let store = runtime.store();

    runtime.start().unwrap();
    assert_created(&claim(&store, "c1", "a@x", "u1"));

    // Expire the claim on the store's clock, then let the sweep interval fire
    clock.advance(Duration::from_secs(11));
    tokio::time::sleep(Duration::from_secs(6)).await;

    let metrics = runtime.stop().await.unwrap().expect("sweep task metrics");
    assert!(metrics.cycles >= 2);
    assert_eq!(metrics.purged, 1);
    assert_eq!(metrics.errors, 0);
    assert_eq!(store.metrics().expired_purged, 1);
}

#[tokio::test]
async fn runtime_from_lmdb_config() {
    let temp_dir = TempDir::new().expect("TempDir creation should succeed");
    let config = ClaimConfig {
        backend: BackendConfig::Lmdb {
            path: temp_dir.path().join("claims"),
            max_size_mb: 16,
        },
        ..test_config()
    };

    let mut runtime = ClaimStoreRuntime::from_config(&config).unwrap();
    let store = runtime.store();
    assert_eq!(store.backend_name(), "lmdb");

    runtime.start().unwrap();
    assert_created(&claim(&store, "c1", "a@x", "u1"));
    assert!(store.lookup(&ClaimValue::new("a@x"), None).unwrap().is_some());

    runtime.stop().await.unwrap();
    runtime.start().unwrap();
    assert!(store.lookup(&ClaimValue::new("a@x"), None).unwrap().is_none());
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn invalid_config_fails_fast() {
    let config = ClaimConfig {
        ttl: Duration::ZERO,
        ..test_config()
    };
    let result = ClaimStoreRuntime::from_config(&config);
    assert!(matches!(result, Err(ClaimError::Config(_))));
}
