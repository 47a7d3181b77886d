//! Eviction and self-preservation tests.

mod common;

use common::{local, peer, record, register_many, registry, registry_with};
use proptest::prelude::*;
use registry_core::core::config::Config;
use registry_core::eviction::{EvictionReason, EvictionTarget};
use registry_core::ServiceRegistry;

/// Remove copies without an explicit cancel, so the expected size stays put.
fn lose(registry: &ServiceRegistry, app: &str, ids: std::ops::Range<usize>) {
    for i in ids {
        let id = format!("{app}-i{i}");
        let item = registry
            .store()
            .eviction_item(&id, &local(app), EvictionReason::SourceDisconnected)
            .unwrap();
        assert!(registry.store().evict(&item).unwrap());
    }
}

fn queue(registry: &ServiceRegistry, app: &str, ids: std::ops::Range<usize>) {
    for i in ids {
        let id = format!("{app}-i{i}");
        assert!(registry.evict_copy(&id, &local(app), EvictionReason::SourceDisconnected));
    }
}

#[test]
fn self_preservation_holds_until_registry_recovers() {
    let (_clock, registry) = registry();
    register_many(&registry, "A", 100);
    assert_eq!(registry.eviction().expected_size(), 100);

    lose(&registry, "A", 0..30);
    assert_eq!(registry.size(), 70);
    assert_eq!(registry.eviction().expected_size(), 100);

    queue(&registry, "A", 30..60);
    for _ in 0..5 {
        let report = registry.drain_evictions();
        assert_eq!(report.evicted, 0);
        assert!(report.self_preservation);
    }
    assert_eq!(registry.size(), 70);
    assert!(registry.is_self_preserving());
    assert!(registry.health().self_preservation);
    assert_eq!(registry.eviction().queue().len(), 30);

    register_many(&registry, "R", 16);
    assert_eq!(registry.size(), 86);
    // 86 and 85 are at or above 85% of 100; 84 is not.
    let report = registry.drain_evictions();
    assert_eq!(report.evicted, 2);
    assert_eq!(registry.size(), 84);
    assert!(registry.is_self_preserving());
}

#[test]
fn drain_stops_at_threshold() {
    let (_clock, registry) = registry();
    register_many(&registry, "A", 100);
    queue(&registry, "A", 0..30);

    let report = registry.drain_evictions();
    assert_eq!(report.evicted, 16);
    assert!(report.self_preservation);
    assert_eq!(registry.size(), 84);
    assert_eq!(registry.eviction().queue().len(), 14);
}

#[test]
fn full_single_instance_registry_still_evicts() {
    let (_clock, registry) = registry();
    register_many(&registry, "A", 1);
    queue(&registry, "A", 0..1);

    let report = registry.drain_evictions();
    assert_eq!(report.evicted, 1);
    assert!(!report.self_preservation);
    assert_eq!(registry.size(), 0);
    assert!(!registry.is_self_preserving());
}

#[test]
fn small_registry_evicts_one_disconnected_instance() {
    let (_clock, registry) = registry();
    register_many(&registry, "A", 5);
    queue(&registry, "A", 2..3);

    let report = registry.drain_evictions();
    assert_eq!(report.evicted, 1);
    assert!(!report.self_preservation);
    assert_eq!(registry.size(), 4);
    assert!(registry.get("A-i2").is_none());
    assert!(!registry.health().self_preservation);
}

#[test]
fn explicit_cancels_lower_expectation() {
    let (_clock, registry) = registry();
    register_many(&registry, "A", 20);
    for i in 0..10 {
        assert!(registry.cancel("A", &format!("A-i{i}"), false));
    }
    assert_eq!(registry.eviction().expected_size(), 10);
    assert_eq!(registry.size(), 10);

    queue(&registry, "A", 10..12);
    // 10 expected at 0.85: evicting from 10 and 9 is allowed.
    assert_eq!(registry.drain_evictions().evicted, 2);
    assert_eq!(registry.size(), 8);
}

#[test]
fn expired_leases_wait_for_the_queue_delay() {
    let (clock, registry) = registry_with(Config::default());
    register_many(&registry, "A", 40);
    let lease = registry.config().registry.lease_duration_ms;
    let delay = registry.config().eviction.eviction_delay_ms;

    clock.advance(lease);
    // Renew half before the scan; only the rest expire.
    for i in 0..20 {
        assert!(registry.renew("A", &format!("A-i{i}"), false));
    }
    assert_eq!(registry.run_lease_expiry(), 20);
    assert_eq!(registry.run_lease_expiry(), 0);

    assert_eq!(registry.drain_evictions().evicted, 0);
    clock.advance(delay);
    let report = registry.drain_evictions();
    // 40 expected at 0.85: sizes 40 down to 34 each admit one eviction.
    assert_eq!(report.evicted, 7);
    assert_eq!(registry.size(), 33);
}

#[test]
fn renewal_after_scan_cancels_eviction() {
    let (clock, registry) = registry();
    register_many(&registry, "A", 20);
    clock.advance(registry.config().registry.lease_duration_ms);
    assert_eq!(registry.run_lease_expiry(), 20);
    assert!(registry.renew("A", "A-i0", false));

    let report = registry.drain_evictions();
    assert_eq!(report.skipped, 1);
    assert!(registry.get("A-i0").is_some());
}

#[test]
fn disconnected_peer_copies_are_evicted_exactly() {
    let (_clock, registry) = registry();
    register_many(&registry, "A", 20);
    registry.register(record("A-i0", "A"), peer("peer1"));
    registry.register(record("X", "X"), peer("peer1"));
    assert_eq!(registry.size(), 21);

    assert_eq!(registry.evict_source(&peer("peer2")), 0);
    assert_eq!(registry.evict_source(&peer("peer1")), 2);
    let report = registry.drain_evictions();
    assert_eq!(report.evicted, 2);
    assert_eq!(registry.size(), 20);
    assert!(registry.get_with_source("A-i0").unwrap().source.is_local());
    assert!(registry.get("X").is_none());
}

#[test]
fn retire_everything_but_local() {
    let (_clock, registry) = registry();
    register_many(&registry, "A", 20);
    registry.register(record("P", "P"), peer("peer1"));
    assert_eq!(registry.evict_all_except(|source| source.is_local()), 1);
    assert_eq!(registry.drain_evictions().evicted, 1);
    assert!(registry.get("P").is_none());
}

#[tokio::test]
async fn background_drain_runs_and_stops() {
    let (_clock, registry) = registry();
    register_many(&registry, "A", 20);
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = registry.eviction().clone().spawn(rx);

    queue(&registry, "A", 0..1);
    for _ in 0..100 {
        if registry.size() == 19 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(registry.size(), 19);

    tx.send(true).unwrap();
    handle.await.unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn drain_never_shrinks_below_threshold(
        expected in 21usize..120,
        lost_pct in 20usize..60,
        queued in 1usize..20,
        passes in 1usize..4,
    ) {
        let (_clock, registry) = registry();
        register_many(&registry, "A", expected);
        let lost = expected * lost_pct / 100;
        lose(&registry, "A", 0..lost);
        let actual = registry.size();
        prop_assume!((actual as f64) < 0.85 * expected as f64);

        let queued = queued.min(actual);
        queue(&registry, "A", lost..lost + queued);
        for _ in 0..passes {
            registry.drain_evictions();
            prop_assert_eq!(registry.size(), actual);
        }
    }
}
