//! Registry facade.
//!
//! [`ServiceRegistry`] wires the store, the eviction controller and the
//! response cache together and exposes the public registry operations. It
//! keeps the controller's expected size in step with registrations and
//! explicit cancels and owns the periodic maintenance tasks.

use crate::cache::{JsonCodec, PayloadCodec, ResponseCache};
use crate::core::config::Config;
use crate::core::error::RegistryResult;
use crate::core::time::SharedClock;
use crate::eviction::{DrainReport, EvictionController, EvictionItem, EvictionReason};
use crate::model::{Application, Applications, ChangeNotification, InstanceRecord, InstanceStatus, Source};
use crate::ops::observability::{HealthStatus, RegistryMetrics};
use crate::registry::index::PublishedView;
use crate::registry::interest::{Interest, InterestStream};
use crate::registry::store::{InvalidationListener, RegistryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The assembled registry.
#[derive(Debug)]
pub struct ServiceRegistry {
    config: Config,
    store: Arc<RegistryStore>,
    eviction: Arc<EvictionController>,
    cache: Arc<ResponseCache>,
    metrics: Arc<RegistryMetrics>,
}

impl ServiceRegistry {
    /// Build a registry rendering payloads with the JSON codec.
    pub fn new(config: Config, clock: SharedClock, metrics: Arc<RegistryMetrics>) -> Self {
        Self::with_codec(config, Arc::new(JsonCodec), clock, metrics)
    }

    pub fn with_codec(
        config: Config,
        codec: Arc<dyn PayloadCodec>,
        clock: SharedClock,
        metrics: Arc<RegistryMetrics>,
    ) -> Self {
        let store = Arc::new(RegistryStore::new(
            config.registry.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let eviction = Arc::new(EvictionController::new(
            &config.eviction,
            store.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let cache = Arc::new(ResponseCache::new(
            config.response_cache.clone(),
            store.clone(),
            codec,
            clock,
            metrics.clone(),
        ));
        let listener: Arc<dyn InvalidationListener> = cache.clone();
        store.set_invalidation_listener(Arc::downgrade(&listener));

        Self {
            config,
            store,
            eviction,
            cache,
            metrics,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<RegistryStore> {
        &self.store
    }

    pub fn eviction(&self) -> &Arc<EvictionController> {
        &self.eviction
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<RegistryMetrics> {
        &self.metrics
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Register or update the copy written by `source`.
    pub fn register(&self, record: InstanceRecord, source: Source) -> Vec<ChangeNotification> {
        let outcome = self.store.register(record, source);
        if outcome.created {
            self.eviction.on_registered();
        }
        outcome.notifications
    }

    pub fn renew(&self, app_name: &str, id: &str, is_replication: bool) -> bool {
        self.store.renew(app_name, id, is_replication)
    }

    /// Explicitly remove an instance. Returns false when nothing matched.
    pub fn cancel(&self, app_name: &str, id: &str, is_replication: bool) -> bool {
        let outcome = self.store.cancel(app_name, id, is_replication);
        if outcome.removed {
            self.eviction.on_unregistered();
        }
        outcome.accepted
    }

    /// Explicitly remove the copy written by exactly `source`.
    pub fn unregister(&self, id: &str, source: &Source) -> bool {
        let outcome = self.store.unregister_source(id, source);
        if outcome.removed {
            self.eviction.on_unregistered();
        }
        outcome.accepted
    }

    pub fn status_update(
        &self,
        app_name: &str,
        id: &str,
        status: InstanceStatus,
        last_dirty_timestamp: Option<u64>,
        is_replication: bool,
    ) -> bool {
        self.store
            .status_update(app_name, id, status, last_dirty_timestamp, is_replication)
    }

    pub fn delete_status_override(
        &self,
        app_name: &str,
        id: &str,
        status: InstanceStatus,
        last_dirty_timestamp: Option<u64>,
        is_replication: bool,
    ) -> bool {
        self.store
            .delete_status_override(app_name, id, status, last_dirty_timestamp, is_replication)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn size(&self) -> usize {
        self.store.size()
    }

    pub fn get(&self, id: &str) -> Option<Arc<InstanceRecord>> {
        self.store.get(id)
    }

    pub fn get_with_source(&self, id: &str) -> Option<PublishedView> {
        self.store.get_with_source(id)
    }

    pub fn application(&self, name: &str) -> Option<Application> {
        self.store.application(name)
    }

    pub fn instance_by_app_and_id(&self, app_name: &str, id: &str) -> Option<Arc<InstanceRecord>> {
        self.store.instance_by_app_and_id(app_name, id)
    }

    pub fn applications(&self) -> Applications {
        self.store.applications()
    }

    pub fn application_deltas(&self) -> Applications {
        self.store.application_deltas()
    }

    pub fn instances_by_vip(&self, vip: &str) -> Vec<Arc<InstanceRecord>> {
        self.store.instances_by_vip(vip)
    }

    pub fn instances_by_secure_vip(&self, vip: &str) -> Vec<Arc<InstanceRecord>> {
        self.store.instances_by_secure_vip(vip)
    }

    pub fn snapshot(&self, interest: &Interest) -> Vec<Arc<InstanceRecord>> {
        self.store.snapshot(interest)
    }

    pub fn subscribe(&self, interest: Interest) -> RegistryResult<InterestStream> {
        self.store.subscribe(interest)
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    /// Queue every copy whose source fails `retain`. Returns how many were queued.
    pub fn evict_all_except<F>(&self, retain: F) -> usize
    where
        F: Fn(&Source) -> bool,
    {
        let items = self.store.evict_all_except(retain);
        self.eviction.enqueue_all(items)
    }

    /// Queue every copy written by a disconnected source.
    pub fn evict_source(&self, source: &Source) -> usize {
        let items = self.store.evict_source(source);
        let queued = self.eviction.enqueue_all(items);
        if queued > 0 {
            tracing::info!(source = %source, copies = queued, "source disconnected; copies queued for eviction");
        }
        queued
    }

    /// Queue one copy for eviction.
    pub fn evict_copy(&self, id: &str, source: &Source, reason: EvictionReason) -> bool {
        match self.store.eviction_item(id, source, reason) {
            Some(item) => {
                self.eviction.enqueue(item);
                true
            }
            None => false,
        }
    }

    pub fn enqueue_eviction(&self, item: EvictionItem) {
        self.eviction.enqueue(item);
    }

    /// Queue every copy whose lease expired.
    pub fn run_lease_expiry(&self) -> usize {
        let items = self.store.expired_leases();
        self.eviction.enqueue_all(items)
    }

    /// Run one drain pass now.
    pub fn drain_evictions(&self) -> DrainReport {
        self.eviction.drain()
    }

    pub fn is_self_preserving(&self) -> bool {
        self.eviction.is_self_preserving()
    }

    pub fn health(&self) -> HealthStatus {
        if self.store.is_shut_down() {
            return HealthStatus::unhealthy("registry shut down");
        }
        let mut status = HealthStatus::healthy();
        if self.is_self_preserving() {
            status.self_preservation = true;
            status.message = format!(
                "self-preservation: {} of {} expected instances present",
                self.size(),
                self.eviction.expected_size()
            );
        }
        status
    }

    // ========================================================================
    // Background tasks
    // ========================================================================

    /// Spawn the eviction drain, the lease expiry scan, the delta retention
    /// purge and the cache refresh.
    pub fn spawn_background(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            self.eviction.clone().spawn(shutdown.clone()),
            self.spawn_periodic(
                "lease expiry scan",
                self.config.registry.lease_expiry_scan_ms,
                shutdown.clone(),
                |registry| {
                    let queued = registry.run_lease_expiry();
                    if queued > 0 {
                        tracing::debug!(queued, "expired leases queued for eviction");
                    }
                },
            ),
            self.spawn_periodic(
                "delta retention",
                self.config.registry.delta_retention_scan_ms,
                shutdown.clone(),
                |registry| {
                    registry.store.purge_recent_changes();
                },
            ),
            self.cache.clone().spawn_refresh(shutdown),
        ]
    }

    fn spawn_periodic<F>(
        self: &Arc<Self>,
        name: &'static str,
        period_ms: u64,
        mut shutdown: watch::Receiver<bool>,
        tick: F,
    ) -> JoinHandle<()>
    where
        F: Fn(&ServiceRegistry) + Send + 'static,
    {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(period_ms.max(1)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick(&registry),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
                if registry.store.is_shut_down() {
                    break;
                }
            }
            tracing::debug!(task = name, "registry task stopped");
        })
    }

    /// Stop eviction, close subscriptions and release the cache. Idempotent.
    pub fn shutdown(&self) -> RegistryResult<()> {
        self.eviction.shutdown();
        self.store.shutdown();
        self.cache.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ApiVersion, CacheKey, Encoding};
    use crate::core::time::ManualClock;

    fn registry() -> (Arc<ManualClock>, ServiceRegistry) {
        let clock = ManualClock::shared(0);
        let registry = ServiceRegistry::new(Config::default(), clock.clone(), Arc::new(RegistryMetrics::new()));
        (clock, registry)
    }

    fn rec(id: &str) -> InstanceRecord {
        InstanceRecord::builder(id, "A").build()
    }

    #[test]
    fn test_expected_size_follows_register_and_cancel() {
        let (_clock, registry) = registry();
        registry.register(rec("i1"), Source::local("A", "c1"));
        registry.register(rec("i2"), Source::local("A", "c2"));
        assert_eq!(registry.eviction().expected_size(), 2);
        assert!(registry.cancel("A", "i1", false));
        assert_eq!(registry.eviction().expected_size(), 1);
        assert!(!registry.cancel("A", "i1", false));
        assert_eq!(registry.eviction().expected_size(), 1);
    }

    #[test]
    fn test_registration_invalidates_cache() {
        let (_clock, registry) = registry();
        let key = CacheKey::all_apps(Encoding::Json, ApiVersion::V2);
        registry.register(rec("i1"), Source::local("A", "c1"));
        let before = registry.cache().get(&key).unwrap();
        registry.register(rec("i2"), Source::local("A", "c2"));
        let after = registry.cache().get(&key).unwrap();
        assert_ne!(before, after);
        assert!(after.contains("i2"));
    }

    #[test]
    fn test_lease_expiry_goes_through_queue() {
        let (clock, registry) = registry();
        for i in 0..10 {
            registry.register(rec(&format!("i{i}")), Source::local("A", format!("c{i}")));
        }
        clock.advance(registry.config().registry.lease_duration_ms);
        assert_eq!(registry.run_lease_expiry(), 10);
        assert_eq!(registry.drain_evictions().evicted, 0);

        // 10 expected at 0.85: evicting from 10 and 9 is allowed, 8 is below.
        clock.advance(registry.config().eviction.eviction_delay_ms);
        let report = registry.drain_evictions();
        assert_eq!(report.evicted, 2);
        assert!(report.self_preservation);
        assert_eq!(registry.size(), 8);
        assert_eq!(registry.eviction().expected_size(), 10);
        assert!(registry.health().self_preservation);
    }

    #[test]
    fn test_health_reports_shutdown() {
        let (_clock, registry) = registry();
        assert!(registry.health().healthy);
        registry.shutdown().unwrap();
        registry.shutdown().unwrap();
        assert!(!registry.health().healthy);
    }
}
