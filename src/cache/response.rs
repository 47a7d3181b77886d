//! Two-tier response cache.
//!
//! The read-write tier is a loading cache bounded by size and by time since
//! generation. Concurrent readers of a missing key share one generation. The
//! read-only tier is a plain map that a periodic task refreshes from the
//! read-write tier, swapping an entry only when the read-write value is a
//! different object.
//!
//! Registry mutations invalidate keys in both tiers, so the next read after a
//! change always regenerates. A reverse index from each region-less key to the
//! region-qualified keys derived from it lets one invalidation reach every
//! regional variant.

use crate::cache::codec::PayloadCodec;
use crate::cache::key::{ApiVersion, CacheKey, Encoding, EntityType, ALL_APPS, ALL_APPS_DELTA};
use crate::cache::value::CacheValue;
use crate::core::config::ResponseCacheConfig;
use crate::core::error::{RegistryError, RegistryResult};
use crate::core::time::{elapsed_ms, SharedClock};
use crate::model::instance::split_addresses;
use crate::model::{Application, Applications};
use crate::ops::observability::RegistryMetrics;
use crate::registry::InvalidationListener;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Registry views the cache renders payloads from.
pub trait SnapshotSource: Send + Sync {
    /// Every published instance.
    fn applications(&self) -> Applications;

    /// Recently changed instances, with the full-registry hash code.
    fn application_deltas(&self) -> Applications;

    /// One application, if it has instances.
    fn application(&self, name: &str) -> Option<Application>;

    /// Instances serving a VIP.
    fn applications_for_vip(&self, vip: &str) -> Applications;

    /// Instances serving a secure VIP.
    fn applications_for_secure_vip(&self, vip: &str) -> Applications;

    /// Full registry including remote regions. Single-region sources return
    /// the local view.
    fn applications_for_regions(&self, _regions: &[String]) -> Applications {
        self.applications()
    }

    /// Delta including remote regions.
    fn application_deltas_for_regions(&self, _regions: &[String]) -> Applications {
        self.application_deltas()
    }
}

/// A read-write tier entry: created on miss, filled exactly once.
#[derive(Debug)]
struct Slot {
    created_at_ms: u64,
    value: OnceLock<Arc<CacheValue>>,
}

#[derive(Debug, Default)]
struct ReadWriteTier {
    slots: HashMap<CacheKey, Arc<Slot>>,
    /// Region-less key → region-qualified keys created from it.
    regional: HashMap<CacheKey, HashSet<CacheKey>>,
}

impl ReadWriteTier {
    fn insert(&mut self, key: &CacheKey, slot: Arc<Slot>) {
        if key.has_regions() {
            self.regional
                .entry(key.without_regions())
                .or_default()
                .insert(key.clone());
        }
        self.slots.insert(key.clone(), slot);
    }

    /// Drop a slot for capacity or expiry. The reverse index entry stays, as
    /// the read-only tier may still serve the key until it is invalidated.
    fn evict(&mut self, key: &CacheKey) -> bool {
        self.slots.remove(key).is_some()
    }

    /// Drop a slot and its reverse index entry.
    fn remove(&mut self, key: &CacheKey) -> bool {
        let removed = self.evict(key);
        if key.has_regions() {
            let base = key.without_regions();
            if let Some(keys) = self.regional.get_mut(&base) {
                keys.remove(key);
                if keys.is_empty() {
                    self.regional.remove(&base);
                }
            }
        }
        removed
    }

    fn oldest(&self) -> Option<CacheKey> {
        self.slots
            .iter()
            .min_by_key(|(_, slot)| slot.created_at_ms)
            .map(|(key, _)| key.clone())
    }
}

/// Two-tier, versioned response cache.
pub struct ResponseCache {
    config: ResponseCacheConfig,
    source: Arc<dyn SnapshotSource>,
    codec: Arc<dyn PayloadCodec>,
    clock: SharedClock,
    metrics: Arc<RegistryMetrics>,
    read_write: Mutex<ReadWriteTier>,
    read_only: RwLock<HashMap<CacheKey, Arc<CacheValue>>>,
    delta_version: AtomicU64,
    delta_version_with_regions: AtomicU64,
    generation: AtomicU64,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("read_write_entries", &self.len())
            .field("read_only_entries", &self.read_only_len())
            .field("generation", &self.generation())
            .finish()
    }
}

impl ResponseCache {
    pub fn new(
        config: ResponseCacheConfig,
        source: Arc<dyn SnapshotSource>,
        codec: Arc<dyn PayloadCodec>,
        clock: SharedClock,
        metrics: Arc<RegistryMetrics>,
    ) -> Self {
        Self {
            config,
            source,
            codec,
            clock,
            metrics,
            read_write: Mutex::new(ReadWriteTier::default()),
            read_only: RwLock::new(HashMap::new()),
            delta_version: AtomicU64::new(0),
            delta_version_with_regions: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Payload for a key; `None` when the entity does not exist, generation
    /// failed, or the cache is shut down.
    pub fn get(&self, key: &CacheKey) -> Option<String> {
        self.get_value(key)
            .filter(|value| !value.is_empty())
            .map(|value| value.payload().to_string())
    }

    /// Gzip payload for a key.
    pub fn get_gzip(&self, key: &CacheKey) -> Option<Bytes> {
        self.get_value(key)
            .and_then(|value| value.gzipped().cloned())
    }

    /// The cached value object itself, honouring the read-only tier setting.
    pub fn get_value(&self, key: &CacheKey) -> Option<Arc<CacheValue>> {
        if self.is_shut_down() {
            return None;
        }
        if !self.config.use_read_only_cache {
            return Some(self.load(key).1);
        }

        let cached = self.read_only.read().get(key).cloned();
        if let Some(value) = cached {
            self.metrics.record_read_only_hit();
            return Some(value);
        }

        let (slot, value) = self.load(key);
        self.backfill(key, &slot, &value);
        Some(value)
    }

    /// Copy a freshly loaded value into the read-only tier unless the slot was
    /// invalidated in the meantime.
    fn backfill(&self, key: &CacheKey, slot: &Arc<Slot>, value: &Arc<CacheValue>) {
        let tier = self.read_write.lock();
        let still_current = tier
            .slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot));
        if still_current && !self.is_shut_down() {
            self.read_only.write().insert(key.clone(), value.clone());
        }
    }

    /// Read-write tier lookup, generating on miss or expiry.
    fn load(&self, key: &CacheKey) -> (Arc<Slot>, Arc<CacheValue>) {
        let slot = {
            let mut tier = self.read_write.lock();
            let now = self.clock.now_ms();
            let live = tier
                .slots
                .get(key)
                .filter(|slot| !self.is_expired(slot, now))
                .cloned();
            match live {
                Some(slot) => slot,
                None => {
                    tier.evict(key);
                    while tier.slots.len() >= self.config.max_entries {
                        let Some(oldest) = tier.oldest() else {
                            break;
                        };
                        tier.evict(&oldest);
                    }
                    let slot = Arc::new(Slot {
                        created_at_ms: now,
                        value: OnceLock::new(),
                    });
                    tier.insert(key, slot.clone());
                    self.metrics.set_cache_size(tier.slots.len());
                    slot
                }
            }
        };
        let value = slot.value.get_or_init(|| self.generate(key)).clone();
        (slot, value)
    }

    fn is_expired(&self, slot: &Slot, now_ms: u64) -> bool {
        elapsed_ms(slot.created_at_ms, now_ms) >= self.config.auto_expiration_ms
    }

    fn generate(&self, key: &CacheKey) -> Arc<CacheValue> {
        let started = Instant::now();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let value = match self.render(key).and_then(|payload| {
            payload.map_or(Ok(CacheValue::empty(generation)), |p| {
                CacheValue::new(p, generation)
            })
        }) {
            Ok(value) => {
                self.metrics
                    .record_cache_generated(started.elapsed().as_secs_f64() * 1_000.0);
                value
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "cannot generate payload");
                self.metrics.record_cache_generation_failed();
                CacheValue::empty(generation)
            }
        };
        tracing::trace!(key = %key, generation, "payload generated");
        Arc::new(value)
    }

    /// Render the payload for a key; `Ok(None)` when the entity is unknown.
    fn render(&self, key: &CacheKey) -> RegistryResult<Option<String>> {
        let encoding = key.encoding();
        let version = key.api_version();
        let apps = match key.entity_type() {
            EntityType::Application => match key.name() {
                ALL_APPS => match key.regions() {
                    Some(regions) => self.source.applications_for_regions(regions),
                    None => self.source.applications(),
                },
                ALL_APPS_DELTA => {
                    let (mut apps, counter) = match key.regions() {
                        Some(regions) => (
                            self.source.application_deltas_for_regions(regions),
                            &self.delta_version_with_regions,
                        ),
                        None => (self.source.application_deltas(), &self.delta_version),
                    };
                    apps.version = counter.fetch_add(1, Ordering::AcqRel) + 1;
                    apps
                }
                name => {
                    return match self.source.application(name) {
                        Some(app) => self
                            .codec
                            .encode_application(&app, encoding, version)
                            .map(Some),
                        None => Ok(None),
                    };
                }
            },
            EntityType::Vip => self.source.applications_for_vip(key.name()),
            EntityType::Svip => self.source.applications_for_secure_vip(key.name()),
        };
        self.codec
            .encode_applications(&apps, encoding, version)
            .map(Some)
    }

    /// Invalidate every key affected by a change to `app_name` and the given
    /// comma-separated VIP lists, across all encodings and API versions.
    pub fn invalidate(&self, app_name: &str, vip: Option<&str>, secure_vip: Option<&str>) {
        let mut keys = Vec::new();
        for encoding in Encoding::ALL {
            for version in ApiVersion::ALL {
                keys.push(CacheKey::application(app_name, encoding, version));
                keys.push(CacheKey::all_apps(encoding, version));
                keys.push(CacheKey::all_apps_delta(encoding, version));
                for name in split_addresses(vip) {
                    keys.push(CacheKey::vip(name, encoding, version));
                }
                for name in split_addresses(secure_vip) {
                    keys.push(CacheKey::svip(name, encoding, version));
                }
            }
        }
        self.invalidate_keys(&keys);
    }

    /// Invalidate specific keys and every regional variant of them.
    pub fn invalidate_keys(&self, keys: &[CacheKey]) {
        let mut tier = self.read_write.lock();
        let mut read_only = self.read_only.write();
        let mut invalidated = 0;
        for key in keys {
            let regional: Vec<CacheKey> = tier
                .regional
                .get(key)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();
            for target in regional.iter().chain(std::iter::once(key)) {
                let in_rw = tier.remove(target);
                let in_ro = read_only.remove(target).is_some();
                if in_rw || in_ro {
                    invalidated += 1;
                }
            }
        }
        self.metrics.set_cache_size(tier.slots.len());
        drop(read_only);
        drop(tier);
        if invalidated > 0 {
            tracing::debug!(keys = invalidated, "response cache keys invalidated");
            self.metrics.record_invalidated(invalidated);
        }
    }

    /// Refresh the read-only tier from the read-write tier.
    ///
    /// An entry is replaced only when the read-write tier holds a different
    /// value object for it. Returns the number of replaced entries.
    pub fn refresh_read_only(&self) -> usize {
        if self.is_shut_down() {
            return 0;
        }
        let snapshot: Vec<(CacheKey, Arc<CacheValue>)> = self
            .read_only
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut replaced = 0;
        for (key, current) in snapshot {
            let (slot, fresh) = self.load(&key);
            if Arc::ptr_eq(&current, &fresh) {
                continue;
            }
            let tier = self.read_write.lock();
            let still_current = tier
                .slots
                .get(&key)
                .is_some_and(|s| Arc::ptr_eq(s, &slot));
            if still_current {
                self.read_only.write().insert(key, fresh);
                replaced += 1;
            }
        }
        replaced
    }

    /// Drop read-write entries past their lifetime. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut tier = self.read_write.lock();
        let now = self.clock.now_ms();
        let expired: Vec<CacheKey> = tier
            .slots
            .iter()
            .filter(|(_, slot)| self.is_expired(slot, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            tier.evict(key);
        }
        self.metrics.set_cache_size(tier.slots.len());
        expired.len()
    }

    /// Spawn the periodic read-only tier refresh.
    pub fn spawn_refresh(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = Duration::from_millis(self.config.update_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = self.purge_expired();
                        let replaced = if self.config.use_read_only_cache {
                            self.refresh_read_only()
                        } else {
                            0
                        };
                        if purged + replaced > 0 {
                            tracing::debug!(purged, replaced, "response cache refreshed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
                if self.is_shut_down() {
                    break;
                }
            }
            tracing::debug!("response cache refresh stopped");
        })
    }

    /// Entries in the read-write tier.
    pub fn len(&self) -> usize {
        self.read_write.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in the read-only tier.
    pub fn read_only_len(&self) -> usize {
        self.read_only.read().len()
    }

    /// Regional keys currently tracked for a region-less key.
    pub fn regional_keys(&self, key: &CacheKey) -> usize {
        self.read_write
            .lock()
            .regional
            .get(key)
            .map_or(0, HashSet::len)
    }

    /// Number of payloads generated so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Last delta version served to region-less requests.
    pub fn delta_version(&self) -> u64 {
        self.delta_version.load(Ordering::Acquire)
    }

    /// Last delta version served to region-qualified requests.
    pub fn delta_version_with_regions(&self) -> u64 {
        self.delta_version_with_regions.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Release every entry; subsequent reads return `None`.
    pub fn shutdown(&self) -> RegistryResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut tier = self.read_write.lock();
        tier.slots.clear();
        tier.regional.clear();
        drop(tier);
        self.read_only.write().clear();
        self.metrics.set_cache_size(0);
        tracing::info!("response cache shut down");
        Ok(())
    }

    /// Fail fast for callers that need a live cache.
    pub fn ensure_running(&self) -> RegistryResult<()> {
        if self.is_shut_down() {
            Err(RegistryError::shut_down("response cache"))
        } else {
            Ok(())
        }
    }
}

impl InvalidationListener for ResponseCache {
    fn invalidate(&self, app_name: &str, vip: Option<&str>, secure_vip: Option<&str>) {
        ResponseCache::invalidate(self, app_name, vip, secure_vip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::codec::JsonCodec;
    use crate::core::time::ManualClock;
    use crate::model::InstanceRecord;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct FakeSource {
        records: Mutex<Vec<Arc<InstanceRecord>>>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn put(&self, id: &str, app: &str, vip: &str) {
            let mut records = self.records.lock();
            records.retain(|r| r.id != id);
            records.push(Arc::new(
                InstanceRecord::builder(id, app).vip_address(vip).build(),
            ));
        }

        fn all(&self) -> Vec<Arc<InstanceRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.records.lock().clone()
        }
    }

    impl SnapshotSource for FakeSource {
        fn applications(&self) -> Applications {
            Applications::from_records(self.all())
        }

        fn application_deltas(&self) -> Applications {
            Applications::from_records(self.all())
        }

        fn application(&self, name: &str) -> Option<Application> {
            Applications::from_records(self.all())
                .application(name)
                .cloned()
        }

        fn applications_for_vip(&self, vip: &str) -> Applications {
            Applications::from_records(
                self.all()
                    .into_iter()
                    .filter(|r| r.vip_addresses().any(|v| v == vip)),
            )
        }

        fn applications_for_secure_vip(&self, _vip: &str) -> Applications {
            Applications::new()
        }
    }

    fn cache_with(config: ResponseCacheConfig) -> (Arc<FakeSource>, Arc<ManualClock>, ResponseCache) {
        let source = Arc::new(FakeSource::default());
        source.put("i1", "A", "a.vip");
        source.put("i2", "B", "b.vip");
        let clock = ManualClock::shared(0);
        let cache = ResponseCache::new(
            config,
            source.clone(),
            Arc::new(JsonCodec),
            clock.clone(),
            Arc::new(RegistryMetrics::new()),
        );
        (source, clock, cache)
    }

    fn key(app: &str) -> CacheKey {
        CacheKey::application(app, Encoding::Json, ApiVersion::V2)
    }

    #[test]
    fn test_hit_reuses_value() {
        let (source, _clock, cache) = cache_with(ResponseCacheConfig::default());
        let first = cache.get_value(&key("A")).unwrap();
        let second = cache.get_value(&key("A")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.read_only_len(), 1);
    }

    #[test]
    fn test_unknown_application_is_none() {
        let (_source, _clock, cache) = cache_with(ResponseCacheConfig::default());
        assert!(cache.get(&key("Z")).is_none());
        assert!(cache.get_gzip(&key("Z")).is_none());
    }

    #[test]
    fn test_xml_generation_failure_is_none() {
        let (_source, _clock, cache) = cache_with(ResponseCacheConfig::default());
        let xml = CacheKey::application("A", Encoding::Xml, ApiVersion::V2);
        assert!(cache.get(&xml).is_none());
        assert!(cache.get(&key("A")).is_some());
    }

    #[test]
    fn test_invalidate_regenerates_only_affected() {
        let (_source, _clock, cache) = cache_with(ResponseCacheConfig::default());
        let a1 = cache.get_value(&key("A")).unwrap();
        let b1 = cache.get_value(&key("B")).unwrap();

        cache.invalidate("A", Some("a.vip"), None);

        let a2 = cache.get_value(&key("A")).unwrap();
        let b2 = cache.get_value(&key("B")).unwrap();
        assert!(!Arc::ptr_eq(&a1, &a2));
        assert!(a2.generation() > a1.generation());
        assert!(Arc::ptr_eq(&b1, &b2));
    }

    #[test]
    fn test_regional_keys_cascade() {
        let (_source, _clock, cache) = cache_with(ResponseCacheConfig::default());
        let base = CacheKey::all_apps(Encoding::Json, ApiVersion::V2);
        let regional = base.with_regions(["eu"]);
        let before = cache.get_value(&regional).unwrap();
        assert_eq!(cache.regional_keys(&base), 1);

        cache.invalidate("A", None, None);
        assert_eq!(cache.regional_keys(&base), 0);
        let after = cache.get_value(&regional).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_delta_versions_are_separate() {
        let (_source, _clock, cache) = cache_with(ResponseCacheConfig::default());
        let delta = CacheKey::all_apps_delta(Encoding::Json, ApiVersion::V2);
        let first = cache.get(&delta).unwrap();
        assert_eq!(cache.get(&delta).unwrap(), first);
        assert_eq!(cache.delta_version(), 1);

        cache.get(&delta.with_regions(["eu"])).unwrap();
        assert_eq!(cache.delta_version_with_regions(), 1);

        cache.invalidate("A", None, None);
        cache.get(&delta).unwrap();
        assert_eq!(cache.delta_version(), 2);
    }

    #[test]
    fn test_expiry_and_refresh() {
        let config = ResponseCacheConfig {
            auto_expiration_ms: 1_000,
            ..ResponseCacheConfig::default()
        };
        let (source, clock, cache) = cache_with(config);
        let first = cache.get_value(&key("A")).unwrap();
        assert_eq!(cache.refresh_read_only(), 0);

        clock.advance(1_000);
        source.put("i1", "A", "moved.vip");
        assert_eq!(cache.refresh_read_only(), 1);
        let refreshed = cache.get_value(&key("A")).unwrap();
        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert!(cache.get(&key("A")).unwrap().contains("moved.vip"));
    }

    #[test]
    fn test_capacity_bound() {
        let config = ResponseCacheConfig {
            max_entries: 2,
            use_read_only_cache: false,
            ..ResponseCacheConfig::default()
        };
        let (_source, clock, cache) = cache_with(config);
        cache.get(&key("A"));
        clock.advance(1);
        cache.get(&key("B"));
        clock.advance(1);
        cache.get(&CacheKey::all_apps(Encoding::Json, ApiVersion::V1));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_capacity_eviction_keeps_regional_index() {
        let config = ResponseCacheConfig {
            max_entries: 1,
            ..ResponseCacheConfig::default()
        };
        let (_source, clock, cache) = cache_with(config);
        let base = CacheKey::all_apps(Encoding::Json, ApiVersion::V2);
        let regional = base.with_regions(["eu"]);
        cache.get(&regional);
        clock.advance(1);
        cache.get(&key("A"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.read_only_len(), 2);
        assert_eq!(cache.regional_keys(&base), 1);

        cache.invalidate("A", None, None);
        assert_eq!(cache.regional_keys(&base), 0);
        assert_eq!(cache.read_only_len(), 0);
    }

    #[test]
    fn test_shutdown_is_terminal() {
        let (_source, _clock, cache) = cache_with(ResponseCacheConfig::default());
        assert!(cache.get(&key("A")).is_some());
        cache.shutdown().unwrap();
        cache.shutdown().unwrap();
        assert!(cache.get(&key("A")).is_none());
        assert!(cache.is_empty());
        assert!(cache.ensure_running().is_err());
    }

    #[test]
    fn test_concurrent_readers_share_generation() {
        let (source, _clock, cache) = cache_with(ResponseCacheConfig::default());
        let cache = Arc::new(cache);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.get_value(&key("A")).unwrap().generation())
            })
            .collect();
        let generations: HashSet<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(generations.len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
