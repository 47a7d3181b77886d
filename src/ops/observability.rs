//! Metrics and health checks.
//!
//! Metric namespaces:
//! - registry.*
//! - eviction.*
//! - cache.*

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Health check result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Overall healthy state.
    pub healthy: bool,
    /// Registry is refusing evictions to protect itself.
    pub self_preservation: bool,
    /// Status message.
    pub message: String,
}

impl HealthStatus {
    /// Create a healthy status.
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            self_preservation: false,
            message: "OK".to_string(),
        }
    }

    /// Create an unhealthy status.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            self_preservation: false,
            message: message.into(),
        }
    }
}

/// Metric names.
pub mod metrics {
    /// Published instance count gauge.
    pub const REGISTRY_SIZE: &str = "registry.size";
    /// Registrations per origin, suffixed with the origin.
    pub const REGISTER_TOTAL: &str = "registry.register_total";
    /// Removals per origin, suffixed with the origin.
    pub const UNREGISTER_TOTAL: &str = "registry.unregister_total";
    /// Successful renewals counter.
    pub const RENEW_TOTAL: &str = "registry.renew_total";
    /// Renewals for unknown instances counter.
    pub const RENEW_NOT_FOUND_TOTAL: &str = "registry.renew_not_found_total";
    /// Cancels for unknown instances counter.
    pub const CANCEL_NOT_FOUND_TOTAL: &str = "registry.cancel_not_found_total";
    /// Stale writes ignored counter.
    pub const STALE_WRITE_TOTAL: &str = "registry.stale_write_total";
    /// Change notifications published counter.
    pub const NOTIFICATIONS_TOTAL: &str = "registry.notifications_total";
    /// Expected registry size gauge.
    pub const EXPECTED_SIZE: &str = "eviction.expected_size";
    /// Pending eviction gauge.
    pub const EVICTION_QUEUE_DEPTH: &str = "eviction.queue_depth";
    /// Self-preservation flag gauge (0/1).
    pub const SELF_PRESERVATION: &str = "eviction.self_preservation";
    /// Evicted copies counter.
    pub const EVICTED_TOTAL: &str = "eviction.evicted_total";
    /// Evictions dropped after exhausting retries.
    pub const EVICTION_FAILED_TOTAL: &str = "eviction.failed_total";
    /// Evictions skipped because the copy was renewed or replaced.
    pub const EVICTION_SKIPPED_TOTAL: &str = "eviction.skipped_total";
    /// Read-write tier entries gauge.
    pub const CACHE_SIZE: &str = "cache.size";
    /// Payload generations counter.
    pub const CACHE_GENERATED_TOTAL: &str = "cache.generated_total";
    /// Payload generation failures counter.
    pub const CACHE_GENERATION_FAILED_TOTAL: &str = "cache.generation_failed_total";
    /// Payload generation latency histogram.
    pub const CACHE_GENERATION_MS: &str = "cache.generation_ms";
    /// Read-only tier hits counter.
    pub const CACHE_HITS_READ_ONLY_TOTAL: &str = "cache.hits_read_only_total";
    /// Invalidated keys counter.
    pub const CACHE_INVALIDATED_TOTAL: &str = "cache.invalidated_total";
}

/// In-process metrics registry.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Counter metrics.
    counters: RwLock<HashMap<String, AtomicU64>>,
    /// Gauge metrics.
    gauges: RwLock<HashMap<String, AtomicU64>>,
    /// Histogram observations (count, sum, min, max).
    histograms: RwLock<HashMap<String, HistogramData>>,
}

impl MetricsRegistry {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter.
    pub fn counter_inc(&self, name: &str) {
        self.counter_add(name, 1);
    }

    /// Add to a counter.
    pub fn counter_add(&self, name: &str, value: u64) {
        let counters = self.counters.read();
        if let Some(counter) = counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        drop(counters);

        self.counters
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Get counter value.
    pub fn counter_get(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Set a gauge value.
    pub fn gauge_set(&self, name: &str, value: u64) {
        let gauges = self.gauges.read();
        if let Some(gauge) = gauges.get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        drop(gauges);

        self.gauges
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(value, Ordering::Relaxed);
    }

    /// Get gauge value.
    pub fn gauge_get(&self, name: &str) -> u64 {
        self.gauges
            .read()
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record a histogram observation.
    pub fn histogram_observe(&self, name: &str, value: f64) {
        let histograms = self.histograms.read();
        if let Some(data) = histograms.get(name) {
            data.observe(value);
            return;
        }
        drop(histograms);

        self.histograms
            .write()
            .entry(name.to_string())
            .or_insert_with(HistogramData::new)
            .observe(value);
    }

    /// Get histogram data.
    pub fn histogram_get(&self, name: &str) -> Option<HistogramSnapshot> {
        self.histograms.read().get(name).map(HistogramData::snapshot)
    }

    /// Export metrics in Prometheus text format, sorted by name.
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        let counters: BTreeMap<String, u64> = self
            .counters
            .read()
            .iter()
            .map(|(name, value)| (name.clone(), value.load(Ordering::Relaxed)))
            .collect();
        for (name, value) in counters {
            let prometheus_name = prometheus_name(&name);
            output.push_str(&format!(
                "# TYPE {prometheus_name} counter\n{prometheus_name} {value}\n"
            ));
        }

        let gauges: BTreeMap<String, u64> = self
            .gauges
            .read()
            .iter()
            .map(|(name, value)| (name.clone(), value.load(Ordering::Relaxed)))
            .collect();
        for (name, value) in gauges {
            let prometheus_name = prometheus_name(&name);
            output.push_str(&format!(
                "# TYPE {prometheus_name} gauge\n{prometheus_name} {value}\n"
            ));
        }

        let histograms: BTreeMap<String, HistogramSnapshot> = self
            .histograms
            .read()
            .iter()
            .map(|(name, data)| (name.clone(), data.snapshot()))
            .collect();
        for (name, snapshot) in histograms {
            let prometheus_name = prometheus_name(&name);
            output.push_str(&format!(
                "# TYPE {0} histogram\n{0}_count {1}\n{0}_sum {2}\n",
                prometheus_name, snapshot.count, snapshot.sum
            ));
        }

        output
    }
}

fn prometheus_name(name: &str) -> String {
    name.replace(['.', '-'], "_")
}

/// Histogram data storage.
#[derive(Debug)]
struct HistogramData {
    count: AtomicU64,
    bounds: Mutex<(f64, f64, f64)>,
}

impl HistogramData {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            bounds: Mutex::new((0.0, f64::MAX, f64::MIN)),
        }
    }

    fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let mut bounds = self.bounds.lock();
        bounds.0 += value;
        bounds.1 = bounds.1.min(value);
        bounds.2 = bounds.2.max(value);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let (sum, min, max) = *self.bounds.lock();
        HistogramSnapshot {
            count: self.count.load(Ordering::Relaxed),
            sum,
            min,
            max,
        }
    }
}

/// Histogram snapshot.
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    /// Number of observations.
    pub count: u64,
    /// Sum of all observations.
    pub sum: f64,
    /// Minimum value observed.
    pub min: f64,
    /// Maximum value observed.
    pub max: f64,
}

impl HistogramSnapshot {
    /// Calculate mean.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Registry-specific metrics collector.
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    /// Core registry.
    registry: MetricsRegistry,
}

impl RegistryMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the underlying registry.
    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    // === Registry store ===

    pub fn set_registry_size(&self, size: usize) {
        self.registry.gauge_set(metrics::REGISTRY_SIZE, size as u64);
    }

    pub fn record_register(&self, origin: &str) {
        self.registry
            .counter_inc(&format!("{}.{}", metrics::REGISTER_TOTAL, origin));
    }

    pub fn record_unregister(&self, origin: &str) {
        self.registry
            .counter_inc(&format!("{}.{}", metrics::UNREGISTER_TOTAL, origin));
    }

    pub fn record_renew(&self, found: bool) {
        if found {
            self.registry.counter_inc(metrics::RENEW_TOTAL);
        } else {
            self.registry.counter_inc(metrics::RENEW_NOT_FOUND_TOTAL);
        }
    }

    pub fn record_cancel_not_found(&self) {
        self.registry.counter_inc(metrics::CANCEL_NOT_FOUND_TOTAL);
    }

    pub fn record_stale_write(&self) {
        self.registry.counter_inc(metrics::STALE_WRITE_TOTAL);
    }

    pub fn record_notifications(&self, count: usize) {
        if count > 0 {
            self.registry
                .counter_add(metrics::NOTIFICATIONS_TOTAL, count as u64);
        }
    }

    // === Eviction ===

    pub fn set_expected_size(&self, size: usize) {
        self.registry.gauge_set(metrics::EXPECTED_SIZE, size as u64);
    }

    pub fn set_eviction_queue_depth(&self, depth: usize) {
        self.registry
            .gauge_set(metrics::EVICTION_QUEUE_DEPTH, depth as u64);
    }

    pub fn set_self_preservation(&self, active: bool) {
        self.registry
            .gauge_set(metrics::SELF_PRESERVATION, u64::from(active));
    }

    pub fn record_evicted(&self) {
        self.registry.counter_inc(metrics::EVICTED_TOTAL);
    }

    pub fn record_eviction_failed(&self) {
        self.registry.counter_inc(metrics::EVICTION_FAILED_TOTAL);
    }

    pub fn record_eviction_skipped(&self) {
        self.registry.counter_inc(metrics::EVICTION_SKIPPED_TOTAL);
    }

    // === Response cache ===

    pub fn set_cache_size(&self, size: usize) {
        self.registry.gauge_set(metrics::CACHE_SIZE, size as u64);
    }

    pub fn record_cache_generated(&self, latency_ms: f64) {
        self.registry.counter_inc(metrics::CACHE_GENERATED_TOTAL);
        self.registry
            .histogram_observe(metrics::CACHE_GENERATION_MS, latency_ms);
    }

    pub fn record_cache_generation_failed(&self) {
        self.registry
            .counter_inc(metrics::CACHE_GENERATION_FAILED_TOTAL);
    }

    pub fn record_read_only_hit(&self) {
        self.registry.counter_inc(metrics::CACHE_HITS_READ_ONLY_TOTAL);
    }

    pub fn record_invalidated(&self, keys: usize) {
        self.registry
            .counter_add(metrics::CACHE_INVALIDATED_TOTAL, keys as u64);
    }

    /// Export all metrics.
    pub fn export(&self) -> String {
        self.registry.export_prometheus()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_gauges() {
        let registry = MetricsRegistry::new();
        registry.counter_inc("a.b");
        registry.counter_add("a.b", 4);
        registry.gauge_set("g", 7);
        assert_eq!(registry.counter_get("a.b"), 5);
        assert_eq!(registry.gauge_get("g"), 7);
        assert_eq!(registry.counter_get("missing"), 0);
    }

    #[test]
    fn test_histogram() {
        let registry = MetricsRegistry::new();
        registry.histogram_observe("h", 2.0);
        registry.histogram_observe("h", 4.0);
        let snapshot = registry.histogram_get("h").unwrap();
        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.mean(), 3.0);
        assert_eq!(snapshot.min, 2.0);
        assert_eq!(snapshot.max, 4.0);
    }

    #[test]
    fn test_prometheus_export_is_sorted() {
        let metrics = RegistryMetrics::new();
        metrics.record_register("local");
        metrics.set_registry_size(3);
        metrics.set_self_preservation(true);

        let text = metrics.export();
        assert!(text.contains("registry_register_total_local 1"));
        assert!(text.contains("# TYPE registry_size gauge\nregistry_size 3"));
        let eviction = text.find("eviction_self_preservation").unwrap();
        let size = text.find("registry_size").unwrap();
        assert!(eviction < size);
    }
}
