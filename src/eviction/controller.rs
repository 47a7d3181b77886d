//! Eviction drain with self-preservation.
//!
//! The controller tracks an expected registry size (a high-water mark that
//! follows registrations and explicit cancels) and compares it with the actual
//! size before every eviction. When the registry has already shrunk below the
//! configured fraction of what it expects, the drain stops and the registry
//! enters self-preservation: the pending items stay queued until the registry
//! recovers or the expectation is lowered by explicit cancels.

use crate::core::config::EvictionConfig;
use crate::core::error::RegistryResult;
use crate::core::time::SharedClock;
use crate::eviction::queue::{EvictionItem, EvictionQueue};
use crate::eviction::strategy::{EvictionStrategy, PercentageDropStrategy};
use crate::ops::observability::RegistryMetrics;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What the controller evicts from.
pub trait EvictionTarget: Send + Sync {
    /// Current number of published instances.
    fn size(&self) -> usize;

    /// Remove the copy written by exactly `item.source`.
    ///
    /// Returns `Ok(false)` when there was nothing to remove (the copy was
    /// renewed, replaced, or already gone).
    fn evict(&self, item: &EvictionItem) -> RegistryResult<bool>;
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Copies removed.
    pub evicted: usize,
    /// Items that needed no removal.
    pub skipped: usize,
    /// Items dropped after exhausting their attempts.
    pub failed: usize,
    /// Whether the pass stopped on a zero quota.
    pub self_preservation: bool,
}

/// Quota-gated eviction drain.
pub struct EvictionController {
    target: Arc<dyn EvictionTarget>,
    queue: EvictionQueue,
    strategy: Box<dyn EvictionStrategy>,
    expected_size: AtomicUsize,
    self_preservation: AtomicBool,
    max_attempts: u32,
    drain_interval: Duration,
    clock: SharedClock,
    metrics: Arc<RegistryMetrics>,
}

impl std::fmt::Debug for EvictionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictionController")
            .field("queue_depth", &self.queue.len())
            .field("expected_size", &self.expected_size())
            .field("self_preservation", &self.is_self_preserving())
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl EvictionController {
    /// Create a controller using the percentage-drop strategy from config.
    pub fn new(
        config: &EvictionConfig,
        target: Arc<dyn EvictionTarget>,
        clock: SharedClock,
        metrics: Arc<RegistryMetrics>,
    ) -> Self {
        Self::with_strategy(
            config,
            target,
            Box::new(PercentageDropStrategy::new(config.renewal_percent_threshold)),
            clock,
            metrics,
        )
    }

    /// Create a controller with a custom strategy.
    pub fn with_strategy(
        config: &EvictionConfig,
        target: Arc<dyn EvictionTarget>,
        strategy: Box<dyn EvictionStrategy>,
        clock: SharedClock,
        metrics: Arc<RegistryMetrics>,
    ) -> Self {
        Self {
            target,
            queue: EvictionQueue::new(config.eviction_delay_ms),
            strategy,
            expected_size: AtomicUsize::new(0),
            self_preservation: AtomicBool::new(false),
            max_attempts: config.max_attempts.max(1),
            drain_interval: Duration::from_millis(config.drain_interval_ms),
            clock,
            metrics,
        }
    }

    pub fn queue(&self) -> &EvictionQueue {
        &self.queue
    }

    pub fn expected_size(&self) -> usize {
        self.expected_size.load(Ordering::Acquire)
    }

    pub fn is_self_preserving(&self) -> bool {
        self.self_preservation.load(Ordering::Acquire)
    }

    /// Current quota.
    pub fn allowed_to_evict(&self) -> usize {
        self.strategy
            .allowed_to_evict(self.expected_size(), self.target.size())
    }

    /// A registration created a new instance.
    pub fn on_registered(&self) {
        let actual = self.target.size();
        let expected = self
            .expected_size
            .fetch_max(actual, Ordering::AcqRel)
            .max(actual);
        self.metrics.set_expected_size(expected);
        self.resume();
    }

    /// An explicit cancel removed an instance.
    pub fn on_unregistered(&self) {
        let previous = self
            .expected_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        self.metrics.set_expected_size(previous.saturating_sub(1));
        self.resume();
    }

    /// Queue a copy for eviction.
    pub fn enqueue(&self, item: EvictionItem) {
        tracing::debug!(
            instance = %item.instance_id(),
            source = %item.source,
            reason = %item.reason,
            "eviction enqueued"
        );
        if self.queue.enqueue(item) {
            self.metrics.set_eviction_queue_depth(self.queue.len());
        }
    }

    /// Queue several copies for eviction. Returns how many were offered.
    pub fn enqueue_all(&self, items: impl IntoIterator<Item = EvictionItem>) -> usize {
        let mut count = 0;
        for item in items {
            self.enqueue(item);
            count += 1;
        }
        count
    }

    fn resume(&self) {
        if self.is_self_preserving() {
            self.queue.notify();
        }
    }

    fn set_self_preservation(&self, active: bool) {
        let previous = self.self_preservation.swap(active, Ordering::AcqRel);
        if previous != active {
            if active {
                tracing::info!(
                    expected_size = self.expected_size(),
                    actual_size = self.target.size(),
                    pending = self.queue.len(),
                    "entering self-preservation; evictions paused"
                );
            } else {
                tracing::info!(
                    expected_size = self.expected_size(),
                    actual_size = self.target.size(),
                    "leaving self-preservation; evictions resumed"
                );
            }
        }
        self.metrics.set_self_preservation(active);
    }

    /// Process every eligible item the quota admits.
    ///
    /// The quota is recomputed before each item. A zero quota leaves the item
    /// at the head of the queue and flags self-preservation.
    pub fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        loop {
            let now = self.clock.now_ms();
            if !self.queue.head_eligible(now) {
                break;
            }
            // With no expectation there is nothing to protect.
            if self.allowed_to_evict() == 0 && self.expected_size() > 0 {
                self.set_self_preservation(true);
                report.self_preservation = true;
                break;
            }
            let Some(item) = self.queue.pop_eligible(now) else {
                break;
            };
            if self.is_self_preserving() {
                self.set_self_preservation(false);
            }

            match self.evict_with_retry(&item) {
                Some(true) => {
                    report.evicted += 1;
                    self.metrics.record_evicted();
                }
                Some(false) => {
                    report.skipped += 1;
                    self.metrics.record_eviction_skipped();
                }
                None => {
                    report.failed += 1;
                    self.metrics.record_eviction_failed();
                }
            }
        }
        self.metrics.set_eviction_queue_depth(self.queue.len());
        report
    }

    fn evict_with_retry(&self, item: &EvictionItem) -> Option<bool> {
        for attempt in 1..=self.max_attempts {
            match self.target.evict(item) {
                Ok(removed) => {
                    if removed {
                        tracing::info!(
                            instance = %item.instance_id(),
                            source = %item.source,
                            reason = %item.reason,
                            "evicted"
                        );
                    }
                    return Some(removed);
                }
                Err(e) if attempt < self.max_attempts && !e.is_terminal() => {
                    tracing::warn!(
                        instance = %item.instance_id(),
                        attempt,
                        error = %e,
                        "eviction failed; retrying"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        instance = %item.instance_id(),
                        source = %item.source,
                        attempts = attempt,
                        error = %e,
                        "eviction dropped"
                    );
                    return None;
                }
            }
        }
        None
    }

    /// Spawn the background drain.
    ///
    /// Wakes on every drain interval, on enqueue, and when a registration or
    /// cancel may have lifted self-preservation.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.drain_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.queue.notified() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
                if self.queue.is_closed() {
                    break;
                }
                let report = self.drain();
                if report.evicted + report.failed > 0 {
                    tracing::debug!(
                        evicted = report.evicted,
                        skipped = report.skipped,
                        failed = report.failed,
                        pending = self.queue.len(),
                        "eviction drain pass"
                    );
                }
            }
            tracing::debug!("eviction drain stopped");
        })
    }

    /// Drop pending items and stop accepting new ones.
    pub fn shutdown(&self) {
        let dropped = self.queue.shutdown();
        if dropped > 0 {
            tracing::info!(dropped, "eviction queue shut down with pending items");
        }
        self.metrics.set_eviction_queue_depth(0);
    }
}
