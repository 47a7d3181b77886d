//! Delay queue of pending evictions.

use crate::model::{InstanceRecord, Source};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Why a copy was queued for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// The copy's lease ran out.
    LeaseExpired,
    /// The connection that wrote the copy went away.
    SourceDisconnected,
    /// A newer registration stream for the same instance replaced it.
    Superseded,
    /// Bulk eviction of everything outside a retained set.
    Retired,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::LeaseExpired => "lease_expired",
            Self::SourceDisconnected => "source_disconnected",
            Self::Superseded => "superseded",
            Self::Retired => "retired",
        };
        f.write_str(label)
    }
}

/// A copy waiting to be removed from the registry.
#[derive(Debug, Clone)]
pub struct EvictionItem {
    pub record: Arc<InstanceRecord>,
    pub source: Source,
    pub enqueued_at_ms: u64,
    pub reason: EvictionReason,
}

impl EvictionItem {
    pub fn new(
        record: Arc<InstanceRecord>,
        source: Source,
        reason: EvictionReason,
        enqueued_at_ms: u64,
    ) -> Self {
        Self {
            record,
            source,
            enqueued_at_ms,
            reason,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.record.id
    }

    /// Whether the item has waited out the queue delay.
    pub fn is_eligible_at(&self, now_ms: u64, delay_ms: u64) -> bool {
        now_ms >= self.enqueued_at_ms.saturating_add(delay_ms)
    }
}

/// FIFO queue whose head only becomes available after a fixed delay.
///
/// Items are enqueued in time order, so eligibility is monotone along the
/// queue and only the head needs checking.
#[derive(Debug)]
pub struct EvictionQueue {
    items: Mutex<VecDeque<EvictionItem>>,
    delay_ms: u64,
    wakeup: Notify,
    closed: AtomicBool,
}

impl EvictionQueue {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            delay_ms,
            wakeup: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// Append an item. Returns false once the queue is shut down.
    pub fn enqueue(&self, item: EvictionItem) -> bool {
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(
                instance = %item.instance_id(),
                source = %item.source,
                "eviction queue closed; dropping item"
            );
            return false;
        }
        self.items.lock().push_back(item);
        self.wakeup.notify_one();
        true
    }

    /// Whether the head item may be processed now.
    pub fn head_eligible(&self, now_ms: u64) -> bool {
        self.items
            .lock()
            .front()
            .is_some_and(|item| item.is_eligible_at(now_ms, self.delay_ms))
    }

    /// Remove and return the head item if it is eligible.
    pub fn pop_eligible(&self, now_ms: u64) -> Option<EvictionItem> {
        let mut items = self.items.lock();
        if items
            .front()
            .is_some_and(|item| item.is_eligible_at(now_ms, self.delay_ms))
        {
            items.pop_front()
        } else {
            None
        }
    }

    /// When the head item becomes eligible, if there is one.
    pub fn next_eligible_at(&self) -> Option<u64> {
        self.items
            .lock()
            .front()
            .map(|item| item.enqueued_at_ms.saturating_add(self.delay_ms))
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Wake the drain task.
    pub fn notify(&self) {
        self.wakeup.notify_one();
    }

    /// Wait until an item is enqueued or `notify` is called.
    pub async fn notified(&self) {
        self.wakeup.notified().await;
    }

    /// Drop every pending item and refuse new ones.
    pub fn shutdown(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let mut items = self.items.lock();
        let dropped = items.len();
        items.clear();
        drop(items);
        self.wakeup.notify_waiters();
        dropped
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, at: u64) -> EvictionItem {
        EvictionItem::new(
            Arc::new(InstanceRecord::builder(id, "A").build()),
            Source::local("c", "1"),
            EvictionReason::LeaseExpired,
            at,
        )
    }

    #[test]
    fn test_head_respects_delay() {
        let queue = EvictionQueue::new(1_000);
        queue.enqueue(item("i1", 100));
        queue.enqueue(item("i2", 600));

        assert!(!queue.head_eligible(1_099));
        assert!(queue.pop_eligible(1_099).is_none());
        assert_eq!(queue.next_eligible_at(), Some(1_100));

        let first = queue.pop_eligible(1_100).unwrap();
        assert_eq!(first.instance_id(), "i1");
        assert!(queue.pop_eligible(1_100).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_shutdown_drops_and_rejects() {
        let queue = EvictionQueue::new(0);
        queue.enqueue(item("i1", 0));
        assert_eq!(queue.shutdown(), 1);
        assert!(!queue.enqueue(item("i2", 0)));
        assert!(queue.is_empty());
        assert!(queue.is_closed());
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(EvictionReason::SourceDisconnected.to_string(), "source_disconnected");
    }
}
