//! Recently changed records and recent activity rings.

use crate::model::{ActionType, InstanceRecord};
use std::collections::VecDeque;
use std::sync::Arc;

/// A record as it looked right after an accepted change.
#[derive(Debug, Clone)]
pub struct RecentChange {
    pub changed_at_ms: u64,
    pub record: Arc<InstanceRecord>,
}

/// Time-ordered queue of changes backing delta payloads.
#[derive(Debug, Default)]
pub struct RecentlyChanged {
    changes: VecDeque<RecentChange>,
}

impl RecentlyChanged {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change, stamping the record with its action type.
    pub fn push(&mut self, record: &InstanceRecord, action: ActionType, now_ms: u64) {
        let mut stamped = record.clone();
        stamped.action_type = Some(action);
        stamped.last_updated_timestamp = now_ms;
        self.changes.push_back(RecentChange {
            changed_at_ms: now_ms,
            record: Arc::new(stamped),
        });
    }

    /// Drop changes older than `retention_ms`. Returns how many were dropped.
    pub fn purge(&mut self, now_ms: u64, retention_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(retention_ms);
        let mut purged = 0;
        while self
            .changes
            .front()
            .is_some_and(|change| change.changed_at_ms < cutoff)
        {
            self.changes.pop_front();
            purged += 1;
        }
        purged
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecentChange> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }
}

/// Bounded ring of `(timestamp, "APP(id)")` entries, newest last.
#[derive(Debug)]
pub struct ActivityRing {
    capacity: usize,
    entries: VecDeque<(u64, String)>,
}

impl ActivityRing {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(64)),
        }
    }

    pub fn push(&mut self, at_ms: u64, app: &str, id: &str) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((at_ms, format!("{app}({id})")));
    }

    pub fn entries(&self) -> Vec<(u64, String)> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ActivityRing {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
