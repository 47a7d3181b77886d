//! Lease tracking for stored copies.
//!
//! Each copy held by the registry is covered by a lease keyed by
//! `(instance id, logical source)`:
//! `LeaseKey → Lease{duration_ms, registered_at_ms, renewed_at_ms, deadline_ms}`
//!
//! An expired lease never removes a copy directly. The expiry scan hands the
//! copy to the eviction queue, where self-preservation decides whether it goes.

use crate::model::LogicalSource;
use std::collections::HashMap;

/// Identifies the lease of one stored copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseKey {
    pub instance_id: String,
    pub source: LogicalSource,
}

impl LeaseKey {
    pub fn new(instance_id: impl Into<String>, source: LogicalSource) -> Self {
        Self {
            instance_id: instance_id.into(),
            source,
        }
    }
}

/// A lease on one stored copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Lease duration in milliseconds.
    pub duration_ms: u64,

    /// Time the copy was first registered.
    pub registered_at_ms: u64,

    /// Time of the last renewal (or registration).
    pub renewed_at_ms: u64,

    /// Time the lease expires unless renewed.
    pub deadline_ms: u64,

    /// Set once the expiry scan handed the copy to the eviction queue.
    pub eviction_pending: bool,
}

impl Lease {
    /// Create a new lease.
    pub fn new(duration_ms: u64, now_ms: u64) -> Self {
        Self {
            duration_ms,
            registered_at_ms: now_ms,
            renewed_at_ms: now_ms,
            deadline_ms: now_ms.saturating_add(duration_ms),
            eviction_pending: false,
        }
    }

    /// Check if the lease has expired at the given time.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.deadline_ms
    }

    /// Remaining lifetime at the given time.
    pub fn remaining_ms_at(&self, now_ms: u64) -> u64 {
        self.deadline_ms.saturating_sub(now_ms)
    }

    /// Extend the deadline (renew the lease).
    pub fn renew(&mut self, now_ms: u64) {
        self.renewed_at_ms = now_ms;
        self.deadline_ms = now_ms.saturating_add(self.duration_ms);
        self.eviction_pending = false;
    }
}

/// Leases of every stored copy.
#[derive(Debug, Default)]
pub struct LeaseTable {
    leases: HashMap<LeaseKey, Lease>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a lease, keeping the original registration time if one exists.
    pub fn grant(&mut self, key: LeaseKey, duration_ms: u64, now_ms: u64) {
        match self.leases.get_mut(&key) {
            Some(lease) => {
                lease.duration_ms = duration_ms;
                lease.renew(now_ms);
            }
            None => {
                self.leases.insert(key, Lease::new(duration_ms, now_ms));
            }
        }
    }

    /// Renew an existing lease. Returns false when no lease exists.
    pub fn renew(&mut self, key: &LeaseKey, now_ms: u64) -> bool {
        match self.leases.get_mut(key) {
            Some(lease) => {
                lease.renew(now_ms);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &LeaseKey) -> Option<&Lease> {
        self.leases.get(key)
    }

    pub fn revoke(&mut self, key: &LeaseKey) -> Option<Lease> {
        self.leases.remove(key)
    }

    /// Expired leases not yet handed to the eviction queue, marked pending.
    pub fn take_expired(&mut self, now_ms: u64) -> Vec<LeaseKey> {
        let mut expired: Vec<LeaseKey> = self
            .leases
            .iter_mut()
            .filter(|(_, lease)| !lease.eviction_pending && lease.is_expired_at(now_ms))
            .map(|(key, lease)| {
                lease.eviction_pending = true;
                key.clone()
            })
            .collect();
        expired.sort_by(|a, b| {
            a.instance_id
                .cmp(&b.instance_id)
                .then_with(|| a.source.cmp(&b.source))
        });
        expired
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn clear(&mut self) {
        self.leases.clear();
    }
}
