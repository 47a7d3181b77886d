//! Per-instance reconciliation of competing copies.
//!
//! An [`InstanceHolder`] keeps one copy of an instance record per logical
//! source, in write order, and exposes a single reconciled view. Every
//! mutation returns the minimal list of notifications that moves a subscriber
//! from the old view to the new one.
//!
//! View selection rules:
//! - the first copy becomes the view;
//! - a Local copy displaces a Replicated view (promotion);
//! - a write from the view's own logical source updates the view;
//! - any other write is stored but not shown.

use crate::model::{ChangeNotification, InstanceRecord, LogicalSource, Origin, Source};
use indexmap::IndexMap;
use std::sync::Arc;

/// A stored copy together with the exact source that wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCopy {
    pub source: Source,
    pub record: Arc<InstanceRecord>,
}

/// Reconciled copies of a single instance id.
#[derive(Debug)]
pub struct InstanceHolder {
    id: String,
    copies: IndexMap<LogicalSource, StoredCopy>,
    view: Option<StoredCopy>,
}

impl InstanceHolder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            copies: IndexMap::new(),
            view: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The reconciled view.
    pub fn get(&self) -> Option<&Arc<InstanceRecord>> {
        self.view.as_ref().map(|copy| &copy.record)
    }

    /// The copy stored for exactly this source.
    pub fn get_from(&self, source: &Source) -> Option<&Arc<InstanceRecord>> {
        self.copies
            .get(&source.logical())
            .filter(|copy| copy.source.id() == source.id())
            .map(|copy| &copy.record)
    }

    /// Source of the reconciled view.
    pub fn source(&self) -> Option<&Source> {
        self.view.as_ref().map(|copy| &copy.source)
    }

    /// The view as a stored copy.
    pub fn view(&self) -> Option<&StoredCopy> {
        self.view.as_ref()
    }

    /// Sources of every stored copy, in write order.
    pub fn all_sources(&self) -> Vec<Source> {
        self.copies.values().map(|copy| copy.source.clone()).collect()
    }

    /// Stored copies in write order.
    pub fn copies(&self) -> impl Iterator<Item = &StoredCopy> {
        self.copies.values()
    }

    pub fn len(&self) -> usize {
        self.copies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Store a copy and reconcile the view.
    pub fn update(&mut self, source: Source, record: Arc<InstanceRecord>) -> Vec<ChangeNotification> {
        let logical = source.logical();

        if let Some(existing) = self.copies.get(&logical) {
            if existing.record.last_dirty_timestamp > record.last_dirty_timestamp {
                tracing::debug!(
                    instance = %self.id,
                    source = %source,
                    stored_dirty = existing.record.last_dirty_timestamp,
                    incoming_dirty = record.last_dirty_timestamp,
                    "ignoring stale write"
                );
                return Vec::new();
            }
        }

        // A rewrite from the same connection keeps its slot; a new connection
        // of the logical source moves to the end.
        let incoming = StoredCopy { source, record };
        match self.copies.get_mut(&logical) {
            Some(stored) if stored.source.matches_exactly(&incoming.source) => {
                *stored = incoming.clone();
            }
            _ => {
                self.copies.shift_remove(&logical);
                self.copies.insert(logical, incoming.clone());
            }
        }

        let Some(current) = self.view.take() else {
            let notification = ChangeNotification::add(incoming.record.clone(), incoming.source.clone());
            self.view = Some(incoming);
            return vec![notification];
        };

        let promote = current.source.origin() == Origin::Replicated
            && incoming.source.origin() == Origin::Local;
        if promote {
            let deltas = incoming.record.diff_older(&current.record);
            tracing::debug!(
                instance = %self.id,
                from = %current.source,
                to = %incoming.source,
                "local copy promoted over replicated view"
            );
            let notification =
                ChangeNotification::modify(incoming.record.clone(), incoming.source.clone(), deltas);
            self.view = Some(incoming);
            return vec![notification];
        }

        if current.source.matches(&incoming.source) {
            let deltas = incoming.record.diff_older(&current.record);
            let notifications = if deltas.is_empty() {
                Vec::new()
            } else {
                vec![ChangeNotification::modify(
                    incoming.record.clone(),
                    incoming.source.clone(),
                    deltas,
                )]
            };
            self.view = Some(incoming);
            return notifications;
        }

        self.view = Some(current);
        Vec::new()
    }

    /// Remove the copy written by exactly this source and reconcile the view.
    pub fn remove(&mut self, source: &Source) -> Vec<ChangeNotification> {
        let logical = source.logical();
        match self.copies.get(&logical) {
            None => return Vec::new(),
            Some(stored) if stored.source.id() != source.id() => {
                tracing::debug!(
                    instance = %self.id,
                    stored = %stored.source,
                    requested = %source,
                    "ignoring remove from superseded connection"
                );
                return Vec::new();
            }
            Some(_) => {}
        }
        let Some(removed) = self.copies.shift_remove(&logical) else {
            return Vec::new();
        };

        let removed_view = self
            .view
            .as_ref()
            .is_some_and(|view| view.source.matches(&removed.source));
        if !removed_view {
            return Vec::new();
        }
        let Some(old) = self.view.take() else {
            return Vec::new();
        };

        let Some(next) = self.next_head() else {
            return vec![ChangeNotification::delete(old.record, old.source)];
        };

        let notifications = if old.source.is_local() && !next.source.is_local() {
            vec![
                ChangeNotification::delete(old.record.clone(), old.source.clone()),
                ChangeNotification::add(next.record.clone(), next.source.clone()),
            ]
        } else {
            let deltas = next.record.diff_older(&old.record);
            if deltas.is_empty() {
                Vec::new()
            } else {
                vec![ChangeNotification::modify(
                    next.record.clone(),
                    next.source.clone(),
                    deltas,
                )]
            }
        };
        self.view = Some(next);
        notifications
    }

    /// Earliest-written Local copy, or the earliest-written copy if none is Local.
    fn next_head(&self) -> Option<StoredCopy> {
        self.copies
            .values()
            .find(|copy| copy.source.is_local())
            .or_else(|| self.copies.values().next())
            .cloned()
    }

    /// The view as an Add notification, for subscription snapshots.
    pub fn snapshot_notification(&self) -> Option<ChangeNotification> {
        self.view
            .as_ref()
            .map(|copy| ChangeNotification::add(copy.record.clone(), copy.source.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChangeKind, InstanceStatus};

    fn rec(status: InstanceStatus, dirty: u64) -> Arc<InstanceRecord> {
        Arc::new(
            InstanceRecord::builder("i1", "A")
                .status(status)
                .last_dirty_timestamp(dirty)
                .build(),
        )
    }

    fn kinds(notifications: &[ChangeNotification]) -> Vec<ChangeKind> {
        notifications.iter().map(ChangeNotification::kind).collect()
    }

    #[test]
    fn test_first_write_adds() {
        let mut holder = InstanceHolder::new("i1");
        let out = holder.update(Source::local("c", "1"), rec(InstanceStatus::Up, 1));
        assert_eq!(kinds(&out), vec![ChangeKind::Add]);
        assert_eq!(holder.get().unwrap().status, InstanceStatus::Up);
        assert_eq!(holder.source(), Some(&Source::local("c", "1")));
    }

    #[test]
    fn test_replicated_write_does_not_displace_local() {
        let mut holder = InstanceHolder::new("i1");
        holder.update(Source::local("c", "1"), rec(InstanceStatus::Up, 1));
        let out = holder.update(Source::replicated("peer1", "p"), rec(InstanceStatus::Down, 5));
        assert!(out.is_empty());
        assert_eq!(holder.get().unwrap().status, InstanceStatus::Up);
        assert_eq!(holder.len(), 2);
    }

    #[test]
    fn test_local_promotes_over_replicated() {
        let mut holder = InstanceHolder::new("i1");
        holder.update(Source::replicated("peer1", "p"), rec(InstanceStatus::Up, 1));
        let out = holder.update(Source::local("c", "1"), rec(InstanceStatus::Up, 1));
        assert_eq!(kinds(&out), vec![ChangeKind::Modify]);
        assert!(out[0].deltas().is_empty());
        assert!(holder.source().unwrap().is_local());
    }

    #[test]
    fn test_same_logical_source_update() {
        let mut holder = InstanceHolder::new("i1");
        holder.update(Source::local("c", "1"), rec(InstanceStatus::Up, 1));

        let out = holder.update(Source::local("c", "2"), rec(InstanceStatus::Up, 1));
        assert!(out.is_empty());
        assert_eq!(holder.source().unwrap().id(), "2");

        let out = holder.update(Source::local("c", "2"), rec(InstanceStatus::Down, 2));
        assert_eq!(kinds(&out), vec![ChangeKind::Modify]);
        assert_eq!(out[0].deltas().len(), 2);
    }

    #[test]
    fn test_stale_write_is_ignored() {
        let mut holder = InstanceHolder::new("i1");
        holder.update(Source::local("c", "1"), rec(InstanceStatus::Up, 10));
        let out = holder.update(Source::local("c", "1"), rec(InstanceStatus::Down, 5));
        assert!(out.is_empty());
        assert_eq!(holder.get().unwrap().status, InstanceStatus::Up);
    }

    #[test]
    fn test_remove_requires_exact_source() {
        let mut holder = InstanceHolder::new("i1");
        holder.update(Source::local("c", "2"), rec(InstanceStatus::Up, 1));
        assert!(holder.remove(&Source::local("c", "1")).is_empty());
        assert_eq!(holder.len(), 1);

        let out = holder.remove(&Source::local("c", "2"));
        assert_eq!(kinds(&out), vec![ChangeKind::Delete]);
        assert!(holder.is_empty());
        assert!(holder.get().is_none());
    }

    #[test]
    fn test_remove_non_view_copy_is_silent() {
        let mut holder = InstanceHolder::new("i1");
        holder.update(Source::local("c", "1"), rec(InstanceStatus::Up, 1));
        holder.update(Source::replicated("peer1", "p"), rec(InstanceStatus::Up, 1));
        assert!(holder.remove(&Source::replicated("peer1", "p")).is_empty());
        assert!(holder.source().unwrap().is_local());
    }

    #[test]
    fn test_local_demotion_emits_delete_then_add() {
        let mut holder = InstanceHolder::new("i1");
        holder.update(Source::replicated("peer1", "p"), rec(InstanceStatus::Up, 1));
        holder.update(Source::local("c", "1"), rec(InstanceStatus::Up, 1));

        let out = holder.remove(&Source::local("c", "1"));
        assert_eq!(kinds(&out), vec![ChangeKind::Delete, ChangeKind::Add]);
        assert_eq!(out[1].source(), &Source::replicated("peer1", "p"));
        assert_eq!(holder.source(), Some(&Source::replicated("peer1", "p")));
    }

    #[test]
    fn test_replicated_handover_emits_modify_on_difference() {
        let mut holder = InstanceHolder::new("i1");
        holder.update(Source::replicated("peer1", "p"), rec(InstanceStatus::Up, 1));
        holder.update(Source::replicated("peer2", "q"), rec(InstanceStatus::Down, 1));

        let out = holder.remove(&Source::replicated("peer1", "p"));
        assert_eq!(kinds(&out), vec![ChangeKind::Modify]);
        assert_eq!(holder.get().unwrap().status, InstanceStatus::Down);
    }

    #[test]
    fn test_next_head_prefers_local() {
        let mut holder = InstanceHolder::new("i1");
        holder.update(Source::local("a", "1"), rec(InstanceStatus::Up, 1));
        holder.update(Source::replicated("peer1", "p"), rec(InstanceStatus::Up, 1));
        holder.update(Source::local("b", "1"), rec(InstanceStatus::Up, 1));

        holder.remove(&Source::local("a", "1"));
        assert_eq!(holder.source(), Some(&Source::local("b", "1")));
    }

    #[test]
    fn test_write_order_tracks_connection_changes() {
        let names = |holder: &InstanceHolder| -> Vec<String> {
            holder
                .all_sources()
                .iter()
                .map(|s| s.name().to_string())
                .collect()
        };
        let mut holder = InstanceHolder::new("i1");
        holder.update(Source::replicated("peer1", "p"), rec(InstanceStatus::Up, 1));
        holder.update(Source::replicated("peer2", "q"), rec(InstanceStatus::Up, 1));
        holder.update(Source::replicated("peer1", "p"), rec(InstanceStatus::Up, 2));

        assert_eq!(names(&holder), vec!["peer1", "peer2"]);
        assert_eq!(holder.get_from(&Source::replicated("peer1", "p")).unwrap().last_dirty_timestamp, 2);
        assert!(holder.get_from(&Source::replicated("peer1", "other")).is_none());

        holder.update(Source::replicated("peer1", "p2"), rec(InstanceStatus::Up, 3));
        assert_eq!(names(&holder), vec!["peer2", "peer1"]);
    }

    #[test]
    fn test_refreshed_first_peer_takes_over_after_local_removal() {
        let mut holder = InstanceHolder::new("i1");
        holder.update(Source::replicated("peer1", "p"), rec(InstanceStatus::Up, 1));
        holder.update(Source::replicated("peer2", "q"), rec(InstanceStatus::Up, 1));
        holder.update(Source::local("c", "1"), rec(InstanceStatus::Up, 1));
        holder.update(Source::replicated("peer1", "p"), rec(InstanceStatus::Up, 2));

        let out = holder.remove(&Source::local("c", "1"));
        assert_eq!(kinds(&out), vec![ChangeKind::Delete, ChangeKind::Add]);
        assert_eq!(out[1].source(), &Source::replicated("peer1", "p"));
        assert_eq!(holder.get().unwrap().last_dirty_timestamp, 2);
    }
}
