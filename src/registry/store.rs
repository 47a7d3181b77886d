//! Registry store.
//!
//! Mutations go through a single serializer (`state`) which owns every
//! [`InstanceHolder`], the lease table and the status overrides. After each
//! accepted mutation the writer publishes the reconciled views into a
//! read-side [`ViewTable`], appends to the recently-changed queue, invalidates
//! the response cache and broadcasts the notifications, all before releasing
//! the serializer. Readers only touch the view table.

use crate::cache::SnapshotSource;
use crate::core::config::RegistryConfig;
use crate::core::error::{RegistryError, RegistryResult};
use crate::core::time::SharedClock;
use crate::eviction::{EvictionItem, EvictionReason, EvictionTarget};
use crate::model::application::{hash_code_from_counts, status_counts};
use crate::model::{
    ActionType, Application, Applications, ChangeKind, ChangeNotification, InstanceRecord,
    InstanceStatus, Source,
};
use crate::ops::observability::RegistryMetrics;
use crate::registry::holder::{InstanceHolder, StoredCopy};
use crate::registry::index::{PublishedView, ViewTable};
use crate::registry::interest::{Interest, InterestStream};
use crate::registry::lease::{LeaseKey, LeaseTable};
use crate::registry::recent::{ActivityRing, RecentlyChanged};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

/// Receives the entities touched by every accepted mutation.
pub trait InvalidationListener: Send + Sync {
    fn invalidate(&self, app_name: &str, vip: Option<&str>, secure_vip: Option<&str>);
}

/// Result of one store mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationOutcome {
    /// Notifications emitted, in order.
    pub notifications: Vec<ChangeNotification>,
    /// The instance id became visible.
    pub created: bool,
    /// The instance id disappeared.
    pub removed: bool,
    /// At least one stored copy was written or removed.
    pub accepted: bool,
}

impl MutationOutcome {
    fn rejected() -> Self {
        Self::default()
    }
}

#[derive(Debug)]
struct StoreState {
    holders: HashMap<String, InstanceHolder>,
    leases: LeaseTable,
    overrides: HashMap<String, InstanceStatus>,
    recent_registered: ActivityRing,
    recent_cancelled: ActivityRing,
    changes: Option<broadcast::Sender<ChangeNotification>>,
}

/// Authoritative registry of instance holders.
pub struct RegistryStore {
    config: RegistryConfig,
    clock: SharedClock,
    metrics: Arc<RegistryMetrics>,
    state: Mutex<StoreState>,
    views: RwLock<ViewTable>,
    recent: Mutex<RecentlyChanged>,
    size: AtomicUsize,
    listener: RwLock<Option<Weak<dyn InvalidationListener>>>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for RegistryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryStore")
            .field("size", &self.size())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl RegistryStore {
    pub fn new(config: RegistryConfig, clock: SharedClock, metrics: Arc<RegistryMetrics>) -> Self {
        let (changes, _) = broadcast::channel(config.change_stream_capacity.max(1));
        Self {
            config,
            clock,
            metrics,
            state: Mutex::new(StoreState {
                holders: HashMap::new(),
                leases: LeaseTable::new(),
                overrides: HashMap::new(),
                recent_registered: ActivityRing::new(ActivityRing::DEFAULT_CAPACITY),
                recent_cancelled: ActivityRing::new(ActivityRing::DEFAULT_CAPACITY),
                changes: Some(changes),
            }),
            views: RwLock::new(ViewTable::new()),
            recent: Mutex::new(RecentlyChanged::new()),
            size: AtomicUsize::new(0),
            listener: RwLock::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Attach the response cache (or any other listener) to mutations.
    pub fn set_invalidation_listener(&self, listener: Weak<dyn InvalidationListener>) {
        *self.listener.write() = Some(listener);
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Store a copy written by `source` and reconcile the instance's view.
    pub fn register(&self, record: InstanceRecord, source: Source) -> MutationOutcome {
        if self.is_shut_down() {
            tracing::debug!(instance = %record.id, "register after shutdown ignored");
            return MutationOutcome::rejected();
        }
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let mut record = record;
        record.last_updated_timestamp = now;
        record.action_type = None;

        if record.overridden_status != InstanceStatus::Unknown {
            state
                .overrides
                .entry(record.id.clone())
                .or_insert(record.overridden_status);
        }
        if let Some(status) = state.overrides.get(&record.id).copied() {
            record.overridden_status = status;
            record.status = status;
        }

        let id = record.id.clone();
        let app = record.app_name.clone();
        let record = Arc::new(record);
        let holder = state
            .holders
            .entry(id.clone())
            .or_insert_with(|| InstanceHolder::new(id.clone()));
        let notifications = holder.update(source.clone(), record.clone());
        let accepted = holder
            .get_from(&source)
            .is_some_and(|stored| Arc::ptr_eq(stored, &record));

        if !accepted {
            tracing::warn!(
                instance = %id,
                source = %source,
                dirty = record.last_dirty_timestamp,
                "stale registration ignored"
            );
            self.metrics.record_stale_write();
            return MutationOutcome::rejected();
        }

        state.leases.grant(
            LeaseKey::new(id.clone(), source.logical()),
            self.config.lease_duration_ms,
            now,
        );
        state.recent_registered.push(now, &app, &id);
        self.metrics.record_register(source.origin().as_str());
        tracing::debug!(instance = %id, source = %source, "registered");
        self.commit(&mut state, &id, notifications, now)
    }

    /// Extend the lease of the Local copy (or the Replicated copies when
    /// `is_replication`). Returns false when no such copy exists.
    pub fn renew(&self, app_name: &str, id: &str, is_replication: bool) -> bool {
        if self.is_shut_down() {
            return false;
        }
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let targets = Self::targets(&state, app_name, id, is_replication);
        let mut renewed = false;
        for copy in &targets {
            let key = LeaseKey::new(id, copy.source.logical());
            renewed |= state.leases.renew(&key, now);
        }
        self.metrics.record_renew(renewed);
        if !renewed {
            tracing::debug!(app = %app_name, instance = %id, is_replication, "renew for unknown instance");
            return false;
        }

        // An override whose status differs from the served copy is re-applied.
        let overridden = state.overrides.get(id).copied();
        if let Some(status) = overridden {
            let mut notifications = Vec::new();
            if let Some(holder) = state.holders.get_mut(id) {
                for copy in targets.iter().filter(|c| c.record.status != status) {
                    let mut record = copy.record.with_status(status);
                    record.overridden_status = status;
                    record.last_updated_timestamp = now;
                    notifications.extend(holder.update(copy.source.clone(), Arc::new(record)));
                }
            }
            if !notifications.is_empty() {
                tracing::info!(instance = %id, status = %status, "status override re-applied on renew");
                self.commit(&mut state, id, notifications, now);
            }
        }
        true
    }

    /// Remove the Local copy (or the Replicated copies when `is_replication`).
    pub fn cancel(&self, app_name: &str, id: &str, is_replication: bool) -> MutationOutcome {
        if self.is_shut_down() {
            return MutationOutcome::rejected();
        }
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let targets = Self::targets(&state, app_name, id, is_replication);
        if targets.is_empty() {
            tracing::warn!(app = %app_name, instance = %id, is_replication, "cancel for unknown instance");
            self.metrics.record_cancel_not_found();
            return MutationOutcome::rejected();
        }

        let mut notifications = Vec::new();
        for copy in &targets {
            notifications.extend(self.remove_copy(&mut state, id, &copy.source));
            self.metrics.record_unregister(copy.source.origin().as_str());
        }
        state.overrides.remove(id);
        state.recent_cancelled.push(now, app_name, id);
        tracing::debug!(app = %app_name, instance = %id, copies = targets.len(), "cancelled");
        let mut outcome = self.commit(&mut state, id, notifications, now);
        outcome.accepted = true;
        outcome
    }

    /// Remove the copy written by exactly `source` as an explicit unregister.
    pub fn unregister_source(&self, id: &str, source: &Source) -> MutationOutcome {
        if self.is_shut_down() {
            return MutationOutcome::rejected();
        }
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let present = state
            .holders
            .get(id)
            .and_then(|holder| holder.get_from(source))
            .cloned();
        let Some(record) = present else {
            tracing::debug!(instance = %id, source = %source, "unregister for unknown copy");
            return MutationOutcome::rejected();
        };
        let notifications = self.remove_copy(&mut state, id, source);
        state.recent_cancelled.push(now, &record.app_name, id);
        self.metrics.record_unregister(source.origin().as_str());
        let mut outcome = self.commit(&mut state, id, notifications, now);
        outcome.accepted = true;
        outcome
    }

    /// Override the status of the targeted copies.
    pub fn status_update(
        &self,
        app_name: &str,
        id: &str,
        status: InstanceStatus,
        last_dirty_timestamp: Option<u64>,
        is_replication: bool,
    ) -> bool {
        self.rewrite_status(app_name, id, status, status, last_dirty_timestamp, is_replication)
    }

    /// Clear the status override and set `status` on the targeted copies.
    pub fn delete_status_override(
        &self,
        app_name: &str,
        id: &str,
        status: InstanceStatus,
        last_dirty_timestamp: Option<u64>,
        is_replication: bool,
    ) -> bool {
        self.rewrite_status(
            app_name,
            id,
            status,
            InstanceStatus::Unknown,
            last_dirty_timestamp,
            is_replication,
        )
    }

    fn rewrite_status(
        &self,
        app_name: &str,
        id: &str,
        status: InstanceStatus,
        overridden: InstanceStatus,
        last_dirty_timestamp: Option<u64>,
        is_replication: bool,
    ) -> bool {
        if self.is_shut_down() {
            return false;
        }
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let targets = Self::targets(&state, app_name, id, is_replication);
        if targets.is_empty() {
            tracing::debug!(app = %app_name, instance = %id, "status change for unknown instance");
            return false;
        }

        match overridden {
            InstanceStatus::Unknown => state.overrides.remove(id),
            other => state.overrides.insert(id.to_string(), other),
        };

        let mut notifications = Vec::new();
        for copy in &targets {
            let mut record = copy.record.with_status(status);
            record.overridden_status = overridden;
            record.last_dirty_timestamp = match last_dirty_timestamp {
                Some(ts) if ts > record.last_dirty_timestamp => ts,
                _ => now.max(record.last_dirty_timestamp),
            };
            record.last_updated_timestamp = now;
            if let Some(holder) = state.holders.get_mut(id) {
                notifications.extend(holder.update(copy.source.clone(), Arc::new(record)));
            }
            state
                .leases
                .renew(&LeaseKey::new(id, copy.source.logical()), now);
        }
        tracing::info!(
            app = %app_name,
            instance = %id,
            status = %status,
            overridden = %overridden,
            "instance status changed"
        );
        self.commit(&mut state, id, notifications, now);
        true
    }

    /// Copies of `id` selected by origin: Local when `!is_replication`,
    /// Replicated otherwise. Empty when the served view belongs to another app.
    fn targets(state: &StoreState, app_name: &str, id: &str, is_replication: bool) -> Vec<StoredCopy> {
        let Some(holder) = state.holders.get(id) else {
            return Vec::new();
        };
        if holder.get().is_some_and(|view| view.app_name != app_name) {
            return Vec::new();
        }
        holder
            .copies()
            .filter(|copy| copy.source.is_local() != is_replication)
            .cloned()
            .collect()
    }

    fn remove_copy(&self, state: &mut StoreState, id: &str, source: &Source) -> Vec<ChangeNotification> {
        state.leases.revoke(&LeaseKey::new(id, source.logical()));
        state
            .holders
            .get_mut(id)
            .map(|holder| holder.remove(source))
            .unwrap_or_default()
    }

    /// Publish the holder's view and fan the notifications out. Called with
    /// the serializer held.
    fn commit(
        &self,
        state: &mut StoreState,
        id: &str,
        notifications: Vec<ChangeNotification>,
        now_ms: u64,
    ) -> MutationOutcome {
        let view = state.holders.get(id).and_then(|holder| {
            holder.view().map(|copy| PublishedView {
                record: copy.record.clone(),
                source: copy.source.clone(),
            })
        });
        if state.holders.get(id).is_some_and(InstanceHolder::is_empty) {
            state.holders.remove(id);
        }

        let now_visible = view.is_some();
        let new_record = view.as_ref().map(|v| v.record.clone());
        let previous = self.views.write().publish(id, view);
        let created = previous.is_none() && now_visible;
        let removed = previous.is_some() && !now_visible;
        if created {
            self.size.fetch_add(1, Ordering::AcqRel);
        } else if removed {
            self.size.fetch_sub(1, Ordering::AcqRel);
        }
        self.metrics.set_registry_size(self.size());

        if !notifications.is_empty() {
            let mut recent = self.recent.lock();
            for notification in &notifications {
                let action = match notification.kind() {
                    ChangeKind::Add => ActionType::Added,
                    ChangeKind::Modify => ActionType::Modified,
                    ChangeKind::Delete => ActionType::Deleted,
                };
                recent.push(notification.record(), action, now_ms);
            }
        }

        self.invalidate(previous.as_ref().map(|v| v.record.as_ref()));
        if new_record.as_ref().map(Arc::as_ptr) != previous.as_ref().map(|v| Arc::as_ptr(&v.record)) {
            self.invalidate(new_record.as_deref());
        }

        if let Some(changes) = state.changes.as_ref() {
            for notification in &notifications {
                // No receivers is fine.
                let _ = changes.send(notification.clone());
            }
        }
        self.metrics.record_notifications(notifications.len());

        MutationOutcome {
            notifications,
            created,
            removed,
            accepted: true,
        }
    }

    fn invalidate(&self, record: Option<&InstanceRecord>) {
        let Some(record) = record else {
            return;
        };
        let listener = self.listener.read().as_ref().and_then(Weak::upgrade);
        if let Some(listener) = listener {
            listener.invalidate(
                &record.app_name,
                record.vip_address.as_deref(),
                record.secure_vip_address.as_deref(),
            );
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Number of visible instances.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// The served view of an instance.
    pub fn get(&self, id: &str) -> Option<Arc<InstanceRecord>> {
        self.views.read().get(id).map(|view| view.record.clone())
    }

    /// The served view together with its source.
    pub fn get_with_source(&self, id: &str) -> Option<PublishedView> {
        self.views.read().get(id).cloned()
    }

    pub fn instance_by_app_and_id(&self, app_name: &str, id: &str) -> Option<Arc<InstanceRecord>> {
        self.get(id).filter(|record| record.app_name == app_name)
    }

    pub fn application(&self, name: &str) -> Option<Application> {
        let instances = self.views.read().by_app(name);
        if instances.is_empty() {
            return None;
        }
        let mut app = Application::new(name);
        for record in instances {
            app.add_instance(record);
        }
        Some(app)
    }

    /// Every visible instance grouped by application.
    pub fn applications(&self) -> Applications {
        let records: Vec<Arc<InstanceRecord>> = self.views.read().records().cloned().collect();
        Applications::from_records(records)
    }

    /// Recently changed instances. The hash code describes the full registry
    /// so that a client applying the delta can verify convergence.
    pub fn application_deltas(&self) -> Applications {
        let changes: Vec<Arc<InstanceRecord>> = self
            .recent
            .lock()
            .iter()
            .map(|change| change.record.clone())
            .collect();
        let hash = {
            let views = self.views.read();
            hash_code_from_counts(&status_counts(views.records().map(|record| &**record)))
        };
        let mut apps = Applications::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();
        for record in changes {
            let index = *by_name.entry(record.app_name.clone()).or_insert_with(|| {
                apps.add_application(Application::new(record.app_name.clone()));
                apps.applications.len() - 1
            });
            apps.applications[index].add_instance(record);
        }
        apps.apps_hash_code = hash;
        apps
    }

    pub fn instances_by_vip(&self, vip: &str) -> Vec<Arc<InstanceRecord>> {
        self.views.read().by_vip(vip)
    }

    pub fn instances_by_secure_vip(&self, vip: &str) -> Vec<Arc<InstanceRecord>> {
        self.views.read().by_secure_vip(vip)
    }

    /// Views currently matching an interest.
    pub fn snapshot(&self, interest: &Interest) -> Vec<Arc<InstanceRecord>> {
        self.views
            .read()
            .records()
            .filter(|record| interest.matches(record))
            .cloned()
            .collect()
    }

    /// Subscribe to an interest: current matching views as `Add`
    /// notifications, then every later matching change.
    pub fn subscribe(&self, interest: Interest) -> RegistryResult<InterestStream> {
        let state = self.state.lock();
        let Some(changes) = state.changes.as_ref() else {
            return Err(RegistryError::shut_down("registry"));
        };
        let receiver = changes.subscribe();
        let mut snapshot: Vec<ChangeNotification> = state
            .holders
            .values()
            .filter_map(InstanceHolder::snapshot_notification)
            .filter(|notification| interest.matches(notification.record()))
            .collect();
        drop(state);
        snapshot.sort_by(|a, b| a.instance_id().cmp(b.instance_id()));
        Ok(InterestStream::new(interest, snapshot, receiver))
    }

    /// Sources of every stored copy of an instance, in write order.
    pub fn sources_of(&self, id: &str) -> Vec<Source> {
        self.state
            .lock()
            .holders
            .get(id)
            .map(InstanceHolder::all_sources)
            .unwrap_or_default()
    }

    /// Current status override of an instance.
    pub fn status_override(&self, id: &str) -> Option<InstanceStatus> {
        self.state.lock().overrides.get(id).copied()
    }

    /// Last registrations as `(timestamp, "APP(id)")`, oldest first.
    pub fn recent_registrations(&self) -> Vec<(u64, String)> {
        self.state.lock().recent_registered.entries()
    }

    /// Last cancellations as `(timestamp, "APP(id)")`, oldest first.
    pub fn recent_cancellations(&self) -> Vec<(u64, String)> {
        self.state.lock().recent_cancelled.entries()
    }

    pub fn recent_change_count(&self) -> usize {
        self.recent.lock().len()
    }

    // ========================================================================
    // Eviction and maintenance
    // ========================================================================

    /// Copies whose lease ran out, as eviction items. Each expired lease is
    /// reported once until it is renewed.
    pub fn expired_leases(&self) -> Vec<EvictionItem> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let expired = state.leases.take_expired(now);
        let mut items = Vec::with_capacity(expired.len());
        for key in expired {
            let copy = state.holders.get(&key.instance_id).and_then(|holder| {
                holder
                    .copies()
                    .find(|copy| key.source.contains(&copy.source))
                    .cloned()
            });
            match copy {
                Some(copy) => items.push(EvictionItem::new(
                    copy.record,
                    copy.source,
                    EvictionReason::LeaseExpired,
                    now,
                )),
                None => {
                    state.leases.revoke(&key);
                }
            }
        }
        if !items.is_empty() {
            tracing::info!(expired = items.len(), "leases expired");
        }
        items
    }

    /// Eviction items for every copy whose source fails `retain`.
    pub fn evict_all_except<F>(&self, retain: F) -> Vec<EvictionItem>
    where
        F: Fn(&Source) -> bool,
    {
        self.collect_items(EvictionReason::Retired, |copy| !retain(&copy.source))
    }

    /// Eviction items for every copy written by exactly `source`.
    pub fn evict_source(&self, source: &Source) -> Vec<EvictionItem> {
        self.collect_items(EvictionReason::SourceDisconnected, |copy| {
            copy.source.matches_exactly(source)
        })
    }

    /// Eviction item for one copy written by exactly `source`.
    pub fn eviction_item(&self, id: &str, source: &Source, reason: EvictionReason) -> Option<EvictionItem> {
        let now = self.clock.now_ms();
        let state = self.state.lock();
        let record = state.holders.get(id)?.get_from(source)?.clone();
        Some(EvictionItem::new(record, source.clone(), reason, now))
    }

    fn collect_items<F>(&self, reason: EvictionReason, select: F) -> Vec<EvictionItem>
    where
        F: Fn(&StoredCopy) -> bool,
    {
        let now = self.clock.now_ms();
        let state = self.state.lock();
        let mut ids: Vec<&String> = state.holders.keys().collect();
        ids.sort();
        let select = &select;
        ids.into_iter()
            .filter_map(|id| state.holders.get(id))
            .flat_map(move |holder| holder.copies().filter(move |copy| select(*copy)))
            .map(|copy| EvictionItem::new(copy.record.clone(), copy.source.clone(), reason, now))
            .collect()
    }

    /// Drop recently-changed entries past the retention window.
    pub fn purge_recent_changes(&self) -> usize {
        let now = self.clock.now_ms();
        let purged = self.recent.lock().purge(now, self.config.delta_retention_ms);
        if purged > 0 {
            tracing::debug!(purged, "recently changed entries purged");
        }
        purged
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Close every subscription and release all state. Later mutations are
    /// ignored and later subscriptions fail.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock();
        state.changes = None;
        state.holders.clear();
        state.leases.clear();
        state.overrides.clear();
        state.recent_registered.clear();
        state.recent_cancelled.clear();
        self.views.write().clear();
        self.recent.lock().clear();
        self.size.store(0, Ordering::Release);
        self.metrics.set_registry_size(0);
        drop(state);
        tracing::info!("registry store shut down");
    }
}

impl EvictionTarget for RegistryStore {
    fn size(&self) -> usize {
        RegistryStore::size(self)
    }

    fn evict(&self, item: &EvictionItem) -> RegistryResult<bool> {
        if self.is_shut_down() {
            return Err(RegistryError::shut_down("registry"));
        }
        let now = self.clock.now_ms();
        let id = item.instance_id();
        let mut state = self.state.lock();
        let key = LeaseKey::new(id, item.source.logical());

        if item.reason == EvictionReason::LeaseExpired
            && state.leases.get(&key).is_some_and(|lease| !lease.eviction_pending)
        {
            tracing::debug!(instance = %id, source = %item.source, "lease renewed before eviction");
            return Ok(false);
        }
        let present = state
            .holders
            .get(id)
            .is_some_and(|holder| holder.get_from(&item.source).is_some());
        if !present {
            return Ok(false);
        }

        let notifications = self.remove_copy(&mut state, id, &item.source);
        self.commit(&mut state, id, notifications, now);
        Ok(true)
    }
}

impl SnapshotSource for RegistryStore {
    fn applications(&self) -> Applications {
        RegistryStore::applications(self)
    }

    fn application_deltas(&self) -> Applications {
        RegistryStore::application_deltas(self)
    }

    fn application(&self, name: &str) -> Option<Application> {
        RegistryStore::application(self, name)
    }

    fn applications_for_vip(&self, vip: &str) -> Applications {
        Applications::from_records(self.instances_by_vip(vip))
    }

    fn applications_for_secure_vip(&self, vip: &str) -> Applications {
        Applications::from_records(self.instances_by_secure_vip(vip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::ManualClock;

    fn store() -> (Arc<ManualClock>, RegistryStore) {
        let clock = ManualClock::shared(1_000);
        let store = RegistryStore::new(
            RegistryConfig::default(),
            clock.clone(),
            Arc::new(RegistryMetrics::new()),
        );
        (clock, store)
    }

    fn rec(id: &str, app: &str) -> InstanceRecord {
        InstanceRecord::builder(id, app).vip_address("v1,v2").build()
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl InvalidationListener for Recorder {
        fn invalidate(&self, app_name: &str, vip: Option<&str>, _secure_vip: Option<&str>) {
            self.calls
                .lock()
                .push(format!("{app_name}|{}", vip.unwrap_or("")));
        }
    }

    #[test]
    fn test_register_publishes_and_indexes() {
        let (_clock, store) = store();
        let outcome = store.register(rec("i1", "A"), Source::local("A", "c1"));
        assert!(outcome.created);
        assert_eq!(outcome.notifications.len(), 1);
        assert_eq!(store.size(), 1);
        assert_eq!(store.instances_by_vip("v2").len(), 1);
        assert_eq!(store.application("A").unwrap().len(), 1);
        assert!(store.instance_by_app_and_id("B", "i1").is_none());
        assert_eq!(store.get("i1").unwrap().last_updated_timestamp, 1_000);
    }

    #[test]
    fn test_stale_registration_is_noop() {
        let (_clock, store) = store();
        let source = Source::local("A", "c1");
        let mut newer = rec("i1", "A");
        newer.last_dirty_timestamp = 10;
        store.register(newer, source.clone());
        let mut older = rec("i1", "A");
        older.last_dirty_timestamp = 5;
        older.port = Some(1);
        let outcome = store.register(older, source);
        assert!(!outcome.accepted);
        assert!(outcome.notifications.is_empty());
        assert_eq!(store.get("i1").unwrap().port, None);
    }

    #[test]
    fn test_cancel_targets_by_origin() {
        let (_clock, store) = store();
        store.register(rec("i1", "A"), Source::replicated("peer", "p1"));
        assert!(!store.cancel("A", "i1", false).accepted);
        let outcome = store.cancel("A", "i1", true);
        assert!(outcome.removed);
        assert_eq!(store.size(), 0);
        assert_eq!(store.recent_cancellations().len(), 1);
    }

    #[test]
    fn test_renew_requires_lease() {
        let (_clock, store) = store();
        assert!(!store.renew("A", "i1", false));
        store.register(rec("i1", "A"), Source::local("A", "c1"));
        assert!(store.renew("A", "i1", false));
        assert!(!store.renew("A", "i1", true));
        assert!(!store.renew("B", "i1", false));
    }

    #[test]
    fn test_status_override_survives_reregistration() {
        let (clock, store) = store();
        let source = Source::local("A", "c1");
        store.register(rec("i1", "A"), source.clone());
        assert!(store.status_update("A", "i1", InstanceStatus::OutOfService, None, false));
        let view = store.get("i1").unwrap();
        assert_eq!(view.status, InstanceStatus::OutOfService);
        assert_eq!(view.last_dirty_timestamp, 1_000);

        clock.advance(10);
        let mut again = rec("i1", "A");
        again.last_dirty_timestamp = 2_000;
        store.register(again, source);
        assert_eq!(store.get("i1").unwrap().status, InstanceStatus::OutOfService);

        assert!(store.delete_status_override("A", "i1", InstanceStatus::Up, None, false));
        let view = store.get("i1").unwrap();
        assert_eq!(view.status, InstanceStatus::Up);
        assert_eq!(view.overridden_status, InstanceStatus::Unknown);
        assert!(store.status_override("i1").is_none());
    }

    #[test]
    fn test_replicated_dirty_timestamp_adopted() {
        let (_clock, store) = store();
        store.register(rec("i1", "A"), Source::replicated("peer", "p1"));
        assert!(store.status_update("A", "i1", InstanceStatus::Down, Some(5_000), true));
        assert_eq!(store.get("i1").unwrap().last_dirty_timestamp, 5_000);
    }

    #[test]
    fn test_deltas_carry_full_hash() {
        let (clock, store) = store();
        store.register(rec("i1", "A"), Source::local("A", "c1"));
        store.register(rec("i2", "B"), Source::local("B", "c2"));
        store.cancel("B", "i2", false);
        let deltas = store.application_deltas();
        assert_eq!(deltas.instance_count(), 3);
        assert_eq!(deltas.apps_hash_code, "UP_1_");
        let deleted = deltas.application("B").unwrap();
        assert_eq!(deleted.instances.last().unwrap().action_type, Some(ActionType::Deleted));

        clock.advance(store.config().delta_retention_ms + 1);
        assert_eq!(store.purge_recent_changes(), 3);
        assert_eq!(store.application_deltas().instance_count(), 0);
    }

    #[test]
    fn test_invalidation_covers_old_and_new_vips() {
        let (_clock, store) = store();
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn InvalidationListener> = recorder.clone();
        store.set_invalidation_listener(Arc::downgrade(&listener));
        let source = Source::local("A", "c1");
        store.register(rec("i1", "A"), source.clone());
        let mut moved = InstanceRecord::builder("i1", "A").vip_address("v3").build();
        moved.last_dirty_timestamp = 1;
        store.register(moved, source);
        let calls = recorder.calls.lock().clone();
        assert_eq!(calls, vec!["A|v1,v2", "A|v1,v2", "A|v3"]);
    }

    #[test]
    fn test_expired_lease_eviction() {
        let (clock, store) = store();
        store.register(rec("i1", "A"), Source::local("A", "c1"));
        clock.advance(store.config().lease_duration_ms);
        let items = store.expired_leases();
        assert_eq!(items.len(), 1);
        assert!(store.expired_leases().is_empty());

        // A renewal between scan and drain saves the copy.
        assert!(store.renew("A", "i1", false));
        assert!(!store.evict(&items[0]).unwrap());
        assert_eq!(store.size(), 1);

        clock.advance(store.config().lease_duration_ms);
        let items = store.expired_leases();
        assert!(store.evict(&items[0]).unwrap());
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn test_evict_ignores_superseded_connection() {
        let (_clock, store) = store();
        store.register(rec("i1", "A"), Source::local("A", "c1"));
        let stale = store.eviction_item("i1", &Source::local("A", "c1"), EvictionReason::Superseded);
        store.register(rec("i1", "A"), Source::local("A", "c2"));
        assert!(!store.evict(&stale.unwrap()).unwrap());
        assert_eq!(store.size(), 1);
    }

    #[test]
    fn test_bulk_eviction_items() {
        let (_clock, store) = store();
        let peer = Source::replicated("peer", "p1");
        store.register(rec("i1", "A"), Source::local("A", "c1"));
        store.register(rec("i2", "A"), peer.clone());
        store.register(rec("i3", "A"), peer.clone());
        assert_eq!(store.evict_all_except(Source::is_local).len(), 2);
        assert_eq!(store.evict_source(&peer).len(), 2);
        assert!(store.evict_source(&Source::replicated("peer", "p2")).is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_snapshot_then_live() {
        let (_clock, store) = store();
        store.register(rec("i1", "A"), Source::local("A", "c1"));
        let mut stream = store.subscribe(Interest::Application("A".into())).unwrap();
        store.register(rec("i2", "B"), Source::local("B", "c2"));
        store.register(rec("i3", "A"), Source::local("A", "c3"));

        let first = stream.next().await.unwrap();
        assert_eq!(first.instance_id(), "i1");
        let second = stream.next().await.unwrap();
        assert_eq!(second.instance_id(), "i3");

        store.shutdown();
        assert!(stream.next().await.is_none());
        assert!(store.subscribe(Interest::Full).is_err());
        assert!(!store.register(rec("i4", "A"), Source::local("A", "c4")).accepted);
    }
}
