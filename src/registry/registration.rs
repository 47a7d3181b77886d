//! Duplicate-registration suppression.
//!
//! Each registration stream connects under `{instance id, source}` and gets a
//! generation-tagged [`RegistrationHandle`]. Connecting a second stream for the
//! same instance id supersedes the first: the first stream's copy is queued
//! for eviction and every later event on its handle is dropped.

use crate::eviction::EvictionReason;
use crate::model::{ChangeNotification, InstanceRecord, Source};
use crate::registry::service::ServiceRegistry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies one registration stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationHandle {
    instance_id: String,
    source: Source,
    generation: u64,
}

impl RegistrationHandle {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone)]
struct Registrant {
    source: Source,
    generation: u64,
}

/// Routes registration stream events into the registry, dropping events from
/// superseded streams.
#[derive(Debug)]
pub struct RegistrationProcessor {
    registry: Arc<ServiceRegistry>,
    active: Mutex<HashMap<String, Registrant>>,
    next_generation: AtomicU64,
}

impl RegistrationProcessor {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            active: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Open a stream for `instance_id`, superseding any earlier stream.
    pub fn connect(&self, instance_id: impl Into<String>, source: Source) -> RegistrationHandle {
        let instance_id = instance_id.into();
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel);
        let previous = self.active.lock().insert(
            instance_id.clone(),
            Registrant {
                source: source.clone(),
                generation,
            },
        );
        if let Some(previous) = previous {
            tracing::info!(
                instance = %instance_id,
                previous = %previous.source,
                current = %source,
                "registration stream superseded"
            );
            if !previous.source.matches_exactly(&source) {
                self.registry
                    .evict_copy(&instance_id, &previous.source, EvictionReason::Superseded);
            }
        }
        RegistrationHandle {
            instance_id,
            source,
            generation,
        }
    }

    /// Whether `handle` belongs to the current stream of its instance.
    pub fn is_current(&self, handle: &RegistrationHandle) -> bool {
        self.active
            .lock()
            .get(&handle.instance_id)
            .is_some_and(|registrant| registrant.generation == handle.generation)
    }

    /// Register or update through a stream.
    pub fn register(&self, handle: &RegistrationHandle, record: InstanceRecord) -> Vec<ChangeNotification> {
        if !self.accept(handle, "register") {
            return Vec::new();
        }
        if record.id != handle.instance_id {
            tracing::warn!(
                instance = %handle.instance_id,
                record = %record.id,
                "registration for a different instance id ignored"
            );
            return Vec::new();
        }
        self.registry.register(record, handle.source.clone())
    }

    /// Explicit unregister through a stream. Closes the stream.
    pub fn unregister(&self, handle: &RegistrationHandle) -> bool {
        if !self.release(handle, "unregister") {
            return false;
        }
        self.registry.unregister(&handle.instance_id, &handle.source)
    }

    /// The stream went away without unregistering. Its copy is queued for
    /// eviction rather than removed.
    pub fn disconnect(&self, handle: &RegistrationHandle) -> bool {
        if !self.release(handle, "disconnect") {
            return false;
        }
        self.registry.evict_copy(
            &handle.instance_id,
            &handle.source,
            EvictionReason::SourceDisconnected,
        )
    }

    /// Number of live streams.
    pub fn active(&self) -> usize {
        self.active.lock().len()
    }

    fn accept(&self, handle: &RegistrationHandle, event: &'static str) -> bool {
        let current = self.is_current(handle);
        if !current {
            tracing::debug!(
                instance = %handle.instance_id,
                source = %handle.source,
                event,
                "event from superseded registration stream dropped"
            );
        }
        current
    }

    fn release(&self, handle: &RegistrationHandle, event: &'static str) -> bool {
        let mut active = self.active.lock();
        let current = active
            .get(&handle.instance_id)
            .is_some_and(|registrant| registrant.generation == handle.generation);
        if current {
            active.remove(&handle.instance_id);
        } else {
            tracing::debug!(
                instance = %handle.instance_id,
                source = %handle.source,
                event,
                "event from superseded registration stream dropped"
            );
        }
        current
    }
}
