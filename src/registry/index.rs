//! Published read view and secondary indexes.
//!
//! The writer swaps `Arc` references in this table while holding the
//! registry's mutation serializer; readers only ever take the read lock.

use crate::model::{InstanceRecord, Source};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// The reconciled view of one instance as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedView {
    pub record: Arc<InstanceRecord>,
    pub source: Source,
}

/// Views by instance id plus name indexes.
#[derive(Debug, Default)]
pub struct ViewTable {
    views: HashMap<String, PublishedView>,
    by_app: HashMap<String, BTreeSet<String>>,
    by_vip: HashMap<String, BTreeSet<String>>,
    by_secure_vip: HashMap<String, BTreeSet<String>>,
}

impl ViewTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace (or clear) the published view of an instance, keeping every
    /// index consistent. Returns the previous view.
    pub fn publish(&mut self, id: &str, view: Option<PublishedView>) -> Option<PublishedView> {
        match view {
            Some(view) => {
                let previous = self.views.insert(id.to_string(), view.clone());
                if let Some(ref old) = previous {
                    self.unindex(&old.record);
                }
                self.index(&view.record);
                previous
            }
            None => {
                let previous = self.views.remove(id);
                if let Some(ref old) = previous {
                    self.unindex(&old.record);
                }
                previous
            }
        }
    }

    fn index(&mut self, record: &InstanceRecord) {
        self.by_app
            .entry(record.app_name.clone())
            .or_default()
            .insert(record.id.clone());
        for vip in record.vip_addresses() {
            self.by_vip
                .entry(vip.to_string())
                .or_default()
                .insert(record.id.clone());
        }
        for vip in record.secure_vip_addresses() {
            self.by_secure_vip
                .entry(vip.to_string())
                .or_default()
                .insert(record.id.clone());
        }
    }

    fn unindex(&mut self, record: &InstanceRecord) {
        remove_from(&mut self.by_app, &record.app_name, &record.id);
        for vip in record.vip_addresses() {
            remove_from(&mut self.by_vip, vip, &record.id);
        }
        for vip in record.secure_vip_addresses() {
            remove_from(&mut self.by_secure_vip, vip, &record.id);
        }
    }

    pub fn get(&self, id: &str) -> Option<&PublishedView> {
        self.views.get(id)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &Arc<InstanceRecord>> {
        self.views.values().map(|view| &view.record)
    }

    pub fn views(&self) -> impl Iterator<Item = &PublishedView> {
        self.views.values()
    }

    pub fn app_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_app.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn by_app(&self, app: &str) -> Vec<Arc<InstanceRecord>> {
        self.resolve(self.by_app.get(app))
    }

    pub fn by_vip(&self, vip: &str) -> Vec<Arc<InstanceRecord>> {
        self.resolve(self.by_vip.get(vip))
    }

    pub fn by_secure_vip(&self, vip: &str) -> Vec<Arc<InstanceRecord>> {
        self.resolve(self.by_secure_vip.get(vip))
    }

    fn resolve(&self, ids: Option<&BTreeSet<String>>) -> Vec<Arc<InstanceRecord>> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.views.get(id).map(|view| view.record.clone()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.views.clear();
        self.by_app.clear();
        self.by_vip.clear();
        self.by_secure_vip.clear();
    }
}

fn remove_from(index: &mut HashMap<String, BTreeSet<String>>, name: &str, id: &str) {
    if let Some(ids) = index.get_mut(name) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(id: &str, app: &str, vip: &str) -> PublishedView {
        PublishedView {
            record: Arc::new(
                InstanceRecord::builder(id, app)
                    .vip_address(vip)
                    .secure_vip_address("secure.vip")
                    .build(),
            ),
            source: Source::local("client", "1"),
        }
    }

    #[test]
    fn test_publish_indexes_views() {
        let mut table = ViewTable::new();
        table.publish("i1", Some(view("i1", "A", "a.vip,shared")));
        table.publish("i2", Some(view("i2", "B", "shared")));

        assert_eq!(table.len(), 2);
        assert_eq!(table.by_app("A").len(), 1);
        assert_eq!(table.by_vip("shared").len(), 2);
        assert_eq!(table.by_secure_vip("secure.vip").len(), 2);
        assert_eq!(table.app_names(), vec!["A", "B"]);
    }

    #[test]
    fn test_republish_moves_index_entries() {
        let mut table = ViewTable::new();
        table.publish("i1", Some(view("i1", "A", "old.vip")));
        let previous = table.publish("i1", Some(view("i1", "A", "new.vip")));

        assert!(previous.is_some());
        assert!(table.by_vip("old.vip").is_empty());
        assert_eq!(table.by_vip("new.vip").len(), 1);
    }

    #[test]
    fn test_clear_view_drops_indexes() {
        let mut table = ViewTable::new();
        table.publish("i1", Some(view("i1", "A", "a.vip")));
        table.publish("i1", None);

        assert!(table.is_empty());
        assert!(table.by_app("A").is_empty());
        assert!(table.app_names().is_empty());
    }
}
